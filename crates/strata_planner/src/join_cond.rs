//! Join Condition Extractor: given a join's ON-expression and the two
//! tables it connects, finds the single equality linking one column of each
//! table (either side optionally behind one cast), and classifies every
//! other top-level AND operand by which table's columns it references.
//!
//! Parsing is pure and deterministic; it surfaces a descriptive error
//! rather than guessing, because a misclassified condition would silently
//! change join semantics once the query is split across connections.

use std::collections::BTreeSet;

use strata_common::PlanError;
use strata_query::{CmpOp, ColumnRef, Expr, TableRef};

/// The extracted pieces of one cross-table join condition.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedJoinCondition {
    /// The from-table side of the linking equality.
    pub from_column: ColumnRef,
    /// The to-table side of the linking equality.
    pub to_column: ColumnRef,
    /// Residual operands referencing only the from table.
    pub from_conditions: Vec<Expr>,
    /// Residual operands referencing only the to table (or neither table).
    pub to_conditions: Vec<Expr>,
}

/// Parse `on` against the two joined tables.
pub fn parse_join_condition(
    on: &Expr,
    from: &TableRef,
    to: &TableRef,
) -> Result<ParsedJoinCondition, PlanError> {
    let operands = flatten_and(on)?;

    let mut link: Option<(ColumnRef, ColumnRef)> = None;
    let mut from_conditions = Vec::new();
    let mut to_conditions = Vec::new();

    for operand in operands {
        if let Some((f, t)) = link_candidate(operand, from, to) {
            if link.is_some() {
                return Err(PlanError::MultipleJoinLinks {
                    from_table: from.name.clone(),
                    to_table: to.name.clone(),
                });
            }
            link = Some((f, t));
            continue;
        }

        let quals = operand.qualifiers();
        let touches_from = quals.contains(&from.alias);
        let touches_to = quals.contains(&to.alias);
        if touches_from && touches_to {
            return Err(PlanError::MixedJoinOperand {
                from_table: from.name.clone(),
                to_table: to.name.clone(),
            });
        }
        if let Some(foreign) = foreign_qualifier(&quals, from, to) {
            return Err(PlanError::Unsupported(format!(
                "join condition references table alias '{}' outside the joined pair",
                foreign
            )));
        }
        if touches_from {
            from_conditions.push(operand.clone());
        } else {
            // To-side conditions, including operands touching neither table
            // (parameter-only filters): they constrain the joined rows.
            to_conditions.push(operand.clone());
        }
    }

    let (from_column, to_column) = link.ok_or_else(|| PlanError::NoJoinLink {
        from_table: from.name.clone(),
        to_table: to.name.clone(),
    })?;

    Ok(ParsedJoinCondition {
        from_column,
        to_column,
        from_conditions,
        to_conditions,
    })
}

/// Top-level AND operands of the ON-expression. A top-level OR makes the
/// join non-linearizable.
fn flatten_and(on: &Expr) -> Result<Vec<&Expr>, PlanError> {
    match on {
        Expr::Or(_) => Err(PlanError::OrInCrossPartitionJoin),
        Expr::And(es) => {
            let mut out = Vec::with_capacity(es.len());
            for e in es {
                match e {
                    Expr::Or(_) => return Err(PlanError::OrInCrossPartitionJoin),
                    Expr::And(_) => out.extend(flatten_and(e)?),
                    other => out.push(other),
                }
            }
            Ok(out)
        }
        other => Ok(vec![other]),
    }
}

/// An equality between a column of `from` and a column of `to`, either side
/// optionally wrapped in exactly one cast.
fn link_candidate(e: &Expr, from: &TableRef, to: &TableRef) -> Option<(ColumnRef, ColumnRef)> {
    let Expr::Cmp { left, op: CmpOp::Eq, right } = e else {
        return None;
    };
    let l = left.as_link_column()?;
    let r = right.as_link_column()?;
    let side = |c: &ColumnRef| -> Option<bool> {
        match c.qualifier.as_deref() {
            Some(q) if q == from.alias => Some(true),
            Some(q) if q == to.alias => Some(false),
            _ => None,
        }
    };
    match (side(l), side(r)) {
        (Some(true), Some(false)) => Some((l.clone(), r.clone())),
        (Some(false), Some(true)) => Some((r.clone(), l.clone())),
        _ => None,
    }
}

fn foreign_qualifier<'a>(
    quals: &'a BTreeSet<String>,
    from: &TableRef,
    to: &TableRef,
) -> Option<&'a str> {
    quals
        .iter()
        .find(|q| **q != from.alias && **q != to.alias)
        .map(|s| s.as_str())
}
