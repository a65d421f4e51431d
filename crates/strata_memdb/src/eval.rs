//! Expression evaluation over in-memory scope rows.

use std::collections::BTreeMap;

use strata_common::datum::cmp_datum;
use strata_common::{Datum, QueryError, StrataError};
use strata_query::{AggFunc, CastType, CmpOp, ColumnRef, Expr};

/// The tables visible to one evaluation: alias plus column names, in join
/// order. A `None` values slot is the null-padded side of a LEFT join.
#[derive(Debug, Clone)]
pub(crate) struct ScopeSchema {
    pub tables: Vec<(String, Vec<String>)>,
}

pub(crate) type ScopeRow = Vec<Option<Vec<Datum>>>;

impl ScopeSchema {
    pub fn single(alias: &str, columns: Vec<String>) -> Self {
        Self {
            tables: vec![(alias.to_string(), columns)],
        }
    }

    pub fn lookup(&self, column: &ColumnRef, row: &ScopeRow) -> Result<Datum, StrataError> {
        match &column.qualifier {
            Some(q) => {
                let idx = self
                    .tables
                    .iter()
                    .position(|(alias, _)| alias == q)
                    .ok_or_else(|| QueryError::UnknownColumn(column.qualified()))?;
                self.column_value(idx, &column.name, row)
                    .ok_or_else(|| QueryError::UnknownColumn(column.qualified()).into())
            }
            None => {
                for idx in 0..self.tables.len() {
                    if let Some(v) = self.column_value(idx, &column.name, row) {
                        return Ok(v);
                    }
                }
                Err(QueryError::UnknownColumn(column.name.clone()).into())
            }
        }
    }

    fn column_value(&self, table_idx: usize, name: &str, row: &ScopeRow) -> Option<Datum> {
        let (_, columns) = &self.tables[table_idx];
        let ci = columns.iter().position(|c| c == name)?;
        Some(match &row[table_idx] {
            Some(values) => values.get(ci).cloned().unwrap_or(Datum::Null),
            // Null-padded LEFT join side.
            None => Datum::Null,
        })
    }
}

pub(crate) fn eval_expr(
    expr: &Expr,
    schema: &ScopeSchema,
    row: &ScopeRow,
    params: &BTreeMap<String, Datum>,
) -> Result<Datum, StrataError> {
    match expr {
        Expr::Column(c) => schema.lookup(c, row),
        Expr::Literal(d) => Ok(d.clone()),
        Expr::Param(name) => params
            .get(name)
            .cloned()
            .ok_or_else(|| QueryError::MissingParameter(name.clone()).into()),
        Expr::Cmp { left, op, right } => {
            let l = eval_expr(left, schema, row, params)?;
            let r = eval_expr(right, schema, row, params)?;
            Ok(Datum::Boolean(eval_cmp(&l, *op, &r)))
        }
        Expr::InList { expr, list, negated } => {
            let v = eval_expr(expr, schema, row, params)?;
            if v.is_null() {
                return Ok(Datum::Boolean(false));
            }
            let mut found = false;
            for item in list {
                let candidate = eval_expr(item, schema, row, params)?;
                if !candidate.is_null() && eval_cmp(&v, CmpOp::Eq, &candidate) {
                    found = true;
                    break;
                }
            }
            Ok(Datum::Boolean(found != *negated))
        }
        Expr::And(es) => {
            for e in es {
                if !truthy(&eval_expr(e, schema, row, params)?) {
                    return Ok(Datum::Boolean(false));
                }
            }
            Ok(Datum::Boolean(true))
        }
        Expr::Or(es) => {
            for e in es {
                if truthy(&eval_expr(e, schema, row, params)?) {
                    return Ok(Datum::Boolean(true));
                }
            }
            Ok(Datum::Boolean(false))
        }
        Expr::Not(e) => Ok(Datum::Boolean(!truthy(&eval_expr(e, schema, row, params)?))),
        Expr::IsNull(e) => Ok(Datum::Boolean(eval_expr(e, schema, row, params)?.is_null())),
        Expr::IsNotNull(e) => Ok(Datum::Boolean(!eval_expr(e, schema, row, params)?.is_null())),
        Expr::Cast { expr, target } => {
            let v = eval_expr(expr, schema, row, params)?;
            eval_cast(&v, *target)
        }
        Expr::Aggregate { .. } => Err(QueryError::Invalid(
            "aggregate outside a grouped select".into(),
        )
        .into()),
    }
}

pub(crate) fn truthy(d: &Datum) -> bool {
    matches!(d, Datum::Boolean(true))
}

fn eval_cmp(l: &Datum, op: CmpOp, r: &Datum) -> bool {
    // SQL comparison semantics: NULL never compares equal to anything.
    if l.is_null() || r.is_null() {
        return false;
    }
    match op {
        CmpOp::Eq => cmp_datum(l, r) == std::cmp::Ordering::Equal,
        CmpOp::Ne => cmp_datum(l, r) != std::cmp::Ordering::Equal,
        CmpOp::Lt => cmp_datum(l, r) == std::cmp::Ordering::Less,
        CmpOp::Le => cmp_datum(l, r) != std::cmp::Ordering::Greater,
        CmpOp::Gt => cmp_datum(l, r) == std::cmp::Ordering::Greater,
        CmpOp::Ge => cmp_datum(l, r) != std::cmp::Ordering::Less,
        CmpOp::Like => match (l, r) {
            (Datum::Text(s), Datum::Text(pattern)) => like_match(s, pattern),
            _ => false,
        },
    }
}

/// Minimal LIKE: `%` matches any run of characters, `_` one character.
fn like_match(s: &str, pattern: &str) -> bool {
    fn rec(s: &[char], p: &[char]) -> bool {
        match (s, p) {
            (_, []) => s.is_empty(),
            (_, ['%', rest @ ..]) => {
                (0..=s.len()).any(|i| rec(&s[i..], rest))
            }
            ([], _) => false,
            ([sc, srest @ ..], [pc, prest @ ..]) => {
                (*pc == '_' || pc == sc) && rec(srest, prest)
            }
        }
    }
    let s: Vec<char> = s.chars().collect();
    let p: Vec<char> = pattern.chars().collect();
    rec(&s, &p)
}

fn eval_cast(v: &Datum, target: CastType) -> Result<Datum, StrataError> {
    if v.is_null() {
        return Ok(Datum::Null);
    }
    let out = match target {
        CastType::Integer => match v {
            Datum::Int64(i) => Datum::Int64(*i),
            Datum::Float64(f) => Datum::Int64(*f as i64),
            Datum::Text(s) => Datum::Int64(s.trim().parse::<i64>().map_err(|_| {
                QueryError::TypeMismatch(format!("cannot cast '{}' to integer", s))
            })?),
            Datum::Boolean(b) => Datum::Int64(i64::from(*b)),
            other => {
                return Err(
                    QueryError::TypeMismatch(format!("cannot cast {} to integer", other)).into(),
                )
            }
        },
        CastType::Float => match v.as_f64() {
            Some(f) => Datum::Float64(f),
            None => match v {
                Datum::Text(s) => Datum::Float64(s.trim().parse::<f64>().map_err(|_| {
                    QueryError::TypeMismatch(format!("cannot cast '{}' to float", s))
                })?),
                other => {
                    return Err(QueryError::TypeMismatch(format!(
                        "cannot cast {} to float",
                        other
                    ))
                    .into())
                }
            },
        },
        CastType::Text => match v {
            Datum::Text(s) => Datum::Text(s.clone()),
            Datum::Int64(i) => Datum::Text(i.to_string()),
            Datum::Float64(f) => Datum::Text(f.to_string()),
            Datum::Boolean(b) => Datum::Text(b.to_string()),
            other => {
                return Err(
                    QueryError::TypeMismatch(format!("cannot cast {} to text", other)).into(),
                )
            }
        },
    };
    Ok(out)
}

/// Fold an aggregate over a group of scope rows.
pub(crate) fn eval_aggregate(
    func: AggFunc,
    arg: Option<&ColumnRef>,
    schema: &ScopeSchema,
    rows: &[&ScopeRow],
    _params: &BTreeMap<String, Datum>,
) -> Result<Datum, StrataError> {
    let mut values = Vec::with_capacity(rows.len());
    for row in rows {
        match arg {
            Some(c) => {
                let v = schema.lookup(c, row)?;
                if !v.is_null() {
                    values.push(v);
                }
            }
            None => values.push(Datum::Int64(1)),
        }
    }
    let out = match func {
        AggFunc::Count => Datum::Int64(values.len() as i64),
        AggFunc::Sum | AggFunc::Avg => {
            if values.is_empty() {
                Datum::Null
            } else if values.iter().all(|v| matches!(v, Datum::Int64(_))) {
                let total: i64 = values.iter().filter_map(Datum::as_i64).sum();
                if func == AggFunc::Avg {
                    Datum::Float64(total as f64 / values.len() as f64)
                } else {
                    Datum::Int64(total)
                }
            } else {
                let total: f64 = values.iter().filter_map(Datum::as_f64).sum();
                if func == AggFunc::Avg {
                    Datum::Float64(total / values.len() as f64)
                } else {
                    Datum::Float64(total)
                }
            }
        }
        AggFunc::Min => values
            .into_iter()
            .min_by(|a, b| cmp_datum(a, b))
            .unwrap_or(Datum::Null),
        AggFunc::Max => values
            .into_iter()
            .max_by(|a, b| cmp_datum(a, b))
            .unwrap_or(Datum::Null),
    };
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_wildcards() {
        assert!(like_match("files/photo.jpg", "files/%"));
        assert!(like_match("abc", "a_c"));
        assert!(!like_match("abc", "a_d"));
        assert!(like_match("abc", "%"));
        assert!(!like_match("abc", "ab"));
    }

    #[test]
    fn null_never_equals() {
        assert!(!eval_cmp(&Datum::Null, CmpOp::Eq, &Datum::Null));
        assert!(!eval_cmp(&Datum::Int64(1), CmpOp::Eq, &Datum::Null));
    }

    #[test]
    fn cast_text_to_integer() {
        let out = eval_cast(&Datum::Text("42".into()), CastType::Integer).unwrap();
        assert_eq!(out, Datum::Int64(42));
        assert!(eval_cast(&Datum::Text("nope".into()), CastType::Integer).is_err());
    }
}
