//! Expression value objects: a comparison/boolean tree over column
//! references, literals, and named parameters. Pure data — evaluation and
//! SQL rendering happen behind the `Connection` trait.

use std::collections::BTreeSet;
use std::fmt;

use strata_common::Datum;

/// A possibly table-qualified column reference (`alias.column` or `column`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ColumnRef {
    pub qualifier: Option<String>,
    pub name: String,
}

impl ColumnRef {
    /// Parse `"m.root_id"` into qualifier `m`, name `root_id`; a bare
    /// `"root_id"` has no qualifier.
    pub fn parse(s: &str) -> Self {
        match s.split_once('.') {
            Some((q, n)) => Self {
                qualifier: Some(q.to_string()),
                name: n.to_string(),
            },
            None => Self {
                qualifier: None,
                name: s.to_string(),
            },
        }
    }

    pub fn qualified(&self) -> String {
        match &self.qualifier {
            Some(q) => format!("{}.{}", q, self.name),
            None => self.name.clone(),
        }
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.qualified())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Like,
}

/// Target of a single-argument cast wrapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastType {
    Integer,
    Float,
    Text,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggFunc {
    Count,
    Sum,
    Min,
    Max,
    Avg,
}

/// A SQL comparison/boolean tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Column(ColumnRef),
    Literal(Datum),
    /// Named parameter, bound at execution time (`:name`).
    Param(String),
    Cmp {
        left: Box<Expr>,
        op: CmpOp,
        right: Box<Expr>,
    },
    InList {
        expr: Box<Expr>,
        list: Vec<Expr>,
        negated: bool,
    },
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
    IsNull(Box<Expr>),
    IsNotNull(Box<Expr>),
    Cast {
        expr: Box<Expr>,
        target: CastType,
    },
    /// Aggregate call; valid in select lists only.
    Aggregate {
        func: AggFunc,
        arg: Option<ColumnRef>,
    },
}

impl Expr {
    /// Collect the table qualifiers of every column this expression
    /// references. Unqualified columns contribute nothing.
    pub fn collect_qualifiers(&self, out: &mut BTreeSet<String>) {
        match self {
            Expr::Column(c) => {
                if let Some(q) = &c.qualifier {
                    out.insert(q.clone());
                }
            }
            Expr::Literal(_) | Expr::Param(_) => {}
            Expr::Cmp { left, right, .. } => {
                left.collect_qualifiers(out);
                right.collect_qualifiers(out);
            }
            Expr::InList { expr, list, .. } => {
                expr.collect_qualifiers(out);
                for e in list {
                    e.collect_qualifiers(out);
                }
            }
            Expr::And(es) | Expr::Or(es) => {
                for e in es {
                    e.collect_qualifiers(out);
                }
            }
            Expr::Not(e) | Expr::IsNull(e) | Expr::IsNotNull(e) => e.collect_qualifiers(out),
            Expr::Cast { expr, .. } => expr.collect_qualifiers(out),
            Expr::Aggregate { arg, .. } => {
                if let Some(c) = arg {
                    if let Some(q) = &c.qualifier {
                        out.insert(q.clone());
                    }
                }
            }
        }
    }

    pub fn qualifiers(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_qualifiers(&mut out);
        out
    }

    pub fn contains_aggregate(&self) -> bool {
        match self {
            Expr::Aggregate { .. } => true,
            Expr::Column(_) | Expr::Literal(_) | Expr::Param(_) => false,
            Expr::Cmp { left, right, .. } => {
                left.contains_aggregate() || right.contains_aggregate()
            }
            Expr::InList { expr, list, .. } => {
                expr.contains_aggregate() || list.iter().any(Expr::contains_aggregate)
            }
            Expr::And(es) | Expr::Or(es) => es.iter().any(Expr::contains_aggregate),
            Expr::Not(e) | Expr::IsNull(e) | Expr::IsNotNull(e) => e.contains_aggregate(),
            Expr::Cast { expr, .. } => expr.contains_aggregate(),
        }
    }

    /// The column behind at most one cast wrapper, if this expression is a
    /// plain or cast-wrapped column reference.
    pub fn as_link_column(&self) -> Option<&ColumnRef> {
        match self {
            Expr::Column(c) => Some(c),
            Expr::Cast { expr, .. } => match expr.as_ref() {
                Expr::Column(c) => Some(c),
                _ => None,
            },
            _ => None,
        }
    }
}

// ── Expression factory ──────────────────────────────────────────────────
// Free functions mirroring a query builder's expression factory, so call
// sites read `expr::eq(expr::col("m.root_id"), expr::col("f.fileid"))`.

pub fn col(s: &str) -> Expr {
    Expr::Column(ColumnRef::parse(s))
}

pub fn lit(d: impl Into<Datum>) -> Expr {
    Expr::Literal(d.into())
}

pub fn param(name: &str) -> Expr {
    Expr::Param(name.to_string())
}

pub fn eq(left: Expr, right: Expr) -> Expr {
    cmp(left, CmpOp::Eq, right)
}

pub fn neq(left: Expr, right: Expr) -> Expr {
    cmp(left, CmpOp::Ne, right)
}

pub fn lt(left: Expr, right: Expr) -> Expr {
    cmp(left, CmpOp::Lt, right)
}

pub fn lte(left: Expr, right: Expr) -> Expr {
    cmp(left, CmpOp::Le, right)
}

pub fn gt(left: Expr, right: Expr) -> Expr {
    cmp(left, CmpOp::Gt, right)
}

pub fn gte(left: Expr, right: Expr) -> Expr {
    cmp(left, CmpOp::Ge, right)
}

pub fn like(left: Expr, right: Expr) -> Expr {
    cmp(left, CmpOp::Like, right)
}

pub fn cmp(left: Expr, op: CmpOp, right: Expr) -> Expr {
    Expr::Cmp {
        left: Box::new(left),
        op,
        right: Box::new(right),
    }
}

pub fn and(operands: Vec<Expr>) -> Expr {
    Expr::And(operands)
}

pub fn or(operands: Vec<Expr>) -> Expr {
    Expr::Or(operands)
}

pub fn not(e: Expr) -> Expr {
    Expr::Not(Box::new(e))
}

pub fn is_null(e: Expr) -> Expr {
    Expr::IsNull(Box::new(e))
}

pub fn is_not_null(e: Expr) -> Expr {
    Expr::IsNotNull(Box::new(e))
}

pub fn in_list(e: Expr, list: Vec<Expr>) -> Expr {
    Expr::InList {
        expr: Box::new(e),
        list,
        negated: false,
    }
}

pub fn cast(e: Expr, target: CastType) -> Expr {
    Expr::Cast {
        expr: Box::new(e),
        target,
    }
}

pub fn count(arg: Option<&str>) -> Expr {
    Expr::Aggregate {
        func: AggFunc::Count,
        arg: arg.map(ColumnRef::parse),
    }
}

pub fn sum(arg: &str) -> Expr {
    Expr::Aggregate {
        func: AggFunc::Sum,
        arg: Some(ColumnRef::parse(arg)),
    }
}
