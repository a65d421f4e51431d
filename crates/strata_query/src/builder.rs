//! The plain single-connection query builder: fluent calls record into a
//! `QueryDescription` value; `compile()` freezes it into a `CompiledQuery`
//! a `Connection` can run. The partitioned orchestrator exposes this exact
//! surface, so callers cannot tell whether a query will be partitioned.

use std::collections::BTreeMap;

use strata_common::Datum;

use crate::expr::{ColumnRef, Expr};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    Select,
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderDir {
    Asc,
    Desc,
}

/// How a query against a sharded table is scoped. `Unscoped` is rejected at
/// plan time; it never silently defaults to one shard.
#[derive(Debug, Clone, PartialEq)]
pub enum ShardScope {
    Unscoped,
    KeyHint(Datum),
    AllShards,
}

/// A table in the query, with the alias it is referenced by. The alias
/// defaults to the table name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub name: String,
    pub alias: String,
}

impl TableRef {
    pub fn new(name: &str, alias: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            alias: alias.unwrap_or(name).to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinClause {
    pub kind: JoinKind,
    /// Alias of the already-joined side this clause attaches to.
    pub from_alias: String,
    pub table: TableRef,
    pub on: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectItem {
    pub expr: Expr,
    pub alias: Option<String>,
}

impl SelectItem {
    /// The column name this item produces in the result set.
    pub fn output_name(&self) -> String {
        if let Some(a) = &self.alias {
            return a.clone();
        }
        match &self.expr {
            Expr::Column(c) => c.name.clone(),
            Expr::Aggregate { func, .. } => format!("{:?}", func).to_lowercase(),
            other => format!("{:?}", other),
        }
    }
}

/// The recorded description of one in-progress query. Mutated only through
/// builder APIs; inspected by the planner; compiled per connection.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryDescription {
    pub kind: QueryKind,
    pub from: Option<TableRef>,
    pub selects: Vec<SelectItem>,
    pub joins: Vec<JoinClause>,
    /// Conjunctive WHERE predicates.
    pub predicates: Vec<Expr>,
    pub group_by: Vec<ColumnRef>,
    pub order_by: Vec<(ColumnRef, OrderDir)>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    /// Column assignments for INSERT / UPDATE, in call order.
    pub values: Vec<(String, Expr)>,
    /// Named parameter bindings.
    pub params: BTreeMap<String, Datum>,
    pub shard_scope: ShardScope,
}

impl QueryDescription {
    pub fn new(kind: QueryKind) -> Self {
        Self {
            kind,
            from: None,
            selects: Vec::new(),
            joins: Vec::new(),
            predicates: Vec::new(),
            group_by: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
            values: Vec::new(),
            params: BTreeMap::new(),
            shard_scope: ShardScope::Unscoped,
        }
    }

    /// All tables referenced, FROM first.
    pub fn tables(&self) -> Vec<&TableRef> {
        let mut out = Vec::with_capacity(1 + self.joins.len());
        if let Some(f) = &self.from {
            out.push(f);
        }
        for j in &self.joins {
            out.push(&j.table);
        }
        out
    }

    pub fn table_for_alias(&self, alias: &str) -> Option<&TableRef> {
        self.tables().into_iter().find(|t| t.alias == alias)
    }

    pub fn has_aggregate(&self) -> bool {
        self.selects.iter().any(|s| s.expr.contains_aggregate())
    }
}

/// A query description frozen for execution against one connection.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub desc: QueryDescription,
}

/// The plain fluent builder. One instance per logical query.
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    desc: QueryDescription,
}

impl QueryBuilder {
    pub fn new() -> Self {
        Self {
            desc: QueryDescription::new(QueryKind::Select),
        }
    }

    pub fn select(&mut self, columns: &[&str]) -> &mut Self {
        for c in columns {
            self.desc.selects.push(SelectItem {
                expr: Expr::Column(ColumnRef::parse(c)),
                alias: None,
            });
        }
        self
    }

    pub fn select_alias(&mut self, column: &str, alias: &str) -> &mut Self {
        self.desc.selects.push(SelectItem {
            expr: Expr::Column(ColumnRef::parse(column)),
            alias: Some(alias.to_string()),
        });
        self
    }

    pub fn select_expr(&mut self, expr: Expr, alias: &str) -> &mut Self {
        self.desc.selects.push(SelectItem {
            expr,
            alias: Some(alias.to_string()),
        });
        self
    }

    pub fn from(&mut self, table: &str, alias: Option<&str>) -> &mut Self {
        self.desc.from = Some(TableRef::new(table, alias));
        self
    }

    pub fn inner_join(&mut self, from_alias: &str, table: &str, alias: &str, on: Expr) -> &mut Self {
        self.join(JoinKind::Inner, from_alias, table, alias, on)
    }

    pub fn left_join(&mut self, from_alias: &str, table: &str, alias: &str, on: Expr) -> &mut Self {
        self.join(JoinKind::Left, from_alias, table, alias, on)
    }

    fn join(
        &mut self,
        kind: JoinKind,
        from_alias: &str,
        table: &str,
        alias: &str,
        on: Expr,
    ) -> &mut Self {
        self.desc.joins.push(JoinClause {
            kind,
            from_alias: from_alias.to_string(),
            table: TableRef::new(table, Some(alias)),
            on,
        });
        self
    }

    pub fn where_expr(&mut self, predicate: Expr) -> &mut Self {
        self.desc.predicates.clear();
        self.desc.predicates.push(predicate);
        self
    }

    pub fn and_where(&mut self, predicate: Expr) -> &mut Self {
        self.desc.predicates.push(predicate);
        self
    }

    pub fn group_by(&mut self, column: &str) -> &mut Self {
        self.desc.group_by.push(ColumnRef::parse(column));
        self
    }

    pub fn order_by(&mut self, column: &str, dir: OrderDir) -> &mut Self {
        self.desc.order_by.push((ColumnRef::parse(column), dir));
        self
    }

    pub fn set_max_results(&mut self, limit: usize) -> &mut Self {
        self.desc.limit = Some(limit);
        self
    }

    pub fn set_first_result(&mut self, offset: usize) -> &mut Self {
        self.desc.offset = Some(offset);
        self
    }

    pub fn insert(&mut self, table: &str) -> &mut Self {
        self.desc.kind = QueryKind::Insert;
        self.desc.from = Some(TableRef::new(table, None));
        self
    }

    pub fn update(&mut self, table: &str) -> &mut Self {
        self.desc.kind = QueryKind::Update;
        self.desc.from = Some(TableRef::new(table, None));
        self
    }

    pub fn delete(&mut self, table: &str) -> &mut Self {
        self.desc.kind = QueryKind::Delete;
        self.desc.from = Some(TableRef::new(table, None));
        self
    }

    pub fn set_value(&mut self, column: &str, value: Expr) -> &mut Self {
        self.desc.values.push((column.to_string(), value));
        self
    }

    pub fn set_parameter(&mut self, name: &str, value: impl Into<Datum>) -> &mut Self {
        self.desc.params.insert(name.to_string(), value.into());
        self
    }

    pub fn description(&self) -> &QueryDescription {
        &self.desc
    }

    pub fn description_mut(&mut self) -> &mut QueryDescription {
        &mut self.desc
    }

    pub fn into_description(self) -> QueryDescription {
        self.desc
    }

    pub fn compile(&self) -> CompiledQuery {
        CompiledQuery {
            desc: self.desc.clone(),
        }
    }
}

impl Default for QueryBuilder {
    fn default() -> Self {
        Self::new()
    }
}
