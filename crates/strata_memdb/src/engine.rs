//! The in-memory table engine and its `Connection` implementation.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use strata_common::datum::cmp_datum;
use strata_common::{Datum, OwnedRow, QueryError, ResultSet, StrataError};
use strata_query::{
    CompiledQuery, Connection, Expr, JoinKind, OrderDir, QueryDescription, QueryKind,
};

use crate::eval::{eval_aggregate, eval_expr, truthy, ScopeRow, ScopeSchema};

#[derive(Debug, Clone)]
struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Datum>>,
    /// Column fed from `next_id` when an insert omits it.
    auto_id_column: Option<String>,
    next_id: i64,
}

/// A shared in-memory database. Cloning the handle shares the tables;
/// `connection()` hands out a `Connection` view over the same data.
#[derive(Clone, Default)]
pub struct MemoryDb {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    tables: RwLock<HashMap<String, Table>>,
    last_insert_id: Mutex<i64>,
}

impl MemoryDb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_table(&self, name: &str, columns: &[&str]) {
        self.create_table_inner(name, columns, None);
    }

    /// Table whose `id_column` auto-increments when an insert omits it.
    pub fn create_table_with_auto_id(&self, name: &str, id_column: &str, columns: &[&str]) {
        self.create_table_inner(name, columns, Some(id_column.to_string()));
    }

    fn create_table_inner(&self, name: &str, columns: &[&str], auto_id: Option<String>) {
        let mut all: Vec<String> = Vec::new();
        if let Some(id) = &auto_id {
            all.push(id.clone());
        }
        all.extend(columns.iter().map(|c| c.to_string()));
        self.inner.tables.write().insert(
            name.to_string(),
            Table {
                columns: all,
                rows: Vec::new(),
                auto_id_column: auto_id,
                next_id: 1,
            },
        );
    }

    /// Seed a row directly, bypassing the query path. Missing columns are
    /// null; an omitted auto-id column is assigned.
    pub fn insert_row(&self, table: &str, values: &[(&str, Datum)]) {
        let mut tables = self.inner.tables.write();
        let t = tables.get_mut(table).unwrap_or_else(|| {
            panic!("insert_row into unknown table '{}'", table);
        });
        let mut row = vec![Datum::Null; t.columns.len()];
        for (col, val) in values {
            if let Some(ci) = t.columns.iter().position(|c| c == col) {
                row[ci] = val.clone();
            }
        }
        if let Some(id_col) = t.auto_id_column.clone() {
            let ci = t.columns.iter().position(|c| *c == id_col).unwrap();
            if row[ci].is_null() {
                row[ci] = Datum::Int64(t.next_id);
                t.next_id += 1;
            } else if let Some(given) = row[ci].as_i64() {
                t.next_id = t.next_id.max(given + 1);
            }
        }
        t.rows.push(row);
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.inner
            .tables
            .read()
            .get(table)
            .map(|t| t.rows.len())
            .unwrap_or(0)
    }

    pub fn connection(&self) -> Arc<dyn Connection> {
        Arc::new(self.clone())
    }

    // ── SELECT ──────────────────────────────────────────────────────────

    fn run_select(&self, desc: &QueryDescription) -> Result<ResultSet, StrataError> {
        let tables = self.inner.tables.read();
        let from = desc.from.as_ref().ok_or(QueryError::MissingFrom)?;
        let base = tables
            .get(&from.name)
            .ok_or_else(|| QueryError::UnknownTable(from.name.clone()))?;

        let mut schema = ScopeSchema::single(&from.alias, base.columns.clone());
        let mut rows: Vec<ScopeRow> = base.rows.iter().map(|r| vec![Some(r.clone())]).collect();

        for join in &desc.joins {
            let target = tables
                .get(&join.table.name)
                .ok_or_else(|| QueryError::UnknownTable(join.table.name.clone()))?;
            schema
                .tables
                .push((join.table.alias.clone(), target.columns.clone()));

            let mut joined: Vec<ScopeRow> = Vec::new();
            for scope_row in rows {
                let mut matched = false;
                for candidate in &target.rows {
                    let mut extended = scope_row.clone();
                    extended.push(Some(candidate.clone()));
                    if truthy(&eval_expr(&join.on, &schema, &extended, &desc.params)?) {
                        joined.push(extended);
                        matched = true;
                    }
                }
                if !matched && join.kind == JoinKind::Left {
                    let mut padded = scope_row.clone();
                    padded.push(None);
                    joined.push(padded);
                }
            }
            rows = joined;
        }

        let mut filtered = Vec::with_capacity(rows.len());
        for row in rows {
            let mut keep = true;
            for predicate in &desc.predicates {
                if !truthy(&eval_expr(predicate, &schema, &row, &desc.params)?) {
                    keep = false;
                    break;
                }
            }
            if keep {
                filtered.push(row);
            }
        }

        if desc.has_aggregate() || !desc.group_by.is_empty() {
            return self.project_grouped(desc, &schema, &filtered);
        }

        // ORDER BY over source columns, before projection.
        if !desc.order_by.is_empty() {
            let mut keyed: Vec<(Vec<Datum>, ScopeRow)> = Vec::with_capacity(filtered.len());
            for row in filtered {
                let mut key = Vec::with_capacity(desc.order_by.len());
                for (col, _) in &desc.order_by {
                    key.push(schema.lookup(col, &row)?);
                }
                keyed.push((key, row));
            }
            keyed.sort_by(|(ka, _), (kb, _)| {
                for (i, (_, dir)) in desc.order_by.iter().enumerate() {
                    let ord = cmp_datum(&ka[i], &kb[i]);
                    let ord = match dir {
                        OrderDir::Asc => ord,
                        OrderDir::Desc => ord.reverse(),
                    };
                    if ord != std::cmp::Ordering::Equal {
                        return ord;
                    }
                }
                std::cmp::Ordering::Equal
            });
            filtered = keyed.into_iter().map(|(_, r)| r).collect();
        }

        if let Some(off) = desc.offset {
            filtered = if off < filtered.len() {
                filtered.split_off(off)
            } else {
                Vec::new()
            };
        }
        if let Some(lim) = desc.limit {
            filtered.truncate(lim);
        }

        let mut out = ResultSet::new(desc.selects.iter().map(|s| s.output_name()).collect());
        for row in &filtered {
            let mut values = Vec::with_capacity(desc.selects.len());
            for item in &desc.selects {
                values.push(eval_expr(&item.expr, &schema, row, &desc.params)?);
            }
            out.rows.push(OwnedRow::new(values));
        }
        Ok(out)
    }

    fn project_grouped(
        &self,
        desc: &QueryDescription,
        schema: &ScopeSchema,
        rows: &[ScopeRow],
    ) -> Result<ResultSet, StrataError> {
        // Group key: the GROUP BY columns' tagged encodings; one global
        // group when there is no GROUP BY.
        let mut groups: Vec<(Vec<u8>, Vec<&ScopeRow>)> = Vec::new();
        let mut index: HashMap<Vec<u8>, usize> = HashMap::new();
        for row in rows {
            let mut key = Vec::new();
            for col in &desc.group_by {
                schema.lookup(col, row)?.encode_key(&mut key);
            }
            match index.get(&key) {
                Some(&i) => groups[i].1.push(row),
                None => {
                    index.insert(key.clone(), groups.len());
                    groups.push((key, vec![row]));
                }
            }
        }
        if groups.is_empty() && desc.group_by.is_empty() {
            groups.push((Vec::new(), Vec::new()));
        }

        let mut out = ResultSet::new(desc.selects.iter().map(|s| s.output_name()).collect());
        for (_, members) in &groups {
            let mut values = Vec::with_capacity(desc.selects.len());
            for item in &desc.selects {
                let v = match &item.expr {
                    Expr::Aggregate { func, arg } => {
                        eval_aggregate(*func, arg.as_ref(), schema, members, &desc.params)?
                    }
                    other => match members.first() {
                        Some(row) => eval_expr(other, schema, row, &desc.params)?,
                        None => Datum::Null,
                    },
                };
                values.push(v);
            }
            out.rows.push(OwnedRow::new(values));
        }
        Ok(out)
    }

    // ── DML ─────────────────────────────────────────────────────────────

    fn run_insert(&self, desc: &QueryDescription) -> Result<u64, StrataError> {
        let from = desc.from.as_ref().ok_or(QueryError::MissingFrom)?;
        let mut tables = self.inner.tables.write();
        let table = tables
            .get_mut(&from.name)
            .ok_or_else(|| QueryError::UnknownTable(from.name.clone()))?;

        let schema = ScopeSchema::single(&from.alias, table.columns.clone());
        let empty: ScopeRow = vec![None];

        let mut row = vec![Datum::Null; table.columns.len()];
        for (col, value) in &desc.values {
            let ci = table
                .columns
                .iter()
                .position(|c| c == col)
                .ok_or_else(|| QueryError::UnknownColumn(col.clone()))?;
            row[ci] = eval_expr(value, &schema, &empty, &desc.params)?;
        }
        if let Some(id_col) = table.auto_id_column.clone() {
            let ci = table
                .columns
                .iter()
                .position(|c| *c == id_col)
                .expect("auto-id column is created with the table");
            if row[ci].is_null() {
                row[ci] = Datum::Int64(table.next_id);
                table.next_id += 1;
            } else if let Some(given) = row[ci].as_i64() {
                table.next_id = table.next_id.max(given + 1);
            }
            if let Some(id) = row[ci].as_i64() {
                *self.inner.last_insert_id.lock() = id;
            }
        }
        table.rows.push(row);
        Ok(1)
    }

    fn run_update(&self, desc: &QueryDescription) -> Result<u64, StrataError> {
        let from = desc.from.as_ref().ok_or(QueryError::MissingFrom)?;
        let mut tables = self.inner.tables.write();
        let table = tables
            .get_mut(&from.name)
            .ok_or_else(|| QueryError::UnknownTable(from.name.clone()))?;
        let schema = ScopeSchema::single(&from.alias, table.columns.clone());

        let mut affected = 0u64;
        let columns = table.columns.clone();
        for row in &mut table.rows {
            let scope: ScopeRow = vec![Some(row.clone())];
            let mut matches = true;
            for predicate in &desc.predicates {
                if !truthy(&eval_expr(predicate, &schema, &scope, &desc.params)?) {
                    matches = false;
                    break;
                }
            }
            if !matches {
                continue;
            }
            for (col, value) in &desc.values {
                let ci = columns
                    .iter()
                    .position(|c| c == col)
                    .ok_or_else(|| QueryError::UnknownColumn(col.clone()))?;
                row[ci] = eval_expr(value, &schema, &scope, &desc.params)?;
            }
            affected += 1;
        }
        Ok(affected)
    }

    fn run_delete(&self, desc: &QueryDescription) -> Result<u64, StrataError> {
        let from = desc.from.as_ref().ok_or(QueryError::MissingFrom)?;
        let mut tables = self.inner.tables.write();
        let table = tables
            .get_mut(&from.name)
            .ok_or_else(|| QueryError::UnknownTable(from.name.clone()))?;
        let schema = ScopeSchema::single(&from.alias, table.columns.clone());

        let mut kept = Vec::with_capacity(table.rows.len());
        let mut affected = 0u64;
        for row in table.rows.drain(..) {
            let scope: ScopeRow = vec![Some(row.clone())];
            let mut matches = true;
            for predicate in &desc.predicates {
                if !truthy(&eval_expr(predicate, &schema, &scope, &desc.params)?) {
                    matches = false;
                    break;
                }
            }
            if matches {
                affected += 1;
            } else {
                kept.push(row);
            }
        }
        table.rows = kept;
        Ok(affected)
    }
}

impl Connection for MemoryDb {
    fn execute_rows(&self, query: &CompiledQuery) -> Result<ResultSet, StrataError> {
        match query.desc.kind {
            QueryKind::Select => self.run_select(&query.desc),
            _ => Err(QueryError::Invalid("execute_rows on a statement".into()).into()),
        }
    }

    fn execute_statement(&self, query: &CompiledQuery) -> Result<u64, StrataError> {
        match query.desc.kind {
            QueryKind::Insert => self.run_insert(&query.desc),
            QueryKind::Update => self.run_update(&query.desc),
            QueryKind::Delete => self.run_delete(&query.desc),
            QueryKind::Select => {
                Err(QueryError::Invalid("execute_statement on a select".into()).into())
            }
        }
    }

    fn last_insert_id(&self) -> Result<i64, StrataError> {
        Ok(*self.inner.last_insert_id.lock())
    }
}
