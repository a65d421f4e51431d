use serde::{Deserialize, Serialize};

use crate::datum::Datum;

/// Index of one physical shard database (0-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ShardId(pub u32);

impl std::fmt::Display for ShardId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "shard_{}", self.0)
    }
}

/// Identity of a table partition. Tables not listed in any partition
/// specification belong to the implicit default partition (the caller's
/// primary connection).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PartitionId {
    Default,
    /// Index into the active list of partition specifications.
    Named(usize),
}

impl PartitionId {
    pub fn is_default(&self) -> bool {
        matches!(self, PartitionId::Default)
    }
}

/// One materialized result row.
#[derive(Debug, Clone, PartialEq)]
pub struct OwnedRow {
    pub values: Vec<Datum>,
}

impl OwnedRow {
    pub fn new(values: Vec<Datum>) -> Self {
        Self { values }
    }
}

/// Rows plus their column names, as a single-connection query returns them
/// and as the merge step produces them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<OwnedRow>,
}

impl ResultSet {
    pub fn new(columns: Vec<String>) -> Self {
        Self { columns, rows: Vec::new() }
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Value of `column` in row `row_idx`, or `Datum::Null` when the column
    /// or row does not exist.
    pub fn value(&self, row_idx: usize, column: &str) -> Datum {
        match self.column_index(column) {
            Some(ci) => self
                .rows
                .get(row_idx)
                .and_then(|r| r.values.get(ci))
                .cloned()
                .unwrap_or(Datum::Null),
            None => Datum::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_set_lookup() {
        let mut rs = ResultSet::new(vec!["fileid".into(), "path".into()]);
        rs.rows.push(OwnedRow::new(vec![Datum::Int64(5), Datum::Text("file1".into())]));
        assert_eq!(rs.column_index("path"), Some(1));
        assert_eq!(rs.value(0, "path"), Datum::Text("file1".into()));
        assert_eq!(rs.value(0, "missing"), Datum::Null);
    }
}
