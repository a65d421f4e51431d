//! In-process row merging: the hash join between linked sub-query results,
//! the broadcast union, and the post-merge sort/window/projection.

use std::collections::HashMap;

use strata_common::datum::cmp_datum;
use strata_common::{Datum, OwnedRow, ResultSet, StrataError};
use strata_planner::{ProjectedColumn, StepLink};
use strata_query::{ColumnRef, JoinKind, OrderDir};

/// Index of `column` in a merged result. Sub-query select items are aliased
/// to their qualified names, so an exact match is tried first, then the bare
/// column name as a suffix.
pub(crate) fn resolve_column(rs: &ResultSet, column: &ColumnRef) -> Option<usize> {
    if let Some(i) = rs.column_index(&column.qualified()) {
        return Some(i);
    }
    if let Some(i) = rs.column_index(&column.name) {
        return Some(i);
    }
    let suffix = format!(".{}", column.name);
    rs.columns.iter().position(|c| c.ends_with(&suffix))
}

fn require_column(rs: &ResultSet, name: &str) -> Result<usize, StrataError> {
    rs.column_index(name)
        .ok_or_else(|| StrataError::Internal(format!("merge column '{}' missing from sub-query result", name)))
}

/// Distinct non-null values of one column, in first-seen order. These become
/// the `IN` restriction of the dependent sub-query.
pub(crate) fn distinct_values(rs: &ResultSet, column: &str) -> Result<Vec<Datum>, StrataError> {
    let ci = require_column(rs, column)?;
    let mut seen: HashMap<Vec<u8>, ()> = HashMap::new();
    let mut out = Vec::new();
    for row in &rs.rows {
        let v = &row.values[ci];
        if v.is_null() {
            continue;
        }
        if seen.insert(v.key_bytes(), ()).is_none() {
            out.push(v.clone());
        }
    }
    Ok(out)
}

/// Hash join `left` against `right` on the step link. INNER drops left rows
/// without a match; LEFT keeps them with the right columns null. A row with
/// a null link key never matches.
pub(crate) fn merge_linked(
    left: ResultSet,
    right: &ResultSet,
    link: &StepLink,
) -> Result<ResultSet, StrataError> {
    let left_key = require_column(&left, &link.source_column)?;
    let right_key = resolve_column(right, &link.own_column).ok_or_else(|| {
        StrataError::Internal(format!(
            "merge column '{}' missing from sub-query result",
            link.own_column.qualified()
        ))
    })?;

    let mut by_key: HashMap<Vec<u8>, Vec<usize>> = HashMap::new();
    for (i, row) in right.rows.iter().enumerate() {
        let v = &row.values[right_key];
        if v.is_null() {
            continue;
        }
        by_key.entry(v.key_bytes()).or_default().push(i);
    }

    let mut columns = left.columns.clone();
    columns.extend(right.columns.iter().cloned());
    let mut out = ResultSet::new(columns);

    let right_width = right.columns.len();
    for row in left.rows {
        let key = &row.values[left_key];
        let matches = if key.is_null() {
            None
        } else {
            by_key.get(&key.key_bytes())
        };
        match matches {
            Some(indices) => {
                for &ri in indices {
                    let mut values = row.values.clone();
                    values.extend(right.rows[ri].values.iter().cloned());
                    out.rows.push(OwnedRow::new(values));
                }
            }
            None => {
                if link.join_kind == JoinKind::Left {
                    let mut values = row.values;
                    values.extend(std::iter::repeat(Datum::Null).take(right_width));
                    out.rows.push(OwnedRow::new(values));
                }
            }
        }
    }
    Ok(out)
}

/// Union broadcast results, deduplicating by `key_column` when the sharded
/// table has a configured primary key, else by the whole row. Whole-row
/// identity only collapses rows repeated across shards; one shard's own
/// duplicates are legitimate result rows and survive.
pub(crate) fn union_dedup(parts: Vec<ResultSet>, key_column: Option<&str>) -> ResultSet {
    let mut parts = parts.into_iter();
    let first = match parts.next() {
        Some(rs) => rs,
        None => return ResultSet::default(),
    };
    // Fall back to whole-row identity when the key column was not selected.
    let key_idx = key_column.and_then(|name| resolve_column(&first, &ColumnRef::parse(name)));

    let mut out = ResultSet::new(first.columns.clone());
    // Key -> the part that first produced it.
    let mut seen: HashMap<Vec<u8>, usize> = HashMap::new();
    for (part, rs) in std::iter::once(first).chain(parts).enumerate() {
        for row in rs.rows {
            let key = match key_idx {
                Some(ci) => {
                    let v = &row.values[ci];
                    if v.is_null() {
                        // No identity to dedup on; keep the row.
                        out.rows.push(row);
                        continue;
                    }
                    v.key_bytes()
                }
                None => {
                    let mut buf = Vec::new();
                    for v in &row.values {
                        v.encode_key(&mut buf);
                    }
                    buf
                }
            };
            match seen.get(&key) {
                None => {
                    seen.insert(key, part);
                    out.rows.push(row);
                }
                Some(&origin) if key_idx.is_none() && origin == part => out.rows.push(row),
                Some(_) => {}
            }
        }
    }
    out
}

/// Stable sort by the merged columns with the total datum ordering.
pub(crate) fn sort_rows(
    rs: &mut ResultSet,
    order_by: &[(ColumnRef, OrderDir)],
) -> Result<(), StrataError> {
    if order_by.is_empty() {
        return Ok(());
    }
    let mut indices = Vec::with_capacity(order_by.len());
    for (col, dir) in order_by {
        let ci = resolve_column(rs, col).ok_or_else(|| {
            StrataError::Internal(format!("order column '{}' missing from merged result", col))
        })?;
        indices.push((ci, *dir));
    }
    rs.rows.sort_by(|a, b| {
        for (ci, dir) in &indices {
            let ord = cmp_datum(&a.values[*ci], &b.values[*ci]);
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
    Ok(())
}

pub(crate) fn apply_window(rs: &mut ResultSet, offset: Option<usize>, limit: Option<usize>) {
    if let Some(off) = offset {
        if off >= rs.rows.len() {
            rs.rows.clear();
        } else {
            rs.rows.drain(..off);
        }
    }
    if let Some(lim) = limit {
        rs.rows.truncate(lim);
    }
}

/// Restore the caller's select order and output names from the merged,
/// qualified column space.
pub(crate) fn project(
    rs: &ResultSet,
    projection: &[ProjectedColumn],
) -> Result<ResultSet, StrataError> {
    let mut indices = Vec::with_capacity(projection.len());
    for p in projection {
        let ci = require_column(rs, &p.source)?;
        indices.push(ci);
    }
    let mut out = ResultSet::new(projection.iter().map(|p| p.output.clone()).collect());
    for row in &rs.rows {
        out.rows.push(OwnedRow::new(
            indices.iter().map(|&ci| row.values[ci].clone()).collect(),
        ));
    }
    Ok(out)
}
