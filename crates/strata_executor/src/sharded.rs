//! Sharded execution strategy: single-shard routing via the key hint and
//! the parallel all-shards broadcast with a strict failure policy.

use std::sync::Arc;

use strata_common::{ResultSet, ShardId, StrataError};
use strata_planner::ShardedSpec;
use strata_query::{expr, Connection, QueryDescription, QueryKind};
use strata_shard::{KeyAllocator, ShardPool, ShardRouter};

use crate::exec::{check_deadline, Deadline};
use crate::merge;

/// Everything needed to execute against one sharded table: its spec, the
/// key router, the lazy connection pool, and (optionally) the surrogate
/// key allocator.
pub struct ShardRuntime {
    pub spec: ShardedSpec,
    pub router: ShardRouter,
    pub pool: ShardPool,
    pub keys: Option<Arc<KeyAllocator>>,
}

impl ShardRuntime {
    pub fn new(spec: ShardedSpec, pool: ShardPool, keys: Option<Arc<KeyAllocator>>) -> Self {
        let router = ShardRouter::with_default_hash(spec.shard_count);
        Self {
            spec,
            router,
            pool,
            keys,
        }
    }

    pub fn with_router(mut self, router: ShardRouter) -> Self {
        self.router = router;
        self
    }

    /// Reserve and inject a surrogate primary key into a sharded INSERT when
    /// the table has one configured and the caller did not supply it.
    /// Returns the injected id.
    pub(crate) fn prepare_insert(
        &self,
        desc: &mut QueryDescription,
    ) -> Result<Option<i64>, StrataError> {
        if desc.kind != QueryKind::Insert {
            return Ok(None);
        }
        let pk = match (&self.spec.primary_key_column, &self.keys) {
            (Some(pk), Some(keys)) => (pk.clone(), Arc::clone(keys)),
            _ => return Ok(None),
        };
        if desc.values.iter().any(|(col, _)| *col == pk.0) {
            return Ok(None);
        }
        let id = pk.1.reserve(&self.spec.table)?;
        desc.values.push((pk.0, expr::lit(id)));
        Ok(Some(id))
    }
}

/// Run `task` on every shard in parallel. Strict failure policy: any shard
/// error fails the whole broadcast, and no partial result escapes.
pub(crate) fn broadcast<T, F>(
    runtime: &ShardRuntime,
    deadline: Option<Deadline>,
    task: F,
) -> Result<Vec<T>, StrataError>
where
    T: Send,
    F: Fn(ShardId, Arc<dyn Connection>) -> Result<T, StrataError> + Sync,
{
    let connections = runtime.pool.all_connections()?;

    let results: Vec<Result<T, StrataError>> = std::thread::scope(|s| {
        let handles: Vec<_> = connections
            .into_iter()
            .map(|(shard, conn)| {
                let task = &task;
                s.spawn(move || task(shard, conn))
            })
            .collect();
        handles
            .into_iter()
            .map(|h| {
                h.join().unwrap_or_else(|_| {
                    Err(StrataError::Internal("broadcast worker panicked".into()))
                })
            })
            .collect()
    });

    check_deadline(deadline)?;

    let mut out = Vec::with_capacity(results.len());
    for r in results {
        out.push(r?);
    }
    Ok(out)
}

/// Union per-shard SELECT results, deduplicating by the sharded table's
/// primary key when configured.
pub(crate) fn union_shard_results(runtime: &ShardRuntime, parts: Vec<ResultSet>) -> ResultSet {
    merge::union_dedup(parts, runtime.spec.primary_key_column.as_deref())
}
