//! The shard connection pool: one lazily opened, process-cached physical
//! connection per shard index. The pool is an explicit instance injected
//! into the orchestrator, with a `reset()` teardown hook for tests, rather
//! than an ambient process-wide global.

use std::sync::Arc;

use dashmap::DashMap;
use strata_common::{ShardError, ShardId};
use strata_query::Connection;

/// Opens a physical connection for one shard. Implementations wrap the
/// actual driver; tests plug in in-memory engines.
pub trait ConnectionFactory: Send + Sync {
    fn open(&self, shard: ShardId) -> Result<Arc<dyn Connection>, ShardError>;
}

impl<F> ConnectionFactory for F
where
    F: Fn(ShardId) -> Result<Arc<dyn Connection>, ShardError> + Send + Sync,
{
    fn open(&self, shard: ShardId) -> Result<Arc<dyn Connection>, ShardError> {
        self(shard)
    }
}

pub struct ShardPool {
    shard_count: u32,
    factory: Arc<dyn ConnectionFactory>,
    cache: DashMap<ShardId, Arc<dyn Connection>>,
}

impl ShardPool {
    pub fn new(shard_count: u32, factory: Arc<dyn ConnectionFactory>) -> Self {
        Self {
            shard_count,
            factory,
            cache: DashMap::new(),
        }
    }

    pub fn shard_count(&self) -> u32 {
        self.shard_count
    }

    /// The connection for one shard, opening it on first use.
    pub fn connection(&self, shard: ShardId) -> Result<Arc<dyn Connection>, ShardError> {
        if shard.0 >= self.shard_count {
            return Err(ShardError::NoSuchShard(shard, self.shard_count));
        }
        if let Some(conn) = self.cache.get(&shard) {
            return Ok(conn.clone());
        }
        // Open outside the map entry; a racing open of the same shard keeps
        // the first cached connection.
        let conn = self.factory.open(shard)?;
        tracing::debug!(%shard, "opened shard connection");
        let entry = self.cache.entry(shard).or_insert(conn);
        Ok(entry.clone())
    }

    /// Connections for every shard, opening any not yet cached. Fails on
    /// the first shard that cannot be opened.
    pub fn all_connections(&self) -> Result<Vec<(ShardId, Arc<dyn Connection>)>, ShardError> {
        (0..self.shard_count)
            .map(ShardId)
            .map(|sid| self.connection(sid).map(|c| (sid, c)))
            .collect()
    }

    /// Drop every cached connection. Test teardown hook.
    pub fn reset(&self) {
        self.cache.clear();
    }

    /// Number of currently cached (opened) connections.
    pub fn open_count(&self) -> usize {
        self.cache.len()
    }
}
