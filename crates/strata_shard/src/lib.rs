//! Shard infrastructure: stable shard-key routing, the lazy per-shard
//! connection pool, and the centralized surrogate key allocator.

pub mod keygen;
pub mod pool;
pub mod router;

pub use keygen::{CounterStore, KeyAllocator, MemoryCounterStore};
pub use pool::{ConnectionFactory, ShardPool};
pub use router::ShardRouter;
