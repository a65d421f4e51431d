//! The partitioned query orchestrator. Plans a recorded query description
//! against the active partition and shard layout, runs the resulting
//! single-connection sub-queries in order, and merges rows in process.

pub mod exec;
pub mod merge;
pub mod orchestrator;
pub mod sharded;

pub use exec::ConnectionRegistry;
pub use orchestrator::{PartitionedDb, PartitionedQueryBuilder};
pub use sharded::ShardRuntime;
