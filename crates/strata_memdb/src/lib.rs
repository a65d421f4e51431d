//! An in-process, in-memory `Connection` backend. Interprets compiled
//! single-connection queries directly against owned tables, standing in for
//! the external per-dialect SQL layer. This lets partition and shard
//! orchestration be exercised end to end without a real database.

mod engine;
mod eval;

pub use engine::MemoryDb;
