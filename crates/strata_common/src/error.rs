use thiserror::Error;

use crate::types::ShardId;

/// Top-level error type that all layer-specific errors convert into.
#[derive(Error, Debug)]
pub enum StrataError {
    #[error("Query error: {0}")]
    Query(#[from] QueryError),

    #[error("Plan error: {0}")]
    Plan(#[from] PlanError),

    #[error("Shard error: {0}")]
    Shard(#[from] ShardError),

    #[error("Execution error: {0}")]
    Exec(#[from] ExecError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl StrataError {
    /// True for connectivity failures the caller may retry. Plan-time
    /// rejections and execution failures are never retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            StrataError::Shard(e) => e.is_retryable(),
            _ => false,
        }
    }
}

/// Query description / builder errors.
#[derive(Error, Debug)]
pub enum QueryError {
    #[error("Unknown table: {0}")]
    UnknownTable(String),

    #[error("Unknown column: {0}")]
    UnknownColumn(String),

    #[error("Named parameter :{0} was not bound")]
    MissingParameter(String),

    #[error("Type mismatch evaluating expression: {0}")]
    TypeMismatch(String),

    #[error("Query has no FROM table")]
    MissingFrom,

    #[error("Invalid query description: {0}")]
    Invalid(String),
}

/// Plan-time rejections. These never degrade into a wrong answer: a query
/// the planner cannot linearize fails loudly before any round trip.
#[derive(Error, Debug)]
pub enum PlanError {
    #[error("OR is not supported in a cross-partition join condition")]
    OrInCrossPartitionJoin,

    #[error("No equality linking '{from_table}' and '{to_table}' found in join condition")]
    NoJoinLink { from_table: String, to_table: String },

    #[error("More than one equality links '{from_table}' and '{to_table}' in join condition")]
    MultipleJoinLinks { from_table: String, to_table: String },

    #[error("Join condition operand references both '{from_table}' and '{to_table}' outside the link")]
    MixedJoinOperand { from_table: String, to_table: String },

    #[error("Aggregate or GROUP BY spanning partitions cannot be computed correctly and is rejected")]
    CrossPartitionAggregate,

    #[error("Partition join graph contains a cycle involving partition '{0}'")]
    PartitionCycle(String),

    #[error("Query against sharded table '{0}' has no shard key hint and no all-shards opt-in")]
    UnscopedShardQuery(String),

    #[error("Table '{table}' is assigned to more than one partition ('{first}' and '{second}')")]
    TableInMultiplePartitions {
        table: String,
        first: String,
        second: String,
    },

    #[error("Unsupported construct: {0}")]
    Unsupported(String),
}

/// Shard layer errors: connection opening and key allocation.
#[derive(Error, Debug)]
pub enum ShardError {
    #[error("Failed to open connection for {shard}: {reason}")]
    Open { shard: ShardId, reason: String },

    #[error("No such shard: {0} (shard count is {1})")]
    NoSuchShard(ShardId, u32),

    #[error("Surrogate key counter store unavailable: {0}")]
    CounterUnavailable(String),

    #[error("Table '{0}' is not registered for surrogate key allocation")]
    UnknownCounterTable(String),
}

impl ShardError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ShardError::Open { .. } | ShardError::CounterUnavailable(_)
        )
    }
}

/// Execution errors for a planned query.
#[derive(Error, Debug)]
pub enum ExecError {
    #[error("Sub-query for partition '{partition}' failed: {source}")]
    SubQueryFailed {
        partition: String,
        #[source]
        source: Box<StrataError>,
    },

    #[error("Query deadline of {0:?} exceeded before all sub-queries completed")]
    Timeout(std::time::Duration),

    #[error("This query builder was already executed; build a fresh one per logical query")]
    AlreadyExecuted,

    #[error("Backend error: {0}")]
    Backend(String),
}
