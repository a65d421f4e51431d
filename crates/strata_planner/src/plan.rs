//! Execution plan types: the ordered list of single-partition sub-queries,
//! how each step links to its predecessor, and the merge/projection spec.

use strata_common::{Datum, PartitionId};
use strata_query::{ColumnRef, JoinKind, OrderDir, QueryDescription};

use crate::partition::ShardedSpec;

/// How one plan step connects to an earlier step's result: the dependent
/// step's query is restricted to the distinct values the source step
/// produced for `source_column`.
#[derive(Debug, Clone, PartialEq)]
pub struct StepLink {
    pub source_step: usize,
    /// Output column of the source step holding the link values
    /// (qualified, e.g. `m.root_id`).
    pub source_column: String,
    /// Column of this step's tables matched against the link values.
    pub own_column: ColumnRef,
    pub join_kind: JoinKind,
}

/// One single-partition sub-query in an ordered plan.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanStep {
    pub partition: PartitionId,
    pub partition_name: String,
    /// The sub-query; every select item carries its qualified name as alias
    /// so merged columns stay unambiguous.
    pub query: QueryDescription,
    /// None for the driving step.
    pub link: Option<StepLink>,
}

/// One column of the final merged result.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectedColumn {
    /// Qualified source column in the merged row (`f.path`).
    pub source: String,
    /// Output name the caller asked for.
    pub output: String,
}

/// A linearized multi-partition plan plus its in-process merge spec.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionPlan {
    /// Driving step first; dependents follow in join order.
    pub steps: Vec<PlanStep>,
    pub projection: Vec<ProjectedColumn>,
    /// Applied after the merge, with a total datum ordering.
    pub order_by: Vec<(ColumnRef, OrderDir)>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    /// True when LIMIT/OFFSET were also pushed into the driving step as an
    /// over-fetch (possible only when no post-merge filtering can shrink
    /// the row count below the driving count).
    pub pushed_overfetch: bool,
}

/// How a query touching a sharded table is scoped to physical shards.
#[derive(Debug, Clone, PartialEq)]
pub enum ShardAccess {
    /// Route to the single shard owning this key.
    Key(Datum),
    /// Explicit opt-in broadcast to every shard.
    AllShards,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShardPlan {
    pub spec: ShardedSpec,
    pub access: ShardAccess,
}

/// The planner's verdict for one query description.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryPlan {
    /// All tables share one partition: delegate the description verbatim to
    /// that partition's connection.
    PassThrough { partition: PartitionId },
    /// Two or more partitions: ordered sub-queries plus in-process merge.
    Partitioned(ExecutionPlan),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlannedQuery {
    pub inner: QueryPlan,
    /// Present when the query touches a sharded table.
    pub shard: Option<ShardPlan>,
    /// Number of distinct partitions referenced, for introspection.
    pub touched_partitions: usize,
}
