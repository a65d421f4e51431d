//! Planning layer: partition specifications, the join-condition extractor,
//! and the planner that classifies a query description into a pass-through,
//! a linearized multi-partition plan, or a sharded strategy.

pub mod join_cond;
pub mod partition;
pub mod plan;
pub mod planner;

pub use join_cond::{parse_join_condition, ParsedJoinCondition};
pub use partition::{PartitionMap, PartitionSpec, ShardedSpec};
pub use plan::{
    ExecutionPlan, PlanStep, PlannedQuery, ProjectedColumn, QueryPlan, ShardAccess, ShardPlan,
    StepLink,
};
pub use planner::plan_query;
