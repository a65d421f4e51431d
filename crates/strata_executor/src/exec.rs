//! Sequential execution of a linearized multi-partition plan: one sub-query
//! per step, link values carried forward as `IN` restrictions, merged rows
//! kept in process.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use strata_common::{ExecError, ResultSet, StrataError};
use strata_planner::{ExecutionPlan, PlanStep};
use strata_query::{expr, CompiledQuery, Connection, Expr};

use crate::merge;

/// Partition name to connection mapping. Partitions without a registered
/// connection fall back to the default (primary) connection, matching a
/// layout where some partitions still live in the main database.
pub struct ConnectionRegistry {
    default: Arc<dyn Connection>,
    named: HashMap<String, Arc<dyn Connection>>,
}

impl ConnectionRegistry {
    pub fn new(default: Arc<dyn Connection>) -> Self {
        Self {
            default,
            named: HashMap::new(),
        }
    }

    pub fn register(&mut self, partition: &str, conn: Arc<dyn Connection>) {
        self.named.insert(partition.to_string(), conn);
    }

    pub fn connection_for(&self, partition: &str) -> Arc<dyn Connection> {
        self.named
            .get(partition)
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.default))
    }
}

/// Wall-clock budget for one logical query, checked between round trips.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Deadline {
    at: Instant,
    budget: Duration,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
            budget,
        }
    }

    pub fn check(&self) -> Result<(), StrataError> {
        if Instant::now() >= self.at {
            Err(ExecError::Timeout(self.budget).into())
        } else {
            Ok(())
        }
    }
}

pub(crate) fn check_deadline(deadline: Option<Deadline>) -> Result<(), StrataError> {
    match deadline {
        Some(d) => d.check(),
        None => Ok(()),
    }
}

fn step_failed(step: &PlanStep, source: StrataError) -> StrataError {
    ExecError::SubQueryFailed {
        partition: step.partition_name.clone(),
        source: Box::new(source),
    }
    .into()
}

/// Run every step of `plan` in order against the connections `resolve`
/// yields, then sort, window, and project the merged rows. Either every
/// required sub-query succeeds or the whole call fails.
pub(crate) fn run_plan(
    plan: &ExecutionPlan,
    resolve: &dyn Fn(&PlanStep) -> Result<Arc<dyn Connection>, StrataError>,
    deadline: Option<Deadline>,
) -> Result<ResultSet, StrataError> {
    let mut merged = run_plan_steps(plan, resolve, deadline)?;
    merge::sort_rows(&mut merged, &plan.order_by)?;
    merge::apply_window(&mut merged, plan.offset, plan.limit);
    merge::project(&merged, &plan.projection)
}

/// The sub-queries and merges only: rows stay in the qualified column
/// space, with no window or projection applied. Broadcast callers union
/// per-shard results first, then sort, window, and project exactly once.
pub(crate) fn run_plan_steps(
    plan: &ExecutionPlan,
    resolve: &dyn Fn(&PlanStep) -> Result<Arc<dyn Connection>, StrataError>,
    deadline: Option<Deadline>,
) -> Result<ResultSet, StrataError> {
    let mut merged = ResultSet::default();

    for (i, step) in plan.steps.iter().enumerate() {
        check_deadline(deadline)?;

        if i == 0 {
            let conn = resolve(step)?;
            let compiled = CompiledQuery {
                desc: step.query.clone(),
            };
            merged = conn
                .execute_rows(&compiled)
                .map_err(|e| step_failed(step, e))?;
            tracing::debug!(
                partition = %step.partition_name,
                rows = merged.len(),
                "driving sub-query done"
            );
            continue;
        }

        let link = step
            .link
            .as_ref()
            .ok_or_else(|| StrataError::Internal("dependent step without a link".into()))?;
        let values = merge::distinct_values(&merged, &link.source_column)?;

        let right = if values.is_empty() {
            // Nothing to fetch: the merge alone decides (INNER drops all
            // left rows, LEFT null-pads them).
            ResultSet::new(step.query.selects.iter().map(|s| s.output_name()).collect())
        } else {
            let mut desc = step.query.clone();
            desc.predicates.push(expr::in_list(
                Expr::Column(link.own_column.clone()),
                values.into_iter().map(Expr::Literal).collect(),
            ));
            let conn = resolve(step)?;
            conn.execute_rows(&CompiledQuery { desc })
                .map_err(|e| step_failed(step, e))?
        };
        tracing::debug!(
            partition = %step.partition_name,
            rows = right.len(),
            "dependent sub-query done"
        );
        merged = merge::merge_linked(merged, &right, link)?;
    }

    Ok(merged)
}
