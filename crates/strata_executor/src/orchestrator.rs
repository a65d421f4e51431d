//! The caller-facing surface: a handle owning the partition layout and its
//! connections, and the per-query fluent builder that plans on the first
//! result-requiring call.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use strata_common::{Datum, ExecError, QueryError, ResultSet, StrataConfig, StrataError};
use strata_planner::{
    plan_query, ExecutionPlan, PartitionMap, PlanStep, QueryPlan, ShardAccess, ShardPlan,
};
use strata_query::{
    CompiledQuery, Connection, Expr, OrderDir, QueryBuilder, ShardScope,
};

use crate::exec::{self, ConnectionRegistry, Deadline};
use crate::merge;
use crate::sharded::{self, ShardRuntime};

/// The long-lived handle: partition specifications, one connection per
/// partition (default fallback), shard runtimes, and the query deadline.
/// Builders borrow it; one builder per logical query.
pub struct PartitionedDb {
    partitions: PartitionMap,
    registry: ConnectionRegistry,
    shards: HashMap<String, ShardRuntime>,
    timeout: Option<Duration>,
}

impl PartitionedDb {
    pub fn new(partitions: PartitionMap, default: Arc<dyn Connection>) -> Self {
        Self {
            partitions,
            registry: ConnectionRegistry::new(default),
            shards: HashMap::new(),
            timeout: None,
        }
    }

    /// Build the handle from a parsed configuration. Partition and shard
    /// connections are mounted separately; a zero timeout means none.
    pub fn from_config(
        config: &StrataConfig,
        default: Arc<dyn Connection>,
    ) -> Result<Self, StrataError> {
        let partitions = PartitionMap::from_config(config)?;
        let mut db = Self::new(partitions, default);
        if config.query_timeout_ms > 0 {
            db.timeout = Some(Duration::from_millis(config.query_timeout_ms));
        }
        Ok(db)
    }

    /// Attach the connection serving one named partition.
    pub fn mount_partition(&mut self, partition: &str, conn: Arc<dyn Connection>) {
        self.registry.register(partition, conn);
    }

    /// Attach a sharded table's runtime and register its spec for planning.
    pub fn mount_shards(&mut self, runtime: ShardRuntime) {
        self.partitions.register_sharded(runtime.spec.clone());
        self.shards.insert(runtime.spec.table.clone(), runtime);
    }

    pub fn set_query_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    pub fn partitions(&self) -> &PartitionMap {
        &self.partitions
    }

    /// A fresh builder. Spent by its first execute call.
    pub fn query(&self) -> PartitionedQueryBuilder<'_> {
        PartitionedQueryBuilder {
            db: self,
            qb: QueryBuilder::new(),
            state: BuilderState::Building,
            injected_id: None,
            last_connection: None,
        }
    }

    fn shard_runtime(&self, table: &str) -> Result<&ShardRuntime, StrataError> {
        self.shards.get(table).ok_or_else(|| {
            StrataError::Internal(format!("no shard runtime mounted for table '{}'", table))
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BuilderState {
    Building,
    Executed,
    Failed,
}

/// One logical query. Fluent calls only record; `execute_rows`,
/// `execute_statement`, and `touched_partitions` plan. A builder that has
/// executed (or failed) is spent.
pub struct PartitionedQueryBuilder<'a> {
    db: &'a PartitionedDb,
    qb: QueryBuilder,
    state: BuilderState,
    /// Surrogate primary key injected into a sharded INSERT.
    injected_id: Option<i64>,
    last_connection: Option<Arc<dyn Connection>>,
}

impl<'a> PartitionedQueryBuilder<'a> {
    // ── Fluent recording (delegates to the plain builder) ───────────────

    pub fn select(&mut self, columns: &[&str]) -> &mut Self {
        self.qb.select(columns);
        self
    }

    pub fn select_alias(&mut self, column: &str, alias: &str) -> &mut Self {
        self.qb.select_alias(column, alias);
        self
    }

    pub fn select_expr(&mut self, expr: Expr, alias: &str) -> &mut Self {
        self.qb.select_expr(expr, alias);
        self
    }

    pub fn from(&mut self, table: &str, alias: Option<&str>) -> &mut Self {
        self.qb.from(table, alias);
        self
    }

    pub fn inner_join(&mut self, from_alias: &str, table: &str, alias: &str, on: Expr) -> &mut Self {
        self.qb.inner_join(from_alias, table, alias, on);
        self
    }

    pub fn left_join(&mut self, from_alias: &str, table: &str, alias: &str, on: Expr) -> &mut Self {
        self.qb.left_join(from_alias, table, alias, on);
        self
    }

    /// Replace all recorded predicates.
    pub fn where_expr(&mut self, predicate: Expr) -> &mut Self {
        self.qb.where_expr(predicate);
        self
    }

    /// Append one conjunctive predicate.
    pub fn and_where(&mut self, predicate: Expr) -> &mut Self {
        self.qb.and_where(predicate);
        self
    }

    pub fn group_by(&mut self, column: &str) -> &mut Self {
        self.qb.group_by(column);
        self
    }

    pub fn order_by(&mut self, column: &str, dir: OrderDir) -> &mut Self {
        self.qb.order_by(column, dir);
        self
    }

    pub fn set_max_results(&mut self, limit: usize) -> &mut Self {
        self.qb.set_max_results(limit);
        self
    }

    pub fn set_first_result(&mut self, offset: usize) -> &mut Self {
        self.qb.set_first_result(offset);
        self
    }

    pub fn insert(&mut self, table: &str) -> &mut Self {
        self.qb.insert(table);
        self
    }

    pub fn update(&mut self, table: &str) -> &mut Self {
        self.qb.update(table);
        self
    }

    pub fn delete(&mut self, table: &str) -> &mut Self {
        self.qb.delete(table);
        self
    }

    pub fn set_value(&mut self, column: &str, value: Expr) -> &mut Self {
        self.qb.set_value(column, value);
        self
    }

    pub fn set_parameter(&mut self, name: &str, value: impl Into<Datum>) -> &mut Self {
        self.qb.set_parameter(name, value);
        self
    }

    /// Route a sharded table access to the shard owning this key.
    pub fn hint_shard_key(&mut self, key: impl Into<Datum>) -> &mut Self {
        self.qb.description_mut().shard_scope = ShardScope::KeyHint(key.into());
        self
    }

    /// Explicit opt-in: run against every shard and union the results.
    pub fn scan_all_shards(&mut self) -> &mut Self {
        self.qb.description_mut().shard_scope = ShardScope::AllShards;
        self
    }

    // ── Planning and execution ──────────────────────────────────────────

    /// Number of distinct partitions this query would touch. Plans without
    /// spending the builder.
    pub fn touched_partitions(&self) -> Result<usize, StrataError> {
        Ok(plan_query(self.qb.description(), &self.db.partitions)?.touched_partitions)
    }

    pub fn execute_rows(&mut self) -> Result<ResultSet, StrataError> {
        self.consume()?;
        match self.run_rows() {
            Ok(rs) => Ok(rs),
            Err(e) => {
                self.state = BuilderState::Failed;
                Err(e)
            }
        }
    }

    pub fn execute_statement(&mut self) -> Result<u64, StrataError> {
        self.consume()?;
        match self.run_statement() {
            Ok(n) => Ok(n),
            Err(e) => {
                self.state = BuilderState::Failed;
                Err(e)
            }
        }
    }

    /// Id of the last insert through this builder: the injected surrogate
    /// key when one was reserved, else the backend's report.
    pub fn last_insert_id(&self) -> Result<i64, StrataError> {
        if let Some(id) = self.injected_id {
            return Ok(id);
        }
        match &self.last_connection {
            Some(conn) => conn.last_insert_id(),
            None => Err(QueryError::Invalid("last_insert_id before any execute".into()).into()),
        }
    }

    fn consume(&mut self) -> Result<(), StrataError> {
        if self.state != BuilderState::Building {
            return Err(ExecError::AlreadyExecuted.into());
        }
        self.state = BuilderState::Executed;
        Ok(())
    }

    fn deadline(&self) -> Option<Deadline> {
        self.db.timeout.map(Deadline::after)
    }

    fn run_rows(&mut self) -> Result<ResultSet, StrataError> {
        let planned = plan_query(self.qb.description(), &self.db.partitions)?;
        let deadline = self.deadline();

        match planned.shard {
            None => match planned.inner {
                QueryPlan::PassThrough { partition } => {
                    let name = self.db.partitions.name_of(partition);
                    let conn = self.db.registry.connection_for(name);
                    tracing::debug!(partition = %name, "pass-through query");
                    self.last_connection = Some(Arc::clone(&conn));
                    conn.execute_rows(&self.qb.compile())
                }
                QueryPlan::Partitioned(plan) => {
                    let registry = &self.db.registry;
                    exec::run_plan(
                        &plan,
                        &|step| Ok(registry.connection_for(&step.partition_name)),
                        deadline,
                    )
                }
            },
            Some(ShardPlan { spec, access }) => {
                let runtime = self.db.shard_runtime(&spec.table)?;
                match access {
                    ShardAccess::Key(key) => {
                        let shard = runtime.router.shard_for_key(&key);
                        let conn = runtime.pool.connection(shard)?;
                        tracing::debug!(table = %spec.table, %shard, "key-scoped shard query");
                        match planned.inner {
                            QueryPlan::PassThrough { .. } => {
                                self.last_connection = Some(Arc::clone(&conn));
                                conn.execute_rows(&self.qb.compile())
                            }
                            QueryPlan::Partitioned(plan) => {
                                let resolve = shard_step_resolver(
                                    &self.db.registry,
                                    &spec.table,
                                    Arc::clone(&conn),
                                );
                                exec::run_plan(&plan, &resolve, deadline)
                            }
                        }
                    }
                    ShardAccess::AllShards => match planned.inner {
                        QueryPlan::PassThrough { .. } => self.broadcast_rows(runtime, deadline),
                        QueryPlan::Partitioned(plan) => {
                            self.broadcast_partitioned(runtime, &plan, deadline)
                        }
                    },
                }
            }
        }
    }

    /// Broadcast a single-partition SELECT: per shard with the window
    /// widened to limit+offset, then union, re-sort, re-window.
    fn broadcast_rows(
        &self,
        runtime: &ShardRuntime,
        deadline: Option<Deadline>,
    ) -> Result<ResultSet, StrataError> {
        let desc = self.qb.description();
        let mut per_shard = desc.clone();
        per_shard.limit = desc.limit.map(|l| l + desc.offset.unwrap_or(0));
        per_shard.offset = None;
        let compiled = CompiledQuery { desc: per_shard };

        let parts = sharded::broadcast(runtime, deadline, |shard, conn| {
            tracing::debug!(%shard, "broadcast sub-query");
            conn.execute_rows(&compiled)
        })?;
        let mut merged = sharded::union_shard_results(runtime, parts);
        merge::sort_rows(&mut merged, &desc.order_by)?;
        merge::apply_window(&mut merged, desc.offset, desc.limit);
        Ok(merged)
    }

    /// Broadcast a multi-partition plan: the full linearized plan runs per
    /// shard, with the sharded table's step on that shard's connection,
    /// then the per-shard results union. Each shard only sorts and widens
    /// its window to limit+offset; the caller's window and projection apply
    /// exactly once, after the union.
    fn broadcast_partitioned(
        &self,
        runtime: &ShardRuntime,
        plan: &ExecutionPlan,
        deadline: Option<Deadline>,
    ) -> Result<ResultSet, StrataError> {
        let table = runtime.spec.table.clone();
        let overfetch = plan.limit.map(|l| l + plan.offset.unwrap_or(0));
        let parts = sharded::broadcast(runtime, deadline, |shard, conn| {
            tracing::debug!(%shard, "broadcast partitioned plan");
            let resolve = shard_step_resolver(&self.db.registry, &table, conn);
            let mut merged = exec::run_plan_steps(plan, &resolve, deadline)?;
            merge::sort_rows(&mut merged, &plan.order_by)?;
            merge::apply_window(&mut merged, None, overfetch);
            Ok(merged)
        })?;
        let mut merged = sharded::union_shard_results(runtime, parts);
        merge::sort_rows(&mut merged, &plan.order_by)?;
        merge::apply_window(&mut merged, plan.offset, plan.limit);
        merge::project(&merged, &plan.projection)
    }

    fn run_statement(&mut self) -> Result<u64, StrataError> {
        let planned = plan_query(self.qb.description(), &self.db.partitions)?;
        let deadline = self.deadline();

        match planned.shard {
            None => match planned.inner {
                QueryPlan::PassThrough { partition } => {
                    let name = self.db.partitions.name_of(partition);
                    let conn = self.db.registry.connection_for(name);
                    self.last_connection = Some(Arc::clone(&conn));
                    conn.execute_statement(&self.qb.compile())
                }
                QueryPlan::Partitioned(_) => Err(StrataError::Internal(
                    "statements never span partitions".into(),
                )),
            },
            Some(ShardPlan { spec, access }) => {
                let runtime = self.db.shard_runtime(&spec.table)?;
                let mut desc = self.qb.description().clone();
                self.injected_id = runtime.prepare_insert(&mut desc)?;
                let compiled = CompiledQuery { desc };
                match access {
                    ShardAccess::Key(key) => {
                        let shard = runtime.router.shard_for_key(&key);
                        let conn = runtime.pool.connection(shard)?;
                        tracing::debug!(table = %spec.table, %shard, "key-scoped shard statement");
                        self.last_connection = Some(Arc::clone(&conn));
                        conn.execute_statement(&compiled)
                    }
                    ShardAccess::AllShards => {
                        let counts = sharded::broadcast(runtime, deadline, |shard, conn| {
                            tracing::debug!(%shard, "broadcast statement");
                            conn.execute_statement(&compiled)
                        })?;
                        Ok(counts.into_iter().sum())
                    }
                }
            }
        }
    }
}

fn shard_step_resolver<'r>(
    registry: &'r ConnectionRegistry,
    sharded_table: &str,
    shard_conn: Arc<dyn Connection>,
) -> impl Fn(&PlanStep) -> Result<Arc<dyn Connection>, StrataError> + 'r {
    let table = sharded_table.to_string();
    move |step: &PlanStep| {
        if step.query.tables().iter().any(|t| t.name == table) {
            Ok(Arc::clone(&shard_conn))
        } else {
            Ok(registry.connection_for(&step.partition_name))
        }
    }
}
