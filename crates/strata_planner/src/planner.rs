//! The planner: classifies every referenced table into a partition, decides
//! between pass-through and a linearized multi-partition plan, and resolves
//! the shard scope for sharded tables.

use std::collections::{BTreeSet, HashMap};

use strata_common::{PartitionId, PlanError, StrataError};
use strata_query::{
    ColumnRef, Expr, JoinKind, QueryDescription, QueryKind, SelectItem, ShardScope,
};

use crate::join_cond::parse_join_condition;
use crate::partition::PartitionMap;
use crate::plan::{
    ExecutionPlan, PlanStep, PlannedQuery, ProjectedColumn, QueryPlan, ShardAccess, ShardPlan,
};

/// Plan one query description against the active partition specifications.
pub fn plan_query(
    desc: &QueryDescription,
    partitions: &PartitionMap,
) -> Result<PlannedQuery, StrataError> {
    let from = desc
        .from
        .as_ref()
        .ok_or(strata_common::QueryError::MissingFrom)?;

    // Alias -> partition for every referenced table.
    let mut alias_partition: HashMap<String, PartitionId> = HashMap::new();
    let mut touched: BTreeSet<PartitionId> = BTreeSet::new();
    for table in desc.tables() {
        let pid = partitions.partition_of(&table.name);
        alias_partition.insert(table.alias.clone(), pid);
        touched.insert(pid);
    }

    let shard = resolve_shard_plan(desc, partitions)?;

    let inner = if touched.len() <= 1 {
        QueryPlan::PassThrough {
            partition: partitions.partition_of(&from.name),
        }
    } else {
        QueryPlan::Partitioned(build_partitioned_plan(desc, partitions, &alias_partition)?)
    };

    tracing::debug!(
        touched = touched.len(),
        sharded = shard.is_some(),
        pass_through = matches!(inner, QueryPlan::PassThrough { .. }),
        "planned query"
    );

    Ok(PlannedQuery {
        inner,
        shard,
        touched_partitions: touched.len(),
    })
}

/// Resolve the shard scope when a sharded table is referenced. Unscoped
/// access is rejected here, at plan time, so it can never silently run
/// against an implicit default shard.
fn resolve_shard_plan(
    desc: &QueryDescription,
    partitions: &PartitionMap,
) -> Result<Option<ShardPlan>, StrataError> {
    let mut sharded = desc
        .tables()
        .into_iter()
        .filter_map(|t| partitions.sharded_spec(&t.name));
    let Some(spec) = sharded.next() else {
        return Ok(None);
    };
    if sharded.any(|other| other.table != spec.table) {
        return Err(PlanError::Unsupported(
            "joining two different sharded tables is not supported".into(),
        )
        .into());
    }

    let access = match &desc.shard_scope {
        ShardScope::KeyHint(key) => ShardAccess::Key(key.clone()),
        ShardScope::AllShards => ShardAccess::AllShards,
        ShardScope::Unscoped => {
            // An insert carrying a concrete shard-key value is implicitly
            // scoped to that key's shard.
            if desc.kind == QueryKind::Insert {
                match insert_shard_key(desc, &spec.shard_key_column) {
                    Some(key) => ShardAccess::Key(key),
                    None => {
                        return Err(PlanError::UnscopedShardQuery(spec.table.clone()).into());
                    }
                }
            } else {
                return Err(PlanError::UnscopedShardQuery(spec.table.clone()).into());
            }
        }
    };

    // A broadcast union cannot recombine partial aggregates.
    if matches!(access, ShardAccess::AllShards)
        && (desc.has_aggregate() || !desc.group_by.is_empty())
    {
        return Err(PlanError::CrossPartitionAggregate.into());
    }

    Ok(Some(ShardPlan {
        spec: spec.clone(),
        access,
    }))
}

/// The shard-key value of an INSERT, when the caller set it to a literal or
/// a bound parameter.
fn insert_shard_key(
    desc: &QueryDescription,
    shard_key_column: &str,
) -> Option<strata_common::Datum> {
    let (_, value) = desc
        .values
        .iter()
        .find(|(col, _)| col == shard_key_column)?;
    match value {
        Expr::Literal(d) => Some(d.clone()),
        Expr::Param(name) => desc.params.get(name).cloned(),
        _ => None,
    }
}

/// Working state for one partition's sub-query while the join list is
/// linearized.
struct StepBuilder {
    partition: PartitionId,
    query: QueryDescription,
    link: Option<crate::plan::StepLink>,
    aliases: BTreeSet<String>,
}

fn build_partitioned_plan(
    desc: &QueryDescription,
    partitions: &PartitionMap,
    alias_partition: &HashMap<String, PartitionId>,
) -> Result<ExecutionPlan, StrataError> {
    if desc.kind != QueryKind::Select {
        return Err(PlanError::Unsupported(
            "INSERT/UPDATE/DELETE cannot span multiple partitions".into(),
        )
        .into());
    }
    if desc.has_aggregate() || !desc.group_by.is_empty() {
        return Err(PlanError::CrossPartitionAggregate.into());
    }

    let from = desc.from.as_ref().expect("checked by plan_query");

    // Driving partition: the outermost FROM table's partition. Deterministic
    // and stable for a fixed query shape.
    let mut steps: Vec<StepBuilder> = Vec::new();
    let mut partition_step: HashMap<PartitionId, usize> = HashMap::new();

    let driving_pid = alias_partition[&from.alias];
    steps.push(new_step(driving_pid, desc));
    steps[0].query.from = Some(from.clone());
    steps[0].aliases.insert(from.alias.clone());
    partition_step.insert(driving_pid, 0);

    // Walk the joins in declared order, keeping same-partition joins intact
    // and turning each partition-crossing join into a linked step.
    for join in &desc.joins {
        let source_pid = *alias_partition.get(&join.from_alias).ok_or_else(|| {
            strata_common::QueryError::Invalid(format!(
                "join references unknown alias '{}'",
                join.from_alias
            ))
        })?;
        let target_pid = alias_partition[&join.table.alias];

        // The source side must already be part of a planned step; a join
        // referencing a later join's alias is malformed, not a panic.
        let source_step = steps
            .iter()
            .position(|s| s.aliases.contains(&join.from_alias))
            .ok_or_else(|| {
                strata_common::QueryError::Invalid(format!(
                    "join references alias '{}' before it is introduced",
                    join.from_alias
                ))
            })?;

        if source_pid == target_pid {
            // Stays inside one connection; no parsing needed.
            let step = &mut steps[source_step];
            step.aliases.insert(join.table.alias.clone());
            step.query.joins.push(join.clone());
            continue;
        }

        // Crossing edge: the ON-expression must linearize.
        let source_table = desc
            .table_for_alias(&join.from_alias)
            .expect("alias resolved above");
        let parsed = parse_join_condition(&join.on, source_table, &join.table)?;

        if partition_step.contains_key(&target_pid) {
            // A second edge into an already-planned partition closes a
            // cycle in the partition graph.
            return Err(
                PlanError::PartitionCycle(partitions.name_of(target_pid).to_string()).into(),
            );
        }

        // From-side residuals restrict the source sub-query.
        steps[source_step]
            .query
            .predicates
            .extend(parsed.from_conditions.iter().cloned());
        ensure_selected(&mut steps[source_step].query, &parsed.from_column);

        let mut step = new_step(target_pid, desc);
        step.query.from = Some(join.table.clone());
        step.aliases.insert(join.table.alias.clone());
        step.query.predicates.extend(parsed.to_conditions.iter().cloned());
        ensure_selected(&mut step.query, &parsed.to_column);
        step.link = Some(crate::plan::StepLink {
            source_step,
            source_column: parsed.from_column.qualified(),
            own_column: parsed.to_column.clone(),
            join_kind: join.kind,
        });

        partition_step.insert(target_pid, steps.len());
        steps.push(step);
    }

    distribute_predicates(desc, &mut steps)?;
    let projection = distribute_selects(desc, &mut steps)?;

    // The post-merge sort reads merged columns, so every ORDER BY column
    // must come back from its owning sub-query.
    for (column, _) in &desc.order_by {
        let Some(qualifier) = column.qualifier.as_deref() else {
            return Err(PlanError::Unsupported(format!(
                "order column '{}' must be table-qualified in a multi-partition query",
                column.name
            ))
            .into());
        };
        let step = steps
            .iter_mut()
            .find(|s| s.aliases.contains(qualifier))
            .ok_or_else(|| strata_common::QueryError::UnknownColumn(column.qualified()))?;
        ensure_selected(&mut step.query, column);
    }

    // LIMIT/OFFSET pushdown: only safe when no post-merge filtering can
    // shrink the result below the driving row count — every crossing edge
    // must be LEFT, and any ORDER BY must be resolvable on the driving
    // step. Otherwise the driving query over-fetches and LIMIT/OFFSET apply
    // strictly after the merge.
    let all_left = steps
        .iter()
        .skip(1)
        .all(|s| matches!(s.link.as_ref().map(|l| l.join_kind), Some(JoinKind::Left)));
    let order_on_driving = desc
        .order_by
        .iter()
        .all(|(c, _)| c.qualifier.as_deref().is_some_and(|q| steps[0].aliases.contains(q)));
    let mut pushed_overfetch = false;
    if (desc.limit.is_some() || desc.offset.is_some()) && all_left && order_on_driving {
        let fetch = desc.limit.unwrap_or(0) + desc.offset.unwrap_or(0);
        if desc.limit.is_some() {
            steps[0].query.limit = Some(fetch);
        }
        steps[0].query.order_by = desc.order_by.clone();
        pushed_overfetch = true;
    }

    Ok(ExecutionPlan {
        steps: steps
            .into_iter()
            .map(|s| PlanStep {
                partition: s.partition,
                partition_name: partitions.name_of(s.partition).to_string(),
                query: s.query,
                link: s.link,
            })
            .collect(),
        projection,
        order_by: desc.order_by.clone(),
        limit: desc.limit,
        offset: desc.offset,
        pushed_overfetch,
    })
}

fn new_step(partition: PartitionId, desc: &QueryDescription) -> StepBuilder {
    let mut query = QueryDescription::new(QueryKind::Select);
    query.params = desc.params.clone();
    StepBuilder {
        partition,
        query,
        link: None,
        aliases: BTreeSet::new(),
    }
}

/// Make sure a step's sub-query returns `column`, aliased to its qualified
/// name so merged columns never collide.
fn ensure_selected(query: &mut QueryDescription, column: &ColumnRef) {
    let name = column.qualified();
    if query
        .selects
        .iter()
        .any(|s| s.alias.as_deref() == Some(name.as_str()))
    {
        return;
    }
    query.selects.push(SelectItem {
        expr: Expr::Column(column.clone()),
        alias: Some(name),
    });
}

/// Assign every WHERE predicate to the single step whose aliases it
/// references. A predicate spanning steps cannot run on one connection.
fn distribute_predicates(
    desc: &QueryDescription,
    steps: &mut [StepBuilder],
) -> Result<(), StrataError> {
    for predicate in &desc.predicates {
        let quals = predicate.qualifiers();
        if quals.is_empty() {
            // Parameter-only predicates constrain the driving query.
            steps[0].query.predicates.push(predicate.clone());
            continue;
        }
        let owner = steps
            .iter()
            .position(|s| quals.iter().all(|q| s.aliases.contains(q)));
        match owner {
            Some(i) => steps[i].query.predicates.push(predicate.clone()),
            None => {
                return Err(PlanError::Unsupported(
                    "WHERE predicate references tables from different partitions".into(),
                )
                .into())
            }
        }
    }
    Ok(())
}

/// Route every select item to its owning step and record the final
/// projection (source qualified column -> requested output name).
fn distribute_selects(
    desc: &QueryDescription,
    steps: &mut [StepBuilder],
) -> Result<Vec<ProjectedColumn>, StrataError> {
    let mut projection = Vec::with_capacity(desc.selects.len());
    for item in &desc.selects {
        let Expr::Column(column) = &item.expr else {
            return Err(PlanError::Unsupported(
                "only plain column references can be selected across partitions".into(),
            )
            .into());
        };
        let Some(qualifier) = column.qualifier.as_deref() else {
            return Err(PlanError::Unsupported(format!(
                "select column '{}' must be table-qualified in a multi-partition query",
                column.name
            ))
            .into());
        };
        let step = steps
            .iter_mut()
            .find(|s| s.aliases.contains(qualifier))
            .ok_or_else(|| {
                strata_common::QueryError::UnknownColumn(column.qualified())
            })?;
        ensure_selected(&mut step.query, column);
        projection.push(ProjectedColumn {
            source: column.qualified(),
            output: item
                .alias
                .clone()
                .unwrap_or_else(|| column.name.clone()),
        });
    }
    Ok(projection)
}
