//! Entry points for running plans, locally or on a process group.

use std::collections::BTreeMap;
use std::time::Instant;

use hashbrown::HashSet;
use lazydist_error::{DbError, OptionExt, Result, ResultExt};
use lazydist_spawn::arg::Arg;
use lazydist_spawn::computation::{Computation, ComputationRegistry, Output, arg_at};
use lazydist_spawn::frame::DistributedFrame;
use lazydist_spawn::spawner::Spawner;
use lazydist_spawn::value::{ResultId, Value};
use lazydist_types::batch::Batch;
use lazydist_types::datatype::DataType;
use lazydist_types::field::{Field, Schema};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::arena::{NodeId, NodeKind, PlanArena};
use crate::backend::{LocalResolver, PartitionResolver, PlanBackend, SchemaOnlyResolver};
use crate::config::ExecutionConfig;
use crate::convert::to_backend;
use crate::expr::Expression;
use crate::expr::aggregate_expr::COUNT_STAR;
use crate::logical::logical_aggregate::LogicalAggregate;
use crate::logical::logical_scan::LogicalFrameReadParallel;
use crate::logical::operator::LogicalOperator;
use crate::operand::NodeRole;
use crate::schema::OutputSchema;

/// Computation running a serialized plan on every rank.
pub const EXECUTE_PLAN: &str = "execute_plan";

/// Plan shipped to the workers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanPayload {
    pub arena: PlanArena,
    pub root: NodeId,
}

#[derive(Debug)]
pub enum PlanResult {
    Local(Batch),
    Distributed(DistributedFrame),
}

impl PlanResult {
    /// Full result table, gathering from the workers if needed.
    pub fn into_batch(self) -> Result<Batch> {
        match self {
            PlanResult::Local(batch) => Ok(batch),
            PlanResult::Distributed(frame) => frame.to_batch(),
        }
    }
}

/// Node counts of a plan before and after optimization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanStatistics {
    pub pre_optimize: usize,
    pub post_optimize: usize,
}

/// Runs plans against a backend, or on a process group when
/// `run_parallel` is set.
#[derive(Debug)]
pub struct PlanExecutor<B: PlanBackend> {
    backend: B,
    config: ExecutionConfig,
    spawner: Option<Spawner>,
    executed_plans: usize,
}

impl<B: PlanBackend> PlanExecutor<B> {
    pub fn new(backend: B, config: ExecutionConfig) -> Self {
        PlanExecutor {
            backend,
            config,
            spawner: None,
            executed_plans: 0,
        }
    }

    pub fn with_spawner(mut self, spawner: Spawner) -> Self {
        self.spawner = Some(spawner);
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut ExecutionConfig {
        &mut self.config
    }

    /// Number of plans executed so far, locally or on the workers.
    pub fn executed_plans(&self) -> usize {
        self.executed_plans
    }

    pub fn execute(&mut self, arena: &PlanArena, root: NodeId) -> Result<PlanResult> {
        if self.config.run_parallel {
            let frame = self.execute_distributed(arena, root)?;
            return Ok(PlanResult::Distributed(frame));
        }
        Ok(PlanResult::Local(self.execute_local(arena, root)?))
    }

    /// Convert, optimize and execute the plan in this process.
    pub fn execute_local(&mut self, arena: &PlanArena, root: NodeId) -> Result<Batch> {
        let start = Instant::now();
        let plan = to_backend(arena, &mut self.backend, &LocalResolver, root)?;
        let converted = start.elapsed();

        if self.config.dump_plans {
            info!(%root, plan = %arena.display(root)?, "plan before optimization");
        }

        let start = Instant::now();
        let plan = self.backend.optimize(plan)?;
        let optimized = start.elapsed();

        if self.config.dump_plans {
            if let Some(explained) = self.backend.explain(&plan) {
                info!(%root, plan = %explained, "plan after optimization");
            }
        }

        let schema = arena.schema(root)?;
        let start = Instant::now();
        let batch = self
            .backend
            .execute(plan, schema.kind, &schema.schema)?;
        self.executed_plans += 1;

        if self.config.profile {
            info!(
                %root,
                convert_us = converted.as_micros() as u64,
                optimize_us = optimized.as_micros() as u64,
                execute_us = start.elapsed().as_micros() as u64,
                num_rows = batch.num_rows(),
                "executed plan"
            );
        }
        Ok(batch)
    }

    /// Ship the plan to the process group. Every rank executes it over its
    /// own partition of the inputs.
    pub fn execute_distributed(&mut self, arena: &PlanArena, root: NodeId) -> Result<DistributedFrame> {
        let spawner = self.spawner.clone().ok_or_else(|| {
            DbError::invalid_input("Parallel execution requires a spawner")
        })?;

        if self.config.dump_plans {
            info!(%root, plan = %arena.display(root)?, "plan submitted to workers");
        }

        let start = Instant::now();
        let num_init = init_lazy_distributed_args(arena, root, &spawner)?;
        debug!(%root, num_init, "initialized distributed arguments");

        let payload = serde_json::to_value(PlanPayload {
            arena: arena.clone(),
            root,
        })
        .context("Failed to serialize plan")?;

        let computation = Computation::new(EXECUTE_PLAN).with_params(["plan"]);
        let frame = spawner
            .submit(
                &computation,
                &mut [Arg::Value(Value::Json(payload))],
                &mut BTreeMap::new(),
            )?
            .into_frame()?;
        self.executed_plans += 1;

        if self.config.profile {
            info!(
                %root,
                elapsed_us = start.elapsed().as_micros() as u64,
                num_rows = frame.num_rows(),
                "executed plan on workers"
            );
        }
        Ok(frame)
    }

    /// Row count of the plan's output, if known without executing it.
    ///
    /// Plans reading distributed data are never converted here since the
    /// backend would need the full table.
    pub fn cardinality(&mut self, arena: &PlanArena, root: NodeId) -> Result<Option<usize>> {
        if let Some(rows) = static_cardinality(arena, root)? {
            return Ok(Some(rows));
        }
        if has_distributed_scan(arena, root)? {
            return Ok(None);
        }
        let plan = to_backend(arena, &mut self.backend, &LocalResolver, root)?;
        Ok(self.backend.cardinality(&plan))
    }

    /// Number of rows the plan produces.
    ///
    /// Only executes a count plan if the cardinality isn't already known.
    pub fn count(&mut self, arena: &mut PlanArena, root: NodeId) -> Result<usize> {
        if let Some(rows) = self.cardinality(arena, root)? {
            debug!(%root, rows, "count from known cardinality");
            return Ok(rows);
        }

        let count_plan = build_count_plan(arena, root)?;
        // Counting distributed data happens where the data lives.
        let batch = if self.spawner.is_some() && has_distributed_scan(arena, count_plan)? {
            self.execute_distributed(arena, count_plan)?.to_batch()?
        } else {
            self.execute(arena, count_plan)?.into_batch()?
        };

        // One row locally, one row per rank when distributed.
        let counts = batch
            .column(0)
            .required("count column")?;
        let mut total = 0;
        for value in counts {
            total += value.try_as_usize().ok_or_else(|| {
                DbError::backend("Count plan returned a non-integer value")
                    .with_field("value", value)
            })?;
        }
        Ok(total)
    }

    /// Node counts before and after optimization.
    ///
    /// Distributed scans are converted with empty tables.
    pub fn statistics(&mut self, arena: &PlanArena, root: NodeId) -> Result<PlanStatistics> {
        let plan = to_backend(arena, &mut self.backend, &SchemaOnlyResolver, root)?;
        let pre_optimize = self.backend.count_nodes(&plan);
        let plan = self.backend.optimize(plan)?;
        let post_optimize = self.backend.count_nodes(&plan);
        Ok(PlanStatistics {
            pre_optimize,
            post_optimize,
        })
    }
}

/// Row count implied by the plan itself.
pub fn static_cardinality(arena: &PlanArena, root: NodeId) -> Result<Option<usize>> {
    if arena.is_expression(root) {
        return Ok(None);
    }
    let rows = match arena.operator(root)? {
        LogicalOperator::FrameReadSeq(scan) => Some(scan.data.num_rows()),
        LogicalOperator::FrameReadParallel(scan) => Some(scan.num_rows),
        LogicalOperator::Projection(proj) => {
            for expr in &proj.exprs {
                if matches!(arena.expression(*expr)?, Expression::Aggregate(_)) {
                    return Ok(None);
                }
            }
            static_cardinality(arena, proj.source)?
        }
        LogicalOperator::Order(order) => static_cardinality(arena, order.source)?,
        LogicalOperator::Limit(limit) => static_cardinality(arena, limit.source)?
            .map(|rows| rows.saturating_sub(limit.offset).min(limit.limit)),
        _ => None,
    };
    Ok(rows)
}

/// `Projection(Aggregate(root, [], [count_star]), [#0])`
fn build_count_plan(arena: &mut PlanArena, root: NodeId) -> Result<NodeId> {
    let field = Field::new(COUNT_STAR, DataType::UInt64, false);
    // Reference one input column so it isn't pruned away.
    let input_columns = if arena.schema(root)?.schema.num_fields() > 0 {
        vec![0]
    } else {
        Vec::new()
    };
    let count = arena.aggregate_call(
        OutputSchema::single_column(field.clone()),
        root,
        COUNT_STAR,
        input_columns,
        false,
    )?;
    let agg = arena.push_operator(
        OutputSchema::frame(Schema::new([field.clone()])),
        LogicalOperator::Aggregate(LogicalAggregate {
            source: root,
            keys: Vec::new(),
            aggregates: vec![count],
        }),
    )?;
    let col = arena.column_ref(agg, 0)?;
    arena.projection(OutputSchema::single_column(field), agg, vec![col])
}

/// Call `f` for every distributed scan under `root`, visiting shared
/// sub-plans once.
fn for_each_distributed_scan<F>(arena: &PlanArena, root: NodeId, mut f: F) -> Result<()>
where
    F: FnMut(NodeId, &LogicalFrameReadParallel) -> Result<()>,
{
    let mut visited = HashSet::new();
    let mut stack = vec![root];

    while let Some(id) = stack.pop() {
        if !visited.insert(id) {
            continue;
        }
        let node = arena.get(id)?;
        if let NodeKind::Operator(LogicalOperator::FrameReadParallel(scan)) = &node.kind {
            f(id, scan)?;
        }
        for operand in node.operands() {
            operand.for_each_node(&mut |_role: NodeRole, child| stack.push(child));
        }
    }
    Ok(())
}

/// If any node under `root` reads distributed data.
pub fn has_distributed_scan(arena: &PlanArena, root: NodeId) -> Result<bool> {
    let mut found = false;
    for_each_distributed_scan(arena, root, |_, _| {
        found = true;
        Ok(())
    })?;
    Ok(found)
}

/// Make sure every distributed scan under `root` has its data on the
/// spawner's live group. Returns the number of arguments initialized.
///
/// Shared sub-plans are only visited once.
pub fn init_lazy_distributed_args(
    arena: &PlanArena,
    root: NodeId,
    spawner: &Spawner,
) -> Result<usize> {
    let mut num_init = 0;
    for_each_distributed_scan(arena, root, |id, scan| {
        let result_id = scan.arg.init(spawner)?;
        debug!(node = %id, %result_id, "initialized distributed scan");
        num_init += 1;
        Ok(())
    })?;
    Ok(num_init)
}

/// Register [`EXECUTE_PLAN`], running plans with backends made by
/// `factory`.
pub fn register_plan_computation<B, F>(registry: &mut ComputationRegistry, factory: F)
where
    B: PlanBackend,
    F: Fn() -> B + Send + Sync + 'static,
{
    registry.register(EXECUTE_PLAN, move |ctx, args, _kwargs| {
        let payload = match arg_at(&args, 0)? {
            Value::Json(json) => PlanPayload::deserialize(json).context("Failed to decode plan")?,
            other => {
                return Err(DbError::invalid_input("Expected a plan argument")
                    .with_field("got", other.kind_name()));
            }
        };

        let ctx = &*ctx;
        let lookup = |id: &ResultId| ctx.result(id).cloned();
        let resolver = PartitionResolver {
            rank: ctx.rank(),
            size: ctx.size(),
            lookup: &lookup,
        };

        let mut backend = factory();
        let plan = to_backend(&payload.arena, &mut backend, &resolver, payload.root)?;
        let plan = backend.optimize(plan)?;
        let schema = payload.arena.schema(payload.root)?;
        let batch = backend.execute(plan, schema.kind, &schema.schema)?;
        debug!(rank = ctx.rank(), num_rows = batch.num_rows(), "executed plan partition");

        Ok(Output::Distributed(batch))
    });
}
