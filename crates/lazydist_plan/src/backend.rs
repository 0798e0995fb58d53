//! Interface to the external optimizer and executor.

use std::collections::BTreeMap;
use std::fmt;

use lazydist_error::{DbError, Result};
use lazydist_spawn::lazy_arg::LazyDistributedArg;
use lazydist_spawn::value::ResultId;
use lazydist_types::batch::Batch;
use lazydist_types::field::Schema;
use lazydist_types::scalar::ScalarValue;

use crate::schema::{OutputKind, OutputSchema};

/// Argument to a backend node constructor.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendArg<H> {
    /// Handle the new node takes ownership of. The caller won't use it
    /// again.
    Owned(H),
    /// Handle the new node may only reference.
    Borrowed(H),
    List(Vec<BackendArg<H>>),
    Scalar(ScalarValue),
    Text(String),
    Index(usize),
    Indices(Vec<usize>),
    Bool(bool),
    Options(BTreeMap<String, String>),
    Data(Batch),
    Absent,
}

impl<H> BackendArg<H> {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Owned(_) => "owned",
            Self::Borrowed(_) => "borrowed",
            Self::List(_) => "list",
            Self::Scalar(_) => "scalar",
            Self::Text(_) => "text",
            Self::Index(_) => "index",
            Self::Indices(_) => "indices",
            Self::Bool(_) => "bool",
            Self::Options(_) => "options",
            Self::Data(_) => "data",
            Self::Absent => "absent",
        }
    }
}

/// External engine that builds, optimizes and runs plans.
///
/// Handles are opaque to the planner. Errors returned by the backend are
/// passed through to callers unchanged.
pub trait PlanBackend {
    type Handle: Clone + fmt::Debug;

    /// Construct a node by name, with arguments in the node's operand order.
    fn create_node(
        &mut self,
        name: &str,
        schema: &OutputSchema,
        args: Vec<BackendArg<Self::Handle>>,
    ) -> Result<Self::Handle>;

    fn optimize(&mut self, plan: Self::Handle) -> Result<Self::Handle>;

    fn execute(&mut self, plan: Self::Handle, kind: OutputKind, schema: &Schema) -> Result<Batch>;

    fn count_nodes(&self, plan: &Self::Handle) -> usize;

    /// Row count of the plan's output if known without executing it.
    fn cardinality(&self, plan: &Self::Handle) -> Option<usize>;

    /// Backend specific rendering of a plan.
    fn explain(&self, _plan: &Self::Handle) -> Option<String> {
        None
    }
}

/// Provides the table behind a scan of in-memory data.
pub trait DataResolver {
    /// Data held directly in the plan.
    fn resolve_sequential(&self, data: &Batch) -> Result<Batch>;

    /// Data referenced through a distributed argument.
    fn resolve_distributed(&self, arg: &LazyDistributedArg) -> Result<Batch>;
}

/// Resolver for executing in the coordinator process. Sees whole tables.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalResolver;

impl DataResolver for LocalResolver {
    fn resolve_sequential(&self, data: &Batch) -> Result<Batch> {
        Ok(data.clone())
    }

    fn resolve_distributed(&self, arg: &LazyDistributedArg) -> Result<Batch> {
        arg.local_batch()
    }
}

/// Resolver for inspecting a plan without running it.
///
/// Distributed arguments resolve to an empty table with the frame's schema
/// so nothing is gathered from the workers.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchemaOnlyResolver;

impl DataResolver for SchemaOnlyResolver {
    fn resolve_sequential(&self, data: &Batch) -> Result<Batch> {
        Ok(data.clone())
    }

    fn resolve_distributed(&self, arg: &LazyDistributedArg) -> Result<Batch> {
        let schema = arg.schema().ok_or_else(|| {
            DbError::internal("Distributed argument has no local schema")
        })?;
        Ok(Batch::empty(schema))
    }
}

/// Resolver for executing on one rank of a process group.
///
/// In-plan data is split evenly so each rank scans its own block.
/// Distributed arguments resolve to this rank's stored partition.
pub struct PartitionResolver<'a> {
    pub rank: usize,
    pub size: usize,
    pub lookup: &'a dyn Fn(&ResultId) -> Option<Batch>,
}

impl DataResolver for PartitionResolver<'_> {
    fn resolve_sequential(&self, data: &Batch) -> Result<Batch> {
        let mut parts = data.split_even(self.size)?;
        if self.rank >= parts.len() {
            return Err(DbError::internal("Rank out of range for partitioning")
                .with_field("rank", self.rank)
                .with_field("size", self.size));
        }
        Ok(parts.swap_remove(self.rank))
    }

    fn resolve_distributed(&self, arg: &LazyDistributedArg) -> Result<Batch> {
        let result_id = arg.result_id().ok_or_else(|| {
            DbError::internal("Distributed argument was not initialized before submit")
        })?;
        (self.lookup)(&result_id).ok_or_else(|| {
            DbError::protocol("Result not found on worker")
                .with_field("result_id", &result_id)
                .with_field("rank", self.rank)
        })
    }
}
