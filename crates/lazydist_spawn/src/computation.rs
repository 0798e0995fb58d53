//! Computations that can be run on a process group.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use hashbrown::HashMap;
use lazydist_error::{DbError, Result};
use lazydist_types::batch::Batch;
use serde::{Deserialize, Serialize};

use crate::message::OutputDistribution;
use crate::value::{FunctionRef, ResultId, Value};
use crate::worker::ResultStore;

/// Options controlling how arguments are marshaled for a computation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ComputationConfig {
    /// Parameters whose distributable values are sent whole to every rank.
    pub replicated: Vec<String>,
    /// Parameters whose values arrive distributed. Extended during
    /// marshaling with every scattered or broadcast parameter.
    pub distributed_block: Vec<String>,
    /// Variables to forward to workers for this call.
    pub propagate_env: Vec<String>,
}

/// A named computation plus its configuration.
///
/// The name must be registered in the workers' [`ComputationRegistry`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Computation {
    pub name: String,
    /// Names of positional parameters.
    pub params: Vec<String>,
    pub config: ComputationConfig,
}

impl Computation {
    pub fn new(name: impl Into<String>) -> Self {
        Computation {
            name: name.into(),
            params: Vec::new(),
            config: ComputationConfig::default(),
        }
    }

    pub fn with_params<S: Into<String>>(mut self, params: impl IntoIterator<Item = S>) -> Self {
        self.params = params.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_replicated<S: Into<String>>(
        mut self,
        params: impl IntoIterator<Item = S>,
    ) -> Self {
        self.config.replicated = params.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_propagate_env<S: Into<String>>(
        mut self,
        vars: impl IntoIterator<Item = S>,
    ) -> Self {
        self.config.propagate_env = vars.into_iter().map(Into::into).collect();
        self
    }

    /// Name of the positional parameter at `idx`.
    pub fn param_name(&self, idx: usize) -> String {
        match self.params.get(idx) {
            Some(name) => name.clone(),
            None => format!("arg{idx}"),
        }
    }

    pub fn is_replicated(&self, param: &str) -> bool {
        self.config.replicated.iter().any(|p| p == param)
    }
}

/// Output of a computation on a single rank.
#[derive(Debug, Clone, PartialEq)]
pub enum Output {
    /// Same value on every rank. Only rank 0's copy is returned.
    Replicated(Value),
    /// This rank's partition of a distributed table.
    Distributed(Batch),
    Tuple(Vec<Output>),
    Map(BTreeMap<String, Output>),
}

impl Output {
    pub fn distribution(&self) -> OutputDistribution {
        match self {
            Output::Replicated(_) => OutputDistribution::Replicated,
            Output::Distributed(_) => OutputDistribution::Distributed,
            Output::Tuple(items) => {
                OutputDistribution::Tuple(items.iter().map(|o| o.distribution()).collect())
            }
            Output::Map(items) => OutputDistribution::Map(
                items
                    .iter()
                    .map(|(k, o)| (k.clone(), o.distribution()))
                    .collect(),
            ),
        }
    }
}

/// State available to a computation while it runs on a worker.
#[derive(Debug)]
pub struct CallContext<'a> {
    pub(crate) rank: usize,
    pub(crate) size: usize,
    pub(crate) env: &'a BTreeMap<String, String>,
    pub(crate) distributed: &'a [String],
    pub(crate) registry: &'a ComputationRegistry,
    pub(crate) results: &'a mut ResultStore,
}

impl CallContext<'_> {
    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Variable forwarded by the coordinator for this call.
    pub fn env_var(&self, key: &str) -> Option<&str> {
        self.env.get(key).map(|s| s.as_str())
    }

    /// If the parameter's value arrived as a partition instead of a full
    /// copy.
    pub fn is_distributed(&self, param: &str) -> bool {
        self.distributed.iter().any(|p| p == param)
    }

    pub fn result(&self, id: &ResultId) -> Option<&Batch> {
        self.results.get(id)
    }

    pub fn results_mut(&mut self) -> &mut ResultStore {
        self.results
    }

    /// Call a function passed in as an argument.
    pub fn invoke(&mut self, func: &FunctionRef, args: Vec<Value>) -> Result<Output> {
        let f = self.registry.get(&func.name)?.clone();
        f(self, args, BTreeMap::new())
    }
}

pub type ComputationFn = Arc<
    dyn Fn(&mut CallContext<'_>, Vec<Value>, BTreeMap<String, Value>) -> Result<Output>
        + Send
        + Sync,
>;

/// Computations known to a worker, by name.
#[derive(Clone, Default)]
pub struct ComputationRegistry {
    functions: HashMap<String, ComputationFn>,
}

impl ComputationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry containing the built-in computations.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::builtins::register_builtins(&mut registry);
        registry
    }

    pub fn register<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(&mut CallContext<'_>, Vec<Value>, BTreeMap<String, Value>) -> Result<Output>
            + Send
            + Sync
            + 'static,
    {
        self.functions.insert(name.into(), Arc::new(f));
    }

    pub fn get(&self, name: &str) -> Result<&ComputationFn> {
        self.functions.get(name).ok_or_else(|| {
            DbError::invalid_input("Missing computation").with_field("name", name)
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }
}

impl fmt::Debug for ComputationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.functions.keys().collect();
        names.sort();
        f.debug_struct("ComputationRegistry")
            .field("functions", &names)
            .finish()
    }
}

/// Get the positional argument at `idx`.
pub fn arg_at(args: &[Value], idx: usize) -> Result<&Value> {
    args.get(idx).ok_or_else(|| {
        DbError::invalid_input("Missing positional argument")
            .with_field("idx", idx)
            .with_field("num_args", args.len())
    })
}

/// Get the table passed at `idx`.
pub fn table_arg(args: &[Value], idx: usize) -> Result<&Batch> {
    let value = arg_at(args, idx)?;
    value.as_table().ok_or_else(|| {
        DbError::invalid_input("Expected a table argument")
            .with_field("idx", idx)
            .with_field("got", value.kind_name())
    })
}
