use std::collections::BTreeMap;

use lazydist_types::batch::Batch;

use crate::frame::DistributedFrame;
use crate::value::Value;

/// Argument passed to a computation from the coordinator.
#[derive(Debug, Clone)]
pub enum Arg {
    /// Plain value. Tables are distributable, everything else is passed
    /// through.
    Value(Value),
    /// Lazy frame. Referenced by result id if it already lives on the group.
    Frame(DistributedFrame),
    Tuple(Vec<Arg>),
    Context(ContextArg),
}

impl Arg {
    pub fn table(batch: Batch) -> Self {
        Arg::Value(Value::Table(batch))
    }

    pub fn as_frame(&self) -> Option<&DistributedFrame> {
        match self {
            Arg::Frame(frame) => Some(frame),
            _ => None,
        }
    }
}

impl From<Value> for Arg {
    fn from(value: Value) -> Self {
        Arg::Value(value)
    }
}

impl From<DistributedFrame> for Arg {
    fn from(value: DistributedFrame) -> Self {
        Arg::Frame(value)
    }
}

#[derive(Debug, Clone)]
pub enum ContextTable {
    Data(Batch),
    Frame(DistributedFrame),
    Path(String),
}

/// Named tables plus catalog information.
#[derive(Debug, Clone, Default)]
pub struct ContextArg {
    pub tables: BTreeMap<String, ContextTable>,
    pub catalog: Option<String>,
    pub default_tz: Option<String>,
}

impl ContextArg {
    pub fn with_table(mut self, name: impl Into<String>, table: ContextTable) -> Self {
        self.tables.insert(name.into(), table);
        self
    }
}
