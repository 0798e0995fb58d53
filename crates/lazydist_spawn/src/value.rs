use std::collections::BTreeMap;
use std::fmt;

use lazydist_types::batch::Batch;
use lazydist_types::scalar::ScalarValue;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a result partition stored on every worker of a group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultId(String);

impl ResultId {
    pub fn new(id: impl Into<String>) -> Self {
        ResultId(id.into())
    }

    /// Id for the `leaf`-th distributed output of a call.
    ///
    /// Every rank derives the same id without talking to the others.
    pub fn for_output(call_id: Uuid, leaf: usize) -> Self {
        ResultId(format!("{call_id}-{leaf}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResultId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reference to a function registered on the workers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionRef {
    pub name: String,
}

impl FunctionRef {
    pub fn new(name: impl Into<String>) -> Self {
        FunctionRef { name: name.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TableSource {
    Data(Batch),
    /// Table read by the workers themselves.
    Path(String),
}

/// Named tables plus catalog information, as seen by a worker.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TableContext {
    pub tables: BTreeMap<String, TableSource>,
    pub catalog: Option<String>,
    pub default_tz: Option<String>,
}

/// A value that can be handed to a computation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Scalar(ScalarValue),
    Table(Batch),
    Tuple(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Function(FunctionRef),
    Context(TableContext),
    /// Opaque structured payload, passed through untouched.
    Json(serde_json::Value),
}

impl Value {
    pub fn as_table(&self) -> Option<&Batch> {
        match self {
            Value::Table(batch) => Some(batch),
            _ => None,
        }
    }

    pub fn into_table(self) -> Option<Batch> {
        match self {
            Value::Table(batch) => Some(batch),
            _ => None,
        }
    }

    pub fn as_scalar(&self) -> Option<&ScalarValue> {
        match self {
            Value::Scalar(v) => Some(v),
            _ => None,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "Null",
            Value::Scalar(_) => "Scalar",
            Value::Table(_) => "Table",
            Value::Tuple(_) => "Tuple",
            Value::Map(_) => "Map",
            Value::Function(_) => "Function",
            Value::Context(_) => "Context",
            Value::Json(_) => "Json",
        }
    }
}

impl From<ScalarValue> for Value {
    fn from(value: ScalarValue) -> Self {
        Value::Scalar(value)
    }
}

impl From<Batch> for Value {
    fn from(value: Batch) -> Self {
        Value::Table(value)
    }
}
