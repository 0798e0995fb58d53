use lazydist_types::scalar::ScalarValue;
use serde::{Deserialize, Serialize};

use crate::arena::NodeId;

/// Call to an externally defined row-wise function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalarFunctionExpr {
    pub source: NodeId,
    /// Identifier the backend resolves the function by.
    pub function: String,
    /// Extra arguments passed on every call.
    pub args: Vec<ScalarValue>,
    /// Columns of the source the function reads.
    pub input_columns: Vec<usize>,
    /// Function uses the backend's native calling convention.
    pub is_native: bool,
    /// Function keeps state across rows.
    pub has_state: bool,
}
