use lazydist_types::scalar::ScalarValue;
use serde::{Deserialize, Serialize};

use crate::arena::NodeId;

/// A constant value.
///
/// The source is only tracked for source matching and isn't passed to the
/// backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstantExpr {
    pub source: NodeId,
    pub value: ScalarValue,
}

/// A typed null for the field at `field_idx` of the node's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NullExpr {
    pub source: NodeId,
    pub field_idx: usize,
}
