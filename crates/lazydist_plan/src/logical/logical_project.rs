use serde::{Deserialize, Serialize};

use crate::arena::NodeId;

/// Computes one output column per expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalProjection {
    pub source: NodeId,
    pub exprs: Vec<NodeId>,
}

/// Keeps rows for which the predicate is true.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalFilter {
    pub source: NodeId,
    pub predicate: NodeId,
}
