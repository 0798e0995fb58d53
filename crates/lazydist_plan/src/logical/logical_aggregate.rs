use serde::{Deserialize, Serialize};

use crate::arena::NodeId;

/// Groups by key columns and computes aggregate expressions per group.
///
/// No keys means a single group over all input rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalAggregate {
    pub source: NodeId,
    pub keys: Vec<usize>,
    pub aggregates: Vec<NodeId>,
}

/// Deduplicates rows on the given expressions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalDistinct {
    pub source: NodeId,
    pub exprs: Vec<NodeId>,
}
