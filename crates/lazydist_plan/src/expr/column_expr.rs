use serde::{Deserialize, Serialize};

use crate::arena::NodeId;

/// Reference to a column of the source relation by position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnExpr {
    pub source: NodeId,
    pub column: usize,
}
