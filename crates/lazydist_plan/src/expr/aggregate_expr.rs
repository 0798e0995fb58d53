use serde::{Deserialize, Serialize};

use crate::arena::NodeId;

/// Name of the aggregate counting all rows.
pub const COUNT_STAR: &str = "count_star";

/// Call to an aggregate function over columns of the source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateExpr {
    pub source: NodeId,
    pub function: String,
    pub input_columns: Vec<usize>,
    /// Skip nulls in the input.
    pub dropna: bool,
}
