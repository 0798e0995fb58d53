use std::fmt;

use lazydist_types::scalar::ScalarValue;
use serde::{Deserialize, Serialize};

use crate::arena::NodeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryKind {
    Arith,
    Comparison,
    Conjunction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOperator {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
}

impl BinaryOperator {
    pub const fn kind(&self) -> BinaryKind {
        match self {
            Self::Add | Self::Sub | Self::Mul | Self::Div | Self::FloorDiv | Self::Mod => {
                BinaryKind::Arith
            }
            Self::Eq | Self::NotEq | Self::Lt | Self::LtEq | Self::Gt | Self::GtEq => {
                BinaryKind::Comparison
            }
            Self::And | Self::Or => BinaryKind::Conjunction,
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::FloorDiv => "//",
            Self::Mod => "%",
            Self::Eq => "=",
            Self::NotEq => "!=",
            Self::Lt => "<",
            Self::LtEq => "<=",
            Self::Gt => ">",
            Self::GtEq => ">=",
            Self::And => "AND",
            Self::Or => "OR",
        }
    }
}

impl fmt::Display for BinaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One side of a binary expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BinaryOperand {
    Expr(NodeId),
    Scalar(ScalarValue),
}

impl BinaryOperand {
    pub fn as_expr(&self) -> Option<NodeId> {
        match self {
            Self::Expr(id) => Some(*id),
            Self::Scalar(_) => None,
        }
    }
}

impl From<NodeId> for BinaryOperand {
    fn from(id: NodeId) -> Self {
        BinaryOperand::Expr(id)
    }
}

impl From<ScalarValue> for BinaryOperand {
    fn from(value: ScalarValue) -> Self {
        BinaryOperand::Scalar(value)
    }
}

/// Binary operator applied to two operands, at least one of them an
/// expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinaryExpr {
    pub lhs: BinaryOperand,
    pub rhs: BinaryOperand,
    pub op: BinaryOperator,
}

impl BinaryExpr {
    pub fn expr_operands(&self) -> impl Iterator<Item = NodeId> + '_ {
        [&self.lhs, &self.rhs].into_iter().filter_map(|o| o.as_expr())
    }
}
