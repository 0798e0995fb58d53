pub mod aggregate_expr;
pub mod binary_expr;
pub mod column_expr;
pub mod literal_expr;
pub mod scalar_function_expr;
pub mod unary_expr;

use aggregate_expr::AggregateExpr;
use binary_expr::{BinaryExpr, BinaryKind, BinaryOperand};
use column_expr::ColumnExpr;
use literal_expr::{ConstantExpr, NullExpr};
use scalar_function_expr::ScalarFunctionExpr;
use serde::{Deserialize, Serialize};
use unary_expr::UnaryExpr;

use crate::arena::NodeId;
use crate::operand::Operand;

/// Single column expression evaluated against a source relation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expression {
    Column(ColumnExpr),
    Constant(ConstantExpr),
    Null(NullExpr),
    Unary(UnaryExpr),
    Binary(BinaryExpr),
    Aggregate(AggregateExpr),
    ScalarFunction(ScalarFunctionExpr),
}

impl Expression {
    /// Backend constructor name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Column(_) => "ColRefExpression",
            Self::Constant(_) => "ConstantExpression",
            Self::Null(_) => "NullExpression",
            Self::Unary(_) => "UnaryOpExpression",
            Self::Binary(b) => match b.op.kind() {
                BinaryKind::Arith => "ArithOpExpression",
                BinaryKind::Comparison => "ComparisonOpExpression",
                BinaryKind::Conjunction => "ConjunctionOpExpression",
            },
            Self::Aggregate(_) => "AggregateExpression",
            Self::ScalarFunction(_) => "ScalarFuncExpression",
        }
    }

    /// Source held directly by leaf expressions.
    ///
    /// Composite expressions return `None`, their source is the source of
    /// their expression operands.
    pub fn direct_source(&self) -> Option<NodeId> {
        match self {
            Self::Column(e) => Some(e.source),
            Self::Constant(e) => Some(e.source),
            Self::Null(e) => Some(e.source),
            Self::Aggregate(e) => Some(e.source),
            Self::ScalarFunction(e) => Some(e.source),
            Self::Unary(_) | Self::Binary(_) => None,
        }
    }

    /// Expression operands of composite expressions.
    pub fn child_exprs(&self) -> Vec<NodeId> {
        match self {
            Self::Unary(e) => vec![e.input],
            Self::Binary(e) => e.expr_operands().collect(),
            _ => Vec::new(),
        }
    }

    /// Operands passed to the backend, in order.
    pub fn operands(&self) -> Vec<Operand<'_>> {
        match self {
            Self::Column(e) => vec![Operand::Source(e.source), Operand::Index(e.column)],
            Self::Constant(e) => vec![Operand::Scalar(&e.value)],
            Self::Null(e) => vec![Operand::Index(e.field_idx)],
            Self::Unary(e) => vec![Operand::Expr(e.input), Operand::Text(e.op.as_str())],
            Self::Binary(e) => vec![
                binary_operand(&e.lhs),
                binary_operand(&e.rhs),
                Operand::Text(e.op.as_str()),
            ],
            Self::Aggregate(e) => vec![
                Operand::Source(e.source),
                Operand::Text(&e.function),
                Operand::Indices(&e.input_columns),
                Operand::Bool(e.dropna),
            ],
            Self::ScalarFunction(e) => vec![
                Operand::Source(e.source),
                Operand::Text(&e.function),
                Operand::List(e.args.iter().map(Operand::Scalar).collect()),
                Operand::Indices(&e.input_columns),
                Operand::Bool(e.is_native),
                Operand::Bool(e.has_state),
            ],
        }
    }
}

fn binary_operand(operand: &BinaryOperand) -> Operand<'_> {
    match operand {
        BinaryOperand::Expr(id) => Operand::Expr(*id),
        BinaryOperand::Scalar(v) => Operand::Scalar(v),
    }
}
