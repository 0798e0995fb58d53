use std::fmt::Write as _;

use lazydist_error::{DbError, Result};

use super::explainable::{ColumnIndexes, ExplainEntry, Explainable};
use crate::arena::{NodeId, PlanArena};
use crate::expr::Expression;
use crate::expr::binary_expr::BinaryOperand;
use crate::expr::unary_expr::UnaryOperator;
use crate::logical::operator::LogicalOperator;

const INDENT: &str = "  ";

impl PlanArena {
    /// Render the plan rooted at `root` as an indented tree, one operator
    /// per line.
    ///
    /// Expressions are printed inline in short form, column references as
    /// `#i`.
    pub fn display(&self, root: NodeId) -> Result<String> {
        let mut out = String::new();
        self.display_inner(root, 0, &mut out)?;
        Ok(out)
    }

    fn display_inner(&self, id: NodeId, depth: usize, out: &mut String) -> Result<()> {
        let (entry, children) = if self.is_expression(id) {
            let expr = self.expression(id)?;
            let entry = ExplainEntry::new(expr.name()).with_value("expr", format_expr(self, id)?);
            (entry, vec![self.expr_source(id)?])
        } else {
            let op = self.operator(id)?;
            (op.explain_entry(self)?, op.inputs())
        };

        writeln!(out, "{}{entry}", INDENT.repeat(depth))
            .map_err(|_| DbError::internal("Failed to format plan"))?;
        for child in children {
            self.display_inner(child, depth + 1, out)?;
        }
        Ok(())
    }
}

/// Short form of an expression.
pub fn format_expr(arena: &PlanArena, id: NodeId) -> Result<String> {
    let s = match arena.expression(id)? {
        Expression::Column(col) => format!("#{}", col.column),
        Expression::Constant(constant) => constant.value.to_string(),
        Expression::Null(_) => "NULL".to_string(),
        Expression::Unary(unary) => {
            let input = format_expr(arena, unary.input)?;
            match unary.op {
                UnaryOperator::Negate => format!("{}{input}", unary.op),
                UnaryOperator::Not => format!("{} {input}", unary.op),
                UnaryOperator::IsNull | UnaryOperator::IsNotNull => {
                    format!("{input} {}", unary.op)
                }
            }
        }
        Expression::Binary(binary) => format!(
            "({} {} {})",
            format_operand(arena, &binary.lhs)?,
            binary.op,
            format_operand(arena, &binary.rhs)?
        ),
        Expression::Aggregate(agg) => {
            format!("{}({})", agg.function, ColumnIndexes(&agg.input_columns))
        }
        Expression::ScalarFunction(func) => {
            format!("{}({})", func.function, ColumnIndexes(&func.input_columns))
        }
    };
    Ok(s)
}

fn format_operand(arena: &PlanArena, operand: &BinaryOperand) -> Result<String> {
    match operand {
        BinaryOperand::Expr(id) => format_expr(arena, *id),
        BinaryOperand::Scalar(value) => Ok(value.to_string()),
    }
}

fn format_exprs(arena: &PlanArena, ids: &[NodeId]) -> Result<Vec<String>> {
    ids.iter().map(|id| format_expr(arena, *id)).collect()
}

impl Explainable for LogicalOperator {
    fn explain_entry(&self, arena: &PlanArena) -> Result<ExplainEntry> {
        let ent = ExplainEntry::new(self.name());
        let ent = match self {
            Self::Projection(n) => ent.with_values("exprs", format_exprs(arena, &n.exprs)?),
            Self::Filter(n) => ent.with_value("predicate", format_expr(arena, n.predicate)?),
            Self::Aggregate(n) => ent
                .with_value("keys", ColumnIndexes(&n.keys))
                .with_values("aggregates", format_exprs(arena, &n.aggregates)?),
            Self::Distinct(n) => ent.with_values("exprs", format_exprs(arena, &n.exprs)?),
            Self::ComparisonJoin(n) => ent
                .with_value("join_type", n.join_type)
                .with_values("conditions", &n.conditions),
            Self::SetOperation(n) => ent.with_value("kind", n.kind),
            Self::Limit(n) => ent
                .with_value("limit", n.limit)
                .with_value("offset", n.offset),
            Self::Order(n) => ent.with_values("keys", &n.keys),
            Self::ParquetRead(n) => ent.with_value("path", &n.path),
            Self::FrameReadSeq(n) => ent.with_value("num_rows", n.data.num_rows()),
            Self::FrameReadParallel(n) => ent
                .with_value("num_rows", n.num_rows)
                .with_optional_value("result_id", n.arg.result_id()),
            Self::IcebergRead(n) => ent
                .with_value("table", &n.table_identifier)
                .with_value("catalog", &n.catalog_name)
                .with_optional_value("row_filter", n.row_filter.as_ref())
                .with_optional_value("snapshot_id", n.snapshot_id),
            Self::ParquetWrite(n) => ent
                .with_value("path", &n.path)
                .with_value("compression", &n.compression),
            Self::IcebergWrite(n) => ent.with_value("table_location", &n.table_location),
            Self::VectorStoreWrite(n) => ent
                .with_value("bucket", &n.bucket)
                .with_value("index", &n.index)
                .with_optional_value("region", n.region.as_ref()),
        };
        Ok(ent)
    }
}
