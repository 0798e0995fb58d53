//! Source retargeting for expressions.
//!
//! A rewrite returning `None` means the expression can't be proven to mean
//! the same thing over the new source. Callers fall back to not fusing.

use lazydist_error::{DbError, Result};

use crate::arena::{NodeId, PlanArena};
use crate::expr::Expression;
use crate::expr::binary_expr::{BinaryExpr, BinaryOperand};
use crate::expr::column_expr::ColumnExpr;
use crate::expr::literal_expr::{ConstantExpr, NullExpr};
use crate::expr::scalar_function_expr::ScalarFunctionExpr;
use crate::expr::unary_expr::UnaryExpr;
use crate::logical::logical_project::LogicalProjection;
use crate::logical::operator::LogicalOperator;

/// Rewrite `expr` to be evaluated against `new_source`.
///
/// Returns `expr` itself if it's already over `new_source`.
pub fn replace_source(
    arena: &mut PlanArena,
    expr: NodeId,
    new_source: NodeId,
) -> Result<Option<NodeId>> {
    if arena.expr_source(expr)? == new_source {
        return Ok(Some(expr));
    }

    let schema = arena.schema(expr)?.clone();
    match arena.expression(expr)?.clone() {
        Expression::Column(col) => {
            let Some(proj) = projection_over(arena, new_source, col.source)? else {
                return Ok(None);
            };
            for (idx, proj_expr) in proj.exprs.iter().enumerate() {
                if let Expression::Column(proj_col) = arena.expression(*proj_expr)? {
                    if proj_col.source == col.source && proj_col.column == col.column {
                        let id = arena.push_expression(
                            schema,
                            Expression::Column(ColumnExpr {
                                source: new_source,
                                column: idx,
                            }),
                        )?;
                        return Ok(Some(id));
                    }
                }
            }
            Ok(None)
        }
        Expression::Constant(constant) => {
            if projection_over(arena, new_source, constant.source)?.is_none() {
                return Ok(None);
            }
            let id = arena.push_expression(
                schema,
                Expression::Constant(ConstantExpr {
                    source: new_source,
                    value: constant.value,
                }),
            )?;
            Ok(Some(id))
        }
        Expression::Null(null) => {
            if projection_over(arena, new_source, null.source)?.is_none() {
                return Ok(None);
            }
            let id = arena.push_expression(
                schema,
                Expression::Null(NullExpr {
                    source: new_source,
                    field_idx: null.field_idx,
                }),
            )?;
            Ok(Some(id))
        }
        Expression::Unary(unary) => match replace_source(arena, unary.input, new_source)? {
            Some(input) => {
                let id = arena.push_expression(
                    schema,
                    Expression::Unary(UnaryExpr {
                        input,
                        op: unary.op,
                    }),
                )?;
                Ok(Some(id))
            }
            None => Ok(None),
        },
        Expression::Binary(binary) => {
            let Some(lhs) = replace_operand(arena, &binary.lhs, new_source)? else {
                return Ok(None);
            };
            let Some(rhs) = replace_operand(arena, &binary.rhs, new_source)? else {
                return Ok(None);
            };
            let id = arena.push_expression(
                schema,
                Expression::Binary(BinaryExpr {
                    lhs,
                    rhs,
                    op: binary.op,
                }),
            )?;
            Ok(Some(id))
        }
        // Only the identity case is handled for these.
        Expression::Aggregate(_) | Expression::ScalarFunction(_) => Ok(None),
    }
}

fn replace_operand(
    arena: &mut PlanArena,
    operand: &BinaryOperand,
    new_source: NodeId,
) -> Result<Option<BinaryOperand>> {
    match operand {
        BinaryOperand::Expr(id) => {
            Ok(replace_source(arena, *id, new_source)?.map(BinaryOperand::Expr))
        }
        BinaryOperand::Scalar(_) => Ok(Some(operand.clone())),
    }
}

/// Returns the projection if `node` is a projection directly over `source`.
fn projection_over(
    arena: &PlanArena,
    node: NodeId,
    source: NodeId,
) -> Result<Option<LogicalProjection>> {
    match arena.operator(node) {
        Ok(LogicalOperator::Projection(proj)) if proj.source == source => Ok(Some(proj.clone())),
        Ok(_) => Ok(None),
        // Expressions are never valid sources.
        Err(_) if arena.is_expression(node) => Ok(None),
        Err(err) => Err(err),
    }
}

/// Bring both operands of a binary expression over the same source.
///
/// Tries moving `lhs` onto `rhs`'s source first, then the other way around.
/// Scalar operands need no matching.
pub fn match_binop_sources(
    arena: &mut PlanArena,
    lhs: BinaryOperand,
    rhs: BinaryOperand,
) -> Result<Option<(BinaryOperand, BinaryOperand)>> {
    let (BinaryOperand::Expr(lhs_id), BinaryOperand::Expr(rhs_id)) = (&lhs, &rhs) else {
        return Ok(Some((lhs, rhs)));
    };
    let (lhs_id, rhs_id) = (*lhs_id, *rhs_id);

    let rhs_source = arena.expr_source(rhs_id)?;
    if let Some(new_lhs) = replace_source(arena, lhs_id, rhs_source)? {
        return Ok(Some((BinaryOperand::Expr(new_lhs), rhs)));
    }

    let lhs_source = arena.expr_source(lhs_id)?;
    if let Some(new_rhs) = replace_source(arena, rhs_id, lhs_source)? {
        return Ok(Some((lhs, BinaryOperand::Expr(new_rhs))));
    }

    Ok(None)
}

/// Move scalar function calls nested in `expr` onto `new_source`, shifting
/// their input column by `col_offset`.
///
/// Other expressions are only rebuilt when one of their operands changed.
pub fn update_func_expr_source(
    arena: &mut PlanArena,
    expr: NodeId,
    new_source: NodeId,
    col_offset: usize,
) -> Result<NodeId> {
    let schema = arena.schema(expr)?.clone();
    match arena.expression(expr)?.clone() {
        Expression::ScalarFunction(func) => {
            if func.source == new_source {
                return Ok(expr);
            }
            let [input] = func.input_columns.as_slice() else {
                return Err(DbError::plan(
                    "Can only move a scalar function with a single input column",
                )
                .with_field("function", &func.function)
                .with_field("num_inputs", func.input_columns.len()));
            };
            arena.push_expression(
                schema,
                Expression::ScalarFunction(ScalarFunctionExpr {
                    source: new_source,
                    input_columns: vec![input + col_offset],
                    ..func
                }),
            )
        }
        Expression::Unary(unary) => {
            let input = update_func_expr_source(arena, unary.input, new_source, col_offset)?;
            if input == unary.input {
                return Ok(expr);
            }
            arena.push_expression(schema, Expression::Unary(UnaryExpr { input, ..unary }))
        }
        Expression::Binary(binary) => {
            let lhs = update_operand(arena, &binary.lhs, new_source, col_offset)?;
            let rhs = update_operand(arena, &binary.rhs, new_source, col_offset)?;
            if lhs == binary.lhs && rhs == binary.rhs {
                return Ok(expr);
            }
            arena.push_expression(
                schema,
                Expression::Binary(BinaryExpr {
                    lhs,
                    rhs,
                    op: binary.op,
                }),
            )
        }
        _ => Ok(expr),
    }
}

fn update_operand(
    arena: &mut PlanArena,
    operand: &BinaryOperand,
    new_source: NodeId,
    col_offset: usize,
) -> Result<BinaryOperand> {
    match operand {
        BinaryOperand::Expr(id) => Ok(BinaryOperand::Expr(update_func_expr_source(
            arena, *id, new_source, col_offset,
        )?)),
        BinaryOperand::Scalar(_) => Ok(operand.clone()),
    }
}

#[cfg(test)]
mod tests {
    use lazydist_error::ErrorKind;
    use lazydist_types::scalar::ScalarValue;

    use super::*;
    use crate::expr::binary_expr::BinaryOperator;
    use crate::expr::unary_expr::UnaryOperator;
    use crate::testutil::{bool_column, int_batch, int_column};

    #[test]
    fn same_source_is_identity() {
        let mut arena = PlanArena::new();
        let src = arena.frame_read_seq(int_batch(3)).unwrap();
        let col = arena.column_ref(src, 0).unwrap();
        let cmp = arena
            .binary(bool_column(), col, ScalarValue::Int64(2), BinaryOperator::Gt)
            .unwrap();
        let neg = arena.unary(bool_column(), cmp, UnaryOperator::Not).unwrap();
        let agg = arena
            .aggregate_call(int_column("s"), src, "sum", vec![0], true)
            .unwrap();
        let before = arena.len();

        for expr in [col, cmp, neg, agg] {
            assert_eq!(Some(expr), replace_source(&mut arena, expr, src).unwrap());
        }
        assert_eq!(before, arena.len());
    }

    #[test]
    fn column_retargeted_through_projection() {
        let mut arena = PlanArena::new();
        let src = arena.frame_read_seq(int_batch(3)).unwrap();
        // Projection reorders columns: [b, a]
        let proj = arena.select_columns(src, &[1, 0]).unwrap();
        let col_a = arena.column_ref(src, 0).unwrap();

        let new = replace_source(&mut arena, col_a, proj).unwrap().unwrap();
        assert_ne!(col_a, new);
        match arena.expression(new).unwrap() {
            Expression::Column(c) => {
                assert_eq!(proj, c.source);
                assert_eq!(1, c.column);
            }
            other => panic!("unexpected expression: {other:?}"),
        }
        assert_eq!(arena.schema(col_a).unwrap(), arena.schema(new).unwrap());
    }

    #[test]
    fn column_missing_from_projection() {
        let mut arena = PlanArena::new();
        let src = arena.frame_read_seq(int_batch(3)).unwrap();
        let proj = arena.select_columns(src, &[1]).unwrap();
        let col_a = arena.column_ref(src, 0).unwrap();
        assert_eq!(None, replace_source(&mut arena, col_a, proj).unwrap());
    }

    #[test]
    fn column_over_unrelated_source() {
        let mut arena = PlanArena::new();
        let src = arena.frame_read_seq(int_batch(3)).unwrap();
        let other = arena.frame_read_seq(int_batch(3)).unwrap();
        let col = arena.column_ref(src, 0).unwrap();
        assert_eq!(None, replace_source(&mut arena, col, other).unwrap());
    }

    #[test]
    fn constant_and_null_retargeted_to_projection() {
        let mut arena = PlanArena::new();
        let src = arena.frame_read_seq(int_batch(3)).unwrap();
        let proj = arena.select_columns(src, &[0]).unwrap();
        let other = arena.frame_read_seq(int_batch(1)).unwrap();
        let constant = arena
            .constant(int_column("c"), src, ScalarValue::Int64(5))
            .unwrap();
        let null = arena.null(int_column("n"), src, 0).unwrap();

        let new = replace_source(&mut arena, constant, proj).unwrap().unwrap();
        assert_eq!(
            &Expression::Constant(ConstantExpr {
                source: proj,
                value: ScalarValue::Int64(5)
            }),
            arena.expression(new).unwrap()
        );
        let new = replace_source(&mut arena, null, proj).unwrap().unwrap();
        assert_eq!(proj, arena.expr_source(new).unwrap());

        assert_eq!(None, replace_source(&mut arena, constant, other).unwrap());
    }

    #[test]
    fn binary_rebuilt_over_projection() {
        let mut arena = PlanArena::new();
        let src = arena.frame_read_seq(int_batch(3)).unwrap();
        let proj = arena.select_columns(src, &[1, 0]).unwrap();
        let a = arena.column_ref(src, 0).unwrap();
        let b = arena.column_ref(src, 1).unwrap();
        let sum = arena
            .binary(int_column("sum"), a, b, BinaryOperator::Add)
            .unwrap();
        let cmp = arena
            .binary(bool_column(), sum, ScalarValue::Int64(4), BinaryOperator::Lt)
            .unwrap();

        let new = replace_source(&mut arena, cmp, proj).unwrap().unwrap();
        assert_eq!(proj, arena.expr_source(new).unwrap());
        let Expression::Binary(new_cmp) = arena.expression(new).unwrap().clone() else {
            panic!("expected binary");
        };
        assert_eq!(BinaryOperand::Scalar(ScalarValue::Int64(4)), new_cmp.rhs);
        let Some(new_sum) = new_cmp.lhs.as_expr() else {
            panic!("expected expression operand");
        };
        let Expression::Binary(new_sum) = arena.expression(new_sum).unwrap() else {
            panic!("expected binary");
        };
        let columns: Vec<_> = new_sum
            .expr_operands()
            .map(|id| match arena.expression(id).unwrap() {
                Expression::Column(c) => c.column,
                other => panic!("unexpected expression: {other:?}"),
            })
            .collect();
        assert_eq!(vec![1, 0], columns);
    }

    #[test]
    fn composite_not_replaceable_when_child_is_not() {
        let mut arena = PlanArena::new();
        let src = arena.frame_read_seq(int_batch(3)).unwrap();
        let proj = arena.select_columns(src, &[1]).unwrap();
        let a = arena.column_ref(src, 0).unwrap();
        let b = arena.column_ref(src, 1).unwrap();
        let eq = arena.binary(bool_column(), a, b, BinaryOperator::Eq).unwrap();
        let not = arena.unary(bool_column(), eq, UnaryOperator::Not).unwrap();

        assert_eq!(None, replace_source(&mut arena, eq, proj).unwrap());
        assert_eq!(None, replace_source(&mut arena, not, proj).unwrap());
    }

    #[test]
    fn aggregate_and_function_are_conservative() {
        let mut arena = PlanArena::new();
        let src = arena.frame_read_seq(int_batch(3)).unwrap();
        let proj = arena.select_columns(src, &[0, 1]).unwrap();
        let agg = arena
            .aggregate_call(int_column("s"), src, "sum", vec![0], true)
            .unwrap();
        let func = arena
            .push_expression(
                int_column("f"),
                Expression::ScalarFunction(ScalarFunctionExpr {
                    source: src,
                    function: "udf".to_string(),
                    args: Vec::new(),
                    input_columns: vec![0],
                    is_native: false,
                    has_state: false,
                }),
            )
            .unwrap();

        assert_eq!(None, replace_source(&mut arena, agg, proj).unwrap());
        assert_eq!(None, replace_source(&mut arena, func, proj).unwrap());
    }

    #[test]
    fn match_binop_moves_lhs_first() {
        let mut arena = PlanArena::new();
        let src = arena.frame_read_seq(int_batch(3)).unwrap();
        let proj = arena.select_columns(src, &[0, 1]).unwrap();
        let over_src = arena.column_ref(src, 1).unwrap();
        let over_proj = arena.column_ref(proj, 0).unwrap();

        let (lhs, rhs) = match_binop_sources(&mut arena, over_src.into(), over_proj.into())
            .unwrap()
            .unwrap();
        assert_eq!(BinaryOperand::Expr(over_proj), rhs);
        let lhs = lhs.as_expr().unwrap();
        assert_eq!(proj, arena.expr_source(lhs).unwrap());

        // Swapped, lhs can't move onto src so rhs moves instead.
        let (lhs, rhs) = match_binop_sources(&mut arena, over_proj.into(), over_src.into())
            .unwrap()
            .unwrap();
        assert_eq!(BinaryOperand::Expr(over_proj), lhs);
        assert_eq!(proj, arena.expr_source(rhs.as_expr().unwrap()).unwrap());
    }

    #[test]
    fn match_binop_fails_for_unrelated_sources() {
        let mut arena = PlanArena::new();
        let a = arena.frame_read_seq(int_batch(3)).unwrap();
        let b = arena.frame_read_seq(int_batch(3)).unwrap();
        let lhs = arena.column_ref(a, 0).unwrap();
        let rhs = arena.column_ref(b, 0).unwrap();
        assert_eq!(
            None,
            match_binop_sources(&mut arena, lhs.into(), rhs.into()).unwrap()
        );
    }

    #[test]
    fn match_binop_with_scalar() {
        let mut arena = PlanArena::new();
        let a = arena.frame_read_seq(int_batch(3)).unwrap();
        let col = arena.column_ref(a, 0).unwrap();
        let scalar = BinaryOperand::Scalar(ScalarValue::Int64(1));
        assert_eq!(
            Some((BinaryOperand::Expr(col), scalar.clone())),
            match_binop_sources(&mut arena, col.into(), scalar).unwrap()
        );
    }

    #[test]
    fn update_nested_function_source() {
        let mut arena = PlanArena::new();
        let src = arena.frame_read_seq(int_batch(3)).unwrap();
        let wider = arena.select_columns(src, &[0, 0, 1]).unwrap();
        let func = arena
            .push_expression(
                int_column("f"),
                Expression::ScalarFunction(ScalarFunctionExpr {
                    source: src,
                    function: "udf".to_string(),
                    args: vec![ScalarValue::Int64(3)],
                    input_columns: vec![1],
                    is_native: true,
                    has_state: false,
                }),
            )
            .unwrap();
        let plus = arena
            .binary(int_column("p"), func, ScalarValue::Int64(1), BinaryOperator::Add)
            .unwrap();

        let new = update_func_expr_source(&mut arena, plus, wider, 1).unwrap();
        assert_ne!(plus, new);
        assert_eq!(wider, arena.expr_source(new).unwrap());
        let Expression::Binary(new_plus) = arena.expression(new).unwrap() else {
            panic!("expected binary");
        };
        let new_func = new_plus.lhs.as_expr().unwrap();
        match arena.expression(new_func).unwrap() {
            Expression::ScalarFunction(f) => {
                assert_eq!(vec![2], f.input_columns);
                assert_eq!(vec![ScalarValue::Int64(3)], f.args);
                assert!(f.is_native);
            }
            other => panic!("unexpected expression: {other:?}"),
        }
    }

    #[test]
    fn update_without_functions_is_unchanged() {
        let mut arena = PlanArena::new();
        let src = arena.frame_read_seq(int_batch(3)).unwrap();
        let other = arena.frame_read_seq(int_batch(3)).unwrap();
        let col = arena.column_ref(src, 0).unwrap();
        let neg = arena.unary(int_column("n"), col, UnaryOperator::Negate).unwrap();
        assert_eq!(neg, update_func_expr_source(&mut arena, neg, other, 0).unwrap());
    }

    #[test]
    fn update_multi_input_function_fails() {
        let mut arena = PlanArena::new();
        let src = arena.frame_read_seq(int_batch(3)).unwrap();
        let other = arena.frame_read_seq(int_batch(3)).unwrap();
        let func = arena
            .push_expression(
                int_column("f"),
                Expression::ScalarFunction(ScalarFunctionExpr {
                    source: src,
                    function: "udf".to_string(),
                    args: Vec::new(),
                    input_columns: vec![0, 1],
                    is_native: false,
                    has_state: false,
                }),
            )
            .unwrap();
        let err = update_func_expr_source(&mut arena, func, other, 0).unwrap_err();
        assert_eq!(ErrorKind::Plan, err.kind());
    }
}
