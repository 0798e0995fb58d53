//! Queries on projection nodes.

use lazydist_error::{DbError, Result};

use crate::arena::{NodeId, PlanArena};
use crate::expr::Expression;
use crate::logical::logical_project::LogicalProjection;
use crate::logical::operator::LogicalOperator;

fn as_projection(arena: &PlanArena, id: NodeId) -> Result<Option<&LogicalProjection>> {
    if arena.is_expression(id) {
        return Ok(None);
    }
    match arena.operator(id)? {
        LogicalOperator::Projection(proj) => Ok(Some(proj)),
        _ => Ok(None),
    }
}

fn is_column(arena: &PlanArena, id: NodeId) -> Result<bool> {
    Ok(matches!(arena.expression(id)?, Expression::Column(_)))
}

/// If `id` is a projection with exactly one expression.
pub fn is_single_projection(arena: &PlanArena, id: NodeId) -> Result<bool> {
    Ok(as_projection(arena, id)?.is_some_and(|proj| proj.exprs.len() == 1))
}

/// If `id` is a projection of column references only.
pub fn is_colref_projection(arena: &PlanArena, id: NodeId) -> Result<bool> {
    match as_projection(arena, id)? {
        Some(proj) => {
            for expr in &proj.exprs {
                if !is_column(arena, *expr)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        None => Ok(false),
    }
}

pub fn is_single_colref_projection(arena: &PlanArena, id: NodeId) -> Result<bool> {
    match as_projection(arena, id)? {
        Some(LogicalProjection { exprs, .. }) if exprs.len() == 1 => is_column(arena, exprs[0]),
        _ => Ok(false),
    }
}

/// The only expression of a single projection.
pub fn single_projection_expr(arena: &PlanArena, id: NodeId) -> Result<NodeId> {
    match as_projection(arena, id)? {
        Some(LogicalProjection { exprs, .. }) if exprs.len() == 1 => Ok(exprs[0]),
        _ => Err(DbError::plan("Expected a projection with a single expression")
            .with_field("node", id)),
    }
}

/// Source of a single projection, or the node itself if it already produces
/// a single column.
pub fn single_projection_source_if_present(arena: &PlanArena, id: NodeId) -> Result<NodeId> {
    if let Some(proj) = as_projection(arena, id)? {
        if proj.exprs.len() == 1 {
            return Ok(proj.source);
        }
    }
    if !arena.schema(id)?.is_single_column() {
        return Err(DbError::plan("Expected a single column node").with_field("node", id));
    }
    Ok(id)
}
