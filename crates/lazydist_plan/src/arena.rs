use std::fmt;

use lazydist_error::{DbError, Result};
use lazydist_types::batch::Batch;
use lazydist_types::field::Schema;
use lazydist_types::scalar::ScalarValue;
use serde::{Deserialize, Serialize};

use crate::expr::Expression;
use crate::expr::aggregate_expr::AggregateExpr;
use crate::expr::binary_expr::{BinaryExpr, BinaryOperand, BinaryOperator};
use crate::expr::column_expr::ColumnExpr;
use crate::expr::literal_expr::{ConstantExpr, NullExpr};
use crate::expr::unary_expr::{UnaryExpr, UnaryOperator};
use crate::logical::logical_join::{JoinCondition, JoinType, LogicalComparisonJoin};
use crate::logical::logical_order::LogicalLimit;
use crate::logical::logical_project::{LogicalFilter, LogicalProjection};
use crate::logical::logical_scan::LogicalFrameReadSeq;
use crate::logical::operator::LogicalOperator;
use crate::operand::{NodeRole, Operand};
use crate::schema::OutputSchema;

/// Stable index of a node in a [`PlanArena`].
///
/// Node identity is the id, two structurally equal nodes pushed separately
/// are different nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum NodeKind {
    Operator(LogicalOperator),
    Expression(Expression),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanNode {
    pub schema: OutputSchema,
    pub kind: NodeKind,
}

impl PlanNode {
    pub fn name(&self) -> &'static str {
        match &self.kind {
            NodeKind::Operator(op) => op.name(),
            NodeKind::Expression(expr) => expr.name(),
        }
    }

    pub fn operands(&self) -> Vec<Operand<'_>> {
        match &self.kind {
            NodeKind::Operator(op) => op.operands(),
            NodeKind::Expression(expr) => expr.operands(),
        }
    }

    pub fn is_expression(&self) -> bool {
        matches!(self.kind, NodeKind::Expression(_))
    }
}

/// Append-only store of plan nodes.
///
/// Nodes only reference nodes pushed before them, so the plan is always a
/// DAG. Nodes are never modified once pushed, rewrites push new nodes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanArena {
    nodes: Vec<PlanNode>,
}

impl PlanArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: NodeId) -> Result<&PlanNode> {
        self.nodes.get(id.0).ok_or_else(|| {
            DbError::plan("Unknown plan node")
                .with_field("id", id)
                .with_field("num_nodes", self.nodes.len())
        })
    }

    pub fn schema(&self, id: NodeId) -> Result<&OutputSchema> {
        Ok(&self.get(id)?.schema)
    }

    pub fn operator(&self, id: NodeId) -> Result<&LogicalOperator> {
        match &self.get(id)?.kind {
            NodeKind::Operator(op) => Ok(op),
            NodeKind::Expression(expr) => Err(DbError::plan("Expected an operator node")
                .with_field("id", id)
                .with_field("got", expr.name())),
        }
    }

    pub fn expression(&self, id: NodeId) -> Result<&Expression> {
        match &self.get(id)?.kind {
            NodeKind::Expression(expr) => Ok(expr),
            NodeKind::Operator(op) => Err(DbError::plan("Expected an expression node")
                .with_field("id", id)
                .with_field("got", op.name())),
        }
    }

    pub fn is_expression(&self, id: NodeId) -> bool {
        self.nodes.get(id.0).is_some_and(|n| n.is_expression())
    }

    /// Resolve the relation an expression is evaluated against.
    pub fn expr_source(&self, id: NodeId) -> Result<NodeId> {
        let expr = self.expression(id)?;
        if let Some(source) = expr.direct_source() {
            return Ok(source);
        }
        match expr.child_exprs().first() {
            Some(child) => self.expr_source(*child),
            None => Err(DbError::plan("Expression has no expression operand").with_field("id", id)),
        }
    }

    pub fn push_operator(&mut self, schema: OutputSchema, op: LogicalOperator) -> Result<NodeId> {
        self.push(PlanNode {
            schema,
            kind: NodeKind::Operator(op),
        })
    }

    pub fn push_expression(&mut self, schema: OutputSchema, expr: Expression) -> Result<NodeId> {
        self.push(PlanNode {
            schema,
            kind: NodeKind::Expression(expr),
        })
    }

    /// Validate operands and append the node.
    fn push(&mut self, node: PlanNode) -> Result<NodeId> {
        let mut err = None;
        for operand in node.operands() {
            operand.for_each_node(&mut |role, id| {
                if err.is_none() {
                    err = self.check_operand(role, id).err();
                }
            });
        }
        if let Some(err) = err {
            return Err(err.with_field("node", node.name()));
        }

        if let NodeKind::Expression(Expression::Binary(binary)) = &node.kind {
            self.check_binary_sources(binary)?;
        }

        let id = NodeId(self.nodes.len());
        self.nodes.push(node);
        Ok(id)
    }

    fn check_operand(&self, role: NodeRole, id: NodeId) -> Result<()> {
        let node = self.get(id)?;
        match (role, node.is_expression()) {
            (NodeRole::Expr, true) | (NodeRole::Input | NodeRole::Source, false) => Ok(()),
            (NodeRole::Expr, false) => Err(DbError::plan("Operand must be an expression")
                .with_field("operand", id)
                .with_field("got", node.name())),
            (_, true) => Err(DbError::plan("Operand must be a relation")
                .with_field("operand", id)
                .with_field("got", node.name())),
        }
    }

    fn check_binary_sources(&self, binary: &BinaryExpr) -> Result<()> {
        let sources = binary
            .expr_operands()
            .map(|id| self.expr_source(id))
            .collect::<Result<Vec<_>>>()?;
        match sources.as_slice() {
            [] => Err(DbError::plan("Binary expression needs an expression operand")
                .with_field("op", binary.op)),
            [_] => Ok(()),
            [lhs, rhs] if lhs == rhs => Ok(()),
            [lhs, rhs, ..] => Err(DbError::plan("Binary expression operands have different sources")
                .with_field("op", binary.op)
                .with_field("lhs_source", lhs)
                .with_field("rhs_source", rhs)),
        }
    }

    /// Push a copy of a node with a different output descriptor.
    pub fn with_schema(&mut self, id: NodeId, schema: OutputSchema) -> Result<NodeId> {
        let kind = self.get(id)?.kind.clone();
        self.push(PlanNode { schema, kind })
    }

    pub fn frame_read_seq(&mut self, data: Batch) -> Result<NodeId> {
        let schema = OutputSchema::frame(data.schema().clone());
        self.push_operator(schema, LogicalOperator::FrameReadSeq(LogicalFrameReadSeq { data }))
    }

    pub fn projection(
        &mut self,
        schema: OutputSchema,
        source: NodeId,
        exprs: Vec<NodeId>,
    ) -> Result<NodeId> {
        self.push_operator(
            schema,
            LogicalOperator::Projection(LogicalProjection { source, exprs }),
        )
    }

    /// Projection of the given columns of `source`.
    pub fn select_columns(&mut self, source: NodeId, columns: &[usize]) -> Result<NodeId> {
        let exprs = self.make_col_ref_exprs(columns, source)?;
        let src_schema = &self.schema(source)?.schema;
        let fields = columns
            .iter()
            .map(|c| src_schema.field(*c).cloned())
            .collect::<Result<Vec<_>>>()?;
        let schema = OutputSchema::frame(Schema::new(fields));
        self.projection(schema, source, exprs)
    }

    pub fn filter(&mut self, source: NodeId, predicate: NodeId) -> Result<NodeId> {
        let schema = self.schema(source)?.clone();
        self.push_operator(
            schema,
            LogicalOperator::Filter(LogicalFilter { source, predicate }),
        )
    }

    pub fn limit(&mut self, source: NodeId, limit: usize) -> Result<NodeId> {
        let schema = self.schema(source)?.clone();
        self.push_operator(
            schema,
            LogicalOperator::Limit(LogicalLimit {
                source,
                limit,
                offset: 0,
            }),
        )
    }

    pub fn comparison_join(
        &mut self,
        schema: OutputSchema,
        left: NodeId,
        right: NodeId,
        join_type: JoinType,
        conditions: Vec<JoinCondition>,
    ) -> Result<NodeId> {
        self.push_operator(
            schema,
            LogicalOperator::ComparisonJoin(LogicalComparisonJoin {
                left,
                right,
                join_type,
                conditions,
            }),
        )
    }

    /// Reference column `column` of `source`, typed from the source's field.
    pub fn column_ref(&mut self, source: NodeId, column: usize) -> Result<NodeId> {
        let field = self.schema(source)?.field(column)?.clone();
        self.push_expression(
            OutputSchema::single_column(field),
            Expression::Column(ColumnExpr { source, column }),
        )
    }

    /// One column reference per key, in order.
    pub fn make_col_ref_exprs(&mut self, keys: &[usize], source: NodeId) -> Result<Vec<NodeId>> {
        keys.iter().map(|k| self.column_ref(source, *k)).collect()
    }

    pub fn constant(
        &mut self,
        schema: OutputSchema,
        source: NodeId,
        value: ScalarValue,
    ) -> Result<NodeId> {
        self.push_expression(schema, Expression::Constant(ConstantExpr { source, value }))
    }

    pub fn null(&mut self, schema: OutputSchema, source: NodeId, field_idx: usize) -> Result<NodeId> {
        self.push_expression(schema, Expression::Null(NullExpr { source, field_idx }))
    }

    pub fn unary(&mut self, schema: OutputSchema, input: NodeId, op: UnaryOperator) -> Result<NodeId> {
        self.push_expression(schema, Expression::Unary(UnaryExpr { input, op }))
    }

    /// Binary expression. Fails if both sides are expressions over different
    /// sources.
    pub fn binary(
        &mut self,
        schema: OutputSchema,
        lhs: impl Into<BinaryOperand>,
        rhs: impl Into<BinaryOperand>,
        op: BinaryOperator,
    ) -> Result<NodeId> {
        self.push_expression(
            schema,
            Expression::Binary(BinaryExpr {
                lhs: lhs.into(),
                rhs: rhs.into(),
                op,
            }),
        )
    }

    pub fn aggregate_call(
        &mut self,
        schema: OutputSchema,
        source: NodeId,
        function: impl Into<String>,
        input_columns: Vec<usize>,
        dropna: bool,
    ) -> Result<NodeId> {
        self.push_expression(
            schema,
            Expression::Aggregate(AggregateExpr {
                source,
                function: function.into(),
                input_columns,
                dropna,
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use lazydist_error::ErrorKind;
    use lazydist_types::datatype::DataType;
    use lazydist_types::field::Field;

    use super::*;
    use crate::testutil::{bool_column, int_batch};

    #[test]
    fn same_construction_twice_is_two_nodes() {
        let mut arena = PlanArena::new();
        let a = arena.frame_read_seq(int_batch(3)).unwrap();
        let b = arena.frame_read_seq(int_batch(3)).unwrap();
        assert_ne!(a, b);
        assert_eq!(2, arena.len());
    }

    #[test]
    fn column_ref_takes_source_field() {
        let mut arena = PlanArena::new();
        let src = arena.frame_read_seq(int_batch(3)).unwrap();
        let col = arena.column_ref(src, 1).unwrap();

        let schema = arena.schema(col).unwrap();
        assert!(schema.is_single_column());
        assert_eq!(&Field::new("b", DataType::Int64, false), schema.field(0).unwrap());
        assert_eq!(src, arena.expr_source(col).unwrap());
    }

    #[test]
    fn column_ref_out_of_range() {
        let mut arena = PlanArena::new();
        let src = arena.frame_read_seq(int_batch(3)).unwrap();
        assert!(arena.column_ref(src, 5).is_err());
    }

    #[test]
    fn operator_where_expression_expected() {
        let mut arena = PlanArena::new();
        let src = arena.frame_read_seq(int_batch(3)).unwrap();
        let err = arena.filter(src, src).unwrap_err();
        assert_eq!(ErrorKind::Plan, err.kind());
    }

    #[test]
    fn expression_where_relation_expected() {
        let mut arena = PlanArena::new();
        let src = arena.frame_read_seq(int_batch(3)).unwrap();
        let col = arena.column_ref(src, 0).unwrap();
        let err = arena.limit(col, 1).unwrap_err();
        assert_eq!(ErrorKind::Plan, err.kind());
    }

    #[test]
    fn binary_over_unrelated_sources_rejected() {
        let mut arena = PlanArena::new();
        let a = arena.frame_read_seq(int_batch(3)).unwrap();
        let b = arena.frame_read_seq(int_batch(3)).unwrap();
        let lhs = arena.column_ref(a, 0).unwrap();
        let rhs = arena.column_ref(b, 0).unwrap();

        let err = arena
            .binary(bool_column(), lhs, rhs, BinaryOperator::Eq)
            .unwrap_err();
        assert_eq!(ErrorKind::Plan, err.kind());
        assert_eq!(Some("n0"), err.field("lhs_source"));
        assert_eq!(Some("n1"), err.field("rhs_source"));
    }

    #[test]
    fn binary_source_from_expression_side() {
        let mut arena = PlanArena::new();
        let src = arena.frame_read_seq(int_batch(3)).unwrap();
        let col = arena.column_ref(src, 0).unwrap();
        let cmp = arena
            .binary(bool_column(), ScalarValue::Int64(1), col, BinaryOperator::Lt)
            .unwrap();
        assert_eq!(src, arena.expr_source(cmp).unwrap());

        let neg = arena
            .unary(bool_column(), cmp, UnaryOperator::Not)
            .unwrap();
        assert_eq!(src, arena.expr_source(neg).unwrap());
    }

    #[test]
    fn binary_without_expression_rejected() {
        let mut arena = PlanArena::new();
        let err = arena
            .binary(
                bool_column(),
                ScalarValue::Int64(1),
                ScalarValue::Int64(2),
                BinaryOperator::Add,
            )
            .unwrap_err();
        assert_eq!(ErrorKind::Plan, err.kind());
    }

    #[test]
    fn unknown_node() {
        let arena = PlanArena::new();
        let err = arena.get(NodeId(4)).unwrap_err();
        assert_eq!(ErrorKind::Plan, err.kind());
    }

    #[test]
    fn with_schema_pushes_copy() {
        let mut arena = PlanArena::new();
        let src = arena.frame_read_seq(int_batch(2)).unwrap();
        let renamed = OutputSchema::frame(Schema::new([
            Field::new("x", DataType::Int64, false),
            Field::new("y", DataType::Int64, false),
        ]));
        let copy = arena.with_schema(src, renamed.clone()).unwrap();
        assert_ne!(src, copy);
        assert_eq!(&renamed, arena.schema(copy).unwrap());
        assert_eq!("a", arena.schema(src).unwrap().field(0).unwrap().name);
    }
}
