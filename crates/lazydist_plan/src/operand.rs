use std::collections::BTreeMap;

use lazydist_spawn::lazy_arg::LazyDistributedArg;
use lazydist_types::batch::Batch;
use lazydist_types::scalar::ScalarValue;

use crate::arena::NodeId;

/// A positional operand of a plan node, as handed to the backend.
#[derive(Debug, Clone)]
pub enum Operand<'a> {
    /// Relational input the node takes ownership of.
    Input(NodeId),
    /// Relation an expression is evaluated against. Not consumed.
    Source(NodeId),
    Expr(NodeId),
    List(Vec<Operand<'a>>),
    Scalar(&'a ScalarValue),
    Text(&'a str),
    Index(usize),
    Indices(&'a [usize]),
    Bool(bool),
    Options(&'a BTreeMap<String, String>),
    Data(&'a Batch),
    Distributed(&'a LazyDistributedArg),
    Absent,
}

impl Operand<'_> {
    pub fn exprs(ids: &[NodeId]) -> Self {
        Operand::List(ids.iter().map(|id| Operand::Expr(*id)).collect())
    }

    /// Visit every node referenced by this operand.
    pub fn for_each_node<F>(&self, func: &mut F)
    where
        F: FnMut(NodeRole, NodeId),
    {
        match self {
            Operand::Input(id) => func(NodeRole::Input, *id),
            Operand::Source(id) => func(NodeRole::Source, *id),
            Operand::Expr(id) => func(NodeRole::Expr, *id),
            Operand::List(items) => {
                for item in items {
                    item.for_each_node(func);
                }
            }
            _ => (),
        }
    }
}

/// How a node is referenced from an operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    Input,
    Source,
    Expr,
}
