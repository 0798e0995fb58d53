//! Conversion of plan nodes into backend handles.

use hashbrown::HashMap;
use lazydist_error::Result;
use tracing::trace;

use crate::arena::{NodeId, NodeKind, PlanArena};
use crate::backend::{BackendArg, DataResolver, PlanBackend};
use crate::operand::Operand;

/// Convert the plan rooted at `root` into a backend plan.
pub fn to_backend<B, R>(
    arena: &PlanArena,
    backend: &mut B,
    resolver: &R,
    root: NodeId,
) -> Result<B::Handle>
where
    B: PlanBackend,
    R: DataResolver + ?Sized,
{
    Converter::new(arena, backend, resolver).convert(root)
}

/// Converts nodes, creating each relational node at most once per cache
/// scope.
///
/// Expressions are created fresh every time they're referenced since the
/// node using them takes ownership. Inputs of joins and set operations are
/// each converted in their own scope so the two sides never share a handle,
/// even for a self join.
pub struct Converter<'a, B: PlanBackend, R: ?Sized> {
    arena: &'a PlanArena,
    backend: &'a mut B,
    resolver: &'a R,
    cache: HashMap<NodeId, B::Handle>,
}

impl<'a, B, R> Converter<'a, B, R>
where
    B: PlanBackend,
    R: DataResolver + ?Sized,
{
    pub fn new(arena: &'a PlanArena, backend: &'a mut B, resolver: &'a R) -> Self {
        Converter {
            arena,
            backend,
            resolver,
            cache: HashMap::new(),
        }
    }

    pub fn convert(&mut self, id: NodeId) -> Result<B::Handle> {
        if let Some(handle) = self.cache.get(&id) {
            return Ok(handle.clone());
        }

        let arena = self.arena;
        let node = arena.get(id)?;
        let scoped_inputs = match &node.kind {
            NodeKind::Operator(op) => op.is_binary_relation(),
            NodeKind::Expression(_) => false,
        };

        let operands = node.operands();
        let args = self.convert_operands(&operands, scoped_inputs)?;

        let handle = self.backend.create_node(node.name(), &node.schema, args)?;
        trace!(node = %id, name = node.name(), "created backend node");

        if !node.is_expression() {
            self.cache.insert(id, handle.clone());
        }
        Ok(handle)
    }

    /// Convert operands last to first, returning them in positional order.
    fn convert_operands(
        &mut self,
        operands: &[Operand<'_>],
        scoped_inputs: bool,
    ) -> Result<Vec<BackendArg<B::Handle>>> {
        let mut args = operands
            .iter()
            .rev()
            .map(|operand| self.convert_operand(operand, scoped_inputs))
            .collect::<Result<Vec<_>>>()?;
        args.reverse();
        Ok(args)
    }

    fn convert_operand(
        &mut self,
        operand: &Operand<'_>,
        scoped_inputs: bool,
    ) -> Result<BackendArg<B::Handle>> {
        let arg = match operand {
            Operand::Input(id) if scoped_inputs => BackendArg::Owned(self.convert_scoped(*id)?),
            Operand::Input(id) | Operand::Expr(id) => BackendArg::Owned(self.convert(*id)?),
            Operand::Source(id) => BackendArg::Borrowed(self.convert(*id)?),
            Operand::List(items) => BackendArg::List(self.convert_operands(items, scoped_inputs)?),
            Operand::Scalar(v) => BackendArg::Scalar((*v).clone()),
            Operand::Text(s) => BackendArg::Text(s.to_string()),
            Operand::Index(idx) => BackendArg::Index(*idx),
            Operand::Indices(indices) => BackendArg::Indices(indices.to_vec()),
            Operand::Bool(b) => BackendArg::Bool(*b),
            Operand::Options(opts) => BackendArg::Options((*opts).clone()),
            Operand::Data(batch) => BackendArg::Data(self.resolver.resolve_sequential(batch)?),
            Operand::Distributed(arg) => BackendArg::Data(self.resolver.resolve_distributed(arg)?),
            Operand::Absent => BackendArg::Absent,
        };
        Ok(arg)
    }

    /// Convert with an empty cache, restoring the current one afterwards.
    fn convert_scoped(&mut self, id: NodeId) -> Result<B::Handle> {
        let outer = std::mem::take(&mut self.cache);
        let res = self.convert(id);
        self.cache = outer;
        res
    }
}
