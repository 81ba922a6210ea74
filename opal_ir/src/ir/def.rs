//! Def nodes: primops, params and continuations.
//!
//! Every def has an ordered operand list and an unordered use-set that the
//! world keeps in sync on every mutation: `n.op(i) == d` holds iff
//! `(i, n)` is in `d`'s use-set.
//!
//! Primops are hash-consed by (kind, type, operand tuple); params belong to
//! their continuation; continuations are mutable and compare by identity.

use std::cell::Cell;

use rustc_hash::FxHashSet;
use smallvec::SmallVec;

use super::arena::Id;
use super::ops::PrimOpKind;
use super::types::TypeId;

/// Id of a def node.
pub type DefId = Id<DefNode>;

// =============================================================================
// Uses
// =============================================================================

/// References a user: a def `u` that has this def as its `index`-th operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Use {
    pub index: u32,
    pub user: DefId,
}

impl Use {
    #[inline]
    pub fn new(index: usize, user: DefId) -> Self {
        Use {
            index: index as u32,
            user,
        }
    }
}

// =============================================================================
// Def Kinds
// =============================================================================

/// Continuation intrinsics. Intrinsic continuations have no body; the only
/// branching primitive is a jump to `Branch` with `(cond, then, else)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intrinsic {
    None,
    Branch,
}

/// Mutable continuation payload.
#[derive(Debug, Clone)]
pub struct ContData {
    /// Ordered parameters (as `Param` defs).
    pub params: Vec<DefId>,
    /// Type arguments of the current jump.
    pub type_args: Vec<TypeId>,
    /// Externally visible; roots the def graph across `cleanup`.
    pub external: bool,
    /// Sealed continuations accept no further params.
    pub sealed: bool,
    pub intrinsic: Intrinsic,
}

impl ContData {
    pub(crate) fn new() -> Self {
        ContData {
            params: Vec::new(),
            type_args: Vec::new(),
            external: false,
            sealed: false,
            intrinsic: Intrinsic::None,
        }
    }
}

/// The three def families.
#[derive(Debug, Clone)]
pub enum DefKind {
    /// A pure or memory-effecting operation; hash-consed.
    PrimOp(PrimOpKind),
    /// The `index`-th parameter of `cont`; owned by that continuation.
    Param { cont: DefId, index: u32 },
    /// A first-class CPS block; identity equality.
    Continuation(ContData),
}

// =============================================================================
// Def Node
// =============================================================================

/// A node in the def graph.
#[derive(Debug, Clone)]
pub struct DefNode {
    pub kind: DefKind,
    pub ty: TypeId,
    pub(crate) ops: SmallVec<[DefId; 4]>,
    pub(crate) uses: FxHashSet<Use>,
    pub gid: u64,
    pub name: Option<Box<str>>,
    pub(crate) is_const: bool,
    pub(crate) dead: bool,
    pub(crate) replaced: bool,
    pass: Cell<u64>,
}

impl DefNode {
    pub(crate) fn new(
        kind: DefKind,
        ty: TypeId,
        ops: SmallVec<[DefId; 4]>,
        gid: u64,
        is_const: bool,
    ) -> Self {
        DefNode {
            kind,
            ty,
            ops,
            uses: FxHashSet::default(),
            gid,
            name: None,
            is_const,
            dead: false,
            replaced: false,
            pass: Cell::new(0),
        }
    }

    /// Ordered operands.
    #[inline]
    pub fn ops(&self) -> &[DefId] {
        &self.ops
    }

    /// Operand at index `i`.
    #[inline]
    pub fn op(&self, i: usize) -> DefId {
        self.ops[i]
    }

    /// Number of operands.
    #[inline]
    pub fn num_ops(&self) -> usize {
        self.ops.len()
    }

    /// The unordered use-set.
    #[inline]
    pub fn uses(&self) -> &FxHashSet<Use> {
        &self.uses
    }

    /// Number of uses.
    #[inline]
    pub fn num_uses(&self) -> usize {
        self.uses.len()
    }

    /// A def is constant iff it transitively depends on no param and no
    /// `hlt`; continuations count as constant. Fixed at construction.
    #[inline]
    pub fn is_const(&self) -> bool {
        self.is_const
    }

    /// Swept by the last `cleanup`.
    #[inline]
    pub fn is_dead(&self) -> bool {
        self.dead
    }

    /// Primop kind, if this is a primop.
    #[inline]
    pub fn primop_kind(&self) -> Option<PrimOpKind> {
        match self.kind {
            DefKind::PrimOp(kind) => Some(kind),
            _ => None,
        }
    }

    /// Check for a primop.
    #[inline]
    pub fn is_primop(&self) -> bool {
        matches!(self.kind, DefKind::PrimOp(_))
    }

    /// Check for a param.
    #[inline]
    pub fn is_param(&self) -> bool {
        matches!(self.kind, DefKind::Param { .. })
    }

    /// Check for a continuation.
    #[inline]
    pub fn is_continuation(&self) -> bool {
        matches!(self.kind, DefKind::Continuation(_))
    }

    /// Continuation payload, if this is a continuation.
    #[inline]
    pub fn cont(&self) -> Option<&ContData> {
        match &self.kind {
            DefKind::Continuation(data) => Some(data),
            _ => None,
        }
    }

    pub(crate) fn cont_mut(&mut self) -> Option<&mut ContData> {
        match &mut self.kind {
            DefKind::Continuation(data) => Some(data),
            _ => None,
        }
    }

    /// Owning continuation and index, if this is a param.
    #[inline]
    pub fn param_info(&self) -> Option<(DefId, u32)> {
        match self.kind {
            DefKind::Param { cont, index } => Some((cont, index)),
            _ => None,
        }
    }

    /// Debug name plus global id, unique within the world.
    pub fn unique_name(&self) -> String {
        match &self.name {
            Some(name) => format!("{}_{}", name, self.gid),
            None => format!("_{}", self.gid),
        }
    }

    /// Visited-marking: returns whether the node was already seen this pass
    /// and records the token.
    #[inline]
    pub fn visit(&self, pass: u64) -> bool {
        if self.pass.get() == pass {
            true
        } else {
            self.pass.set(pass);
            false
        }
    }

    /// Check the visited mark without setting it.
    #[inline]
    pub fn is_visited(&self, pass: u64) -> bool {
        self.pass.get() == pass
    }
}

// =============================================================================
// Interning Key
// =============================================================================

/// Hash-consing identity of a primop.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct PrimOpKey {
    pub kind: PrimOpKind,
    pub ty: TypeId,
    pub ops: SmallVec<[DefId; 4]>,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_visit_marks_once() {
        let node = DefNode::new(
            DefKind::PrimOp(PrimOpKind::Tuple),
            TypeId::new(0),
            SmallVec::new(),
            1,
            true,
        );

        assert!(!node.visit(7));
        assert!(node.visit(7));
        assert!(node.is_visited(7));
        assert!(!node.is_visited(8));
        assert!(!node.visit(8));
    }

    #[test]
    fn test_unique_name() {
        let mut node = DefNode::new(
            DefKind::PrimOp(PrimOpKind::Tuple),
            TypeId::new(0),
            SmallVec::new(),
            42,
            true,
        );
        assert_eq!(node.unique_name(), "_42");
        node.name = Some("x".into());
        assert_eq!(node.unique_name(), "x_42");
    }
}
