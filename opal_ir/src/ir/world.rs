//! The world: node arena, hash-consing tables and pass counter.
//!
//! The world owns every def and every type. Primops and types are interned
//! by structural identity, so constructing an equivalent primop twice
//! returns the same id. Continuations and params are fresh identities.
//!
//! # Design Principles
//!
//! - **Arena allocation**: O(1) node creation, ids stay stable for the life
//!   of the world
//! - **Use-def chains**: every operand edge is mirrored in the operand's
//!   use-set; all mutation goes through the world so the mirror never skews
//! - **Pass tokens**: traversals mark visited nodes with a fresh 64-bit
//!   token instead of resetting flags, so visited-marking is O(1)
//! - **Folding at construction**: constant operands fold eagerly; a fold
//!   error (overflow, division by zero) leaves the primop unfolded
//!
//! Cycles only arise through continuations; primop operands are strictly
//! acyclic, so structural interning terminates.

use std::cell::Cell;
use std::collections::VecDeque;

use rustc_hash::FxHashMap;
use smallvec::{smallvec, SmallVec};

use super::arena::Arena;
use super::def::{DefId, DefKind, DefNode, Intrinsic, PrimOpKey, Use};
use super::fold::{fold_arith, fold_bit, fold_cmp};
use super::ops::{ArithOp, BitOp, CmpOp, LitValue, PrimOpKind};
use super::types::{PrimTypeKind, TypeId, TypeKey, TypeKind, TypeNode};

// =============================================================================
// World
// =============================================================================

/// Owner of the def graph and the type table.
pub struct World {
    pub(crate) defs: Arena<DefNode>,
    pub(crate) types: Arena<TypeNode>,
    primop_intern: FxHashMap<PrimOpKey, DefId>,
    type_intern: FxHashMap<TypeKey, TypeId>,
    pub(crate) continuations: Vec<DefId>,
    pub(crate) externals: Vec<DefId>,
    pass: Cell<u64>,
    gid: u64,

    pub(crate) branch: DefId,
    mem_ty: TypeId,
    frame_ty: TypeId,
    bool_ty: TypeId,
    unit_ty: TypeId,
}

impl World {
    /// Create a new world with the `branch` intrinsic installed.
    pub fn new() -> Self {
        let mut world = World {
            defs: Arena::with_capacity(256),
            types: Arena::new(),
            primop_intern: FxHashMap::default(),
            type_intern: FxHashMap::default(),
            continuations: Vec::new(),
            externals: Vec::new(),
            pass: Cell::new(0),
            gid: 0,
            branch: DefId::INVALID,
            mem_ty: TypeId::INVALID,
            frame_ty: TypeId::INVALID,
            bool_ty: TypeId::INVALID,
            unit_ty: TypeId::INVALID,
        };

        world.mem_ty = world.intern_type(TypeKind::Mem, SmallVec::new());
        world.frame_ty = world.intern_type(TypeKind::Frame, SmallVec::new());
        world.bool_ty = world.prim_type(PrimTypeKind::Bool, 1);
        world.unit_ty = world.sigma(&[]);

        let bb = world.pi(&[]);
        let bool_ty = world.bool_ty;
        let branch_ty = world.pi(&[bool_ty, bb, bb]);
        let branch = world.continuation(branch_ty, "branch");
        world.defs[branch]
            .cont_mut()
            .expect("branch is a continuation")
            .intrinsic = Intrinsic::Branch;
        world.branch = branch;

        world
    }

    pub(crate) fn next_gid(&mut self) -> u64 {
        self.gid += 1;
        self.gid
    }

    /// Issue a fresh traversal token.
    pub fn new_pass(&self) -> u64 {
        let pass = self.pass.get() + 1;
        self.pass.set(pass);
        pass
    }

    // =========================================================================
    // Node Access
    // =========================================================================

    /// Get a def node.
    #[inline]
    pub fn def(&self, id: DefId) -> &DefNode {
        &self.defs[id]
    }

    /// Get a type node.
    #[inline]
    pub fn ty(&self, id: TypeId) -> &TypeNode {
        &self.types[id]
    }

    /// Literal value of a def, if it is a literal primop.
    pub fn lit_value(&self, id: DefId) -> Option<LitValue> {
        match self.defs[id].kind {
            DefKind::PrimOp(PrimOpKind::Lit(v)) => Some(v),
            _ => None,
        }
    }

    /// Total number of allocated defs (live and dead).
    pub fn num_defs(&self) -> usize {
        self.defs.len()
    }

    /// Iterate over live primop ids.
    pub fn primops(&self) -> impl Iterator<Item = DefId> + '_ {
        self.defs
            .iter()
            .filter(|(_, node)| node.is_primop() && !node.dead)
            .map(|(id, _)| id)
    }

    /// Iterate over live continuation ids in creation order.
    pub fn continuations(&self) -> impl Iterator<Item = DefId> + '_ {
        self.continuations
            .iter()
            .copied()
            .filter(move |&id| !self.defs[id].dead)
    }

    /// Iterate over external continuations in registration order.
    pub fn externals(&self) -> impl Iterator<Item = DefId> + '_ {
        self.externals
            .iter()
            .copied()
            .filter(move |&id| !self.defs[id].dead)
    }

    /// The `branch` intrinsic continuation.
    #[inline]
    pub fn branch(&self) -> DefId {
        self.branch
    }

    // =========================================================================
    // Types
    // =========================================================================

    fn intern_type(&mut self, kind: TypeKind, elems: SmallVec<[TypeId; 4]>) -> TypeId {
        let key = TypeKey {
            kind: kind.clone(),
            elems: elems.clone(),
        };
        if let Some(&id) = self.type_intern.get(&key) {
            return id;
        }
        let gid = self.next_gid();
        let id = self.types.alloc(TypeNode::new(kind, elems, gid));
        self.type_intern.insert(key, id);
        id
    }

    /// A primitive type with the given vector length.
    pub fn prim_type(&mut self, kind: PrimTypeKind, length: u32) -> TypeId {
        self.intern_type(TypeKind::Prim { kind, length }, SmallVec::new())
    }

    /// A scalar primitive type.
    pub fn prim(&mut self, kind: PrimTypeKind) -> TypeId {
        self.prim_type(kind, 1)
    }

    /// The `bool` type.
    #[inline]
    pub fn type_bool(&self) -> TypeId {
        self.bool_ty
    }

    /// The wrapping signed 32-bit type.
    pub fn type_qs32(&mut self) -> TypeId {
        self.prim(PrimTypeKind::Qs32)
    }

    /// The non-wrapping signed 32-bit type.
    pub fn type_ps32(&mut self) -> TypeId {
        self.prim(PrimTypeKind::Ps32)
    }

    /// The memory monad type.
    #[inline]
    pub fn mem_type(&self) -> TypeId {
        self.mem_ty
    }

    /// The stack frame type.
    #[inline]
    pub fn frame_type(&self) -> TypeId {
        self.frame_ty
    }

    /// The empty tuple type.
    #[inline]
    pub fn unit(&self) -> TypeId {
        self.unit_ty
    }

    /// A pointer type.
    pub fn ptr_type(&mut self, pointee: TypeId, length: u32) -> TypeId {
        self.intern_type(TypeKind::Ptr { length }, smallvec![pointee])
    }

    /// A scalar pointer type.
    pub fn ptr(&mut self, pointee: TypeId) -> TypeId {
        self.ptr_type(pointee, 1)
    }

    /// An anonymous (structural) tuple type.
    pub fn sigma(&mut self, elems: &[TypeId]) -> TypeId {
        self.intern_type(
            TypeKind::Sigma { name: None },
            SmallVec::from_slice(elems),
        )
    }

    /// A named sigma. Nominal: every call returns a fresh type that is equal
    /// only to itself.
    pub fn named_sigma(&mut self, name: &str, elems: &[TypeId]) -> TypeId {
        debug_assert!(!name.is_empty(), "named sigma needs a non-empty name");
        let gid = self.next_gid();
        self.types.alloc(TypeNode::new(
            TypeKind::Sigma {
                name: Some(name.into()),
            },
            SmallVec::from_slice(elems),
            gid,
        ))
    }

    /// A function type. Continuations never return, so there is no codomain.
    pub fn pi(&mut self, elems: &[TypeId]) -> TypeId {
        self.intern_type(TypeKind::Pi, SmallVec::from_slice(elems))
    }

    /// Alias for [`pi`](Self::pi), matching front-end vocabulary.
    pub fn fn_type(&mut self, elems: &[TypeId]) -> TypeId {
        self.pi(elems)
    }

    /// An array type.
    pub fn array_type(&mut self, elem: TypeId) -> TypeId {
        self.intern_type(TypeKind::Array, smallvec![elem])
    }

    /// A generic, identified by index.
    pub fn generic(&mut self, index: u32) -> TypeId {
        self.intern_type(TypeKind::Generic { index }, SmallVec::new())
    }

    /// A generic scoped by a continuation.
    pub fn generic_ref(&mut self, generic: TypeId, cont: DefId) -> TypeId {
        self.intern_type(TypeKind::GenericRef { cont }, smallvec![generic])
    }

    /// Rebuild a type with new elements, preserving its kind. Named sigmas
    /// come back as fresh nominal types.
    pub fn rebuild_type(&mut self, ty: TypeId, elems: &[TypeId]) -> TypeId {
        let kind = self.types[ty].kind.clone();
        match kind {
            TypeKind::Sigma { name: Some(name) } => self.named_sigma(&name, elems),
            kind => self.intern_type(kind, SmallVec::from_slice(elems)),
        }
    }

    /// Function-nesting order of a type: `pi` adds one level, everything
    /// else passes the maximum of its elements through.
    pub fn type_order(&self, ty: TypeId) -> usize {
        fn go(world: &World, ty: TypeId, pass: u64) -> usize {
            let node = &world.types[ty];
            if node.visit(pass) {
                return 0;
            }
            let inner = node
                .elems
                .iter()
                .map(|&e| go(world, e, pass))
                .max()
                .unwrap_or(0);
            if node.is_pi() {
                inner + 1
            } else {
                inner
            }
        }
        go(self, ty, self.new_pass())
    }

    // =========================================================================
    // Primop Construction
    // =========================================================================

    fn new_primop(&mut self, kind: PrimOpKind, ty: TypeId, ops: &[DefId]) -> DefId {
        debug_assert!(ops.iter().all(|op| op.is_valid()), "null operand");
        let key = PrimOpKey {
            kind,
            ty,
            ops: SmallVec::from_slice(ops),
        };
        if let Some(&id) = self.primop_intern.get(&key) {
            return id;
        }

        let is_const = match kind {
            PrimOpKind::Lit(_) => true,
            PrimOpKind::Hlt => false,
            _ => ops.iter().all(|&op| self.defs[op].is_const),
        };

        let gid = self.next_gid();
        let id = self.defs.alloc(DefNode::new(
            DefKind::PrimOp(kind),
            ty,
            key.ops.clone(),
            gid,
            is_const,
        ));
        for (i, &op) in ops.iter().enumerate() {
            self.defs[op].uses.insert(Use::new(i, id));
        }
        self.primop_intern.insert(key, id);
        id
    }

    /// A literal of the given primitive kind.
    pub fn literal(&mut self, kind: PrimTypeKind, value: LitValue) -> DefId {
        let ty = self.prim(kind);
        self.new_primop(PrimOpKind::Lit(value), ty, &[])
    }

    /// A `bool` literal.
    pub fn literal_bool(&mut self, value: bool) -> DefId {
        self.literal(PrimTypeKind::Bool, LitValue::Bool(value))
    }

    /// A `qs32` literal.
    pub fn literal_qs32(&mut self, value: i32) -> DefId {
        self.literal(PrimTypeKind::Qs32, LitValue::I32(value))
    }

    /// A `ps32` literal.
    pub fn literal_ps32(&mut self, value: i32) -> DefId {
        self.literal(PrimTypeKind::Ps32, LitValue::I32(value))
    }

    /// A `qu32` literal, the canonical aggregate index type.
    pub fn literal_qu32(&mut self, value: u32) -> DefId {
        self.literal(PrimTypeKind::Qu32, LitValue::U32(value))
    }

    /// Scalar primitive kind of a def's type, if it has one.
    fn scalar_kind(&self, id: DefId) -> Option<PrimTypeKind> {
        match self.types[self.defs[id].ty].kind {
            TypeKind::Prim { kind, length: 1 } => Some(kind),
            _ => None,
        }
    }

    /// An arithmetic primop; folds when both operands are literals.
    pub fn arith(&mut self, op: ArithOp, a: DefId, b: DefId) -> DefId {
        let ty = self.defs[a].ty;
        debug_assert_eq!(ty, self.defs[b].ty, "arith operand type mismatch");

        if let (Some(kind), Some(x), Some(y)) =
            (self.scalar_kind(a), self.lit_value(a), self.lit_value(b))
        {
            if let Ok(v) = fold_arith(op, kind, x, y) {
                return self.literal(kind, v);
            }
            // Fold error: leave the primop unfolded.
        }

        self.new_primop(PrimOpKind::Arith(op), ty, &[a, b])
    }

    /// A bitwise/shift primop; folds when both operands are literals.
    pub fn bit(&mut self, op: BitOp, a: DefId, b: DefId) -> DefId {
        let ty = self.defs[a].ty;
        debug_assert_eq!(ty, self.defs[b].ty, "bitop operand type mismatch");

        if let (Some(kind), Some(x), Some(y)) =
            (self.scalar_kind(a), self.lit_value(a), self.lit_value(b))
        {
            if let Ok(v) = fold_bit(op, kind, x, y) {
                return self.literal(kind, v);
            }
        }

        self.new_primop(PrimOpKind::Bit(op), ty, &[a, b])
    }

    /// A comparison primop; folds when both operands are literals.
    pub fn cmp(&mut self, op: CmpOp, a: DefId, b: DefId) -> DefId {
        debug_assert_eq!(self.defs[a].ty, self.defs[b].ty, "cmp operand type mismatch");

        if let (Some(kind), Some(x), Some(y)) =
            (self.scalar_kind(a), self.lit_value(a), self.lit_value(b))
        {
            return self.literal_bool(fold_cmp(op, kind, x, y));
        }

        let ty = self.bool_ty;
        self.new_primop(PrimOpKind::Cmp(op), ty, &[a, b])
    }

    /// select(cond, t, f); folds on a literal condition.
    pub fn select(&mut self, cond: DefId, t: DefId, f: DefId) -> DefId {
        debug_assert_eq!(self.defs[cond].ty, self.bool_ty, "select needs a bool");
        debug_assert_eq!(self.defs[t].ty, self.defs[f].ty, "select arm type mismatch");

        if let Some(LitValue::Bool(b)) = self.lit_value(cond) {
            return if b { t } else { f };
        }

        let ty = self.defs[t].ty;
        self.new_primop(PrimOpKind::Select, ty, &[cond, t, f])
    }

    /// A tuple of the operand defs; the type is the anonymous sigma of the
    /// operand types.
    pub fn tuple(&mut self, elems: &[DefId]) -> DefId {
        let elem_tys: Vec<TypeId> = elems.iter().map(|&e| self.defs[e].ty).collect();
        let ty = self.sigma(&elem_tys);
        self.new_primop(PrimOpKind::Tuple, ty, elems)
    }

    /// An array aggregate; all elements must share one type.
    pub fn array_agg(&mut self, elems: &[DefId]) -> DefId {
        debug_assert!(!elems.is_empty(), "empty array aggregate");
        let elem_ty = self.defs[elems[0]].ty;
        debug_assert!(elems.iter().all(|&e| self.defs[e].ty == elem_ty));
        let ty = self.array_type(elem_ty);
        self.new_primop(PrimOpKind::ArrayAgg, ty, elems)
    }

    fn lit_index(&self, index: DefId) -> Option<usize> {
        self.lit_value(index)
            .and_then(LitValue::as_i128)
            .and_then(|v| usize::try_from(v).ok())
    }

    fn agg_elem_type(&self, agg_ty: TypeId, index: DefId) -> TypeId {
        let node = &self.types[agg_ty];
        match node.kind {
            TypeKind::Sigma { .. } => {
                let i = self
                    .lit_index(index)
                    .expect("sigma extract needs a literal index");
                node.elem(i)
            }
            TypeKind::Array => node.elem(0),
            _ => panic!("extract/lea on non-aggregate type"),
        }
    }

    /// extract(agg, index); folds through tuple/array aggregates.
    pub fn extract(&mut self, agg: DefId, index: DefId) -> DefId {
        let elem_ty = self.agg_elem_type(self.defs[agg].ty, index);

        if let Some(kind) = self.defs[agg].primop_kind() {
            if matches!(kind, PrimOpKind::Tuple | PrimOpKind::ArrayAgg) {
                if let Some(i) = self.lit_index(index) {
                    if i < self.defs[agg].num_ops() {
                        return self.defs[agg].op(i);
                    }
                }
            }
        }

        self.new_primop(PrimOpKind::Extract, elem_ty, &[agg, index])
    }

    /// extract with a `qu32` literal index.
    pub fn extract_at(&mut self, agg: DefId, index: u32) -> DefId {
        let index = self.literal_qu32(index);
        self.extract(agg, index)
    }

    /// insert(agg, index, value); folds through tuple aggregates.
    pub fn insert(&mut self, agg: DefId, index: DefId, value: DefId) -> DefId {
        let ty = self.defs[agg].ty;

        if self.defs[agg].primop_kind() == Some(PrimOpKind::Tuple) {
            if let Some(i) = self.lit_index(index) {
                if i < self.defs[agg].num_ops() {
                    let mut elems: Vec<DefId> = self.defs[agg].ops().to_vec();
                    elems[i] = value;
                    return self.tuple(&elems);
                }
            }
        }

        self.new_primop(PrimOpKind::Insert, ty, &[agg, index, value])
    }

    /// Pointer arithmetic: lea(ptr, index) points at the selected element.
    pub fn lea(&mut self, ptr: DefId, index: DefId) -> DefId {
        let ptr_ty = self.defs[ptr].ty;
        let (pointee, length) = match self.types[ptr_ty].kind {
            TypeKind::Ptr { length } => (self.types[ptr_ty].elem(0), length),
            _ => panic!("lea on non-pointer"),
        };
        let elem_ty = self.agg_elem_type(pointee, index);
        let ty = self.ptr_type(elem_ty, length);
        self.new_primop(PrimOpKind::Lea, ty, &[ptr, index])
    }

    /// load(mem, ptr) -> (mem, value)
    pub fn load(&mut self, mem: DefId, ptr: DefId) -> DefId {
        debug_assert!(self.types[self.defs[mem].ty].is_mem());
        let pointee = match self.types[self.defs[ptr].ty].kind {
            TypeKind::Ptr { .. } => self.types[self.defs[ptr].ty].elem(0),
            _ => panic!("load from non-pointer"),
        };
        let mem_ty = self.mem_ty;
        let ty = self.sigma(&[mem_ty, pointee]);
        self.new_primop(PrimOpKind::Load, ty, &[mem, ptr])
    }

    /// store(mem, ptr, value) -> mem
    pub fn store(&mut self, mem: DefId, ptr: DefId, value: DefId) -> DefId {
        debug_assert!(self.types[self.defs[mem].ty].is_mem());
        let ty = self.mem_ty;
        self.new_primop(PrimOpKind::Store, ty, &[mem, ptr, value])
    }

    /// enter(mem) -> (mem, frame): acquire a stack frame.
    pub fn enter(&mut self, mem: DefId) -> DefId {
        debug_assert!(self.types[self.defs[mem].ty].is_mem());
        let mem_ty = self.mem_ty;
        let frame_ty = self.frame_ty;
        let ty = self.sigma(&[mem_ty, frame_ty]);
        self.new_primop(PrimOpKind::Enter, ty, &[mem])
    }

    /// leave(mem, frame) -> mem: release a stack frame.
    pub fn leave(&mut self, mem: DefId, frame: DefId) -> DefId {
        debug_assert!(self.types[self.defs[mem].ty].is_mem());
        debug_assert!(self.types[self.defs[frame].ty].is_frame());
        let ty = self.mem_ty;
        self.new_primop(PrimOpKind::Leave, ty, &[mem, frame])
    }

    /// slot(frame) -> ptr: a per-frame slot, identified by its index.
    pub fn slot(&mut self, pointee: TypeId, frame: DefId, index: u32) -> DefId {
        debug_assert!(self.types[self.defs[frame].ty].is_frame());
        let ty = self.ptr(pointee);
        self.new_primop(PrimOpKind::Slot { index }, ty, &[frame])
    }

    /// alloc(mem, extra) -> (mem, ptr): heap allocation of `ty`.
    pub fn alloc(&mut self, ty: TypeId, mem: DefId, extra: DefId) -> DefId {
        debug_assert!(self.types[self.defs[mem].ty].is_mem());
        let mem_ty = self.mem_ty;
        let ptr_ty = self.ptr(ty);
        let result_ty = self.sigma(&[mem_ty, ptr_ty]);
        self.new_primop(PrimOpKind::Alloc, result_ty, &[mem, extra])
    }

    /// run(begin, end): force specialization of `begin` up to `end`.
    pub fn run(&mut self, begin: DefId, end: DefId) -> DefId {
        let ty = self.defs[begin].ty;
        self.new_primop(PrimOpKind::Run, ty, &[begin, end])
    }

    /// hlt(begin, end): block specialization of `begin` up to `end`.
    pub fn hlt(&mut self, begin: DefId, end: DefId) -> DefId {
        let ty = self.defs[begin].ty;
        self.new_primop(PrimOpKind::Hlt, ty, &[begin, end])
    }

    /// Rebuild a primop kind over new operands, re-interning and re-folding.
    /// `ty` is consulted only where the kind cannot derive its type from the
    /// operands (literals, slots, allocs).
    pub fn rebuild(&mut self, kind: PrimOpKind, ops: &[DefId], ty: TypeId) -> DefId {
        match kind {
            PrimOpKind::Lit(_) => self.new_primop(kind, ty, &[]),
            PrimOpKind::Arith(op) => self.arith(op, ops[0], ops[1]),
            PrimOpKind::Bit(op) => self.bit(op, ops[0], ops[1]),
            PrimOpKind::Cmp(op) => self.cmp(op, ops[0], ops[1]),
            PrimOpKind::Select => self.select(ops[0], ops[1], ops[2]),
            PrimOpKind::Tuple => self.tuple(ops),
            PrimOpKind::ArrayAgg => self.array_agg(ops),
            PrimOpKind::Extract => self.extract(ops[0], ops[1]),
            PrimOpKind::Insert => self.insert(ops[0], ops[1], ops[2]),
            PrimOpKind::Lea => self.lea(ops[0], ops[1]),
            PrimOpKind::Load => self.load(ops[0], ops[1]),
            PrimOpKind::Store => self.store(ops[0], ops[1], ops[2]),
            PrimOpKind::Enter => self.enter(ops[0]),
            PrimOpKind::Leave => self.leave(ops[0], ops[1]),
            PrimOpKind::Slot { index } => {
                let pointee = self.types[ty].elem(0);
                self.slot(pointee, ops[0], index)
            }
            PrimOpKind::Alloc => {
                let ptr_ty = self.types[ty].elem(1);
                let pointee = self.types[ptr_ty].elem(0);
                self.alloc(pointee, ops[0], ops[1])
            }
            PrimOpKind::Run => self.run(ops[0], ops[1]),
            PrimOpKind::Hlt => self.hlt(ops[0], ops[1]),
        }
    }

    // =========================================================================
    // Memory Chain Helpers
    // =========================================================================

    /// Look up an existing extract of `agg` at a literal index, without
    /// creating one.
    pub fn find_extract(&self, agg: DefId, index: u32) -> Option<DefId> {
        for use_ in self.defs[agg].uses() {
            let user = &self.defs[use_.user];
            if user.primop_kind() == Some(PrimOpKind::Extract)
                && use_.index == 0
                && self.lit_index(user.op(1)) == Some(index as usize)
            {
                return Some(use_.user);
            }
        }
        None
    }

    /// The memory projection of a memory-effecting primop: the op itself for
    /// `store`/`leave`, the existing mem extract for `load`/`enter`/`alloc`.
    pub fn mem_out(&self, memop: DefId) -> Option<DefId> {
        match self.defs[memop].primop_kind() {
            Some(PrimOpKind::Store) | Some(PrimOpKind::Leave) => Some(memop),
            Some(PrimOpKind::Load) | Some(PrimOpKind::Enter) | Some(PrimOpKind::Alloc) => {
                self.find_extract(memop, 0)
            }
            _ => None,
        }
    }

    /// The frame projection of an `enter`, if materialized.
    pub fn enter_frame(&self, enter: DefId) -> Option<DefId> {
        debug_assert_eq!(self.defs[enter].primop_kind(), Some(PrimOpKind::Enter));
        self.find_extract(enter, 1)
    }

    // =========================================================================
    // Def/Use Maintenance
    // =========================================================================

    /// Point `user`'s operand `i` at `def`, keeping the use mirror in sync.
    pub fn set_op(&mut self, user: DefId, i: usize, def: DefId) {
        let old = self.defs[user].ops[i];
        self.defs[old].uses.remove(&Use::new(i, user));
        self.defs[user].ops[i] = def;
        self.defs[def].uses.insert(Use::new(i, user));
    }

    /// Clear every operand of `user`, unregistering each use.
    pub fn unset_ops(&mut self, user: DefId) {
        let ops = std::mem::take(&mut self.defs[user].ops);
        for (i, &op) in ops.iter().enumerate() {
            self.defs[op].uses.remove(&Use::new(i, user));
        }
    }

    /// Rewire every use of `old` to `new`. No-op when they already agree;
    /// replacing a def twice is a programmer error. Operand ordering of
    /// users is preserved; rewired primops are re-interned so future
    /// constructions find the canonical node.
    pub fn replace(&mut self, old: DefId, new: DefId) {
        if old == new {
            return;
        }
        debug_assert!(!self.defs[old].replaced, "double replace");
        debug_assert_eq!(self.defs[old].ty, self.defs[new].ty, "replace type mismatch");

        let uses: Vec<Use> = self.defs[old].uses.iter().copied().collect();
        for use_ in uses {
            self.unintern_primop(use_.user);
            self.defs[use_.user].ops[use_.index as usize] = new;
            self.defs[new].uses.insert(use_);
            self.reintern_primop(use_.user);
        }
        self.defs[old].uses.clear();
        self.defs[old].replaced = true;
    }

    fn unintern_primop(&mut self, id: DefId) {
        if let DefKind::PrimOp(kind) = self.defs[id].kind {
            let key = PrimOpKey {
                kind,
                ty: self.defs[id].ty,
                ops: self.defs[id].ops.clone(),
            };
            if self.primop_intern.get(&key) == Some(&id) {
                self.primop_intern.remove(&key);
            }
        }
    }

    fn reintern_primop(&mut self, id: DefId) {
        if let DefKind::PrimOp(kind) = self.defs[id].kind {
            let key = PrimOpKey {
                kind,
                ty: self.defs[id].ty,
                ops: self.defs[id].ops.clone(),
            };
            self.primop_intern.entry(key).or_insert(id);
        }
    }

    // =========================================================================
    // Cleanup
    // =========================================================================

    /// Mark-and-sweep from the externals (and intrinsics). Unreachable defs
    /// are tombstoned, their uses unregistered and the interning tables
    /// compacted. Analyses computed before a cleanup must not be reused.
    pub fn cleanup(&mut self) {
        let pass = self.new_pass();
        let mut queue: VecDeque<DefId> = VecDeque::new();

        let roots: Vec<DefId> = self
            .continuations
            .iter()
            .copied()
            .filter(|&c| {
                let data = self.defs[c].cont().expect("continuation list");
                data.external || data.intrinsic != Intrinsic::None
            })
            .collect();
        for root in roots {
            if !self.defs[root].visit(pass) {
                queue.push_back(root);
            }
        }

        while let Some(def) = queue.pop_front() {
            let node = &self.defs[def];
            let mut reach: SmallVec<[DefId; 8]> = SmallVec::from_slice(node.ops());
            match &node.kind {
                DefKind::Continuation(data) => reach.extend_from_slice(&data.params),
                DefKind::Param { cont, .. } => reach.push(*cont),
                DefKind::PrimOp(_) => {}
            }
            for next in reach {
                if !self.defs[next].visit(pass) {
                    queue.push_back(next);
                }
            }
        }

        for id in self.defs.ids().collect::<Vec<_>>() {
            if self.defs[id].dead || self.defs[id].is_visited(pass) {
                continue;
            }
            self.unintern_primop(id);
            let ops = std::mem::take(&mut self.defs[id].ops);
            for (i, &op) in ops.iter().enumerate() {
                self.defs[op].uses.remove(&Use::new(i, id));
            }
            self.defs[id].uses.clear();
            self.defs[id].dead = true;
        }

        let defs = &self.defs;
        self.continuations.retain(|&c| !defs[c].dead);
        self.externals.retain(|&c| !defs[c].dead);
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for World {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "World ({} defs, {} types, {} continuations)",
            self.defs.len(),
            self.types.len(),
            self.continuations.len()
        )
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_interning() {
        let mut world = World::new();
        let a = world.type_qs32();
        let b = world.type_qs32();
        assert_eq!(a, b);

        let s1 = world.sigma(&[a, b]);
        let s2 = world.sigma(&[a, b]);
        assert_eq!(s1, s2);

        let p1 = world.pi(&[a]);
        let p2 = world.pi(&[a, a]);
        assert_ne!(p1, p2);
    }

    #[test]
    fn test_named_sigma_is_nominal() {
        let mut world = World::new();
        let qs32 = world.type_qs32();
        let n1 = world.named_sigma("FlowTask", &[qs32]);
        let n2 = world.named_sigma("FlowTask", &[qs32]);
        assert_ne!(n1, n2);
        assert!(world.ty(n1).is_named_sigma());
    }

    #[test]
    fn test_primop_interning() {
        let mut world = World::new();
        let two = world.literal_qs32(2);
        let ty = world.type_qs32();
        let cont = {
            let pi = world.pi(&[ty]);
            world.continuation(pi, "f")
        };
        let x = world.param(cont, 0);

        let a = world.arith(ArithOp::Add, x, two);
        let b = world.arith(ArithOp::Add, x, two);
        assert_eq!(a, b);

        let c = world.arith(ArithOp::Add, two, x);
        assert_ne!(a, c);
    }

    #[test]
    fn test_constant_folding() {
        let mut world = World::new();
        let two = world.literal_qs32(2);
        let three = world.literal_qs32(3);
        let sum = world.arith(ArithOp::Add, two, three);
        assert_eq!(world.lit_value(sum), Some(LitValue::I32(5)));

        let five = world.literal_qs32(5);
        assert_eq!(sum, five);
    }

    #[test]
    fn test_fold_error_leaves_unfolded() {
        let mut world = World::new();
        let max = world.literal_ps32(i32::MAX);
        let one = world.literal_ps32(1);
        let sum = world.arith(ArithOp::Add, max, one);
        assert!(world.lit_value(sum).is_none());
        assert_eq!(
            world.def(sum).primop_kind(),
            Some(PrimOpKind::Arith(ArithOp::Add))
        );
    }

    #[test]
    fn test_use_sets_track_operands() {
        let mut world = World::new();
        let ty = world.type_qs32();
        let pi = world.pi(&[ty]);
        let cont = world.continuation(pi, "f");
        let x = world.param(cont, 0);
        let two = world.literal_qs32(2);

        let sum = world.arith(ArithOp::Add, x, two);
        assert!(world.def(x).uses().contains(&Use::new(0, sum)));
        assert!(world.def(two).uses().contains(&Use::new(1, sum)));

        for (i, &op) in world.def(sum).ops().iter().enumerate() {
            assert!(world.def(op).uses().contains(&Use::new(i, sum)));
        }
    }

    #[test]
    fn test_replace_rewires_uses() {
        let mut world = World::new();
        let ty = world.type_qs32();
        let pi = world.pi(&[ty, ty]);
        let cont = world.continuation(pi, "f");
        let x = world.param(cont, 0);
        let y = world.param(cont, 1);
        let two = world.literal_qs32(2);

        let sum = world.arith(ArithOp::Add, x, two);
        world.replace(x, y);

        assert_eq!(world.def(sum).op(0), y);
        assert!(world.def(y).uses().contains(&Use::new(0, sum)));
        assert!(world.def(x).uses().is_empty());
    }

    #[test]
    fn test_select_folds_literal_condition() {
        let mut world = World::new();
        let t = world.literal_qs32(1);
        let f = world.literal_qs32(2);
        let yes = world.literal_bool(true);
        assert_eq!(world.select(yes, t, f), t);
    }

    #[test]
    fn test_pass_tokens_are_fresh() {
        let world = World::new();
        let p1 = world.new_pass();
        let p2 = world.new_pass();
        assert!(p2 > p1);
    }

    #[test]
    fn test_extract_folds_through_tuple() {
        let mut world = World::new();
        let a = world.literal_qs32(1);
        let b = world.literal_qs32(2);
        let tup = world.tuple(&[a, b]);
        let second = world.extract_at(tup, 1);
        assert_eq!(second, b);
    }

    #[test]
    fn test_cleanup_sweeps_unreachable() {
        let mut world = World::new();
        let ty = world.type_qs32();
        let pi = world.pi(&[ty]);
        let live = world.continuation(pi, "live");
        world.make_external(live);
        let x = world.param(live, 0);
        world.jump(live, live, Vec::new(), &[x]);

        let orphan = world.basicblock("orphan");
        let garbage = {
            let two = world.literal_qs32(2);
            world.arith(ArithOp::Add, x, two)
        };
        let _ = garbage;

        world.cleanup();
        assert!(world.def(orphan).is_dead());
        assert!(!world.def(live).is_dead());
        assert!(!world.def(x).is_dead());
        // The unused addition had no user and is swept.
        assert!(world.def(garbage).is_dead());
    }

    #[test]
    fn test_replace_then_cleanup_leaves_no_stale_operand() {
        let mut world = World::new();
        let ty = world.type_qs32();
        let pi = world.pi(&[ty, ty]);
        let cont = world.continuation(pi, "f");
        world.make_external(cont);
        let x = world.param(cont, 0);
        let y = world.param(cont, 1);
        let sum = world.arith(ArithOp::Add, x, x);

        world.replace(x, y);
        world.jump(cont, cont, Vec::new(), &[sum, y]);
        world.cleanup();

        for id in world.primops().collect::<Vec<_>>() {
            assert!(!world.def(id).ops().contains(&x));
        }
        assert!(world.def(y).uses().iter().any(|u| u.user == sum));
    }

}
