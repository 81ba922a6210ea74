//! Structurally hash-consed types.
//!
//! Types are interned by the [`World`](super::world::World): two compound
//! types are the same object iff their kind and element sequences are
//! pointwise equal, and two primitive types iff kind and vector length
//! match. Named sigmas are nominal — they are equal only to themselves and
//! bypass interning entirely.
//!
//! A type is never freed; the interning tables only grow (cleanup compacts
//! the def side of the world, not the type side).

use std::cell::Cell;

use smallvec::SmallVec;

use super::arena::Id;
use super::def::DefId;

/// Id of an interned type.
pub type TypeId = Id<TypeNode>;

// =============================================================================
// Primitive Type Kinds
// =============================================================================

/// Primitive type kind.
///
/// The letter prefix encodes the overflow discipline: `P*` types signal a
/// fold error on overflow, `Q*` types wrap modulo 2^N. The scheduler and
/// the folder never distinguish beyond that.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PrimTypeKind {
    Bool,
    // Non-wrapping signed.
    Ps8,
    Ps16,
    Ps32,
    Ps64,
    // Non-wrapping unsigned.
    Pu8,
    Pu16,
    Pu32,
    Pu64,
    // Wrapping signed.
    Qs8,
    Qs16,
    Qs32,
    Qs64,
    // Wrapping unsigned.
    Qu8,
    Qu16,
    Qu32,
    Qu64,
    // Floats (the wrap split is meaningless for floats but kept so the
    // front-end can round-trip the full kind set).
    Pf32,
    Pf64,
    Qf32,
    Qf64,
}

impl PrimTypeKind {
    /// Bit width of the kind (1 for bool).
    pub const fn bit_width(self) -> u32 {
        use PrimTypeKind::*;
        match self {
            Bool => 1,
            Ps8 | Pu8 | Qs8 | Qu8 => 8,
            Ps16 | Pu16 | Qs16 | Qu16 => 16,
            Ps32 | Pu32 | Qs32 | Qu32 | Pf32 | Qf32 => 32,
            Ps64 | Pu64 | Qs64 | Qu64 | Pf64 | Qf64 => 64,
        }
    }

    /// Check for a signed integer kind.
    pub const fn is_signed_int(self) -> bool {
        use PrimTypeKind::*;
        matches!(self, Ps8 | Ps16 | Ps32 | Ps64 | Qs8 | Qs16 | Qs32 | Qs64)
    }

    /// Check for an unsigned integer kind.
    pub const fn is_unsigned_int(self) -> bool {
        use PrimTypeKind::*;
        matches!(self, Pu8 | Pu16 | Pu32 | Pu64 | Qu8 | Qu16 | Qu32 | Qu64)
    }

    /// Check for any integer kind.
    pub const fn is_int(self) -> bool {
        self.is_signed_int() || self.is_unsigned_int()
    }

    /// Check for a float kind.
    pub const fn is_float(self) -> bool {
        use PrimTypeKind::*;
        matches!(self, Pf32 | Pf64 | Qf32 | Qf64)
    }

    /// Wrapping kinds compute modulo 2^N; the others signal on overflow.
    pub const fn is_wrapping(self) -> bool {
        use PrimTypeKind::*;
        matches!(
            self,
            Qs8 | Qs16 | Qs32 | Qs64 | Qu8 | Qu16 | Qu32 | Qu64 | Qf32 | Qf64
        )
    }
}

// =============================================================================
// Type Nodes
// =============================================================================

/// Structural kind of a type node.
///
/// Element types live in the node's `elems` list: the pointee of a `Ptr`,
/// the element of an `Array`, the fields of a `Sigma`, the parameters of a
/// `Pi`, the underlying generic of a `GenericRef`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeKind {
    /// Primitive/vector type.
    Prim { kind: PrimTypeKind, length: u32 },
    /// Pointer (possibly a vector of pointers).
    Ptr { length: u32 },
    /// Tuple type. `name: Some(..)` makes it nominal.
    Sigma { name: Option<Box<str>> },
    /// Function type; continuations never return, so there is no codomain.
    Pi,
    /// Array of one element type.
    Array,
    /// The memory monad.
    Mem,
    /// A stack frame.
    Frame,
    /// A generic, identified by its index.
    Generic { index: u32 },
    /// A generic scoped by a continuation.
    GenericRef { cont: DefId },
}

/// An interned type.
#[derive(Debug, Clone)]
pub struct TypeNode {
    pub kind: TypeKind,
    pub elems: SmallVec<[TypeId; 4]>,
    pub gid: u64,
    pass: Cell<u64>,
}

impl TypeNode {
    pub(crate) fn new(kind: TypeKind, elems: SmallVec<[TypeId; 4]>, gid: u64) -> Self {
        TypeNode {
            kind,
            elems,
            gid,
            pass: Cell::new(0),
        }
    }

    /// Element type at index `i`.
    #[inline]
    pub fn elem(&self, i: usize) -> TypeId {
        self.elems[i]
    }

    /// Number of element types.
    #[inline]
    pub fn num_elems(&self) -> usize {
        self.elems.len()
    }

    /// Check for the memory monad type.
    #[inline]
    pub fn is_mem(&self) -> bool {
        matches!(self.kind, TypeKind::Mem)
    }

    /// Check for the frame type.
    #[inline]
    pub fn is_frame(&self) -> bool {
        matches!(self.kind, TypeKind::Frame)
    }

    /// Check for a function type.
    #[inline]
    pub fn is_pi(&self) -> bool {
        matches!(self.kind, TypeKind::Pi)
    }

    /// Primitive kind, if this is a primitive type.
    #[inline]
    pub fn primtype_kind(&self) -> Option<PrimTypeKind> {
        match self.kind {
            TypeKind::Prim { kind, .. } => Some(kind),
            _ => None,
        }
    }

    /// Nominal name, if this is a named sigma.
    pub fn sigma_name(&self) -> Option<&str> {
        match &self.kind {
            TypeKind::Sigma { name: Some(n) } => Some(n),
            _ => None,
        }
    }

    /// A sigma is named — and therefore nominal — iff its name is non-empty.
    pub fn is_named_sigma(&self) -> bool {
        self.sigma_name().map_or(false, |n| !n.is_empty())
    }

    /// Visited-marking: returns whether the node was already seen this pass
    /// and records the token.
    pub(crate) fn visit(&self, pass: u64) -> bool {
        if self.pass.get() == pass {
            true
        } else {
            self.pass.set(pass);
            false
        }
    }
}

// =============================================================================
// Interning Key
// =============================================================================

/// Structural interning key: kind plus element ids. Named sigmas never go
/// through the table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct TypeKey {
    pub kind: TypeKind,
    pub elems: SmallVec<[TypeId; 4]>,
}

// =============================================================================
// Tests
// =============================================================================
