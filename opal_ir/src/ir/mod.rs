//! The hash-consed CPS/SSA graph IR.
//!
//! # Core Components
//!
//! - **Arena** (`arena.rs`): typed ids and node storage
//! - **Types** (`types.rs`): structurally interned types
//! - **Ops** (`ops.rs`): primop kind definitions
//! - **Defs** (`def.rs`): nodes, operand lists and use-sets
//! - **Folding** (`fold.rs`): constant folding with local error signalling
//! - **World** (`world.rs`): arena owner, interning tables, pass counter
//! - **Continuations** (`cont.rs`): jumps, branches, preds/succs
//!
//! # Design Principles
//!
//! - **Hash-consing**: primops and types are canonical by structure
//! - **Use-def mirror**: every operand edge is tracked in the operand's
//!   use-set, so transforms can rewire in O(uses)
//! - **Pass tokens**: O(1) visited-marking without per-traversal resets

pub mod arena;
pub mod cont;
pub mod def;
pub mod fold;
pub mod ops;
pub mod types;
pub mod world;

pub use arena::{Arena, BitSet, Id};
pub use def::{ContData, DefId, DefKind, DefNode, Intrinsic, Use};
pub use fold::FoldError;
pub use ops::{ArithOp, BitOp, CmpOp, LitValue, PrimOpKind};
pub use types::{PrimTypeKind, TypeId, TypeKind, TypeNode};
pub use world::World;
