//! Opal IR: a hash-consed, continuation-passing-style SSA graph IR with
//! scope analysis, instruction scheduling and partial evaluation.
//!
//! A whole program is a graph of three def families: hash-consed
//! **primops**, **params**, and first-class **continuations** whose jumps
//! double as basic-block terminators and function calls. On top of the
//! graph sit:
//!
//! - [`Scope`](analysis::Scope): the region of continuations depending on
//!   an entry's params, with forward/backward RPO numbering
//! - [`DomTree`](analysis::DomTree)/[`PostDomTree`](analysis::PostDomTree)
//!   and the natural-loop forest
//! - the scheduler ([`schedule_early`](analysis::schedule_early),
//!   [`schedule_late`](analysis::schedule_late),
//!   [`schedule_smart`](analysis::schedule_smart))
//! - the transforms: [`partial_evaluation`](opt::partial_evaluation),
//!   [`inliner`](opt::inliner), [`lift_frames`](opt::lift_frames),
//!   [`rewrite_flow_graphs`](opt::rewrite_flow_graphs)
//!
//! Back-ends consume a scheduled scope read-only: continuations in RPO,
//! per-continuation primop lists, and call shapes (direct tail calls, and
//! conditional branches as jumps to the `branch` intrinsic). GPU back-ends
//! additionally emit the fixed host-runtime sequence around kernel
//! launches (`malloc_gpu`, `mem_to_gpu`, `load_kernel`, `set_kernel_arg`,
//! `set_problem_size`, `launch_kernel`, `synchronize`, `mem_to_host`,
//! `free_gpu`); neither code generation nor that runtime lives here.
//!
//! The core is single-threaded: a [`World`] is mutated by one pass at a
//! time, and holding a [`Scope`](analysis::Scope) borrows the world so
//! stale analyses cannot outlive a mutation.

pub mod analysis;
pub mod ir;
pub mod opt;

pub use analysis::{
    schedule_early, schedule_late, schedule_smart, DomTree, LoopInfo, LoopTree, PostDomTree,
    Schedule, Scope,
};
pub use ir::{
    ArithOp, BitOp, CmpOp, DefId, DefKind, DefNode, FoldError, Intrinsic, LitValue, PrimOpKind,
    PrimTypeKind, TypeId, TypeKind, TypeNode, Use, World,
};
pub use opt::{
    drop_call, force_inline, inliner, inliner_with, lift_frames, partial_evaluation,
    rewrite_flow_graphs, InlinerConfig, ScopeData,
};
