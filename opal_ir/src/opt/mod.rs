//! Transforms over the def graph.
//!
//! - **Mangling** (`mangle.rs`): scope cloning under a substitution
//! - **Partial evaluation** (`partial_eval.rs`): specialization by call
//!   site with a fingerprint cache
//! - **Inlining** (`inline.rs`): bounded inlining of small continuations
//! - **Frame lifting** (`lift_frames.rs`): one stack frame per function
//! - **Flow rewrite** (`rewrite_flow.rs`): `FlowTask`/`FlowGraph` erasure
//!
//! Transforms mutate through the world and finish with `cleanup`; analyses
//! must be re-extracted afterwards.

pub mod inline;
pub mod lift_frames;
pub mod mangle;
pub mod partial_eval;
pub mod rewrite_flow;

pub use inline::{force_inline, inliner, inliner_with, InlinerConfig};
pub use lift_frames::lift_frames;
pub use mangle::{drop_call, ScopeData};
pub use partial_eval::partial_evaluation;
pub use rewrite_flow::rewrite_flow_graphs;
