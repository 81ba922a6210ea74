//! Analyses over the def graph.
//!
//! - **Scope** (`scope.rs`): region extraction and RPO numbering
//! - **Dominator trees** (`domtree.rs`): forward and backward CHK
//! - **Loop forest** (`looptree.rs`): natural loops and nesting depths
//! - **Scheduler** (`schedule.rs`): early/late/smart primop placement
//!
//! All derived state is computed on first demand and cached on the scope;
//! the scope's borrow of the world makes stale reuse across mutation a
//! compile error rather than a runtime hazard.

pub mod domtree;
pub mod looptree;
pub mod schedule;
pub mod scope;

pub use domtree::{DomTree, DomTreeBase, PostDomTree};
pub use looptree::{Loop, LoopInfo, LoopTree};
pub use schedule::{schedule_early, schedule_late, schedule_smart, Schedule};
pub use scope::Scope;
