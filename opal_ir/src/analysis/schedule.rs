//! Instruction scheduling: assign every in-scope primop to a continuation.
//!
//! Three placements produce the same shape of result:
//!
//! - **Early**: a worklist seeded with the params of every continuation in
//!   RPO; a primop is placed in the continuation whose params first made
//!   all of its operands ready.
//! - **Late**: reverse RPO; a primop's continuation is the least common
//!   dominator of all its users' placements.
//! - **Smart**: walk the idom chain from the late placement up to the early
//!   one and settle at the minimum loop depth, hoisting loop-invariant work
//!   out of loops. `enter`/`slot` stay early, `leave` stays late.
//!
//! Within a continuation the order is deterministic: memory ops before
//! other ops of equal readiness, then ascending global id.

use std::collections::VecDeque;

use rustc_hash::FxHashMap;

use crate::ir::def::DefId;
use crate::ir::ops::PrimOpKind;
use crate::ir::world::World;

use super::scope::Scope;

// =============================================================================
// Schedule
// =============================================================================

/// A total mapping from continuations to ordered primop lists.
#[derive(Debug, Default)]
pub struct Schedule {
    map: FxHashMap<DefId, Vec<DefId>>,
}

impl Schedule {
    fn push(&mut self, cont: DefId, primop: DefId) {
        self.map.entry(cont).or_default().push(primop);
    }

    /// The primops scheduled into a continuation, in order.
    pub fn primops(&self, cont: DefId) -> &[DefId] {
        self.map.get(&cont).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// The continuation a primop was assigned to.
    pub fn placement(&self, primop: DefId) -> Option<DefId> {
        self.map
            .iter()
            .find(|(_, list)| list.contains(&primop))
            .map(|(&cont, _)| cont)
    }

    /// Total number of scheduled primops.
    pub fn len(&self) -> usize {
        self.map.values().map(Vec::len).sum()
    }

    /// Check whether nothing was scheduled.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Readiness tie-break: memory ops first, then ascending global id.
fn sort_key(world: &World, def: DefId) -> (u8, u64) {
    let class = match world.def(def).primop_kind() {
        Some(kind) if kind.is_mem_op() => 0,
        _ => 1,
    };
    (class, world.def(def).gid)
}

// =============================================================================
// Early Placement
// =============================================================================

/// Place every primop as early as its operands allow.
pub fn schedule_early(scope: &Scope<'_>) -> Schedule {
    let world = scope.world();
    let mut schedule = Schedule::default();
    let mut counters: FxHashMap<DefId, usize> = FxHashMap::default();
    let pass = world.new_pass();

    for &cont in scope.rpo() {
        let mut queue: VecDeque<DefId> = VecDeque::new();
        for &param in world.params(cont) {
            if scope.contains(param) {
                queue.push_back(param);
            }
        }

        while let Some(def) = queue.pop_front() {
            if world.def(def).is_primop() {
                schedule.push(cont, def);
            }

            let mut ready: Vec<DefId> = Vec::new();
            for use_ in world.def(def).uses() {
                let user = use_.user;
                let user_node = world.def(user);
                if user_node.is_continuation() || !scope.contains(user) {
                    continue;
                }

                if user_node.visit(pass) {
                    let counter = counters
                        .get_mut(&user)
                        .expect("visited user has a counter");
                    *counter -= 1;
                    if *counter == 0 {
                        ready.push(user);
                    }
                } else {
                    // Operands outside the scope are constants from the
                    // region's point of view and never become ready events.
                    let pending = user_node
                        .ops()
                        .iter()
                        .filter(|&&op| {
                            scope.contains(op) && !world.def(op).is_continuation()
                        })
                        .count();
                    debug_assert!(pending > 0);
                    let counter = pending - 1;
                    counters.insert(user, counter);
                    if counter == 0 {
                        ready.push(user);
                    }
                }
            }

            ready.sort_by_key(|&d| sort_key(world, d));
            queue.extend(ready);
        }
    }

    schedule
}

// =============================================================================
// Late Placement
// =============================================================================

fn decrease(
    world: &World,
    scope: &Scope<'_>,
    counts: &mut FxHashMap<DefId, usize>,
    zero: &mut Vec<DefId>,
    def: DefId,
) {
    for &op in world.def(def).ops() {
        if world.def(op).is_primop() && scope.contains(op) {
            if let Some(counter) = counts.get_mut(&op) {
                *counter -= 1;
                if *counter == 0 {
                    zero.push(op);
                }
            }
        }
    }
}

fn schedule_late_impl(scope: &Scope<'_>) -> (Schedule, FxHashMap<DefId, DefId>) {
    let world = scope.world();
    let domtree = scope.domtree();
    let mut schedule = Schedule::default();

    // In-scope use counts; dead primops never enter the map.
    let mut counts: FxHashMap<DefId, usize> = FxHashMap::default();
    for &def in scope.defs() {
        if world.def(def).is_primop() {
            let num = world
                .def(def)
                .uses()
                .iter()
                .filter(|u| scope.contains(u.user))
                .count();
            if num != 0 {
                counts.insert(def, num);
            }
        }
    }

    let mut late_map: FxHashMap<DefId, DefId> = FxHashMap::default();
    let mut zero: Vec<DefId> = Vec::new();

    for &cur in scope.rpo().iter().rev() {
        late_map.insert(cur, cur);
        decrease(world, scope, &mut counts, &mut zero, cur);

        while !zero.is_empty() {
            // Reverse readiness order: the final per-list reversal restores
            // memory-ops-first.
            zero.sort_by_key(|&d| std::cmp::Reverse(sort_key(world, d)));
            let batch = std::mem::take(&mut zero);

            for &primop in &batch {
                let mut late = cur;
                for use_ in world.def(primop).uses() {
                    if scope.contains(use_.user) {
                        let user_late = late_map
                            .get(&use_.user)
                            .copied()
                            .expect("user placed before its operand");
                        late = domtree.lca(late, user_late);
                    }
                }
                late_map.insert(primop, late);
                schedule.push(late, primop);
            }

            for &primop in &batch {
                decrease(world, scope, &mut counts, &mut zero, primop);
            }
        }
    }

    for list in schedule.map.values_mut() {
        list.reverse();
    }

    (schedule, late_map)
}

/// Place every live primop as late as dominance of its users allows.
pub fn schedule_late(scope: &Scope<'_>) -> Schedule {
    schedule_late_impl(scope).0
}

// =============================================================================
// Smart Placement
// =============================================================================

/// Hoist loop-invariant primops while keeping memory-effecting ops pinned:
/// walk from the late placement up the dominator chain to the early one and
/// settle at the minimum loop depth (ties resolve closest to late).
pub fn schedule_smart(scope: &Scope<'_>) -> Schedule {
    let world = scope.world();
    let domtree = scope.domtree();
    let loopinfo = scope.loopinfo();
    let early = schedule_early(scope);
    let (_, late_map) = schedule_late_impl(scope);

    let mut smart = Schedule::default();
    for &cont_early in scope.rpo() {
        for &primop in early.primops(cont_early) {
            let late = match late_map.get(&primop) {
                Some(&late) => late,
                None => continue, // dead
            };
            let kind = world.def(primop).primop_kind().expect("scheduled primop");

            let best = match kind {
                // Frame acquisition and slots must precede every dependent
                // load/store/lea.
                PrimOpKind::Enter | PrimOpKind::Slot { .. } => cont_early,
                // Frame release must not be hoisted out of its frame.
                PrimOpKind::Leave => late,
                _ => {
                    let mut best = late;
                    let mut best_depth = u32::MAX;
                    let mut cur = late;
                    loop {
                        let depth = loopinfo.depth(cur);
                        if depth < best_depth {
                            best = cur;
                            best_depth = depth;
                        }
                        if cur == cont_early {
                            break;
                        }
                        let up = domtree.idom(cur);
                        if up == cur {
                            break;
                        }
                        cur = up;
                    }
                    best
                }
            };

            smart.push(best, primop);
        }
    }

    smart
}

// =============================================================================
// Tests
// =============================================================================
