//! Partial evaluation: specialization by call site.
//!
//! `run`/`hlt` markers steer the evaluator: a site whose callee is wrapped
//! in `run` is evaluated from that site to the marker's end continuation;
//! `hlt`-wrapped arguments are holes that never specialize.
//!
//! Each evaluated call is keyed by its fingerprint — the type arguments and
//! the operand tuple with holes at `hlt` positions. Fingerprints hit a
//! cache of previous specializations, so two sites with equal fingerprints
//! share one specialization. A fully applied call turns into a true tail
//! merge. Unknown destinations fall through to the post-dominator; missing
//! post-dominators are logged and evaluation continues conservatively.

use std::collections::VecDeque;

use log::{debug, warn};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::analysis::scope::Scope;
use crate::ir::def::DefId;
use crate::ir::ops::PrimOpKind;
use crate::ir::types::TypeId;
use crate::ir::world::World;

use super::mangle::{drop_call, ScopeData};

// =============================================================================
// Call Fingerprint
// =============================================================================

/// `(type_args, ops)` with `ops[0]` the callee and holes (`None`) at
/// argument positions wrapped in `hlt`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CallKey {
    type_args: Vec<TypeId>,
    ops: Vec<Option<DefId>>,
}

// =============================================================================
// Scope Snapshots
// =============================================================================

/// The owned slice of a scope the evaluator consults between mutations.
struct OwnedScope {
    defs: FxHashSet<DefId>,
    succs: FxHashMap<DefId, Vec<DefId>>,
    /// Proper post-dominator per continuation; `None` when only the virtual
    /// root post-dominates it.
    postdom: FxHashMap<DefId, Option<DefId>>,
}

fn capture(world: &World, entry: DefId) -> OwnedScope {
    let scope = Scope::new(world, entry);
    let succs = scope
        .rpo()
        .iter()
        .map(|&c| (c, scope.succs(c).to_vec()))
        .collect();
    let pdt = scope.postdomtree();
    let postdom = scope
        .rpo()
        .iter()
        .map(|&c| {
            let p = pdt.idom(c);
            (c, if p == c { None } else { Some(p) })
        })
        .collect();
    OwnedScope {
        defs: scope.defs().clone(),
        succs,
        postdom,
    }
}

// =============================================================================
// Partial Evaluator
// =============================================================================

struct PartialEvaluator<'w> {
    world: &'w mut World,
    top_entry: DefId,
    top: Option<OwnedScope>,
    cur_entry: DefId,
    cur: Option<OwnedScope>,
    done: FxHashSet<DefId>,
    visited: FxHashSet<DefId>,
    queue: VecDeque<DefId>,
    cache: FxHashMap<CallKey, DefId>,
}

impl<'w> PartialEvaluator<'w> {
    fn new(world: &'w mut World, top_entry: DefId) -> Self {
        PartialEvaluator {
            world,
            top_entry,
            top: None,
            cur_entry: top_entry,
            cur: None,
            done: FxHashSet::default(),
            visited: FxHashSet::default(),
            queue: VecDeque::new(),
            cache: FxHashMap::default(),
        }
    }

    fn top(&mut self) -> &OwnedScope {
        if self.top.is_none() {
            self.top = Some(capture(self.world, self.top_entry));
        }
        self.top.as_ref().expect("just captured")
    }

    fn cur_scope(&mut self) -> &OwnedScope {
        if self.cur.is_none() {
            self.cur = Some(capture(self.world, self.cur_entry));
        }
        self.cur.as_ref().expect("just captured")
    }

    fn mark_dirty(&mut self) {
        self.top = None;
        self.cur = None;
    }

    fn enqueue(&mut self, cont: DefId) {
        let in_top = self.top().defs.contains(&cont);
        if in_top && self.visited.insert(cont) {
            self.queue.push_back(cont);
        }
    }

    /// The end continuation of the eval marker in `cont`'s callee position.
    fn marker_end(&self, cont: DefId) -> Option<DefId> {
        let to = self.world.callee(cont)?;
        if self.world.def(to).primop_kind().map_or(false, PrimOpKind::is_eval_op) {
            let end = self.world.def(to).op(1);
            if self.world.def(end).is_continuation() {
                return Some(end);
            }
        }
        None
    }

    fn run(&mut self) {
        self.enqueue(self.top_entry);

        while let Some(cont) = self.queue.pop_front() {
            // The tail-merge optimization can expose a new `run` here, so
            // keep evaluating while one is in callee position.
            loop {
                let callee = match self.world.callee(cont) {
                    Some(callee)
                        if self.world.def(callee).primop_kind() == Some(PrimOpKind::Run) =>
                    {
                        callee
                    }
                    _ => break,
                };
                self.cur_entry = cont;
                self.cur = None;
                let end = self.marker_end(cont);
                self.eval(cont, end);
                if self.world.callee(cont) == Some(callee) {
                    break;
                }
            }

            let succs = self
                .top()
                .succs
                .get(&cont)
                .cloned()
                .unwrap_or_default();
            for succ in succs {
                self.enqueue(succ);
            }
        }
    }

    fn eval(&mut self, begin: DefId, end: Option<DefId>) {
        match end {
            None => warn!(
                "no matching end for eval at {}",
                self.world.def(begin).unique_name()
            ),
            Some(end) => debug!(
                "eval: {} -> {}",
                self.world.def(begin).unique_name(),
                self.world.def(end).unique_name()
            ),
        }

        let mut cur = begin;
        loop {
            if self.world.cont_is_empty(cur) {
                warn!("empty: {}", self.world.def(cur).unique_name());
                return;
            }
            if self.done.contains(&cur) {
                debug!("already done: {}", self.world.def(cur).unique_name());
                return;
            }
            self.done.insert(cur);

            let to = self.world.callee(cur).expect("non-empty continuation");
            let dst = match self.world.def(to).primop_kind() {
                Some(PrimOpKind::Run) => {
                    let begin = self.world.def(to).op(0);
                    self.world.def(begin).is_continuation().then_some(begin)
                }
                Some(PrimOpKind::Hlt) => {
                    // Transfer to the marker's end without specializing.
                    match self.marker_end(cur) {
                        Some(next) => {
                            cur = next;
                            continue;
                        }
                        None => {
                            warn!("hlt without end at {}", self.world.def(cur).unique_name());
                            return;
                        }
                    }
                }
                _ => self.world.def(to).is_continuation().then_some(to),
            };

            let dst = match dst {
                Some(dst) if !self.world.cont_is_empty(dst) => dst,
                _ => match self.postdom(cur) {
                    Some(next) => {
                        cur = next;
                        continue;
                    }
                    None => return,
                },
            };

            // Build the fingerprint: holes at hlt-wrapped arguments.
            let site_args = self.world.args(cur).to_vec();
            let arg_opts: Vec<Option<DefId>> = site_args
                .iter()
                .map(|&arg| {
                    if self.world.def(arg).primop_kind() == Some(PrimOpKind::Hlt) {
                        None
                    } else {
                        Some(arg)
                    }
                })
                .collect();
            let all = arg_opts.iter().all(Option::is_some);
            let mut ops = Vec::with_capacity(arg_opts.len() + 1);
            ops.push(Some(dst));
            ops.extend(arg_opts.iter().copied());
            let key = CallKey {
                type_args: self.world.type_args(cur).to_vec(),
                ops,
            };

            if arg_opts.len() != self.world.num_params(dst) {
                warn!(
                    "arity mismatch calling {}",
                    self.world.def(dst).unique_name()
                );
                return;
            }

            if let Some(&cached) = self.cache.get(&key) {
                self.jump_to_spec(cur, cached, &key, &site_args);
                debug!("using cached call at {}", self.world.def(cur).unique_name());
                return;
            }

            let data = {
                let scope = Scope::new(self.world, dst);
                ScopeData::capture(&scope)
            };
            let dropped = drop_call(self.world, &data, &key.type_args, &arg_opts);
            self.mark_dirty();
            self.cache.insert(key.clone(), dropped);
            self.jump_to_spec(cur, dropped, &key, &site_args);

            if all {
                // Fully applied: eat the call up into the site and allow it
                // to be evaluated again (true tail merge).
                let callee = self.world.callee(dropped).expect("dropped body has a jump");
                let ta = self.world.type_args(dropped).to_vec();
                let args = self.world.args(dropped).to_vec();
                self.world.jump(cur, callee, ta, &args);
                self.mark_dirty();
                self.done.remove(&cur);
            } else {
                cur = dropped;
            }

            if Some(dst) == end {
                debug!("end: {}", self.world.def(dst).unique_name());
                return;
            }
        }
    }

    /// Rewrite the site to target a specialization, passing the arguments
    /// at hole positions (still wrapped; the post-pass unwraps them).
    fn jump_to_spec(&mut self, site: DefId, target: DefId, key: &CallKey, site_args: &[DefId]) {
        let holes: Vec<DefId> = site_args
            .iter()
            .enumerate()
            .filter(|(i, _)| key.ops[i + 1].is_none())
            .map(|(_, &arg)| arg)
            .collect();
        self.world.jump(site, target, Vec::new(), &holes);
        self.mark_dirty();
    }

    /// The nearest proper post-dominator with a body, preferring the
    /// current evaluation scope over the top scope.
    fn postdom(&mut self, cur: DefId) -> Option<DefId> {
        if self.cur_entry != self.top_entry {
            if let Some(Some(p)) = self.cur_scope().postdom.get(&cur).copied() {
                if !self.world.cont_is_empty(p) {
                    debug!("postdom: {}", self.world.def(p).unique_name());
                    return Some(p);
                }
            }
        }
        if let Some(Some(p)) = self.top().postdom.get(&cur).copied() {
            if !self.world.cont_is_empty(p) {
                debug!("postdom: {}", self.world.def(p).unique_name());
                return Some(p);
            }
        }
        warn!(
            "no postdom found for {}",
            self.world.def(cur).unique_name()
        );
        None
    }
}

// =============================================================================
// Driver
// =============================================================================

/// Evaluate every external scope to a fixed point, then erase the remaining
/// `run`/`hlt` markers. Idempotent.
pub fn partial_evaluation(world: &mut World) {
    world.cleanup();

    let entries: Vec<DefId> = world.externals().collect();
    for entry in entries {
        PartialEvaluator::new(world, entry).run();
    }

    let markers: Vec<DefId> = world
        .primops()
        .filter(|&p| {
            world
                .def(p)
                .primop_kind()
                .map_or(false, PrimOpKind::is_eval_op)
        })
        .collect();
    for marker in markers {
        let begin = world.def(marker).op(0);
        world.replace(marker, begin);
    }

    world.cleanup();
}

// =============================================================================
// Tests
// =============================================================================
