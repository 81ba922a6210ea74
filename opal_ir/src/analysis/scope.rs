//! Scope: the region of continuations live from the view of its entries.
//!
//! Starting from each entry, the parameters' use-closure is walked through
//! non-continuation defs; every continuation encountered joins the scope
//! and the walk recurses upward through its predecessors, stopping at entry
//! barriers. The result is exactly the set of continuations that
//! transitively depend on the entries' parameters.
//!
//! Reachable continuations are numbered in reverse post-order from the
//! entries (forward) and from the exits (backward). Dominator trees, the
//! loop forest and the CFG projections are computed on first demand and
//! cached; any IR mutation invalidates them, which the borrow on the world
//! enforces statically.

use once_cell::unsync::OnceCell;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::ir::def::DefId;
use crate::ir::world::World;

use super::domtree::{DomTree, DomTreeBase, PostDomTree};
use super::looptree::{LoopInfo, LoopTree};

// =============================================================================
// Scope
// =============================================================================

/// A sub-graph of continuations reachable from one or more entries.
pub struct Scope<'w> {
    world: &'w World,
    entries: Vec<DefId>,
    defs: FxHashSet<DefId>,
    rpo: Vec<DefId>,
    sids: FxHashMap<DefId, usize>,

    backward: OnceCell<Backward>,
    succs: OnceCell<Vec<Vec<DefId>>>,
    preds: OnceCell<Vec<Vec<DefId>>>,
    domtree: OnceCell<DomTree>,
    postdomtree: OnceCell<PostDomTree>,
    looptree: OnceCell<LoopTree>,
    loopinfo: OnceCell<LoopInfo>,
}

struct Backward {
    rpo: Vec<DefId>,
    sids: FxHashMap<DefId, usize>,
    exits: Vec<DefId>,
}

impl<'w> Scope<'w> {
    /// The scope of a single entry.
    pub fn new(world: &'w World, entry: DefId) -> Self {
        Self::with_barriers(world, vec![entry], &[])
    }

    /// The scope of several entries; a virtual super-entry orders them as
    /// given.
    pub fn with_entries(world: &'w World, entries: Vec<DefId>) -> Self {
        Self::with_barriers(world, entries, &[])
    }

    /// A scope limited by a barrier set: the upward walk never crosses a
    /// barrier continuation.
    pub fn with_barriers(world: &'w World, entries: Vec<DefId>, barriers: &[DefId]) -> Self {
        debug_assert!(!entries.is_empty(), "scope needs at least one entry");
        let mut scope = Scope {
            world,
            entries,
            defs: FxHashSet::default(),
            rpo: Vec::new(),
            sids: FxHashMap::default(),
            backward: OnceCell::new(),
            succs: OnceCell::new(),
            preds: OnceCell::new(),
            domtree: OnceCell::new(),
            postdomtree: OnceCell::new(),
            looptree: OnceCell::new(),
            loopinfo: OnceCell::new(),
        };
        scope.identify(barriers);
        scope.rpo_numbering();
        scope
    }

    /// Visit the scope of every external continuation.
    pub fn for_each<F: FnMut(Scope<'_>)>(world: &World, mut f: F) {
        let entries: Vec<DefId> = world.externals().collect();
        for entry in entries {
            f(Scope::new(world, entry));
        }
    }

    // =========================================================================
    // Region Identification
    // =========================================================================

    fn identify(&mut self, barriers: &[DefId]) {
        for i in 0..self.entries.len() {
            self.defs.insert(self.entries[i]);
        }
        for i in 0..self.entries.len() {
            let entry = self.entries[i];
            self.param_users(entry, barriers);
        }
    }

    fn param_users(&mut self, cont: DefId, barriers: &[DefId]) {
        for &param in self.world.params(cont) {
            self.find_user(param, barriers);
        }
    }

    fn find_user(&mut self, def: DefId, barriers: &[DefId]) {
        if self.world.def(def).is_continuation() {
            self.up(def, barriers);
        } else {
            if !self.defs.insert(def) {
                return;
            }
            let users: Vec<DefId> = self.world.def(def).uses().iter().map(|u| u.user).collect();
            for user in users {
                self.find_user(user, barriers);
            }
        }
    }

    fn up(&mut self, cont: DefId, barriers: &[DefId]) {
        if self.defs.contains(&cont) || barriers.contains(&cont) {
            return;
        }
        self.defs.insert(cont);
        self.param_users(cont, barriers);
        for pred in self.world.preds(cont) {
            self.up(pred, barriers);
        }
    }

    // =========================================================================
    // RPO Numbering
    // =========================================================================

    fn rpo_numbering(&mut self) {
        let mut visited: FxHashSet<DefId> = self.entries.iter().copied().collect();
        let mut post: Vec<DefId> = Vec::new();
        for i in 0..self.entries.len() {
            let entry = self.entries[i];
            self.po_visit(entry, &mut visited, &mut post);
        }

        self.rpo = self.entries.clone();
        self.rpo.extend(post.iter().rev());
        self.sids = self
            .rpo
            .iter()
            .enumerate()
            .map(|(i, &c)| (c, i))
            .collect();
    }

    /// Postorder DFS over in-scope successors. Successors are walked in
    /// reverse so the first successor of a branch comes first in RPO.
    fn po_visit(&self, cur: DefId, visited: &mut FxHashSet<DefId>, post: &mut Vec<DefId>) {
        let succs = self.world.succs(cur);
        for &succ in succs.iter().rev() {
            if self.defs.contains(&succ) && visited.insert(succ) {
                self.po_visit(succ, visited, post);
                post.push(succ);
            }
        }
    }

    fn backward(&self) -> &Backward {
        self.backward.get_or_init(|| {
            let exits: Vec<DefId> = self
                .rpo
                .iter()
                .copied()
                .filter(|&c| {
                    self.world
                        .succs(c)
                        .iter()
                        .all(|s| !self.sids.contains_key(s))
                })
                .collect();

            let mut visited: FxHashSet<DefId> = exits.iter().copied().collect();
            let mut post: Vec<DefId> = Vec::new();
            for &exit in &exits {
                self.bpo_visit(exit, &mut visited, &mut post);
            }

            let mut rpo = exits.clone();
            rpo.extend(post.iter().rev());
            let sids = rpo.iter().enumerate().map(|(i, &c)| (c, i)).collect();
            Backward { rpo, sids, exits }
        })
    }

    fn bpo_visit(&self, cur: DefId, visited: &mut FxHashSet<DefId>, post: &mut Vec<DefId>) {
        let preds = self.world.preds(cur);
        for &pred in preds.iter().rev() {
            if self.sids.contains_key(&pred) && visited.insert(pred) {
                self.bpo_visit(pred, visited, post);
                post.push(pred);
            }
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// The world this scope was extracted from.
    #[inline]
    pub fn world(&self) -> &'w World {
        self.world
    }

    /// Check whether a def belongs to this scope.
    #[inline]
    pub fn contains(&self, def: DefId) -> bool {
        self.defs.contains(&def)
    }

    /// Every def in this scope: continuations, their params and the
    /// parameters' transitive users.
    #[inline]
    pub fn defs(&self) -> &FxHashSet<DefId> {
        &self.defs
    }

    /// Number of reachable continuations.
    #[inline]
    pub fn size(&self) -> usize {
        self.rpo.len()
    }

    /// The first entry.
    #[inline]
    pub fn entry(&self) -> DefId {
        self.entries[0]
    }

    /// All entries in input order.
    #[inline]
    pub fn entries(&self) -> &[DefId] {
        &self.entries
    }

    /// Continuations without an in-scope successor.
    pub fn exits(&self) -> &[DefId] {
        &self.backward().exits
    }

    /// Reachable continuations in reverse post-order; entries first.
    #[inline]
    pub fn rpo(&self) -> &[DefId] {
        &self.rpo
    }

    /// Reachable continuations in backward reverse post-order; exits first.
    pub fn backwards_rpo(&self) -> &[DefId] {
        &self.backward().rpo
    }

    /// Forward RPO index; unreachable continuations have none.
    pub fn sid(&self, cont: DefId) -> Option<usize> {
        self.sids.get(&cont).copied()
    }

    /// Backward RPO index; continuations unreachable from the exits have
    /// none.
    pub fn backwards_sid(&self, cont: DefId) -> Option<usize> {
        self.backward().sids.get(&cont).copied()
    }

    /// Successors projected to the scope, cached per continuation.
    pub fn succs(&self, cont: DefId) -> &[DefId] {
        let table = self.succs.get_or_init(|| {
            self.rpo
                .iter()
                .map(|&c| {
                    self.world
                        .succs(c)
                        .into_iter()
                        .filter(|s| self.sids.contains_key(s))
                        .collect()
                })
                .collect()
        });
        match self.sid(cont) {
            Some(sid) => &table[sid],
            None => &[],
        }
    }

    /// Predecessors projected to the scope, cached per continuation.
    pub fn preds(&self, cont: DefId) -> &[DefId] {
        let table = self.preds.get_or_init(|| {
            self.rpo
                .iter()
                .map(|&c| {
                    self.world
                        .preds(c)
                        .into_iter()
                        .filter(|p| self.sids.contains_key(p))
                        .collect()
                })
                .collect()
        });
        match self.sid(cont) {
            Some(sid) => &table[sid],
            None => &[],
        }
    }

    // =========================================================================
    // Lazy Analyses
    // =========================================================================

    /// The forward dominator tree.
    pub fn domtree(&self) -> &DomTree {
        self.domtree.get_or_init(|| DomTreeBase::build(self))
    }

    /// The post-dominator tree over the backward CFG.
    pub fn postdomtree(&self) -> &PostDomTree {
        self.postdomtree.get_or_init(|| DomTreeBase::build(self))
    }

    /// The loop forest.
    pub fn looptree(&self) -> &LoopTree {
        self.looptree.get_or_init(|| LoopTree::build(self))
    }

    /// Per-continuation loop nesting depths.
    pub fn loopinfo(&self) -> &LoopInfo {
        self.loopinfo
            .get_or_init(|| LoopInfo::build(self.looptree(), self.rpo()))
    }
}

impl std::fmt::Debug for Scope<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Scope({} continuations)", self.rpo.len())
    }
}

// =============================================================================
// Tests
// =============================================================================
