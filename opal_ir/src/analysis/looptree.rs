//! Natural-loop forest over a scope's CFG.
//!
//! Back edges are edges whose target dominates their source. Each back
//! edge's loop body is found by reverse reachability limited to the header;
//! loops nest by containment. A continuation's depth is the nesting level
//! of its innermost loop, 0 outside any loop.

use rustc_hash::FxHashMap;

use crate::ir::arena::BitSet;
use crate::ir::def::DefId;

use super::scope::Scope;

// =============================================================================
// Loop Forest
// =============================================================================

/// A natural loop.
#[derive(Debug, Clone)]
pub struct Loop {
    /// The loop header.
    pub header: DefId,
    /// Back edge sources (continuations that jump back to the header).
    pub back_edges: Vec<DefId>,
    /// All continuations in the loop body, header included.
    pub body: Vec<DefId>,
    /// Enclosing loop, if nested.
    pub parent: Option<usize>,
    /// Directly nested loops.
    pub children: Vec<usize>,
    /// Nesting level; outermost loops have depth 1.
    pub depth: u32,
}

/// The loop forest of a scope.
pub struct LoopTree {
    loops: Vec<Loop>,
    header_to_loop: FxHashMap<DefId, usize>,
    cont_to_loop: FxHashMap<DefId, usize>,
}

impl LoopTree {
    /// Compute the forest.
    pub fn build(scope: &Scope<'_>) -> Self {
        let mut tree = LoopTree {
            loops: Vec::new(),
            header_to_loop: FxHashMap::default(),
            cont_to_loop: FxHashMap::default(),
        };

        let dom = scope.domtree();
        for &cont in scope.rpo() {
            for &succ in scope.succs(cont) {
                if dom.dominates(succ, cont) {
                    tree.add_loop(scope, succ, cont);
                }
            }
        }

        tree.compute_nesting();

        // Innermost loop per continuation: deeper loops assign last.
        let mut order: Vec<usize> = (0..tree.loops.len()).collect();
        order.sort_by_key(|&i| tree.loops[i].depth);
        for i in order {
            for &cont in &tree.loops[i].body {
                tree.cont_to_loop.insert(cont, i);
            }
        }

        tree
    }

    fn add_loop(&mut self, scope: &Scope<'_>, header: DefId, back_edge: DefId) {
        if let Some(&idx) = self.header_to_loop.get(&header) {
            if !self.loops[idx].back_edges.contains(&back_edge) {
                self.loops[idx].back_edges.push(back_edge);
                self.grow_body(scope, idx, back_edge);
            }
            return;
        }

        let idx = self.loops.len();
        self.loops.push(Loop {
            header,
            back_edges: vec![back_edge],
            body: vec![header],
            parent: None,
            children: Vec::new(),
            depth: 1,
        });
        self.header_to_loop.insert(header, idx);
        self.grow_body(scope, idx, back_edge);
    }

    /// Reverse reachability from the back edge source, bounded by the
    /// header.
    fn grow_body(&mut self, scope: &Scope<'_>, idx: usize, back_edge: DefId) {
        let mut in_body = BitSet::with_capacity(scope.size());
        for &c in &self.loops[idx].body {
            if let Some(sid) = scope.sid(c) {
                in_body.insert(sid);
            }
        }

        let mut worklist = vec![back_edge];
        while let Some(cont) = worklist.pop() {
            let sid = match scope.sid(cont) {
                Some(sid) => sid,
                None => continue,
            };
            if in_body.contains(sid) {
                continue;
            }
            in_body.insert(sid);
            self.loops[idx].body.push(cont);
            for &pred in scope.preds(cont) {
                worklist.push(pred);
            }
        }
    }

    fn compute_nesting(&mut self) {
        let n = self.loops.len();
        for i in 0..n {
            let header = self.loops[i].header;
            let mut smallest: Option<usize> = None;
            let mut smallest_size = usize::MAX;
            for j in 0..n {
                if i != j
                    && self.loops[j].header != header
                    && self.loops[j].body.contains(&header)
                    && self.loops[j].body.len() < smallest_size
                {
                    smallest = Some(j);
                    smallest_size = self.loops[j].body.len();
                }
            }
            if let Some(parent) = smallest {
                self.loops[i].parent = Some(parent);
                self.loops[parent].children.push(i);
            }
        }

        for i in 0..n {
            let mut depth = 1;
            let mut cur = self.loops[i].parent;
            while let Some(parent) = cur {
                depth += 1;
                cur = self.loops[parent].parent;
            }
            self.loops[i].depth = depth;
        }
    }

    /// All loops.
    pub fn loops(&self) -> &[Loop] {
        &self.loops
    }

    /// The innermost loop containing a continuation.
    pub fn loop_of(&self, cont: DefId) -> Option<&Loop> {
        self.cont_to_loop.get(&cont).map(|&i| &self.loops[i])
    }

    /// The loop headed by a continuation, if it is a header.
    pub fn loop_of_header(&self, header: DefId) -> Option<&Loop> {
        self.header_to_loop.get(&header).map(|&i| &self.loops[i])
    }

    /// Nesting depth of a continuation; 0 outside any loop.
    pub fn depth(&self, cont: DefId) -> u32 {
        self.loop_of(cont).map_or(0, |l| l.depth)
    }
}

// =============================================================================
// Loop Info
// =============================================================================

/// Flat per-continuation depth view of the forest.
pub struct LoopInfo {
    depths: FxHashMap<DefId, u32>,
}

impl LoopInfo {
    pub(crate) fn build(tree: &LoopTree, rpo: &[DefId]) -> Self {
        let depths = rpo.iter().map(|&c| (c, tree.depth(c))).collect();
        LoopInfo { depths }
    }

    /// Nesting depth of a continuation; 0 outside any loop.
    pub fn depth(&self, cont: DefId) -> u32 {
        self.depths.get(&cont).copied().unwrap_or(0)
    }
}

// =============================================================================
// Tests
// =============================================================================
