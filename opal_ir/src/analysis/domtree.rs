//! Dominator trees over a scope's CFG.
//!
//! Built with the iterative Cooper-Harvey-Kennedy fixed point: process the
//! CFG in (backward) reverse post-order, intersecting the predecessors'
//! current idoms by walking up the idom chain comparing CFG indices, until
//! nothing changes.
//!
//! The forward tree uses RPO indices and predecessors; the backward tree
//! (post-dominators) uses backward RPO indices and successors. Multiple
//! roots — several entries forward, several exits backward — hang off an
//! internal virtual root; externally every root is its own idom.

use rustc_hash::FxHashMap;

use crate::ir::def::DefId;

use super::scope::Scope;

/// Internal parent sentinel for roots (children of the virtual root).
const VROOT: u32 = u32::MAX - 1;
/// Internal sentinel for nodes not yet processed.
const UNDEF: u32 = u32::MAX;

// =============================================================================
// Dominator Tree
// =============================================================================

/// A (post-)dominator tree; `FORWARD` selects the direction.
pub struct DomTreeBase<const FORWARD: bool> {
    nodes: Vec<DefId>,
    index: FxHashMap<DefId, usize>,
    idom: Vec<u32>,
    children: Vec<Vec<DefId>>,
    depth: Vec<u32>,
    num_roots: usize,
}

/// Forward dominator tree.
pub type DomTree = DomTreeBase<true>;
/// Backward dominator tree (post-dominators).
pub type PostDomTree = DomTreeBase<false>;

fn intersect(idom: &[u32], mut a: u32, mut b: u32) -> u32 {
    loop {
        if a == b {
            return a;
        }
        if a == VROOT || b == VROOT {
            return VROOT;
        }
        if a > b {
            a = idom[a as usize];
        } else {
            b = idom[b as usize];
        }
    }
}

impl<const FORWARD: bool> DomTreeBase<FORWARD> {
    /// Build the tree for a scope.
    pub fn build(scope: &Scope<'_>) -> Self {
        let nodes: Vec<DefId> = if FORWARD {
            scope.rpo().to_vec()
        } else {
            scope.backwards_rpo().to_vec()
        };
        let num_roots = if FORWARD {
            scope.entries().len()
        } else {
            scope.exits().len()
        };
        let n = nodes.len();
        let index: FxHashMap<DefId, usize> =
            nodes.iter().enumerate().map(|(i, &c)| (c, i)).collect();

        // CFG predecessors in the chosen direction, as tree indices.
        let preds_of = |i: usize| -> Vec<usize> {
            let cont = nodes[i];
            let list = if FORWARD {
                scope.preds(cont)
            } else {
                scope.succs(cont)
            };
            list.iter().filter_map(|d| index.get(d)).copied().collect()
        };

        let mut idom = vec![UNDEF; n];
        for slot in idom.iter_mut().take(num_roots) {
            *slot = VROOT;
        }

        let mut changed = true;
        while changed {
            changed = false;
            for i in num_roots..n {
                let mut new_idom = UNDEF;
                for p in preds_of(i) {
                    if idom[p] == UNDEF {
                        continue;
                    }
                    new_idom = if new_idom == UNDEF {
                        p as u32
                    } else {
                        intersect(&idom, new_idom, p as u32)
                    };
                }
                if new_idom != UNDEF && idom[i] != new_idom {
                    idom[i] = new_idom;
                    changed = true;
                }
            }
        }

        let mut children: Vec<Vec<DefId>> = vec![Vec::new(); n];
        for i in num_roots..n {
            let parent = idom[i];
            if parent != VROOT && parent != UNDEF {
                children[parent as usize].push(nodes[i]);
            }
        }

        // Tree indices only ever point earlier, so one pass suffices.
        let mut depth = vec![0u32; n];
        for i in num_roots..n {
            let parent = idom[i];
            if parent != VROOT && parent != UNDEF {
                depth[i] = depth[parent as usize] + 1;
            }
        }

        DomTreeBase {
            nodes,
            index,
            idom,
            children,
            depth,
            num_roots,
        }
    }

    #[inline]
    fn index_of(&self, cont: DefId) -> Option<usize> {
        self.index.get(&cont).copied()
    }

    /// The immediate dominator. Roots (and nodes only the virtual root
    /// dominates) are their own idom.
    pub fn idom(&self, cont: DefId) -> DefId {
        match self.index_of(cont) {
            Some(i) => {
                let parent = self.idom[i];
                if parent == VROOT || parent == UNDEF {
                    cont
                } else {
                    self.nodes[parent as usize]
                }
            }
            None => cont,
        }
    }

    /// The tree children of a continuation.
    pub fn children(&self, cont: DefId) -> &[DefId] {
        match self.index_of(cont) {
            Some(i) => &self.children[i],
            None => &[],
        }
    }

    /// Depth below the tree root; roots have depth 0.
    pub fn depth(&self, cont: DefId) -> u32 {
        self.index_of(cont).map_or(0, |i| self.depth[i])
    }

    /// The least common dominator. Chains that only meet at the virtual
    /// root resolve to the first root.
    pub fn lca(&self, a: DefId, b: DefId) -> DefId {
        let (ia, ib) = match (self.index_of(a), self.index_of(b)) {
            (Some(ia), Some(ib)) => (ia, ib),
            _ => return a,
        };
        let r = intersect(&self.idom, ia as u32, ib as u32);
        if r == VROOT {
            self.nodes[0]
        } else {
            self.nodes[r as usize]
        }
    }

    /// Check whether `a` dominates `b` (reflexively).
    pub fn dominates(&self, a: DefId, b: DefId) -> bool {
        let (ia, ib) = match (self.index_of(a), self.index_of(b)) {
            (Some(ia), Some(ib)) => (ia, ib),
            _ => return false,
        };
        let mut cur = ib as u32;
        loop {
            if cur as usize == ia {
                return true;
            }
            let parent = self.idom[cur as usize];
            if parent == VROOT || parent == UNDEF {
                return false;
            }
            cur = parent;
        }
    }

    /// Check whether `a` strictly dominates `b`.
    pub fn strictly_dominates(&self, a: DefId, b: DefId) -> bool {
        a != b && self.dominates(a, b)
    }

    /// Number of tree roots.
    pub fn num_roots(&self) -> usize {
        self.num_roots
    }

    /// Whether only the virtual root (post-)dominates this node — i.e. it
    /// has no proper idom within the CFG.
    pub fn is_virtual_root_child(&self, cont: DefId) -> bool {
        match self.index_of(cont) {
            Some(i) if i >= self.num_roots => self.idom[i] == VROOT || self.idom[i] == UNDEF,
            Some(_) => true,
            None => true,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::world::World;

    fn diamond(world: &mut World) -> (DefId, DefId, DefId, DefId) {
        let bool_ty = world.type_bool();
        let qs32 = world.type_qs32();
        let ret_ty = world.pi(&[qs32]);
        let entry_ty = world.pi(&[bool_ty, qs32, ret_ty]);
        let entry = world.continuation(entry_ty, "entry");
        let a = world.basicblock("a");
        let b = world.basicblock("b");
        let join_ty = world.pi(&[qs32]);
        let join = world.continuation(join_ty, "join");

        let cond = world.param(entry, 0);
        let x = world.param(entry, 1);
        let ret = world.param(entry, 2);
        world.branch_jump(entry, cond, a, b);
        world.jump(a, join, Vec::new(), &[x]);
        world.jump(b, join, Vec::new(), &[x]);
        let y = world.param(join, 0);
        world.jump(join, ret, Vec::new(), &[y]);

        (entry, a, b, join)
    }

    #[test]
    fn test_diamond_idoms() {
        let mut world = World::new();
        let (entry, a, b, join) = diamond(&mut world);
        let scope = Scope::new(&world, entry);
        let dom = scope.domtree();

        assert_eq!(dom.idom(entry), entry);
        assert_eq!(dom.idom(a), entry);
        assert_eq!(dom.idom(b), entry);
        assert_eq!(dom.idom(join), entry);
    }

    #[test]
    fn test_idom_appears_earlier_in_rpo() {
        let mut world = World::new();
        let (entry, _, _, _) = diamond(&mut world);
        let scope = Scope::new(&world, entry);
        let dom = scope.domtree();

        for &c in scope.rpo().iter().skip(1) {
            let idom = dom.idom(c);
            assert!(scope.sid(idom).unwrap() < scope.sid(c).unwrap());
        }
    }

    #[test]
    fn test_dominates_and_depth() {
        let mut world = World::new();
        let (entry, a, b, join) = diamond(&mut world);
        let scope = Scope::new(&world, entry);
        let dom = scope.domtree();

        assert!(dom.dominates(entry, join));
        assert!(dom.dominates(entry, entry));
        assert!(!dom.dominates(a, join));
        assert!(dom.strictly_dominates(entry, a));
        assert_eq!(dom.depth(entry), 0);
        assert_eq!(dom.depth(a), 1);
        assert_eq!(dom.depth(join), 1);
        assert_eq!(dom.lca(a, b), entry);
        assert_eq!(dom.lca(a, join), entry);
        assert_eq!(dom.lca(join, join), join);

        let mut children = dom.children(entry).to_vec();
        children.sort();
        let mut expected = vec![a, b, join];
        expected.sort();
        assert_eq!(children, expected);
    }

    #[test]
    fn test_postdoms_mirror() {
        let mut world = World::new();
        let (entry, a, b, join) = diamond(&mut world);
        let scope = Scope::new(&world, entry);
        let pdom = scope.postdomtree();

        assert_eq!(pdom.idom(join), join);
        assert_eq!(pdom.idom(a), join);
        assert_eq!(pdom.idom(b), join);
        assert_eq!(pdom.idom(entry), join);
        assert!(pdom.dominates(join, entry));
    }
}
