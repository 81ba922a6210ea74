//! Continuation operations.
//!
//! A continuation is a first-class CPS block that doubles as a function.
//! Its jump is stored as the node's operand list: `ops[0]` is the callee,
//! `ops[1..]` are the arguments. An unconditional jump is an ordinary
//! application; a conditional branch is a jump to the `branch` intrinsic
//! with `(cond, then, else)`. No other branching primitive exists.

use std::collections::VecDeque;

use smallvec::SmallVec;

use super::def::{ContData, DefId, DefKind, DefNode, Intrinsic, Use};
use super::types::TypeId;
use super::world::World;
use crate::ir::ops::LitValue;

impl World {
    /// Create a continuation of the given pi type with fresh params.
    pub fn continuation(&mut self, ty: TypeId, name: &str) -> DefId {
        debug_assert!(self.types[ty].is_pi(), "continuation needs a pi type");
        let gid = self.next_gid();
        let id = self.defs.alloc(DefNode::new(
            DefKind::Continuation(ContData::new()),
            ty,
            SmallVec::new(),
            gid,
            true,
        ));
        if !name.is_empty() {
            self.defs[id].name = Some(name.into());
        }

        let elems: Vec<TypeId> = self.types[ty].elems.to_vec();
        let mut params = Vec::with_capacity(elems.len());
        for (i, &param_ty) in elems.iter().enumerate() {
            let pgid = self.next_gid();
            let param = self.defs.alloc(DefNode::new(
                DefKind::Param {
                    cont: id,
                    index: i as u32,
                },
                param_ty,
                SmallVec::new(),
                pgid,
                false,
            ));
            params.push(param);
        }
        self.defs[id]
            .cont_mut()
            .expect("just created a continuation")
            .params = params;
        self.continuations.push(id);
        id
    }

    /// A parameterless continuation (a plain basic block).
    pub fn basicblock(&mut self, name: &str) -> DefId {
        let ty = self.pi(&[]);
        self.continuation(ty, name)
    }

    /// Ordered params of a continuation.
    pub fn params(&self, cont: DefId) -> &[DefId] {
        self.defs[cont]
            .cont()
            .map(|data| data.params.as_slice())
            .unwrap_or(&[])
    }

    /// The `i`-th param.
    pub fn param(&self, cont: DefId, i: usize) -> DefId {
        self.params(cont)[i]
    }

    /// Number of params.
    pub fn num_params(&self, cont: DefId) -> usize {
        self.params(cont).len()
    }

    /// The first mem-typed param, if any.
    pub fn mem_param(&self, cont: DefId) -> Option<DefId> {
        self.params(cont)
            .iter()
            .copied()
            .find(|&p| self.types[self.defs[p].ty].is_mem())
    }

    /// Append a param to an unsealed continuation, growing its pi type.
    pub fn append_param(&mut self, cont: DefId, ty: TypeId, name: &str) -> DefId {
        assert!(
            !self.defs[cont].cont().map_or(false, |d| d.sealed),
            "appending a param to a sealed continuation"
        );
        let mut elems: Vec<TypeId> = self.types[self.defs[cont].ty].elems.to_vec();
        elems.push(ty);
        let new_ty = self.pi(&elems);
        self.defs[cont].ty = new_ty;

        let index = self.num_params(cont) as u32;
        let pgid = self.next_gid();
        let param = self.defs.alloc(DefNode::new(
            DefKind::Param { cont, index },
            ty,
            SmallVec::new(),
            pgid,
            false,
        ));
        if !name.is_empty() {
            self.defs[param].name = Some(name.into());
        }
        self.defs[cont]
            .cont_mut()
            .expect("continuation")
            .params
            .push(param);
        param
    }

    /// Freeze the parameter set.
    pub fn seal(&mut self, cont: DefId) {
        if let Some(data) = self.defs[cont].cont_mut() {
            data.sealed = true;
        }
    }

    /// Mark a continuation as externally visible; externals root `cleanup`.
    pub fn make_external(&mut self, cont: DefId) {
        if let Some(data) = self.defs[cont].cont_mut() {
            if !data.external {
                data.external = true;
                self.externals.push(cont);
            }
        }
    }

    /// Drop a continuation's external status.
    pub fn make_internal(&mut self, cont: DefId) {
        if let Some(data) = self.defs[cont].cont_mut() {
            if data.external {
                data.external = false;
                self.externals.retain(|&c| c != cont);
            }
        }
    }

    /// Check whether a continuation is external.
    pub fn is_external(&self, cont: DefId) -> bool {
        self.defs[cont].cont().map_or(false, |d| d.external)
    }

    /// The intrinsic of a continuation.
    pub fn intrinsic(&self, cont: DefId) -> Intrinsic {
        self.defs[cont]
            .cont()
            .map_or(Intrinsic::None, |d| d.intrinsic)
    }

    /// Set a continuation's jump: `callee(args)` with optional type args.
    pub fn jump(&mut self, cont: DefId, callee: DefId, type_args: Vec<TypeId>, args: &[DefId]) {
        debug_assert!(self.defs[cont].is_continuation());
        self.unset_ops(cont);

        let mut ops: SmallVec<[DefId; 4]> = SmallVec::with_capacity(args.len() + 1);
        ops.push(callee);
        ops.extend_from_slice(args);
        for (i, &op) in ops.iter().enumerate() {
            self.defs[op].uses.insert(Use::new(i, cont));
        }
        self.defs[cont].ops = ops;
        self.defs[cont].cont_mut().expect("continuation").type_args = type_args;
    }

    /// Conditional branch: a jump to the `branch` intrinsic. A literal
    /// condition folds to an unconditional jump, as do equal arms.
    pub fn branch_jump(&mut self, cont: DefId, cond: DefId, t: DefId, f: DefId) {
        if let Some(LitValue::Bool(b)) = self.lit_value(cond) {
            let target = if b { t } else { f };
            self.jump(cont, target, Vec::new(), &[]);
        } else if t == f {
            self.jump(cont, t, Vec::new(), &[]);
        } else {
            let branch = self.branch;
            self.jump(cont, branch, Vec::new(), &[cond, t, f]);
        }
    }

    /// The callee of a continuation's jump.
    pub fn callee(&self, cont: DefId) -> Option<DefId> {
        self.defs[cont].ops.first().copied()
    }

    /// The jump arguments.
    pub fn args(&self, cont: DefId) -> &[DefId] {
        let ops = self.defs[cont].ops();
        if ops.is_empty() {
            &[]
        } else {
            &ops[1..]
        }
    }

    /// The jump type arguments.
    pub fn type_args(&self, cont: DefId) -> &[TypeId] {
        self.defs[cont]
            .cont()
            .map(|d| d.type_args.as_slice())
            .unwrap_or(&[])
    }

    /// A continuation with no jump set is empty (a declaration).
    pub fn cont_is_empty(&self, cont: DefId) -> bool {
        self.defs[cont].ops().is_empty()
    }

    /// Function-nesting order of a continuation.
    pub fn order(&self, cont: DefId) -> usize {
        self.type_order(self.defs[cont].ty)
    }

    /// Successor continuations: every continuation reachable from the jump
    /// operands through non-continuation defs (covers a callee hidden
    /// behind a `select` or an eval marker).
    pub fn succs(&self, cont: DefId) -> Vec<DefId> {
        let mut result = Vec::new();
        let pass = self.new_pass();
        let mut queue: VecDeque<DefId> = VecDeque::new();
        for &op in self.defs[cont].ops() {
            if !self.defs[op].visit(pass) {
                queue.push_back(op);
            }
        }
        while let Some(def) = queue.pop_front() {
            let node = &self.defs[def];
            if node.is_continuation() {
                result.push(def);
            } else if node.is_primop() {
                for &op in node.ops() {
                    if !self.defs[op].visit(pass) {
                        queue.push_back(op);
                    }
                }
            }
        }
        result
    }

    /// Predecessor continuations: every continuation whose jump reaches
    /// this one through non-continuation defs.
    pub fn preds(&self, cont: DefId) -> Vec<DefId> {
        let mut result = Vec::new();
        let pass = self.new_pass();
        let mut queue: VecDeque<DefId> = VecDeque::new();
        for use_ in self.defs[cont].uses() {
            if !self.defs[use_.user].visit(pass) {
                queue.push_back(use_.user);
            }
        }
        while let Some(def) = queue.pop_front() {
            let node = &self.defs[def];
            if node.is_continuation() {
                result.push(def);
            } else if node.is_primop() {
                for use_ in node.uses() {
                    if !self.defs[use_.user].visit(pass) {
                        queue.push_back(use_.user);
                    }
                }
            }
        }
        result
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_branch_jump_folds_literal_condition() {
        let mut world = World::new();
        let entry = world.basicblock("entry");
        let t = world.basicblock("t");
        let f = world.basicblock("f");
        let yes = world.literal_bool(true);

        world.branch_jump(entry, yes, t, f);
        assert_eq!(world.callee(entry), Some(t));
        assert!(world.args(entry).is_empty());
    }

    #[test]
    fn test_branch_jump_folds_equal_arms() {
        let mut world = World::new();
        let bool_ty = world.type_bool();
        let pi = world.pi(&[bool_ty]);
        let entry = world.continuation(pi, "entry");
        let t = world.basicblock("t");
        let cond = world.param(entry, 0);

        world.branch_jump(entry, cond, t, t);
        assert_eq!(world.callee(entry), Some(t));
    }

    #[test]
    fn test_succs_and_preds_through_branch() {
        let mut world = World::new();
        let bool_ty = world.type_bool();
        let pi = world.pi(&[bool_ty]);
        let entry = world.continuation(pi, "entry");
        let t = world.basicblock("t");
        let f = world.basicblock("f");
        let cond = world.param(entry, 0);

        world.branch_jump(entry, cond, t, f);
        let succs = world.succs(entry);
        assert!(succs.contains(&t));
        assert!(succs.contains(&f));

        assert_eq!(world.preds(t), vec![entry]);
        assert_eq!(world.preds(f), vec![entry]);
    }

    #[test]
    fn test_jump_rewires_uses() {
        let mut world = World::new();
        let a = world.basicblock("a");
        let b = world.basicblock("b");
        let c = world.basicblock("c");

        world.jump(a, b, Vec::new(), &[]);
        assert_eq!(world.preds(b), vec![a]);

        world.jump(a, c, Vec::new(), &[]);
        assert!(world.preds(b).is_empty());
        assert_eq!(world.preds(c), vec![a]);
    }

    #[test]
    fn test_append_param_grows_type() {
        let mut world = World::new();
        let cont = world.basicblock("f");
        let ty = world.type_qs32();
        let p = world.append_param(cont, ty, "x");
        assert_eq!(world.num_params(cont), 1);
        assert_eq!(world.param(cont, 0), p);
        assert_eq!(world.ty(world.def(cont).ty).num_elems(), 1);
    }

    #[test]
    fn test_order() {
        let mut world = World::new();
        let ty = world.type_qs32();
        let bb = world.basicblock("bb");
        assert_eq!(world.order(bb), 1);

        let ret = world.pi(&[ty]);
        let pi = world.pi(&[ty, ret]);
        let f = world.continuation(pi, "f");
        assert_eq!(world.order(f), 2);
    }

    #[test]
    fn test_mem_param() {
        let mut world = World::new();
        let mem = world.mem_type();
        let qs32 = world.type_qs32();
        let pi = world.pi(&[qs32, mem]);
        let f = world.continuation(pi, "f");
        assert_eq!(world.mem_param(f), Some(world.param(f, 1)));
    }
}
