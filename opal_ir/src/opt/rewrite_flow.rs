//! Flow-graph erasure: rewrite the named sigmas `FlowTask` and `FlowGraph`
//! to `qs32` throughout the program.
//!
//! Continuations with an affected param are re-created with rewritten
//! signatures, their params mapped pairwise; every primop whose type
//! changes is rebuilt over instantiated operands, and every jump is
//! re-instantiated so the use graph survives the swap.

use rustc_hash::FxHashMap;

use crate::ir::def::{DefId, Intrinsic};
use crate::ir::types::TypeId;
use crate::ir::world::World;

const FLOW_NAMES: [&str; 2] = ["FlowTask", "FlowGraph"];

fn is_flow_type(world: &World, ty: TypeId) -> bool {
    world
        .ty(ty)
        .sigma_name()
        .map_or(false, |name| FLOW_NAMES.contains(&name))
}

fn contains_flow(world: &World, ty: TypeId) -> bool {
    if is_flow_type(world, ty) {
        return true;
    }
    let elems = world.ty(ty).elems.clone();
    elems.iter().any(|&e| contains_flow(world, e))
}

// =============================================================================
// Rewriter
// =============================================================================

#[derive(Default)]
struct Rewriter {
    map: FxHashMap<DefId, DefId>,
    tymap: FxHashMap<TypeId, TypeId>,
}

fn rewrite_type(world: &mut World, rw: &mut Rewriter, ty: TypeId) -> TypeId {
    if let Some(&new) = rw.tymap.get(&ty) {
        return new;
    }
    let new = if is_flow_type(world, ty) {
        world.type_qs32()
    } else {
        let elems: Vec<TypeId> = world.ty(ty).elems.to_vec();
        let new_elems: Vec<TypeId> = elems
            .iter()
            .map(|&e| rewrite_type(world, rw, e))
            .collect();
        if new_elems == elems {
            ty
        } else {
            world.rebuild_type(ty, &new_elems)
        }
    };
    rw.tymap.insert(ty, new);
    new
}

/// Rebuild a primop with mapped operands, memoized; non-primops map to
/// themselves unless pre-mapped.
fn instantiate(world: &mut World, rw: &mut Rewriter, def: DefId) -> DefId {
    if let Some(&mapped) = rw.map.get(&def) {
        return mapped;
    }
    if !world.def(def).is_primop() {
        return def;
    }
    let ops = world.def(def).ops().to_vec();
    let new_ops: Vec<DefId> = ops.iter().map(|&op| instantiate(world, rw, op)).collect();
    let new = if new_ops == ops {
        def
    } else {
        let kind = world.def(def).primop_kind().expect("primop");
        let ty = world.def(def).ty;
        world.rebuild(kind, &new_ops, ty)
    };
    rw.map.insert(def, new);
    new
}

/// Rebuild a def whose type contains a flow type, then chase its users.
fn rewrite_def(world: &mut World, rw: &mut Rewriter, def: DefId) {
    if rw.map.contains_key(&def) || world.def(def).is_continuation() {
        return;
    }
    let ops = world.def(def).ops().to_vec();
    for &op in &ops {
        if !world.def(op).is_continuation() && !world.def(op).is_param() {
            rewrite_def(world, rw, op);
        }
    }

    let old_ty = world.def(def).ty;
    let new_ty = rewrite_type(world, rw, old_ty);
    if new_ty != old_ty {
        let kind = world.def(def).primop_kind().expect("typed def is a primop");
        let new_ops: Vec<DefId> = ops
            .iter()
            .map(|&op| instantiate(world, rw, op))
            .collect();
        let new = world.rebuild(kind, &new_ops, new_ty);
        rw.map.insert(def, new);

        let users: Vec<DefId> = world.def(def).uses().iter().map(|u| u.user).collect();
        for user in users {
            rewrite_def(world, rw, user);
        }
    } else {
        instantiate(world, rw, def);
    }
}

// =============================================================================
// Driver
// =============================================================================

/// Replace every `FlowTask`/`FlowGraph`-typed value by `qs32` across the
/// whole program.
pub fn rewrite_flow_graphs(world: &mut World) {
    let mut rw = Rewriter::default();
    let mut transformed: Vec<(DefId, DefId)> = Vec::new();

    let conts: Vec<DefId> = world.continuations().collect();
    for cont in conts {
        let affected = world
            .params(cont)
            .iter()
            .any(|&p| contains_flow(world, world.def(p).ty));
        if !affected {
            continue;
        }

        let old_ty = world.def(cont).ty;
        let new_ty = rewrite_type(world, &mut rw, old_ty);
        let name = world.def(cont).name.as_deref().unwrap_or("").to_string();
        let new_cont = world.continuation(new_ty, &name);
        if world.is_external(cont) {
            world.make_internal(cont);
            world.make_external(new_cont);
        }
        rw.map.insert(cont, new_cont);

        if world.intrinsic(cont) == Intrinsic::None {
            let old_params = world.params(cont).to_vec();
            let new_params = world.params(new_cont).to_vec();
            for (&op, &np) in old_params.iter().zip(&new_params) {
                rw.map.insert(op, np);
            }
            transformed.push((cont, new_cont));
        }
    }

    for i in 0..transformed.len() {
        let (old, _) = transformed[i];
        let params = world.params(old).to_vec();
        for param in params {
            let users: Vec<DefId> = world.def(param).uses().iter().map(|u| u.user).collect();
            for user in users {
                if !world.def(user).is_continuation() {
                    rewrite_def(world, &mut rw, user);
                }
            }
        }
    }

    for i in 0..transformed.len() {
        let (old, new) = transformed[i];
        if world.cont_is_empty(old) {
            continue;
        }
        let ops = world.def(old).ops().to_vec();
        let new_ops: Vec<DefId> = ops
            .iter()
            .map(|&op| instantiate(world, &mut rw, op))
            .collect();
        let ta = world.type_args(old).to_vec();
        world.jump(new, new_ops[0], ta, &new_ops[1..]);
    }

    let conts: Vec<DefId> = world.continuations().collect();
    for cont in conts {
        if rw.map.contains_key(&cont) || world.cont_is_empty(cont) {
            continue;
        }
        let ops = world.def(cont).ops().to_vec();
        let new_ops: Vec<DefId> = ops
            .iter()
            .map(|&op| instantiate(world, &mut rw, op))
            .collect();
        if new_ops == ops {
            continue;
        }
        let ta = world.type_args(cont).to_vec();
        world.jump(cont, new_ops[0], ta, &new_ops[1..]);
    }

    world.cleanup();
}

// =============================================================================
// Tests
// =============================================================================
