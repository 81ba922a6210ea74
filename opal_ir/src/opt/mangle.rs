//! Mangling: cloning a scope under a substitution.
//!
//! `drop_call` clones a continuation's scope while replacing selected entry
//! parameters by argument defs. The specialized entry keeps params only at
//! the un-substituted positions. Continuations are pre-allocated so cyclic
//! references resolve through the id map; primops are rebuilt through the
//! world, which re-interns them and folds whatever the substitution made
//! constant. Defs outside the scope are shared, not cloned.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::analysis::scope::Scope;
use crate::ir::def::DefId;
use crate::ir::types::TypeId;
use crate::ir::world::World;

// =============================================================================
// Scope Snapshot
// =============================================================================

/// An owned snapshot of the parts of a scope the mangler needs; taken so the
/// scope's borrow of the world can end before mutation starts.
#[derive(Debug, Clone)]
pub struct ScopeData {
    pub entry: DefId,
    pub defs: FxHashSet<DefId>,
    /// Reachable continuations in RPO; the entry comes first.
    pub conts: Vec<DefId>,
}

impl ScopeData {
    /// Capture a snapshot of a scope.
    pub fn capture(scope: &Scope<'_>) -> Self {
        ScopeData {
            entry: scope.entry(),
            defs: scope.defs().clone(),
            conts: scope.rpo().to_vec(),
        }
    }
}

// =============================================================================
// Mangler
// =============================================================================

struct Mangler<'w> {
    world: &'w mut World,
    data: ScopeData,
    map: FxHashMap<DefId, DefId>,
}

/// Clone `data.entry`'s scope substituting its params: `args[i] = Some(def)`
/// replaces the `i`-th param by `def`, `None` keeps it as a param of the
/// specialization. Returns the new entry.
pub fn drop_call(
    world: &mut World,
    data: &ScopeData,
    type_args: &[TypeId],
    args: &[Option<DefId>],
) -> DefId {
    let old_params = world.params(data.entry).to_vec();
    assert_eq!(args.len(), old_params.len(), "drop arity mismatch");

    let mut mangler = Mangler {
        world,
        data: data.clone(),
        map: FxHashMap::default(),
    };

    // Specialized entry: params only at hole positions.
    let hole_tys: Vec<TypeId> = old_params
        .iter()
        .zip(args)
        .filter(|(_, arg)| arg.is_none())
        .map(|(&p, _)| mangler.world.def(p).ty)
        .collect();
    let new_ty = mangler.world.pi(&hole_tys);
    let name = mangler
        .world
        .def(data.entry)
        .name
        .as_deref()
        .unwrap_or("")
        .to_string();
    let new_entry = mangler.world.continuation(new_ty, &name);
    mangler.map.insert(data.entry, new_entry);

    let mut hole = 0;
    for (&old_param, arg) in old_params.iter().zip(args) {
        match arg {
            Some(def) => {
                debug_assert_eq!(
                    mangler.world.def(old_param).ty,
                    mangler.world.def(*def).ty,
                    "drop argument type mismatch"
                );
                mangler.map.insert(old_param, *def);
            }
            None => {
                let new_param = mangler.world.param(new_entry, hole);
                mangler.map.insert(old_param, new_param);
                hole += 1;
            }
        }
    }

    // Pre-allocate the remaining continuations so cycles resolve.
    for i in 1..data.conts.len() {
        let old = data.conts[i];
        let ty = mangler.world.def(old).ty;
        let name = mangler
            .world
            .def(old)
            .name
            .as_deref()
            .unwrap_or("")
            .to_string();
        let new = mangler.world.continuation(ty, &name);
        mangler.map.insert(old, new);
        let old_params = mangler.world.params(old).to_vec();
        let new_params = mangler.world.params(new).to_vec();
        for (&op, &np) in old_params.iter().zip(&new_params) {
            mangler.map.insert(op, np);
        }
    }

    // Instantiate every jump.
    for i in 0..data.conts.len() {
        let old = data.conts[i];
        let new = mangler.map[&old];
        if mangler.world.cont_is_empty(old) {
            continue;
        }
        let old_ops = mangler.world.def(old).ops().to_vec();
        let new_ops: Vec<DefId> = old_ops.iter().map(|&op| mangler.instantiate(op)).collect();
        let ta = if old == data.entry && !type_args.is_empty() {
            type_args.to_vec()
        } else {
            mangler.world.type_args(old).to_vec()
        };
        mangler
            .world
            .jump(new, new_ops[0], ta, &new_ops[1..]);
    }

    new_entry
}

impl Mangler<'_> {
    fn instantiate(&mut self, def: DefId) -> DefId {
        if let Some(&mapped) = self.map.get(&def) {
            return mapped;
        }
        if !self.data.defs.contains(&def) {
            return def; // free def, shared
        }
        let node = self.world.def(def);
        if !node.is_primop() {
            // An in-scope continuation unreachable from the entry, or a
            // param of one; shared.
            return def;
        }

        let kind = node.primop_kind().expect("primop");
        let ty = node.ty;
        let ops = node.ops().to_vec();
        let new_ops: Vec<DefId> = ops.iter().map(|&op| self.instantiate(op)).collect();
        let new = self.world.rebuild(kind, &new_ops, ty);
        self.map.insert(def, new);
        new
    }
}

// =============================================================================
// Tests
// =============================================================================
