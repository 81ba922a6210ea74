//! Bounded inlining of small continuations.
//!
//! A call site is inlined when its callee is a returning continuation
//! (order > 1), has a body, is not the enclosing scope's entry (no
//! recursive inlining) and its scope holds fewer defs than
//! `num_params * factor + offset`. The call is replaced by a jump to the
//! fully applied drop of the callee's scope. Sites left alone are logged.

use log::{debug, warn};

use crate::analysis::scope::Scope;
use crate::ir::def::DefId;
use crate::ir::world::World;

use super::mangle::{drop_call, ScopeData};

// =============================================================================
// Configuration
// =============================================================================

/// Inlining bound: a callee is small enough when its scope size is below
/// `num_params * factor + offset`.
#[derive(Debug, Clone)]
pub struct InlinerConfig {
    pub factor: usize,
    pub offset: usize,
}

impl Default for InlinerConfig {
    fn default() -> Self {
        InlinerConfig {
            factor: 4,
            offset: 4,
        }
    }
}

// =============================================================================
// Inliner
// =============================================================================

/// Inline small callees across every external scope with the default bound.
pub fn inliner(world: &mut World) {
    inliner_with(world, &InlinerConfig::default())
}

/// Inline small callees across every external scope.
pub fn inliner_with(world: &mut World, config: &InlinerConfig) {
    debug!("start inliner");

    let entries: Vec<DefId> = world.externals().collect();
    for entry in entries {
        // Call sites in post-order; each rewrite only touches its own site
        // and fresh clones, so the collected order stays valid.
        let sites: Vec<DefId> = {
            let scope = Scope::new(world, entry);
            scope.rpo().iter().rev().copied().collect()
        };

        for site in sites {
            let callee = match world.callee(site) {
                Some(callee) if world.def(callee).is_continuation() => callee,
                _ => continue,
            };
            if callee == entry {
                continue; // recursive
            }
            if world.cont_is_empty(callee) || world.order(callee) <= 1 {
                continue;
            }
            if world.args(site).len() != world.num_params(callee) {
                continue;
            }

            let (size, data) = {
                let scope = Scope::new(world, callee);
                (scope.defs().len(), ScopeData::capture(&scope))
            };
            let bound = world.num_params(callee) * config.factor + config.offset;
            if size < bound {
                let args: Vec<Option<DefId>> =
                    world.args(site).iter().map(|&a| Some(a)).collect();
                let dropped = drop_call(world, &data, &[], &args);
                world.jump(site, dropped, Vec::new(), &[]);
                debug!(
                    "inlined {} at {}",
                    world.def(callee).unique_name(),
                    world.def(site).unique_name()
                );
            } else {
                warn!(
                    "not inlining {} at {}: scope size {} exceeds bound {}",
                    world.def(callee).unique_name(),
                    world.def(site).unique_name(),
                    size,
                    bound
                );
            }
        }
    }

    world.cleanup();
}

/// Repeatedly inline every out-of-scope callee of `entry`'s scope, up to
/// `threshold` rounds; leftovers are logged.
pub fn force_inline(world: &mut World, entry: DefId, threshold: usize) {
    for _ in 0..threshold {
        let (sites, defs) = {
            let scope = Scope::new(world, entry);
            (
                scope.rpo().iter().rev().copied().collect::<Vec<_>>(),
                scope.defs().clone(),
            )
        };

        let mut changed = false;
        for site in sites {
            let callee = match world.callee(site) {
                Some(callee) if world.def(callee).is_continuation() => callee,
                _ => continue,
            };
            if defs.contains(&callee) || world.cont_is_empty(callee) {
                continue;
            }
            if world.args(site).len() != world.num_params(callee) {
                continue;
            }
            let data = {
                let scope = Scope::new(world, callee);
                ScopeData::capture(&scope)
            };
            let args: Vec<Option<DefId>> = world.args(site).iter().map(|&a| Some(a)).collect();
            let dropped = drop_call(world, &data, &[], &args);
            world.jump(site, dropped, Vec::new(), &[]);
            changed = true;
        }

        if !changed {
            break;
        }
    }

    let (sites, defs) = {
        let scope = Scope::new(world, entry);
        (scope.rpo().to_vec(), scope.defs().clone())
    };
    for site in sites {
        if let Some(callee) = world.callee(site) {
            if world.def(callee).is_continuation()
                && !world.cont_is_empty(callee)
                && !defs.contains(&callee)
            {
                warn!(
                    "couldn't inline {} at {}",
                    world.def(callee).unique_name(),
                    world.def(site).unique_name()
                );
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::ops::ArithOp;

    /// g(x, ret) returns x + x; small enough to inline.
    fn small_callee(world: &mut World) -> DefId {
        let qs32 = world.type_qs32();
        let ret_ty = world.pi(&[qs32]);
        let g_ty = world.pi(&[qs32, ret_ty]);
        let g = world.continuation(g_ty, "g");
        let x = world.param(g, 0);
        let ret = world.param(g, 1);
        let sum = world.arith(ArithOp::Add, x, x);
        world.jump(g, ret, Vec::new(), &[sum]);
        g
    }

    fn call_from_main(world: &mut World, g: DefId) -> DefId {
        let qs32 = world.type_qs32();
        let ret_ty = world.pi(&[qs32]);
        let main_ty = world.pi(&[qs32, ret_ty]);
        let main = world.continuation(main_ty, "main");
        world.make_external(main);
        let m = world.param(main, 0);
        let out = world.param(main, 1);
        world.jump(main, g, Vec::new(), &[m, out]);
        main
    }

    #[test]
    fn test_small_callee_is_inlined() {
        let mut world = World::new();
        let g = small_callee(&mut world);
        let main = call_from_main(&mut world, g);

        // Sanity: the bound admits g.
        let size = Scope::new(&world, g).defs().len();
        assert!(size < world.num_params(g) * 4 + 4);

        inliner(&mut world);

        let callee = world.callee(main).expect("main still jumps");
        assert_ne!(callee, g);
        assert!(world.def(callee).is_continuation());
        assert!(world.args(main).is_empty());
    }

    #[test]
    fn test_large_callee_is_skipped() {
        let mut world = World::new();
        let g = small_callee(&mut world);
        let main = call_from_main(&mut world, g);

        // Shrink the bound below any scope size.
        let config = InlinerConfig {
            factor: 0,
            offset: 0,
        };
        inliner_with(&mut world, &config);

        assert_eq!(world.callee(main), Some(g));
    }

    #[test]
    fn test_recursive_entry_is_skipped() {
        let mut world = World::new();
        let qs32 = world.type_qs32();
        let ret_ty = world.pi(&[qs32]);
        let f_ty = world.pi(&[qs32, ret_ty]);
        let f = world.continuation(f_ty, "f");
        world.make_external(f);
        let x = world.param(f, 0);
        let ret = world.param(f, 1);
        world.jump(f, f, Vec::new(), &[x, ret]);

        inliner(&mut world);
        assert_eq!(world.callee(f), Some(f));
    }

    #[test]
    fn test_basic_block_callee_is_skipped() {
        let mut world = World::new();
        let qs32 = world.type_qs32();
        let ret_ty = world.pi(&[qs32]);
        let main_ty = world.pi(&[qs32, ret_ty]);
        let main = world.continuation(main_ty, "main");
        world.make_external(main);
        let m = world.param(main, 0);
        let ret = world.param(main, 1);

        let bb_ty = world.pi(&[qs32]);
        let bb = world.continuation(bb_ty, "bb");
        let y = world.param(bb, 0);
        world.jump(bb, ret, Vec::new(), &[y]);
        world.jump(main, bb, Vec::new(), &[m]);

        inliner(&mut world);
        // Order 1 callees stay calls.
        assert_eq!(world.callee(main), Some(bb));
    }
}
