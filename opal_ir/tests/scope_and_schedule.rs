//! End-to-end scope, dominator and scheduling scenarios.

use opal_ir::{schedule_early, schedule_late, schedule_smart, ArithOp, CmpOp, DefId, Scope, World};

/// entry(cond, x, ret) branches to a (true arm) and b; both jump join(x),
/// which returns through ret.
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
fn test_diamond_rpo_and_dominators() {
    let mut world = World::new();
    let (entry, a, b, join) = diamond(&mut world);
    let scope = Scope::new(&world, entry);

    // The true arm comes first.
    assert_eq!(scope.rpo(), &[entry, a, b, join]);

    let dom = scope.domtree();
    assert_eq!(dom.idom(entry), entry);
    assert_eq!(dom.idom(a), entry);
    assert_eq!(dom.idom(b), entry);
    assert_eq!(dom.idom(join), entry);

    let info = scope.loopinfo();
    for &c in scope.rpo() {
        assert_eq!(info.depth(c), 0);
    }
}

#[test]
fn test_rpo_indices_unique_and_dense() {
    let mut world = World::new();
    let (entry, _, _, _) = diamond(&mut world);
    let scope = Scope::new(&world, entry);

    let mut seen = vec![false; scope.size()];
    for &c in scope.rpo() {
        let sid = scope.sid(c).expect("rpo continuation has a sid");
        assert!(sid < scope.size());
        assert!(!seen[sid], "duplicate sid");
        seen[sid] = true;
    }
    assert!(seen.into_iter().all(|b| b));

    // Every idom strictly precedes its node in RPO.
    let dom = scope.domtree();
    for &c in scope.rpo().iter().skip(1) {
        assert!(scope.sid(dom.idom(c)).unwrap() < scope.sid(c).unwrap());
    }
}

/// entry(x, y, ret) -> head(i); the loop body recomputes mul(x, y).
fn loop_with_invariant(world: &mut World) -> (DefId, DefId, DefId, DefId) {
    let qs32 = world.type_qs32();
    let ret_ty = world.pi(&[qs32]);
    let entry_ty = world.pi(&[qs32, qs32, ret_ty]);
    let entry = world.continuation(entry_ty, "entry");
    let head_ty = world.pi(&[qs32]);
    let head = world.continuation(head_ty, "head");
    let body = world.basicblock("body");
    let exit = world.basicblock("exit");

    let x = world.param(entry, 0);
    let y = world.param(entry, 1);
    let ret = world.param(entry, 2);
    let i = world.param(head, 0);

    let zero = world.literal_qs32(0);
    world.jump(entry, head, Vec::new(), &[zero]);
    let cond = world.cmp(CmpOp::Lt, i, x);
    world.branch_jump(head, cond, body, exit);
    let invariant = world.arith(ArithOp::Mul, x, y);
    let next = world.arith(ArithOp::Add, i, invariant);
    world.jump(body, head, Vec::new(), &[next]);
    world.jump(exit, ret, Vec::new(), &[i]);

    (entry, head, body, invariant)
}

#[test]
fn test_loop_invariant_hoisting() {
    let mut world = World::new();
    let (entry, head, body, invariant) = loop_with_invariant(&mut world);
    let scope = Scope::new(&world, entry);

    // Early in the entry, late in the loop, smart hoisted back out.
    let early = schedule_early(&scope);
    assert!(early.primops(entry).contains(&invariant));

    let late = schedule_late(&scope);
    assert!(late.primops(body).contains(&invariant));

    let smart = schedule_smart(&scope);
    assert!(smart.primops(entry).contains(&invariant));

    // The loop itself is a depth-1 region headed by `head`.
    let info = scope.loopinfo();
    assert_eq!(info.depth(head), 1);
    assert_eq!(info.depth(body), 1);
    assert_eq!(info.depth(entry), 0);
}

#[test]
fn test_smart_depth_bounded_by_late_depth() {
    let mut world = World::new();
    let (entry, _, _, _) = loop_with_invariant(&mut world);
    let scope = Scope::new(&world, entry);

    let late = schedule_late(&scope);
    let smart = schedule_smart(&scope);
    let info = scope.loopinfo();

    let placement = |schedule: &opal_ir::Schedule, p: DefId| -> Option<DefId> {
        scope
            .rpo()
            .iter()
            .copied()
            .find(|&c| schedule.primops(c).contains(&p))
    };

    for &cont in scope.rpo() {
        for &p in smart.primops(cont) {
            if let Some(late_cont) = placement(&late, p) {
                assert!(info.depth(cont) <= info.depth(late_cont));
            }
        }
    }
}

#[test]
fn test_memory_chain_schedules_in_order() {
    let mut world = World::new();
    let qs32 = world.type_qs32();
    let mem_ty = world.mem_type();
    let ret_ty = world.pi(&[mem_ty, qs32]);
    let entry_ty = world.pi(&[mem_ty, qs32, ret_ty]);
    let entry = world.continuation(entry_ty, "entry");

    let mem0 = world.param(entry, 0);
    let x = world.param(entry, 1);
    let ret = world.param(entry, 2);

    let enter = world.enter(mem0);
    let mem1 = world.extract_at(enter, 0);
    let frame = world.extract_at(enter, 1);
    let slot = world.slot(qs32, frame, 0);
    let store = world.store(mem1, slot, x);
    let load = world.load(store, slot);
    let load_mem = world.extract_at(load, 0);
    let load_val = world.extract_at(load, 1);
    world.jump(entry, ret, Vec::new(), &[load_mem, load_val]);

    // The load consumes exactly the store's memory projection.
    assert_eq!(world.def(load).op(0), store);

    let scope = Scope::new(&world, entry);
    let smart = schedule_smart(&scope);
    let list = smart.primops(entry);
    let pos = |p: DefId| list.iter().position(|&q| q == p).expect("scheduled");

    assert!(pos(enter) < pos(slot));
    assert!(pos(slot) < pos(store));
    assert!(pos(store) < pos(load));
}

#[test]
fn test_schedule_totality_and_dominance_of_uses() {
    let mut world = World::new();
    let (entry, _, _, _) = loop_with_invariant(&mut world);
    let scope = Scope::new(&world, entry);
    let smart = schedule_smart(&scope);
    let dom = scope.domtree();

    let mut placements: Vec<(DefId, DefId)> = Vec::new();
    for &cont in scope.rpo() {
        for &p in smart.primops(cont) {
            placements.push((p, cont));
        }
    }

    // Exactly one placement per scheduled primop.
    for i in 0..placements.len() {
        for j in (i + 1)..placements.len() {
            assert_ne!(placements[i].0, placements[j].0);
        }
    }

    // Each placement dominates every continuation that uses the primop.
    for &(p, cont) in &placements {
        for use_ in world.def(p).uses() {
            if world.def(use_.user).is_continuation() && scope.contains(use_.user) {
                assert!(dom.dominates(cont, use_.user));
            }
        }
    }
}

#[test]
fn test_schedule_survives_cleanup_round_trip() {
    let mut world = World::new();
    let (entry, _, _, _) = loop_with_invariant(&mut world);
    world.make_external(entry);

    let before: Vec<(usize, Vec<u64>)> = {
        let scope = Scope::new(&world, entry);
        let smart = schedule_smart(&scope);
        scope
            .rpo()
            .iter()
            .enumerate()
            .map(|(i, &c)| {
                (
                    i,
                    smart.primops(c).iter().map(|&p| world.def(p).gid).collect(),
                )
            })
            .collect()
    };

    world.cleanup();

    let after: Vec<(usize, Vec<u64>)> = {
        let scope = Scope::new(&world, entry);
        let smart = schedule_smart(&scope);
        scope
            .rpo()
            .iter()
            .enumerate()
            .map(|(i, &c)| {
                (
                    i,
                    smart.primops(c).iter().map(|&p| world.def(p).gid).collect(),
                )
            })
            .collect()
    };

    assert_eq!(before, after);
}

#[test]
fn test_backends_see_branch_call_shape() {
    let mut world = World::new();
    let (entry, a, b, _) = diamond(&mut world);
    let scope = Scope::new(&world, entry);

    // The only branching primitive is a call of the branch intrinsic with
    // (cond, then, else).
    assert_eq!(world.callee(entry), Some(world.branch()));
    let args = world.args(entry);
    assert_eq!(args.len(), 3);
    assert_eq!(args[1], a);
    assert_eq!(args[2], b);
    assert_eq!(
        world.intrinsic(world.branch()),
        opal_ir::Intrinsic::Branch
    );
    assert!(scope.succs(entry).contains(&a));
}
