//! End-to-end invariants of the def graph: hash-consing, folding, use-set
//! consistency, and replacement followed by cleanup.

use opal_ir::{ArithOp, LitValue, Use, World};

#[test]
fn test_fold_add_returns_interned_literal() {
    let mut world = World::new();

    // add(2, 3) folds to the canonical literal 5, identical across two
    // constructions.
    let two = world.literal_qs32(2);
    let three = world.literal_qs32(3);
    let first = world.arith(ArithOp::Add, two, three);
    let second = world.arith(ArithOp::Add, two, three);

    assert_eq!(world.lit_value(first), Some(LitValue::I32(5)));
    assert_eq!(first, second);
    assert_eq!(first, world.literal_qs32(5));
}

#[test]
fn test_equivalent_primops_are_one_object() {
    let mut world = World::new();
    let qs32 = world.type_qs32();
    let ret_ty = world.pi(&[qs32]);
    let f_ty = world.pi(&[qs32, qs32, ret_ty]);
    let f = world.continuation(f_ty, "f");
    let x = world.param(f, 0);
    let y = world.param(f, 1);

    let a = world.arith(ArithOp::Mul, x, y);
    let b = world.arith(ArithOp::Mul, x, y);
    assert_eq!(a, b);

    // Operand order is part of the identity.
    let c = world.arith(ArithOp::Mul, y, x);
    assert_ne!(a, c);
}

#[test]
fn test_use_set_bijection() {
    let mut world = World::new();
    let qs32 = world.type_qs32();
    let ret_ty = world.pi(&[qs32]);
    let f_ty = world.pi(&[qs32, qs32, ret_ty]);
    let f = world.continuation(f_ty, "f");
    let x = world.param(f, 0);
    let y = world.param(f, 1);
    let ret = world.param(f, 2);

    let prod = world.arith(ArithOp::Mul, x, y);
    let sum = world.arith(ArithOp::Add, prod, x);
    world.jump(f, ret, Vec::new(), &[sum]);

    // Forward: every operand edge appears in the operand's use-set.
    for def in [prod, sum, f] {
        for (i, &op) in world.def(def).ops().iter().enumerate() {
            assert!(
                world.def(op).uses().contains(&Use::new(i, def)),
                "missing use edge"
            );
        }
    }

    // Backward: every use points back at a matching operand edge.
    for def in [x, y, prod, sum] {
        for use_ in world.def(def).uses() {
            assert_eq!(world.def(use_.user).op(use_.index as usize), def);
        }
    }
}

#[test]
fn test_replace_and_cleanup_leave_no_stale_edges() {
    let mut world = World::new();
    let qs32 = world.type_qs32();
    let ret_ty = world.pi(&[qs32]);
    let f_ty = world.pi(&[qs32, qs32, ret_ty]);
    let f = world.continuation(f_ty, "f");
    world.make_external(f);
    let x = world.param(f, 0);
    let y = world.param(f, 1);
    let ret = world.param(f, 2);

    let doubled = world.arith(ArithOp::Add, x, x);
    let kept = world.arith(ArithOp::Add, doubled, y);
    world.jump(f, ret, Vec::new(), &[kept]);

    let users_of_x: Vec<_> = world.def(x).uses().iter().map(|u| u.user).collect();
    world.replace(x, y);
    world.cleanup();

    // No live def still points at the replaced node.
    for id in world.primops().collect::<Vec<_>>() {
        assert!(!world.def(id).ops().contains(&x));
    }
    // Every prior user of x now appears among y's users.
    for user in users_of_x {
        assert!(world.def(y).uses().iter().any(|u| u.user == user));
    }
}

#[test]
fn test_cleanup_keeps_externally_rooted_graph() {
    let mut world = World::new();
    let qs32 = world.type_qs32();
    let ret_ty = world.pi(&[qs32]);
    let f_ty = world.pi(&[qs32, ret_ty]);
    let f = world.continuation(f_ty, "f");
    world.make_external(f);
    let x = world.param(f, 0);
    let ret = world.param(f, 1);
    let sum = world.arith(ArithOp::Add, x, x);
    world.jump(f, ret, Vec::new(), &[sum]);

    // Garbage: a whole unreferenced continuation with a body.
    let orphan_ty = world.pi(&[qs32]);
    let orphan = world.continuation(orphan_ty, "orphan");
    let ox = world.param(orphan, 0);
    let osum = world.arith(ArithOp::Mul, ox, ox);
    world.jump(orphan, orphan, Vec::new(), &[osum]);

    world.cleanup();

    assert!(!world.def(f).is_dead());
    assert!(!world.def(sum).is_dead());
    assert!(world.def(orphan).is_dead());
    assert!(world.def(osum).is_dead());
    assert!(world.continuations().all(|c| c != orphan));
}
