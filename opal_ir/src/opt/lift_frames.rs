//! Frame lifting: one stack frame per function.
//!
//! Every non-entry continuation's memory chain is walked from its mem
//! param; each `enter` found there is displaced onto the entry's `enter`
//! (created from the entry mem param when absent) by renumbering its slots,
//! and spliced out of the memory chain. After the pass the scope holds a
//! single frame.

use crate::analysis::scope::Scope;
use crate::ir::def::DefId;
use crate::ir::ops::PrimOpKind;
use crate::ir::world::World;

/// Lift the frames of every external scope.
pub fn lift_frames(world: &mut World) {
    world.cleanup();
    let entries: Vec<DefId> = world.externals().collect();
    for entry in entries {
        let rpo: Vec<DefId> = Scope::new(world, entry).rpo().to_vec();
        lift_scope(world, &rpo);
    }
    world.cleanup();
}

/// The `enter` using `mem` directly, if any.
fn find_enter(world: &World, mem: DefId) -> Option<DefId> {
    world
        .def(mem)
        .uses()
        .iter()
        .map(|u| u.user)
        .find(|&user| world.def(user).primop_kind() == Some(PrimOpKind::Enter))
}

/// Collect the enters on `cont`'s memory chain.
fn find_enters(world: &World, cont: DefId, enters: &mut Vec<DefId>) {
    let mut cur = match world.mem_param(cont) {
        Some(mem) => mem,
        None => return,
    };
    loop {
        if let Some(enter) = find_enter(world, cur) {
            enters.push(enter);
        }
        // Memory linearity: at most one memop consumes each mem value.
        let memop = world.def(cur).uses().iter().map(|u| u.user).find(|&user| {
            world
                .def(user)
                .primop_kind()
                .map_or(false, PrimOpKind::is_mem_effecting)
                && world.def(user).op(0) == cur
        });
        match memop.and_then(|m| world.mem_out(m)) {
            Some(next) => cur = next,
            None => break,
        }
    }
}

fn lift_scope(world: &mut World, rpo: &[DefId]) {
    let entry = rpo[0];
    let entry_mem = match world.mem_param(entry) {
        Some(mem) => mem,
        None => return,
    };

    let mut enters = Vec::new();
    for i in (1..rpo.len()).rev() {
        find_enters(world, rpo[i], &mut enters);
    }

    let enter = match find_enter(world, entry_mem) {
        Some(enter) => enter,
        None => world.enter(entry_mem),
    };
    let frame = match world.enter_frame(enter) {
        Some(frame) => frame,
        None => world.extract_at(enter, 1),
    };

    // Continue numbering above the entry frame's existing slots.
    let mut index: u32 = world
        .def(frame)
        .uses()
        .iter()
        .filter_map(|u| match world.def(u.user).primop_kind() {
            Some(PrimOpKind::Slot { index }) => Some(index + 1),
            _ => None,
        })
        .max()
        .unwrap_or(0);

    for &old_enter in &enters {
        if old_enter == enter {
            continue;
        }
        let old_frame = match world.enter_frame(old_enter) {
            Some(frame) => frame,
            None => continue,
        };
        let slots: Vec<DefId> = world
            .def(old_frame)
            .uses()
            .iter()
            .map(|u| u.user)
            .filter(|&user| {
                matches!(
                    world.def(user).primop_kind(),
                    Some(PrimOpKind::Slot { .. })
                )
            })
            .collect();
        for slot in slots {
            let pointee = world.ty(world.def(slot).ty).elem(0);
            let new_slot = world.slot(pointee, frame, index);
            index += 1;
            world.replace(slot, new_slot);
        }

        // Splice the displaced enter out of its memory chain.
        if let Some(mem_out) = world.find_extract(old_enter, 0) {
            let mem_in = world.def(old_enter).op(0);
            world.replace(mem_out, mem_in);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inner_enter_is_lifted_onto_entry_frame() {
        let mut world = World::new();
        let qs32 = world.type_qs32();
        let mem_ty = world.mem_type();
        let ret_ty = world.pi(&[mem_ty, qs32]);
        let entry_ty = world.pi(&[mem_ty, qs32, ret_ty]);
        let entry = world.continuation(entry_ty, "entry");
        world.make_external(entry);
        let inner_ty = world.pi(&[mem_ty]);
        let inner = world.continuation(inner_ty, "inner");

        let mem0 = world.param(entry, 0);
        let x = world.param(entry, 1);
        let ret = world.param(entry, 2);

        // Entry already owns a frame with one slot.
        let entry_enter = world.enter(mem0);
        let entry_mem = world.extract_at(entry_enter, 0);
        let entry_frame = world.extract_at(entry_enter, 1);
        let s0 = world.slot(qs32, entry_frame, 0);
        let st = world.store(entry_mem, s0, x);
        world.jump(entry, inner, Vec::new(), &[st]);

        // The inner continuation opens a second frame.
        let mem1 = world.param(inner, 0);
        let inner_enter = world.enter(mem1);
        let inner_mem = world.extract_at(inner_enter, 0);
        let inner_frame = world.extract_at(inner_enter, 1);
        let s1 = world.slot(qs32, inner_frame, 0);
        let ld = world.load(inner_mem, s1);
        let ld_mem = world.extract_at(ld, 0);
        let ld_val = world.extract_at(ld, 1);
        world.jump(inner, ret, Vec::new(), &[ld_mem, ld_val]);

        lift_frames(&mut world);

        // The displaced slot now lives on the entry frame with a fresh
        // index, and the inner enter is gone.
        assert!(world.def(inner_enter).is_dead());
        assert!(world.def(s1).is_dead());
        assert!(!world.def(ld).is_dead());

        let slot_indices: Vec<u32> = world
            .def(entry_frame)
            .uses()
            .iter()
            .filter_map(|u| match world.def(u.user).primop_kind() {
                Some(PrimOpKind::Slot { index }) => Some(index),
                _ => None,
            })
            .collect();
        assert!(slot_indices.contains(&0));
        assert!(slot_indices.contains(&1));
    }

    #[test]
    fn test_scope_without_frames_is_untouched() {
        let mut world = World::new();
        let qs32 = world.type_qs32();
        let mem_ty = world.mem_type();
        let ret_ty = world.pi(&[mem_ty, qs32]);
        let entry_ty = world.pi(&[mem_ty, qs32, ret_ty]);
        let entry = world.continuation(entry_ty, "entry");
        world.make_external(entry);

        let mem = world.param(entry, 0);
        let x = world.param(entry, 1);
        let ret = world.param(entry, 2);
        world.jump(entry, ret, Vec::new(), &[mem, x]);

        let before = world.num_defs();
        lift_frames(&mut world);
        // Only the entry enter and its frame projection are introduced.
        assert!(world.num_defs() >= before);
        assert_eq!(world.callee(entry), Some(ret));
    }
}
