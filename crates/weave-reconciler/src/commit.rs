#![forbid(unsafe_code)]

//! The commit phase and the passive-effect flush.
//!
//! Commit never yields. It applies host mutations depth first over the
//! flagged parts of the finished tree, promotes the finished tree to
//! `current`, and then attaches refs. Passive effects are only collected
//! here; they run later from their own normal-priority task, or earlier if
//! another render or commit needs the slate clean first.

use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::error::HostError;
use crate::fiber::{FiberId, FiberKind, Flags, live_alternate};
use crate::hooks::{Cleanup, EffectRecord};
use crate::host::HostConfig;
use crate::inspect::CommitSummary;
use crate::lane::{NO_LANE, lane_name};
use crate::root::{FiberRoot, PendingPassiveEffects, RootId};
use crate::runtime::{RuntimeState, Sched};
use crate::update_context::PriorityScope;
use crate::work_loop::ensure_root_is_scheduled;
use std::any::Any;
use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::Rc;
use tracing::{debug, debug_span, trace};
use weave_scheduler::{Priority, TaskStatus};
use web_time::Instant;

struct CommitCx<'a, H: HostConfig> {
    root: &'a mut FiberRoot<H::Instance>,
    host: &'a mut H,
    diagnostics: &'a mut Diagnostics,
}

/// Commit the root's finished tree.
pub(crate) fn commit_root<H: HostConfig>(
    state: &mut RuntimeState<H>,
    sched: &mut Sched<H>,
    root_id: RootId,
) -> Result<(), HostError> {
    if state.committing {
        state.diagnostics.emit(Diagnostic::CommitReentered);
        return Ok(());
    }
    // Effects of the previous commit must run before this one lands.
    flush_passive_effects(state, root_id);

    let Some(root) = state.roots.get_mut(root_id) else {
        return Ok(());
    };
    let Some(finished) = root.finished_work.take() else {
        return Ok(());
    };
    let lane = std::mem::replace(&mut root.finished_lane, NO_LANE);

    let start = Instant::now();
    let span = debug_span!(
        "commit.root",
        root = ?root_id,
        lane = lane_name(lane),
        duration_us = tracing::field::Empty,
    )
    .entered();

    // Units created by this render now belong to the committed tree.
    let carried = root.render.skipped_lanes | root.render.interleaved_lanes;
    root.render = Default::default();
    root.mark_finished(lane);
    root.pending_lanes |= carried;

    let mut summary = CommitSummary::capture(&root.arena, finished, lane);
    let flags = root
        .arena
        .get(finished)
        .map_or(Flags::empty(), |fiber| fiber.flags | fiber.subtree_flags);

    if flags.intersects(Flags::PASSIVE_MASK) && !root.passive_scheduled {
        root.passive_scheduled = true;
        sched.schedule(Priority::Normal, move |state, sched, _| {
            state.drain_inbox(sched);
            flush_passive_effects(state, root_id);
            state.drain_inbox(sched);
            TaskStatus::Done
        });
    }

    state.committing = true;
    let mut cx = CommitCx {
        root,
        host: &mut state.host,
        diagnostics: &mut state.diagnostics,
    };
    let result = commit_tree(&mut cx, finished, flags);
    state.committing = false;
    result?;

    let elapsed = start.elapsed();
    span.record("duration_us", elapsed.as_micros() as u64);
    summary.duration = elapsed;
    trace!(
        target: "weave.commit",
        flagged = summary.flagged.len(),
        deletions = summary.deletions,
        "commit applied"
    );
    if let Some(root) = state.roots.get_mut(root_id) {
        root.last_commit = Some(summary);
    }
    drop(span);

    ensure_root_is_scheduled(state, sched, root_id);
    Ok(())
}

fn commit_tree<H: HostConfig>(
    cx: &mut CommitCx<'_, H>,
    finished: FiberId,
    flags: Flags,
) -> Result<(), HostError> {
    if flags.intersects(Flags::MUTATION_MASK | Flags::PASSIVE_MASK) {
        commit_mutation_effects(cx, finished)?;
    }
    cx.root.current = finished;
    if flags.intersects(Flags::LAYOUT_MASK) {
        commit_layout_effects(cx.root, finished);
    }
    Ok(())
}

/// Children of `id` in sibling order.
fn children_of<I>(root: &FiberRoot<I>, id: FiberId) -> Vec<FiberId> {
    let mut children = Vec::new();
    let mut cursor = root.arena.get(id).and_then(|fiber| fiber.child);
    while let Some(child) = cursor {
        children.push(child);
        cursor = root.arena.get(child).and_then(|fiber| fiber.sibling);
    }
    children
}

fn commit_mutation_effects<H: HostConfig>(
    cx: &mut CommitCx<'_, H>,
    finished: FiberId,
) -> Result<(), HostError> {
    let mask = Flags::MUTATION_MASK | Flags::PASSIVE_MASK;
    let mut stack = vec![finished];
    while let Some(id) = stack.pop() {
        let Some(fiber) = cx.root.arena.get(id) else {
            continue;
        };
        // Units outside the flagged region are left untouched.
        let descend = fiber.subtree_flags.intersects(mask);
        if fiber.flags.intersects(mask) {
            commit_mutation_effects_on_fiber(cx, id)?;
        }
        if descend {
            stack.extend(children_of(cx.root, id).into_iter().rev());
            // Ref bits stay until the layout pass has walked them.
            if let Some(fiber) = cx.root.arena.get_mut(id) {
                fiber.subtree_flags.remove(mask.difference(Flags::LAYOUT_MASK));
            }
        }
    }
    Ok(())
}

fn commit_mutation_effects_on_fiber<H: HostConfig>(
    cx: &mut CommitCx<'_, H>,
    id: FiberId,
) -> Result<(), HostError> {
    let Some(flags) = cx.root.arena.get(id).map(|fiber| fiber.flags) else {
        return Ok(());
    };

    if flags.contains(Flags::PLACEMENT) {
        commit_placement(cx, id)?;
        clear_flag(cx.root, id, Flags::PLACEMENT);
    }
    if flags.contains(Flags::UPDATE) {
        commit_update(cx, id)?;
        clear_flag(cx.root, id, Flags::UPDATE);
    }
    if flags.contains(Flags::CHILD_DELETION) {
        let deletions = cx
            .root
            .arena
            .get_mut(id)
            .map(|fiber| std::mem::take(&mut fiber.deletions))
            .unwrap_or_default();
        for child in deletions {
            commit_deletion(cx, id, child)?;
        }
        clear_flag(cx.root, id, Flags::CHILD_DELETION);
    }
    if flags.contains(Flags::PASSIVE) {
        collect_passive_effects(cx, id);
        clear_flag(cx.root, id, Flags::PASSIVE);
    }
    if flags.contains(Flags::REF)
        && let Some(node_ref) = live_alternate(&cx.root.arena, id)
            .and_then(|current| cx.root.arena.get(current))
            .and_then(|current| current.node_ref.as_ref())
    {
        node_ref.detach();
    }
    Ok(())
}

fn clear_flag<I>(root: &mut FiberRoot<I>, id: FiberId, flag: Flags) {
    if let Some(fiber) = root.arena.get_mut(id) {
        fiber.flags.remove(flag);
    }
}

/// Nearest host node at or above `start`.
fn host_parent<I: Clone>(root: &FiberRoot<I>, start: Option<FiberId>) -> Option<I> {
    let mut cursor = start;
    while let Some(id) = cursor {
        let fiber = root.arena.get(id)?;
        match fiber.kind {
            FiberKind::Root => return Some(root.container.clone()),
            FiberKind::HostElement => return fiber.host_instance.clone(),
            _ => {}
        }
        cursor = fiber.parent;
    }
    None
}

/// The host node `id`'s nodes should be inserted before: the first host
/// node after `id` in tree order under the same host parent that is not
/// itself being placed.
fn host_sibling<I: Clone>(root: &FiberRoot<I>, id: FiberId) -> Option<I> {
    let arena = &root.arena;
    let mut node = id;
    'search: loop {
        loop {
            let fiber = arena.get(node)?;
            if fiber.sibling.is_some() {
                break;
            }
            let parent = fiber.parent?;
            if matches!(arena.get(parent)?.kind, FiberKind::HostElement | FiberKind::Root) {
                return None;
            }
            node = parent;
        }
        node = arena.get(node)?.sibling?;

        loop {
            let fiber = arena.get(node)?;
            if matches!(fiber.kind, FiberKind::HostElement | FiberKind::HostText) {
                break;
            }
            // A moving subtree cannot anchor anything; skip past it.
            if fiber.flags.contains(Flags::PLACEMENT) {
                continue 'search;
            }
            match fiber.child {
                Some(child) => node = child,
                None => continue 'search,
            }
        }

        let fiber = arena.get(node)?;
        if !fiber.flags.contains(Flags::PLACEMENT) {
            return fiber.host_instance.clone();
        }
    }
}

fn commit_placement<H: HostConfig>(cx: &mut CommitCx<'_, H>, id: FiberId) -> Result<(), HostError> {
    let parent_fiber = cx.root.arena.get(id).and_then(|fiber| fiber.parent);
    let Some(parent) = host_parent(cx.root, parent_fiber) else {
        cx.diagnostics.emit(Diagnostic::MissingHostParent);
        return Ok(());
    };
    let before = host_sibling(cx.root, id);
    insert_or_append(cx, id, &parent, before.as_ref())
}

fn insert_or_append<H: HostConfig>(
    cx: &mut CommitCx<'_, H>,
    id: FiberId,
    parent: &H::Instance,
    before: Option<&H::Instance>,
) -> Result<(), HostError> {
    let Some(fiber) = cx.root.arena.get(id) else {
        return Ok(());
    };
    if matches!(fiber.kind, FiberKind::HostElement | FiberKind::HostText) {
        if let Some(instance) = fiber.host_instance.clone() {
            match before {
                Some(before) => cx.host.insert_before(parent, &instance, before)?,
                None => cx.host.append_child(parent, &instance)?,
            }
        }
        return Ok(());
    }
    for child in children_of(cx.root, id) {
        insert_or_append(cx, child, parent, before)?;
    }
    Ok(())
}

fn commit_update<H: HostConfig>(cx: &mut CommitCx<'_, H>, id: FiberId) -> Result<(), HostError> {
    let arena = &cx.root.arena;
    let Some(fiber) = arena.get(id) else {
        return Ok(());
    };
    let Some(instance) = fiber.host_instance.clone() else {
        return Ok(());
    };
    let old = live_alternate(arena, id)
        .and_then(|current| arena.get(current))
        .and_then(|current| current.memoized_props.clone());
    let Some(old) = old else {
        return Ok(());
    };
    let new = fiber.memoized_props.clone().unwrap_or_else(|| fiber.pending_props.clone());

    match fiber.kind {
        FiberKind::HostElement => {
            if let (Some(old), Some(new)) = (old.props(), new.props()) {
                cx.host.update_instance(&instance, old, new)?;
            }
        }
        FiberKind::HostText => {
            if let (Some(old), Some(new)) = (old.text(), new.text()) {
                cx.host.update_text(&instance, old, new)?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// Remove `child` (a unit of the committed tree) and everything below it.
fn commit_deletion<H: HostConfig>(
    cx: &mut CommitCx<'_, H>,
    parent: FiberId,
    child: FiberId,
) -> Result<(), HostError> {
    // Every unit of the subtree: queue effect cleanups and drop refs.
    let mut subtree = Vec::new();
    let mut stack = vec![child];
    while let Some(id) = stack.pop() {
        let Some(fiber) = cx.root.arena.get(id) else {
            continue;
        };
        match fiber.kind {
            FiberKind::Function => {
                if let Some(effects) = fiber.update_queue.effects() {
                    cx.root.pending_passive.unmount.push(effects.clone());
                }
            }
            FiberKind::HostElement => {
                if let Some(node_ref) = &fiber.node_ref {
                    node_ref.detach();
                }
            }
            _ => {}
        }
        subtree.push(id);
        stack.extend(children_of(cx.root, id).into_iter().rev());
    }

    // Only the topmost host nodes need detaching; their descendants go
    // with them.
    let mut hosts = Vec::new();
    let mut queue = VecDeque::from([child]);
    while let Some(id) = queue.pop_front() {
        let Some(fiber) = cx.root.arena.get(id) else {
            continue;
        };
        if matches!(fiber.kind, FiberKind::HostElement | FiberKind::HostText) {
            hosts.extend(fiber.host_instance.clone());
            continue;
        }
        queue.extend(children_of(cx.root, id));
    }

    if !hosts.is_empty() {
        match host_parent(cx.root, Some(parent)) {
            Some(host_parent) => {
                for instance in &hosts {
                    cx.host.remove_child(&host_parent, instance)?;
                }
            }
            None => cx.diagnostics.emit(Diagnostic::MissingHostParent),
        }
    }

    for id in &subtree {
        if let Some(alternate) = live_alternate(&cx.root.arena, *id) {
            cx.root.arena.remove(alternate);
        }
        cx.root.arena.remove(*id);
    }
    debug!(
        target: "weave.commit",
        units = subtree.len(),
        host_nodes = hosts.len(),
        "subtree deleted"
    );
    Ok(())
}

fn collect_passive_effects<H: HostConfig>(cx: &mut CommitCx<'_, H>, id: FiberId) {
    let Some(fiber) = cx.root.arena.get(id) else {
        return;
    };
    match fiber.update_queue.effects() {
        Some(effects) => cx.root.pending_passive.update.push(effects.clone()),
        None => {
            let component = fiber.name().to_owned();
            cx.diagnostics.emit(Diagnostic::MissingEffectRecord { component });
        }
    }
}

/// Attach refs of flagged host elements, now that the tree is committed.
fn commit_layout_effects<I: Clone + 'static>(root: &mut FiberRoot<I>, finished: FiberId) {
    let mut stack = vec![finished];
    while let Some(id) = stack.pop() {
        let Some(fiber) = root.arena.get_mut(id) else {
            continue;
        };
        if fiber.flags.contains(Flags::REF) {
            fiber.flags.remove(Flags::REF);
            if fiber.kind == FiberKind::HostElement
                && let (Some(node_ref), Some(instance)) = (&fiber.node_ref, &fiber.host_instance)
            {
                node_ref.attach(Rc::new(instance.clone()));
            }
        }
        if fiber.subtree_flags.intersects(Flags::LAYOUT_MASK) {
            fiber.subtree_flags.remove(Flags::LAYOUT_MASK);
            stack.extend(children_of(root, id).into_iter().rev());
        }
    }
}

/// Run pending passive effects for `root_id`: every unmount cleanup, then
/// every update cleanup, then every create. Returns whether anything was
/// pending.
///
/// Updates dispatched from effects get normal priority. A panicking
/// callback is reported and skipped; the first panic is kept on the runtime
/// and resumed once the scheduler slice has unwound cleanly.
pub(crate) fn flush_passive_effects<H: HostConfig>(
    state: &mut RuntimeState<H>,
    root_id: RootId,
) -> bool {
    let Some(root) = state.roots.get_mut(root_id) else {
        return false;
    };
    root.passive_scheduled = false;
    if root.pending_passive.is_empty() {
        return false;
    }
    let pending = std::mem::take(&mut root.pending_passive);
    let PendingPassiveEffects { unmount, update } = pending;

    let _priority = PriorityScope::new(&state.inbox, Priority::Normal);
    let _span = debug_span!(
        "passive.flush",
        root = ?root_id,
        unmounts = unmount.len(),
        updates = update.len(),
    )
    .entered();

    let mut first_panic: Option<Box<dyn Any + Send>> = None;
    let diagnostics = &mut state.diagnostics;

    for effect in unmount.iter().flat_map(|list| list.iter()) {
        if let Some(destroy) = effect.instance.take_destroy() {
            run_guarded(destroy, diagnostics, &mut first_panic);
        }
    }
    for effect in firing(&update) {
        if let Some(destroy) = effect.instance.take_destroy() {
            run_guarded(destroy, diagnostics, &mut first_panic);
        }
    }
    for effect in firing(&update) {
        let Some(create) = effect.take_create() else {
            continue;
        };
        match catch_unwind(AssertUnwindSafe(create)) {
            Ok(destroy) => effect.instance.set_destroy(destroy),
            Err(payload) => record_panic(payload, diagnostics, &mut first_panic),
        }
    }

    debug!(
        target: "weave.passive",
        root = ?root_id,
        panicked = first_panic.is_some(),
        "passive effects flushed"
    );
    if let Some(payload) = first_panic
        && state.pending_panic.is_none()
    {
        state.pending_panic = Some(payload);
    }
    true
}

/// Effects whose dependencies changed this commit.
fn firing(lists: &[Rc<[Rc<EffectRecord>]>]) -> impl Iterator<Item = &Rc<EffectRecord>> {
    lists
        .iter()
        .flat_map(|list| list.iter())
        .filter(|effect| effect.has_effect)
}

fn run_guarded(
    callback: Cleanup,
    diagnostics: &mut Diagnostics,
    first_panic: &mut Option<Box<dyn Any + Send>>,
) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(callback)) {
        record_panic(payload, diagnostics, first_panic);
    }
}

fn record_panic(
    payload: Box<dyn Any + Send>,
    diagnostics: &mut Diagnostics,
    first_panic: &mut Option<Box<dyn Any + Send>>,
) {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_owned());
    diagnostics.emit(Diagnostic::EffectPanicked { message });
    if first_panic.is_none() {
        *first_panic = Some(payload);
    }
}
