#![forbid(unsafe_code)]

//! Root scheduling and the interruptible render loop.
//!
//! A root owns at most one scheduler callback at a time, tagged with the
//! lane it was scheduled for (`callback_priority`). Scheduling again for
//! the same lane is a no-op, so any number of updates dispatched before the
//! callback runs collapse into one render. Synchronous-lane work does not
//! get its own task; it joins the sync queue, which one immediate-priority
//! task drains.
//!
//! Rendering walks the work-in-progress tree depth first. In time-sliced
//! mode the loop checks the scheduler's budget before every unit and, when
//! it runs out, returns a continuation that resumes from the saved cursor.

use crate::begin_work::begin_work;
use crate::commit::{commit_root, flush_passive_effects};
use crate::complete_work::complete_work;
use crate::diagnostics::Diagnostics;
use crate::error::HostError;
use crate::fiber::{FiberId, create_work_in_progress};
use crate::host::HostConfig;
use crate::lane::{Lane, Lanes, NO_LANE, NO_LANES, lane_name, lane_to_priority, pick_highest_priority_lane};
use crate::root::{FiberRoot, RootId};
use crate::runtime::{RuntimeState, Sched};
use crate::sync_queue::schedule_sync_callback;
use crate::update_context::UpdateContext;
use std::rc::Rc;
use tracing::{debug, debug_span, error, trace};
use weave_scheduler::TaskStatus;

/// Borrowed state a render pass works against.
pub(crate) struct WorkCx<'a, H: HostConfig> {
    pub(crate) root: &'a mut FiberRoot<H::Instance>,
    pub(crate) host: &'a mut H,
    pub(crate) diagnostics: &'a mut Diagnostics,
    pub(crate) inbox: &'a Rc<UpdateContext>,
}

/// How a call to [`render_root`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RootExit {
    /// The slice ran out; the cursor is saved.
    Incomplete,
    /// The whole tree was rendered and is ready to commit.
    Completed,
}

/// Record an update on `root_id` and make sure work is scheduled for it.
pub(crate) fn schedule_update_on_root<H: HostConfig>(
    state: &mut RuntimeState<H>,
    sched: &mut Sched<H>,
    root_id: RootId,
    lane: Lane,
) {
    let Some(root) = state.roots.get_mut(root_id) else {
        debug!(target: "weave.workloop", root = ?root_id, "update for unknown root ignored");
        return;
    };
    if root.poisoned.is_some() {
        debug!(target: "weave.workloop", root = ?root_id, "update for poisoned root ignored");
        return;
    }
    root.mark_updated(lane);
    ensure_root_is_scheduled(state, sched, root_id);
}

/// Reconcile the root's scheduler callback with its highest pending lane.
pub(crate) fn ensure_root_is_scheduled<H: HostConfig>(
    state: &mut RuntimeState<H>,
    sched: &mut Sched<H>,
    root_id: RootId,
) {
    let Some(root) = state.roots.get_mut(root_id) else {
        return;
    };
    let lane = pick_highest_priority_lane(root.pending_lanes);

    if lane == NO_LANE {
        if let Some(handle) = root.callback.take() {
            sched.cancel(handle);
        }
        root.callback_priority = NO_LANE;
        return;
    }
    if lane == root.callback_priority {
        trace!(target: "weave.workloop", lane = lane_name(lane), "callback reused");
        return;
    }
    if let Some(handle) = root.callback.take() {
        sched.cancel(handle);
    }
    root.callback_priority = lane;

    if lane == Lanes::SYNC {
        schedule_sync_callback(state, sched, root_id, move |state, sched| {
            perform_sync_work_on_root(state, sched, root_id)
        });
        return;
    }

    let priority = lane_to_priority(lane);
    let handle = sched.schedule(priority, move |state, sched, did_timeout| {
        perform_concurrent_work_on_root(state, sched, root_id, did_timeout)
    });
    root.callback = Some(handle);
    trace!(
        target: "weave.workloop",
        lane = lane_name(lane),
        priority = priority.as_str(),
        "root callback scheduled"
    );
}

/// Scheduler task body for non-synchronous lanes.
fn perform_concurrent_work_on_root<H: HostConfig>(
    state: &mut RuntimeState<H>,
    sched: &mut Sched<H>,
    root_id: RootId,
    did_timeout: bool,
) -> TaskStatus<RuntimeState<H>> {
    let this_task = sched.current_scheduled_handle();

    state.drain_inbox(sched);
    if flush_passive_effects(state, root_id) {
        state.drain_inbox(sched);
    }
    let Some(root) = state.roots.get(root_id) else {
        return TaskStatus::Done;
    };
    // An effect or a higher-priority update replaced this callback.
    if root.callback != this_task || root.poisoned.is_some() {
        return TaskStatus::Done;
    }
    let lane = pick_highest_priority_lane(root.pending_lanes);
    if lane == NO_LANE {
        ensure_root_is_scheduled(state, sched, root_id);
        return TaskStatus::Done;
    }

    let time_slice = lane != Lanes::SYNC && !did_timeout;
    match render_root(state, sched, root_id, lane, time_slice) {
        Ok(RootExit::Incomplete) => {
            ensure_root_is_scheduled(state, sched, root_id);
            let still_ours = state
                .roots
                .get(root_id)
                .is_some_and(|root| root.callback == this_task);
            if still_ours {
                TaskStatus::continue_with(move |state, sched, did_timeout| {
                    perform_concurrent_work_on_root(state, sched, root_id, did_timeout)
                })
            } else {
                TaskStatus::Done
            }
        }
        Ok(RootExit::Completed) => {
            if let Some(root) = state.roots.get_mut(root_id) {
                root.finished_work = root.render.wip_root;
                root.finished_lane = lane;
                root.callback = None;
                root.callback_priority = NO_LANE;
            }
            if let Err(err) = commit_root(state, sched, root_id) {
                poison_root(state, sched, root_id, err);
            }
            TaskStatus::Done
        }
        Err(err) => {
            poison_root(state, sched, root_id, err);
            TaskStatus::Done
        }
    }
}

/// Sync-queue entry: render the sync lane without yielding, then commit.
pub(crate) fn perform_sync_work_on_root<H: HostConfig>(
    state: &mut RuntimeState<H>,
    sched: &mut Sched<H>,
    root_id: RootId,
) -> Result<(), HostError> {
    flush_passive_effects(state, root_id);
    state.drain_inbox(sched);

    let Some(root) = state.roots.get(root_id) else {
        return Ok(());
    };
    if root.poisoned.is_some() {
        return Ok(());
    }
    if pick_highest_priority_lane(root.pending_lanes) != Lanes::SYNC {
        ensure_root_is_scheduled(state, sched, root_id);
        return Ok(());
    }

    let exit = render_root(state, sched, root_id, Lanes::SYNC, false)?;
    debug_assert_eq!(exit, RootExit::Completed);
    if let Some(root) = state.roots.get_mut(root_id) {
        root.finished_work = root.render.wip_root;
        root.finished_lane = Lanes::SYNC;
        root.callback = None;
        root.callback_priority = NO_LANE;
    }
    commit_root(state, sched, root_id)
}

/// Render `lane` on `root_id`, starting fresh unless an in-flight render
/// for the same lane can be resumed.
pub(crate) fn render_root<H: HostConfig>(
    state: &mut RuntimeState<H>,
    sched: &Sched<H>,
    root_id: RootId,
    lane: Lane,
    time_slice: bool,
) -> Result<RootExit, HostError> {
    let Some(root) = state.roots.get_mut(root_id) else {
        return Ok(RootExit::Completed);
    };
    if !root.render.is_active() || root.render.lane != lane {
        prepare_fresh_stack(root, lane);
    }

    let span = debug_span!(
        "workloop.render",
        root = ?root_id,
        lane = lane_name(lane),
        time_sliced = time_slice,
        units = tracing::field::Empty,
        outcome = tracing::field::Empty,
    )
    .entered();

    let mut cx = WorkCx {
        root,
        host: &mut state.host,
        diagnostics: &mut state.diagnostics,
        inbox: &state.inbox,
    };
    let start_units = cx.root.render.units;
    let mut exit = RootExit::Completed;
    while let Some(unit) = cx.root.render.cursor {
        if time_slice && sched.should_yield() {
            exit = RootExit::Incomplete;
            break;
        }
        perform_unit_of_work(&mut cx, unit)?;
    }
    span.record("units", cx.root.render.units - start_units);
    span.record(
        "outcome",
        match exit {
            RootExit::Incomplete => "yielded",
            RootExit::Completed => "completed",
        },
    );
    Ok(exit)
}

/// Throw away any in-flight render and start a new one for `lane`.
fn prepare_fresh_stack<I: Clone>(root: &mut FiberRoot<I>, lane: Lane) {
    if root.render.is_active() {
        debug!(
            target: "weave.workloop",
            from = lane_name(root.render.lane),
            to = lane_name(lane),
            "in-flight render discarded"
        );
    }
    root.discard_render();

    let props = root
        .arena
        .get(root.current)
        .map(|fiber| fiber.pending_props.clone())
        .unwrap_or_default();
    let Some((wip, created)) = create_work_in_progress(&mut root.arena, root.current, props) else {
        return;
    };
    if created {
        root.render.created.push(wip);
    }
    root.render.wip_root = Some(wip);
    root.render.cursor = Some(wip);
    root.render.lane = lane;
}

fn perform_unit_of_work<H: HostConfig>(
    cx: &mut WorkCx<'_, H>,
    unit: FiberId,
) -> Result<(), HostError> {
    let next = begin_work(cx, unit);
    cx.root.render.units += 1;
    if let Some(fiber) = cx.root.arena.get_mut(unit) {
        fiber.memoized_props = Some(fiber.pending_props.clone());
    }
    match next {
        Some(child) => cx.root.render.cursor = Some(child),
        None => complete_unit_of_work(cx, unit)?,
    }
    Ok(())
}

/// Complete `unit`, then its ancestors, until a sibling is found or the
/// work-in-progress root is done.
fn complete_unit_of_work<H: HostConfig>(
    cx: &mut WorkCx<'_, H>,
    unit: FiberId,
) -> Result<(), HostError> {
    let mut node = unit;
    loop {
        complete_work(cx, node)?;
        let Some(fiber) = cx.root.arena.get(node) else {
            cx.root.render.cursor = None;
            return Ok(());
        };
        if let Some(sibling) = fiber.sibling {
            cx.root.render.cursor = Some(sibling);
            return Ok(());
        }
        match fiber.parent {
            Some(parent) => node = parent,
            None => {
                cx.root.render.cursor = None;
                return Ok(());
            }
        }
    }
}

/// Mark `root_id` dead after a host failure. Its callback is cancelled and
/// pending work dropped; later updates are refused.
pub(crate) fn poison_root<H: HostConfig>(
    state: &mut RuntimeState<H>,
    sched: &mut Sched<H>,
    root_id: RootId,
    err: HostError,
) {
    error!(target: "weave.workloop", root = ?root_id, error = %err, "host failure; root poisoned");
    let Some(root) = state.roots.get_mut(root_id) else {
        return;
    };
    if let Some(handle) = root.callback.take() {
        sched.cancel(handle);
    }
    root.discard_render();
    root.pending_lanes = NO_LANES;
    root.callback_priority = NO_LANE;
    root.poisoned = Some(err);
}
