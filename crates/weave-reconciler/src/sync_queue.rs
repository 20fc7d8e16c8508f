#![forbid(unsafe_code)]

//! Queue of synchronous-lane renders.
//!
//! Sync work is not scheduled per root. Each root with sync work pushes one
//! callback here, and a single immediate-priority task flushes the whole
//! queue. A callback that fails is reported and its root poisoned; it is
//! never retried.

use crate::diagnostics::Diagnostic;
use crate::error::HostError;
use crate::host::HostConfig;
use crate::root::RootId;
use crate::runtime::{RuntimeState, Sched};
use crate::work_loop::poison_root;
use tracing::{debug, trace};
use weave_scheduler::{Priority, Scheduler, TaskHandle, TaskStatus};

pub(crate) type SyncCallback<C> = Box<dyn FnOnce(&mut C, &mut Scheduler<C>) -> Result<(), HostError>>;

pub(crate) struct SyncQueue<C> {
    callbacks: Vec<(RootId, SyncCallback<C>)>,
    /// The immediate task that will flush the queue, if one is pending.
    flush_task: Option<TaskHandle>,
}

impl<C> Default for SyncQueue<C> {
    fn default() -> Self {
        Self {
            callbacks: Vec::new(),
            flush_task: None,
        }
    }
}

impl<C> SyncQueue<C> {
    pub(crate) fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }
}

/// Queue `callback` for `root` and make sure a flush task is pending.
pub(crate) fn schedule_sync_callback<H, F>(
    state: &mut RuntimeState<H>,
    sched: &mut Sched<H>,
    root: RootId,
    callback: F,
) where
    H: HostConfig,
    F: FnOnce(&mut RuntimeState<H>, &mut Sched<H>) -> Result<(), HostError> + 'static,
{
    state.sync_queue.callbacks.push((root, Box::new(callback)));
    if state.sync_queue.flush_task.is_some() {
        return;
    }
    let handle = sched.schedule(Priority::Immediate, |state, sched, _| {
        state.sync_queue.flush_task = None;
        flush_sync_callbacks(state, sched);
        TaskStatus::Done
    });
    state.sync_queue.flush_task = Some(handle);
    trace!(target: "weave.workloop", root = ?root, "sync flush scheduled");
}

/// Run every queued callback. Callbacks queued while flushing wait for the
/// next flush. Returns how many ran.
pub(crate) fn flush_sync_callbacks<H: HostConfig>(
    state: &mut RuntimeState<H>,
    sched: &mut Sched<H>,
) -> usize {
    if let Some(handle) = state.sync_queue.flush_task.take() {
        sched.cancel(handle);
    }
    let callbacks = std::mem::take(&mut state.sync_queue.callbacks);
    let count = callbacks.len();
    for (root, callback) in callbacks {
        if let Err(err) = callback(state, sched) {
            state.diagnostics.emit(Diagnostic::SyncCallbackFailed {
                root,
                error: err.to_string(),
            });
            poison_root(state, sched, root, err);
        }
    }
    if count > 0 {
        debug!(target: "weave.workloop", callbacks = count, "sync queue flushed");
    }
    count
}
