#![forbid(unsafe_code)]

//! The public entry point.
//!
//! A [`Runtime`] owns a host adapter, any number of roots and the scheduler
//! that drives them. Nothing runs until the embedder calls
//! [`Runtime::run_slice`] or [`Runtime::run_until_idle`]; updates posted in
//! between (by [`Runtime::update_root`] or by state setters) are batched
//! into the next slice.
//!
//! # Example
//!
//! ```ignore
//! let mut runtime = Runtime::new(MyHost::default());
//! let root = runtime.create_root(container);
//! runtime.update_root(root, Element::host("div").child("hello").into())?;
//! runtime.run_until_idle();
//! ```

use crate::config::RuntimeConfig;
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::element::Node;
use crate::error::{HostError, ReconcileError};
use crate::fiber::MemoizedState;
use crate::host::HostConfig;
use crate::inspect::{CommitSummary, NodeSnapshot};
use crate::lane::{Lanes, lane_name};
use crate::root::{FiberRoot, RootId};
use crate::sync_queue::{SyncQueue, flush_sync_callbacks};
use crate::update_context::{PriorityScope, TransitionScope, UpdateContext};
use crate::update_queue::{Action, Update};
use crate::work_loop::schedule_update_on_root;
use slotmap::SlotMap;
use std::any::Any;
use std::fmt;
use std::panic::resume_unwind;
use std::rc::Rc;
use tracing::{debug, info};
use weave_scheduler::{Clock, MonotonicClock, Priority, Scheduler, SchedulerStats};

pub(crate) type Sched<H> = Scheduler<RuntimeState<H>>;

/// Everything scheduler tasks operate on.
pub(crate) struct RuntimeState<H: HostConfig> {
    pub(crate) host: H,
    pub(crate) roots: SlotMap<RootId, FiberRoot<H::Instance>>,
    pub(crate) inbox: Rc<UpdateContext>,
    pub(crate) sync_queue: SyncQueue<RuntimeState<H>>,
    pub(crate) diagnostics: Diagnostics,
    /// Set for the duration of a commit.
    pub(crate) committing: bool,
    /// First effect panic of the current slice, resumed once it unwinds.
    pub(crate) pending_panic: Option<Box<dyn Any + Send>>,
}

impl<H: HostConfig> RuntimeState<H> {
    /// Turn queued `(root, lane)` dispatches into scheduled work.
    pub(crate) fn drain_inbox(&mut self, sched: &mut Sched<H>) {
        while self.inbox.has_dispatched() {
            for (root, lane) in self.inbox.take_dispatched() {
                schedule_update_on_root(self, sched, root, lane);
            }
        }
    }
}

/// Incremental UI reconciliation runtime over a host adapter `H`.
pub struct Runtime<H: HostConfig> {
    state: RuntimeState<H>,
    scheduler: Sched<H>,
}

impl<H: HostConfig> Runtime<H> {
    /// Runtime with default configuration and a monotonic clock.
    pub fn new(host: H) -> Self {
        Self::with_config(host, RuntimeConfig::default())
    }

    pub fn with_config(host: H, config: RuntimeConfig) -> Self {
        Self::with_clock(host, config, MonotonicClock::new())
    }

    /// Runtime on a caller-supplied clock, e.g. a
    /// [`ManualClock`](weave_scheduler::ManualClock) for deterministic
    /// time slicing.
    pub fn with_clock(host: H, config: RuntimeConfig, clock: impl Clock + 'static) -> Self {
        Self {
            state: RuntimeState {
                host,
                roots: SlotMap::with_key(),
                inbox: UpdateContext::new(),
                sync_queue: SyncQueue::default(),
                diagnostics: Diagnostics::new(&config.reconciler),
                committing: false,
                pending_panic: None,
            },
            scheduler: Scheduler::with_clock(config.scheduler, clock),
        }
    }

    /// Mount an empty root over `container`.
    pub fn create_root(&mut self, container: H::Instance) -> RootId {
        let id = self
            .state
            .roots
            .insert_with_key(|id| FiberRoot::new(id, container));
        info!(target: "weave.workloop", root = ?id, "root created");
        id
    }

    /// Replace the root's element tree. The render happens on a later slice,
    /// at the lane of the calling context.
    pub fn update_root(&mut self, root: RootId, node: Node) -> Result<(), ReconcileError> {
        let fiber_root = self
            .state
            .roots
            .get(root)
            .ok_or(ReconcileError::UnknownRoot(root))?;
        if fiber_root.poisoned.is_some() {
            return Err(ReconcileError::RootPoisoned(root));
        }
        let Some(queue) = fiber_root.root_queue() else {
            return Err(ReconcileError::UnknownRoot(root));
        };
        let lane = self.state.inbox.request_update_lane();
        queue.enqueue(Update {
            action: Action::Replace(node),
            lane,
        });
        debug!(target: "weave.workloop", root = ?root, lane = lane_name(lane), "root update queued");
        schedule_update_on_root(&mut self.state, &mut self.scheduler, root, lane);
        Ok(())
    }

    /// Run one scheduler slice. Returns `true` while work remains.
    ///
    /// # Panics
    ///
    /// Resumes the first panic raised by a passive effect during the slice,
    /// after the runtime's own state is consistent again.
    pub fn run_slice(&mut self) -> bool {
        self.state.drain_inbox(&mut self.scheduler);
        self.scheduler.run_slice(&mut self.state);
        self.state.drain_inbox(&mut self.scheduler);
        if let Some(payload) = self.state.pending_panic.take() {
            resume_unwind(payload);
        }
        !self.scheduler.is_idle()
    }

    /// Run slices until no work remains. Returns the number of slices run.
    pub fn run_until_idle(&mut self) -> u64 {
        let mut slices = 0;
        loop {
            self.state.drain_inbox(&mut self.scheduler);
            if self.scheduler.is_idle() {
                return slices;
            }
            slices += 1;
            self.run_slice();
        }
    }

    /// Run pending synchronous renders now, without waiting for a slice.
    /// Returns how many ran.
    pub fn flush_sync(&mut self) -> usize {
        self.state.drain_inbox(&mut self.scheduler);
        flush_sync_callbacks(&mut self.state, &mut self.scheduler)
    }

    /// Run `f` with updates it posts tagged at `priority`'s lane.
    pub fn with_priority<R>(&mut self, priority: Priority, f: impl FnOnce(&mut Self) -> R) -> R {
        let _scope = PriorityScope::new(&self.state.inbox, priority);
        f(self)
    }

    /// Run `f` with updates it posts tagged as transitions.
    pub fn start_transition<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        let _scope = TransitionScope::new(&self.state.inbox);
        f(self)
    }

    pub fn host(&self) -> &H {
        &self.state.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.state.host
    }

    /// Retained diagnostics, oldest first.
    pub fn diagnostics(&self) -> impl Iterator<Item = &Diagnostic> {
        self.state.diagnostics.entries()
    }

    /// Drain the retained diagnostics.
    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        self.state.diagnostics.take()
    }

    /// Diagnostics emitted over the runtime's lifetime, including evicted
    /// ones.
    pub fn diagnostics_total(&self) -> u64 {
        self.state.diagnostics.total()
    }

    pub fn scheduler_stats(&self) -> SchedulerStats {
        self.scheduler.stats()
    }

    /// True when no task is queued and no dispatch is waiting.
    pub fn is_idle(&self) -> bool {
        self.scheduler.is_idle()
            && !self.state.inbox.has_dispatched()
            && self.state.sync_queue.is_empty()
    }

    /// The error that poisoned `root`, if any.
    pub fn root_error(&self, root: RootId) -> Option<&HostError> {
        self.state.roots.get(root)?.poisoned.as_ref()
    }

    /// Lanes with outstanding work on `root`.
    pub fn pending_lanes(&self, root: RootId) -> Lanes {
        self.state
            .roots
            .get(root)
            .map_or(Lanes::empty(), |root| root.pending_lanes)
    }

    /// Updates still queued on `root` that no render has merged yet.
    pub fn queued_root_updates(&self, root: RootId) -> usize {
        self.state
            .roots
            .get(root)
            .and_then(FiberRoot::root_queue)
            .map_or(0, |queue| queue.shared().len())
    }

    /// Snapshot of the committed tree of `root`.
    pub fn inspect(&self, root: RootId) -> Option<NodeSnapshot<H::Instance>> {
        let root = self.state.roots.get(root)?;
        NodeSnapshot::capture(&root.arena, root.current)
    }

    /// Summary of the most recent commit on `root`.
    pub fn last_commit(&self, root: RootId) -> Option<&CommitSummary> {
        self.state.roots.get(root)?.last_commit.as_ref()
    }

    /// Whether `root` has a render in flight.
    pub fn is_rendering(&self, root: RootId) -> bool {
        self.state
            .roots
            .get(root)
            .is_some_and(|root| root.render.is_active())
    }

    /// Work units allocated for `root`, across both trees.
    pub fn arena_len(&self, root: RootId) -> usize {
        self.state.roots.get(root).map_or(0, |root| root.arena.len())
    }

    /// Element tree most recently committed on `root`.
    pub fn committed_element(&self, root: RootId) -> Option<Node> {
        let root = self.state.roots.get(root)?;
        match &root.arena.get(root.current)?.memoized_state {
            MemoizedState::Root(node) => Some(node.clone()),
            _ => None,
        }
    }
}

impl<H: HostConfig + Default> Default for Runtime<H> {
    fn default() -> Self {
        Self::new(H::default())
    }
}

impl<H: HostConfig + fmt::Debug> fmt::Debug for Runtime<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("host", &self.state.host)
            .field("roots", &self.state.roots.len())
            .field("sync_queue", &self.state.sync_queue.len())
            .field("pending_tasks", &self.scheduler.pending_count())
            .finish_non_exhaustive()
    }
}
