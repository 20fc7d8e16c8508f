#![forbid(unsafe_code)]

//! Tree roots.
//!
//! A [`FiberRoot`] owns everything one mounted tree needs: the arena, the
//! committed tree (`current`), the lane bookkeeping, the pending passive
//! effects, the scheduler callback it currently owns, and the cursor state
//! of an in-flight render. Roots share nothing with each other.

use crate::context::ContextStack;
use crate::element::Node;
use crate::error::HostError;
use crate::fiber::{Fiber, FiberArena, FiberId, FiberKind, FiberQueue, MemoizedState, PendingProps};
use crate::hooks::EffectRecord;
use crate::inspect::CommitSummary;
use crate::lane::{Lane, Lanes, NO_LANE, NO_LANES, remove_lanes};
use crate::update_queue::UpdateQueue;
use slotmap::new_key_type;
use std::rc::Rc;
use weave_scheduler::TaskHandle;

new_key_type! {
    /// Handle to a mounted root.
    pub struct RootId;
}

/// Effect lists waiting for the passive flush.
#[derive(Default)]
pub(crate) struct PendingPassiveEffects {
    /// Effects of deleted components: cleanup only.
    pub(crate) unmount: Vec<Rc<[Rc<EffectRecord>]>>,
    /// Effects of committed components: cleanup then create.
    pub(crate) update: Vec<Rc<[Rc<EffectRecord>]>>,
}

impl PendingPassiveEffects {
    pub(crate) fn is_empty(&self) -> bool {
        self.unmount.is_empty() && self.update.is_empty()
    }
}

/// State of an in-flight render pass.
#[derive(Default)]
pub(crate) struct RenderState {
    /// Root of the work-in-progress tree.
    pub(crate) wip_root: Option<FiberId>,
    /// The unit to begin next.
    pub(crate) cursor: Option<FiberId>,
    pub(crate) lane: Lane,
    /// Units allocated by this pass.
    pub(crate) created: Vec<FiberId>,
    pub(crate) contexts: ContextStack,
    /// Lanes skipped by update queues during this pass.
    pub(crate) skipped_lanes: Lanes,
    /// Lanes dispatched while this pass was in flight.
    pub(crate) interleaved_lanes: Lanes,
    /// Units begun so far.
    pub(crate) units: u64,
}

impl RenderState {
    pub(crate) fn is_active(&self) -> bool {
        self.wip_root.is_some()
    }
}

pub(crate) struct FiberRoot<I> {
    pub(crate) id: RootId,
    pub(crate) container: I,
    pub(crate) arena: FiberArena<I>,
    pub(crate) current: FiberId,
    pub(crate) finished_work: Option<FiberId>,
    pub(crate) pending_lanes: Lanes,
    pub(crate) finished_lane: Lane,
    pub(crate) pending_passive: PendingPassiveEffects,
    pub(crate) passive_scheduled: bool,
    pub(crate) callback: Option<TaskHandle>,
    pub(crate) callback_priority: Lane,
    pub(crate) render: RenderState,
    pub(crate) poisoned: Option<HostError>,
    pub(crate) last_commit: Option<CommitSummary>,
}

impl<I: Clone> FiberRoot<I> {
    pub(crate) fn new(id: RootId, container: I) -> Self {
        let mut arena = FiberArena::with_key();
        let mut host_root = Fiber::new(FiberKind::Root, PendingProps::default(), None);
        host_root.host_instance = Some(container.clone());
        host_root.memoized_state = MemoizedState::Root(Node::Empty);
        host_root.update_queue = FiberQueue::Root(UpdateQueue::new(Node::Empty));
        let current = arena.insert(host_root);
        Self {
            id,
            container,
            arena,
            current,
            finished_work: None,
            pending_lanes: NO_LANES,
            finished_lane: NO_LANE,
            pending_passive: PendingPassiveEffects::default(),
            passive_scheduled: false,
            callback: None,
            callback_priority: NO_LANE,
            render: RenderState::default(),
            poisoned: None,
            last_commit: None,
        }
    }
}

impl<I> FiberRoot<I> {
    pub(crate) fn mark_updated(&mut self, lane: Lane) {
        self.pending_lanes |= lane;
        if self.render.is_active() {
            self.render.interleaved_lanes |= lane;
        }
    }

    pub(crate) fn mark_finished(&mut self, lane: Lane) {
        self.pending_lanes = remove_lanes(self.pending_lanes, lane);
    }

    /// The committed root unit's update queue.
    pub(crate) fn root_queue(&self) -> Option<&UpdateQueue<Node>> {
        match &self.arena.get(self.current)?.update_queue {
            FiberQueue::Root(queue) => Some(queue),
            _ => None,
        }
    }

    /// Free every unit allocated by the in-flight render and reset it.
    pub(crate) fn discard_render(&mut self) {
        for id in self.render.created.drain(..) {
            self.arena.remove(id);
        }
        self.render = RenderState::default();
        self.finished_work = None;
    }
}
