#![forbid(unsafe_code)]

//! Lane-tagged state transitions.
//!
//! Each stateful unit (the tree root, every `use_state` slot) owns an
//! [`UpdateQueue`]. New updates land in a *pending* list shared between a
//! work unit and its alternate, so an update enqueued while a render is in
//! flight survives that render being thrown away.
//!
//! Processing folds the *base queue* over the *base state*. Updates whose
//! lane is not part of the render lane are skipped; the first skip freezes
//! the base state, and from then on every update stays in the base queue
//! so a later pass replays them in enqueue order. Updates that were applied
//! after a skip are re-tagged [`NO_LANE`] so every later pass applies them
//! again.

use crate::lane::{Lane, Lanes, NO_LANE, NO_LANES, is_subset_of_lanes, merge_lanes};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

/// A state transition.
pub enum Action<S> {
    /// Replace the state.
    Replace(S),
    /// Compute the next state from the previous one.
    Reduce(Rc<dyn Fn(&S) -> S>),
}

impl<S: Clone> Action<S> {
    fn apply(&self, prev: &S) -> S {
        match self {
            Self::Replace(next) => next.clone(),
            Self::Reduce(f) => f(prev),
        }
    }
}

impl<S: Clone> Clone for Action<S> {
    fn clone(&self) -> Self {
        match self {
            Self::Replace(s) => Self::Replace(s.clone()),
            Self::Reduce(f) => Self::Reduce(Rc::clone(f)),
        }
    }
}

impl<S: fmt::Debug> fmt::Debug for Action<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Replace(s) => f.debug_tuple("Replace").field(s).finish(),
            Self::Reduce(_) => f.write_str("Reduce(..)"),
        }
    }
}

/// One queued transition.
#[derive(Debug)]
pub struct Update<S> {
    pub action: Action<S>,
    pub lane: Lane,
}

impl<S: Clone> Clone for Update<S> {
    fn clone(&self) -> Self {
        Self {
            action: self.action.clone(),
            lane: self.lane,
        }
    }
}

/// Pending list shared by a unit and its alternate.
pub struct SharedQueue<S>(Rc<RefCell<VecDeque<Update<S>>>>);

impl<S> SharedQueue<S> {
    fn new() -> Self {
        Self(Rc::new(RefCell::new(VecDeque::new())))
    }

    /// Append at the tail.
    pub fn enqueue(&self, update: Update<S>) {
        self.0.borrow_mut().push_back(update);
    }

    /// Number of updates not yet merged into a base queue.
    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    fn drain(&self) -> Vec<Update<S>> {
        self.0.borrow_mut().drain(..).collect()
    }

    pub(crate) fn same_queue(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl<S> Clone for SharedQueue<S> {
    fn clone(&self) -> Self {
        Self(Rc::clone(&self.0))
    }
}

impl<S> fmt::Debug for SharedQueue<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedQueue")
            .field("pending", &self.len())
            .finish()
    }
}

/// Result of one processing pass.
#[derive(Debug)]
pub struct Processed<S> {
    /// State visible to this render.
    pub state: S,
    /// Lanes of updates left for a later pass.
    pub skipped_lanes: Lanes,
}

/// Base state plus base queue, with the shared pending list.
#[derive(Debug)]
pub struct UpdateQueue<S> {
    shared: SharedQueue<S>,
    base_state: S,
    base_queue: Vec<Update<S>>,
}

impl<S: Clone> Clone for UpdateQueue<S> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            base_state: self.base_state.clone(),
            base_queue: self.base_queue.clone(),
        }
    }
}

impl<S: Clone> UpdateQueue<S> {
    pub fn new(initial: S) -> Self {
        Self {
            shared: SharedQueue::new(),
            base_state: initial,
            base_queue: Vec::new(),
        }
    }

    /// Handle for enqueueing from outside the render.
    pub fn shared(&self) -> &SharedQueue<S> {
        &self.shared
    }

    /// Append an update to the pending list.
    pub fn enqueue(&self, update: Update<S>) {
        self.shared.enqueue(update);
    }

    /// Move pending updates into this base queue. Returns them so the
    /// caller can append the same updates to the alternate's base queue.
    pub fn merge_pending(&mut self) -> Vec<Update<S>> {
        let pending = self.shared.drain();
        self.base_queue.extend(pending.iter().cloned());
        pending
    }

    /// Append updates drained by the alternate.
    pub fn append_base(&mut self, updates: impl IntoIterator<Item = Update<S>>) {
        self.base_queue.extend(updates);
    }

    /// Number of updates retained for later passes.
    pub fn base_len(&self) -> usize {
        self.base_queue.len()
    }

    /// Fold the base queue for `render_lane`.
    pub fn process(&mut self, render_lane: Lane) -> Processed<S> {
        let mut state = self.base_state.clone();
        let mut frozen_base: Option<S> = None;
        let mut retained = Vec::new();
        let mut skipped_lanes = NO_LANES;

        for update in &self.base_queue {
            if !is_subset_of_lanes(render_lane, update.lane) {
                if frozen_base.is_none() {
                    frozen_base = Some(state.clone());
                }
                retained.push(update.clone());
                skipped_lanes = merge_lanes(skipped_lanes, update.lane);
                continue;
            }
            if frozen_base.is_some() {
                retained.push(Update {
                    action: update.action.clone(),
                    lane: NO_LANE,
                });
            }
            state = update.action.apply(&state);
        }

        self.base_state = frozen_base.unwrap_or_else(|| state.clone());
        self.base_queue = retained;
        Processed {
            state,
            skipped_lanes,
        }
    }
}
