#![forbid(unsafe_code)]

//! Calling-context priority and the dispatch inbox.
//!
//! State setters can be called from anywhere: between slices, inside a
//! passive effect, inside a transition callback. They cannot reach the
//! runtime directly, so they record `(root, lane)` here and the runtime
//! drains the inbox before every slice and around every task.
//!
//! The lane of a new update is derived from the innermost scope: a
//! [`TransitionScope`] yields [`Lanes::TRANSITION`], otherwise the priority
//! set by the innermost [`PriorityScope`] (default: immediate).

use crate::lane::{Lane, Lanes, request_lane};
use crate::root::RootId;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use weave_scheduler::Priority;

/// Shared between the runtime and every setter it hands out.
#[derive(Debug)]
pub(crate) struct UpdateContext {
    priority: Cell<Priority>,
    transition_depth: Cell<u32>,
    dispatched: RefCell<Vec<(RootId, Lane)>>,
}

impl UpdateContext {
    pub(crate) fn new() -> Rc<Self> {
        Rc::new(Self {
            priority: Cell::new(Priority::Immediate),
            transition_depth: Cell::new(0),
            dispatched: RefCell::new(Vec::new()),
        })
    }

    pub(crate) fn priority(&self) -> Priority {
        self.priority.get()
    }

    pub(crate) fn request_update_lane(&self) -> Lane {
        if self.transition_depth.get() > 0 {
            Lanes::TRANSITION
        } else {
            request_lane(self.priority.get())
        }
    }

    pub(crate) fn dispatch(&self, root: RootId, lane: Lane) {
        self.dispatched.borrow_mut().push((root, lane));
    }

    pub(crate) fn take_dispatched(&self) -> Vec<(RootId, Lane)> {
        std::mem::take(&mut *self.dispatched.borrow_mut())
    }

    pub(crate) fn has_dispatched(&self) -> bool {
        !self.dispatched.borrow().is_empty()
    }
}

/// RAII guard setting the calling-context priority.
pub(crate) struct PriorityScope {
    ctx: Rc<UpdateContext>,
    prev: Priority,
}

impl PriorityScope {
    pub(crate) fn new(ctx: &Rc<UpdateContext>, priority: Priority) -> Self {
        let prev = ctx.priority.replace(priority);
        Self {
            ctx: Rc::clone(ctx),
            prev,
        }
    }
}

impl Drop for PriorityScope {
    fn drop(&mut self) {
        self.ctx.priority.set(self.prev);
    }
}

/// RAII guard marking updates as transitions. Nests.
pub(crate) struct TransitionScope {
    ctx: Rc<UpdateContext>,
}

impl TransitionScope {
    pub(crate) fn new(ctx: &Rc<UpdateContext>) -> Self {
        ctx.transition_depth.set(ctx.transition_depth.get() + 1);
        Self {
            ctx: Rc::clone(ctx),
        }
    }
}

impl Drop for TransitionScope {
    fn drop(&mut self) {
        let depth = self.ctx.transition_depth.get();
        self.ctx.transition_depth.set(depth.saturating_sub(1));
    }
}
