#![forbid(unsafe_code)]

//! Component state and effects.
//!
//! A component function receives a [`RenderCx`] and calls hooks on it in a
//! fixed order. Slot `n` of this render is matched with slot `n` of the
//! last committed render; a slot that changes kind (or state type) is
//! reported as [`Diagnostic::HookOrderMismatch`] and mounted fresh.
//!
//! State setters enqueue into the slot's shared pending list and post the
//! root into the runtime inbox; nothing renders until the runtime drains it.

use crate::context::ContextStack;
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::element::{Component, Context, Node, PropValue, Props};
use crate::lane::{Lane, Lanes, NO_LANES, lane_name};
use crate::root::RootId;
use crate::update_context::{PriorityScope, TransitionScope, UpdateContext};
use crate::update_queue::{Action, SharedQueue, Update, UpdateQueue};
use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;
use tracing::trace;
use weave_scheduler::Priority;

/// Type-erased hook state.
pub type StateValue = Rc<dyn Any>;

/// Cleanup returned by an effect.
pub type Cleanup = Box<dyn FnOnce()>;

type CreateFn = Box<dyn FnOnce() -> Option<Cleanup>>;

/// Cleanup slot shared by every generation of one effect hook.
#[derive(Clone, Default)]
pub(crate) struct EffectInstance(Rc<RefCell<Option<Cleanup>>>);

impl EffectInstance {
    pub(crate) fn take_destroy(&self) -> Option<Cleanup> {
        self.0.borrow_mut().take()
    }

    pub(crate) fn set_destroy(&self, destroy: Option<Cleanup>) {
        *self.0.borrow_mut() = destroy;
    }
}

/// One effect produced by one render.
pub(crate) struct EffectRecord {
    /// Dependencies changed (or first mount): run cleanup then create.
    pub(crate) has_effect: bool,
    create: RefCell<Option<CreateFn>>,
    pub(crate) instance: EffectInstance,
}

impl EffectRecord {
    pub(crate) fn take_create(&self) -> Option<CreateFn> {
        self.create.borrow_mut().take()
    }
}

#[derive(Clone)]
pub(crate) struct StateHook {
    memoized: StateValue,
    queue: UpdateQueue<StateValue>,
}

#[derive(Clone)]
pub(crate) struct EffectHook {
    deps: Option<Vec<PropValue>>,
    instance: EffectInstance,
}

/// One hook slot.
#[derive(Clone)]
pub(crate) enum Hook {
    State(StateHook),
    Effect(EffectHook),
}

/// Setter returned by [`RenderCx::use_state`].
pub struct SetState<T> {
    queue: SharedQueue<StateValue>,
    root: RootId,
    inbox: Rc<UpdateContext>,
    _marker: PhantomData<fn(T)>,
}

impl<T: 'static> SetState<T> {
    /// Replace the state.
    pub fn set(&self, value: T) {
        self.dispatch(Action::Replace(Rc::new(value)));
    }

    /// Compute the next state from the previous one.
    pub fn update(&self, f: impl Fn(&T) -> T + 'static) {
        self.dispatch(Action::Reduce(Rc::new(move |prev: &StateValue| {
            match prev.downcast_ref::<T>() {
                Some(prev) => Rc::new(f(prev)) as StateValue,
                None => Rc::clone(prev),
            }
        })));
    }

    fn dispatch(&self, action: Action<StateValue>) {
        let lane = self.inbox.request_update_lane();
        self.queue.enqueue(Update { action, lane });
        self.inbox.dispatch(self.root, lane);
        trace!(
            target: "weave.reconcile",
            root = ?self.root,
            lane = lane_name(lane),
            "state update dispatched"
        );
    }
}

impl<T> Clone for SetState<T> {
    fn clone(&self) -> Self {
        Self {
            queue: self.queue.clone(),
            root: self.root,
            inbox: Rc::clone(&self.inbox),
            _marker: PhantomData,
        }
    }
}

impl<T> PartialEq for SetState<T> {
    fn eq(&self, other: &Self) -> bool {
        self.queue.same_queue(&other.queue)
    }
}

impl<T> fmt::Debug for SetState<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SetState")
            .field("root", &self.root)
            .field("pending", &self.queue.len())
            .finish()
    }
}

/// Starter returned by [`RenderCx::use_transition`].
#[derive(Clone)]
pub struct StartTransition {
    set_pending: SetState<bool>,
    inbox: Rc<UpdateContext>,
}

impl StartTransition {
    /// Mark pending at the caller's priority, then run `f` with its updates
    /// lowered to the transition lane.
    pub fn start(&self, f: impl FnOnce()) {
        let boosted = self.inbox.priority().min(Priority::UserBlocking);
        {
            let _priority = PriorityScope::new(&self.inbox, boosted);
            self.set_pending.set(true);
        }
        let _transition = TransitionScope::new(&self.inbox);
        f();
        self.set_pending.set(false);
    }
}

impl fmt::Debug for StartTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StartTransition(..)")
    }
}

/// Everything a component render needs from the work loop.
pub(crate) struct HookEnv<'a> {
    pub(crate) root: RootId,
    pub(crate) render_lane: Lane,
    pub(crate) contexts: &'a ContextStack,
    pub(crate) inbox: &'a Rc<UpdateContext>,
    pub(crate) diagnostics: &'a mut Diagnostics,
}

/// What a component render produced.
pub(crate) struct RenderOutput {
    pub(crate) children: Node,
    pub(crate) hooks: Vec<Hook>,
    pub(crate) effects: Vec<Rc<EffectRecord>>,
    pub(crate) has_passive: bool,
    pub(crate) skipped_lanes: Lanes,
    /// The committed hooks, with pending updates merged into their queues.
    pub(crate) current_hooks: Option<Vec<Hook>>,
}

/// Render context handed to component functions.
pub struct RenderCx<'a> {
    component: &'a str,
    env: HookEnv<'a>,
    current: Option<Vec<Hook>>,
    hooks: Vec<Hook>,
    effects: Vec<Rc<EffectRecord>>,
    has_passive: bool,
    skipped_lanes: Lanes,
}

impl<'a> RenderCx<'a> {
    /// Local state. `init` runs on mount only.
    pub fn use_state<T: Clone + 'static>(&mut self, init: impl FnOnce() -> T) -> (T, SetState<T>) {
        let index = self.hooks.len();
        let render_lane = self.env.render_lane;

        let mut updated = None;
        if let Some(Hook::State(prev)) = self.previous_mut(index)
            && prev.memoized.is::<T>()
        {
            let mut hook = prev.clone();
            let pending = hook.queue.merge_pending();
            prev.queue.append_base(pending);
            let processed = hook.queue.process(render_lane);
            hook.memoized = processed.state;
            updated = hook
                .memoized
                .downcast_ref::<T>()
                .cloned()
                .map(|value| (hook, value, processed.skipped_lanes));
        }

        let (hook, value) = match updated {
            Some((hook, value, skipped)) => {
                self.skipped_lanes |= skipped;
                (hook, value)
            }
            None => {
                self.check_mount_slot(index);
                let value = init();
                let memoized: StateValue = Rc::new(value.clone());
                let hook = StateHook {
                    queue: UpdateQueue::new(Rc::clone(&memoized)),
                    memoized,
                };
                (hook, value)
            }
        };

        let setter = SetState {
            queue: hook.queue.shared().clone(),
            root: self.env.root,
            inbox: Rc::clone(self.env.inbox),
            _marker: PhantomData,
        };
        self.hooks.push(Hook::State(hook));
        (value, setter)
    }

    /// Passive effect. Runs after commit when `deps` changed since the last
    /// committed render, or on every commit when `deps` is `None`. The
    /// returned cleanup runs before the next create and on unmount.
    pub fn use_effect(
        &mut self,
        create: impl FnOnce() -> Option<Cleanup> + 'static,
        deps: Option<Vec<PropValue>>,
    ) {
        let index = self.hooks.len();
        let previous = match self.previous_mut(index) {
            Some(Hook::Effect(prev)) => Some(prev.clone()),
            _ => None,
        };

        let (instance, has_effect) = match previous {
            Some(prev) => {
                let changed = !deps_equal(deps.as_deref(), prev.deps.as_deref());
                (prev.instance, changed)
            }
            None => {
                self.check_mount_slot(index);
                (EffectInstance::default(), true)
            }
        };

        self.has_passive |= has_effect;
        self.effects.push(Rc::new(EffectRecord {
            has_effect,
            create: RefCell::new(Some(Box::new(create))),
            instance: instance.clone(),
        }));
        self.hooks.push(Hook::Effect(EffectHook { deps, instance }));
    }

    /// Pending flag and a starter that runs updates at transition priority.
    pub fn use_transition(&mut self) -> (bool, StartTransition) {
        let (pending, set_pending) = self.use_state(|| false);
        let start = StartTransition {
            set_pending,
            inbox: Rc::clone(self.env.inbox),
        };
        (pending, start)
    }

    /// Innermost provided value for `context`, or its default.
    pub fn use_context(&self, context: &Context) -> PropValue {
        self.env.contexts.read(context)
    }

    /// Name of the component being rendered.
    pub fn component_name(&self) -> &str {
        self.component
    }

    fn previous_mut(&mut self, index: usize) -> Option<&mut Hook> {
        self.current.as_mut().and_then(|hooks| hooks.get_mut(index))
    }

    /// On update renders a slot that could not be reused is a mismatch.
    fn check_mount_slot(&mut self, index: usize) {
        if self.current.is_some() {
            self.env.diagnostics.emit(Diagnostic::HookOrderMismatch {
                component: self.component.to_owned(),
                index,
            });
        }
    }

    fn finish(self, children: Node) -> RenderOutput {
        if let Some(current) = &self.current
            && current.len() > self.hooks.len()
        {
            self.env.diagnostics.emit(Diagnostic::HookOrderMismatch {
                component: self.component.to_owned(),
                index: self.hooks.len(),
            });
        }
        RenderOutput {
            children,
            hooks: self.hooks,
            effects: self.effects,
            has_passive: self.has_passive,
            skipped_lanes: self.skipped_lanes,
            current_hooks: self.current,
        }
    }
}

impl fmt::Debug for RenderCx<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderCx")
            .field("component", &self.component)
            .field("hooks", &self.hooks.len())
            .finish()
    }
}

fn deps_equal(next: Option<&[PropValue]>, prev: Option<&[PropValue]>) -> bool {
    match (next, prev) {
        (Some(next), Some(prev)) => next == prev,
        _ => false,
    }
}

/// Run `component` with hooks bound to `current_hooks` (the committed
/// slots, or `None` on mount).
pub(crate) fn render_with_hooks(
    component: &Component,
    props: &Props,
    current_hooks: Option<Vec<Hook>>,
    env: HookEnv<'_>,
) -> RenderOutput {
    let mut cx = RenderCx {
        component: component.name(),
        env,
        current: current_hooks,
        hooks: Vec::new(),
        effects: Vec::new(),
        has_passive: false,
        skipped_lanes: NO_LANES,
    };
    let children = component.render(&mut cx, props);
    cx.finish(children)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReconcilerConfig;
    use slotmap::KeyData;

    struct Harness {
        contexts: ContextStack,
        inbox: Rc<UpdateContext>,
        diagnostics: Diagnostics,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                contexts: ContextStack::default(),
                inbox: UpdateContext::new(),
                diagnostics: Diagnostics::new(&ReconcilerConfig::default()),
            }
        }

        fn render(
            &mut self,
            component: &Component,
            current: Option<Vec<Hook>>,
            lane: Lane,
        ) -> RenderOutput {
            let env = HookEnv {
                root: RootId::from(KeyData::from_ffi(1)),
                render_lane: lane,
                contexts: &self.contexts,
                inbox: &self.inbox,
                diagnostics: &mut self.diagnostics,
            };
            render_with_hooks(component, &Props::new(), current, env)
        }
    }

    fn counter(seen: Rc<RefCell<Vec<i64>>>, setter: Rc<RefCell<Option<SetState<i64>>>>) -> Component {
        Component::new("Counter", move |cx, _| {
            let (n, set) = cx.use_state(|| 3i64);
            seen.borrow_mut().push(n);
            *setter.borrow_mut() = Some(set);
            Node::text(n.to_string())
        })
    }

    #[test]
    fn batched_updates_apply_in_order() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let setter = Rc::new(RefCell::new(None));
        let comp = counter(Rc::clone(&seen), Rc::clone(&setter));
        let mut h = Harness::new();

        let first = h.render(&comp, None, Lanes::SYNC);
        let set = setter.borrow().clone().unwrap();
        for _ in 0..3 {
            set.update(|n| n + 1);
        }
        assert_eq!(h.inbox.take_dispatched().len(), 3);

        let second = h.render(&comp, Some(first.hooks), Lanes::SYNC);
        assert_eq!(*seen.borrow(), vec![3, 6]);
        assert_eq!(second.children, Node::text("6"));
    }

    #[test]
    fn interrupted_render_keeps_updates_on_current() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let setter = Rc::new(RefCell::new(None));
        let comp = counter(Rc::clone(&seen), Rc::clone(&setter));
        let mut h = Harness::new();

        let mounted = h.render(&comp, None, Lanes::SYNC);
        setter.borrow().clone().unwrap().set(10);

        // Render, then throw the work-in-progress hooks away.
        let discarded = h.render(&comp, Some(mounted.hooks), Lanes::SYNC);
        let current = discarded.current_hooks;
        let retry = h.render(&comp, current, Lanes::SYNC);
        assert_eq!(retry.children, Node::text("10"));
    }

    #[test]
    fn effect_deps_decide_has_effect() {
        let dep = Rc::new(RefCell::new(1i64));
        let comp = {
            let dep = Rc::clone(&dep);
            Component::new("Effectful", move |cx, _| {
                let value = *dep.borrow();
                cx.use_effect(|| None, Some(vec![PropValue::Int(value)]));
                Node::Empty
            })
        };
        let mut h = Harness::new();
        let mount = h.render(&comp, None, Lanes::SYNC);
        assert!(mount.has_passive);

        let same = h.render(&comp, Some(mount.hooks), Lanes::SYNC);
        assert!(!same.has_passive);
        assert!(!same.effects[0].has_effect);

        *dep.borrow_mut() = 2;
        let changed = h.render(&comp, Some(same.hooks), Lanes::SYNC);
        assert!(changed.has_passive);
    }

    #[test]
    fn changed_hook_order_is_reported() {
        let flip = Rc::new(RefCell::new(false));
        let comp = {
            let flip = Rc::clone(&flip);
            Component::new("Flaky", move |cx, _| {
                if *flip.borrow() {
                    cx.use_effect(|| None, None);
                } else {
                    let _ = cx.use_state(|| 0u8);
                }
                Node::Empty
            })
        };
        let mut h = Harness::new();
        let mount = h.render(&comp, None, Lanes::SYNC);
        *flip.borrow_mut() = true;
        let _ = h.render(&comp, Some(mount.hooks), Lanes::SYNC);
        assert!(matches!(
            h.diagnostics.take().as_slice(),
            [Diagnostic::HookOrderMismatch { index: 0, .. }]
        ));
    }

    #[test]
    fn transition_lowers_lane_after_pending_flag() {
        let starter = Rc::new(RefCell::new(None));
        let comp = {
            let starter = Rc::clone(&starter);
            Component::new("Tabs", move |cx, _| {
                let (_pending, start) = cx.use_transition();
                *starter.borrow_mut() = Some(start);
                Node::Empty
            })
        };
        let mut h = Harness::new();
        let _ = h.render(&comp, None, Lanes::SYNC);
        let start = starter.borrow().clone().unwrap();
        start.start(|| {});
        let lanes: Vec<_> = h.inbox.take_dispatched().into_iter().map(|(_, l)| l).collect();
        assert_eq!(lanes, vec![Lanes::SYNC, Lanes::TRANSITION]);
    }
}
