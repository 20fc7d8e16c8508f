#![forbid(unsafe_code)]

//! The begin step: compute a unit's children description and reconcile it.

use crate::child_fiber::ChildReconciler;
use crate::diagnostics::Diagnostic;
use crate::element::{ElementKind, Node, PropValue};
use crate::fiber::{FiberId, FiberKind, FiberQueue, Flags, MemoizedState, live_alternate};
use crate::hooks::{HookEnv, render_with_hooks};
use crate::host::HostConfig;
use crate::work_loop::WorkCx;
use std::rc::Rc;

/// Begin `wip`. Returns its first child, or `None` when the unit should
/// complete.
pub(crate) fn begin_work<H: HostConfig>(cx: &mut WorkCx<'_, H>, wip: FiberId) -> Option<FiberId> {
    let kind = cx.root.arena.get(wip)?.kind;
    let children = match kind {
        FiberKind::Root => update_host_root(cx, wip),
        FiberKind::HostElement => {
            mark_ref(cx, wip);
            pending_children(cx, wip)
        }
        FiberKind::HostText => return None,
        FiberKind::Function => update_function_component(cx, wip),
        FiberKind::Fragment => pending_children(cx, wip),
        FiberKind::Provider => update_context_provider(cx, wip),
        FiberKind::Foreign => {
            let name = cx.root.arena.get(wip).map_or("", |fiber| fiber.name()).to_owned();
            cx.diagnostics.emit(Diagnostic::UnrecognizedKind { name });
            return None;
        }
    };
    reconcile_children(cx, wip, &children)
}

fn pending_children<H: HostConfig>(cx: &WorkCx<'_, H>, wip: FiberId) -> Node {
    cx.root
        .arena
        .get(wip)
        .map_or(Node::Empty, |fiber| fiber.pending_props.children())
}

fn update_host_root<H: HostConfig>(cx: &mut WorkCx<'_, H>, wip: FiberId) -> Node {
    let lane = cx.root.render.lane;
    let current = live_alternate(&cx.root.arena, wip);

    let Some(fiber) = cx.root.arena.get_mut(wip) else {
        return Node::Empty;
    };
    let FiberQueue::Root(queue) = &mut fiber.update_queue else {
        return Node::Empty;
    };
    let pending = queue.merge_pending();
    let processed = queue.process(lane);
    fiber.memoized_state = MemoizedState::Root(processed.state.clone());
    cx.root.render.skipped_lanes |= processed.skipped_lanes;

    if let Some(current) = current.and_then(|id| cx.root.arena.get_mut(id))
        && let FiberQueue::Root(current_queue) = &mut current.update_queue
    {
        current_queue.append_base(pending);
    }
    processed.state
}

fn mark_ref<H: HostConfig>(cx: &mut WorkCx<'_, H>, wip: FiberId) {
    let current_ref = live_alternate(&cx.root.arena, wip)
        .and_then(|id| cx.root.arena.get(id))
        .map(|current| current.node_ref.clone());
    let Some(fiber) = cx.root.arena.get_mut(wip) else {
        return;
    };
    let changed = match current_ref {
        None => fiber.node_ref.is_some(),
        Some(current_ref) => current_ref != fiber.node_ref,
    };
    if changed {
        fiber.flags |= Flags::REF;
    }
}

fn update_function_component<H: HostConfig>(cx: &mut WorkCx<'_, H>, wip: FiberId) -> Node {
    let Some(fiber) = cx.root.arena.get(wip) else {
        return Node::Empty;
    };
    let Some(ElementKind::Component(component)) = fiber.element_type.clone() else {
        return Node::Empty;
    };
    let props = fiber.pending_props.props().cloned().unwrap_or_default();

    let current = live_alternate(&cx.root.arena, wip);
    let current_hooks = current.and_then(|id| {
        let current = cx.root.arena.get_mut(id)?;
        match std::mem::take(&mut current.memoized_state) {
            MemoizedState::Hooks(hooks) => Some(hooks),
            other => {
                current.memoized_state = other;
                None
            }
        }
    });

    let env = HookEnv {
        root: cx.root.id,
        render_lane: cx.root.render.lane,
        contexts: &cx.root.render.contexts,
        inbox: cx.inbox,
        diagnostics: &mut *cx.diagnostics,
    };
    let output = render_with_hooks(&component, &props, current_hooks, env);

    if let (Some(current), Some(hooks)) = (current, output.current_hooks)
        && let Some(current) = cx.root.arena.get_mut(current)
    {
        current.memoized_state = MemoizedState::Hooks(hooks);
    }
    cx.root.render.skipped_lanes |= output.skipped_lanes;
    if let Some(fiber) = cx.root.arena.get_mut(wip) {
        fiber.memoized_state = MemoizedState::Hooks(output.hooks);
        fiber.update_queue = FiberQueue::Effects(Rc::from(output.effects));
        if output.has_passive {
            fiber.flags |= Flags::PASSIVE;
        }
    }
    output.children
}

fn update_context_provider<H: HostConfig>(cx: &mut WorkCx<'_, H>, wip: FiberId) -> Node {
    let Some(fiber) = cx.root.arena.get(wip) else {
        return Node::Empty;
    };
    let Some(ElementKind::Provider(context)) = fiber.element_type.clone() else {
        return Node::Empty;
    };
    let Some(props) = fiber.pending_props.props() else {
        return Node::Empty;
    };
    let children = props.children().clone();
    let value = props.get("value").cloned();

    let value = value.unwrap_or_else(|| {
        cx.diagnostics.emit(Diagnostic::MissingProviderValue);
        PropValue::Null
    });
    cx.root.render.contexts.push(&context, value);
    children
}

fn reconcile_children<H: HostConfig>(
    cx: &mut WorkCx<'_, H>,
    wip: FiberId,
    children: &Node,
) -> Option<FiberId> {
    let current = live_alternate(&cx.root.arena, wip);
    let current_first_child = current
        .and_then(|id| cx.root.arena.get(id))
        .and_then(|fiber| fiber.child);

    let mut reconciler = ChildReconciler {
        arena: &mut cx.root.arena,
        created: &mut cx.root.render.created,
        diagnostics: &mut *cx.diagnostics,
        track_effects: current.is_some(),
    };
    let first = reconciler.reconcile(wip, current_first_child, children);
    if let Some(fiber) = cx.root.arena.get_mut(wip) {
        fiber.child = first;
    }
    first
}
