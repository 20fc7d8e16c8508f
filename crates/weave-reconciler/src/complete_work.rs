#![forbid(unsafe_code)]

//! The complete step: build or diff host nodes and bubble flags upward.
//!
//! Newly mounted host elements are assembled offscreen here: the fresh
//! instance receives every host node of its subtree before it is ever
//! attached, so a mount costs a single placement at the top.

use crate::element::{ElementKind, Props};
use crate::error::HostError;
use crate::fiber::{FiberArena, FiberId, FiberKind, Flags, live_alternate};
use crate::host::HostConfig;
use crate::work_loop::WorkCx;
use std::rc::Rc;

pub(crate) fn complete_work<H: HostConfig>(
    cx: &mut WorkCx<'_, H>,
    wip: FiberId,
) -> Result<(), HostError> {
    let Some(fiber) = cx.root.arena.get(wip) else {
        return Ok(());
    };
    match fiber.kind {
        FiberKind::HostElement => complete_host_element(cx, wip)?,
        FiberKind::HostText => complete_host_text(cx, wip)?,
        FiberKind::Provider => {
            if let Some(ElementKind::Provider(context)) = &fiber.element_type {
                let context = context.clone();
                cx.root.render.contexts.pop(&context);
            }
        }
        FiberKind::Root | FiberKind::Function | FiberKind::Fragment | FiberKind::Foreign => {}
    }
    bubble_properties(&mut cx.root.arena, wip);
    Ok(())
}

fn complete_host_element<H: HostConfig>(
    cx: &mut WorkCx<'_, H>,
    wip: FiberId,
) -> Result<(), HostError> {
    let arena = &mut cx.root.arena;
    let current = live_alternate(arena, wip);
    let Some(fiber) = arena.get(wip) else {
        return Ok(());
    };

    if current.is_some() && fiber.host_instance.is_some() {
        let old = current
            .and_then(|id| arena.get(id))
            .and_then(|current| current.memoized_props.as_ref())
            .and_then(|props| props.props());
        let changed = match (old, fiber.pending_props.props()) {
            (Some(old), Some(new)) => !old.same_attrs(new),
            _ => true,
        };
        if changed && let Some(fiber) = arena.get_mut(wip) {
            fiber.flags |= Flags::UPDATE;
        }
        return Ok(());
    }

    let tag = match &fiber.element_type {
        Some(ElementKind::Host(tag)) => tag.clone(),
        _ => Rc::from(""),
    };
    let props = fiber.pending_props.props().cloned().unwrap_or_else(Props::new);
    let instance = cx.host.create_instance(&tag, &props)?;
    append_all_children(cx.host, &cx.root.arena, &instance, wip)?;
    if let Some(fiber) = cx.root.arena.get_mut(wip) {
        fiber.host_instance = Some(instance);
    }
    Ok(())
}

fn complete_host_text<H: HostConfig>(
    cx: &mut WorkCx<'_, H>,
    wip: FiberId,
) -> Result<(), HostError> {
    let arena = &mut cx.root.arena;
    let current = live_alternate(arena, wip);
    let Some(fiber) = arena.get(wip) else {
        return Ok(());
    };
    let text: Rc<str> = Rc::from(fiber.pending_props.text().unwrap_or_default());

    if current.is_some() && fiber.host_instance.is_some() {
        let old = current
            .and_then(|id| arena.get(id))
            .and_then(|current| current.memoized_props.as_ref())
            .and_then(|props| props.text());
        if old != Some(&*text)
            && let Some(fiber) = arena.get_mut(wip)
        {
            fiber.flags |= Flags::UPDATE;
        }
        return Ok(());
    }

    let instance = cx.host.create_text_instance(&text)?;
    if let Some(fiber) = cx.root.arena.get_mut(wip) {
        fiber.host_instance = Some(instance);
    }
    Ok(())
}

/// Append the topmost host nodes below `wip` to `parent`, descending
/// through non-host units.
fn append_all_children<H: HostConfig>(
    host: &mut H,
    arena: &FiberArena<H::Instance>,
    parent: &H::Instance,
    wip: FiberId,
) -> Result<(), HostError> {
    let mut node = arena.get(wip).and_then(|fiber| fiber.child);
    'walk: while let Some(id) = node {
        let Some(fiber) = arena.get(id) else {
            break;
        };
        match fiber.kind {
            FiberKind::HostElement | FiberKind::HostText => {
                if let Some(instance) = &fiber.host_instance {
                    host.append_child(parent, instance)?;
                }
            }
            _ => {
                if let Some(child) = fiber.child {
                    node = Some(child);
                    continue;
                }
            }
        }

        let mut cursor = id;
        loop {
            let Some(fiber) = arena.get(cursor) else {
                break 'walk;
            };
            if let Some(sibling) = fiber.sibling {
                node = Some(sibling);
                continue 'walk;
            }
            match fiber.parent {
                Some(parent) if parent != wip => cursor = parent,
                _ => break 'walk,
            }
        }
    }
    Ok(())
}

/// Fold the children's flags into `wip.subtree_flags` and point their
/// parent links at `wip`.
fn bubble_properties<I>(arena: &mut FiberArena<I>, wip: FiberId) {
    let mut subtree = Flags::empty();
    let mut child = arena.get(wip).and_then(|fiber| fiber.child);
    while let Some(id) = child {
        let Some(fiber) = arena.get_mut(id) else {
            break;
        };
        subtree |= fiber.subtree_flags | fiber.flags;
        fiber.parent = Some(wip);
        child = fiber.sibling;
    }
    if let Some(fiber) = arena.get_mut(wip) {
        fiber.subtree_flags |= subtree;
    }
}
