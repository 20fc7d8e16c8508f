#![forbid(unsafe_code)]

//! Time slicing, preemption, and expiry on a manual clock.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;
use weave_harness::{Fixture, with_captured_tracing};
use weave_reconciler::{
    Component, Element, Lanes, ManualClock, Node, Priority, Props, SetState,
};

const UNIT_COST: Duration = Duration::from_millis(2);

/// A component that burns `UNIT_COST` of clock time per render.
fn slow(clock: &ManualClock, renders: &Rc<Cell<u32>>) -> Component {
    let clock = clock.clone();
    let renders = Rc::clone(renders);
    Component::new("Slow", move |_, props| {
        clock.advance(UNIT_COST);
        renders.set(renders.get() + 1);
        let label = props.get("label").and_then(|v| v.as_int()).unwrap_or_default();
        Element::host("li").child(label.to_string()).into()
    })
}

fn slow_list(component: &Component, count: i64) -> Element {
    Element::host("ul").children(
        (0..count).map(|i| Element::component(component, Props::new().with("label", i)).into()),
    )
}

#[test]
fn normal_priority_render_spans_several_slices_without_restarting() {
    let mut fx = Fixture::new();
    let renders = Rc::new(Cell::new(0));
    let component = slow(&fx.clock, &renders);

    fx.runtime
        .with_priority(Priority::Normal, |rt| {
            rt.update_root(fx.root, slow_list(&component, 10).into())
        })
        .expect("update");
    assert_eq!(fx.runtime.pending_lanes(fx.root), Lanes::DEFAULT);

    assert!(fx.runtime.run_slice());
    assert!(fx.runtime.is_rendering(fx.root));
    assert!(renders.get() < 10);
    assert_eq!(fx.markup(), "");

    let slices = 1 + fx.runtime.run_until_idle();
    assert!(slices > 2, "render finished in {slices} slices");
    assert_eq!(renders.get(), 10);
    assert!(fx.markup().starts_with("<ul><li>0</li>"));
    assert!(!fx.runtime.is_rendering(fx.root));
}

#[test]
fn sync_render_never_yields() {
    let mut fx = Fixture::new();
    let renders = Rc::new(Cell::new(0));
    let component = slow(&fx.clock, &renders);

    fx.runtime
        .update_root(fx.root, slow_list(&component, 10).into())
        .expect("update");
    let ((), capture) = with_captured_tracing(|| {
        fx.runtime.run_slice();
    });

    assert_eq!(renders.get(), 10);
    let renders = capture.spans_named("workloop.render");
    assert_eq!(renders.len(), 1);
    assert_eq!(renders[0].fields.get("time_sliced").map(String::as_str), Some("false"));
    assert_eq!(renders[0].fields.get("outcome").map(String::as_str), Some("completed"));
}

#[test]
fn expired_work_finishes_in_one_slice() {
    let mut fx = Fixture::new();
    let renders = Rc::new(Cell::new(0));
    let component = slow(&fx.clock, &renders);

    fx.runtime
        .with_priority(Priority::Normal, |rt| {
            rt.update_root(fx.root, slow_list(&component, 10).into())
        })
        .expect("update");
    // Starved for longer than the normal-priority timeout.
    fx.runtime.run_slice();
    fx.advance(Duration::from_secs(6));
    fx.runtime.run_slice();

    assert_eq!(renders.get(), 10);
    assert!(!fx.runtime.is_rendering(fx.root));
    assert!(fx.markup().starts_with("<ul>"));
}

struct AppHandles {
    set_count: SetState<i64>,
    set_query: SetState<i64>,
}

#[test]
fn sync_update_preempts_a_transition_in_progress() {
    let mut fx = Fixture::new();
    let slow_renders = Rc::new(Cell::new(0));
    let item = slow(&fx.clock, &slow_renders);
    let handles: Rc<RefCell<Option<AppHandles>>> = Rc::default();
    let app = {
        let handles = Rc::clone(&handles);
        Component::new("App", move |cx, _| {
            let (count, set_count) = cx.use_state(|| 0i64);
            let (query, set_query) = cx.use_state(|| 0i64);
            *handles.borrow_mut() = Some(AppHandles { set_count, set_query });
            let mut children: Vec<Node> = vec![Element::host("p").child(format!("{count}:{query}")).into()];
            children.extend(
                (0..10i64).map(|i| Element::component(&item, Props::new().with("label", i)).into()),
            );
            Node::list(children)
        })
    };

    fx.render(Element::component(&app, Props::new()));
    let p = fx.top_level()[0];
    let text = |fx: &Fixture| fx.runtime.host().render_node(p);
    assert_eq!(text(&fx), "<p>0:0</p>");

    let (set_count, set_query) = {
        let guard = handles.borrow();
        let h = guard.as_ref().expect("handles");
        (h.set_count.clone(), h.set_query.clone())
    };

    fx.runtime.start_transition(|_| set_query.set(1));
    assert!(fx.runtime.run_slice());
    assert!(fx.runtime.is_rendering(fx.root));
    assert_eq!(text(&fx), "<p>0:0</p>");

    let cancelled_before = fx.runtime.scheduler_stats().total_cancelled;
    set_count.set(1);
    fx.runtime.run_slice();

    // The urgent update committed alone; the transition is still owed.
    assert_eq!(text(&fx), "<p>1:0</p>");
    assert!(fx.runtime.pending_lanes(fx.root).contains(Lanes::TRANSITION));
    assert!(fx.runtime.scheduler_stats().total_cancelled > cancelled_before);

    fx.runtime.run_until_idle();
    assert_eq!(text(&fx), "<p>1:1</p>");
    assert!(fx.runtime.pending_lanes(fx.root).is_empty());
}

#[test]
fn updates_in_the_same_lane_share_one_task() {
    let mut fx = Fixture::new();
    fx.render(Element::host("div"));
    let submitted = fx.runtime.scheduler_stats().total_submitted;

    fx.runtime.with_priority(Priority::Normal, |rt| {
        for i in 0..5 {
            rt.update_root(fx.root, Node::text(i.to_string())).expect("update");
        }
    });
    fx.runtime.run_until_idle();

    assert_eq!(fx.markup(), "4");
    // One render task; no passive effects in this tree.
    assert_eq!(fx.runtime.scheduler_stats().total_submitted - submitted, 1);
}

#[test]
fn two_roots_render_independently() {
    let mut fx = Fixture::new();
    let second_container = fx.host_mut().create_container();
    let second = fx.runtime.create_root(second_container);

    fx.runtime
        .update_root(fx.root, Element::host("a").into())
        .expect("first");
    fx.runtime
        .update_root(second, Element::host("b").into())
        .expect("second");
    assert_eq!(fx.runtime.flush_sync(), 2);

    assert_eq!(fx.markup(), "<a></a>");
    assert_eq!(fx.runtime.host().render(second_container), "<b></b>");
}
