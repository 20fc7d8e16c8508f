#![forbid(unsafe_code)]

//! State, effects, context, and refs driven through a full runtime.

use std::cell::{Cell, RefCell};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::Rc;
use weave_harness::{Fixture, NodeId};
use weave_reconciler::{
    Cleanup, Component, Context, Diagnostic, Element, HostOp, Node, NodeRef, PropValue, Props,
    SetState, StartTransition,
};

type Log = Rc<RefCell<Vec<String>>>;

fn new_log() -> Log {
    Rc::new(RefCell::new(Vec::new()))
}

fn drain(log: &Log) -> Vec<String> {
    std::mem::take(&mut *log.borrow_mut())
}

/// Component whose effect runs after every commit and logs create/destroy.
fn logger(log: &Log) -> Component {
    let log = Rc::clone(log);
    Component::new("Logger", move |cx, props| {
        let name = props
            .get("name")
            .and_then(PropValue::as_str)
            .unwrap_or_default()
            .to_owned();
        let log = Rc::clone(&log);
        let label = name.clone();
        cx.use_effect(
            move || {
                log.borrow_mut().push(format!("create {label}"));
                let cleanup: Cleanup = Box::new(move || log.borrow_mut().push(format!("destroy {label}")));
                Some(cleanup)
            },
            None,
        );
        Node::text(name)
    })
}

fn loggers(component: &Component, names: &[&str]) -> Element {
    Element::host("div").children(names.iter().map(|name| {
        Element::component(component, Props::new().with("name", *name))
            .key(name)
            .into()
    }))
}

#[test]
fn state_updates_are_batched_into_one_render() {
    let renders = Rc::new(Cell::new(0u32));
    let setter: Rc<RefCell<Option<SetState<i64>>>> = Rc::default();
    let counter = {
        let renders = Rc::clone(&renders);
        let setter = Rc::clone(&setter);
        Component::new("Counter", move |cx, _| {
            renders.set(renders.get() + 1);
            let (count, set) = cx.use_state(|| 0i64);
            *setter.borrow_mut() = Some(set);
            Node::text(count.to_string())
        })
    };

    let mut fx = Fixture::new();
    fx.render(Element::component(&counter, Props::new()));
    assert_eq!(fx.markup(), "0");
    assert_eq!(renders.get(), 1);

    let set = setter.borrow().clone().expect("setter");
    set.update(|n| n + 1);
    set.update(|n| n + 1);
    set.update(|n| n * 10);
    fx.runtime.run_until_idle();

    assert_eq!(fx.markup(), "20");
    assert_eq!(renders.get(), 2);
}

#[test]
fn state_survives_sibling_reorder() {
    let setters: Rc<RefCell<Vec<(String, SetState<i64>)>>> = Rc::default();
    let item = {
        let setters = Rc::clone(&setters);
        Component::new("Item", move |cx, props| {
            let name = props.get("name").and_then(PropValue::as_str).unwrap_or_default().to_owned();
            let (count, set) = cx.use_state(|| 0i64);
            setters.borrow_mut().push((name.clone(), set));
            Node::text(format!("{name}={count};"))
        })
    };
    let tree = |names: &[&str]| {
        Element::host("div").children(names.iter().map(|name| {
            Element::component(&item, Props::new().with("name", *name))
                .key(name)
                .into()
        }))
    };

    let mut fx = Fixture::new();
    fx.render(tree(&["a", "b"]));
    let set_b = setters
        .borrow()
        .iter()
        .find(|(name, _)| name == "b")
        .map(|(_, set)| set.clone())
        .expect("b");
    set_b.set(7);
    fx.runtime.run_until_idle();
    assert_eq!(fx.markup(), "<div>a=0;b=7;</div>");

    fx.render(tree(&["b", "a"]));
    assert_eq!(fx.markup(), "<div>b=7;a=0;</div>");
}

#[test]
fn passive_effects_run_destroys_before_creates() {
    let log = new_log();
    let component = logger(&log);
    let mut fx = Fixture::new();

    fx.render(loggers(&component, &["a", "b"]));
    assert_eq!(drain(&log), ["create a", "create b"]);

    fx.render(loggers(&component, &["a"]));
    assert_eq!(drain(&log), ["destroy b", "destroy a", "create a"]);

    fx.render(Node::Empty);
    assert_eq!(drain(&log), ["destroy a"]);
}

#[test]
fn deleting_nested_fragments_unmounts_every_component_once() {
    let log = new_log();
    let component = logger(&log);
    let named = |name: &str| -> Node {
        Element::component(&component, Props::new().with("name", name)).into()
    };
    let tree = |with_group: bool| {
        let mut children: Vec<Node> = Vec::new();
        if with_group {
            children.push(
                Element::fragment([
                    named("a"),
                    Element::fragment([
                        named("b"),
                        Element::fragment([
                            named("c"),
                            Element::host("p").child(named("d")).into(),
                        ])
                        .into(),
                    ])
                    .into(),
                ])
                .key("group")
                .into(),
            );
        }
        children.push(
            Element::component(&component, Props::new().with("name", "keep"))
                .key("keep")
                .into(),
        );
        Element::host("div").children(children)
    };

    let mut fx = Fixture::new();
    fx.render(tree(true));
    assert_eq!(fx.markup(), "<div>abc<p>d</p>keep</div>");
    drain(&log);
    fx.host_mut().clear_log();

    fx.render(tree(false));

    assert_eq!(fx.markup(), "<div>keep</div>");
    // Three text leaves and the <p>; the text inside <p> goes with it.
    assert_eq!(fx.runtime.host().count(HostOp::RemoveChild), 4);
    let log = drain(&log);
    for name in ["a", "b", "c", "d"] {
        let destroy = format!("destroy {name}");
        assert_eq!(
            log.iter().filter(|entry| **entry == destroy).count(),
            1,
            "{destroy} in {log:?}"
        );
        assert!(!log.contains(&format!("create {name}")));
    }
}

#[test]
fn effects_with_unchanged_deps_do_not_rerun() {
    let log = new_log();
    let component = {
        let log = Rc::clone(&log);
        Component::new("Once", move |cx, props| {
            let step = props.get("step").and_then(PropValue::as_int).unwrap_or_default();
            let log = Rc::clone(&log);
            cx.use_effect(
                move || {
                    log.borrow_mut().push("mounted".to_owned());
                    None
                },
                Some(vec![]),
            );
            Node::text(step.to_string())
        })
    };

    let mut fx = Fixture::new();
    for step in 0..3i64 {
        fx.render(Element::component(&component, Props::new().with("step", step)));
    }
    assert_eq!(fx.markup(), "2");
    assert_eq!(drain(&log), ["mounted"]);
}

#[test]
fn effects_rerun_when_deps_change() {
    let log = new_log();
    let component = {
        let log = Rc::clone(&log);
        Component::new("Watch", move |cx, props| {
            let id = props.get("id").cloned().unwrap_or(PropValue::Null);
            let log = Rc::clone(&log);
            let seen = id.clone();
            cx.use_effect(
                move || {
                    log.borrow_mut().push(format!("subscribe {seen:?}"));
                    let cleanup: Cleanup =
                        Box::new(move || log.borrow_mut().push(format!("unsubscribe {seen:?}")));
                    Some(cleanup)
                },
                Some(vec![id]),
            );
            Node::Empty
        })
    };

    let mut fx = Fixture::new();
    fx.render(Element::component(&component, Props::new().with("id", 1i64)));
    fx.render(Element::component(&component, Props::new().with("id", 1i64)));
    fx.render(Element::component(&component, Props::new().with("id", 2i64)));

    let log = drain(&log);
    assert_eq!(log.len(), 3);
    assert!(log[0].starts_with("subscribe"));
    assert!(log[1].starts_with("unsubscribe"));
    assert!(log[2].starts_with("subscribe"));
}

#[test]
fn effect_set_state_schedules_a_follow_up_render() {
    let component = Component::new("Loader", |cx, _| {
        let (loaded, set_loaded) = cx.use_state(|| false);
        cx.use_effect(
            move || {
                set_loaded.set(true);
                None
            },
            Some(vec![]),
        );
        Node::text(if loaded { "ready" } else { "loading" })
    });

    let mut fx = Fixture::new();
    fx.runtime
        .update_root(fx.root, Element::component(&component, Props::new()).into())
        .expect("update");
    fx.runtime.run_slice();
    assert_eq!(fx.markup(), "loading");

    fx.runtime.run_until_idle();
    assert_eq!(fx.markup(), "ready");
}

#[test]
fn a_panicking_effect_is_reported_and_others_still_run() {
    let log = new_log();
    let good = logger(&log);
    let bad = Component::new("Bad", |cx, _| {
        cx.use_effect(|| panic!("boom"), Some(vec![]));
        Node::Empty
    });

    let mut fx = Fixture::new();
    fx.runtime
        .update_root(
            fx.root,
            Element::host("div")
                .children([
                    Element::component(&bad, Props::new()).into(),
                    Element::component(&good, Props::new().with("name", "g")).into(),
                ])
                .into(),
        )
        .expect("update");

    let outcome = catch_unwind(AssertUnwindSafe(|| fx.runtime.run_until_idle()));
    assert!(outcome.is_err());
    assert_eq!(drain(&log), ["create g"]);
    assert!(
        fx.runtime
            .diagnostics()
            .any(|d| *d == Diagnostic::EffectPanicked { message: "boom".into() })
    );

    // The root keeps working.
    fx.render(Element::host("p"));
    assert_eq!(fx.markup(), "<p></p>");
}

#[test]
fn transitions_commit_the_urgent_part_first() {
    let seen: Rc<RefCell<Vec<(bool, i64)>>> = Rc::default();
    let handles: Rc<RefCell<Option<(StartTransition, SetState<i64>)>>> = Rc::default();
    let search = {
        let seen = Rc::clone(&seen);
        let handles = Rc::clone(&handles);
        Component::new("Search", move |cx, _| {
            let (pending, start) = cx.use_transition();
            let (query, set_query) = cx.use_state(|| 0i64);
            seen.borrow_mut().push((pending, query));
            *handles.borrow_mut() = Some((start, set_query));
            Node::text(format!("{pending}:{query}"))
        })
    };

    let mut fx = Fixture::new();
    fx.render(Element::component(&search, Props::new()));

    let (start, set_query) = handles.borrow().clone().expect("handles");
    start.start(|| set_query.set(5));
    fx.runtime.run_until_idle();

    assert_eq!(fx.markup(), "false:5");
    assert_eq!(*seen.borrow(), [(false, 0), (true, 0), (false, 5)]);
}

#[test]
fn context_reads_the_innermost_provider() {
    let theme = Context::new("light");
    let reader = {
        let theme = theme.clone();
        Component::new("Reader", move |cx, _| {
            let value = cx.use_context(&theme);
            Node::text(format!("[{}]", value.as_str().unwrap_or("none")))
        })
    };
    let read = || -> Node { Element::component(&reader, Props::new()).into() };

    let tree = |outer: &str| {
        Element::host("div").children([
            Element::provider(&theme, outer)
                .children([
                    read(),
                    Element::provider(&theme, "blue").child(read()).into(),
                    read(),
                ])
                .into(),
            read(),
        ])
    };

    let mut fx = Fixture::new();
    fx.render(tree("dark"));
    assert_eq!(fx.markup(), "<div>[dark][blue][dark][light]</div>");

    fx.render(tree("dim"));
    assert_eq!(fx.markup(), "<div>[dim][blue][dim][light]</div>");
}

#[test]
fn provider_without_value_reports_and_provides_null() {
    let theme = Context::new("light");
    let reader = {
        let theme = theme.clone();
        Component::new("Reader", move |cx, _| {
            Node::text(cx.use_context(&theme).as_str().unwrap_or("none"))
        })
    };
    let mut fx = Fixture::new();
    fx.render(
        Element::provider_without_value(&theme)
            .child(Element::component(&reader, Props::new())),
    );
    assert_eq!(fx.markup(), "none");
    assert!(
        fx.runtime
            .diagnostics()
            .any(|d| *d == Diagnostic::MissingProviderValue)
    );
}

#[test]
fn refs_follow_the_host_node_lifecycle() {
    let node_ref = NodeRef::new();
    let mut fx = Fixture::new();

    fx.render(Element::host("input").with_ref(&node_ref));
    let input = fx.top_level()[0];
    assert_eq!(node_ref.get::<NodeId>(), Some(input));

    // Same node, ref moved to a different holder.
    let other = NodeRef::new();
    fx.render(Element::host("input").with_ref(&other));
    assert!(!node_ref.is_attached());
    assert_eq!(other.get::<NodeId>(), Some(input));

    fx.render(Node::Empty);
    assert!(!other.is_attached());
}

#[test]
fn changing_hook_order_is_reported() {
    let flip = Rc::new(Cell::new(false));
    let component = {
        let flip = Rc::clone(&flip);
        Component::new("Fickle", move |cx, _| {
            if flip.get() {
                cx.use_effect(|| None, None);
            } else {
                let _ = cx.use_state(|| 1i64);
            }
            Node::Empty
        })
    };

    let mut fx = Fixture::new();
    fx.render(Element::component(&component, Props::new()));
    flip.set(true);
    fx.render(Element::component(&component, Props::new()));

    assert!(fx.runtime.diagnostics().any(|d| matches!(
        d,
        Diagnostic::HookOrderMismatch { component, index: 0 } if component == "Fickle"
    )));
}
