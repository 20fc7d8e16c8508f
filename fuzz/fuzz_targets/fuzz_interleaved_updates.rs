#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use std::time::Duration;
use weave_harness::Fixture;
use weave_reconciler::{Component, Element, Node, Priority, Props};

#[derive(Debug, Arbitrary)]
enum Step {
    Update { priority: u8, size: u8 },
    Slice,
    Advance(u16),
}

fn priority(raw: u8) -> Priority {
    match raw % 4 {
        0 => Priority::Immediate,
        1 => Priority::UserBlocking,
        2 => Priority::Normal,
        _ => Priority::Low,
    }
}

fuzz_target!(|steps: Vec<Step>| {
    let mut fx = Fixture::with_frame_budget(Duration::from_millis(1));
    let clock = fx.clock.clone();
    let row = Component::new("Row", move |_, props| {
        clock.advance(Duration::from_micros(300));
        let i = props.get("i").and_then(|v| v.as_int()).unwrap_or_default();
        Element::host("li").key(i.to_string()).child(i.to_string()).into()
    });

    let mut last_size = None;
    for step in steps.iter().take(64) {
        match step {
            Step::Update { priority: p, size } => {
                let size = i64::from(size % 12);
                let tree: Node = Element::host("ul")
                    .children((0..size).map(|i| -> Node {
                        Element::component(&row, Props::new().with("i", i)).key(i.to_string()).into()
                    }))
                    .into();
                fx.runtime
                    .with_priority(priority(*p), |rt| rt.update_root(fx.root, tree))
                    .expect("root is never poisoned");
                last_size = Some(size);
            }
            Step::Slice => {
                fx.runtime.run_slice();
            }
            Step::Advance(ms) => fx.advance(Duration::from_millis(u64::from(*ms))),
        }
    }

    fx.runtime.run_until_idle();
    assert!(fx.runtime.is_idle());
    assert!(fx.runtime.pending_lanes(fx.root).is_empty());
    if let Some(size) = last_size {
        let expected: String = (0..size).map(|i| format!("<li>{i}</li>")).collect();
        assert_eq!(fx.markup(), format!("<ul>{expected}</ul>"));
    }
    assert!(fx.runtime.diagnostics().all(|d| !d.is_invariant_violation()));
});
