#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use weave_harness::Fixture;
use weave_reconciler::{Element, Node};

#[derive(Debug, Arbitrary)]
enum Item {
    Keyed(u8),
    Unkeyed(u8),
    Text(u8),
    Group(u8, Vec<u8>),
}

fn item_node(item: &Item) -> Node {
    match item {
        Item::Keyed(k) => Element::host("li").key(format!("k{}", k % 16)).child(format!("k{k}")).into(),
        Item::Unkeyed(v) => Element::host(if v % 2 == 0 { "li" } else { "p" }).child(v.to_string()).into(),
        Item::Text(v) => Node::text(format!("t{v}")),
        Item::Group(k, inner) => Element::fragment(
            inner
                .iter()
                .take(4)
                .map(|v| Element::host("b").child(v.to_string()).into()),
        )
        .key(format!("g{}", k % 8))
        .into(),
    }
}

fn expected_markup(item: &Item) -> String {
    match item {
        Item::Keyed(k) => format!("<li>k{k}</li>"),
        Item::Unkeyed(v) => {
            let tag = if v % 2 == 0 { "li" } else { "p" };
            format!("<{tag}>{v}</{tag}>")
        }
        Item::Text(v) => format!("t{v}"),
        Item::Group(_, inner) => inner.iter().take(4).map(|v| format!("<b>{v}</b>")).collect(),
    }
}

fuzz_target!(|rounds: Vec<Vec<Item>>| {
    let mut fx = Fixture::new();
    for items in rounds.iter().take(8) {
        let items = &items[..items.len().min(24)];
        fx.render(Element::host("ul").children(items.iter().map(item_node)));

        // Adjacent text children are rendered as separate host nodes, so
        // the markup is the plain concatenation.
        let expected: String = items.iter().map(expected_markup).collect();
        assert_eq!(fx.markup(), format!("<ul>{expected}</ul>"));
        assert!(fx.runtime.root_error(fx.root).is_none());
        assert!(fx.runtime.diagnostics().all(|d| !d.is_invariant_violation()));
    }
    fx.render(Node::Empty);
    assert!(fx.runtime.host().children(fx.container).is_empty());
    assert!(fx.runtime.arena_len(fx.root) <= 2, "units leaked");
});
