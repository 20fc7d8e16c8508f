#![forbid(unsafe_code)]

//! Checksums depend on the host tree, not on how it was reached.

use proptest::prelude::*;
use weave_harness::Fixture;
use weave_reconciler::Element;

fn list(keys: &[u8]) -> Element {
    Element::host("ol").children(keys.iter().map(|k| {
        Element::host("li")
            .key(k.to_string())
            .attr("data-k", i64::from(*k))
            .child(format!("item {k}"))
            .into()
    }))
}

fn keys() -> impl Strategy<Value = Vec<u8>> {
    proptest::sample::subsequence((0u8..12).collect::<Vec<_>>(), 0..=12).prop_shuffle()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn checksum_ignores_intermediate_trees(detour in keys(), target in keys()) {
        let mut direct = Fixture::new();
        direct.render(list(&target));

        let mut indirect = Fixture::new();
        indirect.render(list(&detour));
        indirect.render(list(&target));

        prop_assert_eq!(direct.markup(), indirect.markup());
        prop_assert_eq!(
            direct.runtime.host().checksum(direct.container),
            indirect.runtime.host().checksum(indirect.container)
        );
    }

    #[test]
    fn distinct_orders_have_distinct_checksums(target in keys()) {
        prop_assume!(target.len() > 1);
        let mut reversed = target.clone();
        reversed.reverse();

        let mut a = Fixture::new();
        let mut b = Fixture::new();
        a.render(list(&target));
        b.render(list(&reversed));

        prop_assert_ne!(
            a.runtime.host().checksum(a.container),
            b.runtime.host().checksum(b.container)
        );
    }
}
