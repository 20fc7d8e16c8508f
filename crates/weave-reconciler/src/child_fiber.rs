#![forbid(unsafe_code)]

//! Child reconciliation.
//!
//! Diffs a unit's previous children (the committed ones, reached through
//! its alternate) against the next children description and produces the
//! new child list. Only annotates work units: `PLACEMENT` on inserted or
//! moved units, and previous units queued on the parent's `deletions`.
//!
//! When the parent is itself being mounted (`track_effects == false`)
//! nothing is annotated; the parent's subtree is assembled offscreen and
//! placed as a whole.
//!
//! # Keys
//!
//! Previous children are indexed by explicit key, or by position when
//! unkeyed. A previous unit is reused when the next entry at that key has
//! the same element kind. If two previous siblings share a key only the
//! first is indexed; if two next entries share a key only the first may
//! claim a previous unit and the later ones are created fresh, with a
//! [`Diagnostic::DuplicateKey`].
//!
//! # Moves
//!
//! Walking the next list, a reused unit whose previous position is lower
//! than the highest previous position reused so far is marked as a move.

use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::element::{Element, ElementKind, Key, Node, Props};
use crate::fiber::{
    Fiber, FiberArena, FiberId, FiberKind, Flags, PendingProps, create_fiber_from_element,
    create_fiber_from_list, create_fiber_from_text, create_work_in_progress,
};
use ahash::{AHashMap, AHashSet};
use std::rc::Rc;
use tracing::trace;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ChildKey {
    Key(Key),
    Index(usize),
}

pub(crate) struct ChildReconciler<'a, I> {
    pub(crate) arena: &'a mut FiberArena<I>,
    /// Every unit allocated by this render, so a discarded render can free them.
    pub(crate) created: &'a mut Vec<FiberId>,
    pub(crate) diagnostics: &'a mut Diagnostics,
    pub(crate) track_effects: bool,
}

impl<I: Clone> ChildReconciler<'_, I> {
    /// Reconcile `new_child` under `return_fiber`; returns the first child.
    pub(crate) fn reconcile(
        &mut self,
        return_fiber: FiberId,
        current_first_child: Option<FiberId>,
        new_child: &Node,
    ) -> Option<FiberId> {
        let unwrapped;
        let mut node = new_child;
        if let Node::Element(element) = new_child
            && element.kind == ElementKind::Fragment
            && element.key.is_none()
        {
            unwrapped = element.props.children().clone();
            node = &unwrapped;
        }

        match node {
            Node::Element(element) => {
                let fiber = self.reconcile_single_element(return_fiber, current_first_child, element);
                fiber.map(|id| self.place_single_child(id))
            }
            Node::Text(text) => {
                let fiber = self.reconcile_single_text(return_fiber, current_first_child, text);
                fiber.map(|id| self.place_single_child(id))
            }
            Node::List(items) => self.reconcile_children_array(return_fiber, current_first_child, items),
            Node::Empty => {
                self.delete_remaining_children(return_fiber, current_first_child);
                None
            }
        }
    }

    fn insert(&mut self, mut fiber: Fiber<I>, return_fiber: FiberId) -> FiberId {
        fiber.parent = Some(return_fiber);
        let id = self.arena.insert(fiber);
        self.created.push(id);
        id
    }

    /// Clone a previous unit into the work-in-progress tree.
    fn use_fiber(&mut self, current: FiberId, props: PendingProps) -> Option<FiberId> {
        let (wip, created) = create_work_in_progress(self.arena, current, props)?;
        if created {
            self.created.push(wip);
        }
        if let Some(fiber) = self.arena.get_mut(wip) {
            fiber.index = 0;
            fiber.sibling = None;
        }
        Some(wip)
    }

    fn reuse_for_element(
        &mut self,
        current: FiberId,
        element: &Element,
        return_fiber: FiberId,
    ) -> Option<FiberId> {
        let wip = self.use_fiber(current, PendingProps::Props(element.props.clone()))?;
        if let Some(fiber) = self.arena.get_mut(wip) {
            fiber.node_ref = element.node_ref.clone();
            fiber.parent = Some(return_fiber);
        }
        Some(wip)
    }

    fn same_type(&self, id: FiberId, kind: &ElementKind) -> bool {
        self.arena
            .get(id)
            .is_some_and(|fiber| fiber.element_type.as_ref() == Some(kind))
    }

    fn delete_child(&mut self, return_fiber: FiberId, child: FiberId) {
        if !self.track_effects {
            return;
        }
        if let Some(parent) = self.arena.get_mut(return_fiber) {
            parent.deletions.push(child);
            parent.flags |= Flags::CHILD_DELETION;
        }
    }

    fn delete_remaining_children(&mut self, return_fiber: FiberId, first: Option<FiberId>) {
        if !self.track_effects {
            return;
        }
        let mut cursor = first;
        while let Some(child) = cursor {
            cursor = self.arena.get(child).and_then(|fiber| fiber.sibling);
            self.delete_child(return_fiber, child);
        }
    }

    fn place_single_child(&mut self, id: FiberId) -> FiberId {
        if self.track_effects
            && let Some(fiber) = self.arena.get_mut(id)
            && fiber.alternate.is_none()
        {
            fiber.flags |= Flags::PLACEMENT;
        }
        id
    }

    fn reconcile_single_element(
        &mut self,
        return_fiber: FiberId,
        current_first_child: Option<FiberId>,
        element: &Element,
    ) -> Option<FiberId> {
        let mut cursor = current_first_child;
        while let Some(child) = cursor {
            let Some(fiber) = self.arena.get(child) else {
                break;
            };
            let sibling = fiber.sibling;
            if fiber.key != element.key {
                self.delete_child(return_fiber, child);
                cursor = sibling;
                continue;
            }
            if self.same_type(child, &element.kind) {
                let existing = self.reuse_for_element(child, element, return_fiber);
                self.delete_remaining_children(return_fiber, sibling);
                return existing;
            }
            // Same key, different kind: nothing below can match.
            self.delete_remaining_children(return_fiber, Some(child));
            break;
        }
        Some(self.insert(create_fiber_from_element(element), return_fiber))
    }

    fn reconcile_single_text(
        &mut self,
        return_fiber: FiberId,
        current_first_child: Option<FiberId>,
        text: &Rc<str>,
    ) -> Option<FiberId> {
        if let Some(child) = current_first_child
            && self
                .arena
                .get(child)
                .is_some_and(|fiber| fiber.kind == FiberKind::HostText)
        {
            let sibling = self.arena.get(child).and_then(|fiber| fiber.sibling);
            self.delete_remaining_children(return_fiber, sibling);
            let existing = self.use_fiber(child, PendingProps::Text(Rc::clone(text)))?;
            if let Some(fiber) = self.arena.get_mut(existing) {
                fiber.parent = Some(return_fiber);
            }
            return Some(existing);
        }
        self.delete_remaining_children(return_fiber, current_first_child);
        Some(self.insert(create_fiber_from_text(text), return_fiber))
    }

    fn reconcile_children_array(
        &mut self,
        return_fiber: FiberId,
        current_first_child: Option<FiberId>,
        items: &[Node],
    ) -> Option<FiberId> {
        let mut existing: AHashMap<ChildKey, FiberId> = AHashMap::default();
        let mut shadowed = Vec::new();
        let mut cursor = current_first_child;
        while let Some(id) = cursor {
            let Some(fiber) = self.arena.get(id) else {
                break;
            };
            let key = match &fiber.key {
                Some(key) => ChildKey::Key(Rc::clone(key)),
                None => ChildKey::Index(fiber.index),
            };
            cursor = fiber.sibling;
            if existing.contains_key(&key) {
                shadowed.push(id);
            } else {
                existing.insert(key, id);
            }
        }

        let mut claimed: AHashSet<Key> = AHashSet::default();
        let mut last_placed_index = 0;
        let mut first: Option<FiberId> = None;
        let mut last: Option<FiberId> = None;

        for (index, item) in items.iter().enumerate() {
            let Some(new_fiber) =
                self.update_from_map(return_fiber, &mut existing, &mut claimed, index, item)
            else {
                continue;
            };

            let alternate = match self.arena.get_mut(new_fiber) {
                Some(fiber) => {
                    fiber.index = index;
                    fiber.parent = Some(return_fiber);
                    fiber.alternate
                }
                None => continue,
            };
            match last {
                Some(prev) => {
                    if let Some(prev) = self.arena.get_mut(prev) {
                        prev.sibling = Some(new_fiber);
                    }
                }
                None => first = Some(new_fiber),
            }
            last = Some(new_fiber);

            if !self.track_effects {
                continue;
            }
            let old_index = alternate.and_then(|cur| self.arena.get(cur)).map(|cur| cur.index);
            match old_index {
                Some(old_index) if old_index >= last_placed_index => {
                    last_placed_index = old_index;
                }
                _ => {
                    if let Some(fiber) = self.arena.get_mut(new_fiber) {
                        fiber.flags |= Flags::PLACEMENT;
                    }
                }
            }
        }

        if self.track_effects {
            let mut leftovers: Vec<FiberId> = existing.into_values().chain(shadowed).collect();
            leftovers.sort_by_key(|id| self.arena.get(*id).map_or(usize::MAX, |fiber| fiber.index));
            for child in leftovers {
                self.delete_child(return_fiber, child);
            }
        }

        trace!(
            target: "weave.reconcile",
            items = items.len(),
            "child list reconciled"
        );
        first
    }

    fn update_from_map(
        &mut self,
        return_fiber: FiberId,
        existing: &mut AHashMap<ChildKey, FiberId>,
        claimed: &mut AHashSet<Key>,
        index: usize,
        item: &Node,
    ) -> Option<FiberId> {
        match item {
            Node::Empty => None,
            Node::Text(text) => {
                let key = ChildKey::Index(index);
                if let Some(&before) = existing.get(&key)
                    && self
                        .arena
                        .get(before)
                        .is_some_and(|fiber| fiber.kind == FiberKind::HostText)
                {
                    existing.remove(&key);
                    return self.use_fiber(before, PendingProps::Text(Rc::clone(text)));
                }
                Some(self.insert(create_fiber_from_text(text), return_fiber))
            }
            Node::Element(element) => {
                let key = match &element.key {
                    Some(key) if !claimed.insert(Rc::clone(key)) => {
                        self.diagnostics.emit(Diagnostic::DuplicateKey {
                            key: key.to_string(),
                        });
                        return Some(self.insert(create_fiber_from_element(element), return_fiber));
                    }
                    Some(key) => ChildKey::Key(Rc::clone(key)),
                    None => ChildKey::Index(index),
                };
                if let Some(&before) = existing.get(&key)
                    && self.same_type(before, &element.kind)
                {
                    existing.remove(&key);
                    return self.reuse_for_element(before, element, return_fiber);
                }
                Some(self.insert(create_fiber_from_element(element), return_fiber))
            }
            Node::List(items) => {
                let key = ChildKey::Index(index);
                if let Some(&before) = existing.get(&key)
                    && self.same_type(before, &ElementKind::Fragment)
                {
                    existing.remove(&key);
                    let props = Props::new().with_children(Node::List(Rc::clone(items)));
                    return self.use_fiber(before, PendingProps::Props(props));
                }
                Some(self.insert(create_fiber_from_list(items, None), return_fiber))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReconcilerConfig;

    struct Fixture {
        arena: FiberArena<u32>,
        created: Vec<FiberId>,
        diagnostics: Diagnostics,
        parent: FiberId,
    }

    impl Fixture {
        fn new() -> Self {
            let mut arena = FiberArena::with_key();
            let parent = arena.insert(Fiber::new(
                FiberKind::HostElement,
                PendingProps::default(),
                None,
            ));
            Self {
                arena,
                created: Vec::new(),
                diagnostics: Diagnostics::new(&ReconcilerConfig::default()),
                parent,
            }
        }

        fn run(&mut self, current: Option<FiberId>, node: &Node, track: bool) -> Option<FiberId> {
            if let Some(p) = self.arena.get_mut(self.parent) {
                p.flags = Flags::empty();
                p.deletions.clear();
            }
            let mut rec = ChildReconciler {
                arena: &mut self.arena,
                created: &mut self.created,
                diagnostics: &mut self.diagnostics,
                track_effects: track,
            };
            rec.reconcile(self.parent, current, node)
        }

        fn children(&self, first: Option<FiberId>) -> Vec<FiberId> {
            let mut out = Vec::new();
            let mut cursor = first;
            while let Some(id) = cursor {
                out.push(id);
                cursor = self.arena[id].sibling;
            }
            out
        }

        /// Pretend the list was committed: memoize props so the next pass
        /// sees these units as current.
        fn commit(&mut self, first: Option<FiberId>) {
            for id in self.children(first) {
                let fiber = &mut self.arena[id];
                fiber.memoized_props = Some(fiber.pending_props.clone());
                fiber.flags = Flags::empty();
            }
        }
    }

    fn keyed(keys: &[&str]) -> Node {
        Node::list(
            keys.iter()
                .map(|k| Element::host("li").key(*k).child(*k).into()),
        )
    }

    fn key_of(fx: &Fixture, id: FiberId) -> String {
        fx.arena[id].key.as_deref().unwrap_or("").to_owned()
    }

    #[test]
    fn mount_without_tracking_marks_nothing() {
        let mut fx = Fixture::new();
        let first = fx.run(None, &keyed(&["a", "b"]), false);
        let kids = fx.children(first);
        assert_eq!(kids.len(), 2);
        assert!(kids.iter().all(|id| fx.arena[*id].flags.is_empty()));
    }

    #[test]
    fn reversal_moves_all_but_the_anchor() {
        let mut fx = Fixture::new();
        let first = fx.run(None, &keyed(&["a", "b", "c"]), true);
        fx.commit(first);
        let before = fx.children(first);

        let next = fx.run(first, &keyed(&["c", "b", "a"]), true);
        let after = fx.children(next);
        let placed: Vec<_> = after
            .iter()
            .filter(|id| fx.arena[**id].flags.contains(Flags::PLACEMENT))
            .map(|id| key_of(&fx, *id))
            .collect();
        assert_eq!(placed, vec!["b", "a"]);
        for id in &after {
            let alt = fx.arena[*id].alternate.unwrap();
            assert!(before.contains(&alt));
        }
        assert!(fx.arena[fx.parent].deletions.is_empty());
    }

    #[test]
    fn removed_keys_are_deleted_in_previous_order() {
        let mut fx = Fixture::new();
        let first = fx.run(None, &keyed(&["a", "b", "c", "d"]), true);
        fx.commit(first);
        let before = fx.children(first);

        fx.run(first, &keyed(&["b"]), true);
        let parent = &fx.arena[fx.parent];
        assert!(parent.flags.contains(Flags::CHILD_DELETION));
        assert_eq!(parent.deletions.to_vec(), vec![before[0], before[2], before[3]]);
    }

    #[test]
    fn kind_change_replaces_unit() {
        let mut fx = Fixture::new();
        let first = fx.run(None, &Element::host("p").into(), true);
        fx.commit(first);
        let next = fx.run(first, &Element::host("span").into(), true);
        assert_ne!(next, first);
        assert!(fx.arena[next.unwrap()].flags.contains(Flags::PLACEMENT));
        assert_eq!(fx.arena[fx.parent].deletions.to_vec(), vec![first.unwrap()]);
    }

    #[test]
    fn duplicate_next_keys_create_fresh_units() {
        let mut fx = Fixture::new();
        let first = fx.run(None, &keyed(&["a"]), true);
        fx.commit(first);
        let next = fx.run(first, &keyed(&["a", "a"]), true);
        let kids = fx.children(next);
        assert_eq!(kids.len(), 2);
        assert!(fx.arena[kids[0]].alternate.is_some());
        assert!(fx.arena[kids[1]].alternate.is_none());
        assert!(fx.arena[kids[1]].flags.contains(Flags::PLACEMENT));
        assert!(matches!(
            fx.diagnostics.take().as_slice(),
            [Diagnostic::DuplicateKey { key }] if key == "a"
        ));
    }

    #[test]
    fn unkeyed_sole_fragment_is_unwrapped() {
        let mut fx = Fixture::new();
        let frag = Element::fragment([Node::text("x"), Node::text("y")]);
        let first = fx.run(None, &frag.into(), true);
        let kids = fx.children(first);
        assert_eq!(kids.len(), 2);
        assert!(kids.iter().all(|id| fx.arena[*id].kind == FiberKind::HostText));
    }

    #[test]
    fn nested_list_becomes_fragment_unit() {
        let mut fx = Fixture::new();
        let node = Node::list([Node::text("a"), Node::list([Node::text("b")])]);
        let first = fx.run(None, &node, true);
        let kids = fx.children(first);
        assert_eq!(fx.arena[kids[1]].kind, FiberKind::Fragment);
    }
}
