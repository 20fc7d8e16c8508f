#![forbid(unsafe_code)]

//! Work units and their arena.
//!
//! Every root owns one [`FiberArena`]. Tree links (`parent`, `child`,
//! `sibling`) and the `alternate` pairing are plain [`FiberId`]s into that
//! arena; nothing is reference counted. A removed unit's id goes stale and
//! resolves to `None`, so a dangling `alternate` left by a discarded render
//! simply reads as "no alternate".
//!
//! At most two trees are live per root: the committed tree reachable from
//! the root's `current`, and the work-in-progress tree built from it.

use crate::element::{Element, ElementKind, Key, Node, NodeRef, Props};
use crate::hooks::{EffectRecord, Hook};
use crate::update_queue::UpdateQueue;
use bitflags::bitflags;
use slotmap::{SlotMap, new_key_type};
use smallvec::SmallVec;
use std::rc::Rc;

new_key_type! {
    /// Handle to a work unit in its root's arena.
    pub struct FiberId;
}

/// Arena owning every work unit of one root.
pub type FiberArena<I> = SlotMap<FiberId, Fiber<I>>;

bitflags! {
    /// Pending effect markers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Flags: u8 {
        /// Insert (or move) the unit's host nodes.
        const PLACEMENT = 1 << 0;
        /// Host attributes or text changed.
        const UPDATE = 1 << 1;
        /// `deletions` holds children to remove.
        const CHILD_DELETION = 1 << 2;
        /// Passive effects need to run.
        const PASSIVE = 1 << 3;
        /// The node ref changed.
        const REF = 1 << 4;
    }
}

impl Flags {
    /// Flags handled by the mutation pass.
    pub const MUTATION_MASK: Flags = Flags::PLACEMENT
        .union(Flags::UPDATE)
        .union(Flags::CHILD_DELETION)
        .union(Flags::REF);
    /// Flags handled after the tree is promoted.
    pub const LAYOUT_MASK: Flags = Flags::REF;
    /// Flags that require a passive-effect flush.
    pub const PASSIVE_MASK: Flags = Flags::PASSIVE.union(Flags::CHILD_DELETION);
}

/// Work-unit variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FiberKind {
    Root,
    HostElement,
    HostText,
    Function,
    Fragment,
    Provider,
    /// A description kind the runtime does not render.
    Foreign,
}

impl FiberKind {
    /// Root, element and text units own (or stand for) a host node.
    #[must_use]
    pub fn is_host(self) -> bool {
        matches!(self, Self::Root | Self::HostElement | Self::HostText)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Root => "root",
            Self::HostElement => "host_element",
            Self::HostText => "host_text",
            Self::Function => "function",
            Self::Fragment => "fragment",
            Self::Provider => "provider",
            Self::Foreign => "foreign",
        }
    }
}

/// Input a unit renders with.
#[derive(Debug, Clone, PartialEq)]
pub enum PendingProps {
    Props(Props),
    Text(Rc<str>),
}

impl Default for PendingProps {
    fn default() -> Self {
        Self::Props(Props::default())
    }
}

impl PendingProps {
    /// Children description; text units have none.
    pub(crate) fn children(&self) -> Node {
        match self {
            Self::Props(props) => props.children().clone(),
            Self::Text(_) => Node::Empty,
        }
    }

    pub(crate) fn props(&self) -> Option<&Props> {
        match self {
            Self::Props(props) => Some(props),
            Self::Text(_) => None,
        }
    }

    pub(crate) fn text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Props(_) => None,
        }
    }
}

/// Per-kind committed state.
#[derive(Clone, Default)]
pub(crate) enum MemoizedState {
    #[default]
    None,
    /// The description last rendered into a root.
    Root(Node),
    /// Hook slots of a component.
    Hooks(Vec<Hook>),
}

/// Per-kind queue.
#[derive(Clone, Default)]
pub(crate) enum FiberQueue {
    #[default]
    None,
    /// Root description updates.
    Root(UpdateQueue<Node>),
    /// Effect records produced by a component's latest render.
    Effects(Rc<[Rc<EffectRecord>]>),
}

impl FiberQueue {
    pub(crate) fn effects(&self) -> Option<&Rc<[Rc<EffectRecord>]>> {
        match self {
            Self::Effects(list) => Some(list),
            _ => None,
        }
    }
}

/// One work unit.
#[derive(Clone)]
pub struct Fiber<I> {
    pub kind: FiberKind,
    /// Description kind this unit was created from (`None` for root and text).
    pub element_type: Option<ElementKind>,
    pub key: Option<Key>,
    pub node_ref: Option<NodeRef>,
    pub pending_props: PendingProps,
    pub memoized_props: Option<PendingProps>,
    pub(crate) memoized_state: MemoizedState,
    pub(crate) update_queue: FiberQueue,
    /// Shared with the alternate.
    pub host_instance: Option<I>,

    pub parent: Option<FiberId>,
    pub child: Option<FiberId>,
    pub sibling: Option<FiberId>,
    pub index: usize,
    pub alternate: Option<FiberId>,

    pub flags: Flags,
    pub subtree_flags: Flags,
    pub deletions: SmallVec<[FiberId; 2]>,
}

impl<I> Fiber<I> {
    pub fn new(kind: FiberKind, pending_props: PendingProps, key: Option<Key>) -> Self {
        Self {
            kind,
            element_type: None,
            key,
            node_ref: None,
            pending_props,
            memoized_props: None,
            memoized_state: MemoizedState::None,
            update_queue: FiberQueue::None,
            host_instance: None,
            parent: None,
            child: None,
            sibling: None,
            index: 0,
            alternate: None,
            flags: Flags::empty(),
            subtree_flags: Flags::empty(),
            deletions: SmallVec::new(),
        }
    }

    /// Display name: host tag, component name, or kind.
    pub fn name(&self) -> &str {
        match &self.element_type {
            Some(ElementKind::Host(tag)) => tag,
            Some(ElementKind::Component(c)) => c.name(),
            Some(ElementKind::Foreign(name)) => name,
            _ => self.kind.as_str(),
        }
    }
}

impl<I: std::fmt::Debug> std::fmt::Debug for Fiber<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fiber")
            .field("kind", &self.kind)
            .field("name", &self.name())
            .field("key", &self.key)
            .field("host_instance", &self.host_instance)
            .field("flags", &self.flags)
            .field("subtree_flags", &self.subtree_flags)
            .finish_non_exhaustive()
    }
}

/// The live alternate of `id`, if any.
pub(crate) fn live_alternate<I>(arena: &FiberArena<I>, id: FiberId) -> Option<FiberId> {
    arena
        .get(id)
        .and_then(|fiber| fiber.alternate)
        .filter(|alt| arena.contains_key(*alt))
}

/// Clone `current` into its work-in-progress alternate.
///
/// Reuses the existing alternate when one is live (resetting its effect
/// state), otherwise allocates a new unit. Props and state are copied
/// forward; `flags`, `subtree_flags` and `deletions` start empty. Returns
/// the alternate and whether it was newly allocated.
pub(crate) fn create_work_in_progress<I: Clone>(
    arena: &mut FiberArena<I>,
    current: FiberId,
    pending_props: PendingProps,
) -> Option<(FiberId, bool)> {
    let existing = live_alternate(arena, current);
    let source = arena.get(current)?;

    let snapshot = Fiber {
        kind: source.kind,
        element_type: source.element_type.clone(),
        key: source.key.clone(),
        node_ref: source.node_ref.clone(),
        pending_props,
        memoized_props: source.memoized_props.clone(),
        memoized_state: source.memoized_state.clone(),
        update_queue: source.update_queue.clone(),
        host_instance: source.host_instance.clone(),
        parent: None,
        child: source.child,
        sibling: None,
        index: source.index,
        alternate: Some(current),
        flags: Flags::empty(),
        subtree_flags: Flags::empty(),
        deletions: SmallVec::new(),
    };

    let (wip, created) = match existing {
        Some(wip) => {
            // Parent and sibling links are re-established by the caller.
            *arena.get_mut(wip)? = snapshot;
            (wip, false)
        }
        None => (arena.insert(snapshot), true),
    };
    if let Some(fiber) = arena.get_mut(current) {
        fiber.alternate = Some(wip);
    }
    Some((wip, created))
}

/// A fresh unit for an element description.
pub(crate) fn create_fiber_from_element<I>(element: &Element) -> Fiber<I> {
    let kind = match &element.kind {
        ElementKind::Host(_) => FiberKind::HostElement,
        ElementKind::Component(_) => FiberKind::Function,
        ElementKind::Fragment => FiberKind::Fragment,
        ElementKind::Provider(_) => FiberKind::Provider,
        ElementKind::Foreign(_) => FiberKind::Foreign,
    };
    let mut fiber = Fiber::new(
        kind,
        PendingProps::Props(element.props.clone()),
        element.key.clone(),
    );
    fiber.element_type = Some(element.kind.clone());
    fiber.node_ref = element.node_ref.clone();
    fiber
}

/// A fresh unit for a text leaf.
pub(crate) fn create_fiber_from_text<I>(text: &Rc<str>) -> Fiber<I> {
    Fiber::new(FiberKind::HostText, PendingProps::Text(Rc::clone(text)), None)
}

/// A fresh fragment unit for a nested child list.
pub(crate) fn create_fiber_from_list<I>(items: &Rc<[Node]>, key: Option<Key>) -> Fiber<I> {
    let props = Props::new().with_children(Node::List(Rc::clone(items)));
    let mut fiber = Fiber::new(FiberKind::Fragment, PendingProps::Props(props), key);
    fiber.element_type = Some(ElementKind::Fragment);
    fiber
}
