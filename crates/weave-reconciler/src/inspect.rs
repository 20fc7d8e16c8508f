#![forbid(unsafe_code)]

//! Read-only views of a root for tests and debugging.

use crate::fiber::{FiberArena, FiberId, FiberKind, Flags};
use crate::lane::{Lane, NO_LANE};
use web_time::Duration;

/// A unit that carried effect flags into a commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlaggedUnit {
    pub kind: FiberKind,
    pub name: String,
    pub key: Option<String>,
    pub flags: Flags,
}

/// What one commit applied.
#[derive(Debug, Clone, PartialEq)]
pub struct CommitSummary {
    pub lane: Lane,
    /// Flags aggregated over the whole finished tree.
    pub subtree_flags: Flags,
    /// Flagged units in tree order.
    pub flagged: Vec<FlaggedUnit>,
    /// Units queued for deletion.
    pub deletions: usize,
    pub duration: Duration,
}

impl Default for CommitSummary {
    fn default() -> Self {
        Self {
            lane: NO_LANE,
            subtree_flags: Flags::empty(),
            flagged: Vec::new(),
            deletions: 0,
            duration: Duration::ZERO,
        }
    }
}

impl CommitSummary {
    /// True when the render produced no effects at all.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.flagged.is_empty() && self.subtree_flags.is_empty()
    }

    /// Keys (or names, when unkeyed) of units carrying `flag`.
    #[must_use]
    pub fn with_flag(&self, flag: Flags) -> Vec<String> {
        self.flagged
            .iter()
            .filter(|unit| unit.flags.contains(flag))
            .map(|unit| unit.key.clone().unwrap_or_else(|| unit.name.clone()))
            .collect()
    }

    pub(crate) fn capture<I>(arena: &FiberArena<I>, root: FiberId, lane: Lane) -> Self {
        let mut summary = Self {
            lane,
            subtree_flags: arena
                .get(root)
                .map_or(Flags::empty(), |fiber| fiber.subtree_flags | fiber.flags),
            ..Self::default()
        };
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let Some(fiber) = arena.get(id) else {
                continue;
            };
            if !fiber.flags.is_empty() {
                summary.flagged.push(FlaggedUnit {
                    kind: fiber.kind,
                    name: fiber.name().to_owned(),
                    key: fiber.key.as_deref().map(str::to_owned),
                    flags: fiber.flags,
                });
            }
            summary.deletions += fiber.deletions.len();
            if fiber.subtree_flags.is_empty() {
                continue;
            }
            // Push children in reverse so they pop in order.
            let mut children = Vec::new();
            let mut cursor = fiber.child;
            while let Some(child) = cursor {
                children.push(child);
                cursor = arena.get(child).and_then(|c| c.sibling);
            }
            stack.extend(children.into_iter().rev());
        }
        summary
    }
}

/// A committed unit and its children.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeSnapshot<I> {
    pub kind: FiberKind,
    pub name: String,
    pub key: Option<String>,
    pub host_instance: Option<I>,
    /// Effect flags still set on the committed unit.
    pub flags: Flags,
    pub subtree_flags: Flags,
    pub children: Vec<NodeSnapshot<I>>,
}

impl<I: Clone> NodeSnapshot<I> {
    pub(crate) fn capture(arena: &FiberArena<I>, id: FiberId) -> Option<Self> {
        let fiber = arena.get(id)?;
        let mut children = Vec::new();
        let mut cursor = fiber.child;
        while let Some(child) = cursor {
            if let Some(snapshot) = Self::capture(arena, child) {
                children.push(snapshot);
            }
            cursor = arena.get(child).and_then(|c| c.sibling);
        }
        Some(Self {
            kind: fiber.kind,
            name: fiber.name().to_owned(),
            key: fiber.key.as_deref().map(str::to_owned),
            host_instance: fiber.host_instance.clone(),
            flags: fiber.flags,
            subtree_flags: fiber.subtree_flags,
            children,
        })
    }

    /// Depth-first search for a unit by key.
    #[must_use]
    pub fn find_key(&self, key: &str) -> Option<&Self> {
        if self.key.as_deref() == Some(key) {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find_key(key))
    }

    /// Units in this subtree, depth first, that still carry any flag.
    #[must_use]
    pub fn flagged(&self) -> Vec<&Self> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            if !node.flags.is_empty() || !node.subtree_flags.is_empty() {
                out.push(node);
            }
            stack.extend(node.children.iter().rev());
        }
        out
    }

    /// Number of units in this subtree.
    #[must_use]
    pub fn unit_count(&self) -> usize {
        1 + self.children.iter().map(Self::unit_count).sum::<usize>()
    }
}
