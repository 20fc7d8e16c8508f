#![forbid(unsafe_code)]

//! Lane model: update priority as a bitmask.
//!
//! A *lane* is a single bit naming a priority class; a set of lanes is the
//! union of those bits. Lower bits are higher priority, so picking the
//! most urgent pending work is "lowest set bit". Lanes are priority classes,
//! not identities: two updates in the same lane are indistinguishable here.
//!
//! Each lane maps one-to-one onto a scheduler [`Priority`].

use bitflags::bitflags;
use weave_scheduler::Priority;

bitflags! {
    /// A set of lanes. A value with exactly one bit set is a single lane.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Lanes: u32 {
        /// Discrete, must-finish-now updates.
        const SYNC = 1 << 0;
        /// Continuous input (drag, scroll).
        const INPUT_CONTINUOUS = 1 << 1;
        /// Ordinary updates outside any event.
        const DEFAULT = 1 << 2;
        /// Updates made inside a transition scope.
        const TRANSITION = 1 << 3;
        /// Offscreen / speculative work.
        const IDLE = 1 << 4;
    }
}

/// A single lane (or [`NO_LANE`]).
pub type Lane = Lanes;

/// The empty lane.
pub const NO_LANE: Lane = Lanes::empty();

/// The empty lane set.
pub const NO_LANES: Lanes = Lanes::empty();

/// Lane for an update requested at `priority`.
#[must_use]
pub fn request_lane(priority: Priority) -> Lane {
    match priority {
        Priority::Immediate => Lanes::SYNC,
        Priority::UserBlocking => Lanes::INPUT_CONTINUOUS,
        Priority::Normal => Lanes::DEFAULT,
        Priority::Low => Lanes::TRANSITION,
        Priority::Idle => Lanes::IDLE,
    }
}

/// Set union.
#[must_use]
pub fn merge_lanes(lanes: Lanes, lane: Lane) -> Lanes {
    lanes | lane
}

/// The most urgent lane in `lanes`, or [`NO_LANE`].
#[must_use]
pub fn pick_highest_priority_lane(lanes: Lanes) -> Lane {
    let bits = lanes.bits();
    Lanes::from_bits_retain(bits & bits.wrapping_neg())
}

/// True if every lane in `subset` is contained in `set`.
///
/// The empty subset is contained in every set, which is how already-applied
/// updates (re-tagged [`NO_LANE`]) stay admissible in every later pass.
#[must_use]
pub fn is_subset_of_lanes(set: Lanes, subset: Lanes) -> bool {
    set.contains(subset)
}

/// Remove `lane` from `lanes`.
#[must_use]
pub fn remove_lanes(lanes: Lanes, lane: Lane) -> Lanes {
    lanes - lane
}

/// Scheduler priority for a lane. `NO_LANE` maps to idle.
#[must_use]
pub fn lane_to_priority(lane: Lane) -> Priority {
    let lane = pick_highest_priority_lane(lane);
    if lane == Lanes::SYNC {
        Priority::Immediate
    } else if lane == Lanes::INPUT_CONTINUOUS {
        Priority::UserBlocking
    } else if lane == Lanes::DEFAULT {
        Priority::Normal
    } else if lane == Lanes::TRANSITION {
        Priority::Low
    } else {
        Priority::Idle
    }
}

/// Stable name for logs.
#[must_use]
pub fn lane_name(lane: Lane) -> &'static str {
    let lane = pick_highest_priority_lane(lane);
    if lane == Lanes::SYNC {
        "sync"
    } else if lane == Lanes::INPUT_CONTINUOUS {
        "input_continuous"
    } else if lane == Lanes::DEFAULT {
        "default"
    } else if lane == Lanes::TRANSITION {
        "transition"
    } else if lane == Lanes::IDLE {
        "idle"
    } else {
        "none"
    }
}
