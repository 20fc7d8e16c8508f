#![forbid(unsafe_code)]

//! Weave Reconciler
//!
//! An incremental UI reconciliation runtime. Applications describe their UI
//! as immutable element trees; the reconciler diffs each new description
//! against the committed one and applies the minimal set of changes to a
//! host tree through a [`HostConfig`] adapter.
//!
//! # Key Components
//!
//! - [`Runtime`] - roots, update entry points, and the slice loop
//! - [`Element`] / [`Node`] - the description language
//! - [`RenderCx`] - hooks for function components: state, effects,
//!   transitions, context
//! - [`Lanes`] - bitset priorities assigned to updates
//! - [`HostConfig`] - the seven host operations the committer calls
//! - [`Diagnostic`] - non-fatal problems noticed and worked around
//!
//! # Role in Weave
//! `weave-reconciler` sits on top of `weave-scheduler`. Every render pass
//! is a scheduler task at the priority of its lane; low-priority passes
//! yield between units of work and are discarded when more urgent work
//! arrives. Commits are never interrupted.
//!
//! # How it fits in the system
//! Two trees are kept per root: `current` (what the host shows) and the
//! work-in-progress tree built from it. A render fills in the second; a
//! commit mutates the host and swaps them. Passive effects run afterwards
//! in their own task.

pub mod config;
pub mod diagnostics;
pub mod element;
pub mod error;
pub mod fiber;
pub mod hooks;
pub mod host;
pub mod inspect;
pub mod lane;
pub mod root;
pub mod runtime;
pub mod update_queue;

mod begin_work;
mod child_fiber;
mod commit;
mod complete_work;
mod context;
mod sync_queue;
mod update_context;
mod work_loop;

pub use config::{ReconcilerConfig, RuntimeConfig};
pub use diagnostics::Diagnostic;
pub use element::{
    Callback, Component, Context, ContextId, Element, ElementKind, Key, Node, NodeRef, PropValue,
    Props,
};
pub use error::{HostError, HostOp, ReconcileError};
pub use fiber::{FiberKind, Flags};
pub use hooks::{Cleanup, RenderCx, SetState, StartTransition};
pub use host::HostConfig;
pub use inspect::{CommitSummary, FlaggedUnit, NodeSnapshot};
pub use lane::{Lane, Lanes, NO_LANE, NO_LANES};
pub use root::RootId;
pub use runtime::Runtime;

pub use weave_scheduler::{ManualClock, Priority, SchedulerConfig, SchedulerStats};
