#![forbid(unsafe_code)]

//! Weave Harness
//!
//! Shared test tooling for the Weave crates.
//!
//! # Key Components
//!
//! - [`RecordingHost`] - in-memory host adapter with an operation log,
//!   markup rendering, checksums, and fault injection
//! - [`with_captured_tracing`] - run code under a capturing `tracing`
//!   subscriber and inspect spans and events afterwards
//! - [`Fixture`] - a runtime on a [`ManualClock`] with one mounted root

pub mod capture;
pub mod host;

pub use capture::{CaptureHandle, CaptureLayer, CapturedEvent, CapturedSpan, with_captured_tracing};
pub use host::{HostCall, NodeId, RecordingHost};

use std::time::Duration;
use weave_reconciler::{ManualClock, Node, RootId, Runtime, RuntimeConfig};

/// A runtime over a [`RecordingHost`], one root, and the clock driving it.
pub struct Fixture {
    pub runtime: Runtime<RecordingHost>,
    pub root: RootId,
    pub container: NodeId,
    pub clock: ManualClock,
}

impl Fixture {
    /// Default configuration; time only moves when the test advances it.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    #[must_use]
    pub fn with_config(config: RuntimeConfig) -> Self {
        let clock = ManualClock::new();
        let mut host = RecordingHost::new();
        let container = host.create_container();
        let mut runtime = Runtime::with_clock(host, config, clock.clone());
        let root = runtime.create_root(container);
        Self {
            runtime,
            root,
            container,
            clock,
        }
    }

    /// Like [`Fixture::new`] with a custom frame budget.
    #[must_use]
    pub fn with_frame_budget(budget: Duration) -> Self {
        let mut config = RuntimeConfig::default();
        config.scheduler.frame_budget = budget;
        Self::with_config(config)
    }

    /// Queue `node` on the root and run until idle.
    ///
    /// # Panics
    ///
    /// Panics if the root rejects the update.
    pub fn render(&mut self, node: impl Into<Node>) {
        self.runtime
            .update_root(self.root, node.into())
            .unwrap_or_else(|err| panic!("update_root failed: {err}"));
        self.runtime.run_until_idle();
    }

    /// Markup currently under the container.
    #[must_use]
    pub fn markup(&self) -> String {
        self.runtime.host().render(self.container)
    }

    /// Host children of the container.
    #[must_use]
    pub fn top_level(&self) -> Vec<NodeId> {
        self.runtime.host().children(self.container).to_vec()
    }

    pub fn host_mut(&mut self) -> &mut RecordingHost {
        self.runtime.host_mut()
    }

    pub fn advance(&self, delta: Duration) {
        self.clock.advance(delta);
    }
}

impl Default for Fixture {
    fn default() -> Self {
        Self::new()
    }
}
