#![forbid(unsafe_code)]

//! Diagnostic side channel.
//!
//! Malformed input and broken invariants never abort a render or commit.
//! They are reported here instead: each diagnostic is logged as a `warn!`
//! on target `weave.diagnostic` and kept in a bounded in-memory log.
//!
//! Invariant violations are only reported when
//! [`ReconcilerConfig::report_invariant_violations`] is set; otherwise the
//! offending operation is skipped without a trace.

use crate::config::ReconcilerConfig;
use crate::root::RootId;
use std::collections::VecDeque;
use std::fmt;
use tracing::warn;

/// Something the runtime noticed and worked around.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// A description kind the runtime does not render. Treated as empty.
    UnrecognizedKind { name: String },
    /// A context provider was rendered without a `value` prop.
    MissingProviderValue,
    /// A component called hooks in a different order than last render.
    HookOrderMismatch { component: String, index: usize },
    /// A unit flagged for passive effects carried no effect records.
    MissingEffectRecord { component: String },
    /// No host ancestor was found for a placement or deletion.
    MissingHostParent,
    /// Two siblings share a key; the later one was created fresh.
    DuplicateKey { key: String },
    /// Commit was requested while another commit was running.
    CommitReentered,
    /// A passive effect callback panicked.
    EffectPanicked { message: String },
    /// A queued synchronous render failed.
    SyncCallbackFailed { root: RootId, error: String },
}

impl Diagnostic {
    /// Invariant violations are internal consistency problems rather than
    /// caller mistakes.
    #[must_use]
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            Self::MissingEffectRecord { .. } | Self::MissingHostParent | Self::CommitReentered
        )
    }

    /// Stable name for logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnrecognizedKind { .. } => "unrecognized_kind",
            Self::MissingProviderValue => "missing_provider_value",
            Self::HookOrderMismatch { .. } => "hook_order_mismatch",
            Self::MissingEffectRecord { .. } => "missing_effect_record",
            Self::MissingHostParent => "missing_host_parent",
            Self::DuplicateKey { .. } => "duplicate_key",
            Self::CommitReentered => "commit_reentered",
            Self::EffectPanicked { .. } => "effect_panicked",
            Self::SyncCallbackFailed { .. } => "sync_callback_failed",
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnrecognizedKind { name } => {
                write!(f, "unrecognized element kind '{name}' rendered as empty")
            }
            Self::MissingProviderValue => f.write_str("context provider has no value prop"),
            Self::HookOrderMismatch { component, index } => {
                write!(f, "hook {index} of '{component}' changed between renders")
            }
            Self::MissingEffectRecord { component } => {
                write!(f, "'{component}' flagged for passive effects without records")
            }
            Self::MissingHostParent => f.write_str("no host parent found"),
            Self::DuplicateKey { key } => write!(f, "duplicate sibling key '{key}'"),
            Self::CommitReentered => f.write_str("commit re-entered while committing"),
            Self::EffectPanicked { message } => write!(f, "passive effect panicked: {message}"),
            Self::SyncCallbackFailed { root, error } => {
                write!(f, "sync render of {root:?} failed: {error}")
            }
        }
    }
}

/// Bounded diagnostic log.
#[derive(Debug)]
pub(crate) struct Diagnostics {
    entries: VecDeque<Diagnostic>,
    capacity: usize,
    report_invariants: bool,
    total: u64,
}

impl Diagnostics {
    pub(crate) fn new(config: &ReconcilerConfig) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: config.diagnostics_capacity,
            report_invariants: config.report_invariant_violations,
            total: 0,
        }
    }

    pub(crate) fn emit(&mut self, diagnostic: Diagnostic) {
        if diagnostic.is_invariant_violation() && !self.report_invariants {
            return;
        }
        warn!(
            target: "weave.diagnostic",
            kind = diagnostic.kind(),
            "{diagnostic}"
        );
        self.total += 1;
        if self.capacity == 0 {
            return;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(diagnostic);
    }

    pub(crate) fn entries(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter()
    }

    pub(crate) fn take(&mut self) -> Vec<Diagnostic> {
        self.entries.drain(..).collect()
    }

    pub(crate) fn total(&self) -> u64 {
        self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(capacity: usize, report: bool) -> ReconcilerConfig {
        ReconcilerConfig {
            diagnostics_capacity: capacity,
            report_invariant_violations: report,
        }
    }

    #[test]
    fn oldest_entries_are_evicted() {
        let mut diags = Diagnostics::new(&config(2, true));
        for key in ["a", "b", "c"] {
            diags.emit(Diagnostic::DuplicateKey { key: key.into() });
        }
        let keys: Vec<_> = diags
            .entries()
            .map(|d| match d {
                Diagnostic::DuplicateKey { key } => key.clone(),
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(keys, vec!["b", "c"]);
        assert_eq!(diags.total(), 3);
    }

    #[test]
    fn invariant_violations_respect_config() {
        let mut quiet = Diagnostics::new(&config(8, false));
        quiet.emit(Diagnostic::MissingHostParent);
        quiet.emit(Diagnostic::MissingProviderValue);
        assert_eq!(quiet.take(), vec![Diagnostic::MissingProviderValue]);

        let mut loud = Diagnostics::new(&config(8, true));
        loud.emit(Diagnostic::MissingHostParent);
        assert_eq!(loud.entries().count(), 1);
    }
}
