#![forbid(unsafe_code)]

//! Reconciler and runtime configuration.

use weave_scheduler::SchedulerConfig;

/// Configuration for the reconciler.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Maximum diagnostics retained in memory. Oldest are evicted first.
    /// Default: 256.
    pub diagnostics_capacity: usize,

    /// Report invariant violations (missing host parent, missing effect
    /// record). When off they are skipped silently.
    /// Default: on in debug builds.
    pub report_invariant_violations: bool,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            diagnostics_capacity: 256,
            report_invariant_violations: cfg!(debug_assertions),
        }
    }
}

impl ReconcilerConfig {
    /// Create from environment variables.
    ///
    /// `WEAVE_DIAGNOSTICS` forces invariant reporting on (`1`, `true`, `yes`)
    /// or off (`0`, `false`, `no`).
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(value) = std::env::var("WEAVE_DIAGNOSTICS")
            && let Some(flag) = parse_flag(&value)
        {
            config.report_invariant_violations = flag;
        }
        config
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}

/// Configuration for a [`Runtime`](crate::Runtime).
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfig {
    pub scheduler: SchedulerConfig,
    pub reconciler: ReconcilerConfig,
}

impl RuntimeConfig {
    /// Both halves from the environment.
    pub fn from_env() -> Self {
        Self {
            scheduler: SchedulerConfig::from_env(),
            reconciler: ReconcilerConfig::from_env(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_parsing() {
        assert_eq!(parse_flag(" YES "), Some(true));
        assert_eq!(parse_flag("0"), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }
}
