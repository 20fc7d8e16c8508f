#![forbid(unsafe_code)]

//! Scheduler configuration.

use crate::scheduler::Priority;
use web_time::Duration;

/// Default slice length before [`Scheduler::should_yield`](crate::Scheduler::should_yield)
/// reports exhaustion.
const DEFAULT_FRAME_BUDGET: Duration = Duration::from_millis(5);

/// Configuration for the scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Length of one time slice. Default: 5ms.
    pub frame_budget: Duration,

    /// Timeout after which a user-blocking task is considered expired.
    /// Default: 250ms.
    pub user_blocking_timeout: Duration,

    /// Timeout for normal-priority tasks. Default: 5s.
    pub normal_timeout: Duration,

    /// Timeout for low-priority tasks. Default: 10s.
    pub low_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            frame_budget: DEFAULT_FRAME_BUDGET,
            user_blocking_timeout: Duration::from_millis(250),
            normal_timeout: Duration::from_secs(5),
            low_timeout: Duration::from_secs(10),
        }
    }
}

impl SchedulerConfig {
    /// Create from environment variables.
    ///
    /// `WEAVE_FRAME_BUDGET_MS` overrides the frame budget. Unparseable values
    /// are ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(ms) = std::env::var("WEAVE_FRAME_BUDGET_MS")
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
        {
            config.frame_budget = Duration::from_millis(ms);
        }
        config
    }

    /// Time a task at `priority` may wait before it is run without yielding.
    ///
    /// Immediate tasks are expired on arrival; idle tasks never expire.
    #[must_use]
    pub fn timeout_for(&self, priority: Priority) -> Option<Duration> {
        match priority {
            Priority::Immediate => Some(Duration::ZERO),
            Priority::UserBlocking => Some(self.user_blocking_timeout),
            Priority::Normal => Some(self.normal_timeout),
            Priority::Low => Some(self.low_timeout),
            Priority::Idle => None,
        }
    }
}
