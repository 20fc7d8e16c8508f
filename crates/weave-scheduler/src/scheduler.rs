#![forbid(unsafe_code)]

//! Priority-ordered, time-sliced cooperative scheduler.
//!
//! # Model
//!
//! Every task has a priority and an *expiration*: the submission time plus
//! the priority's timeout (see [`SchedulerConfig::timeout_for`]). The queue
//! is ordered by expiration, ties broken by submission order, so higher
//! priorities run first and a starving low-priority task eventually
//! overtakes newer work.
//!
//! A *slice* ([`Scheduler::run_slice`]) repeatedly pops the head task and
//! runs it until either the queue is empty or the slice budget is exhausted
//! and the head task has not expired yet. Expired tasks always run.
//!
//! # Continuations
//!
//! A task that yields part-way returns [`TaskStatus::Continue`] with the
//! closure to resume. The continuation keeps the task's handle, priority and
//! expiration, so callers can compare [`Scheduler::current_scheduled_handle`]
//! against a stored handle to decide whether they are still the scheduled
//! owner of some piece of work.
//!
//! # Cancellation
//!
//! Cancelling a queued task removes its callback; the heap entry is skipped
//! lazily. Cancelling the *running* task (from inside its own callback or a
//! nested scheduling decision) drops whatever continuation it returns.
//!
//! # Invariants
//!
//! 1. A handle is never reused.
//! 2. Tasks at equal expiration run in submission order.
//! 3. Each slice runs at least one task when the queue is non-empty.
//! 4. A cancelled task's callback is never invoked afterwards.

use crate::clock::{Clock, MonotonicClock};
use crate::config::SchedulerConfig;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::fmt;
use tracing::{debug_span, trace};
use web_time::Duration;

/// Scheduling priority. Declaration order is priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    /// Must run now; never yields.
    Immediate = 1,
    /// Direct user input.
    UserBlocking = 2,
    /// Default background rendering.
    Normal = 3,
    /// Deferrable work (transitions).
    Low = 4,
    /// Runs only when nothing else is pending.
    Idle = 5,
}

impl Priority {
    /// All priorities, highest first.
    pub const ALL: [Priority; 5] = [
        Priority::Immediate,
        Priority::UserBlocking,
        Priority::Normal,
        Priority::Low,
        Priority::Idle,
    ];

    /// Stable name for logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Priority::Immediate => "immediate",
            Priority::UserBlocking => "user_blocking",
            Priority::Normal => "normal",
            Priority::Low => "low",
            Priority::Idle => "idle",
        }
    }
}

/// Opaque identity of a scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskHandle(u64);

impl TaskHandle {
    /// Numeric id, unique per scheduler.
    #[must_use]
    pub const fn id(self) -> u64 {
        self.0
    }
}

/// A task body. Receives the caller context, the scheduler, and whether the
/// task ran past its expiration.
pub type TaskFn<C> = Box<dyn FnOnce(&mut C, &mut Scheduler<C>, bool) -> TaskStatus<C>>;

/// Result of running a task.
pub enum TaskStatus<C> {
    /// The task finished.
    Done,
    /// The task yielded; run this continuation later at the same priority.
    Continue(TaskFn<C>),
}

impl<C> TaskStatus<C> {
    /// Build a continuation from a closure.
    pub fn continue_with<F>(f: F) -> Self
    where
        F: FnOnce(&mut C, &mut Scheduler<C>, bool) -> TaskStatus<C> + 'static,
    {
        Self::Continue(Box::new(f))
    }

    /// Whether this is [`TaskStatus::Done`].
    #[must_use]
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }
}

impl<C> fmt::Debug for TaskStatus<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Done => f.write_str("Done"),
            Self::Continue(_) => f.write_str("Continue(..)"),
        }
    }
}

/// Scheduler statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Total tasks submitted.
    pub total_submitted: u64,

    /// Tasks that returned [`TaskStatus::Done`].
    pub total_completed: u64,

    /// Tasks cancelled before completing.
    pub total_cancelled: u64,

    /// Continuations re-queued.
    pub total_continuations: u64,

    /// Slices started.
    pub total_slices: u64,

    /// Slices that ended because the budget ran out.
    pub total_yields: u64,
}

/// Heap entry. The callback lives in `Scheduler::tasks` so cancellation is O(1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct QueuedTask {
    expiration: Duration,
    id: u64,
}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap: earliest expiration, then lowest id, wins.
        other
            .expiration
            .cmp(&self.expiration)
            .then_with(|| other.id.cmp(&self.id))
    }
}

struct Task<C> {
    priority: Priority,
    expiration: Duration,
    callback: TaskFn<C>,
}

#[derive(Debug, Clone, Copy)]
struct RunningTask {
    handle: TaskHandle,
    priority: Priority,
    expiration: Duration,
    cancelled: bool,
}

/// Cooperative scheduler over a caller-owned context `C`.
pub struct Scheduler<C> {
    config: SchedulerConfig,
    clock: Box<dyn Clock>,
    queue: BinaryHeap<QueuedTask>,
    tasks: HashMap<u64, Task<C>>,
    running: Option<RunningTask>,
    slice_start: Duration,
    next_id: u64,
    stats: SchedulerStats,
}

impl<C> Scheduler<C> {
    /// Create a scheduler on the wall clock.
    pub fn new(config: SchedulerConfig) -> Self {
        Self::with_clock(config, MonotonicClock::new())
    }

    /// Create a scheduler on a custom clock.
    pub fn with_clock(config: SchedulerConfig, clock: impl Clock + 'static) -> Self {
        Self {
            config,
            clock: Box::new(clock),
            queue: BinaryHeap::new(),
            tasks: HashMap::new(),
            running: None,
            slice_start: Duration::ZERO,
            next_id: 1,
            stats: SchedulerStats::default(),
        }
    }

    /// The active configuration.
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Current clock reading.
    pub fn now(&self) -> Duration {
        self.clock.now()
    }

    /// Queue `callback` at `priority`.
    pub fn schedule<F>(&mut self, priority: Priority, callback: F) -> TaskHandle
    where
        F: FnOnce(&mut C, &mut Scheduler<C>, bool) -> TaskStatus<C> + 'static,
    {
        let id = self.next_id;
        self.next_id += 1;

        let start = self.now();
        let expiration = self
            .config
            .timeout_for(priority)
            .and_then(|timeout| start.checked_add(timeout))
            .unwrap_or(Duration::MAX);

        self.queue.push(QueuedTask { expiration, id });
        self.tasks.insert(
            id,
            Task {
                priority,
                expiration,
                callback: Box::new(callback),
            },
        );
        self.stats.total_submitted += 1;

        trace!(
            target: "weave.scheduler",
            task = id,
            priority = priority.as_str(),
            "task scheduled"
        );
        TaskHandle(id)
    }

    /// Cancel a task. Returns `true` if the task was queued or running.
    pub fn cancel(&mut self, handle: TaskHandle) -> bool {
        if let Some(running) = self.running.as_mut()
            && running.handle == handle
        {
            if !running.cancelled {
                running.cancelled = true;
                self.stats.total_cancelled += 1;
            }
            return true;
        }
        let removed = self.tasks.remove(&handle.0).is_some();
        if removed {
            self.stats.total_cancelled += 1;
            trace!(target: "weave.scheduler", task = handle.0, "task cancelled");
        }
        removed
    }

    /// True once the current slice has used up its budget.
    pub fn should_yield(&self) -> bool {
        self.now().saturating_sub(self.slice_start) >= self.config.frame_budget
    }

    /// The running task, or the head of the queue when nothing is running.
    pub fn current_scheduled_handle(&self) -> Option<TaskHandle> {
        if let Some(running) = self.running {
            return Some(running.handle);
        }
        self.queue
            .iter()
            .filter(|entry| self.tasks.contains_key(&entry.id))
            .max()
            .map(|entry| TaskHandle(entry.id))
    }

    /// Priority of the running task, if any.
    pub fn current_priority(&self) -> Option<Priority> {
        self.running.map(|running| running.priority)
    }

    /// Number of live queued tasks (excluding the running one).
    pub fn pending_count(&self) -> usize {
        self.tasks.len()
    }

    /// True when no task is queued or running.
    pub fn is_idle(&self) -> bool {
        self.tasks.is_empty() && self.running.is_none()
    }

    /// Snapshot of the statistics.
    pub fn stats(&self) -> SchedulerStats {
        self.stats.clone()
    }

    /// Run one time slice. Returns `true` if work remains afterwards.
    pub fn run_slice(&mut self, ctx: &mut C) -> bool {
        self.slice_start = self.now();
        self.stats.total_slices += 1;

        let span = debug_span!(
            "scheduler.slice",
            tasks_run = tracing::field::Empty,
            yielded = tracing::field::Empty,
        )
        .entered();

        let mut tasks_run = 0u64;
        let mut yielded = false;

        while let Some(head) = self.peek_live() {
            let now = self.now();
            if tasks_run > 0 && head.expiration > now && self.should_yield() {
                yielded = true;
                self.stats.total_yields += 1;
                break;
            }
            self.queue.pop();
            let Some(task) = self.tasks.remove(&head.id) else {
                continue;
            };

            let handle = TaskHandle(head.id);
            let did_timeout = task.expiration <= now;
            self.running = Some(RunningTask {
                handle,
                priority: task.priority,
                expiration: task.expiration,
                cancelled: false,
            });

            let status = (task.callback)(ctx, self, did_timeout);
            tasks_run += 1;

            let Some(running) = self.running.take() else {
                continue;
            };
            match status {
                TaskStatus::Continue(next) if !running.cancelled => {
                    self.stats.total_continuations += 1;
                    self.queue.push(QueuedTask {
                        expiration: running.expiration,
                        id: handle.0,
                    });
                    self.tasks.insert(
                        handle.0,
                        Task {
                            priority: running.priority,
                            expiration: running.expiration,
                            callback: next,
                        },
                    );
                }
                TaskStatus::Continue(_) => {
                    trace!(
                        target: "weave.scheduler",
                        task = handle.0,
                        "continuation dropped for cancelled task"
                    );
                }
                TaskStatus::Done => {
                    if !running.cancelled {
                        self.stats.total_completed += 1;
                    }
                }
            }
        }

        span.record("tasks_run", tasks_run);
        span.record("yielded", yielded);
        !self.tasks.is_empty()
    }

    /// Run slices until the queue is empty. Returns the number of slices run.
    pub fn run_until_idle(&mut self, ctx: &mut C) -> u64 {
        let mut slices = 0;
        while !self.tasks.is_empty() {
            slices += 1;
            if !self.run_slice(ctx) {
                break;
            }
        }
        slices
    }

    /// Drop heap entries whose callbacks were cancelled; return the live head.
    fn peek_live(&mut self) -> Option<QueuedTask> {
        while let Some(head) = self.queue.peek().copied() {
            if self.tasks.contains_key(&head.id) {
                return Some(head);
            }
            self.queue.pop();
        }
        None
    }
}

impl<C> fmt::Debug for Scheduler<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.config)
            .field("pending", &self.tasks.len())
            .field("running", &self.running.map(|r| r.handle))
            .field("stats", &self.stats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    type Log = Vec<&'static str>;

    fn manual() -> (Scheduler<Log>, ManualClock) {
        let clock = ManualClock::new();
        let sched = Scheduler::with_clock(SchedulerConfig::default(), clock.clone());
        (sched, clock)
    }

    #[test]
    fn runs_in_priority_order() {
        let (mut sched, _clock) = manual();
        sched.schedule(Priority::Low, |log: &mut Log, _, _| {
            log.push("low");
            TaskStatus::Done
        });
        sched.schedule(Priority::Immediate, |log: &mut Log, _, _| {
            log.push("immediate");
            TaskStatus::Done
        });
        sched.schedule(Priority::Normal, |log: &mut Log, _, _| {
            log.push("normal");
            TaskStatus::Done
        });

        let mut log = Log::new();
        sched.run_until_idle(&mut log);
        assert_eq!(log, vec!["immediate", "normal", "low"]);
    }

    #[test]
    fn equal_priority_is_fifo() {
        let (mut sched, _clock) = manual();
        for name in ["a", "b", "c"] {
            sched.schedule(Priority::Normal, move |log: &mut Log, _, _| {
                log.push(name);
                TaskStatus::Done
            });
        }
        let mut log = Log::new();
        sched.run_until_idle(&mut log);
        assert_eq!(log, vec!["a", "b", "c"]);
    }

    #[test]
    fn cancelled_task_never_runs() {
        let (mut sched, _clock) = manual();
        let handle = sched.schedule(Priority::Normal, |log: &mut Log, _, _| {
            log.push("cancelled");
            TaskStatus::Done
        });
        assert!(sched.cancel(handle));
        assert!(!sched.cancel(handle));

        let mut log = Log::new();
        sched.run_until_idle(&mut log);
        assert!(log.is_empty());
        assert_eq!(sched.stats().total_cancelled, 1);
    }

    #[test]
    fn continuation_keeps_handle() {
        let (mut sched, _clock) = manual();
        fn step(log: &mut Log, sched: &mut Scheduler<Log>, _: bool) -> TaskStatus<Log> {
            log.push("step");
            if log.len() < 3 {
                assert!(sched.current_scheduled_handle().is_some());
                TaskStatus::continue_with(step)
            } else {
                TaskStatus::Done
            }
        }
        let handle = sched.schedule(Priority::Normal, step);
        assert_eq!(sched.current_scheduled_handle(), Some(handle));

        let mut log = Log::new();
        sched.run_until_idle(&mut log);
        assert_eq!(log.len(), 3);
        assert_eq!(sched.stats().total_continuations, 2);
    }

    #[test]
    fn cancelling_running_task_drops_continuation() {
        let (mut sched, _clock) = manual();
        sched.schedule(Priority::Normal, |log: &mut Log, sched: &mut Scheduler<Log>, _| {
            log.push("first");
            if let Some(me) = sched.current_scheduled_handle() {
                sched.cancel(me);
            }
            TaskStatus::continue_with(|log: &mut Log, _, _| {
                log.push("never");
                TaskStatus::Done
            })
        });
        let mut log = Log::new();
        sched.run_until_idle(&mut log);
        assert_eq!(log, vec!["first"]);
        assert!(sched.is_idle());
    }

    #[test]
    fn slice_yields_when_budget_exhausted() {
        let (mut sched, clock) = manual();
        for _ in 0..4 {
            let clock = clock.clone();
            sched.schedule(Priority::Normal, move |log: &mut Log, _, _| {
                clock.advance(Duration::from_millis(3));
                log.push("t");
                TaskStatus::Done
            });
        }
        let mut log = Log::new();
        assert!(sched.run_slice(&mut log));
        assert_eq!(log.len(), 2);
        assert_eq!(sched.stats().total_yields, 1);
        sched.run_until_idle(&mut log);
        assert_eq!(log.len(), 4);
    }

    #[test]
    fn expired_tasks_ignore_budget() {
        let (mut sched, clock) = manual();
        for _ in 0..3 {
            let clock = clock.clone();
            sched.schedule(Priority::Immediate, move |log: &mut Log, _, timed_out| {
                assert!(timed_out);
                clock.advance(Duration::from_millis(50));
                log.push("sync");
                TaskStatus::Done
            });
        }
        let mut log = Log::new();
        assert!(!sched.run_slice(&mut log));
        assert_eq!(log.len(), 3);
    }

    #[test]
    fn tasks_can_schedule_follow_ups() {
        let (mut sched, _clock) = manual();
        sched.schedule(Priority::Low, |log: &mut Log, sched: &mut Scheduler<Log>, _| {
            log.push("low");
            sched.schedule(Priority::Immediate, |log: &mut Log, _, _| {
                log.push("nested");
                TaskStatus::Done
            });
            TaskStatus::Done
        });
        let mut log = Log::new();
        sched.run_until_idle(&mut log);
        assert_eq!(log, vec!["low", "nested"]);
    }
}
