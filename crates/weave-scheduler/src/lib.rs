#![forbid(unsafe_code)]

//! Weave Scheduler
//!
//! A single-threaded, cooperative task scheduler with five priority levels
//! and time slicing. It is the engine that drives the reconciler's work
//! loop: render passes are scheduled as tasks, yield when the current slice
//! is exhausted, and resume through continuations.
//!
//! # Key Components
//!
//! - [`Scheduler`] - priority queue of tasks plus the slice loop
//! - [`Priority`] - `Immediate > UserBlocking > Normal > Low > Idle`
//! - [`TaskStatus`] - what a task returns: done, or a continuation
//! - [`Clock`] - time source; [`MonotonicClock`] for real use,
//!   [`ManualClock`] for deterministic tests
//! - [`SchedulerConfig`] - frame budget and per-priority timeouts
//!
//! # Context threading
//!
//! Tasks are closures over nothing global: each receives `&mut C` (the
//! caller-owned context, e.g. the reconciler) and `&mut Scheduler<C>` so it
//! can schedule or cancel follow-up work and poll [`Scheduler::should_yield`].

pub mod clock;
pub mod config;
pub mod scheduler;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::SchedulerConfig;
pub use scheduler::{Priority, Scheduler, SchedulerStats, TaskFn, TaskHandle, TaskStatus};
