//! Cooperative work-list scenarios driven through the public scheduler API.
//!
//! The context is a list of pending jobs, each a count of units to emit at a
//! priority. `schedule_next` mirrors how a renderer keeps at most one task in
//! flight: same priority coalesces, a different priority cancels and
//! reschedules.

use proptest::prelude::*;
use std::time::Duration;
use weave_scheduler::{ManualClock, Priority, Scheduler, SchedulerConfig, TaskHandle, TaskStatus};

#[derive(Debug, Clone)]
struct Job {
    id: u32,
    remaining: u32,
    priority: Priority,
}

#[derive(Default)]
struct WorkList {
    jobs: Vec<Job>,
    emitted: Vec<(u32, Priority)>,
    callback: Option<TaskHandle>,
    callback_priority: Option<Priority>,
    clock: ManualClock,
}

fn schedule_next(list: &mut WorkList, sched: &mut Scheduler<WorkList>) {
    list.jobs.sort_by_key(|job| job.priority);
    let Some(next) = list.jobs.first().cloned() else {
        if let Some(handle) = list.callback.take() {
            sched.cancel(handle);
        }
        list.callback_priority = None;
        return;
    };
    if list.callback_priority == Some(next.priority) {
        return;
    }
    if let Some(handle) = list.callback.take() {
        sched.cancel(handle);
    }
    list.callback_priority = Some(next.priority);
    list.callback = Some(sched.schedule(next.priority, move |list, sched, timed_out| {
        perform(list, sched, next.id, timed_out)
    }));
}

fn perform(
    list: &mut WorkList,
    sched: &mut Scheduler<WorkList>,
    id: u32,
    timed_out: bool,
) -> TaskStatus<WorkList> {
    let Some(index) = list.jobs.iter().position(|job| job.id == id) else {
        return TaskStatus::Done;
    };
    let priority = list.jobs[index].priority;
    let sync = priority == Priority::Immediate || timed_out;
    while list.jobs[index].remaining > 0 && (sync || !sched.should_yield()) {
        list.jobs[index].remaining -= 1;
        list.emitted.push((id, priority));
        list.clock.advance(Duration::from_millis(1));
    }
    if list.jobs[index].remaining == 0 {
        list.jobs.remove(index);
        list.callback_priority = None;
    }

    let before = list.callback;
    schedule_next(list, sched);
    if list.callback.is_some() && list.callback == before {
        return TaskStatus::continue_with(move |list, sched, timed_out| {
            perform(list, sched, id, timed_out)
        });
    }
    TaskStatus::Done
}

fn setup() -> (WorkList, Scheduler<WorkList>) {
    let clock = ManualClock::new();
    let sched = Scheduler::with_clock(SchedulerConfig::default(), clock.clone());
    let list = WorkList {
        clock,
        ..WorkList::default()
    };
    (list, sched)
}

#[test]
fn low_priority_job_yields_between_slices() {
    let (mut list, mut sched) = setup();
    list.jobs.push(Job {
        id: 1,
        remaining: 12,
        priority: Priority::Low,
    });
    schedule_next(&mut list, &mut sched);

    assert!(sched.run_slice(&mut list));
    assert_eq!(list.emitted.len(), 5);

    sched.run_until_idle(&mut list);
    assert_eq!(list.emitted.len(), 12);
    assert!(sched.stats().total_continuations >= 2);
}

#[test]
fn immediate_job_preempts_and_runs_without_yielding() {
    let (mut list, mut sched) = setup();
    list.jobs.push(Job {
        id: 1,
        remaining: 20,
        priority: Priority::Low,
    });
    schedule_next(&mut list, &mut sched);
    sched.run_slice(&mut list);
    let low_before = list.emitted.len();
    assert!(low_before < 20);

    list.jobs.push(Job {
        id: 2,
        remaining: 30,
        priority: Priority::Immediate,
    });
    schedule_next(&mut list, &mut sched);

    sched.run_slice(&mut list);
    let immediate: Vec<_> = list.emitted[low_before..]
        .iter()
        .take(30)
        .map(|(id, _)| *id)
        .collect();
    assert_eq!(immediate, vec![2; 30], "immediate work runs in one slice");

    sched.run_until_idle(&mut list);
    let low_total = list.emitted.iter().filter(|(id, _)| *id == 1).count();
    assert_eq!(low_total, 20);
}

proptest! {
    #[test]
    fn every_unit_is_emitted_exactly_once(
        jobs in prop::collection::vec((1u32..15, 0usize..5), 1..8),
    ) {
        let (mut list, mut sched) = setup();
        let mut expected = 0u32;
        for (i, (count, prio)) in jobs.iter().enumerate() {
            list.jobs.push(Job {
                id: i as u32,
                remaining: *count,
                priority: Priority::ALL[*prio],
            });
            expected += count;
            schedule_next(&mut list, &mut sched);
            sched.run_slice(&mut list);
        }
        sched.run_until_idle(&mut list);
        prop_assert_eq!(list.emitted.len() as u32, expected);
        prop_assert!(list.jobs.is_empty());
    }
}
