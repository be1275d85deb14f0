//! Integration tests for foreground tasks and the background pool

mod common;

use common::{init_tracing, CallLog};
use hearth::prelude::*;
use hearth::{JobError, RuntimeConfig, TaskStatus};
use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

struct Counter {
    count: u32,
}

fn single_worker_app() -> App {
    let config = RuntimeConfig {
        background_threads: 1,
        ..RuntimeConfig::default()
    };
    App::with_config(config).unwrap()
}

#[test]
fn test_background_result_reaches_continuation() {
    init_tracing();
    let mut app = single_worker_app();
    let delivered = Rc::new(Cell::new(None));
    let slot = delivered.clone();

    app.background_then(|| 6u32 * 7, move |result, _| slot.set(result.ok()))
        .unwrap()
        .detach();
    assert_eq!(delivered.get(), None);

    app.run_until_idle();
    assert_eq!(delivered.get(), Some(42));
}

#[test]
fn test_entity_bound_continuation_updates_state() {
    let mut app = single_worker_app();
    let counter = app.create(|_| Counter { count: 0 }).unwrap();

    counter
        .update(&mut app, |_, cx| {
            cx.background_then(
                || 6u32 * 7,
                |counter, result, _| counter.count = result.unwrap_or_default(),
            )
            .unwrap()
            .detach();
        })
        .unwrap();

    app.run_until_idle();
    assert_eq!(counter.read(&app).unwrap().count, 42);
}

#[test]
fn test_tasks_resume_in_fifo_order() {
    let mut app = App::new();
    let log = CallLog::default();

    for name in ["a", "b"] {
        let log = log.clone();
        let mut remaining = 2;
        app.spawn(move |_| {
            log.push(name);
            remaining -= 1;
            if remaining == 0 {
                Step::Done(())
            } else {
                Step::Yield
            }
        })
        .detach();
    }

    assert_eq!(app.run_until_parked(), 4);
    assert_eq!(log.entries(), vec!["a", "b", "a", "b"]);
    assert_eq!(app.run_until_parked(), 0);
}

#[test]
fn test_task_output_and_status() {
    let mut app = App::new();
    let task = app.spawn(|_| Step::Done("ready"));
    assert_eq!(task.status(), TaskStatus::Pending);

    app.run_until_parked();
    assert!(task.is_finished());
    assert_eq!(task.take_output(), Some("ready"));
}

#[test]
fn test_dropped_task_never_resumes() {
    let mut app = App::new();
    let resumed = Rc::new(Cell::new(0));
    let probe = resumed.clone();
    let task = app.spawn(move |_| {
        probe.set(probe.get() + 1);
        Step::<()>::Yield
    });
    drop(task);

    assert_eq!(app.run_until_parked(), 0);
    assert_eq!(resumed.get(), 0);
}

#[test]
fn test_task_awaits_background_job() {
    init_tracing();
    let mut app = single_worker_app();
    let job = app
        .spawn_background(|| {
            std::thread::sleep(Duration::from_millis(20));
            String::from("fetched")
        })
        .unwrap();

    let task = app.spawn(move |app| match app.take_background_result(&job) {
        None => Step::Await(job.id()),
        Some(result) => Step::Done(result),
    });

    app.run_until_idle();
    assert_eq!(task.take_output(), Some(Ok(String::from("fetched"))));
}

#[test]
fn test_background_future_delivers() {
    let mut app = single_worker_app();
    let job = app
        .spawn_background_future(async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            7u8
        })
        .unwrap();

    let task = app.spawn(move |app| match app.take_background_result(&job) {
        None => Step::Await(job.id()),
        Some(result) => Step::Done(result),
    });

    app.run_until_idle();
    assert_eq!(task.take_output(), Some(Ok(7)));
}

#[test]
fn test_background_panic_reported() {
    let mut app = single_worker_app();
    let delivered = Rc::new(Cell::new(false));
    let probe = delivered.clone();

    app.background_then(
        || -> u32 { panic!("worker failed") },
        move |result, _| {
            assert!(matches!(result, Err(JobError::Panicked(message)) if message.contains("worker failed")));
            probe.set(true);
        },
    )
    .unwrap()
    .detach();

    app.run_until_idle();
    assert!(delivered.get());
}

#[test]
fn test_entity_task_abandoned_after_release() {
    let mut app = App::new();
    let counter = app.create(|_| Counter { count: 0 }).unwrap();
    let weak = counter.downgrade();
    let task = counter
        .update(&mut app, |_, cx| {
            cx.spawn(|counter, _| {
                counter.count += 1;
                if counter.count < 100 {
                    Step::<()>::Yield
                } else {
                    Step::Done(())
                }
            })
        })
        .unwrap();

    let mut owner = Some(counter);
    app.spawn(move |_| {
        owner.take();
        Step::Done(())
    })
    .detach();

    app.run_until_parked();
    assert!(!weak.is_alive());
    assert_eq!(task.status(), TaskStatus::Abandoned);
}

#[test]
fn test_stats_track_scheduler_queues() {
    let mut app = App::new();
    let task = app.spawn(|_| Step::Done(()));
    assert_eq!(app.stats().ready_tasks, 1);
    app.run_until_parked();
    assert_eq!(app.stats().ready_tasks, 0);
    assert!(task.is_finished());
}
