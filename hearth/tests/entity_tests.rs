//! Integration tests for entity ownership, handles and the borrow guard

mod common;

use common::{init_tracing, CallLog};
use hearth::prelude::*;
use hearth::{Access, BorrowState, RuntimeConfig};

struct Counter {
    count: u32,
}

struct Parent {
    child: Handle<Counter>,
}

#[test]
fn test_weak_handle_absent_after_last_strong_drop() {
    init_tracing();
    let mut app = App::new();
    let counter = app.create(|_| Counter { count: 3 }).unwrap();
    let weak = counter.downgrade();
    let clone = counter.clone();
    assert_eq!(app.strong_count(counter.entity_id()), 2);

    drop(counter);
    assert!(weak.upgrade().is_some());

    drop(clone);
    assert!(weak.upgrade().is_none());
    assert!(!weak.is_alive());

    app.flush_effects();
    assert!(weak.upgrade().is_none());
    assert!(matches!(
        weak.update(&mut app, |counter, _| counter.count += 1),
        Err(RuntimeError::EntityNotFound(_))
    ));
}

#[test]
fn test_nested_access_during_update_rejected() {
    init_tracing();
    let mut app = App::new();
    let counter = app.create(|_| Counter { count: 0 }).unwrap();

    counter
        .update(&mut app, |counter, cx| {
            counter.count += 1;
            let this = cx.entity();
            assert!(matches!(
                this.read(cx),
                Err(RuntimeError::ReentrantBorrowViolation {
                    held: BorrowState::ExclusiveWrite,
                    requested: Access::Read,
                    ..
                })
            ));
            assert!(matches!(
                this.update(cx, |counter, _| counter.count += 1),
                Err(RuntimeError::ReentrantBorrowViolation {
                    held: BorrowState::ExclusiveWrite,
                    requested: Access::Write,
                    ..
                })
            ));
        })
        .unwrap();

    assert_eq!(counter.read(&app).unwrap().count, 1);
    assert_eq!(app.borrow_state(counter.entity_id()), Some(BorrowState::Free));
}

#[test]
fn test_shared_reads_overlap() {
    let mut app = App::new();
    let counter = app.create(|_| Counter { count: 7 }).unwrap();
    let id = counter.entity_id();

    let first = counter.read(&app).unwrap();
    let second = counter.read(&app).unwrap();
    assert_eq!(app.borrow_state(id), Some(BorrowState::SharedRead(2)));
    assert_eq!(first.count + second.count, 14);
    drop(first);
    drop(second);
    assert_eq!(app.borrow_state(id), Some(BorrowState::Free));
}

#[test]
fn test_factory_cannot_read_itself() {
    let mut app = App::new();
    let counter = app
        .create(|cx| {
            let this = cx.entity();
            assert!(matches!(
                this.read(cx),
                Err(RuntimeError::ReentrantBorrowViolation { .. })
            ));
            Counter { count: 1 }
        })
        .unwrap();
    assert_eq!(counter.read(&app).unwrap().count, 1);
}

#[test]
fn test_releasing_parent_releases_child() {
    init_tracing();
    let mut app = App::new();
    let parent = app
        .create(|cx| {
            let child = cx.create(|_| Counter { count: 0 }).unwrap();
            Parent { child }
        })
        .unwrap();
    let child = parent.read(&app).unwrap().child.downgrade();
    assert_eq!(app.stats().entity_count, 2);

    drop(parent);
    app.flush_effects();
    assert!(!child.is_alive());
    assert_eq!(app.stats().entity_count, 0);
}

#[test]
fn test_on_release_sees_final_state() {
    let mut app = App::new();
    let log = CallLog::default();
    let probe = log.clone();
    let counter = app
        .create(move |cx| {
            cx.on_release(move |counter: &mut Counter, _| {
                probe.push(format!("released at {}", counter.count));
            })
            .detach();
            Counter { count: 0 }
        })
        .unwrap();
    counter.update(&mut app, |counter, _| counter.count = 9).unwrap();

    drop(counter);
    assert_eq!(log.len(), 0);
    app.flush_effects();
    assert_eq!(log.entries(), vec!["released at 9"]);
    assert_eq!(app.stats().release_callback_count, 0);
}

#[test]
fn test_any_handle_downcast_checks_type() {
    let mut app = App::new();
    let counter = app.create(|_| Counter { count: 0 }).unwrap();
    let any = counter.clone().into_any();
    assert!(any.type_name().ends_with("Counter"));

    assert!(matches!(
        any.clone().downcast::<Parent>(),
        Err(RuntimeError::TypeMismatch { .. })
    ));
    let typed = any.downcast::<Counter>().unwrap();
    assert_eq!(typed, counter);
}

#[test]
fn test_capacity_reported_as_exhaustion() {
    let config = RuntimeConfig {
        entity_capacity: Some(2),
        ..RuntimeConfig::default()
    };
    let mut app = App::with_config(config).unwrap();
    let first = app.create(|_| Counter { count: 0 }).unwrap();
    let _second = app.create(|_| Counter { count: 0 }).unwrap();

    assert!(matches!(
        app.create(|_| Counter { count: 0 }),
        Err(RuntimeError::AllocatorExhausted {
            live: 2,
            capacity: Some(2)
        })
    ));

    drop(first);
    app.flush_effects();
    assert!(app.create(|_| Counter { count: 0 }).is_ok());
}

#[test]
fn test_ids_never_reused() {
    let mut app = App::new();
    let first = app.create(|_| Counter { count: 0 }).unwrap();
    let first_id = first.entity_id();
    drop(first);
    app.flush_effects();
    let second = app.create(|_| Counter { count: 0 }).unwrap();
    assert!(second.entity_id() > first_id);
}
