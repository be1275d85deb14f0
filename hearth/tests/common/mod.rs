//! Shared helpers for integration tests

#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;
use tracing_subscriber::EnvFilter;

/// Install a test subscriber; set `RUST_LOG=hearth=trace` to see runtime logs
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

/// An append-only log shared between callbacks and the test body
#[derive(Clone, Default)]
pub struct CallLog(Rc<RefCell<Vec<String>>>);

impl CallLog {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.borrow_mut().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }
}
