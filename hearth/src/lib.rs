//! Hearth: a reactive entity runtime
//!
//! Application state lives in an arena owned by a single [`App`]. Code
//! refers to state through [`Handle`]s and [`WeakHandle`]s, mutates it
//! through scoped updates that hold an exclusive borrow of one entity, and
//! reacts to changes through observers and typed event subscriptions.
//! Work that must not block the owning thread runs on a background pool
//! and reports back to foreground tasks.
//!
//! # Example
//!
//! ```
//! use hearth::prelude::*;
//!
//! struct Counter {
//!     count: u32,
//! }
//!
//! struct Mirror {
//!     seen: u32,
//! }
//!
//! let mut app = App::new();
//! let counter = app.create(|_| Counter { count: 0 }).unwrap();
//! let mirror = app
//!     .create(|cx| {
//!         cx.observe(&counter, |mirror: &mut Mirror, counter, cx| {
//!             mirror.seen = counter.read(cx).unwrap().count;
//!         })
//!         .detach();
//!         Mirror { seen: 0 }
//!     })
//!     .unwrap();
//!
//! counter
//!     .update(&mut app, |counter, cx| {
//!         counter.count += 1;
//!         cx.notify();
//!     })
//!     .unwrap();
//!
//! assert_eq!(mirror.read(&app).unwrap().seen, 1);
//! ```

pub mod app;
pub mod arena;
pub mod config;
pub mod error;
pub mod executor;
pub mod registry;

pub use app::{App, Context, EventEmitter, Global, RuntimeStats, VisualContext, WindowContext};
pub use arena::{Access, AnyHandle, AnyWeakHandle, BorrowState, EntityRef, Handle, TypeTag, WeakHandle};
pub use config::{ConfigError, RuntimeConfig};
pub use error::{Result, RuntimeError};
pub use executor::{BackgroundTask, JobError, Resumable, Step, Task, TaskStatus};
pub use hearth_types::{EntityId, JobId, SubscriptionId, TaskId, WindowId};
pub use registry::Subscription;

/// Common imports for code built on the runtime
pub mod prelude {
    pub use crate::{
        App, Context, EventEmitter, Global, Handle, Result, RuntimeError, Step, Subscription, Task,
        VisualContext, WeakHandle, WindowContext,
    };
}
