//! Error types for the hearth runtime
//!
//! Every variant describes a logic fault in the calling code. None of them
//! are retryable: an operation that fails has left the arena untouched.

use crate::arena::{Access, BorrowState};
use crate::config::ConfigError;
use hearth_types::{EntityId, WindowId};
use thiserror::Error;

/// Top-level runtime error
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The slot was destroyed, or never existed
    #[error("Entity {0} not found")]
    EntityNotFound(EntityId),

    /// Read or write requested while an incompatible borrow is live
    #[error("Entity {entity} is already borrowed ({held}); {requested} access rejected")]
    ReentrantBorrowViolation {
        /// The entity whose slot is borrowed
        entity: EntityId,
        /// Borrow state at the time of the request
        held: BorrowState,
        /// What the rejected caller asked for
        requested: Access,
    },

    /// No further entity ids can be issued
    #[error("Entity allocator exhausted ({live} live entities, capacity {})", display_capacity(.capacity))]
    AllocatorExhausted {
        /// Live entity count when allocation failed
        live: usize,
        /// Configured capacity, if any
        capacity: Option<usize>,
    },

    /// A typed access did not match the slot's type tag
    #[error("Entity {entity} holds {found}, not {expected}")]
    TypeMismatch {
        /// The entity accessed
        entity: EntityId,
        /// Type the caller asked for
        expected: &'static str,
        /// Type stored in the slot
        found: &'static str,
    },

    /// Global read before it was set
    #[error("Global {0} has not been initialized")]
    GlobalNotFound(&'static str),

    /// Global updated while already leased to an outer update
    #[error("Global {0} is already being updated")]
    GlobalBorrowed(&'static str),

    /// Window closed, or never opened
    #[error("Window {0} not found")]
    WindowNotFound(WindowId),

    /// Background worker pool could not be started
    #[error("Background pool failed to start: {0}")]
    BackgroundPool(#[from] std::io::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

fn display_capacity(capacity: &Option<usize>) -> String {
    match capacity {
        Some(capacity) => capacity.to_string(),
        None => "unbounded".to_string(),
    }
}

/// Result type using RuntimeError
pub type Result<T> = std::result::Result<T, RuntimeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        insta::assert_snapshot!(
            RuntimeError::EntityNotFound(EntityId(12)),
            @"Entity entity#12 not found"
        );
        insta::assert_snapshot!(
            RuntimeError::ReentrantBorrowViolation {
                entity: EntityId(3),
                held: BorrowState::ExclusiveWrite,
                requested: Access::Read,
            },
            @"Entity entity#3 is already borrowed (exclusive write); read access rejected"
        );
        insta::assert_snapshot!(
            RuntimeError::ReentrantBorrowViolation {
                entity: EntityId(3),
                held: BorrowState::SharedRead(2),
                requested: Access::Write,
            },
            @"Entity entity#3 is already borrowed (shared read x2); write access rejected"
        );
        insta::assert_snapshot!(
            RuntimeError::AllocatorExhausted { live: 4, capacity: Some(4) },
            @"Entity allocator exhausted (4 live entities, capacity 4)"
        );
        insta::assert_snapshot!(
            RuntimeError::AllocatorExhausted { live: 9, capacity: None },
            @"Entity allocator exhausted (9 live entities, capacity unbounded)"
        );
        insta::assert_snapshot!(
            RuntimeError::GlobalNotFound("app::Theme"),
            @"Global app::Theme has not been initialized"
        );
        insta::assert_snapshot!(
            RuntimeError::WindowNotFound(WindowId(8)),
            @"Window window:8 not found"
        );
    }
}
