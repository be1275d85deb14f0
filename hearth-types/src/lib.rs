//! Shared identifier types for hearth
//!
//! Every identifier is an opaque, totally ordered `u64` drawn from a
//! process-wide counter. Identifiers are never reused: once a counter
//! passes a value it never issues it again, even after the thing it named
//! is gone.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic identifier source that refuses to wrap.
///
/// `allocate` returns `None` once the `u64` space is spent instead of
/// handing out an identifier that was already issued.
#[derive(Debug)]
pub struct IdAllocator {
    next: AtomicU64,
}

impl IdAllocator {
    /// Create an allocator whose first identifier is `start`
    pub const fn starting_at(start: u64) -> Self {
        Self {
            next: AtomicU64::new(start),
        }
    }

    /// Issue the next identifier, or `None` if the space is exhausted
    pub fn allocate(&self) -> Option<u64> {
        self.next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                if current == u64::MAX {
                    None
                } else {
                    Some(current + 1)
                }
            })
            .ok()
    }
}

static ENTITY_IDS: IdAllocator = IdAllocator::starting_at(1);

/// Identifier of a state slot in the arena
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct EntityId(pub u64);

impl EntityId {
    /// Draw a fresh id from the process-wide allocator
    ///
    /// Returns `None` when the identifier space is exhausted.
    pub fn allocate() -> Option<Self> {
        ENTITY_IDS.allocate().map(Self)
    }

    /// Raw numeric value
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entity#{}", self.0)
    }
}

/// Subscription identifier
///
/// Issued for every observer, event subscriber and release callback.
/// Ordering by id is registration order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct SubscriptionId(pub u64);

static SUBSCRIPTION_COUNTER: AtomicU64 = AtomicU64::new(1);

impl SubscriptionId {
    /// Create a new unique subscription ID
    pub fn new() -> Self {
        Self(SUBSCRIPTION_COUNTER.fetch_add(1, Ordering::SeqCst))
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub:{}", self.0)
    }
}

/// Foreground task identifier
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct TaskId(pub u64);

static TASK_COUNTER: AtomicU64 = AtomicU64::new(1);

impl TaskId {
    /// Create a new task ID
    pub fn new() -> Self {
        Self(TASK_COUNTER.fetch_add(1, Ordering::SeqCst))
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task:{}", self.0)
    }
}

/// Background job identifier
///
/// A foreground task parks on a `JobId` until the job's outcome has been
/// delivered.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct JobId(pub u64);

static JOB_COUNTER: AtomicU64 = AtomicU64::new(1);

impl JobId {
    /// Create a new job ID
    pub fn new() -> Self {
        Self(JOB_COUNTER.fetch_add(1, Ordering::SeqCst))
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job:{}", self.0)
    }
}

/// Window identifier
///
/// `WindowId::ROOT` is the app's own scope and always exists; windows
/// opened later get ids from a counter starting at 1.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct WindowId(pub u64);

static WINDOW_COUNTER: AtomicU64 = AtomicU64::new(1);

impl WindowId {
    /// The root scope every app starts with
    pub const ROOT: WindowId = WindowId(0);

    /// Create a new window ID
    pub fn new() -> Self {
        Self(WINDOW_COUNTER.fetch_add(1, Ordering::SeqCst))
    }

    /// Check if this is the root scope
    pub fn is_root(&self) -> bool {
        *self == Self::ROOT
    }
}

impl Default for WindowId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            write!(f, "window:root")
        } else {
            write!(f, "window:{}", self.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_entity_ids_are_monotonic() {
        let a = EntityId::allocate().unwrap();
        let b = EntityId::allocate().unwrap();
        assert!(a < b);
    }

    #[test]
    fn test_allocator_refuses_to_wrap() {
        let allocator = IdAllocator::starting_at(u64::MAX - 2);
        assert_eq!(allocator.allocate(), Some(u64::MAX - 2));
        assert_eq!(allocator.allocate(), Some(u64::MAX - 1));
        assert_eq!(allocator.allocate(), None);
        assert_eq!(allocator.allocate(), None);
    }

    #[test]
    fn test_subscription_id_uniqueness() {
        let s1 = SubscriptionId::new();
        let s2 = SubscriptionId::new();
        assert_ne!(s1, s2);
        assert!(s1 < s2);
    }

    #[test]
    fn test_window_root() {
        assert!(WindowId::ROOT.is_root());
        assert!(!WindowId::new().is_root());
        assert_eq!(WindowId::ROOT.to_string(), "window:root");
    }

    #[test]
    fn test_display_formats() {
        assert_eq!(EntityId(7).to_string(), "entity#7");
        assert_eq!(SubscriptionId(3).to_string(), "sub:3");
        assert_eq!(TaskId(4).to_string(), "task:4");
        assert_eq!(JobId(5).to_string(), "job:5");
    }

    proptest! {
        #[test]
        fn prop_allocator_issues_strictly_increasing_ids(start in 0u64..u64::MAX - 64, n in 1usize..64) {
            let allocator = IdAllocator::starting_at(start);
            let ids: Vec<u64> = (0..n).filter_map(|_| allocator.allocate()).collect();
            prop_assert_eq!(ids.len(), n);
            prop_assert!(ids.windows(2).all(|w| w[0] < w[1]));
        }
    }
}
