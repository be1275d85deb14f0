//! Queued side effects and the scope counters that decide when they flush

use super::App;
use hearth_types::EntityId;
use std::any::{Any, TypeId};
use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

/// Work raised during an arena operation and performed once the outermost
/// operation has returned its borrow
pub(crate) enum Effect {
    /// Run every observer of `emitter`
    Notify { emitter: EntityId },
    /// Run every subscriber of `emitter` for `event_type`
    Emit {
        emitter: EntityId,
        event_type: TypeId,
        event: Box<dyn Any>,
    },
    /// Run a closure with full app access
    Defer(Box<dyn FnOnce(&mut App)>),
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Effect::Notify { emitter } => f.debug_struct("Notify").field("emitter", emitter).finish(),
            Effect::Emit { emitter, .. } => f.debug_struct("Emit").field("emitter", emitter).finish(),
            Effect::Defer(_) => f.write_str("Defer"),
        }
    }
}

/// Nesting counter that survives unwinding
///
/// `enter` bumps the counter and returns a guard that lowers it again when
/// dropped, so a panic escaping a callback cannot leave the app believing
/// an update or flush is still in progress.
#[derive(Debug, Clone, Default)]
pub(crate) struct Depth(Rc<Cell<usize>>);

impl Depth {
    pub(crate) fn enter(&self) -> DepthGuard {
        self.0.set(self.0.get() + 1);
        DepthGuard(self.0.clone())
    }

    pub(crate) fn is_zero(&self) -> bool {
        self.0.get() == 0
    }
}

pub(crate) struct DepthGuard(Rc<Cell<usize>>);

impl Drop for DepthGuard {
    fn drop(&mut self) {
        self.0.set(self.0.get().saturating_sub(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depth_nests() {
        let depth = Depth::default();
        assert!(depth.is_zero());
        let outer = depth.enter();
        let inner = depth.enter();
        drop(inner);
        assert!(!depth.is_zero());
        drop(outer);
        assert!(depth.is_zero());
    }

    #[test]
    fn test_depth_restored_on_unwind() {
        let depth = Depth::default();
        let probe = depth.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _guard = probe.enter();
            panic!("callback failed");
        }));
        assert!(result.is_err());
        assert!(depth.is_zero());
    }
}
