//! Entity-bound context
//!
//! A [`Context<T>`] is handed to every closure that runs with exclusive
//! access to an entity of type `T`: factories, updates, observer and event
//! callbacks, and entity-bound tasks. It carries the entity's identity and
//! window, and everything it does is attributed to that entity.

use super::{App, Effect, EventKey, VisualContext};
use crate::arena::{Handle, WeakHandle};
use crate::error::{Result, RuntimeError};
use crate::executor::{JobError, Step, Task};
use crate::registry::Subscription;
use hearth_types::{EntityId, WindowId};
use std::any::{Any, TypeId};
use std::ops::{Deref, DerefMut};

/// Declares that entities of this type emit events of type `E`
///
/// Only `T: EventEmitter<E>` may call `emit::<E>`, and only emitters of `E`
/// can be subscribed to for `E`.
pub trait EventEmitter<E: 'static>: 'static {}

/// The Bound capability tier, tied to one entity of type `T`
pub struct Context<'a, T> {
    app: &'a mut App,
    entity: Handle<T>,
    window: WindowId,
}

impl<'a, T: 'static> Context<'a, T> {
    pub(crate) fn new(app: &'a mut App, entity: Handle<T>, window: WindowId) -> Self {
        Self {
            app,
            entity,
            window,
        }
    }

    /// Id of the bound entity
    pub fn entity_id(&self) -> EntityId {
        self.entity.entity_id()
    }

    /// Strong handle to the bound entity
    pub fn entity(&self) -> Handle<T> {
        self.entity.clone()
    }

    /// Weak handle to the bound entity
    ///
    /// Store this, not [`entity`](Self::entity), inside state the entity
    /// itself owns, or the entity keeps itself alive.
    pub fn weak_entity(&self) -> WeakHandle<T> {
        self.entity.downgrade()
    }

    /// Create an entity in the same window as this one
    pub fn create<U: 'static>(
        &mut self,
        build: impl FnOnce(&mut Context<'_, U>) -> U,
    ) -> Result<Handle<U>> {
        self.app.create_in_window(self.window, build)
    }

    /// Tell this entity's observers that it changed
    ///
    /// Observers run once per call, after the current update completes.
    pub fn notify(&mut self) {
        let emitter = self.entity_id();
        self.app.push_effect(Effect::Notify { emitter });
    }

    /// Send `event` to this entity's subscribers for `E`
    pub fn emit<E: 'static>(&mut self, event: E)
    where
        T: EventEmitter<E>,
    {
        let emitter = self.entity_id();
        self.app.push_effect(Effect::Emit {
            emitter,
            event_type: TypeId::of::<E>(),
            event: Box::new(event),
        });
    }

    /// Run `on_notify` each time `target` notifies
    ///
    /// The registration lasts until the returned subscription is dropped,
    /// or, once detached, until either entity is released.
    pub fn observe<W: 'static>(
        &mut self,
        target: &Handle<W>,
        mut on_notify: impl FnMut(&mut T, Handle<W>, &mut Context<'_, T>) + 'static,
    ) -> Subscription {
        let observer = self.weak_entity();
        let target_weak = target.downgrade();
        self.app.observers.insert(
            target.entity_id(),
            self.entity_id(),
            Box::new(move |app: &mut App| {
                let Some(target) = target_weak.upgrade() else {
                    return false;
                };
                keep_after(observer.update(app, |this, cx| on_notify(this, target, cx)))
            }),
        )
    }

    /// Run `on_event` each time `emitter` emits an `E`
    pub fn subscribe<W, E>(
        &mut self,
        emitter: &Handle<W>,
        mut on_event: impl FnMut(&mut T, Handle<W>, &E, &mut Context<'_, T>) + 'static,
    ) -> Subscription
    where
        W: EventEmitter<E>,
        E: 'static,
    {
        let subscriber = self.weak_entity();
        let emitter_weak = emitter.downgrade();
        let key = EventKey {
            emitter: emitter.entity_id(),
            event_type: TypeId::of::<E>(),
        };
        self.app.event_listeners.insert(
            key,
            self.entity_id(),
            Box::new(move |event: &dyn Any, app: &mut App| {
                let Some(event) = event.downcast_ref::<E>() else {
                    return true;
                };
                let Some(emitter) = emitter_weak.upgrade() else {
                    return false;
                };
                keep_after(subscriber.update(app, |this, cx| on_event(this, emitter, event, cx)))
            }),
        )
    }

    /// Run `on_release` with this entity's state when it is reclaimed
    pub fn on_release(&mut self, on_release: impl FnOnce(&mut T, &mut App) + 'static) -> Subscription {
        let entity = self.entity_id();
        self.app.release_listeners.insert(
            entity,
            entity,
            Box::new(move |state: &mut dyn Any, app: &mut App| {
                if let Some(state) = state.downcast_mut::<T>() {
                    on_release(state, app);
                }
            }),
        )
    }

    /// Spawn a foreground task bound to this entity
    ///
    /// Each resumption runs with exclusive access to the entity. Once the
    /// entity is released the task is abandoned.
    pub fn spawn<R: 'static>(
        &mut self,
        mut step: impl FnMut(&mut T, &mut Context<'_, T>) -> Step<R> + 'static,
    ) -> Task<R> {
        let entity = self.weak_entity();
        self.app.spawn(move |app: &mut App| {
            match entity.update(app, |this, cx| step(this, cx)) {
                Ok(next) => next,
                Err(RuntimeError::EntityNotFound(_)) => Step::Abandon,
                Err(err) => {
                    tracing::warn!(error = %err, "entity task could not resume; abandoning");
                    Step::Abandon
                }
            }
        })
    }

    /// Run `work` in the background, then `then` with this entity's state
    ///
    /// `then` is skipped if the entity was released in the meantime.
    pub fn background_then<R, F, C>(&mut self, work: F, then: C) -> Result<Task<()>>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
        C: FnOnce(&mut T, std::result::Result<R, JobError>, &mut Context<'_, T>) + 'static,
    {
        let entity = self.weak_entity();
        self.app.background_then(work, move |result, app| {
            if entity.update(app, |this, cx| then(this, result, cx)).is_err() {
                tracing::trace!(entity = %entity.entity_id(), "entity released before background result");
            }
        })
    }
}

/// Whether a callback should stay registered after trying to reach its entity
///
/// A released entity drops the registration. Any other error means the
/// entity is busy (already borrowed further up the stack) or mistyped; the
/// callback is skipped for this pass and the error is logged. Only a panic
/// aborts the dispatch.
fn keep_after(result: Result<()>) -> bool {
    match result {
        Ok(()) => true,
        Err(RuntimeError::EntityNotFound(_)) => false,
        Err(err) => {
            tracing::error!(error = %err, "callback could not reach its entity; skipped");
            true
        }
    }
}

impl<T> Deref for Context<'_, T> {
    type Target = App;

    fn deref(&self) -> &App {
        self.app
    }
}

impl<T> DerefMut for Context<'_, T> {
    fn deref_mut(&mut self) -> &mut App {
        self.app
    }
}

impl<T: 'static> super::window::sealed::Sealed for Context<'_, T> {}

impl<T: 'static> VisualContext for Context<'_, T> {
    fn window_id(&self) -> WindowId {
        self.window
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::{Access, BorrowState};

    #[test]
    fn test_keep_after_drops_only_released_entities() {
        assert!(keep_after(Ok(())));
        assert!(!keep_after(Err(RuntimeError::EntityNotFound(EntityId(4)))));
        assert!(keep_after(Err(RuntimeError::ReentrantBorrowViolation {
            entity: EntityId(4),
            held: BorrowState::ExclusiveWrite,
            requested: Access::Write,
        })));
        assert!(keep_after(Err(RuntimeError::TypeMismatch {
            entity: EntityId(4),
            expected: "Counter",
            found: "Tally",
        })));
    }
}
