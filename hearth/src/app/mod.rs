//! The application object and its capability contexts
//!
//! [`App`] is the Base capability tier: it owns the arena, the callback
//! registries, globals, windows and the task scheduler. The other tiers
//! borrow it:
//!
//! - [`WindowContext`] (Visual) adds window-scoped operations
//! - [`Context<T>`] (Bound) adds operations on the one entity it is bound to
//!
//! Both dereference to `App`, so every Base operation is available from
//! every tier, and neither can be built from outside the crate.
//!
//! # Effects
//!
//! `notify`, `emit` and `defer` queue effects instead of running callbacks
//! in place. The queue is flushed when the outermost arena operation
//! (create, update, window update, task resumption) completes, after the
//! operation has released its borrow. Observers can therefore read the
//! entity that notified them. Entities whose last strong handle dropped are
//! reclaimed during the same flush.

mod context;
mod effect;
mod global;
mod window;

pub use context::{Context, EventEmitter};
pub use global::Global;
pub use window::{VisualContext, WindowContext};

use crate::arena::{Access, Arena, BorrowState, EntityRef, Handle};
use crate::config::RuntimeConfig;
use crate::error::Result;
use crate::executor::Executor;
use crate::registry::SubscriberSet;
use effect::{Depth, Effect};
use global::GlobalRegistry;
use hearth_types::{EntityId, WindowId};
use std::any::{Any, TypeId};
use std::collections::VecDeque;
use std::rc::Rc;
use window::WindowRegistry;

/// Observer callback; returns `false` once the observer or target is gone
pub(crate) type ObserverFn = Box<dyn FnMut(&mut App) -> bool>;
/// Event callback; returns `false` once the subscriber or emitter is gone
pub(crate) type ListenerFn = Box<dyn FnMut(&dyn Any, &mut App) -> bool>;
/// Runs once with the state of an entity being reclaimed
pub(crate) type ReleaseFn = Box<dyn FnOnce(&mut dyn Any, &mut App)>;

/// Event subscribers are keyed by emitter and event type
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct EventKey {
    pub(crate) emitter: EntityId,
    pub(crate) event_type: TypeId,
}

/// Runtime statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuntimeStats {
    /// Live entities, including ones under construction
    pub entity_count: usize,
    /// Registered observers
    pub observer_count: usize,
    /// Registered event subscribers
    pub subscriber_count: usize,
    /// Registered release callbacks
    pub release_callback_count: usize,
    /// Initialised globals
    pub global_count: usize,
    /// Open windows, including the root scope
    pub window_count: usize,
    /// Foreground tasks ready to resume
    pub ready_tasks: usize,
    /// Foreground tasks waiting on a background job
    pub parked_tasks: usize,
    /// Background jobs not yet delivered
    pub pending_jobs: usize,
}

/// Owner of all entity state; the Base capability tier
///
/// `App` is neither `Send` nor `Sync`. All arena access happens on the
/// thread that owns it.
pub struct App {
    config: RuntimeConfig,
    pub(crate) arena: Arena,
    pub(crate) observers: SubscriberSet<EntityId, ObserverFn>,
    pub(crate) event_listeners: SubscriberSet<EventKey, ListenerFn>,
    pub(crate) release_listeners: SubscriberSet<EntityId, ReleaseFn>,
    pub(crate) globals: GlobalRegistry,
    pub(crate) windows: WindowRegistry,
    pub(crate) executor: Executor,
    pending_effects: VecDeque<Effect>,
    update_depth: Depth,
    flush_depth: Depth,
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}

impl App {
    /// Create an app with the default configuration
    pub fn new() -> Self {
        Self::build(RuntimeConfig::default())
    }

    /// Create an app from a validated configuration
    pub fn with_config(config: RuntimeConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: RuntimeConfig) -> Self {
        Self {
            arena: Arena::new(config.entity_capacity),
            observers: SubscriberSet::default(),
            event_listeners: SubscriberSet::default(),
            release_listeners: SubscriberSet::default(),
            globals: GlobalRegistry::default(),
            windows: WindowRegistry::new(),
            executor: Executor::new(&config),
            pending_effects: VecDeque::new(),
            update_depth: Depth::default(),
            flush_depth: Depth::default(),
            config,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Create an entity in the root scope
    ///
    /// `build` receives a context bound to the new entity, so the state can
    /// create children, observe or subscribe while being constructed.
    pub fn create<T: 'static>(
        &mut self,
        build: impl FnOnce(&mut Context<'_, T>) -> T,
    ) -> Result<Handle<T>> {
        self.create_in_window(WindowId::ROOT, build)
    }

    pub(crate) fn create_in_window<T: 'static>(
        &mut self,
        window: WindowId,
        build: impl FnOnce(&mut Context<'_, T>) -> T,
    ) -> Result<Handle<T>> {
        let handle = self.arena.reserve::<T>()?;
        let state = {
            let _scope = self.update_depth.enter();
            let mut cx = Context::new(self, handle.clone(), window);
            build(&mut cx)
        };
        self.arena.insert(&handle, state, window);
        tracing::trace!(
            entity = %handle.entity_id(),
            type_name = std::any::type_name::<T>(),
            %window,
            "created entity"
        );
        self.flush_effects();
        Ok(handle)
    }

    /// Borrow an entity's state for reading
    pub fn read_entity<'a, T: 'static>(&'a self, handle: &Handle<T>) -> Result<EntityRef<'a, T>> {
        self.arena.read(handle.entity_id())
    }

    /// Mutate an entity's state with exclusive access
    ///
    /// The slot is `ExclusiveWrite` for the duration of `update`, and back
    /// to `Free` afterwards even if `update` panics. Effects raised inside
    /// are flushed before this returns, unless an outer operation is still
    /// in progress.
    pub fn update_entity<T: 'static, R>(
        &mut self,
        handle: &Handle<T>,
        update: impl FnOnce(&mut T, &mut Context<'_, T>) -> R,
    ) -> Result<R> {
        let slot = Rc::clone(self.arena.slot(handle.entity_id(), Access::Write)?);
        let window = slot.window();
        let result = {
            let mut state = slot.write::<T>()?;
            let _scope = self.update_depth.enter();
            let mut cx = Context::new(self, handle.clone(), window);
            update(&mut state, &mut cx)
        };
        self.flush_effects();
        Ok(result)
    }

    /// Whether the entity's slot still exists
    pub fn contains_entity(&self, id: EntityId) -> bool {
        self.arena.contains(id)
    }

    /// Number of strong handles to an entity
    pub fn strong_count(&self, id: EntityId) -> usize {
        self.arena.strong_count(id)
    }

    /// Current borrow state of an entity's slot
    pub fn borrow_state(&self, id: EntityId) -> Option<BorrowState> {
        self.arena
            .slot(id, Access::Read)
            .ok()
            .map(|slot| slot.borrow_state())
    }

    /// Run `f` once the current operation and its effects are done
    pub fn defer(&mut self, f: impl FnOnce(&mut App) + 'static) {
        self.pending_effects.push_back(Effect::Defer(Box::new(f)));
        self.flush_effects();
    }

    pub(crate) fn push_effect(&mut self, effect: Effect) {
        self.pending_effects.push_back(effect);
    }

    /// Dispatch queued effects and reclaim released entities
    ///
    /// A no-op while an update is in progress or a flush is already
    /// running; the outermost operation flushes when it completes. A flush
    /// that processes more than `max_effects_per_flush` effects discards
    /// the rest and logs an error.
    pub fn flush_effects(&mut self) {
        if !self.update_depth.is_zero() || !self.flush_depth.is_zero() {
            return;
        }
        let _flushing = self.flush_depth.enter();
        let limit = self.config.max_effects_per_flush;
        let mut processed = 0usize;
        loop {
            self.release_dropped_entities();
            let Some(effect) = self.pending_effects.pop_front() else {
                break;
            };
            processed += 1;
            if processed > limit {
                let discarded = self.pending_effects.len() + 1;
                self.pending_effects.clear();
                tracing::error!(
                    limit,
                    discarded,
                    "effect cascade exceeded limit; discarding remaining effects"
                );
                continue;
            }
            self.apply_effect(effect);
        }
    }

    fn apply_effect(&mut self, effect: Effect) {
        match effect {
            Effect::Notify { emitter } => self.dispatch_notify(emitter),
            Effect::Emit {
                emitter,
                event_type,
                event,
            } => self.dispatch_event(EventKey { emitter, event_type }, event.as_ref()),
            Effect::Defer(f) => f(self),
        }
    }

    fn dispatch_notify(&mut self, emitter: EntityId) {
        let observers = self.observers.snapshot(&emitter);
        tracing::debug!(entity = %emitter, observers = observers.len(), "dispatching notify");
        for (id, callback) in observers {
            let keep = match callback.try_borrow_mut() {
                Ok(mut callback) => (&mut *callback)(self),
                Err(_) => {
                    tracing::warn!(entity = %emitter, subscription = %id, "observer is already running; skipped");
                    true
                }
            };
            if !keep {
                self.observers.remove(&emitter, id);
            }
        }
    }

    fn dispatch_event(&mut self, key: EventKey, event: &dyn Any) {
        let listeners = self.event_listeners.snapshot(&key);
        tracing::debug!(entity = %key.emitter, subscribers = listeners.len(), "dispatching event");
        for (id, callback) in listeners {
            let keep = match callback.try_borrow_mut() {
                Ok(mut callback) => (&mut *callback)(event, self),
                Err(_) => {
                    tracing::warn!(entity = %key.emitter, subscription = %id, "subscriber is already running; skipped");
                    true
                }
            };
            if !keep {
                self.event_listeners.remove(&key, id);
            }
        }
    }

    /// Reclaim every slot whose strong count reached zero
    ///
    /// Discards the callbacks registered against the entity and the ones it
    /// registered against others. Dropping a state can release further
    /// entities, so this runs until no more ids are queued.
    fn release_dropped_entities(&mut self) {
        loop {
            let dropped = self.arena.take_dropped();
            if dropped.is_empty() {
                return;
            }
            for id in dropped {
                let Some(slot) = self.arena.remove(id) else {
                    continue;
                };
                let observers = self.observers.take(&id);
                let subscribers = self.event_listeners.remove_where(|key| key.emitter == id);
                let owned = self.observers.remove_owned_by(id)
                    + self.event_listeners.remove_owned_by(id);
                let on_release = self.release_listeners.take(&id);
                tracing::trace!(
                    entity = %id,
                    type_name = slot.type_tag().name(),
                    observers = observers.len(),
                    subscribers,
                    owned,
                    "releasing entity"
                );
                drop(observers);

                match slot.into_state() {
                    Some(mut state) => {
                        for callback in on_release {
                            callback(state.as_mut(), self);
                        }
                    }
                    None => {
                        tracing::warn!(entity = %id, "slot still borrowed at release; release callbacks skipped");
                    }
                }
            }
        }
    }

    /// Snapshot of runtime bookkeeping
    pub fn stats(&self) -> RuntimeStats {
        RuntimeStats {
            entity_count: self.arena.len(),
            observer_count: self.observers.len(),
            subscriber_count: self.event_listeners.len(),
            release_callback_count: self.release_listeners.len(),
            global_count: self.globals.len(),
            window_count: self.windows.len(),
            ready_tasks: self.executor.ready_len(),
            parked_tasks: self.executor.parked_len(),
            pending_jobs: self.executor.pending_jobs(),
        }
    }
}
