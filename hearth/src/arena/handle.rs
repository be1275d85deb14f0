//! Strong and weak handles to arena entities
//!
//! A strong handle keeps its entity alive; a weak handle only names it.
//! Counts live in a table shared by every handle of one `App`:
//!
//! - cloning a strong handle increments the entity's count
//! - dropping one decrements it, and the last drop queues the id for release
//! - upgrading a weak handle succeeds only while the count is above zero,
//!   so a weak handle resolves absent from the moment the last strong
//!   handle goes away, even before the slot itself is reclaimed

use super::{EntityRef, TypeTag};
use crate::app::{App, Context};
use crate::error::{Result, RuntimeError};
use hearth_types::EntityId;
use parking_lot::RwLock;
use std::cmp::Ordering as CmpOrdering;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

/// Strong counts of every live entity, plus ids whose count reached zero
#[derive(Debug, Default)]
pub(crate) struct RefCounts {
    counts: HashMap<EntityId, AtomicUsize>,
    dropped: Vec<EntityId>,
}

pub(crate) type SharedRefCounts = Arc<RwLock<RefCounts>>;

impl RefCounts {
    /// Register a new entity with a count of one
    pub(crate) fn register(&mut self, id: EntityId) {
        self.counts.insert(id, AtomicUsize::new(1));
    }

    /// Take the ids queued for release, forgetting their counts
    pub(crate) fn take_dropped(&mut self) -> Vec<EntityId> {
        let dropped = std::mem::take(&mut self.dropped);
        for id in &dropped {
            self.counts.remove(id);
        }
        dropped
    }

    pub(crate) fn strong_count(&self, id: EntityId) -> usize {
        self.counts
            .get(&id)
            .map(|count| count.load(Ordering::SeqCst))
            .unwrap_or(0)
    }
}

/// Type-erased strong handle
pub struct AnyHandle {
    id: EntityId,
    type_tag: TypeTag,
    ref_counts: Weak<RwLock<RefCounts>>,
}

impl AnyHandle {
    /// Wrap an id whose count has already been incremented for this handle
    pub(crate) fn new(id: EntityId, type_tag: TypeTag, ref_counts: Weak<RwLock<RefCounts>>) -> Self {
        Self {
            id,
            type_tag,
            ref_counts,
        }
    }

    /// Id of the referenced entity
    pub fn entity_id(&self) -> EntityId {
        self.id
    }

    /// Name of the state type stored in the slot
    pub fn type_name(&self) -> &'static str {
        self.type_tag.name()
    }

    /// Create a weak handle to the same entity
    pub fn downgrade(&self) -> AnyWeakHandle {
        AnyWeakHandle {
            id: self.id,
            type_tag: self.type_tag,
            ref_counts: self.ref_counts.clone(),
        }
    }

    /// Recover the typed handle, failing if `T` is not the stored type
    pub fn downcast<T: 'static>(self) -> Result<Handle<T>> {
        if !self.type_tag.is::<T>() {
            return Err(RuntimeError::TypeMismatch {
                entity: self.id,
                expected: std::any::type_name::<T>(),
                found: self.type_tag.name(),
            });
        }
        Ok(Handle {
            any: self,
            entity_type: PhantomData,
        })
    }
}

impl Clone for AnyHandle {
    fn clone(&self) -> Self {
        if let Some(counts) = self.ref_counts.upgrade() {
            let counts = counts.read();
            if let Some(count) = counts.counts.get(&self.id) {
                count.fetch_add(1, Ordering::SeqCst);
            }
        }
        Self {
            id: self.id,
            type_tag: self.type_tag,
            ref_counts: self.ref_counts.clone(),
        }
    }
}

impl Drop for AnyHandle {
    fn drop(&mut self) {
        let Some(counts) = self.ref_counts.upgrade() else {
            return;
        };
        let previous = {
            let table = counts.read();
            table
                .counts
                .get(&self.id)
                .map(|count| count.fetch_sub(1, Ordering::SeqCst))
        };
        if previous == Some(1) {
            counts.write().dropped.push(self.id);
        }
    }
}

impl PartialEq for AnyHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for AnyHandle {}

impl Hash for AnyHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for AnyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnyHandle")
            .field("id", &self.id)
            .field("type", &self.type_tag.name())
            .finish()
    }
}

/// Type-erased weak handle
#[derive(Clone)]
pub struct AnyWeakHandle {
    id: EntityId,
    type_tag: TypeTag,
    ref_counts: Weak<RwLock<RefCounts>>,
}

impl AnyWeakHandle {
    /// Id of the referenced entity
    pub fn entity_id(&self) -> EntityId {
        self.id
    }

    /// Obtain a strong handle if the entity still has strong owners
    pub fn upgrade(&self) -> Option<AnyHandle> {
        let counts = self.ref_counts.upgrade()?;
        {
            let table = counts.read();
            let count = table.counts.get(&self.id)?;
            let mut current = count.load(Ordering::SeqCst);
            loop {
                if current == 0 {
                    return None;
                }
                match count.compare_exchange_weak(
                    current,
                    current + 1,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                ) {
                    Ok(_) => break,
                    Err(actual) => current = actual,
                }
            }
        }
        Some(AnyHandle::new(self.id, self.type_tag, self.ref_counts.clone()))
    }

    /// Whether an upgrade would currently succeed
    pub fn is_alive(&self) -> bool {
        self.ref_counts
            .upgrade()
            .map(|counts| counts.read().strong_count(self.id) > 0)
            .unwrap_or(false)
    }
}

impl PartialEq for AnyWeakHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for AnyWeakHandle {}

impl Hash for AnyWeakHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for AnyWeakHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnyWeakHandle")
            .field("id", &self.id)
            .field("type", &self.type_tag.name())
            .finish()
    }
}

/// Strong, typed handle to an entity of type `T`
///
/// Handles are cheap to clone and may be stored inside other entities.
/// Two entities that need to reach each other should hold one strong and
/// one weak edge, otherwise neither count can reach zero.
pub struct Handle<T> {
    any: AnyHandle,
    entity_type: PhantomData<fn(T) -> T>,
}

impl<T: 'static> Handle<T> {
    pub(crate) fn new(id: EntityId, ref_counts: Weak<RwLock<RefCounts>>) -> Self {
        Self {
            any: AnyHandle::new(id, TypeTag::of::<T>(), ref_counts),
            entity_type: PhantomData,
        }
    }

    /// Id of the referenced entity
    pub fn entity_id(&self) -> EntityId {
        self.any.id
    }

    /// Create a weak handle to the same entity
    pub fn downgrade(&self) -> WeakHandle<T> {
        WeakHandle {
            any: self.any.downgrade(),
            entity_type: PhantomData,
        }
    }

    /// Borrow the type-erased handle
    pub fn as_any(&self) -> &AnyHandle {
        &self.any
    }

    /// Erase the state type
    pub fn into_any(self) -> AnyHandle {
        self.any
    }

    /// Borrow the entity's state for reading
    ///
    /// The slot stays in `SharedRead` until the returned guard drops.
    pub fn read<'a>(&self, app: &'a App) -> Result<EntityRef<'a, T>> {
        app.arena.read(self.entity_id())
    }

    /// Read the entity's state through a closure
    pub fn read_with<R>(&self, app: &App, f: impl FnOnce(&T, &App) -> R) -> Result<R> {
        let state = self.read(app)?;
        Ok(f(&state, app))
    }

    /// Mutate the entity's state with exclusive access
    ///
    /// Fails with `ReentrantBorrowViolation` if the entity is already
    /// borrowed, e.g. when called from inside its own update.
    pub fn update<R>(
        &self,
        app: &mut App,
        update: impl FnOnce(&mut T, &mut Context<'_, T>) -> R,
    ) -> Result<R> {
        app.update_entity(self, update)
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        Self {
            any: self.any.clone(),
            entity_type: PhantomData,
        }
    }
}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.any == other.any
    }
}

impl<T> Eq for Handle<T> {}

impl<T> PartialOrd for Handle<T> {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Handle<T> {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.any.id.cmp(&other.any.id)
    }
}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.any.hash(state);
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("id", &self.any.id)
            .field("type", &self.any.type_tag.name())
            .finish()
    }
}

/// Weak, typed handle to an entity of type `T`
pub struct WeakHandle<T> {
    any: AnyWeakHandle,
    entity_type: PhantomData<fn(T) -> T>,
}

impl<T: 'static> WeakHandle<T> {
    /// Id of the referenced entity
    pub fn entity_id(&self) -> EntityId {
        self.any.id
    }

    /// Obtain a strong handle, or `None` once the entity is released
    pub fn upgrade(&self) -> Option<Handle<T>> {
        self.any.upgrade().map(|any| Handle {
            any,
            entity_type: PhantomData,
        })
    }

    /// Whether an upgrade would currently succeed
    pub fn is_alive(&self) -> bool {
        self.any.is_alive()
    }

    /// Update the entity if it is still alive
    pub fn update<R>(
        &self,
        app: &mut App,
        update: impl FnOnce(&mut T, &mut Context<'_, T>) -> R,
    ) -> Result<R> {
        let handle = self
            .upgrade()
            .ok_or(RuntimeError::EntityNotFound(self.entity_id()))?;
        handle.update(app, update)
    }

    /// Read the entity if it is still alive
    pub fn read_with<R>(&self, app: &App, f: impl FnOnce(&T, &App) -> R) -> Result<R> {
        let handle = self
            .upgrade()
            .ok_or(RuntimeError::EntityNotFound(self.entity_id()))?;
        handle.read_with(app, f)
    }
}

impl<T> Clone for WeakHandle<T> {
    fn clone(&self) -> Self {
        Self {
            any: self.any.clone(),
            entity_type: PhantomData,
        }
    }
}

impl<T> PartialEq for WeakHandle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.any == other.any
    }
}

impl<T> Eq for WeakHandle<T> {}

impl<T> Hash for WeakHandle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.any.hash(state);
    }
}

impl<T> fmt::Debug for WeakHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakHandle")
            .field("id", &self.any.id)
            .field("type", &self.any.type_tag.name())
            .finish()
    }
}
