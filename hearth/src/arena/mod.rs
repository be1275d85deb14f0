//! Entity arena
//!
//! The arena owns every piece of entity state. Each slot holds:
//! - the boxed state, type-erased behind `dyn Any`
//! - a [`TypeTag`] compared on every typed access
//! - the slot's [`BorrowState`]
//! - the window the entity was created in
//!
//! Slots are never handed out. Callers reach state through handles, which
//! route through the borrow guard in [`borrow`].

mod borrow;
mod handle;

pub use borrow::{Access, BorrowState, EntityRef};
pub use handle::{AnyHandle, AnyWeakHandle, Handle, WeakHandle};

pub(crate) use borrow::EntityMut;
pub(crate) use handle::SharedRefCounts;

use crate::error::{Result, RuntimeError};
use borrow::{borrow_read, borrow_write, BorrowFailure, BorrowFlag};
use hearth_types::{EntityId, WindowId};
use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;
use std::sync::Arc;

/// Runtime type identity of a slot's state
#[derive(Debug, Clone, Copy)]
pub struct TypeTag {
    id: TypeId,
    name: &'static str,
}

impl TypeTag {
    /// Tag for `T`
    pub fn of<T: 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// Whether this tag names `T`
    pub fn is<T: 'static>(&self) -> bool {
        self.id == TypeId::of::<T>()
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for TypeTag {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeTag {}

/// One entity's storage
pub(crate) struct EntitySlot {
    id: EntityId,
    type_tag: TypeTag,
    window: WindowId,
    borrow: BorrowFlag,
    state: RefCell<Box<dyn Any>>,
}

impl EntitySlot {
    pub(crate) fn type_tag(&self) -> TypeTag {
        self.type_tag
    }

    pub(crate) fn window(&self) -> WindowId {
        self.window
    }

    pub(crate) fn borrow_state(&self) -> BorrowState {
        self.borrow.state()
    }

    pub(crate) fn read<T: 'static>(&self) -> Result<EntityRef<'_, T>> {
        self.check_type::<T>()?;
        borrow_read(&self.borrow, &self.state, |state| state.downcast_ref::<T>())
            .map_err(|failure| self.failure::<T>(failure, Access::Read))
    }

    pub(crate) fn write<T: 'static>(&self) -> Result<EntityMut<'_, T>> {
        self.check_type::<T>()?;
        borrow_write(&self.borrow, &self.state, |state| state.downcast_mut::<T>())
            .map_err(|failure| self.failure::<T>(failure, Access::Write))
    }

    /// Give up the slot and hand back its state
    ///
    /// Returns `None` if another reference to the slot is still alive.
    pub(crate) fn into_state(self: Rc<Self>) -> Option<Box<dyn Any>> {
        Rc::try_unwrap(self)
            .ok()
            .map(|slot| slot.state.into_inner())
    }

    fn check_type<T: 'static>(&self) -> Result<()> {
        if self.type_tag.is::<T>() {
            Ok(())
        } else {
            Err(self.mismatch::<T>())
        }
    }

    fn mismatch<T: 'static>(&self) -> RuntimeError {
        RuntimeError::TypeMismatch {
            entity: self.id,
            expected: std::any::type_name::<T>(),
            found: self.type_tag.name(),
        }
    }

    fn failure<T: 'static>(&self, failure: BorrowFailure, requested: Access) -> RuntimeError {
        match failure {
            BorrowFailure::Conflict(held) => RuntimeError::ReentrantBorrowViolation {
                entity: self.id,
                held,
                requested,
            },
            BorrowFailure::WrongType => self.mismatch::<T>(),
        }
    }
}

/// Owner of all entity slots of one `App`
pub(crate) struct Arena {
    slots: BTreeMap<EntityId, Rc<EntitySlot>>,
    /// Ids whose factory is still running
    reserved: BTreeSet<EntityId>,
    ref_counts: SharedRefCounts,
    capacity: Option<usize>,
}

impl Arena {
    pub(crate) fn new(capacity: Option<usize>) -> Self {
        Self {
            slots: BTreeMap::new(),
            reserved: BTreeSet::new(),
            ref_counts: SharedRefCounts::default(),
            capacity,
        }
    }

    /// Allocate an id and a strong handle for an entity under construction
    pub(crate) fn reserve<T: 'static>(&mut self) -> Result<Handle<T>> {
        let live = self.len();
        let exhausted = RuntimeError::AllocatorExhausted {
            live,
            capacity: self.capacity,
        };
        if self.capacity.is_some_and(|capacity| live >= capacity) {
            return Err(exhausted);
        }
        let id = EntityId::allocate().ok_or(exhausted)?;
        self.ref_counts.write().register(id);
        self.reserved.insert(id);
        Ok(Handle::new(id, Arc::downgrade(&self.ref_counts)))
    }

    /// Store the state produced by the factory for a reserved id
    pub(crate) fn insert<T: 'static>(&mut self, handle: &Handle<T>, state: T, window: WindowId) {
        let id = handle.entity_id();
        self.reserved.remove(&id);
        self.slots.insert(
            id,
            Rc::new(EntitySlot {
                id,
                type_tag: TypeTag::of::<T>(),
                window,
                borrow: BorrowFlag::new(),
                state: RefCell::new(Box::new(state)),
            }),
        );
    }

    /// Look up a slot; an entity whose factory is still running counts as
    /// exclusively borrowed
    pub(crate) fn slot(&self, id: EntityId, requested: Access) -> Result<&Rc<EntitySlot>> {
        match self.slots.get(&id) {
            Some(slot) => Ok(slot),
            None if self.reserved.contains(&id) => Err(RuntimeError::ReentrantBorrowViolation {
                entity: id,
                held: BorrowState::ExclusiveWrite,
                requested,
            }),
            None => Err(RuntimeError::EntityNotFound(id)),
        }
    }

    pub(crate) fn read<T: 'static>(&self, id: EntityId) -> Result<EntityRef<'_, T>> {
        self.slot(id, Access::Read)?.read::<T>()
    }

    /// Ids whose strong count reached zero since the last call
    pub(crate) fn take_dropped(&mut self) -> Vec<EntityId> {
        self.ref_counts.write().take_dropped()
    }

    /// Detach a slot from the arena
    pub(crate) fn remove(&mut self, id: EntityId) -> Option<Rc<EntitySlot>> {
        self.reserved.remove(&id);
        self.slots.remove(&id)
    }

    pub(crate) fn contains(&self, id: EntityId) -> bool {
        self.slots.contains_key(&id)
    }

    pub(crate) fn strong_count(&self, id: EntityId) -> usize {
        self.ref_counts.read().strong_count(id)
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len() + self.reserved.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Counter(u32);

    fn arena_with(value: u32) -> (Arena, Handle<Counter>) {
        let mut arena = Arena::new(None);
        let handle = arena.reserve::<Counter>().unwrap();
        arena.insert(&handle, Counter(value), WindowId::ROOT);
        (arena, handle)
    }

    #[test]
    fn test_reserve_then_insert() {
        let mut arena = Arena::new(None);
        let handle = arena.reserve::<Counter>().unwrap();
        let id = handle.entity_id();

        let err = arena.read::<Counter>(id).unwrap_err();
        assert!(matches!(err, RuntimeError::ReentrantBorrowViolation { .. }));

        arena.insert(&handle, Counter(3), WindowId::ROOT);
        assert_eq!(*arena.read::<Counter>(id).unwrap(), Counter(3));
        assert_eq!(arena.strong_count(id), 1);
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn test_type_tag_checked() {
        let (arena, handle) = arena_with(1);
        let err = arena.read::<String>(handle.entity_id()).unwrap_err();
        match err {
            RuntimeError::TypeMismatch {
                expected, found, ..
            } => {
                assert!(expected.ends_with("String"));
                assert!(found.ends_with("Counter"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_capacity_limits_live_entities() {
        let mut arena = Arena::new(Some(1));
        let first = arena.reserve::<Counter>().unwrap();
        arena.insert(&first, Counter(0), WindowId::ROOT);

        let err = arena.reserve::<Counter>().unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::AllocatorExhausted {
                live: 1,
                capacity: Some(1)
            }
        ));

        let id = first.entity_id();
        drop(first);
        assert_eq!(arena.take_dropped(), vec![id]);
        assert!(arena.remove(id).is_some());
        assert!(arena.reserve::<Counter>().is_ok());
    }

    #[test]
    fn test_dropped_slot_yields_state() {
        let (mut arena, handle) = arena_with(9);
        let id = handle.entity_id();
        drop(handle);

        assert_eq!(arena.take_dropped(), vec![id]);
        let slot = arena.remove(id).unwrap();
        let state = slot.into_state().unwrap();
        assert_eq!(state.downcast_ref::<Counter>(), Some(&Counter(9)));
        assert!(!arena.contains(id));
        assert!(matches!(
            arena.read::<Counter>(id),
            Err(RuntimeError::EntityNotFound(missing)) if missing == id
        ));
    }

    #[test]
    fn test_borrow_state_reported() {
        let (arena, handle) = arena_with(1);
        let slot = arena.slot(handle.entity_id(), Access::Read).unwrap();
        let guard = slot.read::<Counter>().unwrap();
        assert_eq!(slot.borrow_state(), BorrowState::SharedRead(1));
        let err = slot.write::<Counter>().err().unwrap();
        assert!(matches!(
            err,
            RuntimeError::ReentrantBorrowViolation {
                held: BorrowState::SharedRead(1),
                requested: Access::Write,
                ..
            }
        ));
        drop(guard);
        assert_eq!(slot.borrow_state(), BorrowState::Free);
    }
}
