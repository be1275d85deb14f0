//! Per-slot borrow tracking
//!
//! Every arena slot carries a [`BorrowState`]. Reads and writes go through
//! RAII guards that move the state forward on acquisition and back on drop,
//! including drops that happen while unwinding.
//!
//! | Held              | Read request        | Write request |
//! |-------------------|---------------------|---------------|
//! | `Free`            | `SharedRead(1)`     | `ExclusiveWrite` |
//! | `SharedRead(n)`   | `SharedRead(n + 1)` | rejected |
//! | `ExclusiveWrite`  | rejected            | rejected |
//!
//! Rejected requests are reported to the caller, never queued: the only
//! thread that can touch a slot is the one driving the `App`, so waiting
//! would never end.

use std::cell::{Cell, Ref, RefCell, RefMut};
use std::fmt;
use std::ops::{Deref, DerefMut};

/// Borrow state of one arena slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BorrowState {
    /// No outstanding borrows
    Free,
    /// `n` live read guards
    SharedRead(usize),
    /// A mutator holds the slot
    ExclusiveWrite,
}

impl fmt::Display for BorrowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BorrowState::Free => write!(f, "free"),
            BorrowState::SharedRead(n) => write!(f, "shared read x{n}"),
            BorrowState::ExclusiveWrite => write!(f, "exclusive write"),
        }
    }
}

/// Kind of access a caller requested
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Access::Read => write!(f, "read"),
            Access::Write => write!(f, "write"),
        }
    }
}

/// Borrow state cell for a single slot
#[derive(Debug)]
pub(crate) struct BorrowFlag(Cell<BorrowState>);

impl BorrowFlag {
    pub(crate) fn new() -> Self {
        Self(Cell::new(BorrowState::Free))
    }

    pub(crate) fn state(&self) -> BorrowState {
        self.0.get()
    }

    /// `Free → SharedRead(1)`, `SharedRead(n) → SharedRead(n + 1)`
    fn acquire_read(&self) -> Result<ReadRelease<'_>, BorrowState> {
        let next = match self.0.get() {
            BorrowState::Free => BorrowState::SharedRead(1),
            BorrowState::SharedRead(n) => BorrowState::SharedRead(n + 1),
            held @ BorrowState::ExclusiveWrite => return Err(held),
        };
        self.0.set(next);
        Ok(ReadRelease(self))
    }

    /// `Free → ExclusiveWrite`
    fn acquire_write(&self) -> Result<WriteRelease<'_>, BorrowState> {
        match self.0.get() {
            BorrowState::Free => {
                self.0.set(BorrowState::ExclusiveWrite);
                Ok(WriteRelease(self))
            }
            held => Err(held),
        }
    }
}

struct ReadRelease<'a>(&'a BorrowFlag);

impl Drop for ReadRelease<'_> {
    fn drop(&mut self) {
        let next = match self.0 .0.get() {
            BorrowState::SharedRead(n) if n > 1 => BorrowState::SharedRead(n - 1),
            _ => BorrowState::Free,
        };
        self.0 .0.set(next);
    }
}

struct WriteRelease<'a>(&'a BorrowFlag);

impl Drop for WriteRelease<'_> {
    fn drop(&mut self) {
        debug_assert_eq!(self.0.state(), BorrowState::ExclusiveWrite);
        self.0 .0.set(BorrowState::Free);
    }
}

/// Shared borrow of an entity's state
///
/// Holding an `EntityRef` keeps the slot in `SharedRead`; any update of the
/// same entity fails until it is dropped.
pub struct EntityRef<'a, T: ?Sized> {
    // Field order matters: the cell borrow ends before the flag is released.
    state: Ref<'a, T>,
    _release: ReadRelease<'a>,
}

impl<T: ?Sized> Deref for EntityRef<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.state
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for EntityRef<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.state, f)
    }
}

/// Exclusive borrow of an entity's state, held for the duration of an update
pub(crate) struct EntityMut<'a, T: ?Sized> {
    state: RefMut<'a, T>,
    _release: WriteRelease<'a>,
}

impl<T: ?Sized> Deref for EntityMut<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.state
    }
}

impl<T: ?Sized> DerefMut for EntityMut<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.state
    }
}

/// Failure to borrow a guarded cell
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BorrowFailure {
    /// An incompatible borrow is live
    Conflict(BorrowState),
    /// The cell holds a different type than requested
    WrongType,
}

/// Acquire a read guard over `cell`, downcast through `project`
pub(crate) fn borrow_read<'a, S: ?Sized, T: ?Sized>(
    flag: &'a BorrowFlag,
    cell: &'a RefCell<S>,
    project: impl FnOnce(&S) -> Option<&T>,
) -> Result<EntityRef<'a, T>, BorrowFailure> {
    let release = flag.acquire_read().map_err(BorrowFailure::Conflict)?;
    let state = cell
        .try_borrow()
        .map_err(|_| BorrowFailure::Conflict(BorrowState::ExclusiveWrite))?;
    let state = Ref::filter_map(state, project).map_err(|_| BorrowFailure::WrongType)?;
    Ok(EntityRef {
        state,
        _release: release,
    })
}

/// Acquire a write guard over `cell`, downcast through `project`
pub(crate) fn borrow_write<'a, S: ?Sized, T: ?Sized>(
    flag: &'a BorrowFlag,
    cell: &'a RefCell<S>,
    project: impl FnOnce(&mut S) -> Option<&mut T>,
) -> Result<EntityMut<'a, T>, BorrowFailure> {
    let release = flag.acquire_write().map_err(BorrowFailure::Conflict)?;
    let state = cell
        .try_borrow_mut()
        .map_err(|_| BorrowFailure::Conflict(BorrowState::ExclusiveWrite))?;
    let state = RefMut::filter_map(state, project).map_err(|_| BorrowFailure::WrongType)?;
    Ok(EntityMut {
        state,
        _release: release,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::any::Any;

    fn cell(value: i32) -> (BorrowFlag, RefCell<Box<dyn Any>>) {
        (BorrowFlag::new(), RefCell::new(Box::new(value)))
    }

    #[test]
    fn test_reads_share() {
        let (flag, cell) = cell(5);
        let a = borrow_read(&flag, &cell, |s| s.downcast_ref::<i32>()).unwrap();
        let b = borrow_read(&flag, &cell, |s| s.downcast_ref::<i32>()).unwrap();
        assert_eq!(flag.state(), BorrowState::SharedRead(2));
        assert_eq!(*a + *b, 10);
        drop(a);
        assert_eq!(flag.state(), BorrowState::SharedRead(1));
        drop(b);
        assert_eq!(flag.state(), BorrowState::Free);
    }

    #[test]
    fn test_write_excludes_read() {
        let (flag, cell) = cell(1);
        let mut w = borrow_write(&flag, &cell, |s| s.downcast_mut::<i32>()).unwrap();
        *w += 1;
        let err = borrow_read(&flag, &cell, |s| s.downcast_ref::<i32>()).unwrap_err();
        assert_eq!(err, BorrowFailure::Conflict(BorrowState::ExclusiveWrite));
        drop(w);
        assert_eq!(flag.state(), BorrowState::Free);
        let r = borrow_read(&flag, &cell, |s| s.downcast_ref::<i32>()).unwrap();
        assert_eq!(*r, 2);
    }

    #[test]
    fn test_read_excludes_write() {
        let (flag, cell) = cell(1);
        let _r = borrow_read(&flag, &cell, |s| s.downcast_ref::<i32>()).unwrap();
        let err = borrow_write(&flag, &cell, |s| s.downcast_mut::<i32>()).err();
        assert_eq!(err, Some(BorrowFailure::Conflict(BorrowState::SharedRead(1))));
    }

    #[test]
    fn test_wrong_type_releases_flag() {
        let (flag, cell) = cell(1);
        let err = borrow_write(&flag, &cell, |s| s.downcast_mut::<String>()).err();
        assert_eq!(err, Some(BorrowFailure::WrongType));
        assert_eq!(flag.state(), BorrowState::Free);
    }

    #[test]
    fn test_unwind_restores_free() {
        let (flag, cell) = cell(1);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _w = borrow_write(&flag, &cell, |s| s.downcast_mut::<i32>()).unwrap();
            panic!("mutator failed");
        }));
        assert!(result.is_err());
        assert_eq!(flag.state(), BorrowState::Free);
    }
}
