//! Process-wide singletons keyed by type

use super::App;
use crate::error::{Result, RuntimeError};
use std::any::{type_name, Any, TypeId};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

/// Marker for types that can be stored as a global
///
/// At most one value of each global type exists per app.
pub trait Global: 'static {}

#[derive(Default)]
pub(crate) struct GlobalRegistry {
    values: HashMap<TypeId, Box<dyn Any>>,
    leased: Rc<RefCell<HashSet<TypeId>>>,
}

impl GlobalRegistry {
    pub(crate) fn len(&self) -> usize {
        self.values.len() + self.leased.borrow().len()
    }

    fn lease<G: Global>(&mut self) -> Result<(Box<G>, Lease)> {
        let id = TypeId::of::<G>();
        if self.leased.borrow().contains(&id) {
            return Err(RuntimeError::GlobalBorrowed(type_name::<G>()));
        }
        let value = self
            .values
            .remove(&id)
            .ok_or(RuntimeError::GlobalNotFound(type_name::<G>()))?;
        let value = value
            .downcast::<G>()
            .map_err(|_| RuntimeError::GlobalNotFound(type_name::<G>()))?;
        self.leased.borrow_mut().insert(id);
        let lease = Lease {
            id,
            leased: self.leased.clone(),
        };
        Ok((value, lease))
    }
}

/// Marks a global as taken out of the registry for an update
struct Lease {
    id: TypeId,
    leased: Rc<RefCell<HashSet<TypeId>>>,
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.leased.borrow_mut().remove(&self.id);
    }
}

impl App {
    /// Install or replace the global of type `G`
    pub fn set_global<G: Global>(&mut self, global: G) {
        let id = TypeId::of::<G>();
        if self.globals.leased.borrow().contains(&id) {
            tracing::warn!(global = type_name::<G>(), "global replaced while being updated");
        }
        self.globals.values.insert(id, Box::new(global));
    }

    /// Borrow the global of type `G`
    pub fn global<G: Global>(&self) -> Result<&G> {
        let id = TypeId::of::<G>();
        if self.globals.leased.borrow().contains(&id) {
            return Err(RuntimeError::GlobalBorrowed(type_name::<G>()));
        }
        self.globals
            .values
            .get(&id)
            .and_then(|value| value.downcast_ref::<G>())
            .ok_or(RuntimeError::GlobalNotFound(type_name::<G>()))
    }

    pub fn try_global<G: Global>(&self) -> Option<&G> {
        self.global::<G>().ok()
    }

    pub fn has_global<G: Global>(&self) -> bool {
        self.globals.values.contains_key(&TypeId::of::<G>())
    }

    /// Mutate the global of type `G` with full app access
    ///
    /// The global is out of the registry while `update` runs, so reading it
    /// through `app` reports [`RuntimeError::GlobalBorrowed`]. It is put back
    /// even if `update` panics, unless `update` installed a replacement.
    pub fn update_global<G: Global, R>(&mut self, update: impl FnOnce(&mut G, &mut App) -> R) -> Result<R> {
        let (value, lease) = self.globals.lease::<G>()?;
        let result = {
            let _lease = lease;
            let _scope = self.update_depth.enter();
            let mut restore = Restore {
                app: self,
                value: Some(value),
            };
            let Restore { app, value } = &mut restore;
            let global = value
                .as_deref_mut()
                .ok_or(RuntimeError::GlobalNotFound(type_name::<G>()))?;
            update(global, app)
        };
        self.flush_effects();
        Ok(result)
    }

    /// Remove and return the global of type `G`
    pub fn remove_global<G: Global>(&mut self) -> Option<G> {
        self.globals
            .values
            .remove(&TypeId::of::<G>())
            .and_then(|value| value.downcast::<G>().ok())
            .map(|value| *value)
    }
}

/// Puts an updated global back into the registry
struct Restore<'a, G: Global> {
    app: &'a mut App,
    value: Option<Box<G>>,
}

impl<G: Global> Drop for Restore<'_, G> {
    fn drop(&mut self) {
        if let Some(value) = self.value.take() {
            self.app
                .globals
                .values
                .entry(TypeId::of::<G>())
                .or_insert(value);
        }
    }
}
