//! Windows and the Visual capability tier
//!
//! The runtime does not create or draw surfaces. It keeps the bookkeeping
//! the Visual tier needs: which windows exist, which entity holds focus in
//! each, and which windows asked to be redrawn. A rendering collaborator
//! drains the redraw requests with [`App::take_refresh_requests`].

use super::App;
use crate::arena::{AnyWeakHandle, Handle};
use crate::error::{Result, RuntimeError};
use hearth_types::{EntityId, WindowId};
use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};

pub(crate) mod sealed {
    pub trait Sealed {}
}

struct WindowState {
    title: String,
    focus: Option<AnyWeakHandle>,
    needs_refresh: bool,
}

impl WindowState {
    fn new(title: String) -> Self {
        Self {
            title,
            focus: None,
            needs_refresh: false,
        }
    }
}

pub(crate) struct WindowRegistry {
    windows: BTreeMap<WindowId, WindowState>,
}

impl WindowRegistry {
    pub(crate) fn new() -> Self {
        let mut windows = BTreeMap::new();
        windows.insert(WindowId::ROOT, WindowState::new("root".to_string()));
        Self { windows }
    }

    fn open(&mut self, title: String) -> WindowId {
        let id = WindowId::new();
        self.windows.insert(id, WindowState::new(title));
        id
    }

    fn close(&mut self, id: WindowId) -> bool {
        if id.is_root() {
            return false;
        }
        self.windows.remove(&id).is_some()
    }

    fn contains(&self, id: WindowId) -> bool {
        self.windows.contains_key(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.windows.len()
    }

    fn state_mut(&mut self, id: WindowId) -> Option<&mut WindowState> {
        let state = self.windows.get_mut(&id);
        if state.is_none() {
            tracing::warn!(window = %id, "window is closed; request ignored");
        }
        state
    }

    fn focused(&self, id: WindowId) -> Option<EntityId> {
        self.windows
            .get(&id)?
            .focus
            .as_ref()
            .filter(|handle| handle.is_alive())
            .map(AnyWeakHandle::entity_id)
    }
}

/// Operations available to the Visual tier and above
///
/// Implemented by [`WindowContext`] and [`Context<T>`](super::Context);
/// sealed so no other type can claim a window.
pub trait VisualContext: sealed::Sealed + DerefMut<Target = App> {
    /// The window this context is scoped to
    fn window_id(&self) -> WindowId;

    /// Give keyboard focus in this window to `handle`'s entity
    fn focus<E: 'static>(&mut self, handle: &Handle<E>) {
        let window = self.window_id();
        if let Some(state) = self.windows.state_mut(window) {
            state.focus = Some(handle.as_any().downgrade());
        }
    }

    /// Clear focus in this window
    fn blur(&mut self) {
        let window = self.window_id();
        if let Some(state) = self.windows.state_mut(window) {
            state.focus = None;
        }
    }

    /// Entity holding focus in this window, if it is still alive
    fn focused(&self) -> Option<EntityId> {
        self.windows.focused(self.window_id())
    }

    fn is_focused<E: 'static>(&self, handle: &Handle<E>) -> bool {
        self.focused() == Some(handle.entity_id())
    }

    /// Ask the renderer to redraw this window
    fn refresh(&mut self) {
        let window = self.window_id();
        if let Some(state) = self.windows.state_mut(window) {
            state.needs_refresh = true;
        }
    }

    fn window_title(&self) -> Option<&str> {
        self.windows
            .windows
            .get(&self.window_id())
            .map(|state| state.title.as_str())
    }
}

/// The Visual capability tier, scoped to one window
pub struct WindowContext<'a> {
    app: &'a mut App,
    window: WindowId,
}

impl WindowContext<'_> {
    /// Create an entity belonging to this window
    pub fn create<T: 'static>(
        &mut self,
        build: impl FnOnce(&mut super::Context<'_, T>) -> T,
    ) -> Result<crate::arena::Handle<T>> {
        self.app.create_in_window(self.window, build)
    }
}

impl Deref for WindowContext<'_> {
    type Target = App;

    fn deref(&self) -> &App {
        self.app
    }
}

impl DerefMut for WindowContext<'_> {
    fn deref_mut(&mut self) -> &mut App {
        self.app
    }
}

impl sealed::Sealed for WindowContext<'_> {}

impl VisualContext for WindowContext<'_> {
    fn window_id(&self) -> WindowId {
        self.window
    }
}

impl App {
    /// Register a new window
    pub fn open_window(&mut self, title: impl Into<String>) -> WindowId {
        let id = self.windows.open(title.into());
        tracing::debug!(window = %id, "opened window");
        id
    }

    /// Forget a window; returns whether it was open
    ///
    /// The root scope cannot be closed. Entities created in a closed window
    /// stay alive, but their window-scoped requests are ignored.
    pub fn close_window(&mut self, window: WindowId) -> bool {
        let closed = self.windows.close(window);
        if closed {
            tracing::debug!(%window, "closed window");
        } else if !window.is_root() {
            tracing::warn!(%window, "close requested for unknown window");
        }
        closed
    }

    /// Enter the Visual tier for `window`
    pub fn update_window<R>(
        &mut self,
        window: WindowId,
        update: impl FnOnce(&mut WindowContext<'_>) -> R,
    ) -> Result<R> {
        if !self.windows.contains(window) {
            return Err(RuntimeError::WindowNotFound(window));
        }
        let result = {
            let _scope = self.update_depth.enter();
            let mut cx = WindowContext { app: self, window };
            update(&mut cx)
        };
        self.flush_effects();
        Ok(result)
    }

    /// Ids of all open windows, root first
    pub fn window_ids(&self) -> Vec<WindowId> {
        self.windows.windows.keys().copied().collect()
    }

    /// Windows that asked to be redrawn since the last call
    pub fn take_refresh_requests(&mut self) -> Vec<WindowId> {
        self.windows
            .windows
            .iter_mut()
            .filter_map(|(id, state)| std::mem::take(&mut state.needs_refresh).then_some(*id))
            .collect()
    }
}
