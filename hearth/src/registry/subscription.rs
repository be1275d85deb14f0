//! Subscription handles
//!
//! A [`Subscription`] owns the removal of one registry entry. Dropping it
//! removes the entry immediately; [`Subscription::detach`] hands the entry
//! over to the registry, which keeps it until the observed entity is gone.

use std::fmt;

/// Handle controlling the lifetime of an observer or event subscriber
#[must_use = "dropping a Subscription unregisters it; call `detach` to keep it"]
pub struct Subscription {
    unsubscribe: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    /// Create a subscription that runs `unsubscribe` when dropped
    pub fn new(unsubscribe: impl FnOnce() + 'static) -> Self {
        Self {
            unsubscribe: Some(Box::new(unsubscribe)),
        }
    }

    /// Keep the registration alive for as long as its target lives
    pub fn detach(mut self) {
        self.unsubscribe.take();
    }

    /// Merge several subscriptions into one that drops them together
    pub fn join(subscriptions: impl IntoIterator<Item = Subscription>) -> Self {
        let subscriptions: Vec<Subscription> = subscriptions.into_iter().collect();
        Self::new(move || drop(subscriptions))
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("attached", &self.unsubscribe.is_some())
            .finish()
    }
}
