//! Subscription teardown guard

/// Handle to an active subscription.
///
/// Dropping the handle (or calling [`unsubscribe`](Self::unsubscribe))
/// removes every listener it owns, so no further notification reaches the
/// callback. [`detach`](Self::detach) keeps the listeners alive for the
/// lifetime of their store instead.
#[must_use = "dropping a Subscription immediately unsubscribes"]
pub struct Subscription {
    cleanups: Vec<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub(crate) fn new(cleanup: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cleanups: vec![Box::new(cleanup)],
        }
    }

    pub(crate) fn merge(subs: Vec<Subscription>) -> Self {
        let mut cleanups = Vec::new();
        for mut sub in subs {
            cleanups.append(&mut sub.cleanups);
        }
        Self { cleanups }
    }

    /// Tear down every listener owned by this subscription
    pub fn unsubscribe(self) {
        drop(self);
    }

    /// Leave the listeners registered for the lifetime of their store
    pub fn detach(mut self) {
        self.cleanups.clear();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        for cleanup in self.cleanups.drain(..) {
            cleanup();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("listeners", &self.cleanups.len())
            .finish()
    }
}
