#![forbid(unsafe_code)]

//! Subscriber bookkeeping shared by cells and namespaces.
//!
//! Callbacks are owned by the [`Subscription`] guard handed to the caller and
//! referenced weakly by the wrapper. Releasing the guard makes the callback
//! unreachable immediately; the dead weak entry is pruned at the next
//! notification.

use std::any::Any;
use std::fmt;
use std::rc::{Rc, Weak};

/// Weakly-held subscriber callbacks in registration order.
pub(crate) struct SubscriberList<F: ?Sized> {
    entries: Vec<Weak<F>>,
}

impl<F: ?Sized> SubscriberList<F> {
    pub(crate) fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub(crate) fn add(&mut self, callback: &Rc<F>) {
        self.entries.push(Rc::downgrade(callback));
    }

    /// Prune dead entries and return the live ones in registration order.
    ///
    /// Callers upgrade each entry right before invoking it, so a callback
    /// unsubscribed by an earlier callback in the same round is skipped.
    pub(crate) fn snapshot(&mut self) -> Vec<Weak<F>> {
        self.entries.retain(|weak| weak.strong_count() > 0);
        self.entries.clone()
    }

    /// Registered entries, including dead ones not yet pruned.
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Guard for a subscriber callback.
///
/// The callback stays registered while the guard holds it. Calling
/// [`unsubscribe`](Subscription::unsubscribe) or dropping the guard removes
/// it; later calls to `unsubscribe` do nothing.
#[must_use = "the callback is unsubscribed when the guard is dropped"]
pub struct Subscription {
    /// Type-erased strong reference keeping the callback `Rc` alive.
    guard: Option<Box<dyn Any>>,
}

impl Subscription {
    pub(crate) fn new<F: ?Sized + 'static>(callback: Rc<F>) -> Self {
        Self {
            guard: Some(Box::new(callback)),
        }
    }

    /// Stop receiving notifications. Returns `false` if already unsubscribed.
    pub fn unsubscribe(&mut self) -> bool {
        self.guard.take().is_some()
    }

    /// Whether the callback is still subscribed.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.guard.is_some()
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}
