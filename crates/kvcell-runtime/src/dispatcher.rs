#![forbid(unsafe_code)]

//! External-change dispatcher.
//!
//! The host delivers one stream of [`StorageEvent`]s for the whole process;
//! the dispatcher fans each event out to the cells and namespaces watching
//! the affected key on the affected backend.
//!
//! # Design
//!
//! Registrations are a lookup relation, never ownership: each entry holds a
//! `Weak` reference to its target, so a cell can be dropped without telling
//! the dispatcher. Dead entries are pruned lazily at the next dispatch, or
//! eagerly through [`Dispatcher::unregister`] / [`Dispatcher::prune`].
//!
//! # Invariants
//!
//! 1. Matching targets are invoked synchronously in registration order.
//! 2. A registration removed before or during a dispatch is not invoked by
//!    it (unless it already ran).
//! 3. No internal borrow is held while a target runs, so targets may
//!    register, unregister, or dispatch re-entrantly.
//! 4. Clear events (`key == None`) match every registration on the backend.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use kvcell_core::{BackendId, BackendRef, StorageError, StorageEvent};
use tracing::{debug, trace};

/// Receiver of external-change events.
pub trait ExternalChange {
    /// Called once per matching event.
    fn on_external_change(&self, event: &StorageEvent);
}

/// Which raw keys a registration is interested in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyFilter {
    /// Exactly this key.
    Exact(String),
    /// Any key starting with this prefix (empty prefix matches all).
    Prefix(String),
}

impl KeyFilter {
    /// Whether an event for `key` concerns this filter. `None` is a clear.
    #[must_use]
    pub fn matches(&self, key: Option<&str>) -> bool {
        match (self, key) {
            (_, None) => true,
            (Self::Exact(expected), Some(key)) => expected == key,
            (Self::Prefix(prefix), Some(key)) => key.starts_with(prefix.as_str()),
        }
    }
}

/// Handle identifying one registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegistrationId(u64);

struct Entry {
    id: RegistrationId,
    backend: BackendId,
    filter: KeyFilter,
    target: Weak<dyn ExternalChange>,
}

struct DispatcherInner {
    entries: Vec<Entry>,
    next_id: u64,
}

/// Registry routing external-change events to interested wrappers.
///
/// Cloning a `Dispatcher` creates a new handle to the **same** registry.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Rc<RefCell<DispatcherInner>>,
}

thread_local! {
    /// Shared dispatcher for this thread.
    static GLOBAL: Dispatcher = Dispatcher::new();
}

impl Dispatcher {
    /// Create an empty, isolated registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(DispatcherInner {
                entries: Vec::new(),
                next_id: 1,
            })),
        }
    }

    /// The shared registry of the current thread.
    ///
    /// Cells and namespaces register here unless their config names another
    /// dispatcher.
    #[must_use]
    pub fn global() -> Self {
        GLOBAL.with(Dispatcher::clone)
    }

    /// Whether both handles refer to the same registry.
    #[must_use]
    pub fn ptr_eq(&self, other: &Dispatcher) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Register `target` for events on `backend` matching `filter`.
    pub fn register(
        &self,
        backend: &BackendRef,
        filter: KeyFilter,
        target: Weak<dyn ExternalChange>,
    ) -> RegistrationId {
        let mut inner = self.inner.borrow_mut();
        let id = RegistrationId(inner.next_id);
        inner.next_id += 1;
        trace!(id = id.0, ?filter, "registered external-change target");
        inner.entries.push(Entry {
            id,
            backend: backend.id(),
            filter,
            target,
        });
        id
    }

    /// Remove a registration. Returns `false` if it was already gone.
    pub fn unregister(&self, id: RegistrationId) -> bool {
        let mut inner = self.inner.borrow_mut();
        let before = inner.entries.len();
        inner.entries.retain(|entry| entry.id != id);
        inner.entries.len() != before
    }

    /// Whether `id` is still registered.
    #[must_use]
    pub fn is_registered(&self, id: RegistrationId) -> bool {
        self.inner
            .borrow()
            .entries
            .iter()
            .any(|entry| entry.id == id)
    }

    /// Drop registrations whose target no longer exists.
    pub fn prune(&self) -> usize {
        let mut inner = self.inner.borrow_mut();
        let before = inner.entries.len();
        inner.entries.retain(|entry| entry.target.strong_count() > 0);
        before - inner.entries.len()
    }

    /// Number of registrations, including dead ones not yet pruned.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.borrow().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `event` to every matching live registrant.
    ///
    /// Returns the number of targets invoked.
    pub fn dispatch(&self, event: &StorageEvent) -> usize {
        let backend = event.storage_area.id();
        let key = event.key.as_deref();

        let targets: Vec<(RegistrationId, Weak<dyn ExternalChange>)> = {
            let mut inner = self.inner.borrow_mut();
            let before = inner.entries.len();
            inner.entries.retain(|entry| entry.target.strong_count() > 0);
            let pruned = before - inner.entries.len();
            if pruned > 0 {
                trace!(pruned, "pruned dropped registrants");
            }
            inner
                .entries
                .iter()
                .filter(|entry| entry.backend == backend && entry.filter.matches(key))
                .map(|entry| (entry.id, entry.target.clone()))
                .collect()
        };

        let mut invoked = 0;
        for (id, target) in targets {
            if !self.is_registered(id) {
                continue;
            }
            let Some(target) = target.upgrade() else {
                continue;
            };
            target.on_external_change(event);
            invoked += 1;
        }
        trace!(key, invoked, "dispatched storage event");
        invoked
    }

    /// Poll `backend` for outside writes and dispatch each resulting event.
    ///
    /// Returns the total number of target invocations.
    pub fn poll(&self, backend: &BackendRef) -> Result<usize, StorageError> {
        let events = backend.poll_events()?;
        if !events.is_empty() {
            debug!(
                backend = backend.kind(),
                events = events.len(),
                "dispatching polled changes"
            );
        }
        Ok(events.iter().map(|event| self.dispatch(event)).sum())
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registrations", &self.len())
            .finish()
    }
}

/// A registration bound to the dispatcher that holds it.
#[derive(Debug, Clone)]
pub(crate) struct Registration {
    dispatcher: Dispatcher,
    id: RegistrationId,
}

impl Registration {
    pub(crate) fn new(dispatcher: Dispatcher, id: RegistrationId) -> Self {
        Self { dispatcher, id }
    }

    pub(crate) fn cancel(&self) -> bool {
        self.dispatcher.unregister(self.id)
    }

    pub(crate) fn is_active(&self) -> bool {
        self.dispatcher.is_registered(self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kvcell_core::MemoryBackend;
    use std::cell::Cell;

    struct Probe {
        name: char,
        log: Rc<RefCell<Vec<char>>>,
    }

    impl ExternalChange for Probe {
        fn on_external_change(&self, _event: &StorageEvent) {
            self.log.borrow_mut().push(self.name);
        }
    }

    fn probe(name: char, log: &Rc<RefCell<Vec<char>>>) -> Rc<Probe> {
        Rc::new(Probe {
            name,
            log: Rc::clone(log),
        })
    }

    fn weak(target: &Rc<Probe>) -> Weak<dyn ExternalChange> {
        let weak: Weak<Probe> = Rc::downgrade(target);
        weak
    }

    #[test]
    fn filter_matching() {
        assert!(KeyFilter::Exact("a".into()).matches(Some("a")));
        assert!(!KeyFilter::Exact("a".into()).matches(Some("ab")));
        assert!(KeyFilter::Prefix("ns:".into()).matches(Some("ns:a")));
        assert!(!KeyFilter::Prefix("ns:".into()).matches(Some("other:a")));
        assert!(KeyFilter::Prefix(String::new()).matches(Some("anything")));
        assert!(KeyFilter::Exact("a".into()).matches(None));
    }

    #[test]
    fn routes_by_backend_and_key_in_order() {
        let dispatcher = Dispatcher::new();
        let backend = BackendRef::new(MemoryBackend::new());
        let other = BackendRef::new(MemoryBackend::new());
        let log = Rc::new(RefCell::new(Vec::new()));

        let a = probe('A', &log);
        let b = probe('B', &log);
        let c = probe('C', &log);
        let d = probe('D', &log);
        dispatcher.register(&backend, KeyFilter::Exact("k".into()), weak(&a));
        dispatcher.register(&other, KeyFilter::Exact("k".into()), weak(&b));
        dispatcher.register(&backend, KeyFilter::Prefix("k".into()), weak(&c));
        dispatcher.register(&backend, KeyFilter::Exact("j".into()), weak(&d));

        let invoked = dispatcher.dispatch(&StorageEvent::changed(&backend, "k", None));
        assert_eq!(invoked, 2);
        assert_eq!(*log.borrow(), vec!['A', 'C']);
    }

    #[test]
    fn clear_reaches_every_registrant_on_backend() {
        let dispatcher = Dispatcher::new();
        let backend = BackendRef::new(MemoryBackend::new());
        let log = Rc::new(RefCell::new(Vec::new()));
        let a = probe('A', &log);
        let b = probe('B', &log);
        dispatcher.register(&backend, KeyFilter::Exact("x".into()), weak(&a));
        dispatcher.register(&backend, KeyFilter::Prefix("ns:".into()), weak(&b));

        assert_eq!(dispatcher.dispatch(&StorageEvent::cleared(&backend)), 2);
    }

    #[test]
    fn dropped_targets_are_pruned_lazily() {
        let dispatcher = Dispatcher::new();
        let backend = BackendRef::new(MemoryBackend::new());
        let log = Rc::new(RefCell::new(Vec::new()));
        let a = probe('A', &log);
        let b = probe('B', &log);
        dispatcher.register(&backend, KeyFilter::Exact("k".into()), weak(&a));
        dispatcher.register(&backend, KeyFilter::Exact("k".into()), weak(&b));

        drop(a);
        assert_eq!(dispatcher.len(), 2);
        dispatcher.dispatch(&StorageEvent::changed(&backend, "k", None));
        assert_eq!(dispatcher.len(), 1);
        assert_eq!(*log.borrow(), vec!['B']);
    }

    #[test]
    fn unregistered_targets_are_skipped() {
        let dispatcher = Dispatcher::new();
        let backend = BackendRef::new(MemoryBackend::new());
        let log = Rc::new(RefCell::new(Vec::new()));
        let a = probe('A', &log);
        let id = dispatcher.register(&backend, KeyFilter::Exact("k".into()), weak(&a));

        assert!(dispatcher.unregister(id));
        assert!(!dispatcher.unregister(id));
        assert_eq!(
            dispatcher.dispatch(&StorageEvent::changed(&backend, "k", None)),
            0
        );
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn teardown_during_dispatch_skips_later_target() {
        struct Killer {
            dispatcher: Dispatcher,
            victim: Cell<Option<RegistrationId>>,
        }
        impl ExternalChange for Killer {
            fn on_external_change(&self, _event: &StorageEvent) {
                if let Some(id) = self.victim.take() {
                    self.dispatcher.unregister(id);
                }
            }
        }

        let dispatcher = Dispatcher::new();
        let backend = BackendRef::new(MemoryBackend::new());
        let log = Rc::new(RefCell::new(Vec::new()));
        let killer = Rc::new(Killer {
            dispatcher: dispatcher.clone(),
            victim: Cell::new(None),
        });
        let victim = probe('V', &log);

        let killer_weak: Weak<Killer> = Rc::downgrade(&killer);
        dispatcher.register(&backend, KeyFilter::Exact("k".into()), killer_weak);
        let id = dispatcher.register(&backend, KeyFilter::Exact("k".into()), weak(&victim));
        killer.victim.set(Some(id));

        assert_eq!(
            dispatcher.dispatch(&StorageEvent::changed(&backend, "k", None)),
            1
        );
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn global_is_shared_per_thread() {
        assert!(Dispatcher::global().ptr_eq(&Dispatcher::global()));
        assert!(!Dispatcher::new().ptr_eq(&Dispatcher::global()));
    }

    #[test]
    fn poll_without_changes_dispatches_nothing() {
        let dispatcher = Dispatcher::new();
        let backend = BackendRef::new(MemoryBackend::new());
        assert_eq!(dispatcher.poll(&backend).unwrap(), 0);
    }
}
