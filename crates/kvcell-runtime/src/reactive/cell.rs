#![forbid(unsafe_code)]

//! Single-key reactive wrapper over a storage backend.
//!
//! # Design
//!
//! [`StorageCell<T>`] binds one raw key on one backend to a cached, typed
//! value. Writes go through the codec to the backend and update the cache
//! before returning; reads never touch the backend. When the value changes
//! (as decided by the configured equality predicate), all live subscribers
//! are notified in registration order.
//!
//! Each cell registers with a [`Dispatcher`](crate::dispatcher::Dispatcher)
//! under its exact key. An external-change event for that key re-reads the
//! backend and notifies only if the parsed value differs from the cache, so
//! an event echoing this cell's own write is silent.
//!
//! # Performance
//!
//! | Operation     | Complexity                        |
//! |---------------|-----------------------------------|
//! | `get()`       | O(1) + clone of `T`               |
//! | `set()`       | one backend write + O(S) notify   |
//! | `refresh()`   | one backend read + parse          |
//! | `subscribe()` | O(1) amortized                    |
//!
//! # Failure Modes
//!
//! - **Unparseable stored value**: the cache becomes `None` and the error
//!   goes to the log and the configured error hook. Never returned.
//! - **Backend write fails**: `set`/`remove` return the error; the cache is
//!   left as it was.
//! - **Equality predicate panics**: the panic propagates to the caller.
//! - **Subscriber leak**: callbacks live as long as their [`Subscription`]
//!   guard. Dead weak entries are pruned lazily during notification.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use kvcell_core::{BackendRef, Equality, SharedCodec, StorageError, StorageEvent};
use tracing::{debug, trace};

use super::subscription::{SubscriberList, Subscription};
use crate::config::{CellConfig, ErrorHook, report};
use crate::dispatcher::{ExternalChange, KeyFilter, Registration};

type Callback<T> = dyn Fn(Option<&T>);

/// Mutable part of a cell.
struct CellState<T> {
    value: Option<T>,
    version: u64,
    /// Subscribers stored as weak references. Dead entries are pruned on notify.
    subscribers: SubscriberList<Callback<T>>,
    registration: Option<Registration>,
}

/// Shared interior for [`StorageCell<T>`].
struct CellCore<T> {
    key: String,
    backend: BackendRef,
    codec: SharedCodec<T>,
    equals: Equality<T>,
    fallback: Option<T>,
    on_error: Option<ErrorHook>,
    state: RefCell<CellState<T>>,
}

impl<T: Clone + 'static> CellCore<T> {
    /// Parse a raw value; failures are reported and read as `None`.
    fn decode(&self, raw: &str) -> Option<T> {
        match self.codec.parse(raw) {
            Ok(value) => Some(value),
            Err(source) => {
                let err = StorageError::codec(&self.key, source);
                report(self.on_error.as_ref(), &self.key, &err);
                None
            }
        }
    }

    /// Current backend value as this cell would cache it.
    fn read(&self) -> Result<Option<T>, StorageError> {
        Ok(match self.backend.get_item(&self.key)? {
            Some(raw) => self.decode(&raw),
            None => self.fallback.clone(),
        })
    }

    /// Write `value` unless it equals the cache. Returns whether it wrote.
    fn store(&self, value: T) -> Result<bool, StorageError> {
        let raw = {
            let state = self.state.borrow();
            if (self.equals)(state.value.as_ref(), Some(&value)) {
                trace!(key = %self.key, "write suppressed: value unchanged");
                return Ok(false);
            }
            self.codec
                .stringify(&value)
                .map_err(|source| StorageError::codec(&self.key, source))?
        };
        self.backend.set_item(&self.key, &raw)?;
        debug!(key = %self.key, backend = self.backend.kind(), "cell write");
        self.state.borrow_mut().value = Some(value);
        Ok(true)
    }

    fn set(&self, value: T) -> Result<(), StorageError> {
        if self.store(value)? {
            self.state.borrow_mut().version += 1;
            self.notify();
        }
        Ok(())
    }

    fn remove(&self) -> Result<(), StorageError> {
        if !self.backend.contains_key(&self.key)? {
            return Ok(());
        }
        self.backend.remove_item(&self.key)?;
        debug!(key = %self.key, backend = self.backend.kind(), "cell remove");
        {
            let mut state = self.state.borrow_mut();
            state.value = self.fallback.clone();
            state.version += 1;
        }
        self.notify();
        Ok(())
    }

    fn refresh(&self) -> Result<bool, StorageError> {
        let fresh = self.read()?;
        let unchanged = {
            let state = self.state.borrow();
            (self.equals)(state.value.as_ref(), fresh.as_ref())
        };
        if unchanged {
            trace!(key = %self.key, "refresh suppressed: value unchanged");
            return Ok(false);
        }
        {
            let mut state = self.state.borrow_mut();
            state.value = fresh;
            state.version += 1;
        }
        debug!(key = %self.key, "cell refreshed from backend");
        self.notify();
        Ok(true)
    }

    /// Notify live subscribers with the cached value.
    ///
    /// A subscriber that changes the cell starts a nested round carrying the
    /// newer value to everyone; the outer round then stops, so no subscriber
    /// sees the superseded value last.
    fn notify(&self) {
        // Collect first so no borrow is held while callbacks run.
        let (value, version, subscribers) = {
            let mut state = self.state.borrow_mut();
            let subscribers = state.subscribers.snapshot();
            (state.value.clone(), state.version, subscribers)
        };
        for weak in subscribers {
            if self.state.borrow().version != version {
                trace!(key = %self.key, "notify round superseded by nested change");
                return;
            }
            if let Some(callback) = weak.upgrade() {
                callback(value.as_ref());
            }
        }
    }
}

impl<T: Clone + 'static> ExternalChange for CellCore<T> {
    fn on_external_change(&self, _event: &StorageEvent) {
        if let Err(err) = self.refresh() {
            report(self.on_error.as_ref(), &self.key, &err);
        }
    }
}

/// A typed, cached, observable view of one backend entry.
///
/// Cloning a `StorageCell` creates a new handle to the **same** cell: both
/// handles share the cache and subscribers. Two cells constructed separately
/// for the same key keep separate caches that converge through the
/// dispatcher.
///
/// # Invariants
///
/// 1. After a successful `set`/`remove` returns, the cache reflects it.
/// 2. `set(v)` where `equals(cached, v)` is a no-op: no write, no version
///    bump, no notification.
/// 3. `version` increments by exactly 1 per change of the cached value.
/// 4. Subscribers are notified in registration order.
pub struct StorageCell<T> {
    core: Rc<CellCore<T>>,
}

// Manual Clone: shares the same Rc.
impl<T> Clone for StorageCell<T> {
    fn clone(&self) -> Self {
        Self {
            core: Rc::clone(&self.core),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for StorageCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.core.state.borrow();
        f.debug_struct("StorageCell")
            .field("key", &self.core.key)
            .field("backend", &self.core.backend)
            .field("value", &state.value)
            .field("version", &state.version)
            .field("subscriber_count", &state.subscribers.len())
            .finish()
    }
}

impl<T: Clone + 'static> StorageCell<T> {
    /// Create a cell from `config`.
    ///
    /// If the backend already holds the key, its parsed value is cached.
    /// Otherwise the configured initial value (if any) is written, compared
    /// against an empty cache, and failing that the fallback is cached.
    pub fn new(config: CellConfig<T>) -> Result<Self, StorageError> {
        let CellConfig {
            key,
            backend,
            codec,
            equals,
            initial,
            fallback,
            dispatcher,
            on_error,
        } = config;

        let core = Rc::new(CellCore {
            key,
            backend,
            codec,
            equals,
            fallback,
            on_error,
            state: RefCell::new(CellState {
                value: None,
                version: 0,
                subscribers: SubscriberList::new(),
                registration: None,
            }),
        });

        match core.backend.get_item(&core.key)? {
            Some(raw) => core.state.borrow_mut().value = core.decode(&raw),
            None => {
                let wrote = match initial {
                    Some(value) => core.store(value)?,
                    None => false,
                };
                if !wrote {
                    core.state.borrow_mut().value = core.fallback.clone();
                }
            }
        }

        let target: Weak<CellCore<T>> = Rc::downgrade(&core);
        let id = dispatcher.register(&core.backend, KeyFilter::Exact(core.key.clone()), target);
        core.state.borrow_mut().registration = Some(Registration::new(dispatcher, id));

        Ok(Self { core })
    }

    /// Get a clone of the cached value. Never touches the backend.
    #[must_use]
    pub fn get(&self) -> Option<T> {
        self.core.state.borrow().value.clone()
    }

    /// Access the cached value by reference without cloning.
    ///
    /// # Panics
    ///
    /// Panics if `f` calls anything on this cell that mutates its state:
    /// `set`, `update`, `remove`, `refresh`, `subscribe`, or `detach`.
    /// Reading through `get` or `with` is fine.
    pub fn with<R>(&self, f: impl FnOnce(Option<&T>) -> R) -> R {
        f(self.core.state.borrow().value.as_ref())
    }

    /// Write `value` and notify subscribers, unless it equals the cache.
    ///
    /// On error the cache is unchanged.
    pub fn set(&self, value: T) -> Result<(), StorageError> {
        self.core.set(value)
    }

    /// Modify a copy of the cached value; leaving `None` removes the entry.
    pub fn update(&self, f: impl FnOnce(&mut Option<T>)) -> Result<(), StorageError> {
        let mut next = self.get();
        f(&mut next);
        match next {
            Some(value) => self.set(value),
            None => self.remove(),
        }
    }

    /// Delete the backend entry and notify, unless it is already absent.
    ///
    /// The cache becomes the fallback value (`None` by default).
    pub fn remove(&self) -> Result<(), StorageError> {
        self.core.remove()
    }

    /// Subscribe to value changes.
    ///
    /// The callback receives the new cached value each time it changes.
    /// Dropping the returned guard, or calling
    /// [`Subscription::unsubscribe`], stops delivery.
    pub fn subscribe(&self, callback: impl Fn(Option<&T>) + 'static) -> Subscription {
        let strong: Rc<Callback<T>> = Rc::new(callback);
        self.core.state.borrow_mut().subscribers.add(&strong);
        Subscription::new(strong)
    }

    /// Re-read the backend, notifying if the parsed value differs.
    ///
    /// This is what an external-change event triggers; call it directly to
    /// poll. Returns whether the cache changed.
    pub fn refresh(&self) -> Result<bool, StorageError> {
        self.core.refresh()
    }

    /// Stop receiving external-change events. Returns `false` if already
    /// detached.
    pub fn detach(&self) -> bool {
        let registration = self.core.state.borrow_mut().registration.take();
        registration.is_some_and(|registration| registration.cancel())
    }

    /// Whether external-change events still reach this cell.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.core
            .state
            .borrow()
            .registration
            .as_ref()
            .is_some_and(Registration::is_active)
    }

    /// Raw backend key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.core.key
    }

    #[must_use]
    pub fn backend(&self) -> &BackendRef {
        &self.core.backend
    }

    /// Number of value changes observed so far.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.core.state.borrow().version
    }

    /// Number of registered subscribers (including dead ones not yet pruned).
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.core.state.borrow().subscribers.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
