#![forbid(unsafe_code)]

//! Prefix-scoped multi-key wrapper.
//!
//! # Design
//!
//! A [`Namespace<T>`] manages every backend key starting with its prefix
//! (`name:` when named, empty otherwise). It keeps no cache: each `get`
//! re-reads the backend, and each `set` writes and notifies even when the
//! value is unchanged, since there is nothing to compare against.
//!
//! Subscribers share one list and receive the short (unprefixed) key that
//! changed, or `None` when the whole backend was cleared externally.
//!
//! # Invariants
//!
//! 1. Every managed key is stored at `prefix + key`.
//! 2. `keys()` is exactly the backend keys with the prefix, stripped, in
//!    backend enumeration order.
//! 3. `remove` and `clear` never touch keys outside the prefix and never
//!    notify for keys that were absent.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use kvcell_core::{BackendRef, SharedCodec, StorageError, StorageEvent};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::cell::StorageCell;
use super::subscription::{SubscriberList, Subscription};
use crate::config::{CellConfig, ErrorHook, NamespaceConfig, report};
use crate::dispatcher::{Dispatcher, ExternalChange, KeyFilter, Registration};

type Callback = dyn Fn(Option<&str>);

struct NamespaceCore<T> {
    prefix: String,
    backend: BackendRef,
    codec: SharedCodec<T>,
    dispatcher: Dispatcher,
    on_error: Option<ErrorHook>,
    subscribers: RefCell<SubscriberList<Callback>>,
    registration: RefCell<Option<Registration>>,
}

impl<T> NamespaceCore<T> {
    fn raw_key(&self, key: &str) -> String {
        format!("{}{key}", self.prefix)
    }

    fn notify(&self, key: Option<&str>) {
        let subscribers = self.subscribers.borrow_mut().snapshot();
        for weak in subscribers {
            if let Some(callback) = weak.upgrade() {
                callback(key);
            }
        }
    }
}

impl<T: 'static> ExternalChange for NamespaceCore<T> {
    fn on_external_change(&self, event: &StorageEvent) {
        match event.key.as_deref() {
            Some(raw) => {
                if let Some(short) = raw.strip_prefix(self.prefix.as_str()) {
                    debug!(prefix = %self.prefix, key = short, "namespace key changed externally");
                    self.notify(Some(short));
                }
            }
            None => {
                debug!(prefix = %self.prefix, "namespace backend cleared externally");
                self.notify(None);
            }
        }
    }
}

/// A prefix-scoped, observable view of many backend entries.
///
/// Cloning a `Namespace` creates a new handle to the **same** namespace.
pub struct Namespace<T = serde_json::Value> {
    core: Rc<NamespaceCore<T>>,
}

impl<T> Clone for Namespace<T> {
    fn clone(&self) -> Self {
        Self {
            core: Rc::clone(&self.core),
        }
    }
}

impl<T> fmt::Debug for Namespace<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Namespace")
            .field("prefix", &self.core.prefix)
            .field("backend", &self.core.backend)
            .field("subscriber_count", &self.core.subscribers.borrow().len())
            .finish()
    }
}

impl<T: 'static> Namespace<T> {
    /// Create a namespace and register it for external changes under its
    /// prefix.
    #[must_use]
    pub fn new(config: NamespaceConfig<T>) -> Self {
        let prefix = config.prefix();
        let NamespaceConfig {
            backend,
            codec,
            dispatcher,
            on_error,
            ..
        } = config;

        let core = Rc::new(NamespaceCore {
            prefix,
            backend,
            codec,
            dispatcher,
            on_error,
            subscribers: RefCell::new(SubscriberList::new()),
            registration: RefCell::new(None),
        });

        let target: Weak<NamespaceCore<T>> = Rc::downgrade(&core);
        let id = core.dispatcher.register(
            &core.backend,
            KeyFilter::Prefix(core.prefix.clone()),
            target,
        );
        *core.registration.borrow_mut() =
            Some(Registration::new(core.dispatcher.clone(), id));

        Self { core }
    }

    /// Write `value` under `key` and notify. Never suppressed.
    pub fn set(&self, key: &str, value: &T) -> Result<(), StorageError> {
        let raw_key = self.core.raw_key(key);
        let raw = self
            .core
            .codec
            .stringify(value)
            .map_err(|source| StorageError::codec(&raw_key, source))?;
        self.core.backend.set_item(&raw_key, &raw)?;
        debug!(key = %raw_key, "namespace write");
        self.core.notify(Some(key));
        Ok(())
    }

    /// Read `key`. Absent and unparseable entries read as `None`; parse
    /// failures are reported, not returned.
    pub fn get(&self, key: &str) -> Result<Option<T>, StorageError> {
        let raw_key = self.core.raw_key(key);
        let Some(raw) = self.core.backend.get_item(&raw_key)? else {
            return Ok(None);
        };
        match self.core.codec.parse(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(source) => {
                let err = StorageError::codec(&raw_key, source);
                report(self.core.on_error.as_ref(), &raw_key, &err);
                Ok(None)
            }
        }
    }

    /// Read several keys into a mapping ordered like `keys`.
    ///
    /// Missing keys map to `None`.
    pub fn get_many<I, K>(&self, keys: I) -> Result<IndexMap<String, Option<T>>, StorageError>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let mut values = IndexMap::new();
        for key in keys {
            let key = key.as_ref();
            let value = self.get(key)?;
            values.insert(key.to_owned(), value);
        }
        Ok(values)
    }

    /// Delete `key` and notify; absent keys are a silent no-op.
    pub fn remove(&self, key: &str) -> Result<(), StorageError> {
        let raw_key = self.core.raw_key(key);
        if !self.core.backend.contains_key(&raw_key)? {
            return Ok(());
        }
        self.core.backend.remove_item(&raw_key)?;
        debug!(key = %raw_key, "namespace remove");
        self.core.notify(Some(key));
        Ok(())
    }

    /// Whether the backend holds `key`.
    pub fn has(&self, key: &str) -> Result<bool, StorageError> {
        self.core.backend.contains_key(&self.core.raw_key(key))
    }

    /// Managed keys, prefix stripped, in backend enumeration order.
    pub fn keys(&self) -> Result<Vec<String>, StorageError> {
        let prefix = self.core.prefix.as_str();
        Ok(self
            .core
            .backend
            .keys()?
            .into_iter()
            .filter_map(|raw| raw.strip_prefix(prefix).map(str::to_owned))
            .collect())
    }

    /// Number of managed keys.
    pub fn len(&self) -> Result<usize, StorageError> {
        Ok(self.keys()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.len()? == 0)
    }

    /// Remove every managed key present at the time of the call.
    ///
    /// Stops at the first backend failure; keys removed before it stay
    /// removed.
    pub fn clear(&self) -> Result<(), StorageError> {
        let keys = self.keys()?;
        debug!(prefix = %self.core.prefix, keys = keys.len(), "namespace clear");
        for key in &keys {
            self.remove(key)?;
        }
        Ok(())
    }

    /// Subscribe to changes of any managed key.
    ///
    /// The callback receives the short key, or `None` after an external
    /// clear of the whole backend.
    pub fn subscribe(&self, callback: impl Fn(Option<&str>) + 'static) -> Subscription {
        let strong: Rc<Callback> = Rc::new(callback);
        self.core.subscribers.borrow_mut().add(&strong);
        Subscription::new(strong)
    }

    /// Stop receiving external-change events. Returns `false` if already
    /// detached.
    pub fn detach(&self) -> bool {
        let registration = self.core.registration.borrow_mut().take();
        registration.is_some_and(|registration| registration.cancel())
    }

    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.core
            .registration
            .borrow()
            .as_ref()
            .is_some_and(Registration::is_active)
    }

    /// Raw key prefix (`name:` or empty).
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.core.prefix
    }

    #[must_use]
    pub fn backend(&self) -> &BackendRef {
        &self.core.backend
    }

    #[must_use]
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.core.dispatcher
    }

    /// Number of registered subscribers (including dead ones not yet pruned).
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.core.subscribers.borrow().len()
    }

    /// Cell configuration for `key` inside this namespace: same backend,
    /// dispatcher, and error hook, JSON codec.
    #[must_use]
    pub fn cell_config<U>(&self, key: &str) -> CellConfig<U>
    where
        U: Serialize + DeserializeOwned + PartialEq + 'static,
    {
        CellConfig::new(self.core.raw_key(key), &self.core.backend)
            .with_dispatcher(&self.core.dispatcher)
            .with_shared_error_hook(self.core.on_error.clone())
    }

    /// A cell bound to `key` inside this namespace.
    pub fn cell<U>(&self, key: &str) -> Result<StorageCell<U>, StorageError>
    where
        U: Serialize + DeserializeOwned + PartialEq + Clone + 'static,
    {
        StorageCell::new(self.cell_config(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kvcell_core::MemoryBackend;
    use serde_json::{Value, json};
    use std::cell::Cell;

    fn fixture() -> (BackendRef, Dispatcher) {
        (BackendRef::new(MemoryBackend::new()), Dispatcher::new())
    }

    fn unnamed(backend: &BackendRef, dispatcher: &Dispatcher) -> Namespace {
        Namespace::new(NamespaceConfig::new(backend).with_dispatcher(dispatcher))
    }

    fn named(backend: &BackendRef, dispatcher: &Dispatcher, name: &str) -> Namespace {
        Namespace::new(
            NamespaceConfig::new(backend)
                .with_name(name)
                .with_dispatcher(dispatcher),
        )
    }

    fn recorder(ns: &Namespace) -> (Rc<RefCell<Vec<Option<String>>>>, Subscription) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let log_clone = Rc::clone(&log);
        let sub = ns.subscribe(move |key| log_clone.borrow_mut().push(key.map(str::to_owned)));
        (log, sub)
    }

    #[test]
    fn set_writes_json() {
        let (backend, dispatcher) = fixture();
        let ns = unnamed(&backend, &dispatcher);
        ns.set("a", &json!(1)).unwrap();
        assert_eq!(backend.get_item("a").unwrap().as_deref(), Some("1"));
        assert_eq!(ns.get("a").unwrap(), Some(json!(1)));
    }

    #[test]
    fn get_many_in_supplied_order() {
        let (backend, dispatcher) = fixture();
        let ns = unnamed(&backend, &dispatcher);
        ns.set("a", &json!(1)).unwrap();
        ns.set("b", &json!("2")).unwrap();

        let values = ns.get_many(["a", "b", "c"]).unwrap();
        let keys: Vec<&str> = values.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
        assert_eq!(values["a"], Some(json!(1)));
        assert_eq!(values["b"], Some(json!("2")));
        assert_eq!(values["c"], None);
    }

    #[test]
    fn prefixed_layout_and_keys() {
        let (backend, dispatcher) = fixture();
        backend.set_item("loose", "0").unwrap();
        backend.set_item("other:a", "0").unwrap();
        let ns = named(&backend, &dispatcher, "ns");
        ns.set("a", &json!(1)).unwrap();

        assert_eq!(backend.get_item("ns:a").unwrap().as_deref(), Some("1"));
        assert_eq!(ns.keys().unwrap(), vec!["a"]);
        assert_eq!(ns.len().unwrap(), 1);
        assert!(ns.has("a").unwrap());
        assert!(!ns.has("loose").unwrap());
    }

    #[test]
    fn set_always_notifies() {
        let (backend, dispatcher) = fixture();
        let ns = unnamed(&backend, &dispatcher);
        let (log, _sub) = recorder(&ns);
        ns.set("a", &json!(1)).unwrap();
        ns.set("a", &json!(1)).unwrap();
        assert_eq!(
            *log.borrow(),
            vec![Some("a".to_owned()), Some("a".to_owned())]
        );
    }

    #[test]
    fn subscriber_added_during_notify_waits_for_next_change() {
        let (backend, dispatcher) = fixture();
        let ns = unnamed(&backend, &dispatcher);
        let inner = ns.clone();
        let late: Rc<RefCell<Vec<Option<String>>>> = Rc::new(RefCell::new(Vec::new()));
        let late_clone = Rc::clone(&late);
        let added: Rc<RefCell<Vec<Subscription>>> = Rc::new(RefCell::new(Vec::new()));
        let added_clone = Rc::clone(&added);
        let _adder = ns.subscribe(move |_| {
            if added_clone.borrow().is_empty() {
                let log = Rc::clone(&late_clone);
                let sub = inner.subscribe(move |key| log.borrow_mut().push(key.map(str::to_owned)));
                added_clone.borrow_mut().push(sub);
            }
        });

        ns.set("a", &json!(1)).unwrap();
        assert!(late.borrow().is_empty());
        ns.set("b", &json!(2)).unwrap();
        assert_eq!(*late.borrow(), vec![Some("b".to_owned())]);
    }

    #[test]
    fn remove_absent_is_silent() {
        let (backend, dispatcher) = fixture();
        let ns = unnamed(&backend, &dispatcher);
        let (log, _sub) = recorder(&ns);
        ns.remove("missing").unwrap();
        assert!(log.borrow().is_empty());

        ns.set("a", &json!(1)).unwrap();
        ns.remove("a").unwrap();
        assert_eq!(ns.get("a").unwrap(), None);
        assert_eq!(log.borrow().len(), 2);
    }

    #[test]
    fn clear_only_touches_prefix() {
        let (backend, dispatcher) = fixture();
        backend.set_item("outside", "1").unwrap();
        let ns = named(&backend, &dispatcher, "ns");
        ns.set("a", &json!(1)).unwrap();
        ns.set("b", &json!("2")).unwrap();

        ns.clear().unwrap();
        assert_eq!(ns.get("a").unwrap(), None);
        assert_eq!(ns.get("b").unwrap(), None);
        assert!(ns.is_empty().unwrap());
        assert_eq!(backend.keys().unwrap(), vec!["outside"]);
    }

    #[test]
    fn unparseable_reads_none_and_reports() {
        let (backend, dispatcher) = fixture();
        let errors = Rc::new(Cell::new(0));
        let errors_clone = Rc::clone(&errors);
        let ns: Namespace<Value> = Namespace::new(
            NamespaceConfig::new(&backend)
                .with_dispatcher(&dispatcher)
                .with_error_hook(move |_| errors_clone.set(errors_clone.get() + 1)),
        );
        backend.set_item("bad", "{not json").unwrap();
        assert_eq!(ns.get("bad").unwrap(), None);
        assert_eq!(errors.get(), 1);
    }

    #[test]
    fn external_events_notify_with_short_key() {
        let (backend, dispatcher) = fixture();
        let ns = named(&backend, &dispatcher, "ns");
        let (log, _sub) = recorder(&ns);

        let event = backend.external_write("ns:a", Some("5")).unwrap();
        assert_eq!(dispatcher.dispatch(&event), 1);
        let foreign = backend.external_write("other:a", Some("5")).unwrap();
        assert_eq!(dispatcher.dispatch(&foreign), 0);
        let cleared = backend.external_clear().unwrap();
        dispatcher.dispatch(&cleared);

        assert_eq!(*log.borrow(), vec![Some("a".to_owned()), None]);
    }

    #[test]
    fn typed_namespace() {
        let (backend, dispatcher) = fixture();
        let ns: Namespace<u32> = Namespace::new(
            NamespaceConfig::new(&backend)
                .with_name("scores")
                .with_dispatcher(&dispatcher),
        );
        ns.set("alice", &7).unwrap();
        assert_eq!(ns.get("alice").unwrap(), Some(7));
        assert_eq!(backend.get_item("scores:alice").unwrap().as_deref(), Some("7"));
    }

    #[test]
    fn cell_inside_namespace() {
        let (backend, dispatcher) = fixture();
        let ns = named(&backend, &dispatcher, "ns");
        let cell = ns.cell::<i32>("count").unwrap();
        cell.set(3).unwrap();
        assert_eq!(cell.key(), "ns:count");
        assert_eq!(ns.get("count").unwrap(), Some(json!(3)));
        assert_eq!(ns.keys().unwrap(), vec!["count"]);

        // Namespace write reaches the cell through the shared dispatcher.
        let event = backend.external_write("ns:count", Some("4")).unwrap();
        assert_eq!(dispatcher.dispatch(&event), 2);
        assert_eq!(cell.get(), Some(4));
    }

    #[test]
    fn detach_stops_external_delivery() {
        let (backend, dispatcher) = fixture();
        let ns = unnamed(&backend, &dispatcher);
        let (log, _sub) = recorder(&ns);
        assert!(ns.is_attached());
        assert!(ns.detach());
        assert!(!ns.detach());
        let event = backend.external_write("a", Some("1")).unwrap();
        assert_eq!(dispatcher.dispatch(&event), 0);
        assert!(log.borrow().is_empty());
    }
}
