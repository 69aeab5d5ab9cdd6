#![forbid(unsafe_code)]

//! Construction-time configuration for cells and namespaces.
//!
//! Every default is explicit here; nothing is looked up implicitly at use
//! time.
//!
//! | Setting | Cell default | Namespace default |
//! |---------|--------------|-------------------|
//! | codec | [`JsonCodec`] | [`JsonCodec`] |
//! | equality | `PartialEq` | n/a (never suppresses) |
//! | initial value | none | n/a |
//! | fallback value | none | n/a |
//! | name / prefix | n/a | none (unprefixed) |
//! | dispatcher | [`Dispatcher::global`] | [`Dispatcher::global`] |
//! | error hook | none (log only) | none (log only) |

use std::fmt;
use std::rc::Rc;

use kvcell_core::codec::JsonCodec;
use kvcell_core::{BackendRef, Codec, Equality, SharedCodec, StorageError, equality};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::error;

use crate::dispatcher::Dispatcher;

/// Side channel receiving errors that are absorbed instead of returned.
pub type ErrorHook = Rc<dyn Fn(&StorageError)>;

/// Log an absorbed error and forward it to the hook, if any.
pub(crate) fn report(hook: Option<&ErrorHook>, key: &str, err: &StorageError) {
    if err.is_parse() {
        error!(key, error = %err, "error parsing storage item");
    } else {
        error!(key, error = %err, "storage refresh failed");
    }
    if let Some(hook) = hook {
        hook(err);
    }
}

/// Configuration for a [`StorageCell`](crate::reactive::StorageCell).
pub struct CellConfig<T> {
    /// Raw backend key.
    pub key: String,
    /// Backend holding the entry.
    pub backend: BackendRef,
    pub codec: SharedCodec<T>,
    pub equals: Equality<T>,
    /// Written at construction when the backend has no entry.
    pub initial: Option<T>,
    /// Reported by the cell while the backend has no entry. Never written.
    pub fallback: Option<T>,
    pub dispatcher: Dispatcher,
    pub on_error: Option<ErrorHook>,
}

impl<T> CellConfig<T>
where
    T: Serialize + DeserializeOwned + PartialEq + 'static,
{
    /// JSON codec, `PartialEq` equality, global dispatcher.
    #[must_use]
    pub fn new(key: impl Into<String>, backend: &BackendRef) -> Self {
        Self::from_parts(
            key,
            backend,
            Rc::new(JsonCodec::<T>::new()),
            equality::partial_eq(),
        )
    }
}

impl<T: 'static> CellConfig<T> {
    /// Configuration for types without serde or `PartialEq` support.
    #[must_use]
    pub fn from_parts(
        key: impl Into<String>,
        backend: &BackendRef,
        codec: SharedCodec<T>,
        equals: Equality<T>,
    ) -> Self {
        Self {
            key: key.into(),
            backend: backend.clone(),
            codec,
            equals,
            initial: None,
            fallback: None,
            dispatcher: Dispatcher::global(),
            on_error: None,
        }
    }

    /// Use `codec` instead of the default.
    #[must_use]
    pub fn with_codec(mut self, codec: impl Codec<T> + 'static) -> Self {
        self.codec = Rc::new(codec);
        self
    }

    /// Use a codec shared with other wrappers.
    #[must_use]
    pub fn with_shared_codec(mut self, codec: SharedCodec<T>) -> Self {
        self.codec = codec;
        self
    }

    /// Decide what counts as a change.
    #[must_use]
    pub fn with_equality(
        mut self,
        equals: impl Fn(Option<&T>, Option<&T>) -> bool + 'static,
    ) -> Self {
        self.equals = Rc::new(equals);
        self
    }

    /// Write `value` at construction if the backend has no entry.
    #[must_use]
    pub fn with_initial(mut self, value: T) -> Self {
        self.initial = Some(value);
        self
    }

    /// Report `value` while the backend has no entry, without writing it.
    #[must_use]
    pub fn with_fallback(mut self, value: T) -> Self {
        self.fallback = Some(value);
        self
    }

    /// Register with `dispatcher` instead of the thread's global one.
    #[must_use]
    pub fn with_dispatcher(mut self, dispatcher: &Dispatcher) -> Self {
        self.dispatcher = dispatcher.clone();
        self
    }

    /// Receive errors that are logged instead of returned.
    #[must_use]
    pub fn with_error_hook(mut self, hook: impl Fn(&StorageError) + 'static) -> Self {
        self.on_error = Some(Rc::new(hook));
        self
    }

    #[must_use]
    pub(crate) fn with_shared_error_hook(mut self, hook: Option<ErrorHook>) -> Self {
        self.on_error = hook;
        self
    }
}

impl<T: fmt::Debug> fmt::Debug for CellConfig<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CellConfig")
            .field("key", &self.key)
            .field("backend", &self.backend)
            .field("initial", &self.initial)
            .field("fallback", &self.fallback)
            .field("has_error_hook", &self.on_error.is_some())
            .finish_non_exhaustive()
    }
}

/// Configuration for a [`Namespace`](crate::reactive::Namespace).
pub struct NamespaceConfig<T = serde_json::Value> {
    /// Namespace name; stored keys become `name:key`.
    pub name: Option<String>,
    pub backend: BackendRef,
    pub codec: SharedCodec<T>,
    pub dispatcher: Dispatcher,
    pub on_error: Option<ErrorHook>,
}

impl<T> NamespaceConfig<T>
where
    T: Serialize + DeserializeOwned + 'static,
{
    /// Unnamed, JSON codec, global dispatcher.
    #[must_use]
    pub fn new(backend: &BackendRef) -> Self {
        Self::with_parts(backend, Rc::new(JsonCodec::<T>::new()))
    }
}

impl<T: 'static> NamespaceConfig<T> {
    /// Configuration with an explicit codec.
    #[must_use]
    pub fn with_parts(backend: &BackendRef, codec: SharedCodec<T>) -> Self {
        Self {
            name: None,
            backend: backend.clone(),
            codec,
            dispatcher: Dispatcher::global(),
            on_error: None,
        }
    }

    /// Scope every key under `name:`.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_codec(mut self, codec: impl Codec<T> + 'static) -> Self {
        self.codec = Rc::new(codec);
        self
    }

    #[must_use]
    pub fn with_dispatcher(mut self, dispatcher: &Dispatcher) -> Self {
        self.dispatcher = dispatcher.clone();
        self
    }

    #[must_use]
    pub fn with_error_hook(mut self, hook: impl Fn(&StorageError) + 'static) -> Self {
        self.on_error = Some(Rc::new(hook));
        self
    }

    /// Raw key prefix derived from the name.
    #[must_use]
    pub fn prefix(&self) -> String {
        self.name
            .as_deref()
            .map_or_else(String::new, |name| format!("{name}:"))
    }
}

impl<T> fmt::Debug for NamespaceConfig<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamespaceConfig")
            .field("name", &self.name)
            .field("backend", &self.backend)
            .field("has_error_hook", &self.on_error.is_some())
            .finish_non_exhaustive()
    }
}
