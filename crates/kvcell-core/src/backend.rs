#![forbid(unsafe_code)]

//! Backend capability trait and shared backend identity.
//!
//! A backend is a synchronous string-to-string store with the shape of the
//! browser `Storage` interface. Methods take `&self`; implementations use
//! interior mutability because a single backend is shared by every cell and
//! namespace addressing it.
//!
//! [`BackendRef`] is the shared handle wrappers hold. Two handles compare
//! equal by identity (same allocation), which is how external-change events
//! are routed to the wrappers that watch the backend they came from.

use std::fmt;
use std::ops::Deref;
use std::rc::Rc;

use crate::error::StorageError;
use crate::event::StorageEvent;

/// A raw change observed by a backend outside its own write path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawChange {
    /// Affected raw key, `None` when every entry was cleared.
    pub key: Option<String>,
    /// New raw value, `None` when removed.
    pub new_value: Option<String>,
}

/// Synchronous key/value storage capability.
pub trait Backend {
    /// Read the raw value stored under `key`.
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Store `value` under `key`, replacing any previous value.
    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Delete `key`. Deleting an absent key is not an error.
    fn remove_item(&self, key: &str) -> Result<(), StorageError>;

    /// Number of stored entries.
    fn len(&self) -> Result<usize, StorageError>;

    /// Key at enumeration position `index`.
    fn key(&self, index: usize) -> Result<Option<String>, StorageError>;

    /// Delete every entry.
    fn clear(&self) -> Result<(), StorageError>;

    /// Whether the backend holds no entries.
    fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.len()? == 0)
    }

    /// Whether an entry exists for `key`.
    fn contains_key(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.get_item(key)?.is_some())
    }

    /// All keys in enumeration order.
    fn keys(&self) -> Result<Vec<String>, StorageError> {
        let len = self.len()?;
        let mut keys = Vec::with_capacity(len);
        for index in 0..len {
            if let Some(key) = self.key(index)? {
                keys.push(key);
            }
        }
        Ok(keys)
    }

    /// Changes written by other processes since the last poll.
    ///
    /// Only durable backends observe such writes; the default reports none.
    fn poll_changes(&self) -> Result<Vec<RawChange>, StorageError> {
        Ok(Vec::new())
    }

    /// Short name used in log output.
    fn kind(&self) -> &'static str {
        "custom"
    }
}

/// Opaque identity of a backend allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BackendId(usize);

/// Shared, reference-counted handle to a backend.
///
/// Cloning a `BackendRef` creates a new handle to the **same** backend.
/// Equality is identity, not content.
#[derive(Clone)]
pub struct BackendRef {
    inner: Rc<dyn Backend>,
}

impl BackendRef {
    /// Wrap a backend in a new shared handle.
    #[must_use]
    pub fn new(backend: impl Backend + 'static) -> Self {
        Self {
            inner: Rc::new(backend),
        }
    }

    /// Wrap an existing shared backend.
    #[must_use]
    pub fn from_rc(inner: Rc<dyn Backend>) -> Self {
        Self { inner }
    }

    /// Identity of the underlying allocation.
    #[must_use]
    pub fn id(&self) -> BackendId {
        BackendId(Rc::as_ptr(&self.inner) as *const () as usize)
    }

    /// Whether both handles point at the same backend.
    #[must_use]
    pub fn same(&self, other: &BackendRef) -> bool {
        self.id() == other.id()
    }

    /// Write to the backend as if another process had done it, returning
    /// the event such a write raises.
    ///
    /// `None` removes the entry. The event must still be handed to a
    /// dispatcher; nothing is notified here.
    pub fn external_write(
        &self,
        key: &str,
        value: Option<&str>,
    ) -> Result<StorageEvent, StorageError> {
        match value {
            Some(raw) => self.inner.set_item(key, raw)?,
            None => self.inner.remove_item(key)?,
        }
        Ok(StorageEvent::changed(self, key, value.map(str::to_owned)))
    }

    /// Clear the backend as if another process had done it.
    pub fn external_clear(&self) -> Result<StorageEvent, StorageError> {
        self.inner.clear()?;
        Ok(StorageEvent::cleared(self))
    }

    /// Poll the backend for outside writes and wrap them as events.
    pub fn poll_events(&self) -> Result<Vec<StorageEvent>, StorageError> {
        let changes = self.inner.poll_changes()?;
        Ok(changes
            .into_iter()
            .map(|change| StorageEvent {
                key: change.key,
                storage_area: self.clone(),
                new_value: change.new_value,
            })
            .collect())
    }
}

impl Deref for BackendRef {
    type Target = dyn Backend;

    fn deref(&self) -> &Self::Target {
        &*self.inner
    }
}

impl PartialEq for BackendRef {
    fn eq(&self, other: &Self) -> bool {
        self.same(other)
    }
}

impl Eq for BackendRef {}

impl fmt::Debug for BackendRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendRef")
            .field("kind", &self.inner.kind())
            .field("id", &self.id())
            .finish()
    }
}
