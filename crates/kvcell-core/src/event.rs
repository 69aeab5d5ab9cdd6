#![forbid(unsafe_code)]

//! External-change signal.
//!
//! Mirrors the browser `storage` event: the raw key, the storage area it
//! happened in, and the new raw value. A `None` key means the whole storage
//! area was cleared.

use crate::backend::BackendRef;

/// A change to a backend made outside the wrapper that observes it.
#[derive(Debug, Clone)]
pub struct StorageEvent {
    /// Raw (already prefixed) key, `None` for a clear.
    pub key: Option<String>,
    /// Backend the change happened in.
    pub storage_area: BackendRef,
    /// New raw value, `None` when the entry was removed.
    pub new_value: Option<String>,
}

impl StorageEvent {
    /// A single key changed or was removed.
    #[must_use]
    pub fn changed(
        storage_area: &BackendRef,
        key: impl Into<String>,
        new_value: Option<String>,
    ) -> Self {
        Self {
            key: Some(key.into()),
            storage_area: storage_area.clone(),
            new_value,
        }
    }

    /// Every entry of the storage area was removed.
    #[must_use]
    pub fn cleared(storage_area: &BackendRef) -> Self {
        Self {
            key: None,
            storage_area: storage_area.clone(),
            new_value: None,
        }
    }

    /// Whether this event reports a full clear.
    #[must_use]
    pub fn is_clear(&self) -> bool {
        self.key.is_none()
    }
}
