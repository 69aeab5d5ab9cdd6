#![forbid(unsafe_code)]

//! Volatile in-memory backend.
//!
//! Entries keep insertion order, so `key(index)` enumerates in the order keys
//! were first written. Overwriting a key keeps its position; removing it
//! shifts later keys down.
//!
//! # Failure Modes
//!
//! | Mode | Condition | Behavior |
//! |------|-----------|----------|
//! | Quota | Total key+value bytes would exceed the limit | `QuotaExceeded`, entry untouched |
//! | Disabled | [`MemoryBackend::set_available`] set to false | Every call fails with `Unavailable` |

use std::cell::{Cell, RefCell};

use indexmap::IndexMap;

use crate::backend::Backend;
use crate::error::StorageError;

/// Insertion-ordered in-memory storage.
#[derive(Debug)]
pub struct MemoryBackend {
    entries: RefCell<IndexMap<String, String>>,
    quota: Option<usize>,
    available: Cell<bool>,
}

impl MemoryBackend {
    /// Create an empty, unbounded backend.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: RefCell::new(IndexMap::new()),
            quota: None,
            available: Cell::new(true),
        }
    }

    /// Create an empty backend limited to `bytes` of key plus value text.
    #[must_use]
    pub fn with_quota(bytes: usize) -> Self {
        Self {
            quota: Some(bytes),
            ..Self::new()
        }
    }

    /// Toggle availability. While unavailable, every operation fails.
    pub fn set_available(&self, available: bool) {
        self.available.set(available);
    }

    /// Bytes currently used by keys and values.
    #[must_use]
    pub fn used_bytes(&self) -> usize {
        self.entries
            .borrow()
            .iter()
            .map(|(k, v)| k.len() + v.len())
            .sum()
    }

    fn check_available(&self) -> Result<(), StorageError> {
        if self.available.get() {
            Ok(())
        } else {
            Err(StorageError::Unavailable("memory backend disabled".into()))
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for MemoryBackend {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.check_available()?;
        Ok(self.entries.borrow().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.check_available()?;
        if let Some(limit) = self.quota {
            let entries = self.entries.borrow();
            let replaced = entries.get(key).map_or(0, |old| key.len() + old.len());
            let used: usize = entries.iter().map(|(k, v)| k.len() + v.len()).sum();
            if used - replaced + key.len() + value.len() > limit {
                return Err(StorageError::QuotaExceeded {
                    key: key.to_owned(),
                    limit,
                });
            }
        }
        self.entries
            .borrow_mut()
            .insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.check_available()?;
        self.entries.borrow_mut().shift_remove(key);
        Ok(())
    }

    fn len(&self) -> Result<usize, StorageError> {
        self.check_available()?;
        Ok(self.entries.borrow().len())
    }

    fn key(&self, index: usize) -> Result<Option<String>, StorageError> {
        self.check_available()?;
        Ok(self
            .entries
            .borrow()
            .get_index(index)
            .map(|(k, _)| k.clone()))
    }

    fn clear(&self) -> Result<(), StorageError> {
        self.check_available()?;
        self.entries.borrow_mut().clear();
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        self.check_available()?;
        Ok(self.entries.borrow().keys().cloned().collect())
    }

    fn kind(&self) -> &'static str {
        "memory"
    }
}
