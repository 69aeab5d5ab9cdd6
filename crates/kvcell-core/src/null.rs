#![forbid(unsafe_code)]

//! No-op backend used when no real storage is available.

use crate::backend::Backend;
use crate::error::StorageError;

/// Backend that stores nothing: reads are empty, writes are dropped.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullBackend;

impl Backend for NullBackend {
    fn get_item(&self, _key: &str) -> Result<Option<String>, StorageError> {
        Ok(None)
    }

    fn set_item(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
        Ok(())
    }

    fn remove_item(&self, _key: &str) -> Result<(), StorageError> {
        Ok(())
    }

    fn len(&self) -> Result<usize, StorageError> {
        Ok(0)
    }

    fn key(&self, _index: usize) -> Result<Option<String>, StorageError> {
        Ok(None)
    }

    fn clear(&self) -> Result<(), StorageError> {
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "null"
    }
}
