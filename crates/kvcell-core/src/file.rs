#![forbid(unsafe_code)]

//! Durable JSON-file backend.
//!
//! The file holds one JSON object mapping raw keys to raw string values, in
//! enumeration order. Every mutation re-reads the file, applies itself on top
//! of what is there, and replaces the file through a uniquely named temporary
//! sibling and a rename, so a reader in another process sees either the old
//! or the new contents and no other handle's committed keys are dropped.
//!
//! Writes made by other processes are observed through
//! [`Backend::poll_changes`], which re-reads the file and diffs it against
//! the snapshot this handle last saw. Keys another process changed that this
//! handle only noticed while writing are reported by the next poll.
//!
//! # Failure Modes
//!
//! | Failure | Cause | Behavior |
//! |---------|-------|----------|
//! | Missing file | First run | Treated as empty; created on first write |
//! | Corrupt file | Not a JSON object of strings | `StorageError::Corrupt` |
//! | Write failure | Disk full, permissions | `StorageError::Io`, snapshot unchanged |
//!
//! Two handles writing the same key at the same moment still race: the last
//! rename wins, and the loser sees the winner's value at its next poll.

use std::cell::RefCell;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use indexmap::{IndexMap, IndexSet};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::backend::{Backend, RawChange};
use crate::error::StorageError;

type Entries = IndexMap<String, String>;

/// Storage persisted to a JSON file.
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    entries: RefCell<Entries>,
    /// Keys changed on disk by others, absorbed during a write, not yet polled.
    pending: RefCell<IndexSet<String>>,
}

impl FileBackend {
    /// Open (or lazily create) the store at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let entries = load(&path)?;
        debug!(path = %path.display(), entries = entries.len(), "opened file backend");
        Ok(Self {
            path,
            entries: RefCell::new(entries),
            pending: RefCell::new(IndexSet::new()),
        })
    }

    /// Location of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Apply `mutate` to the current file contents, persist the result if
    /// `mutate` reports a change, then commit it as the snapshot.
    fn write_with(&self, mutate: impl FnOnce(&mut Entries) -> bool) -> Result<(), StorageError> {
        let mut next = load(&self.path)?;
        let outside = diff(&self.entries.borrow(), &next);
        if mutate(&mut next) {
            persist(&self.path, &next)?;
        }
        if !outside.is_empty() {
            debug!(
                path = %self.path.display(),
                changes = outside.len(),
                "absorbed external writes during write"
            );
            self.pending
                .borrow_mut()
                .extend(outside.into_iter().filter_map(|change| change.key));
        }
        *self.entries.borrow_mut() = next;
        Ok(())
    }
}

impl Backend for FileBackend {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.borrow().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.write_with(|entries| {
            entries.insert(key.to_owned(), value.to_owned());
            true
        })
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.write_with(|entries| entries.shift_remove(key).is_some())
    }

    fn len(&self) -> Result<usize, StorageError> {
        Ok(self.entries.borrow().len())
    }

    fn key(&self, index: usize) -> Result<Option<String>, StorageError> {
        Ok(self
            .entries
            .borrow()
            .get_index(index)
            .map(|(k, _)| k.clone()))
    }

    fn clear(&self) -> Result<(), StorageError> {
        self.write_with(|entries| {
            let changed = !entries.is_empty();
            entries.clear();
            changed
        })
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.entries.borrow().keys().cloned().collect())
    }

    fn poll_changes(&self) -> Result<Vec<RawChange>, StorageError> {
        let fresh = load(&self.path).inspect_err(|err| {
            warn!(path = %self.path.display(), error = %err, "poll failed");
        })?;
        let pending = std::mem::take(&mut *self.pending.borrow_mut());
        let mut changes: Vec<RawChange> = pending
            .iter()
            .map(|key| RawChange {
                key: Some(key.clone()),
                new_value: fresh.get(key).cloned(),
            })
            .collect();
        changes.extend(
            diff(&self.entries.borrow(), &fresh)
                .into_iter()
                .filter(|change| {
                    change
                        .key
                        .as_ref()
                        .is_none_or(|key| !pending.contains(key))
                }),
        );
        if !changes.is_empty() {
            debug!(
                path = %self.path.display(),
                changes = changes.len(),
                "observed external writes"
            );
        }
        *self.entries.borrow_mut() = fresh;
        Ok(changes)
    }

    fn kind(&self) -> &'static str {
        "file"
    }
}

fn load(path: &Path) -> Result<Entries, StorageError> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Entries::new()),
        Err(err) => return Err(err.into()),
    };
    if text.trim().is_empty() {
        return Ok(Entries::new());
    }
    serde_json::from_str(&text).map_err(|err| StorageError::Corrupt {
        path: path.to_path_buf(),
        message: err.to_string(),
    })
}

fn persist(path: &Path, entries: &Entries) -> Result<(), StorageError> {
    let text = serde_json::to_string(entries).map_err(|err| StorageError::Corrupt {
        path: path.to_path_buf(),
        message: err.to_string(),
    })?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(text.as_bytes())?;
    tmp.persist(path).map_err(|err| StorageError::Io(err.error))?;
    debug!(path = %path.display(), entries = entries.len(), "persisted file backend");
    Ok(())
}

/// Changes turning `old` into `new`: updates and insertions in `new` order,
/// then removals in `old` order.
fn diff(old: &Entries, new: &Entries) -> Vec<RawChange> {
    let mut changes: Vec<RawChange> = new
        .iter()
        .filter(|(key, value)| old.get(*key) != Some(*value))
        .map(|(key, value)| RawChange {
            key: Some(key.clone()),
            new_value: Some(value.clone()),
        })
        .collect();
    changes.extend(
        old.keys()
            .filter(|key| !new.contains_key(*key))
            .map(|key| RawChange {
                key: Some(key.clone()),
                new_value: None,
            }),
    );
    changes
}
