//! Property-based invariant tests for the bundled backends.
//!
//! **MemoryBackend:**
//! 1. `key(i)` for `i < len()` enumerates exactly `keys()`, in order.
//! 2. Content matches a model map after any operation sequence.
//! 3. Quota: `used_bytes()` never exceeds the limit, and a rejected write
//!    leaves the content unchanged.
//!
//! **FileBackend:**
//! 4. Reopening yields the same content and order.
//! 5. Applying the polled changes to the old content reproduces the file
//!    written by another handle.

use std::collections::BTreeMap;

use indexmap::IndexMap;
use kvcell_core::{Backend, FileBackend, MemoryBackend, StorageError};
use proptest::prelude::*;

// ── Strategies ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Op {
    Set(String, String),
    Remove(String),
    Clear,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        6 => ("[a-e]{1,2}", "[a-z0-9]{0,6}").prop_map(|(k, v)| Op::Set(k, v)),
        3 => "[a-e]{1,2}".prop_map(Op::Remove),
        1 => Just(Op::Clear),
    ]
}

fn ops_strategy(max_len: usize) -> impl Strategy<Value = Vec<Op>> {
    proptest::collection::vec(op_strategy(), 0..=max_len)
}

fn apply(backend: &dyn Backend, model: &mut IndexMap<String, String>, op: &Op) {
    match op {
        Op::Set(k, v) => {
            backend.set_item(k, v).unwrap();
            model.insert(k.clone(), v.clone());
        }
        Op::Remove(k) => {
            backend.remove_item(k).unwrap();
            model.shift_remove(k);
        }
        Op::Clear => {
            backend.clear().unwrap();
            model.clear();
        }
    }
}

fn contents(backend: &dyn Backend) -> Vec<(String, String)> {
    backend
        .keys()
        .unwrap()
        .into_iter()
        .map(|k| {
            let v = backend.get_item(&k).unwrap().unwrap_or_default();
            (k, v)
        })
        .collect()
}

// ═════════════════════════════════════════════════════════════════════════
// MemoryBackend
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn memory_matches_model(ops in ops_strategy(40)) {
        let backend = MemoryBackend::new();
        let mut model = IndexMap::new();
        for op in &ops {
            apply(&backend, &mut model, op);
        }
        let expected: Vec<(String, String)> = model.into_iter().collect();
        prop_assert_eq!(contents(&backend), expected);
    }

    #[test]
    fn memory_index_enumeration_matches_keys(ops in ops_strategy(40)) {
        let backend = MemoryBackend::new();
        let mut model = IndexMap::new();
        for op in &ops {
            apply(&backend, &mut model, op);
        }
        let len = backend.len().unwrap();
        let by_index: Vec<String> = (0..len)
            .map(|i| backend.key(i).unwrap().unwrap())
            .collect();
        prop_assert_eq!(by_index, backend.keys().unwrap());
        prop_assert_eq!(backend.key(len).unwrap(), None);
    }

    #[test]
    fn quota_is_never_exceeded(
        limit in 4usize..=64,
        writes in proptest::collection::vec(("[a-c]", "[a-z]{0,20}"), 1..=20),
    ) {
        let backend = MemoryBackend::with_quota(limit);
        for (k, v) in writes {
            let before = contents(&backend);
            match backend.set_item(&k, &v) {
                Ok(()) => {}
                Err(StorageError::QuotaExceeded { .. }) => {
                    prop_assert_eq!(contents(&backend), before);
                }
                Err(other) => prop_assert!(false, "unexpected error: {other}"),
            }
            prop_assert!(backend.used_bytes() <= limit);
        }
    }
}

// ═════════════════════════════════════════════════════════════════════════
// FileBackend
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn file_survives_reopen(ops in ops_strategy(20)) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        let backend = FileBackend::open(&path).unwrap();
        let mut model = IndexMap::new();
        for op in &ops {
            apply(&backend, &mut model, op);
        }
        let reopened = FileBackend::open(&path).unwrap();
        prop_assert_eq!(contents(&reopened), contents(&backend));
    }

    #[test]
    fn polled_changes_reproduce_outside_writes(
        seed in ops_strategy(10),
        outside in ops_strategy(10),
    ) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        let watcher = FileBackend::open(&path).unwrap();
        let mut model = IndexMap::new();
        for op in &seed {
            apply(&watcher, &mut model, op);
        }

        let writer = FileBackend::open(&path).unwrap();
        let mut written = model.clone();
        for op in &outside {
            apply(&writer, &mut written, op);
        }

        let mut replay: BTreeMap<String, String> = model.into_iter().collect();
        for change in watcher.poll_changes().unwrap() {
            let key = change.key.unwrap();
            match change.new_value {
                Some(value) => {
                    replay.insert(key, value);
                }
                None => {
                    replay.remove(&key);
                }
            }
        }
        let expected: BTreeMap<String, String> = written.into_iter().collect();
        prop_assert_eq!(replay, expected);
        prop_assert!(watcher.poll_changes().unwrap().is_empty());
    }
}
