#![forbid(unsafe_code)]

//! Runtime: reactive cells, namespaces, and external-change dispatch.
//!
//! # Role in kvcell
//! `kvcell-runtime` turns a raw [`Backend`](kvcell_core::Backend) into typed,
//! observable values. It owns all mutable wrapper state and routes changes
//! made outside the process (another window, another program, a file edited
//! on disk) back into the wrappers that watch the affected keys.
//!
//! # Primary responsibilities
//! - **StorageCell**: one key, cached, version-tracked, equality-suppressed.
//! - **Namespace**: every key under a prefix, with bulk read and clear.
//! - **Dispatcher**: one event stream, fanned out by backend identity and key.
//! - **Config**: explicit construction-time settings for both wrappers.
//!
//! # Threading
//! Everything here is single-threaded (`Rc`/`RefCell`). Each thread has its
//! own [`Dispatcher::global`](dispatcher::Dispatcher::global).

pub mod config;
pub mod dispatcher;
pub mod reactive;

pub use config::{CellConfig, ErrorHook, NamespaceConfig};
pub use dispatcher::{Dispatcher, ExternalChange, KeyFilter, RegistrationId};
pub use reactive::{Namespace, StorageCell, Subscription};
