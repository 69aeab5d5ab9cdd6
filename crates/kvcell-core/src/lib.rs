#![forbid(unsafe_code)]

//! Core: backend capability, codecs, equality, and storage events.
//!
//! # Role in kvcell
//! `kvcell-core` is the storage layer. It defines what a backend must offer,
//! how typed values become raw strings, how changes are compared, and the
//! shape of external-change signals. It holds no reactive state; cells,
//! namespaces, and the dispatcher live in `kvcell-runtime`.
//!
//! # Primary responsibilities
//! - **Backend**: the synchronous `Storage`-shaped capability trait and the
//!   identity-comparing [`BackendRef`](backend::BackendRef) handle.
//! - **Backends**: [`MemoryBackend`](memory::MemoryBackend) (volatile),
//!   [`FileBackend`](file::FileBackend) (durable, pollable for outside
//!   writes), [`NullBackend`](null::NullBackend) (no-op fallback).
//! - **Codec**: [`JsonCodec`](codec::JsonCodec) by default, closures via
//!   [`FnCodec`](codec::FnCodec).
//! - **Equality**: predicates that decide whether a change notifies.
//! - **StorageEvent**: `{ key, storage_area, new_value }`.

pub mod backend;
pub mod codec;
pub mod equality;
pub mod error;
pub mod event;
pub mod file;
#[cfg(feature = "tracing-json")]
pub mod logging;
pub mod memory;
pub mod null;

pub use backend::{Backend, BackendId, BackendRef, RawChange};
pub use codec::{Codec, FnCodec, JsonCodec, SharedCodec};
pub use equality::Equality;
pub use error::{CodecError, CodecErrorKind, StorageError};
pub use event::StorageEvent;
pub use file::FileBackend;
pub use memory::MemoryBackend;
pub use null::NullBackend;
