#![forbid(unsafe_code)]

//! kvcell public facade crate.
//!
//! This crate provides the stable, ergonomic surface area for users: wrap a
//! backend in a [`BackendRef`](prelude::BackendRef), build a
//! [`StorageCell`](prelude::StorageCell) or [`Namespace`](prelude::Namespace)
//! from its config, and forward host change events to the
//! [`Dispatcher`](prelude::Dispatcher).

pub use kvcell_core as core;
pub use kvcell_runtime as runtime;

pub mod prelude {
    pub use kvcell_core::{
        Backend, BackendRef, Codec, CodecError, FileBackend, FnCodec, JsonCodec, MemoryBackend,
        NullBackend, StorageError, StorageEvent, equality,
    };
    pub use kvcell_runtime::{
        CellConfig, Dispatcher, Namespace, NamespaceConfig, StorageCell, Subscription,
    };
}
