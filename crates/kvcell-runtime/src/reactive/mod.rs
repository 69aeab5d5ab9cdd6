#![forbid(unsafe_code)]

//! Observable storage wrappers.
//!
//! - [`StorageCell`]: one backend key, typed, cached, version-tracked, with
//!   change notification via subscriber callbacks.
//! - [`Namespace`]: every key under a prefix, uncached, with one shared
//!   subscriber list receiving the short key that changed.
//! - [`Subscription`]: guard returned by `subscribe`; unsubscribes on drop.
//!
//! # Architecture
//!
//! Both wrappers keep their state in an `Rc` core. The handle is cheap to
//! clone; clones share the cache and subscribers. The dispatcher holds only
//! a `Weak` to the core, so dropping the last handle ends delivery without an
//! explicit unregister.
//!
//! # Invariants
//!
//! 1. A cell's version increments exactly once per change that notifies.
//! 2. Subscribers are notified in registration order, after the cache and
//!    backend are already updated.
//! 3. Writing a value the equality predicate deems equal to the cache is a
//!    no-op (no write, no version bump, no notification).
//! 4. Releasing a [`Subscription`] prevents every later invocation of its
//!    callback, including later invocations in the current round.
//! 5. No `RefCell` borrow is held while a subscriber runs, so subscribers
//!    may read, write, or subscribe re-entrantly.

mod cell;
mod namespace;
mod subscription;

pub use cell::StorageCell;
pub use namespace::Namespace;
pub use subscription::Subscription;
