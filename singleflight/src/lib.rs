//! Duplicate call suppression.
//!
//! A [`Group`] makes sure that only one execution of a unit of work is in
//! flight per key at a time. Callers arriving while that execution runs do not
//! start their own; they receive the same result once it completes.
//!
//! ```
//! use singleflight::Group;
//!
//! let group: Group<&str, u64, ()> = Group::new();
//! let (result, shared) = group.work("answer", || Ok(42));
//! assert_eq!(result, Ok(42));
//! assert!(!shared);
//! ```
//!
//! [`Group::work`] blocks: the first caller runs the supplier inline and
//! duplicates wait for it. [`Group::work_chan`] never blocks: it returns a
//! [`tokio::sync::oneshot::Receiver`] that yields one [`Response`], and the
//! first caller's supplier runs on a thread of its own. The receiver can be
//! awaited or read with `blocking_recv`.
//!
//! Nothing is cached: once a call completes its key is free again, and the
//! next caller runs the supplier anew. [`Group::forget`] frees a key early.
//!
//! # Panics and forced exit
//!
//! A panicking supplier is intercepted and turned into a [`PanicError`]
//! carrying the panic message and the stack where the panic was raised. Every
//! [`Group::work`] caller of that call then panics with it, as they would have
//! had each run the supplier alone. When [`Group::work_chan`] waiters are
//! attached the panic cannot be delivered to them, so the process aborts.
//!
//! A supplier may call [`exit`] to tear its thread down without reporting a
//! fault. Every [`Group::work`] caller of that call exits the same way, and
//! channel waiters see the sender dropped without a value.

mod call;
mod error;
mod group;
mod options;
mod unwind;

pub use call::Response;
pub use error::{exit, ConfigError, Exit, PanicError};
pub use group::Group;
pub use options::Options;
