//! Reference tracking: who is still holding a service.
//!
//! Resolving a token hands out a plain `Arc<T>`. Acquiring a reference hands
//! out a [`ServiceRef`] instead, which is counted by a [`RefRegistry`] until
//! released, so leaks show up in [`RefRegistry::stats`] and
//! [`RefRegistry::check_leaks`] rather than as silently growing memory.

mod handle;
mod registry;

pub use handle::{ServiceRef, WeakRef};
pub use registry::{LeakReport, RefRegistry, RefStats};
