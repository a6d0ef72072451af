//! Capability traits implemented by registered services.

mod dispose;

pub use dispose::Dispose;
