//! Internal implementation details.

pub(crate) mod circular;

pub(crate) use circular::{extend_async_chain, within_async_chain, Frame, StackGuard};
