//! Process-wide "current container" slot.
//!
//! The container never reads this slot itself. It exists for code that has
//! no way to receive a container explicitly (plugin entry points, signal
//! handlers); everything else should pass a [`Container`] around.

use parking_lot::RwLock;

use crate::container::Container;
use crate::error::{DiError, DiResult};

static GLOBAL_CONTEXT: RwLock<Option<Container>> = parking_lot::const_rwlock(None);

/// Installs `container` as the global context, returning the previous one.
///
/// ```
/// use ferrous_refs::{clear_global_context, get_context, set_global_context, Container};
///
/// let root = Container::new();
/// set_global_context(root.clone());
/// assert_eq!(get_context().unwrap().id(), "root");
/// clear_global_context();
/// assert!(get_context().is_err());
/// ```
pub fn set_global_context(container: Container) -> Option<Container> {
    GLOBAL_CONTEXT.write().replace(container)
}

/// The current global context, or [`DiError::ContextNotSet`].
pub fn get_context() -> DiResult<Container> {
    GLOBAL_CONTEXT.read().clone().ok_or(DiError::ContextNotSet)
}

/// Empties the slot, returning what it held.
pub fn clear_global_context() -> Option<Container> {
    GLOBAL_CONTEXT.write().take()
}
