//! The disposable capability.

use crate::error::BoxError;

/// Teardown hook for services that own resources.
///
/// Opt a registration into disposal with [`Provider::disposable`]. When the
/// owning scope is disposed, every Singleton or Scoped instance that the
/// scope actually resolved has its `dispose` called once. Errors (and
/// panics) are logged and swallowed so one failing service cannot stop the
/// rest of the cascade.
///
/// [`Provider::disposable`]: crate::Provider::disposable
///
/// # Examples
///
/// ```
/// use ferrous_refs::{BoxError, Container, Dispose, Provider, Token};
/// use std::sync::atomic::{AtomicBool, Ordering};
///
/// struct Cache {
///     flushed: AtomicBool,
/// }
///
/// impl Dispose for Cache {
///     fn dispose(&self) -> Result<(), BoxError> {
///         self.flushed.store(true, Ordering::SeqCst);
///         Ok(())
///     }
/// }
///
/// let cache = Token::<Cache>::new("CACHE");
/// let root = Container::new();
/// root.register(&cache, Provider::factory(|_| Ok(Cache { flushed: AtomicBool::new(false) })).disposable()).unwrap();
///
/// let instance = root.resolve(&cache).unwrap();
/// assert_eq!(root.dispose(), 1);
/// assert!(instance.flushed.load(Ordering::SeqCst));
/// ```
pub trait Dispose: Send + Sync + 'static {
    /// Releases the resources held by this instance.
    fn dispose(&self) -> Result<(), BoxError>;
}
