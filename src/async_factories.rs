//! Async factory support.
//!
//! Services that need asynchronous initialization (connection handshakes,
//! authentication, warm-up) are registered with an async provider and
//! resolved through [`Container::resolve_async`].
//!
//! [`Container::resolve_async`]: crate::Container::resolve_async

use async_trait::async_trait;
use std::future::Future;

use crate::container::Container;
use crate::error::DiResult;

/// Trait for factories that create services asynchronously.
///
/// # Examples
///
/// ```
/// use ferrous_refs::{async_trait, AsyncFactory, Container, DiResult, Provider, Token};
///
/// struct DatabasePool {
///     url: String,
/// }
///
/// struct PoolFactory {
///     url: String,
/// }
///
/// #[async_trait]
/// impl AsyncFactory<DatabasePool> for PoolFactory {
///     async fn create(&self, _container: Container) -> DiResult<DatabasePool> {
///         tokio::time::sleep(std::time::Duration::from_millis(1)).await;
///         Ok(DatabasePool { url: self.url.clone() })
///     }
/// }
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let pool = Token::<DatabasePool>::new("POOL");
/// let container = Container::new();
/// container
///     .register(&pool, Provider::from_async(PoolFactory { url: "postgres://localhost".into() }))
///     .unwrap();
///
/// let resolved = container.resolve_async(&pool).await.unwrap();
/// assert_eq!(resolved.url, "postgres://localhost");
/// # }
/// ```
#[async_trait]
pub trait AsyncFactory<T: Send + Sync + 'static>: Send + Sync {
    /// Creates a new instance of the service asynchronously.
    ///
    /// The container handle can be used to resolve the services this one
    /// depends on, synchronously or asynchronously.
    async fn create(&self, container: Container) -> DiResult<T>;
}

#[async_trait]
impl<T, F, Fut> AsyncFactory<T> for F
where
    T: Send + Sync + 'static,
    F: Fn(Container) -> Fut + Send + Sync,
    Fut: Future<Output = DiResult<T>> + Send,
{
    async fn create(&self, container: Container) -> DiResult<T> {
        self(container).await
    }
}
