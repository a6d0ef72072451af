//! Provider recipes: how a token's value is produced.

use std::any::Any;
use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

use crate::async_factories::AsyncFactory;
use crate::container::Container;
use crate::error::{BoxError, DiResult};
use crate::lifecycle::Lifecycle;
use crate::token::{AnyToken, Token};
use crate::traits::Dispose;

/// Type-erased shared instance, as stored in scope caches.
pub type AnyArc = Arc<dyn Any + Send + Sync>;

/// Boxed, sendable future returned by async providers.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub(crate) type SyncCtor = Arc<dyn Fn(&Container) -> DiResult<AnyArc> + Send + Sync>;
pub(crate) type AsyncCtor = Arc<dyn Fn(Container) -> BoxFuture<'static, DiResult<AnyArc>> + Send + Sync>;
pub(crate) type Disposer = Arc<dyn Fn(&AnyArc) -> Result<(), BoxError> + Send + Sync>;

/// Erased recipe shared between a registration and its per-scope copies.
#[derive(Clone)]
pub(crate) enum Recipe {
    Value(AnyArc),
    Factory(SyncCtor),
    Alias(AnyToken),
    Async(AsyncCtor),
}

/// The closed set of provider kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ProviderKind {
    /// Fixed, pre-built value (always singleton)
    Value,
    /// Synchronous factory closure
    Factory,
    /// Type constructed through its [`Construct`] impl
    Class,
    /// Points at another token
    Alias,
    /// Asynchronous factory, only resolvable with `resolve_async`
    AsyncFactory,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProviderKind::Value => "value",
            ProviderKind::Factory => "factory",
            ProviderKind::Class => "class",
            ProviderKind::Alias => "alias",
            ProviderKind::AsyncFactory => "async-factory",
        };
        f.write_str(name)
    }
}

/// Types that know how to build themselves from a container.
///
/// This is the constructor-style provider: register with
/// [`Provider::class`] and the container calls `construct` on demand.
///
/// ```rust
/// use ferrous_refs::{Construct, Container, DiResult, Provider, Token};
///
/// struct Clock {
///     offset_ms: i64,
/// }
///
/// impl Construct for Clock {
///     fn construct(_container: &Container) -> DiResult<Self> {
///         Ok(Clock { offset_ms: 0 })
///     }
/// }
///
/// let clock = Token::<Clock>::new("CLOCK");
/// let container = Container::new();
/// container.register(&clock, Provider::class()).unwrap();
/// assert_eq!(container.resolve(&clock).unwrap().offset_ms, 0);
/// ```
pub trait Construct: Sized + Send + Sync + 'static {
    /// Builds a new instance, resolving dependencies from `container`.
    fn construct(container: &Container) -> DiResult<Self>;
}

/// Recipe for producing the value of a `Token<T>`.
///
/// Factory-like providers default to [`Lifecycle::Singleton`]; use
/// [`transient`](Self::transient), [`scoped`](Self::scoped) or
/// [`with_lifecycle`](Self::with_lifecycle) to change it. Value providers
/// are always singletons.
///
/// # Examples
///
/// ```rust
/// use ferrous_refs::{Container, Provider, Token};
/// use std::sync::Arc;
///
/// struct Config { port: u16 }
/// struct Server { config: Arc<Config> }
///
/// let config = Token::<Config>::new("CONFIG");
/// let server = Token::<Server>::new("SERVER");
///
/// let container = Container::new();
/// container.register(&config, Provider::value(Config { port: 8080 })).unwrap();
/// container.register(&server, Provider::factory(move |c| {
///     Ok(Server { config: c.resolve(&config)? })
/// }).transient()).unwrap();
///
/// assert_eq!(container.resolve(&server).unwrap().config.port, 8080);
/// ```
pub struct Provider<T> {
    pub(crate) kind: ProviderKind,
    pub(crate) recipe: Recipe,
    pub(crate) lifecycle: Lifecycle,
    pub(crate) disposer: Option<Disposer>,
    pub(crate) tags: BTreeSet<String>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> Provider<T> {
    fn with_recipe(kind: ProviderKind, recipe: Recipe, lifecycle: Lifecycle) -> Self {
        Self {
            kind,
            recipe,
            lifecycle,
            disposer: None,
            tags: BTreeSet::new(),
            _marker: PhantomData,
        }
    }

    /// Fixed value provider.
    pub fn value(value: T) -> Self {
        Self::shared(Arc::new(value))
    }

    /// Fixed value provider over an existing `Arc`, so callers can keep
    /// their own handle to the same instance.
    pub fn shared(value: Arc<T>) -> Self {
        Self::with_recipe(ProviderKind::Value, Recipe::Value(value), Lifecycle::Singleton)
    }

    /// Synchronous factory. The closure receives the container performing
    /// the construction and may resolve other tokens through it.
    pub fn factory<F>(factory: F) -> Self
    where
        F: Fn(&Container) -> DiResult<T> + Send + Sync + 'static,
    {
        let ctor: SyncCtor = Arc::new(move |c: &Container| factory(c).map(|v| Arc::new(v) as AnyArc));
        Self::with_recipe(ProviderKind::Factory, Recipe::Factory(ctor), Lifecycle::Singleton)
    }

    /// Constructor provider backed by [`Construct`].
    pub fn class() -> Self
    where
        T: Construct,
    {
        let ctor: SyncCtor = Arc::new(|c: &Container| T::construct(c).map(|v| Arc::new(v) as AnyArc));
        Self::with_recipe(ProviderKind::Class, Recipe::Factory(ctor), Lifecycle::Singleton)
    }

    /// Alias to another token of the same type.
    ///
    /// An alias never caches on its own: every resolve goes to the target,
    /// whose lifecycle decides sharing.
    pub fn alias(target: &Token<T>) -> Self {
        Self::with_recipe(ProviderKind::Alias, Recipe::Alias(target.erase()), Lifecycle::Transient)
    }

    /// Asynchronous factory closure. The closure receives an owned handle to
    /// the constructing container.
    pub fn async_factory<F, Fut>(factory: F) -> Self
    where
        F: Fn(Container) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = DiResult<T>> + Send + 'static,
    {
        let ctor: AsyncCtor = Arc::new(move |c: Container| {
            let fut = factory(c);
            Box::pin(async move { fut.await.map(|v| Arc::new(v) as AnyArc) }) as BoxFuture<'static, _>
        });
        Self::with_recipe(ProviderKind::AsyncFactory, Recipe::Async(ctor), Lifecycle::Singleton)
    }

    /// Asynchronous provider backed by an [`AsyncFactory`] implementation.
    pub fn from_async<F>(factory: F) -> Self
    where
        F: AsyncFactory<T> + 'static,
    {
        let factory = Arc::new(factory);
        let ctor: AsyncCtor = Arc::new(move |c: Container| {
            let factory = Arc::clone(&factory);
            Box::pin(async move { factory.create(c).await.map(|v| Arc::new(v) as AnyArc) }) as BoxFuture<'static, _>
        });
        Self::with_recipe(ProviderKind::AsyncFactory, Recipe::Async(ctor), Lifecycle::Singleton)
    }

    /// Sets the lifecycle. Ignored for value and alias providers.
    pub fn with_lifecycle(mut self, lifecycle: Lifecycle) -> Self {
        if !matches!(self.kind, ProviderKind::Value | ProviderKind::Alias) {
            self.lifecycle = lifecycle;
        }
        self
    }

    /// Shorthand for `with_lifecycle(Lifecycle::Singleton)`.
    pub fn singleton(self) -> Self {
        self.with_lifecycle(Lifecycle::Singleton)
    }

    /// Shorthand for `with_lifecycle(Lifecycle::Scoped)`.
    pub fn scoped(self) -> Self {
        self.with_lifecycle(Lifecycle::Scoped)
    }

    /// Shorthand for `with_lifecycle(Lifecycle::Transient)`.
    pub fn transient(self) -> Self {
        self.with_lifecycle(Lifecycle::Transient)
    }

    /// Adds a tag, used by `resolve_by_tag`.
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Adds several tags at once.
    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Calls [`Dispose::dispose`] on cached instances when their owning
    /// scope is disposed.
    pub fn disposable(mut self) -> Self
    where
        T: Dispose,
    {
        let disposer: Disposer = Arc::new(|instance: &AnyArc| match (**instance).downcast_ref::<T>() {
            Some(service) => service.dispose(),
            None => Ok(()),
        });
        self.disposer = Some(disposer);
        self
    }

    /// Kind of this provider.
    pub fn kind(&self) -> ProviderKind {
        self.kind
    }

    /// Lifecycle this provider will be registered with.
    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }
}

impl<T> fmt::Debug for Provider<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Provider")
            .field("kind", &self.kind)
            .field("lifecycle", &self.lifecycle)
            .field("disposable", &self.disposer.is_some())
            .field("tags", &self.tags)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_providers_stay_singleton() {
        let p = Provider::value(5u8).transient();
        assert_eq!(p.kind(), ProviderKind::Value);
        assert_eq!(p.lifecycle(), Lifecycle::Singleton);
    }

    #[test]
    fn factories_default_to_singleton() {
        let p = Provider::<u8>::factory(|_| Ok(1));
        assert_eq!(p.lifecycle(), Lifecycle::Singleton);
        assert_eq!(p.scoped().lifecycle(), Lifecycle::Scoped);
    }

    #[test]
    fn tags_accumulate() {
        let p = Provider::value(1u32).tag("a").tags(["b", "a"]);
        assert_eq!(p.tags.iter().map(String::as_str).collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn alias_lifecycle_is_fixed() {
        let target = Token::<u32>::new("TARGET");
        let p = Provider::alias(&target).singleton();
        assert_eq!(p.kind(), ProviderKind::Alias);
        assert_eq!(p.lifecycle(), Lifecycle::Transient);
    }
}
