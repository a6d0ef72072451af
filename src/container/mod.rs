//! The container: registration, introspection and references.
//!
//! Resolution lives in `resolve`, scoping and disposal in `scope`.

use std::any::Any;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::binding::ServiceBinding;
use crate::descriptors::EntrySnapshot;
use crate::error::{DiError, DiResult};
use crate::internal::Frame;
use crate::lifecycle::Lifecycle;
use crate::middleware::{Middleware, Next};
use crate::observer::{notify_all, ContainerObserver, Observers};
use crate::provider::{AnyArc, Provider};
use crate::refs::{RefRegistry, ServiceRef};
use crate::registration::{Registration, Registry};
use crate::token::{AnyToken, Token, TokenKey};

mod resolve;
mod scope;

static NEXT_SCOPE: AtomicU64 = AtomicU64::new(1);

const LIVE: u8 = 0;
const DISPOSING: u8 = 1;
const DISPOSED: u8 = 2;

/// Dependency injection container scope.
///
/// A `Container` is a cheap, cloneable handle to one scope: the root created
/// by [`Container::new`], or a child created by
/// [`create_scope`](Container::create_scope). Each scope owns its own
/// registry, cache, middleware, observers and [`RefRegistry`]; lookups that
/// miss locally fall back to the ancestors.
///
/// # Examples
///
/// ```
/// use ferrous_refs::{Container, Provider, Token};
/// use std::sync::Arc;
///
/// struct Config { url: String }
/// struct Repository { config: Arc<Config> }
///
/// let config = Token::<Config>::new("CONFIG");
/// let repo = Token::<Repository>::new("REPOSITORY");
///
/// let root = Container::new();
/// root.register(&config, Provider::value(Config { url: "postgres://localhost".into() })).unwrap();
/// root.register(&repo, Provider::factory(move |c| {
///     Ok(Repository { config: c.resolve(&config)? })
/// }).scoped()).unwrap();
///
/// let request = root.create_scope().unwrap();
/// let repository = request.resolve(&repo).unwrap();
/// assert_eq!(repository.config.url, "postgres://localhost");
///
/// request.dispose();
/// assert!(request.is_disposed());
/// assert!(!root.is_disposed());
/// ```
#[derive(Clone)]
pub struct Container {
    pub(crate) inner: Arc<ContainerInner>,
}

pub(crate) struct ContainerInner {
    id: String,
    serial: u64,
    parent: Option<Container>,
    depth: usize,
    pub(crate) registry: Mutex<Registry>,
    children: Mutex<Vec<Container>>,
    middlewares: RwLock<Vec<Arc<dyn Middleware>>>,
    observers: RwLock<Observers>,
    refs: RefRegistry,
    state: AtomicU8,
}

impl Container {
    /// Creates an empty root scope with id `"root"`.
    pub fn new() -> Self {
        Self::with_parent(Some("root".to_string()), None)
    }

    fn with_parent(id: Option<String>, parent: Option<Container>) -> Self {
        let serial = NEXT_SCOPE.fetch_add(1, Ordering::Relaxed);
        let depth = parent.as_ref().map_or(0, |p| p.inner.depth + 1);
        Self {
            inner: Arc::new(ContainerInner {
                id: id.unwrap_or_else(|| format!("scope-{serial}")),
                serial,
                parent,
                depth,
                registry: Mutex::new(Registry::new()),
                children: Mutex::new(Vec::new()),
                middlewares: RwLock::new(Vec::new()),
                observers: RwLock::new(Observers::default()),
                refs: RefRegistry::new(),
                state: AtomicU8::new(LIVE),
            }),
        }
    }

    pub(crate) fn ensure_live(&self) -> DiResult<()> {
        if self.inner.state.load(Ordering::Acquire) == DISPOSED {
            return Err(DiError::ContextDisposed(self.inner.id.clone()));
        }
        Ok(())
    }

    pub(crate) fn frame(&self, token: AnyToken) -> Frame {
        Frame {
            scope: self.inner.serial,
            key: token.key(),
            name: token.name(),
        }
    }

    /// Parent, grandparent, ... up to the root.
    pub(crate) fn ancestors(&self) -> impl Iterator<Item = &Container> {
        std::iter::successors(self.inner.parent.as_ref(), |c| c.inner.parent.as_ref())
    }

    // ----- Registration -----

    /// Binds `provider` to `token` in this scope.
    ///
    /// Re-registering a token replaces the previous binding in this scope
    /// only, discarding its cached instance. Ancestors are never touched.
    pub fn register<T>(&self, token: &Token<T>, provider: Provider<T>) -> DiResult<()>
    where
        T: Send + Sync + 'static,
    {
        self.ensure_live()?;
        let lifecycle = provider.lifecycle;
        let kind = provider.kind;
        let registration = Registration::new(token.name(), provider);
        let replaced = self.inner.registry.lock().insert(token.key(), registration);
        let replaced = replaced.is_some();

        tracing::trace!(
            target: "ferrous_refs",
            scope = %self.inner.id,
            token = token.name(),
            %kind,
            %lifecycle,
            replaced,
            "registered provider"
        );
        self.emit("registered", |o| o.registered(&self.inner.id, token.erase(), lifecycle));
        Ok(())
    }

    /// [`register`](Self::register) with extra tags.
    pub fn register_tagged<T, I, S>(&self, token: &Token<T>, provider: Provider<T>, tags: I) -> DiResult<()>
    where
        T: Send + Sync + 'static,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.register(token, provider.tags(tags))
    }

    /// Registers only if neither this scope nor an ancestor already knows
    /// `token`. Returns whether the provider was registered.
    pub fn register_if_missing<T>(&self, token: &Token<T>, provider: Provider<T>) -> DiResult<bool>
    where
        T: Send + Sync + 'static,
    {
        if self.has(token) {
            return Ok(false);
        }
        self.register(token, provider)?;
        Ok(true)
    }

    /// Whether `token` is registered here or in an ancestor.
    pub fn has<T: ?Sized>(&self, token: &Token<T>) -> bool {
        self.has_key(token.key())
    }

    /// [`has`](Self::has) by raw key. Always `false` once disposed.
    pub fn has_key(&self, key: TokenKey) -> bool {
        if self.is_disposed() {
            return false;
        }
        let local = self.inner.registry.lock().contains(key);
        local || self.ancestors().any(|a| a.inner.registry.lock().contains(key))
    }

    // ----- Introspection -----

    /// Tokens registered in this scope, in registration order. Includes
    /// scoped entries copied down from ancestors once resolved here.
    pub fn tokens(&self) -> Vec<AnyToken> {
        self.inner
            .registry
            .lock()
            .iter()
            .map(|(key, reg)| AnyToken::from_parts(key, reg.name))
            .collect()
    }

    /// Tokens visible from this scope, closest scope first, without
    /// duplicates.
    pub fn all_tokens(&self) -> Vec<AnyToken> {
        let mut seen = HashSet::new();
        let mut tokens = Vec::new();
        for scope in std::iter::once(self).chain(self.ancestors()) {
            for token in scope.tokens() {
                if seen.insert(token.key()) {
                    tokens.push(token);
                }
            }
        }
        tokens
    }

    /// Number of registrations held by this scope alone.
    pub fn len(&self) -> usize {
        self.inner.registry.lock().len()
    }

    /// Whether this scope holds no registrations of its own.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of this scope's registrations, in registration order.
    pub fn snapshot(&self) -> Vec<EntrySnapshot> {
        self.inner.registry.lock().iter().map(|(key, reg)| reg.snapshot(key)).collect()
    }

    /// Whether [`dispose`](Self::dispose) has completed.
    pub fn is_disposed(&self) -> bool {
        self.inner.state.load(Ordering::Acquire) == DISPOSED
    }

    /// `"root"`, `"scope-N"`, or the name given to
    /// [`create_named_scope`](Self::create_named_scope).
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// The enclosing scope; `None` for a root.
    pub fn parent(&self) -> Option<Container> {
        self.inner.parent.clone()
    }

    /// Distance from the root; the root is at depth 0.
    pub fn depth(&self) -> usize {
        self.inner.depth
    }

    /// Child scopes not yet disposed.
    ///
    /// The parent owns its children: dropping a child handle does not
    /// detach it, only [`dispose`](Self::dispose) does.
    pub fn child_count(&self) -> usize {
        self.inner
            .children
            .lock()
            .iter()
            .filter(|child| !child.is_disposed())
            .count()
    }

    // ----- Middleware & observers -----

    /// Appends a resolve interceptor to this scope.
    ///
    /// Applies to synchronous resolves started from this scope or any
    /// descendant. Async factories resolved through
    /// [`resolve_async`](Self::resolve_async) bypass middleware.
    pub fn use_middleware<F>(&self, middleware: F)
    where
        F: Fn(AnyToken, Next<'_>) -> DiResult<AnyArc> + Send + Sync + 'static,
    {
        self.use_middleware_arc(Arc::new(middleware));
    }

    /// [`use_middleware`](Self::use_middleware) for an already shared
    /// [`Middleware`] implementation.
    pub fn use_middleware_arc(&self, middleware: Arc<dyn Middleware>) {
        self.inner.middlewares.write().push(middleware);
    }

    /// Full chain for a resolve from this scope: root's first.
    pub(crate) fn middleware_chain(&self) -> Vec<Arc<dyn Middleware>> {
        let mut scopes: Vec<&Container> = std::iter::once(self).chain(self.ancestors()).collect();
        scopes.reverse();
        let mut chain = Vec::new();
        for scope in scopes {
            chain.extend(scope.inner.middlewares.read().iter().cloned());
        }
        chain
    }

    /// Adds an event observer to this scope. It also sees events from every
    /// descendant scope.
    pub fn observe(&self, observer: Arc<dyn ContainerObserver>) {
        self.inner.observers.write().add(observer);
    }

    pub(crate) fn has_observers(&self) -> bool {
        std::iter::once(self)
            .chain(self.ancestors())
            .any(|scope| scope.inner.observers.read().has_observers())
    }

    pub(crate) fn emit<F>(&self, event: &'static str, f: F)
    where
        F: Fn(&dyn ContainerObserver),
    {
        let observers: Vec<Arc<dyn ContainerObserver>> = std::iter::once(self)
            .chain(self.ancestors())
            .flat_map(|scope| scope.inner.observers.read().snapshot())
            .collect();
        if !observers.is_empty() {
            notify_all(&observers, event, f);
        }
    }

    // ----- References -----

    /// This scope's reference registry.
    pub fn refs(&self) -> &RefRegistry {
        &self.inner.refs
    }

    /// Resolves `token` and wraps the instance in a tracked [`ServiceRef`].
    ///
    /// The ref is invalidated when this scope is disposed.
    pub fn acquire_ref<T>(&self, token: &Token<T>) -> DiResult<ServiceRef<T>>
    where
        T: Send + Sync + 'static,
    {
        let value = self.resolve(token)?;
        Ok(self.inner.refs.acquire(token, value))
    }

    /// [`acquire_ref`](Self::acquire_ref) through
    /// [`resolve_async`](Self::resolve_async).
    pub async fn acquire_ref_async<T>(&self, token: &Token<T>) -> DiResult<ServiceRef<T>>
    where
        T: Send + Sync + 'static,
    {
        let value = self.resolve_async(token).await?;
        Ok(self.inner.refs.acquire(token, value))
    }

    /// Type-erased [`acquire_ref`](Self::acquire_ref).
    pub fn acquire_ref_any(&self, token: AnyToken) -> DiResult<ServiceRef<dyn Any + Send + Sync>> {
        let value = self.resolve_any(token)?;
        Ok(self.inner.refs.acquire_any(token, value))
    }

    /// Builds a [`ServiceBinding`] over `entries`, acquiring from this scope
    /// on first access of each name.
    pub fn bind<I, S>(&self, entries: I) -> ServiceBinding
    where
        I: IntoIterator<Item = (S, AnyToken)>,
        S: Into<String>,
    {
        let container = self.clone();
        ServiceBinding::new(entries, move |token| container.acquire_ref_any(token))
    }
}

impl Default for Container {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("id", &self.inner.id)
            .field("depth", &self.inner.depth)
            .field("entries", &self.len())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl Drop for ContainerInner {
    fn drop(&mut self) {
        if *self.state.get_mut() == DISPOSED {
            return;
        }
        let undisposed = self
            .registry
            .get_mut()
            .iter()
            .filter(|(_, reg)| reg.disposer.is_some() && reg.cached.is_some())
            .count();
        if undisposed > 0 {
            tracing::warn!(
                target: "ferrous_refs",
                scope = %self.id,
                undisposed,
                "container scope dropped with undisposed resources; call dispose() before dropping"
            );
        }
    }
}
