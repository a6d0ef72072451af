//! Resolution: lookup through the scope chain, construction and caching.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use super::Container;
use crate::error::{DiError, DiResult};
use crate::internal::{extend_async_chain, within_async_chain, Frame, StackGuard};
use crate::lifecycle::Lifecycle;
use crate::middleware::Next;
use crate::provider::{AnyArc, AsyncCtor, BoxFuture, SyncCtor};
use crate::registration::{Plan, Registration};
use crate::token::{AnyToken, Token, TokenKey};

fn downcast<T: Send + Sync + 'static>(value: AnyArc, name: &'static str) -> DiResult<Arc<T>> {
    value.downcast::<T>().map_err(|_| DiError::TypeMismatch(name))
}

impl Container {
    /// Resolves `token` synchronously.
    ///
    /// Fails with [`DiError::ServiceNotFound`] if no scope in the chain
    /// knows the token, [`DiError::AsyncProviderMismatch`] for async
    /// providers, [`DiError::CircularDependency`] when construction
    /// re-enters itself and [`DiError::ContextDisposed`] once the scope is
    /// disposed. Provider errors come back unchanged.
    ///
    /// # Examples
    ///
    /// ```
    /// use ferrous_refs::{Container, DiError, Provider, Token};
    ///
    /// let a = Token::<u32>::new("A");
    /// let b = Token::<u32>::new("B");
    /// let container = Container::new();
    /// container.register(&a, Provider::factory(move |c| Ok(*c.resolve(&b)? + 1))).unwrap();
    /// container.register(&b, Provider::factory(move |c| Ok(*c.resolve(&a)? + 1))).unwrap();
    ///
    /// match container.resolve(&a) {
    ///     Err(DiError::CircularDependency(path)) => assert_eq!(path, vec!["A", "B", "A"]),
    ///     _ => unreachable!(),
    /// }
    /// ```
    pub fn resolve<T>(&self, token: &Token<T>) -> DiResult<Arc<T>>
    where
        T: Send + Sync + 'static,
    {
        let value = self.resolve_any(token.erase())?;
        downcast(value, token.name())
    }

    /// Type-erased [`resolve`](Self::resolve). Runs the middleware chain.
    pub fn resolve_any(&self, token: AnyToken) -> DiResult<AnyArc> {
        self.ensure_live()?;
        let started = self.has_observers().then(Instant::now);

        let chain = self.middleware_chain();
        let core = || self.resolve_core(token);
        let result = if chain.is_empty() {
            core()
        } else {
            Next::new(&chain, token, &core).run()
        };

        if let Some(started) = started {
            self.report(token, started, &result);
        }
        result
    }

    /// Like [`resolve`](Self::resolve), but a missing registration yields
    /// `Ok(None)`, whether it is `token` itself or one of its dependencies.
    /// Every other failure still surfaces.
    pub fn try_resolve<T>(&self, token: &Token<T>) -> DiResult<Option<Arc<T>>>
    where
        T: Send + Sync + 'static,
    {
        self.ensure_live()?;
        match self.resolve(token) {
            Ok(value) => Ok(Some(value)),
            Err(DiError::ServiceNotFound(missing)) => {
                tracing::trace!(target: "ferrous_refs", token = token.name(), missing = %missing, "optional resolve found nothing");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Resolves `token`, awaiting async providers.
    ///
    /// Every other provider kind goes through the synchronous path,
    /// middleware included. Concurrent callers of the same uncached
    /// singleton or scoped async provider are serialized, so its factory
    /// runs once per owning scope.
    ///
    /// ```
    /// use ferrous_refs::{Container, Provider, Token};
    /// use std::sync::Arc;
    ///
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() {
    /// let pool = Token::<Vec<String>>::new("POOL");
    /// let container = Container::new();
    /// container.register(&pool, Provider::async_factory(|_c| async {
    ///     tokio::task::yield_now().await;
    ///     Ok(vec!["conn-1".to_string()])
    /// })).unwrap();
    ///
    /// let (a, b) = tokio::join!(container.resolve_async(&pool), container.resolve_async(&pool));
    /// assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
    /// assert!(container.resolve(&pool).is_err());
    /// # }
    /// ```
    pub async fn resolve_async<T>(&self, token: &Token<T>) -> DiResult<Arc<T>>
    where
        T: Send + Sync + 'static,
    {
        let value = self.resolve_async_any(token.erase()).await?;
        downcast(value, token.name())
    }

    /// Type-erased [`resolve_async`](Self::resolve_async).
    pub fn resolve_async_any(&self, token: AnyToken) -> BoxFuture<'_, DiResult<AnyArc>> {
        Box::pin(async move {
            self.ensure_live()?;
            let (owner, plan) = self.locate(token)?;
            match plan {
                Plan::Async {
                    ctor,
                    lifecycle,
                    id,
                    gate,
                    cached,
                } => {
                    if let Some(value) = cached {
                        return Ok(value);
                    }
                    let started = self.has_observers().then(Instant::now);
                    let chain = extend_async_chain(owner.frame(token))?;
                    let result = owner.build_async(token, ctor, lifecycle, id, gate, chain).await;
                    if let Some(started) = started {
                        self.report(token, started, &result);
                    }
                    result
                }
                Plan::Alias(target) => {
                    let chain = extend_async_chain(owner.frame(token))?;
                    within_async_chain(chain, self.resolve_async_any(target)).await
                }
                Plan::Ready(_) | Plan::Build { .. } => self.resolve_any(token),
            }
        })
    }

    /// Resolves every entry tagged `tag`, this scope first, then ancestors.
    /// A token shadowed by a closer scope is resolved once, through the
    /// closer binding.
    pub fn resolve_by_tag<T>(&self, tag: &str) -> DiResult<Vec<Arc<T>>>
    where
        T: Send + Sync + 'static,
    {
        self.ensure_live()?;
        self.tagged(tag)
            .into_iter()
            .map(|token| downcast(self.resolve_any(token)?, token.name()))
            .collect()
    }

    /// Type-erased [`resolve_by_tag`](Self::resolve_by_tag).
    pub fn resolve_by_tag_any(&self, tag: &str) -> DiResult<Vec<AnyArc>> {
        self.ensure_live()?;
        self.tagged(tag).into_iter().map(|token| self.resolve_any(token)).collect()
    }

    fn tagged(&self, tag: &str) -> Vec<AnyToken> {
        let mut seen: HashSet<TokenKey> = HashSet::new();
        let mut tokens = Vec::new();
        for scope in std::iter::once(self).chain(self.ancestors()) {
            let registry = scope.inner.registry.lock();
            let mut keys = Vec::with_capacity(registry.len());
            for (key, reg) in registry.iter() {
                keys.push(key);
                if !seen.contains(&key) && reg.tags.contains(tag) {
                    tokens.push(AnyToken::from_parts(key, reg.name));
                }
            }
            seen.extend(keys);
        }
        tokens
    }

    fn report(&self, token: AnyToken, started: Instant, result: &DiResult<AnyArc>) {
        match result {
            Ok(_) => {
                let lifecycle = self.lifecycle_of(token.key()).unwrap_or_default();
                let took = started.elapsed();
                self.emit("resolved", |o| o.resolved(&self.inner.id, token, lifecycle, took));
            }
            Err(err) => self.emit("error", |o| o.error(&self.inner.id, token, err)),
        }
    }

    fn lifecycle_of(&self, key: TokenKey) -> Option<Lifecycle> {
        std::iter::once(self)
            .chain(self.ancestors())
            .find_map(|scope| scope.inner.registry.lock().get(key).map(|reg| reg.lifecycle))
    }

    fn resolve_core(&self, token: AnyToken) -> DiResult<AnyArc> {
        let (owner, plan) = self.locate(token)?;
        match plan {
            Plan::Ready(value) => Ok(value),
            Plan::Build { ctor, id, .. } => owner.build(token, &ctor, id),
            Plan::Alias(target) => {
                let _guard = StackGuard::enter(owner.frame(token))?;
                self.resolve_any(target)
            }
            Plan::Async { .. } => Err(DiError::AsyncProviderMismatch(token.name())),
        }
    }

    /// Finds the scope that serves `token` and what it has to do.
    ///
    /// Scoped entries found in an ancestor are copied into this scope first,
    /// so this scope builds and caches its own instance. Everything else is
    /// served by the ancestor that owns it.
    fn locate(&self, token: AnyToken) -> DiResult<(Container, Plan)> {
        let key = token.key();
        if let Some(reg) = self.inner.registry.lock().get_mut(key) {
            return Ok((self.clone(), reg.plan()));
        }

        for ancestor in self.ancestors() {
            let mut registry = ancestor.inner.registry.lock();
            let Some(reg) = registry.get_mut(key) else {
                continue;
            };
            if reg.lifecycle != Lifecycle::Scoped {
                return Ok((ancestor.clone(), reg.plan()));
            }

            let copy = reg.copy_for_scope();
            drop(registry);
            return Ok((self.clone(), self.adopt(key, copy)));
        }

        Err(DiError::ServiceNotFound(token.name().to_string()))
    }

    /// Installs a scoped copy unless another resolve already did, and plans
    /// against whichever copy ended up installed.
    fn adopt(&self, key: TokenKey, mut copy: Registration) -> Plan {
        let mut registry = self.inner.registry.lock();
        if let Some(existing) = registry.get_mut(key) {
            return existing.plan();
        }
        let plan = copy.plan();
        registry.insert(key, copy);
        plan
    }

    fn build(&self, token: AnyToken, ctor: &SyncCtor, id: u64) -> DiResult<AnyArc> {
        let _guard = StackGuard::enter(self.frame(token))?;
        let value = ctor(self)?;
        Ok(self.commit(token.key(), id, value))
    }

    async fn build_async(
        &self,
        token: AnyToken,
        ctor: AsyncCtor,
        lifecycle: Lifecycle,
        id: u64,
        gate: Arc<tokio::sync::Mutex<()>>,
        chain: Vec<Frame>,
    ) -> DiResult<AnyArc> {
        if !lifecycle.is_cached() {
            let value = within_async_chain(chain, ctor(self.clone())).await?;
            return Ok(self.commit(token.key(), id, value));
        }

        let _permit = gate.lock().await;
        if let Some(value) = self.cached_for(token.key(), id) {
            return Ok(value);
        }
        let value = within_async_chain(chain, ctor(self.clone())).await?;
        Ok(self.commit(token.key(), id, value))
    }

    fn cached_for(&self, key: TokenKey, id: u64) -> Option<AnyArc> {
        let registry = self.inner.registry.lock();
        registry.get(key).filter(|reg| reg.id == id).and_then(|reg| reg.cached.clone())
    }

    fn commit(&self, key: TokenKey, id: u64, value: AnyArc) -> AnyArc {
        let mut registry = self.inner.registry.lock();
        match registry.get_mut(key) {
            Some(reg) => reg.commit(id, value),
            None => value,
        }
    }
}
