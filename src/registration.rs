//! Service registration types.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::descriptors::EntrySnapshot;
use crate::lifecycle::Lifecycle;
use crate::provider::{AnyArc, AsyncCtor, Disposer, Provider, ProviderKind, Recipe, SyncCtor};
use crate::token::{AnyToken, TokenKey};

static NEXT_REGISTRATION: AtomicU64 = AtomicU64::new(1);

/// One bound provider plus its per-scope cache.
pub(crate) struct Registration {
    /// Changes on every (re-)registration and scope copy; stale builds
    /// compare against it before writing the cache.
    pub(crate) id: u64,
    pub(crate) name: &'static str,
    pub(crate) kind: ProviderKind,
    pub(crate) lifecycle: Lifecycle,
    pub(crate) recipe: Recipe,
    pub(crate) disposer: Option<Disposer>,
    pub(crate) tags: BTreeSet<String>,
    pub(crate) cached: Option<AnyArc>,
    pub(crate) resolved: bool,
    pub(crate) async_gate: Arc<tokio::sync::Mutex<()>>,
}

/// What the resolver has to do for an entry, decided under the registry lock
/// and carried out after it is released.
pub(crate) enum Plan {
    Ready(AnyArc),
    Build {
        ctor: SyncCtor,
        lifecycle: Lifecycle,
        id: u64,
    },
    Alias(AnyToken),
    Async {
        ctor: AsyncCtor,
        lifecycle: Lifecycle,
        id: u64,
        gate: Arc<tokio::sync::Mutex<()>>,
        cached: Option<AnyArc>,
    },
}

impl Registration {
    pub(crate) fn new<T>(name: &'static str, provider: Provider<T>) -> Self {
        Self {
            id: NEXT_REGISTRATION.fetch_add(1, Ordering::Relaxed),
            name,
            kind: provider.kind,
            lifecycle: provider.lifecycle,
            recipe: provider.recipe,
            disposer: provider.disposer,
            tags: provider.tags,
            cached: None,
            resolved: false,
            async_gate: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// Fresh registration sharing the recipe, for a descendant scope that
    /// resolves a scoped entry it inherited.
    pub(crate) fn copy_for_scope(&self) -> Self {
        Self {
            id: NEXT_REGISTRATION.fetch_add(1, Ordering::Relaxed),
            name: self.name,
            kind: self.kind,
            lifecycle: self.lifecycle,
            recipe: self.recipe.clone(),
            disposer: self.disposer.clone(),
            tags: self.tags.clone(),
            cached: None,
            resolved: false,
            async_gate: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    pub(crate) fn plan(&mut self) -> Plan {
        match &self.recipe {
            Recipe::Value(value) => {
                self.resolved = true;
                let value = self.cached.get_or_insert_with(|| Arc::clone(value));
                Plan::Ready(Arc::clone(value))
            }
            Recipe::Factory(ctor) => match &self.cached {
                Some(value) => Plan::Ready(Arc::clone(value)),
                None => Plan::Build {
                    ctor: Arc::clone(ctor),
                    lifecycle: self.lifecycle,
                    id: self.id,
                },
            },
            Recipe::Alias(target) => {
                self.resolved = true;
                Plan::Alias(*target)
            }
            Recipe::Async(ctor) => Plan::Async {
                ctor: Arc::clone(ctor),
                lifecycle: self.lifecycle,
                id: self.id,
                gate: Arc::clone(&self.async_gate),
                cached: self.cached.clone(),
            },
        }
    }

    /// Records a freshly built value. Returns the instance callers should
    /// see: the already-cached one if another build won the race.
    pub(crate) fn commit(&mut self, id: u64, value: AnyArc) -> AnyArc {
        if self.id != id {
            return value;
        }
        self.resolved = true;
        if !self.lifecycle.is_cached() {
            return value;
        }
        Arc::clone(self.cached.get_or_insert(value))
    }

    pub(crate) fn snapshot(&self, key: TokenKey) -> EntrySnapshot {
        EntrySnapshot {
            name: self.name.to_string(),
            key: key.as_u64(),
            kind: self.kind,
            lifecycle: self.lifecycle,
            resolved: self.resolved,
            tags: self.tags.iter().cloned().collect(),
        }
    }
}

/// Per-scope registry, keeping registration order.
#[derive(Default)]
pub(crate) struct Registry {
    entries: Vec<(TokenKey, Registration)>,
    index: HashMap<TokenKey, usize>,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces, keeping the original position on replace.
    /// Returns the replaced registration so the caller can drop it
    /// outside the lock.
    pub(crate) fn insert(&mut self, key: TokenKey, registration: Registration) -> Option<Registration> {
        match self.index.get(&key) {
            Some(&pos) => Some(std::mem::replace(&mut self.entries[pos].1, registration)),
            None => {
                self.index.insert(key, self.entries.len());
                self.entries.push((key, registration));
                None
            }
        }
    }

    #[inline]
    pub(crate) fn get(&self, key: TokenKey) -> Option<&Registration> {
        self.index.get(&key).map(|&pos| &self.entries[pos].1)
    }

    #[inline]
    pub(crate) fn get_mut(&mut self, key: TokenKey) -> Option<&mut Registration> {
        match self.index.get(&key) {
            Some(&pos) => Some(&mut self.entries[pos].1),
            None => None,
        }
    }

    #[inline]
    pub(crate) fn contains(&self, key: TokenKey) -> bool {
        self.index.contains_key(&key)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (TokenKey, &Registration)> {
        self.entries.iter().map(|(k, r)| (*k, r))
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Empties the registry, handing back the entries in registration order.
    pub(crate) fn take(&mut self) -> Vec<(TokenKey, Registration)> {
        self.index.clear();
        std::mem::take(&mut self.entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::Token;

    #[test]
    fn replace_keeps_position() {
        let a = Token::<u8>::new("A");
        let b = Token::<u8>::new("B");
        let mut registry = Registry::new();
        registry.insert(a.key(), Registration::new("A", Provider::value(1u8)));
        registry.insert(b.key(), Registration::new("B", Provider::value(2u8)));
        let old = registry.insert(a.key(), Registration::new("A", Provider::value(3u8)));

        assert!(old.is_some());
        assert_eq!(registry.len(), 2);
        let order: Vec<_> = registry.iter().map(|(k, _)| k).collect();
        assert_eq!(order, vec![a.key(), b.key()]);
    }

    #[test]
    fn stale_commit_is_not_cached() {
        let mut reg = Registration::new("N", Provider::<u8>::factory(|_| Ok(1)));
        let stale = reg.id;
        let mut fresh = reg.copy_for_scope();
        assert_ne!(stale, fresh.id);

        let value: AnyArc = Arc::new(1u8);
        fresh.commit(stale, Arc::clone(&value));
        assert!(fresh.cached.is_none());

        reg.commit(stale, value);
        assert!(reg.cached.is_some());
        assert!(reg.resolved);
    }

    #[test]
    fn second_commit_returns_first_instance() {
        let mut reg = Registration::new("N", Provider::<u8>::factory(|_| Ok(1)));
        let id = reg.id;
        let first: AnyArc = Arc::new(1u8);
        let second: AnyArc = Arc::new(2u8);
        let a = reg.commit(id, Arc::clone(&first));
        let b = reg.commit(id, second);
        assert!(Arc::ptr_eq(&a, &first));
        assert!(Arc::ptr_eq(&b, &first));
    }

    #[test]
    fn transient_commit_does_not_cache() {
        let mut reg = Registration::new("T", Provider::<u8>::factory(|_| Ok(1)).transient());
        let id = reg.id;
        reg.commit(id, Arc::new(1u8));
        assert!(reg.cached.is_none());
        assert!(reg.resolved);
    }
}
