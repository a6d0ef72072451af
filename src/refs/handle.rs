//! Strong and weak service handles.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::registry::RegistryInner;
use crate::error::{DiError, DiResult};
use crate::token::AnyToken;

/// Value holder shared between a [`ServiceRef`] and its registry record.
/// Emptied exactly once, by whichever side releases first.
pub(crate) struct RefSlot<T: ?Sized> {
    value: Mutex<Option<Arc<T>>>,
}

impl<T: ?Sized> RefSlot<T> {
    pub(crate) fn new(value: Arc<T>) -> Self {
        Self {
            value: Mutex::new(Some(value)),
        }
    }

    fn get(&self) -> Option<Arc<T>> {
        self.value.lock().clone()
    }

    fn is_filled(&self) -> bool {
        self.value.lock().is_some()
    }

    /// Empties the slot; true if it still held the value. The value is
    /// dropped after the lock is released.
    fn take(&self) -> bool {
        let taken = self.value.lock().take();
        taken.is_some()
    }
}

/// Erased view of a slot, so the registry can revoke refs of any type.
pub(crate) trait Revoke: Send + Sync {
    fn revoke(&self) -> bool;
}

impl<T: ?Sized + Send + Sync + 'static> Revoke for RefSlot<T> {
    fn revoke(&self) -> bool {
        self.take()
    }
}

/// Tracked, release-once handle to a service instance.
///
/// Every `ServiceRef` is counted by the [`RefRegistry`] that issued it until
/// it is released, either explicitly with [`release`](Self::release), by
/// [`RefRegistry::invalidate_all`] (which also happens when the issuing
/// scope is disposed), or by being dropped. A drop while still alive is
/// recorded as a leak.
///
/// [`RefRegistry`]: crate::RefRegistry
/// [`RefRegistry::invalidate_all`]: crate::RefRegistry::invalidate_all
///
/// # Examples
///
/// ```
/// use ferrous_refs::{Container, DiError, Provider, Token};
///
/// let db = Token::<String>::new("DB");
/// let container = Container::new();
/// container.register(&db, Provider::value("postgres://localhost".to_string())).unwrap();
///
/// let handle = container.acquire_ref(&db).unwrap();
/// assert_eq!(container.refs().ref_count(&db), 1);
/// assert_eq!(*handle.current().unwrap(), "postgres://localhost");
///
/// assert!(handle.release());
/// assert!(!handle.release());
/// assert_eq!(container.refs().ref_count(&db), 0);
/// assert!(matches!(handle.current(), Err(DiError::RefAlreadyReleased { .. })));
/// ```
pub struct ServiceRef<T: ?Sized> {
    id: u64,
    token: AnyToken,
    acquired_at: Instant,
    slot: Arc<RefSlot<T>>,
    registry: Weak<RegistryInner>,
}

impl<T: ?Sized + Send + Sync + 'static> ServiceRef<T> {
    pub(crate) fn new(
        id: u64,
        token: AnyToken,
        acquired_at: Instant,
        slot: Arc<RefSlot<T>>,
        registry: Weak<RegistryInner>,
    ) -> Self {
        Self {
            id,
            token,
            acquired_at,
            slot,
            registry,
        }
    }

    /// The referenced instance, while the ref is alive.
    pub fn current(&self) -> DiResult<Arc<T>> {
        self.slot.get().ok_or(DiError::RefAlreadyReleased {
            token: self.token.name(),
            id: self.id,
        })
    }

    /// Releases the ref. Idempotent: returns `true` only for the call that
    /// actually released it.
    pub fn release(&self) -> bool {
        if !self.slot.take() {
            return false;
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.forget(self.id);
        }
        true
    }

    /// Whether the ref has not been released yet.
    pub fn is_alive(&self) -> bool {
        self.slot.is_filled()
    }

    /// Registry-assigned id, strictly increasing per registry.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Token the ref was acquired under.
    pub fn token(&self) -> AnyToken {
        self.token
    }

    /// Diagnostic name of [`token`](Self::token).
    pub fn token_name(&self) -> &'static str {
        self.token.name()
    }

    /// Monotonic acquisition time.
    pub fn acquired_at(&self) -> Instant {
        self.acquired_at
    }

    /// Time since acquisition.
    pub fn age(&self) -> Duration {
        self.acquired_at.elapsed()
    }

    /// Runs `f` against the instance, then releases the ref. The release
    /// also happens if `f` panics.
    ///
    /// ```
    /// use ferrous_refs::{Container, Provider, Token};
    ///
    /// let port = Token::<u16>::new("PORT");
    /// let container = Container::new();
    /// container.register(&port, Provider::value(8080)).unwrap();
    ///
    /// let doubled = container.acquire_ref(&port).unwrap().using(|p| *p * 2).unwrap();
    /// assert_eq!(doubled, 16160);
    /// assert_eq!(container.refs().total_active(), 0);
    /// ```
    pub fn using<R>(self, f: impl FnOnce(&T) -> R) -> DiResult<R> {
        let guard = ReleaseOnDrop(self);
        let value = guard.0.current()?;
        Ok(f(&value))
    }

    /// Async counterpart of [`using`](Self::using). The ref is released when
    /// the future completes, panics, or is dropped before completion.
    pub async fn using_async<R, F, Fut>(self, f: F) -> DiResult<R>
    where
        F: FnOnce(Arc<T>) -> Fut,
        Fut: Future<Output = R>,
    {
        let guard = ReleaseOnDrop(self);
        let value = guard.0.current()?;
        Ok(f(value).await)
    }

    /// Non-owning handle to the same instance. Does not affect ref counts.
    pub fn to_weak(&self) -> DiResult<WeakRef<T>> {
        let value = self.current()?;
        Ok(WeakRef {
            weak: Arc::downgrade(&value),
            token: self.token,
        })
    }
}

impl<T: ?Sized> Drop for ServiceRef<T> {
    fn drop(&mut self) {
        let taken = self.slot.value.lock().take();
        if taken.is_none() {
            return;
        }
        drop(taken);
        if let Some(registry) = self.registry.upgrade() {
            registry.record_leak(self.id);
        }
    }
}

impl<T: ?Sized> fmt::Debug for ServiceRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRef")
            .field("id", &self.id)
            .field("token", &self.token.name())
            .field("alive", &self.slot.value.lock().is_some())
            .finish()
    }
}

struct ReleaseOnDrop<T: ?Sized + Send + Sync + 'static>(ServiceRef<T>);

impl<T: ?Sized + Send + Sync + 'static> Drop for ReleaseOnDrop<T> {
    fn drop(&mut self) {
        self.0.release();
    }
}

/// Non-owning handle that never participates in ref counting.
///
/// Backed by [`std::sync::Weak`]: it upgrades while any strong owner (a
/// scope cache, a live [`ServiceRef`], a caller's `Arc`) keeps the instance
/// alive.
///
/// ```
/// use ferrous_refs::{RefRegistry, Token};
/// use std::sync::Arc;
///
/// let token = Token::<String>::new("SESSION");
/// let registry = RefRegistry::new();
/// let handle = registry.acquire(&token, Arc::new("abc".to_string()));
/// let weak = handle.to_weak().unwrap();
///
/// assert_eq!(registry.ref_count(&token), 1);
/// assert_eq!(*weak.deref().unwrap(), "abc");
///
/// handle.release();
/// assert!(weak.deref().is_none());
/// assert!(!weak.is_alive());
/// ```
pub struct WeakRef<T: ?Sized> {
    weak: Weak<T>,
    token: AnyToken,
}

impl<T: ?Sized> WeakRef<T> {
    /// Upgrades to a strong `Arc`, if the instance is still alive.
    pub fn deref(&self) -> Option<Arc<T>> {
        self.weak.upgrade()
    }

    /// Whether the instance still has a strong owner somewhere.
    pub fn is_alive(&self) -> bool {
        self.weak.strong_count() > 0
    }

    /// Token the originating ref was acquired under.
    pub fn token_name(&self) -> &'static str {
        self.token.name()
    }
}

impl<T: ?Sized> Clone for WeakRef<T> {
    fn clone(&self) -> Self {
        Self {
            weak: self.weak.clone(),
            token: self.token,
        }
    }
}

impl<T: ?Sized> fmt::Debug for WeakRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakRef")
            .field("token", &self.token.name())
            .field("alive", &self.is_alive())
            .finish()
    }
}
