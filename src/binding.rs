//! Service bindings: many lazily acquired refs released as one unit.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{DiError, DiResult};
use crate::provider::AnyArc;
use crate::refs::ServiceRef;
use crate::token::AnyToken;

type AnyRef = ServiceRef<dyn Any + Send + Sync>;
type AcquireFn = Arc<dyn Fn(AnyToken) -> DiResult<AnyRef> + Send + Sync>;

struct BindingSlot {
    name: String,
    token: AnyToken,
    held: Mutex<Option<AnyRef>>,
}

/// A named set of service refs, acquired on first access and released
/// together.
///
/// Typical use is a component that needs a handful of services for as long
/// as it lives: bind them once, read them by name, release the lot when the
/// component goes away. Dropping the binding releases it as well.
///
/// # Examples
///
/// ```
/// use ferrous_refs::{Container, DiError, Provider, Token};
///
/// let db = Token::<String>::new("DB");
/// let cache = Token::<u32>::new("CACHE_TTL");
/// let container = Container::new();
/// container.register(&db, Provider::value("postgres://localhost".to_string())).unwrap();
/// container.register(&cache, Provider::value(300)).unwrap();
///
/// let binding = container.bind([("db", db.erase()), ("ttl", cache.erase())]);
/// assert_eq!(binding.acquired_count(), 0);
///
/// assert_eq!(*binding.get::<u32>("ttl").unwrap(), 300);
/// assert_eq!(binding.acquired_count(), 1);
/// assert_eq!(container.refs().ref_count(&cache), 1);
///
/// assert_eq!(binding.release(), 1);
/// assert_eq!(container.refs().total_active(), 0);
/// assert!(matches!(binding.get::<String>("db"), Err(DiError::RefAlreadyReleased { .. })));
/// ```
pub struct ServiceBinding {
    slots: Vec<BindingSlot>,
    acquire: AcquireFn,
    released: AtomicBool,
}

impl ServiceBinding {
    /// Creates a binding over `entries`, using `acquire` to obtain each ref
    /// the first time its name is read. A repeated name keeps the last token.
    pub fn new<I, S, F>(entries: I, acquire: F) -> Self
    where
        I: IntoIterator<Item = (S, AnyToken)>,
        S: Into<String>,
        F: Fn(AnyToken) -> DiResult<AnyRef> + Send + Sync + 'static,
    {
        let mut slots: Vec<BindingSlot> = Vec::new();
        for (name, token) in entries {
            let name = name.into();
            match slots.iter_mut().find(|slot| slot.name == name) {
                Some(slot) => slot.token = token,
                None => slots.push(BindingSlot {
                    name,
                    token,
                    held: Mutex::new(None),
                }),
            }
        }
        Self {
            slots,
            acquire: Arc::new(acquire),
            released: AtomicBool::new(false),
        }
    }

    fn slot(&self, name: &str) -> DiResult<&BindingSlot> {
        self.slots
            .iter()
            .find(|slot| slot.name == name)
            .ok_or_else(|| DiError::ServiceNotFound(name.to_string()))
    }

    fn released_error(slot: &BindingSlot) -> DiError {
        let id = slot.held.lock().as_ref().map_or(0, ServiceRef::id);
        DiError::RefAlreadyReleased {
            token: slot.token.name(),
            id,
        }
    }

    /// The instance bound to `name`, acquiring its ref on first access.
    pub fn get<T>(&self, name: &str) -> DiResult<Arc<T>>
    where
        T: Send + Sync + 'static,
    {
        let slot = self.slot(name)?;
        let value = self.get_any(name)?;
        value.downcast::<T>().map_err(|_| DiError::TypeMismatch(slot.token.name()))
    }

    /// Type-erased [`get`](Self::get).
    pub fn get_any(&self, name: &str) -> DiResult<AnyArc> {
        let slot = self.slot(name)?;
        if self.released.load(Ordering::Acquire) {
            return Err(Self::released_error(slot));
        }

        if let Some(existing) = slot.held.lock().as_ref() {
            return existing.current();
        }

        // Acquire without the slot lock: it may run providers.
        let fresh = (self.acquire)(slot.token)?;
        let mut held = slot.held.lock();
        if self.released.load(Ordering::Acquire) {
            fresh.release();
            let id = fresh.id();
            return Err(DiError::RefAlreadyReleased {
                token: slot.token.name(),
                id,
            });
        }
        match held.as_ref() {
            Some(existing) => {
                fresh.release();
                existing.current()
            }
            None => {
                let value = fresh.current();
                *held = Some(fresh);
                value
            }
        }
    }

    /// Whether `name` is part of this binding.
    pub fn contains(&self, name: &str) -> bool {
        self.slots.iter().any(|slot| slot.name == name)
    }

    /// Bound names, in the order they were given.
    pub fn names(&self) -> Vec<&str> {
        self.slots.iter().map(|slot| slot.name.as_str()).collect()
    }

    /// Names whose ref has been acquired and is still alive.
    pub fn acquired_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.held.lock().as_ref().is_some_and(ServiceRef::is_alive))
            .count()
    }

    /// Id of the ref held for `name`, once acquired.
    pub fn ref_id(&self, name: &str) -> Option<u64> {
        let slot = self.slot(name).ok()?;
        let held = slot.held.lock();
        held.as_ref().map(ServiceRef::id)
    }

    /// Releases every acquired ref. Idempotent: a second call returns 0.
    /// Afterwards every access fails with [`DiError::RefAlreadyReleased`].
    pub fn release(&self) -> usize {
        if self.released.swap(true, Ordering::AcqRel) {
            return 0;
        }
        self.slots
            .iter()
            .filter(|slot| slot.held.lock().as_ref().is_some_and(ServiceRef::release))
            .count()
    }

    /// True until released, while at least one acquired ref is alive.
    pub fn is_alive(&self) -> bool {
        !self.released.load(Ordering::Acquire) && self.acquired_count() > 0
    }
}

impl Drop for ServiceBinding {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for ServiceBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceBinding")
            .field("names", &self.names())
            .field("acquired", &self.acquired_count())
            .field("released", &self.released.load(Ordering::Acquire))
            .finish()
    }
}
