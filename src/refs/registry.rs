//! Reference registry: counts, stats and leak detection for service refs.

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use parking_lot::{Mutex, RwLock};

use super::handle::{RefSlot, Revoke, ServiceRef};
use crate::provider::AnyArc;
use crate::token::{AnyToken, Token, TokenKey};

type LeakHandler = Arc<dyn Fn(&LeakReport) + Send + Sync>;

/// A reference that was reported as leaked.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LeakReport {
    /// Token the ref was acquired under
    pub token_name: String,
    /// Registry-assigned ref id
    pub ref_id: u64,
    /// Wall-clock acquisition time
    pub acquired_at: SystemTime,
    /// Wall-clock time of the check that reported it
    pub detected_at: SystemTime,
    /// Age at detection
    pub age: Duration,
}

/// Aggregate counters of a [`RefRegistry`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RefStats {
    /// Refs ever issued
    pub total_acquired: u64,
    /// Includes invalidations and drop-time releases
    pub total_released: u64,
    /// Refs currently live
    pub active: usize,
    /// High-water mark of `active`
    pub peak_active: usize,
    /// Refs that were dropped without being released
    pub leaked: u64,
    /// Active refs per token name
    pub by_token: BTreeMap<String, usize>,
}

struct ActiveRef {
    token: AnyToken,
    acquired_at: Instant,
    acquired_wall: SystemTime,
    slot: Arc<dyn Revoke>,
}

#[derive(Default)]
struct RefState {
    active: BTreeMap<u64, ActiveRef>,
    by_token: HashMap<TokenKey, BTreeSet<u64>>,
    total_acquired: u64,
    total_released: u64,
    peak_active: usize,
    leaked: u64,
}

impl RefState {
    fn remove(&mut self, id: u64) -> Option<ActiveRef> {
        let record = self.active.remove(&id)?;
        let key = record.token.key();
        if let Some(ids) = self.by_token.get_mut(&key) {
            ids.remove(&id);
            if ids.is_empty() {
                self.by_token.remove(&key);
            }
        }
        self.total_released += 1;
        Some(record)
    }
}

pub(crate) struct RegistryInner {
    next_id: AtomicU64,
    state: Mutex<RefState>,
    leak_handlers: RwLock<Vec<LeakHandler>>,
}

impl RegistryInner {
    /// Drops the record of a ref released through its handle.
    pub(crate) fn forget(&self, id: u64) {
        let record = self.state.lock().remove(id);
        drop(record);
    }

    /// Drops the record of a ref whose handle went away while alive, and
    /// reports it.
    pub(crate) fn record_leak(&self, id: u64) {
        let record = {
            let mut state = self.state.lock();
            let record = state.remove(id);
            if record.is_some() {
                state.leaked += 1;
            }
            record
        };
        let Some(record) = record else {
            return;
        };

        let report = LeakReport {
            token_name: record.token.name().to_string(),
            ref_id: id,
            acquired_at: record.acquired_wall,
            detected_at: SystemTime::now(),
            age: record.acquired_at.elapsed(),
        };
        tracing::warn!(
            target: "ferrous_refs",
            token = %report.token_name,
            ref_id = id,
            age_ms = report.age.as_millis() as u64,
            "service ref dropped without release"
        );

        let handlers = self.leak_handlers.read().clone();
        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(&report))).is_err() {
                tracing::warn!(target: "ferrous_refs", ref_id = id, "leak handler panicked");
            }
        }
    }
}

/// Tracks every outstanding [`ServiceRef`] it issued.
///
/// Each container scope owns one, reachable through
/// [`Container::refs`](crate::Container::refs); standalone registries are
/// useful for values that never go through a container. Cloning is cheap
/// and yields a handle to the same registry.
///
/// # Examples
///
/// ```
/// use ferrous_refs::{RefRegistry, Token};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let conn = Token::<String>::new("CONN");
/// let registry = RefRegistry::new();
///
/// let a = registry.acquire(&conn, Arc::new("primary".to_string()));
/// let b = registry.acquire(&conn, Arc::new("replica".to_string()));
/// assert!(b.id() > a.id());
/// assert_eq!(registry.ref_count(&conn), 2);
///
/// std::thread::sleep(Duration::from_millis(5));
/// let leaks = registry.check_leaks(Duration::from_millis(1));
/// assert_eq!(leaks.len(), 2);
/// assert_eq!(leaks[0].ref_id, a.id());
///
/// assert_eq!(registry.invalidate_all(), 2);
/// assert_eq!(registry.total_active(), 0);
/// assert!(!a.is_alive());
/// ```
#[derive(Clone)]
pub struct RefRegistry {
    inner: Arc<RegistryInner>,
}

impl RefRegistry {
    /// Creates an empty registry. Ref ids start at 1.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                next_id: AtomicU64::new(1),
                state: Mutex::new(RefState::default()),
                leak_handlers: RwLock::new(Vec::new()),
            }),
        }
    }

    fn track(&self, token: AnyToken, slot: Arc<dyn Revoke>) -> (u64, Instant) {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let acquired_at = Instant::now();
        let mut state = self.inner.state.lock();
        state.active.insert(
            id,
            ActiveRef {
                token,
                acquired_at,
                acquired_wall: SystemTime::now(),
                slot,
            },
        );
        state.by_token.entry(token.key()).or_default().insert(id);
        state.total_acquired += 1;
        state.peak_active = state.peak_active.max(state.active.len());
        (id, acquired_at)
    }

    /// Issues a new tracked ref to `value` under `token`.
    pub fn acquire<T>(&self, token: &Token<T>, value: Arc<T>) -> ServiceRef<T>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let token = token.erase();
        let slot = Arc::new(RefSlot::new(value));
        let (id, acquired_at) = self.track(token, slot.clone());
        tracing::trace!(target: "ferrous_refs", token = token.name(), ref_id = id, "ref acquired");
        ServiceRef::new(id, token, acquired_at, slot, Arc::downgrade(&self.inner))
    }

    /// Type-erased [`acquire`](Self::acquire).
    pub fn acquire_any(&self, token: AnyToken, value: AnyArc) -> ServiceRef<dyn Any + Send + Sync> {
        let slot: Arc<RefSlot<dyn Any + Send + Sync>> = Arc::new(RefSlot::new(value));
        let (id, acquired_at) = self.track(token, slot.clone());
        tracing::trace!(target: "ferrous_refs", token = token.name(), ref_id = id, "ref acquired");
        ServiceRef::new(id, token, acquired_at, slot, Arc::downgrade(&self.inner))
    }

    /// Live refs for `token`.
    pub fn ref_count<T: ?Sized>(&self, token: &Token<T>) -> usize {
        self.ref_count_key(token.key())
    }

    /// [`ref_count`](Self::ref_count) by raw key.
    pub fn ref_count_key(&self, key: TokenKey) -> usize {
        self.inner.state.lock().by_token.get(&key).map_or(0, BTreeSet::len)
    }

    /// Live refs across all tokens.
    pub fn total_active(&self) -> usize {
        self.inner.state.lock().active.len()
    }

    /// Point-in-time copy of the counters.
    pub fn stats(&self) -> RefStats {
        let state = self.inner.state.lock();
        let mut by_token = BTreeMap::new();
        for record in state.active.values() {
            *by_token.entry(record.token.name().to_string()).or_insert(0) += 1;
        }
        RefStats {
            total_acquired: state.total_acquired,
            total_released: state.total_released,
            active: state.active.len(),
            peak_active: state.peak_active,
            leaked: state.leaked,
            by_token,
        }
    }

    /// Active refs older than `max_age`, oldest first. Read-only: nothing
    /// is released.
    pub fn check_leaks(&self, max_age: Duration) -> Vec<LeakReport> {
        let now = Instant::now();
        let detected_at = SystemTime::now();
        let state = self.inner.state.lock();
        let mut stale: Vec<(Instant, u64, &ActiveRef)> = state
            .active
            .iter()
            .filter(|(_, r)| now.saturating_duration_since(r.acquired_at) > max_age)
            .map(|(id, r)| (r.acquired_at, *id, r))
            .collect();
        stale.sort_by_key(|(at, id, _)| (*at, *id));
        stale
            .into_iter()
            .map(|(at, id, r)| LeakReport {
                token_name: r.token.name().to_string(),
                ref_id: id,
                acquired_at: r.acquired_wall,
                detected_at,
                age: now.saturating_duration_since(at),
            })
            .collect()
    }

    /// Force-releases every active ref and returns how many there were.
    /// Counted as releases, not leaks.
    pub fn invalidate_all(&self) -> usize {
        let records: Vec<ActiveRef> = {
            let mut state = self.inner.state.lock();
            let ids: Vec<u64> = state.active.keys().copied().collect();
            ids.into_iter().filter_map(|id| state.remove(id)).collect()
        };
        let count = records.len();
        for record in &records {
            record.slot.revoke();
        }
        if count > 0 {
            tracing::debug!(target: "ferrous_refs", count, "invalidated service refs");
        }
        count
    }

    /// Subscribes to refs dropped while still alive. Handler panics are
    /// caught and logged.
    pub fn on_leak<F>(&self, handler: F)
    where
        F: Fn(&LeakReport) + Send + Sync + 'static,
    {
        self.inner.leak_handlers.write().push(Arc::new(handler));
    }
}

impl Default for RefRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RefRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefRegistry")
            .field("active", &self.total_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn ids_strictly_increase() {
        let token = Token::<u8>::new("IDS");
        let registry = RefRegistry::new();
        let ids: Vec<u64> = (0..5)
            .map(|i| {
                let r = registry.acquire(&token, Arc::new(i));
                let id = r.id();
                r.release();
                id
            })
            .collect();
        assert!(ids.windows(2).all(|w| w[1] > w[0]));
    }

    #[test]
    fn release_is_counted_once() {
        let token = Token::<u8>::new("ONCE");
        let registry = RefRegistry::new();
        let r = registry.acquire(&token, Arc::new(1));
        assert!(r.release());
        assert!(!r.release());
        drop(r);

        let stats = registry.stats();
        assert_eq!(stats.total_acquired, 1);
        assert_eq!(stats.total_released, 1);
        assert_eq!(stats.leaked, 0);
        assert_eq!(stats.active, 0);
    }

    #[test]
    fn drop_while_alive_is_a_leak() {
        let token = Token::<u8>::new("DROPPED");
        let registry = RefRegistry::new();
        let reports = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&reports);
        registry.on_leak(move |report| sink.lock().push(report.ref_id));

        let r = registry.acquire(&token, Arc::new(1));
        let id = r.id();
        drop(r);

        let stats = registry.stats();
        assert_eq!(stats.leaked, 1);
        assert_eq!(stats.total_released, 1);
        assert_eq!(registry.ref_count(&token), 0);
        assert_eq!(*reports.lock(), vec![id]);
    }

    #[test]
    fn panicking_leak_handler_is_contained() {
        let token = Token::<u8>::new("PANIC");
        let registry = RefRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        registry.on_leak(|_| panic!("handler bug"));
        let counter = Arc::clone(&calls);
        registry.on_leak(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        drop(registry.acquire(&token, Arc::new(1)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn invalidated_refs_are_not_leaks() {
        let token = Token::<u8>::new("INV");
        let registry = RefRegistry::new();
        let r = registry.acquire(&token, Arc::new(1));
        assert_eq!(registry.invalidate_all(), 1);
        assert!(!r.is_alive());
        assert!(!r.release());
        drop(r);

        let stats = registry.stats();
        assert_eq!(stats.leaked, 0);
        assert_eq!(stats.total_released, 1);
    }

    #[test]
    fn peak_tracks_high_water_mark() {
        let token = Token::<u8>::new("PEAK");
        let registry = RefRegistry::new();
        let refs: Vec<_> = (0..3).map(|i| registry.acquire(&token, Arc::new(i))).collect();
        for r in &refs {
            r.release();
        }
        let _again = registry.acquire(&token, Arc::new(9));
        let stats = registry.stats();
        assert_eq!(stats.peak_active, 3);
        assert_eq!(stats.active, 1);
        assert_eq!(stats.by_token.get("PEAK"), Some(&1));
    }

    #[test]
    fn young_refs_are_not_reported() {
        let token = Token::<u8>::new("YOUNG");
        let registry = RefRegistry::new();
        let _r = registry.acquire(&token, Arc::new(1));
        assert!(registry.check_leaks(Duration::from_secs(3600)).is_empty());
    }

    #[test]
    fn handles_outlive_their_registry() {
        let token = Token::<u8>::new("ORPHAN");
        let registry = RefRegistry::new();
        let r = registry.acquire(&token, Arc::new(4));
        drop(registry);
        assert_eq!(*r.current().unwrap(), 4);
        assert!(r.release());
    }
}
