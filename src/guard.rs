//! Memory guard: thresholds and periodic checks over a ref registry.

use std::env;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::refs::{LeakReport, RefRegistry, RefStats};

type PressureHandler = Arc<dyn Fn(&RefStats) + Send + Sync>;

/// Thresholds for a [`MemoryGuard`].
///
/// ```
/// use ferrous_refs::MemoryGuardConfig;
/// use std::time::Duration;
///
/// let config = MemoryGuardConfig::default()
///     .with_max_active_refs(500)
///     .with_check_interval(Duration::from_secs(30));
/// assert_eq!(config.max_ref_age, Duration::from_secs(60));
/// assert_eq!(config.max_active_refs, 500);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MemoryGuardConfig {
    /// Refs older than this are reported by [`MemoryGuard::check_leaks`]
    pub max_ref_age: Duration,
    /// Pressure threshold on live refs (inclusive)
    pub max_active_refs: usize,
    /// Period of the background check; `None` disables it
    pub check_interval: Option<Duration>,
}

impl Default for MemoryGuardConfig {
    fn default() -> Self {
        Self {
            max_ref_age: Duration::from_secs(60),
            max_active_refs: 100,
            check_interval: None,
        }
    }
}

impl MemoryGuardConfig {
    /// Sets [`max_ref_age`](Self::max_ref_age).
    pub fn with_max_ref_age(mut self, max_ref_age: Duration) -> Self {
        self.max_ref_age = max_ref_age;
        self
    }

    /// Sets [`max_active_refs`](Self::max_active_refs).
    pub fn with_max_active_refs(mut self, max_active_refs: usize) -> Self {
        self.max_active_refs = max_active_refs;
        self
    }

    /// Enables the background check with the given period.
    pub fn with_check_interval(mut self, every: Duration) -> Self {
        self.check_interval = Some(every);
        self
    }

    /// Defaults overridden by `FERROUS_REFS_MAX_REF_AGE_MS`,
    /// `FERROUS_REFS_MAX_ACTIVE_REFS` and `FERROUS_REFS_CHECK_INTERVAL_MS`.
    pub fn from_env() -> Self {
        Self::from_env_with_prefix("FERROUS_REFS")
    }

    /// Like [`from_env`](Self::from_env) with a custom variable prefix.
    /// Unparseable values are logged and ignored; an interval of 0
    /// disables the background check.
    pub fn from_env_with_prefix(prefix: &str) -> Self {
        let mut config = Self::default();
        let prefix = prefix.to_uppercase();
        if let Some(ms) = read_env(&prefix, "MAX_REF_AGE_MS") {
            config.max_ref_age = Duration::from_millis(ms);
        }
        if let Some(max) = read_env(&prefix, "MAX_ACTIVE_REFS") {
            match usize::try_from(max) {
                Ok(max) => config.max_active_refs = max,
                Err(err) => tracing::warn!(
                    target: "ferrous_refs",
                    var = %format!("{prefix}_MAX_ACTIVE_REFS"),
                    value = max,
                    %err,
                    "ignoring invalid setting"
                ),
            }
        }
        if let Some(ms) = read_env(&prefix, "CHECK_INTERVAL_MS") {
            config.check_interval = (ms > 0).then(|| Duration::from_millis(ms));
        }
        config
    }
}

fn read_env(prefix: &str, key: &str) -> Option<u64> {
    let name = format!("{prefix}_{key}");
    let raw = env::var(&name).ok()?;
    match raw.trim().parse::<u64>() {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!(target: "ferrous_refs", var = %name, value = %raw, %err, "ignoring invalid setting");
            None
        }
    }
}

struct GuardInner {
    registry: RefRegistry,
    config: MemoryGuardConfig,
    handlers: RwLock<Vec<PressureHandler>>,
    disposed: AtomicBool,
}

impl GuardInner {
    fn under_pressure(&self) -> bool {
        self.registry.total_active() >= self.config.max_active_refs
    }

    fn check_pressure(&self) -> bool {
        if self.disposed.load(Ordering::Acquire) || !self.under_pressure() {
            return false;
        }
        let stats = self.registry.stats();
        tracing::warn!(
            target: "ferrous_refs",
            active = stats.active,
            limit = self.config.max_active_refs,
            "service ref pressure"
        );
        let handlers = self.handlers.read().clone();
        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(&stats))).is_err() {
                tracing::warn!(target: "ferrous_refs", "pressure handler panicked");
            }
        }
        true
    }

    fn tick(&self) {
        self.check_pressure();
        let leaks = self.registry.check_leaks(self.config.max_ref_age);
        for leak in &leaks {
            tracing::warn!(
                target: "ferrous_refs",
                token = %leak.token_name,
                ref_id = leak.ref_id,
                age_ms = leak.age.as_millis() as u64,
                "service ref held past max age"
            );
        }
    }
}

/// Watches a [`RefRegistry`] for too many live refs and refs held too long.
///
/// With [`MemoryGuardConfig::check_interval`] set and a tokio runtime
/// available, a background task runs the checks periodically. The task only
/// holds a weak link to the guard and stops once the guard is disposed or
/// dropped.
///
/// # Examples
///
/// ```
/// use ferrous_refs::{MemoryGuard, MemoryGuardConfig, RefRegistry, Token};
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
///
/// let token = Token::<u8>::new("CONN");
/// let registry = RefRegistry::new();
/// let guard = MemoryGuard::new(registry.clone(), MemoryGuardConfig::default().with_max_active_refs(2));
///
/// let alerts = Arc::new(AtomicUsize::new(0));
/// let seen = alerts.clone();
/// guard.on_pressure(move |stats| {
///     assert!(stats.active >= 2);
///     seen.fetch_add(1, Ordering::SeqCst);
/// });
///
/// let _a = registry.acquire(&token, Arc::new(1));
/// assert!(!guard.check_pressure());
/// let _b = registry.acquire(&token, Arc::new(2));
/// assert!(guard.under_pressure());
/// assert!(guard.check_pressure());
/// assert_eq!(alerts.load(Ordering::SeqCst), 1);
/// ```
pub struct MemoryGuard {
    inner: Arc<GuardInner>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl MemoryGuard {
    /// Watches `registry`. With a `check_interval` set and a tokio runtime
    /// available, a background task evaluates pressure periodically; outside
    /// a runtime only explicit checks run.
    pub fn new(registry: RefRegistry, config: MemoryGuardConfig) -> Self {
        let every = config.check_interval;
        let inner = Arc::new(GuardInner {
            registry,
            config,
            handlers: RwLock::new(Vec::new()),
            disposed: AtomicBool::new(false),
        });
        let timer = every.and_then(|every| spawn_timer(Arc::downgrade(&inner), every));
        Self {
            inner,
            timer: Mutex::new(timer),
        }
    }

    /// Thresholds in effect.
    pub fn config(&self) -> &MemoryGuardConfig {
        &self.inner.config
    }

    /// Whether live refs have reached `max_active_refs`.
    pub fn under_pressure(&self) -> bool {
        self.inner.under_pressure()
    }

    /// Subscribes to pressure alerts. Handler panics are caught and logged.
    pub fn on_pressure<F>(&self, handler: F)
    where
        F: Fn(&RefStats) + Send + Sync + 'static,
    {
        self.inner.handlers.write().push(Arc::new(handler));
    }

    /// Evaluates pressure once and alerts the handlers if it is reached.
    pub fn check_pressure(&self) -> bool {
        self.inner.check_pressure()
    }

    /// Live refs older than `max_ref_age`, oldest first.
    pub fn check_leaks(&self) -> Vec<LeakReport> {
        self.inner.registry.check_leaks(self.inner.config.max_ref_age)
    }

    /// Whether the background check is running.
    pub fn is_monitoring(&self) -> bool {
        self.timer.lock().as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stops the background check and drops the handlers. The registry is
    /// left untouched.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(task) = self.timer.lock().take() {
            task.abort();
        }
        self.inner.handlers.write().clear();
    }
}

fn spawn_timer(inner: Weak<GuardInner>, every: Duration) -> Option<JoinHandle<()>> {
    if every.is_zero() {
        tracing::warn!(target: "ferrous_refs", "memory guard interval is zero; periodic checks disabled");
        return None;
    }
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        tracing::warn!(target: "ferrous_refs", "no tokio runtime; memory guard periodic checks disabled");
        return None;
    };
    Some(runtime.spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
        loop {
            ticker.tick().await;
            let Some(inner) = inner.upgrade() else {
                break;
            };
            if inner.disposed.load(Ordering::Acquire) {
                break;
            }
            inner.tick();
        }
    }))
}

impl Drop for MemoryGuard {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for MemoryGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryGuard")
            .field("config", &self.inner.config)
            .field("monitoring", &self.is_monitoring())
            .finish()
    }
}
