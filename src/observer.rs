//! Diagnostic observers for container events.
//!
//! Observers see registrations, resolutions (with timing), scope creation,
//! disposal and failures. Events raised in a scope are delivered to that
//! scope's observers and to every ancestor's, so one observer on the root
//! sees the whole tree.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use crate::error::DiError;
use crate::lifecycle::Lifecycle;
use crate::token::AnyToken;

/// Observer trait for container events.
///
/// Every method has an empty default, so implementors override only what
/// they need. Calls are made synchronously, outside any container lock; a
/// panicking observer is caught and logged and does not affect the
/// operation being observed.
///
/// # Examples
///
/// ```
/// use ferrous_refs::{AnyToken, Container, ContainerObserver, Lifecycle, Provider, Token};
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// #[derive(Default)]
/// struct CountingObserver {
///     resolved: AtomicUsize,
/// }
///
/// impl ContainerObserver for CountingObserver {
///     fn resolved(&self, _scope: &str, _token: AnyToken, _lifecycle: Lifecycle, _took: Duration) {
///         self.resolved.fetch_add(1, Ordering::SeqCst);
///     }
/// }
///
/// let port = Token::<u16>::new("PORT");
/// let root = Container::new();
/// let counter = Arc::new(CountingObserver::default());
/// root.observe(counter.clone());
/// root.register(&port, Provider::value(8080)).unwrap();
///
/// let scope = root.create_scope().unwrap();
/// scope.resolve(&port).unwrap();
/// assert_eq!(counter.resolved.load(Ordering::SeqCst), 1);
/// ```
pub trait ContainerObserver: Send + Sync {
    /// A provider was registered in `scope`.
    fn registered(&self, _scope: &str, _token: AnyToken, _lifecycle: Lifecycle) {}

    /// A resolve started from `scope` succeeded.
    fn resolved(&self, _scope: &str, _token: AnyToken, _lifecycle: Lifecycle, _took: Duration) {}

    /// `child` was created under `parent`.
    fn scope_created(&self, _parent: &str, _child: &str) {}

    /// `scope` finished disposing; `disposed` instances had their hook run.
    fn disposed(&self, _scope: &str, _disposed: usize) {}

    /// A resolve started from `scope` failed.
    fn error(&self, _scope: &str, _token: AnyToken, _error: &DiError) {}
}

/// Observers registered on one scope.
#[derive(Default)]
pub(crate) struct Observers {
    observers: Vec<Arc<dyn ContainerObserver>>,
}

impl Observers {
    pub(crate) fn add(&mut self, observer: Arc<dyn ContainerObserver>) {
        self.observers.push(observer);
    }

    #[inline]
    pub(crate) fn has_observers(&self) -> bool {
        !self.observers.is_empty()
    }

    pub(crate) fn snapshot(&self) -> Vec<Arc<dyn ContainerObserver>> {
        self.observers.clone()
    }
}

/// Delivers one event to every observer in `observers`, swallowing panics.
pub(crate) fn notify_all<F>(observers: &[Arc<dyn ContainerObserver>], event: &'static str, f: F)
where
    F: Fn(&dyn ContainerObserver),
{
    for observer in observers {
        if catch_unwind(AssertUnwindSafe(|| f(observer.as_ref()))).is_err() {
            tracing::warn!(target: "ferrous_refs", event, "container observer panicked");
        }
    }
}

/// Built-in observer that forwards events to `tracing`.
///
/// Resolutions and registrations are logged at `trace`, scope lifecycle at
/// `debug`, failures at `warn`.
///
/// ```
/// use ferrous_refs::{Container, TracingObserver};
/// use std::sync::Arc;
///
/// let root = Container::new();
/// root.observe(Arc::new(TracingObserver::new()));
/// ```
#[derive(Debug, Clone, Default)]
pub struct TracingObserver {
    _priv: (),
}

impl TracingObserver {
    /// Creates an observer that logs under the `ferrous_refs` target.
    pub fn new() -> Self {
        Self::default()
    }
}

impl ContainerObserver for TracingObserver {
    fn registered(&self, scope: &str, token: AnyToken, lifecycle: Lifecycle) {
        tracing::trace!(target: "ferrous_refs", scope, token = token.name(), %lifecycle, "registered");
    }

    fn resolved(&self, scope: &str, token: AnyToken, lifecycle: Lifecycle, took: Duration) {
        tracing::trace!(
            target: "ferrous_refs",
            scope,
            token = token.name(),
            %lifecycle,
            took_us = took.as_micros() as u64,
            "resolved"
        );
    }

    fn scope_created(&self, parent: &str, child: &str) {
        tracing::debug!(target: "ferrous_refs", parent, child, "scope created");
    }

    fn disposed(&self, scope: &str, disposed: usize) {
        tracing::debug!(target: "ferrous_refs", scope, disposed, "scope disposed");
    }

    fn error(&self, scope: &str, token: AnyToken, error: &DiError) {
        tracing::warn!(target: "ferrous_refs", scope, token = token.name(), %error, "resolve failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::Token;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Panicky;

    impl ContainerObserver for Panicky {
        fn disposed(&self, _scope: &str, _disposed: usize) {
            panic!("observer bug");
        }
    }

    #[derive(Default)]
    struct Counter(AtomicUsize);

    impl ContainerObserver for Counter {
        fn disposed(&self, _scope: &str, disposed: usize) {
            self.0.fetch_add(disposed, Ordering::SeqCst);
        }
    }

    #[test]
    fn panicking_observer_does_not_stop_the_rest() {
        let counter = Arc::new(Counter::default());
        let mut observers = Observers::default();
        observers.add(Arc::new(Panicky));
        observers.add(counter.clone());
        assert!(observers.has_observers());

        notify_all(&observers.snapshot(), "disposed", |o| o.disposed("root", 3));
        assert_eq!(counter.0.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn tracing_observer_accepts_every_event() {
        let observer = TracingObserver::new();
        let token = Token::<u8>::new("T").erase();
        observer.registered("root", token, Lifecycle::Singleton);
        observer.resolved("root", token, Lifecycle::Transient, Duration::from_micros(5));
        observer.scope_created("root", "scope-1");
        observer.disposed("scope-1", 0);
        observer.error("root", token, &DiError::ServiceNotFound("T".into()));
    }
}
