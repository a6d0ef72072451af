//! Child scopes and the disposal cascade.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use super::{Container, DISPOSED, DISPOSING, LIVE};
use crate::error::DiResult;

impl Container {
    /// Creates a child scope with id `"scope-N"`.
    ///
    /// The child sees every registration of this scope and its ancestors.
    /// Scoped entries get a fresh instance per child; singletons stay
    /// shared with the scope that registered them.
    ///
    /// # Examples
    ///
    /// ```
    /// use ferrous_refs::{Container, Provider, Token};
    /// use std::sync::Arc;
    ///
    /// let session = Token::<String>::new("SESSION");
    /// let root = Container::new();
    /// root.register(&session, Provider::factory(|_| Ok("s".to_string())).scoped()).unwrap();
    ///
    /// let a = root.create_scope().unwrap();
    /// let b = root.create_scope().unwrap();
    /// assert!(!Arc::ptr_eq(&a.resolve(&session).unwrap(), &b.resolve(&session).unwrap()));
    /// assert_eq!(a.parent().unwrap().id(), "root");
    /// assert_eq!(root.child_count(), 2);
    /// ```
    pub fn create_scope(&self) -> DiResult<Container> {
        self.spawn_child(None)
    }

    /// Creates a child scope with a caller-chosen id.
    pub fn create_named_scope(&self, id: impl Into<String>) -> DiResult<Container> {
        self.spawn_child(Some(id.into()))
    }

    fn spawn_child(&self, id: Option<String>) -> DiResult<Container> {
        self.ensure_live()?;
        let child = Container::with_parent(id, Some(self.clone()));
        self.inner.children.lock().push(child.clone());

        tracing::debug!(
            target: "ferrous_refs",
            parent = %self.inner.id,
            scope = %child.inner.id,
            depth = child.inner.depth,
            "created scope"
        );
        self.emit("scope_created", |o| o.scope_created(&self.inner.id, &child.inner.id));
        Ok(child)
    }

    /// Disposes this scope and, first, every descendant, including children
    /// whose handles were dropped without being disposed.
    ///
    /// In order: child scopes depth-first (newest first), then every
    /// [`ServiceRef`](crate::ServiceRef) issued by this scope's
    /// [`refs`](Self::refs) is invalidated, then the disposal hook of each
    /// singleton or scoped instance this scope resolved runs in reverse
    /// registration order. Hook failures and panics are logged and skipped.
    /// Finally the registry is cleared and the scope is unlinked from its
    /// parent.
    ///
    /// Returns the number of instances whose hook succeeded, not counting
    /// descendants. A second call returns 0.
    pub fn dispose(&self) -> usize {
        if self
            .inner
            .state
            .compare_exchange(LIVE, DISPOSING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return 0;
        }

        let children: Vec<Container> = self.inner.children.lock().drain(..).collect();
        for child in children.iter().rev() {
            child.dispose();
        }

        let invalidated = self.inner.refs.invalidate_all();

        let entries = self.inner.registry.lock().take();
        let mut disposed = 0;
        for (_, reg) in entries.iter().rev() {
            if !reg.lifecycle.is_cached() || !reg.resolved {
                continue;
            }
            let (Some(disposer), Some(instance)) = (&reg.disposer, &reg.cached) else {
                continue;
            };
            match catch_unwind(AssertUnwindSafe(|| disposer(instance))) {
                Ok(Ok(())) => disposed += 1,
                Ok(Err(err)) => tracing::warn!(
                    target: "ferrous_refs",
                    scope = %self.inner.id,
                    token = reg.name,
                    error = %err,
                    "dispose hook failed"
                ),
                Err(_) => tracing::warn!(
                    target: "ferrous_refs",
                    scope = %self.inner.id,
                    token = reg.name,
                    "dispose hook panicked"
                ),
            }
        }
        drop(entries);

        if let Some(parent) = &self.inner.parent {
            parent
                .inner
                .children
                .lock()
                .retain(|child| !Arc::ptr_eq(&child.inner, &self.inner));
        }
        self.inner.state.store(DISPOSED, Ordering::Release);

        tracing::debug!(
            target: "ferrous_refs",
            scope = %self.inner.id,
            disposed,
            invalidated,
            "disposed scope"
        );
        self.emit("disposed", |o| o.disposed(&self.inner.id, disposed));

        self.inner.middlewares.write().clear();
        *self.inner.observers.write() = Default::default();
        disposed
    }
}
