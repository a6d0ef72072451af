//! Service lifecycle definitions.

/// Caching policy for a registered provider.
///
/// # Examples
///
/// ```rust
/// use ferrous_refs::{Container, Provider, Token};
/// use std::sync::Arc;
///
/// struct Database { url: String }
/// struct Repository { name: String }
///
/// let db = Token::<Database>::new("DB");
/// let repo = Token::<Repository>::new("REPO");
///
/// let root = Container::new();
/// root.register(&db, Provider::value(Database { url: "postgres://localhost".into() })).unwrap();
/// root.register(&repo, Provider::factory(|_| Ok(Repository { name: "users".into() })).scoped()).unwrap();
///
/// let scope1 = root.create_scope().unwrap();
/// let scope2 = root.create_scope().unwrap();
///
/// // Singleton: same instance across scopes
/// assert!(Arc::ptr_eq(&scope1.resolve(&db).unwrap(), &scope2.resolve(&db).unwrap()));
///
/// // Scoped: same within a scope, different across scopes
/// let r1a = scope1.resolve(&repo).unwrap();
/// let r1b = scope1.resolve(&repo).unwrap();
/// let r2 = scope2.resolve(&repo).unwrap();
/// assert!(Arc::ptr_eq(&r1a, &r1b));
/// assert!(!Arc::ptr_eq(&r1a, &r2));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Lifecycle {
    /// One instance per owning scope, cached on first resolve
    ///
    /// A singleton registered on the root is shared by every descendant
    /// scope; it is constructed and cached by the scope that owns the
    /// registration.
    #[default]
    Singleton,
    /// One instance per resolving scope
    ///
    /// The recipe is copied into each descendant scope the first time that
    /// scope resolves it, so every scope caches its own instance.
    Scoped,
    /// New instance per resolution, never cached
    Transient,
}

impl Lifecycle {
    /// Whether instances of this lifecycle are cached by a scope.
    #[inline]
    pub fn is_cached(self) -> bool {
        !matches!(self, Lifecycle::Transient)
    }
}

impl std::fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Lifecycle::Singleton => "singleton",
            Lifecycle::Scoped => "scoped",
            Lifecycle::Transient => "transient",
        };
        f.write_str(name)
    }
}
