//! Registration snapshots for introspection and diagnostics.

use crate::lifecycle::Lifecycle;
use crate::provider::ProviderKind;

/// Point-in-time view of one registration in a scope.
///
/// Returned by [`Container::snapshot`](crate::Container::snapshot) in
/// registration order. Useful for health checks and for asserting on a
/// container's configuration in tests.
///
/// # Examples
///
/// ```rust
/// use ferrous_refs::{Container, Lifecycle, Provider, ProviderKind, Token};
///
/// let db = Token::<String>::new("DB_URL");
/// let repo = Token::<Vec<u8>>::new("REPO");
///
/// let container = Container::new();
/// container.register(&db, Provider::value("postgres://localhost".to_string())).unwrap();
/// container.register(&repo, Provider::factory(|_| Ok(Vec::new())).scoped().tag("storage")).unwrap();
///
/// container.resolve(&db).unwrap();
///
/// let snapshot = container.snapshot();
/// assert_eq!(snapshot.len(), 2);
/// assert_eq!(snapshot[0].name, "DB_URL");
/// assert_eq!(snapshot[0].kind, ProviderKind::Value);
/// assert!(snapshot[0].resolved);
/// assert_eq!(snapshot[1].lifecycle, Lifecycle::Scoped);
/// assert!(!snapshot[1].resolved);
/// assert_eq!(snapshot[1].tags, vec!["storage".to_string()]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EntrySnapshot {
    /// Token debug name
    pub name: String,
    /// Raw token key
    pub key: u64,
    /// Provider kind
    pub kind: ProviderKind,
    /// Registered lifecycle
    pub lifecycle: Lifecycle,
    /// Whether this scope has resolved the entry at least once
    pub resolved: bool,
    /// Tags, sorted
    pub tags: Vec<String>,
}

impl EntrySnapshot {
    /// Whether the entry carries `tag`.
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}
