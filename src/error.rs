//! Error types for the container and the reference registry.

use thiserror::Error;

/// Boxed error type accepted from providers and disposal hooks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Container and reference-tracking errors.
///
/// Every variant is a stable error kind carrying enough context (token name,
/// dependency chain, ref id, scope id) to diagnose a failure without looking
/// at container internals.
///
/// # Examples
///
/// ```rust
/// use ferrous_refs::{Container, DiError, Token};
///
/// let missing = Token::<String>::new("MISSING");
/// let container = Container::new();
/// match container.resolve(&missing) {
///     Err(DiError::ServiceNotFound(name)) => assert_eq!(name, "MISSING"),
///     _ => unreachable!(),
/// }
///
/// let circular = DiError::CircularDependency(vec!["A", "B", "A"]);
/// assert_eq!(circular.to_string(), "Circular dependency: A -> B -> A");
/// ```
#[derive(Debug, Clone, Error)]
pub enum DiError {
    /// Token is not registered in the scope or any of its ancestors
    #[error("Service not found: {0}")]
    ServiceNotFound(String),
    /// Construction re-entered a token that is already being resolved (includes path)
    #[error("Circular dependency: {}", .0.join(" -> "))]
    CircularDependency(Vec<&'static str>),
    /// Synchronous resolve on a token bound to an async factory
    #[error("Service {0} is bound to an async factory; use resolve_async")]
    AsyncProviderMismatch(&'static str),
    /// Value access on a reference that was released or invalidated
    #[error("Reference #{id} to {token} was already released")]
    RefAlreadyReleased {
        /// Token name of the reference
        token: &'static str,
        /// Registry-assigned reference id
        id: u64,
    },
    /// Operation on a scope after its `dispose()` completed
    #[error("Container scope '{0}' has been disposed")]
    ContextDisposed(String),
    /// Resolved value does not have the requested type
    #[error("Type mismatch for: {0}")]
    TypeMismatch(&'static str),
    /// Maximum resolution depth exceeded
    #[error("Max depth {0} exceeded")]
    DepthExceeded(usize),
    /// A provider failed while producing its value
    #[error("Provider for {token} failed: {message}")]
    Factory {
        /// Token whose provider failed
        token: &'static str,
        /// Rendered provider error
        message: String,
    },
    /// The process-wide context slot is empty
    #[error("No global container context has been set")]
    ContextNotSet,
}

/// Fieldless discriminant of [`DiError`], for matching on the kind alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// [`DiError::ServiceNotFound`]
    ServiceNotFound,
    /// [`DiError::CircularDependency`]
    CircularDependency,
    /// [`DiError::AsyncProviderMismatch`]
    AsyncProviderMismatch,
    /// [`DiError::RefAlreadyReleased`]
    RefAlreadyReleased,
    /// [`DiError::ContextDisposed`]
    ContextDisposed,
    /// [`DiError::TypeMismatch`]
    TypeMismatch,
    /// [`DiError::DepthExceeded`]
    DepthExceeded,
    /// [`DiError::Factory`]
    Factory,
    /// [`DiError::ContextNotSet`]
    ContextNotSet,
}

impl DiError {
    /// Wraps an arbitrary provider error with the token it was producing.
    ///
    /// ```rust
    /// use ferrous_refs::{DiError, ErrorKind};
    ///
    /// let err = DiError::factory("DATABASE", "connection refused");
    /// assert_eq!(err.kind(), ErrorKind::Factory);
    /// assert_eq!(err.to_string(), "Provider for DATABASE failed: connection refused");
    /// ```
    pub fn factory(token: &'static str, err: impl Into<BoxError>) -> Self {
        DiError::Factory {
            token,
            message: err.into().to_string(),
        }
    }

    /// Returns the stable kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DiError::ServiceNotFound(_) => ErrorKind::ServiceNotFound,
            DiError::CircularDependency(_) => ErrorKind::CircularDependency,
            DiError::AsyncProviderMismatch(_) => ErrorKind::AsyncProviderMismatch,
            DiError::RefAlreadyReleased { .. } => ErrorKind::RefAlreadyReleased,
            DiError::ContextDisposed(_) => ErrorKind::ContextDisposed,
            DiError::TypeMismatch(_) => ErrorKind::TypeMismatch,
            DiError::DepthExceeded(_) => ErrorKind::DepthExceeded,
            DiError::Factory { .. } => ErrorKind::Factory,
            DiError::ContextNotSet => ErrorKind::ContextNotSet,
        }
    }
}

/// Result type for container operations
pub type DiResult<T> = Result<T, DiError>;
