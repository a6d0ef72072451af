//! Resolve interception pipeline.
//!
//! Middleware wraps every synchronous resolve that reaches a scope, for
//! cross-cutting concerns like timing, logging, or substituting values in
//! tests. The chain for a resolve is the ancestors' middleware (root first,
//! in registration order) followed by the scope's own; the first registered
//! is the outermost.

use std::sync::Arc;

use crate::error::DiResult;
use crate::provider::AnyArc;
use crate::token::AnyToken;

/// Interceptor around a resolve.
///
/// Call [`Next::run`] to continue down the chain, or return without calling
/// it to short-circuit with a value or an error of your own. Closures of the
/// shape `Fn(AnyToken, Next<'_>) -> DiResult<AnyArc>` implement this trait.
///
/// # Examples
///
/// ```
/// use ferrous_refs::{Container, Provider, Token};
/// use std::sync::{Arc, Mutex};
///
/// let name = Token::<String>::new("NAME");
/// let container = Container::new();
/// container.register(&name, Provider::value("ferrous".to_string())).unwrap();
///
/// let seen = Arc::new(Mutex::new(Vec::new()));
/// let log = Arc::clone(&seen);
/// container.use_middleware(move |token, next| {
///     log.lock().unwrap().push(token.name());
///     next.run()
/// });
///
/// assert_eq!(*container.resolve(&name).unwrap(), "ferrous");
/// assert_eq!(*seen.lock().unwrap(), vec!["NAME"]);
/// ```
pub trait Middleware: Send + Sync + 'static {
    /// Handles one resolve of `token`.
    fn handle(&self, token: AnyToken, next: Next<'_>) -> DiResult<AnyArc>;
}

impl<F> Middleware for F
where
    F: Fn(AnyToken, Next<'_>) -> DiResult<AnyArc> + Send + Sync + 'static,
{
    fn handle(&self, token: AnyToken, next: Next<'_>) -> DiResult<AnyArc> {
        self(token, next)
    }
}

/// Remainder of a middleware chain.
pub struct Next<'a> {
    rest: &'a [Arc<dyn Middleware>],
    token: AnyToken,
    core: &'a dyn Fn() -> DiResult<AnyArc>,
}

impl<'a> Next<'a> {
    pub(crate) fn new(chain: &'a [Arc<dyn Middleware>], token: AnyToken, core: &'a dyn Fn() -> DiResult<AnyArc>) -> Self {
        Self {
            rest: chain,
            token,
            core,
        }
    }

    /// Token being resolved.
    pub fn token(&self) -> AnyToken {
        self.token
    }

    /// Invokes the next middleware, or the actual resolution at the end of
    /// the chain.
    pub fn run(self) -> DiResult<AnyArc> {
        match self.rest.split_first() {
            Some((head, rest)) => head.handle(
                self.token,
                Next {
                    rest,
                    token: self.token,
                    core: self.core,
                },
            ),
            None => (self.core)(),
        }
    }
}
