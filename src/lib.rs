//! # ferrous-refs
//!
//! In-process dependency injection with explicit, leak-detectable service
//! references.
//!
//! ## Features
//!
//! - **Typed tokens**: services are identified by `Token<T>` values, not by type
//! - **Lifecycles**: Singleton, Scoped and Transient, with scope inheritance
//! - **Async providers**: awaited once per owning scope, even under concurrency
//! - **Circular dependency detection**: reports the full chain, sync and async
//! - **Middleware and observers**: intercept resolves, watch container events
//! - **Disposal cascade**: scopes tear down children, refs, then instances
//! - **Reference tracking**: counted `ServiceRef`s, weak handles, leak reports
//! - **Memory guard**: pressure alerts and periodic age checks
//!
//! ## Quick Start
//!
//! ```rust
//! use ferrous_refs::{Container, Provider, Token};
//! use std::sync::Arc;
//!
//! struct Database {
//!     connection_string: String,
//! }
//!
//! struct UserService {
//!     db: Arc<Database>,
//! }
//!
//! let database = Token::<Database>::new("DATABASE");
//! let users = Token::<UserService>::new("USER_SERVICE");
//!
//! let container = Container::new();
//! container
//!     .register(&database, Provider::value(Database {
//!         connection_string: "postgres://localhost".to_string(),
//!     }))
//!     .unwrap();
//! container
//!     .register(&users, Provider::factory(move |c| Ok(UserService { db: c.resolve(&database)? })).transient())
//!     .unwrap();
//!
//! let service = container.resolve(&users).unwrap();
//! assert_eq!(service.db.connection_string, "postgres://localhost");
//! ```
//!
//! ## References
//!
//! `resolve` hands out plain `Arc`s. When you need to know who still holds a
//! service, acquire a [`ServiceRef`] instead: it is counted by the scope's
//! [`RefRegistry`] until released, invalidated when the scope is disposed,
//! and reported as a leak if dropped while still alive.
//!
//! ```rust
//! use ferrous_refs::{Container, Provider, Token};
//!
//! let session = Token::<String>::new("SESSION");
//! let root = Container::new();
//! root.register(&session, Provider::factory(|_| Ok("abc".to_string())).scoped()).unwrap();
//!
//! let request = root.create_scope().unwrap();
//! let handle = request.acquire_ref(&session).unwrap();
//! assert_eq!(request.refs().ref_count(&session), 1);
//!
//! request.dispose();
//! assert!(!handle.is_alive());
//! assert_eq!(request.refs().stats().leaked, 0);
//! ```

pub mod async_factories;
pub mod binding;
pub mod container;
pub mod descriptors;
pub mod error;
pub mod global;
pub mod guard;
pub mod lifecycle;
pub mod middleware;
pub mod observer;
pub mod provider;
pub mod refs;
pub mod token;
pub mod traits;

mod internal;
mod registration;

pub use async_factories::AsyncFactory;
pub use async_trait::async_trait;
pub use binding::ServiceBinding;
pub use container::Container;
pub use descriptors::EntrySnapshot;
pub use error::{BoxError, DiError, DiResult, ErrorKind};
pub use global::{clear_global_context, get_context, set_global_context};
pub use guard::{MemoryGuard, MemoryGuardConfig};
pub use lifecycle::Lifecycle;
pub use middleware::{Middleware, Next};
pub use observer::{ContainerObserver, TracingObserver};
pub use provider::{AnyArc, BoxFuture, Construct, Provider, ProviderKind};
pub use refs::{LeakReport, RefRegistry, RefStats, ServiceRef, WeakRef};
pub use token::{AnyToken, Token, TokenKey};
pub use traits::Dispose;
