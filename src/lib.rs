//! # plug
//!
//! Asynchronous HTTP request library built around a request lifecycle engine.
//!
//! ## Design
//!
//! - **Connections are state machines** - every request moves through
//!   `Waiting -> Queued -> Running -> Completed | CompletedWithError | Canceled`,
//!   and each transition happens at most once
//! - **Callbacks attach at any time** - success and failure callbacks registered
//!   before, during, or after a request finishes each run exactly once, in
//!   registration order
//! - **The engine is an explicit context** - a [`Plug`] owns the transport session,
//!   defaults, and task registry; tests inject a fake [`Transport`]
//! - **Event-driven** - lifecycle events are broadcast to any subscriber
//!
//! ## Quick Start
//!
//! ```no_run
//! use plug::{Config, Method, Parameters, Plug};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let plug = Plug::new(Config::default()).await?;
//!
//!     plug.request(Method::Get, "https://httpbin.org/get", Parameters::query([("q", "rust")]))
//!         .on_success(|reply| async move {
//!             println!("{:?}: {} bytes", reply.status_code(), reply.data.len());
//!         })
//!         .on_failure(|error| async move {
//!             eprintln!("request failed: {error}");
//!         });
//!
//!     // Subscribe to events
//!     let mut events = plug.subscribe();
//!     while let Ok(event) = events.recv().await {
//!         println!("Event: {:?}", event);
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Admission channels
pub mod channel;
/// Deferred completion scheduling
pub mod completion;
/// Configuration types
pub mod config;
/// Request state machine
pub mod connection;
/// Serial delivery contexts
pub mod dispatcher;
/// Error types
pub mod error;
/// Header lists
pub mod headers;
/// Engine context
pub mod manager;
/// Request parameters
pub mod parameters;
/// Request persistence hook and SQLite store
pub mod persistence;
/// Task id to connection routing
pub mod registry;
/// Transport boundary and the reqwest transport
pub mod transport;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use channel::{Channel, LimitedChannel};
pub use config::Config;
pub use connection::{Connection, Reply, ResultBody};
pub use dispatcher::Dispatcher;
pub use error::{ConnectionError, ConnectionErrorKind, DatabaseError, Error, Result};
pub use headers::Headers;
pub use manager::Plug;
pub use parameters::Parameters;
pub use persistence::{PendingRequest, PersistenceDelegate, PersistenceInfo, SqlitePersistence};
pub use transport::{
    HttpRequest, ReqwestTransport, TaskEvents, TransferMode, Transport, TransportOutcome,
    TransportTask,
};
pub use types::{
    CachingPolicy, ConnectionId, Event, HttpResponse, Method, Response, State, TaskId,
};
