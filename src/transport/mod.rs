//! Transport boundary
//!
//! The engine treats the network as an opaque capability: submit a request, get a
//! task; the task eventually reports exactly one [`TransportOutcome`]. Outcomes are
//! reported by task id through [`TaskEvents`], which looks the owning connection up
//! in the task registry.
//!
//! Tasks are created suspended. Nothing goes on the wire until the engine has
//! registered the task and called [`TransportTask::resume`].

mod http_client;

pub use http_client::ReqwestTransport;

use bytes::Bytes;
use std::path::PathBuf;
use url::Url;

use crate::connection::{Connection, ConnectionInner};
use crate::error::ConnectionError;
use crate::headers::Headers;
use crate::registry::TaskRegistry;
use crate::types::{CachingPolicy, Method, Response, TaskId};

/// Fully built request handed to the transport
#[derive(Clone, Debug, PartialEq)]
pub struct HttpRequest {
    /// HTTP method
    pub method: Method,
    /// Target URL, query included
    pub url: Url,
    /// Request headers
    pub headers: Headers,
    /// Request body
    pub body: Option<Bytes>,
    /// Cache behaviour
    pub caching_policy: CachingPolicy,
}

impl HttpRequest {
    /// Bare request with no headers or body
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: Headers::new(),
            body: None,
            caching_policy: CachingPolicy::default(),
        }
    }
}

/// Where the transport should put the response body
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferMode {
    /// Buffer the whole body in memory
    Buffer,
    /// Stream the body into a transport-owned temporary file
    StreamToFile,
}

/// The single terminal report of a transport task
#[derive(Clone, Debug)]
pub enum TransportOutcome {
    /// Body buffered in memory
    Data {
        /// Response body
        body: Bytes,
        /// Response metadata
        response: Response,
    },
    /// Body streamed to a file the engine now owns
    File {
        /// Where the transport left the file
        location: PathBuf,
        /// Response metadata
        response: Response,
    },
    /// Transport-level failure
    Failure {
        /// What went wrong
        error: ConnectionError,
        /// Response metadata, if headers arrived before the failure
        response: Option<Response>,
    },
}

/// Control handle for one in-flight network operation
pub trait TransportTask: Send + Sync {
    /// Identifier the outcome will be reported under
    fn id(&self) -> TaskId;

    /// Start, or continue after [`TransportTask::suspend`]
    fn resume(&self);

    /// Pause transfer
    fn suspend(&self);

    /// Abort best-effort; no outcome needs to be reported afterwards
    fn cancel(&self);
}

/// Underlying network session
pub trait Transport: Send + Sync {
    /// Create a suspended task for `request`
    ///
    /// The transport must report the task's outcome exactly once through
    /// `events`, unless the task is canceled first.
    fn submit(
        &self,
        request: HttpRequest,
        mode: TransferMode,
        events: TaskEvents,
    ) -> Box<dyn TransportTask>;
}

/// Routes task outcomes to the connection that owns the task
#[derive(Clone)]
pub struct TaskEvents {
    registry: TaskRegistry<ConnectionInner>,
}

impl TaskEvents {
    pub(crate) fn new(registry: TaskRegistry<ConnectionInner>) -> Self {
        Self { registry }
    }

    /// Report the terminal outcome of `task_id`
    ///
    /// Outcomes for tasks that are no longer registered (canceled or already
    /// finished) are dropped.
    pub async fn finish(&self, task_id: TaskId, outcome: TransportOutcome) {
        match self.registry.lookup(task_id).await {
            Some(inner) => {
                Connection::from_inner(inner)
                    .handle_transport_outcome(outcome)
                    .await;
            }
            None => {
                tracing::debug!(task_id = %task_id, "Dropping outcome for unregistered task");
                if let TransportOutcome::File { location, .. } = outcome
                    && let Err(e) = tokio::fs::remove_file(&location).await
                {
                    tracing::debug!(
                        task_id = %task_id,
                        path = %location.display(),
                        error = %e,
                        "Could not remove orphaned download"
                    );
                }
            }
        }
    }
}
