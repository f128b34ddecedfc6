//! Core types for plug

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use url::Url;

use crate::error::ConnectionError;
use crate::headers::Headers;

/// Process-unique identifier for a connection
///
/// Connections compare by identity; the id exists so logs and events can name
/// a connection without holding on to it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub u64);

impl ConnectionId {
    /// Allocate the next id
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the inner u64 value
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Transport handle identifier for one in-flight network operation
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl From<u64> for TaskId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// HTTP method
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    /// GET
    #[default]
    Get,
    /// POST
    Post,
    /// DELETE
    Delete,
}

impl Method {
    /// Wire name of the method
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Method {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "DELETE" => Ok(Method::Delete),
            other => Err(crate::Error::Other(format!("unsupported method: {other}"))),
        }
    }
}

/// Lifecycle state of a connection
///
/// ```text
/// Waiting -> Queued -> Running -> { Completed | CompletedWithError | Canceled }
///                        ^  |
///                        |  v
///                     Suspended
/// ```
///
/// `Canceled` is reachable from every non-terminal state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    /// Created, not yet handed to a channel
    #[default]
    Waiting,
    /// Waiting for channel admission
    Queued,
    /// Transport task is running
    Running,
    /// Transport task is paused
    Suspended,
    /// Finished with a response
    Completed,
    /// Finished with a transport failure
    CompletedWithError,
    /// Canceled by the caller
    Canceled,
}

impl State {
    /// Whether no further transition is possible
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            State::Completed | State::CompletedWithError | State::Canceled
        )
    }

    /// Whether `start()` is allowed from this state
    pub fn can_start(&self) -> bool {
        matches!(self, State::Waiting | State::Queued)
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            State::Waiting => "Waiting",
            State::Queued => "Queued",
            State::Running => "Running",
            State::Suspended => "Suspended",
            State::Completed => "Completed",
            State::CompletedWithError => "Completed with Error",
            State::Canceled => "Canceled",
        };
        f.write_str(s)
    }
}

/// Cache behaviour requested from the transport
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CachingPolicy {
    /// Whatever the protocol and server say
    #[default]
    UseProtocolCachePolicy,
    /// Always go to the origin
    ReloadIgnoringLocalCacheData,
    /// Accept stale cached data, fall back to the network
    ReturnCacheDataElseLoad,
    /// Only cached data, never the network
    ReturnCacheDataDontLoad,
}

impl CachingPolicy {
    /// Request headers expressing this policy to HTTP caches
    pub fn request_headers(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            CachingPolicy::UseProtocolCachePolicy => &[],
            CachingPolicy::ReloadIgnoringLocalCacheData => {
                &[("Cache-Control", "no-cache"), ("Pragma", "no-cache")]
            }
            CachingPolicy::ReturnCacheDataElseLoad => &[("Cache-Control", "max-stale")],
            CachingPolicy::ReturnCacheDataDontLoad => {
                &[("Cache-Control", "max-stale, only-if-cached")]
            }
        }
    }
}

/// Structured metadata of an HTTP response
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpResponse {
    /// Final URL after redirects
    pub url: Url,
    /// HTTP status code
    pub status: u16,
    /// Response headers in wire order
    pub headers: Headers,
}

/// Response metadata as reported by the transport
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Response {
    /// An HTTP exchange
    Http(HttpResponse),
    /// A non-HTTP exchange (e.g. `file:` or `data:` URLs); carries no status
    Other {
        /// URL the response was produced for
        url: Url,
    },
}

impl Response {
    /// HTTP status code, if this was an HTTP response
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Response::Http(http) => Some(http.status),
            Response::Other { .. } => None,
        }
    }

    /// URL the response was produced for
    pub fn url(&self) -> &Url {
        match self {
            Response::Http(http) => &http.url,
            Response::Other { url } => url,
        }
    }

    /// Response headers (empty for non-HTTP responses)
    pub fn headers(&self) -> Option<&Headers> {
        match self {
            Response::Http(http) => Some(&http.headers),
            Response::Other { .. } => None,
        }
    }
}

/// Event emitted during the connection lifecycle
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Connection handed to its channel
    Queued {
        /// Connection ID
        id: ConnectionId,
    },

    /// Transport task generated and resumed
    Started {
        /// Connection ID
        id: ConnectionId,
        /// Transport task ID
        task_id: TaskId,
    },

    /// Connection canceled before reaching a result
    Canceled {
        /// Connection ID
        id: ConnectionId,
    },

    /// Connection finished with a response
    Completed {
        /// Connection ID
        id: ConnectionId,
        /// HTTP status code, if the response was HTTP
        #[serde(skip_serializing_if = "Option::is_none")]
        status_code: Option<u16>,
    },

    /// Connection finished with a transport failure
    CompletedWithError {
        /// Connection ID
        id: ConnectionId,
        /// The failure
        error: ConnectionError,
    },
}

impl Event {
    /// Connection the event belongs to
    pub fn connection_id(&self) -> ConnectionId {
        match self {
            Event::Queued { id }
            | Event::Started { id, .. }
            | Event::Canceled { id }
            | Event::Completed { id, .. }
            | Event::CompletedWithError { id, .. } => *id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_ids_are_unique() {
        let a = ConnectionId::next();
        let b = ConnectionId::next();
        assert_ne!(a, b);
        assert!(b.get() > a.get());
    }

    #[test]
    fn test_terminal_states() {
        assert!(State::Completed.is_terminal());
        assert!(State::CompletedWithError.is_terminal());
        assert!(State::Canceled.is_terminal());
        assert!(!State::Waiting.is_terminal());
        assert!(!State::Queued.is_terminal());
        assert!(!State::Running.is_terminal());
        assert!(!State::Suspended.is_terminal());
    }

    #[test]
    fn test_only_waiting_and_queued_can_start() {
        let startable: Vec<_> = [
            State::Waiting,
            State::Queued,
            State::Running,
            State::Suspended,
            State::Completed,
            State::CompletedWithError,
            State::Canceled,
        ]
        .into_iter()
        .filter(State::can_start)
        .collect();
        assert_eq!(startable, vec![State::Waiting, State::Queued]);
    }

    #[test]
    fn test_method_parse_and_display() {
        assert_eq!("get".parse::<Method>().unwrap(), Method::Get);
        assert_eq!("DELETE".parse::<Method>().unwrap(), Method::Delete);
        assert!("PATCH".parse::<Method>().is_err());
        assert_eq!(Method::Post.to_string(), "POST");
    }

    #[test]
    fn test_response_status_only_for_http() {
        let url = Url::parse("http://example.test/get").unwrap();
        let http = Response::Http(HttpResponse {
            url: url.clone(),
            status: 404,
            headers: Headers::new(),
        });
        assert_eq!(http.status_code(), Some(404));
        assert!(http.headers().is_some());

        let other = Response::Other { url: url.clone() };
        assert_eq!(other.status_code(), None);
        assert_eq!(other.url(), &url);
        assert!(other.headers().is_none());
    }

    #[test]
    fn test_event_serialization_is_tagged() {
        let event = Event::Completed {
            id: ConnectionId(7),
            status_code: Some(200),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "completed");
        assert_eq!(json["id"], 7);
        assert_eq!(json["status_code"], 200);
        assert_eq!(event.connection_id(), ConnectionId(7));
    }
}
