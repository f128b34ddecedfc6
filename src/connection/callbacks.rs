//! Success and failure callbacks
//!
//! Callbacks can be attached in any state. Each one becomes a listener on the
//! connection's [`Completion`](crate::completion::Completion): held until the
//! connection completes, run at once if it already has, dropped if it was
//! canceled. A success callback on a failed connection (and vice versa) is a
//! no-op.

use bytes::Bytes;
use std::future::Future;
use std::path::PathBuf;

use super::{Connection, Resolution};
use crate::dispatcher::Dispatcher;
use crate::error::ConnectionError;
use crate::types::{ConnectionId, Response};

/// What a success callback receives
#[derive(Clone, Debug)]
pub struct Reply {
    /// Connection that produced the reply
    pub connection_id: ConnectionId,
    /// Response body
    pub data: Bytes,
    /// Response metadata
    pub response: Option<Response>,
    /// Where the body is stored, for file-streamed requests
    pub file: Option<PathBuf>,
}

impl Reply {
    /// HTTP status code, if the response was HTTP
    pub fn status_code(&self) -> Option<u16> {
        self.response.as_ref().and_then(Response::status_code)
    }

    /// Decode the body as JSON
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.data)
    }
}

impl Connection {
    /// Run `callback` on the engine's main context once the request succeeds
    pub fn on_success<F, Fut>(&self, callback: F) -> &Self
    where
        F: FnOnce(Reply) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let dispatcher = self.plug().main_dispatcher().clone();
        self.on_success_on(&dispatcher, callback)
    }

    /// Run `callback` on `dispatcher` once the request succeeds
    pub fn on_success_on<F, Fut>(&self, dispatcher: &Dispatcher, callback: F) -> &Self
    where
        F: FnOnce(Reply) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.inner
            .completion
            .register(dispatcher, move |resolution| async move {
                let Resolution::Succeeded { id, body, response } = resolution else {
                    return;
                };
                match body.bytes().await {
                    Ok(data) => {
                        callback(Reply {
                            connection_id: id,
                            data,
                            response,
                            file: body.path().map(PathBuf::from),
                        })
                        .await
                    }
                    Err(e) => {
                        tracing::warn!(
                            connection_id = %id,
                            error = %e,
                            "Downloaded body unreadable; skipping success callback"
                        );
                    }
                }
            });
        self
    }

    /// Run `callback` on the engine's main context once the request fails
    pub fn on_failure<F, Fut>(&self, callback: F) -> &Self
    where
        F: FnOnce(ConnectionError) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let dispatcher = self.plug().main_dispatcher().clone();
        self.on_failure_on(&dispatcher, callback)
    }

    /// Run `callback` on `dispatcher` once the request fails
    pub fn on_failure_on<F, Fut>(&self, dispatcher: &Dispatcher, callback: F) -> &Self
    where
        F: FnOnce(ConnectionError) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.inner
            .completion
            .register(dispatcher, move |resolution| async move {
                if let Resolution::Failed(error) = resolution {
                    callback(error).await;
                }
            });
        self
    }

    /// Callbacks still waiting for the connection to finish
    pub fn pending_callbacks(&self) -> usize {
        self.inner.completion.held_listeners()
    }
}
