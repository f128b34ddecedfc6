//! Default transport backed by reqwest

use bytes::BytesMut;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::{HttpRequest, TaskEvents, TransferMode, TransportOutcome, TransportTask, Transport};
use crate::config::SessionConfig;
use crate::error::{ConnectionError, Result};
use crate::types::{HttpResponse, Method, Response, TaskId};

/// Transport running each task as a Tokio task on a shared `reqwest::Client`
pub struct ReqwestTransport {
    client: reqwest::Client,
    download_dir: PathBuf,
    next_id: AtomicU64,
}

impl ReqwestTransport {
    /// Build a client from session settings
    ///
    /// Streamed downloads are written under `download_dir` before the engine
    /// moves them into its own temp directory.
    pub fn new(session: &SessionConfig, download_dir: impl Into<PathBuf>) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = session.request_timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(timeout) = session.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        if let Some(user_agent) = &session.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        Ok(Self::with_client(builder.build()?, download_dir))
    }

    /// Wrap an existing client
    pub fn with_client(client: reqwest::Client, download_dir: impl Into<PathBuf>) -> Self {
        Self {
            client,
            download_dir: download_dir.into(),
            next_id: AtomicU64::new(1),
        }
    }
}

impl Transport for ReqwestTransport {
    fn submit(
        &self,
        request: HttpRequest,
        mode: TransferMode,
        events: TaskEvents,
    ) -> Box<dyn TransportTask> {
        let id = TaskId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (run_tx, run_rx) = watch::channel(false);
        let cancel = CancellationToken::new();

        let destination = match mode {
            TransferMode::Buffer => None,
            TransferMode::StreamToFile => Some(self.download_dir.join(format!(
                "plug-{}-{}-{}.download",
                std::process::id(),
                id,
                chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
            ))),
        };

        let job = TaskJob {
            id,
            client: self.client.clone(),
            request,
            destination,
            run: run_rx,
            cancel: cancel.clone(),
        };
        tokio::spawn(job.drive(events));

        Box::new(ReqwestTask {
            id,
            run: run_tx,
            cancel,
        })
    }
}

struct ReqwestTask {
    id: TaskId,
    run: watch::Sender<bool>,
    cancel: CancellationToken,
}

impl TransportTask for ReqwestTask {
    fn id(&self) -> TaskId {
        self.id
    }

    fn resume(&self) {
        self.run.send_replace(true);
    }

    fn suspend(&self) {
        self.run.send_replace(false);
    }

    fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl Drop for ReqwestTask {
    fn drop(&mut self) {
        // Released after a terminal state; a task that never finished is aborted
        self.cancel.cancel();
    }
}

struct TaskJob {
    id: TaskId,
    client: reqwest::Client,
    request: HttpRequest,
    destination: Option<PathBuf>,
    run: watch::Receiver<bool>,
    cancel: CancellationToken,
}

impl TaskJob {
    async fn drive(mut self, events: TaskEvents) {
        let cancel = self.cancel.clone();

        // Tasks start suspended
        tokio::select! {
            _ = cancel.cancelled() => return,
            started = self.run.wait_for(|running| *running) => {
                if started.is_err() {
                    return;
                }
            }
        }

        let destination = self.destination.clone();
        let id = self.id;
        let outcome = tokio::select! {
            _ = cancel.cancelled() => None,
            outcome = self.execute() => Some(outcome),
        };

        match outcome {
            Some(outcome) if !cancel.is_cancelled() => events.finish(id, outcome).await,
            _ => {
                tracing::debug!(task_id = %id, "Task canceled");
                if let Some(path) = destination {
                    remove_partial(&path).await;
                }
            }
        }
    }

    async fn execute(&mut self) -> TransportOutcome {
        let response = match self.build().send().await {
            Ok(response) => response,
            Err(e) => {
                return TransportOutcome::Failure {
                    error: ConnectionError::from(&e),
                    response: None,
                };
            }
        };

        let meta = Response::Http(HttpResponse {
            url: response.url().clone(),
            status: response.status().as_u16(),
            headers: response.headers().into(),
        });

        let result = match self.destination.clone() {
            None => self.buffer(response).await.map(|body| TransportOutcome::Data {
                body,
                response: meta.clone(),
            }),
            Some(path) => match self.stream_to(response, &path).await {
                Ok(()) => Ok(TransportOutcome::File {
                    location: path,
                    response: meta.clone(),
                }),
                Err(error) => {
                    remove_partial(&path).await;
                    Err(error)
                }
            },
        };

        result.unwrap_or_else(|error| TransportOutcome::Failure {
            error,
            response: Some(meta),
        })
    }

    fn build(&self) -> reqwest::RequestBuilder {
        let method = match self.request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self.client.request(method, self.request.url.clone());
        for (name, value) in self.request.caching_policy.request_headers() {
            if !self.request.headers.contains(name) {
                builder = builder.header(*name, *value);
            }
        }
        for (name, value) in self.request.headers.iter() {
            builder = builder.header(name, value);
        }
        if let Some(body) = &self.request.body {
            builder = builder.body(body.clone());
        }
        builder
    }

    async fn buffer(
        &mut self,
        response: reqwest::Response,
    ) -> std::result::Result<bytes::Bytes, ConnectionError> {
        let mut body = BytesMut::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| ConnectionError::from(&e))?;
            self.wait_while_suspended().await;
            body.extend_from_slice(&chunk);
        }
        Ok(body.freeze())
    }

    async fn stream_to(
        &mut self,
        response: reqwest::Response,
        path: &Path,
    ) -> std::result::Result<(), ConnectionError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(path).await?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| ConnectionError::from(&e))?;
            self.wait_while_suspended().await;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(())
    }

    async fn wait_while_suspended(&mut self) {
        if !*self.run.borrow() {
            tracing::trace!(task_id = %self.id, "Transfer suspended");
            // Sender dropped means the task handle is gone; stop waiting
            self.run.wait_for(|running| *running).await.ok();
        }
    }
}

async fn remove_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove partial download");
        }
    }
}
