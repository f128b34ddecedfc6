//! Terminal transition driven by the transport

use chrono::Utc;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{Connection, Resolution, ResultBody, ResultSlot};
use crate::error::{ConnectionError, ConnectionErrorKind};
use crate::transport::TransportOutcome;
use crate::types::{Event, Response, State};

impl Connection {
    /// Resolve the connection from its task's outcome
    ///
    /// Only the first outcome for a running connection has any effect; late or
    /// duplicate outcomes (and outcomes for canceled connections) are dropped.
    /// An outcome reported while the connection is suspended is held and applied
    /// after [`Connection::resume`].
    pub(crate) async fn handle_transport_outcome(&self, outcome: TransportOutcome) {
        let accepted = {
            let mut lifecycle = self.lock();
            let state = lifecycle.state;
            match state {
                State::Running if !lifecycle.finishing => {
                    lifecycle.finishing = true;
                    Ok(outcome)
                }
                State::Suspended if lifecycle.parked.is_none() => {
                    tracing::debug!(
                        connection_id = %self.id(),
                        "Holding transport outcome until resumed"
                    );
                    lifecycle.parked = Some(outcome);
                    return;
                }
                state => {
                    tracing::warn!(
                        connection_id = %self.id(),
                        state = %state,
                        "Ignoring late or duplicate transport outcome"
                    );
                    Err(outcome)
                }
            }
        };

        let outcome = match accepted {
            Ok(outcome) => outcome,
            Err(rejected) => {
                discard_outcome(rejected).await;
                return;
            }
        };

        let (response, result) = match outcome {
            TransportOutcome::Data { body, response } => {
                (Some(response), Ok(ResultBody::memory(body)))
            }
            TransportOutcome::File { location, response } => {
                let result = self.relocate(&location).await.map(ResultBody::file);
                (Some(response), result)
            }
            TransportOutcome::Failure { error, response } => {
                if error.is_connectivity() {
                    tracing::warn!(
                        connection_id = %self.id(),
                        url = %self.url(),
                        error = %error.message,
                        "Host unreachable; check network connectivity"
                    );
                }
                (response, Err(error))
            }
        };

        self.complete(response, result).await;
    }

    /// Move a downloaded file into the engine's temp directory
    ///
    /// The new name is derived from a hash of the transport's file name.
    async fn relocate(&self, location: &Path) -> Result<PathBuf, ConnectionError> {
        let temp_dir = &self.plug().config().temp_dir;
        let original = location
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| location.to_string_lossy().into_owned());
        let destination = temp_dir.join(format!("plug-temp-{}.tmp", sha256_hex(&original)));

        let moved = async {
            tokio::fs::create_dir_all(temp_dir).await?;
            if tokio::fs::rename(location, &destination).await.is_err() {
                // Different filesystem: copy, then drop the original
                tokio::fs::copy(location, &destination).await?;
                tokio::fs::remove_file(location).await?;
            }
            Ok::<_, std::io::Error>(())
        };

        match moved.await {
            Ok(()) => {
                tracing::trace!(
                    connection_id = %self.id(),
                    from = %location.display(),
                    to = %destination.display(),
                    "Moved downloaded file"
                );
                Ok(destination)
            }
            Err(e) => {
                tracing::warn!(
                    connection_id = %self.id(),
                    path = %location.display(),
                    error = %e,
                    "Failed to move downloaded file into temp directory"
                );
                Err(ConnectionError::new(
                    ConnectionErrorKind::TempFile,
                    format!("failed to move {}: {}", location.display(), e),
                ))
            }
        }
    }

    async fn complete(
        &self,
        response: Option<Response>,
        result: Result<ResultBody, ConnectionError>,
    ) {
        let committed = {
            let mut lifecycle = self.lock();
            lifecycle.finishing = false;

            // Canceled while the file was being moved
            if lifecycle.state.is_terminal() {
                Err(result)
            } else {
                let plug = self.plug();
                let status_code = response.as_ref().and_then(Response::status_code);
                lifecycle.response = response.clone();
                lifecycle.completed_at = Some(Utc::now());

                let resolution = match result {
                    Ok(body) => {
                        let body = Arc::new(body);
                        lifecycle.result = ResultSlot::Body(Arc::clone(&body));
                        lifecycle.state = State::Completed;
                        plug.emit(Event::Completed {
                            id: self.id(),
                            status_code,
                        });
                        Resolution::Succeeded {
                            id: self.id(),
                            body,
                            response,
                        }
                    }
                    Err(error) => {
                        lifecycle.result = ResultSlot::Error(error.clone());
                        lifecycle.state = State::CompletedWithError;
                        plug.emit(Event::CompletedWithError {
                            id: self.id(),
                            error: error.clone(),
                        });
                        Resolution::Failed(error)
                    }
                };

                Ok((
                    resolution,
                    lifecycle.task.take(),
                    lifecycle.task_id,
                    self.channel_of(&lifecycle),
                    lifecycle.persistence.clone(),
                    lifecycle.state,
                ))
            }
        };

        let (resolution, task, task_id, channel, persistence, state) = match committed {
            Ok(committed) => committed,
            Err(result) => {
                if let Ok(body) = &result
                    && let Some(path) = body.path()
                {
                    discard(path).await;
                }
                return;
            }
        };
        drop(task);

        tracing::debug!(
            connection_id = %self.id(),
            state = %state,
            status = ?self.status_code(),
            "Connection finished"
        );

        let plug = self.plug();
        if let Some(task_id) = task_id {
            plug.registry().unregister(task_id);
        }
        channel.connection_stopped(self);
        channel.dequeue(self);
        if let Some(info) = persistence {
            plug.persistence_finished(self, info);
        }
        self.inner.completion.release(resolution);
    }
}

/// Remove the file a dropped outcome delivered, if any
pub(super) async fn discard_outcome(outcome: TransportOutcome) {
    if let TransportOutcome::File { location, .. } = outcome {
        discard(&location).await;
    }
}

async fn discard(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        tracing::debug!(path = %path.display(), error = %e, "Failed to remove discarded download");
    }
}

fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}
