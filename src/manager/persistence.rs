//! Persistence hooks and restoring leftover requests

use std::sync::Arc;

use super::Plug;
use crate::connection::Connection;
use crate::error::Result;
use crate::persistence::{PendingRequest, PersistenceDelegate, PersistenceInfo, SqlitePersistence};
use crate::types::State;

impl Plug {
    /// Replace the persistence delegate
    ///
    /// The built-in SQLite store (if configured) stays available through
    /// [`Plug::persistence_store`] but is no longer notified.
    pub fn with_persistence_delegate(mut self, delegate: Arc<dyn PersistenceDelegate>) -> Self {
        self.persistence.delegate = Some(delegate);
        self
    }

    /// Built-in SQLite store, if `config.persistence.database_path` was set
    pub fn persistence_store(&self) -> Option<Arc<SqlitePersistence>> {
        self.persistence.store.clone()
    }

    /// Report a started persistent connection to the delegate
    ///
    /// Delegate calls run one at a time on the persistence queue, in the order
    /// they were reported. A failing delegate is logged and otherwise ignored.
    pub(crate) fn persistence_started(&self, connection: &Connection, info: PersistenceInfo) {
        let Some(delegate) = self.persistence.delegate.clone() else {
            return;
        };
        let connection = connection.clone();
        self.persistence.queue.dispatch(async move {
            if let Err(e) = delegate.connection_started(&connection, &info).await {
                tracing::error!(
                    connection_id = %connection.id(),
                    key = %info.key,
                    error = %e,
                    "Persistence delegate failed to record started connection"
                );
            }
        });
    }

    /// Report a finished persistent connection to the delegate
    ///
    /// Connections canceled by shutdown are not reported, so their records survive
    /// for the next process.
    pub(crate) fn persistence_finished(&self, connection: &Connection, info: PersistenceInfo) {
        let Some(delegate) = self.persistence.delegate.clone() else {
            return;
        };
        if self.is_shutting_down() && connection.state() == State::Canceled {
            tracing::debug!(
                connection_id = %connection.id(),
                key = %info.key,
                "Keeping persistence record of connection interrupted by shutdown"
            );
            return;
        }
        let connection = connection.clone();
        self.persistence.queue.dispatch(async move {
            if let Err(e) = delegate.connection_finished(&connection, &info).await {
                tracing::error!(
                    connection_id = %connection.id(),
                    key = %info.key,
                    error = %e,
                    "Persistence delegate failed to record finished connection"
                );
            }
        });
    }

    /// Wait for every delegate call reported so far
    pub(crate) async fn flush_persistence(&self) {
        self.persistence.queue.flush().await;
    }

    /// Re-issue requests the SQLite store recorded but never saw finish
    ///
    /// Each returned connection carries its original method, URL, parameters,
    /// explicit headers, transfer mode, and persistence info. Autostart applies
    /// as for any new request. Records whose URL no longer parses are dropped
    /// from the store.
    pub async fn restore_persisted(&self) -> Result<Vec<Connection>> {
        let Some(store) = self.persistence.store.clone() else {
            return Ok(Vec::new());
        };

        let pending = store.pending().await?;
        if !pending.is_empty() {
            tracing::info!(count = pending.len(), "Restoring persisted requests");
        }

        let mut restored = Vec::with_capacity(pending.len());
        for request in pending {
            match self.restore_one(&request) {
                Ok(connection) => restored.push(connection),
                Err(e) => {
                    tracing::warn!(key = %request.key, error = %e, "Dropping unrestorable request");
                    store.remove(&request.key).await?;
                }
            }
        }
        Ok(restored)
    }

    fn restore_one(&self, request: &PendingRequest) -> Result<Connection> {
        // Configure before any autostart can queue it
        let connection = Connection::new(
            self,
            request.method,
            &request.url,
            request.parameters.clone(),
        )?;
        if let Some(headers) = &request.headers {
            connection.set_headers(headers.clone())?;
        }
        connection.set_download_to_file(request.download_to_file)?;
        connection.set_persistence(request.info())?;

        if self.config.autostart_connections {
            self.schedule_autostart(&connection);
        }
        Ok(connection)
    }
}
