//! Graceful shutdown

use std::sync::atomic::Ordering;
use std::time::Duration;

use super::Plug;
use crate::error::Result;

impl Plug {
    /// Whether [`Plug::shutdown`] has begun
    pub fn is_shutting_down(&self) -> bool {
        !self.accepting_new.load(Ordering::SeqCst)
    }

    /// Stop the engine
    ///
    /// 1. New requests are refused with [`Error::ShuttingDown`](crate::Error::ShuttingDown)
    /// 2. Connections still waiting for a slot in the default channel are canceled
    /// 3. Running connections get `config.shutdown_timeout` to finish
    /// 4. Whatever is left is canceled
    /// 5. Pending persistence calls finish and the store is closed
    ///
    /// Persistent connections interrupted in step 4 keep their record, so
    /// [`Plug::restore_persisted`] re-issues them in the next process.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Initiating graceful shutdown");
        self.accepting_new.store(false, Ordering::SeqCst);

        let queued: Vec<_> = self
            .channel
            .connections()
            .into_iter()
            .filter(|c| c.state().can_start())
            .collect();
        for connection in &queued {
            connection.cancel();
        }
        if !queued.is_empty() {
            tracing::info!(count = queued.len(), "Canceled queued connections");
        }

        let timeout = self.config.shutdown_timeout;
        if tokio::time::timeout(timeout, self.wait_for_running()).await.is_err() {
            let leftover = self.channel.connections();
            tracing::warn!(
                count = leftover.len(),
                "Timeout waiting for connections to finish, canceling"
            );
            for connection in leftover {
                connection.cancel();
            }
        } else {
            tracing::info!("All running connections finished");
        }

        self.flush_persistence().await;
        if let Some(store) = &self.persistence.store {
            store.close().await;
        }

        tracing::info!("Graceful shutdown complete");
        Ok(())
    }

    async fn wait_for_running(&self) {
        while self.channel.running_count() > 0 {
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }
}
