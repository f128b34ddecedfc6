//! Request persistence hook
//!
//! The engine itself persists nothing. It offers one notification point: after a
//! connection carrying [`PersistenceInfo`] has started, the configured
//! [`PersistenceDelegate`] is told about it, and again once it reaches a terminal
//! state. [`SqlitePersistence`] is a delegate that records in-flight requests in
//! SQLite so a restarted process can re-issue them.

mod sqlite;

pub use sqlite::{PendingRequest, SqlitePersistence};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::connection::Connection;
use crate::error::Result;

/// Caller-supplied metadata identifying a request across restarts
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PersistenceInfo {
    /// Stable key chosen by the caller (unique per logical request)
    pub key: String,
    /// Free-form data the caller needs to resume the request
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl PersistenceInfo {
    /// Info with a key and no metadata
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            metadata: serde_json::Value::Null,
        }
    }

    /// Attach metadata
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Receiver of persistence notifications
#[async_trait]
pub trait PersistenceDelegate: Send + Sync {
    /// Called once, after `start()`, for each connection carrying persistence info
    async fn connection_started(&self, connection: &Connection, info: &PersistenceInfo)
    -> Result<()>;

    /// Called once the connection is completed, failed, or canceled
    async fn connection_finished(
        &self,
        _connection: &Connection,
        _info: &PersistenceInfo,
    ) -> Result<()> {
        Ok(())
    }
}
