//! Connection construction and autostart

use super::Plug;
use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::parameters::Parameters;
use crate::types::Method;

impl Plug {
    /// Create a connection for `method url` with `parameters`
    ///
    /// If `url` does not parse (or the engine is shutting down), a placeholder
    /// connection pointing at `about:blank` is returned instead; it never starts
    /// and its callbacks never run. Check [`Connection::is_placeholder`], or use
    /// [`Plug::try_request`] to get the error.
    ///
    /// With `autostart_connections` enabled the connection is queued after
    /// `autostart_delay`, leaving time to attach callbacks.
    pub fn request(&self, method: Method, url: &str, parameters: Parameters) -> Connection {
        match self.try_request(method, url, parameters) {
            Ok(connection) => connection,
            Err(e) => {
                tracing::warn!(
                    url = %url,
                    error = %e,
                    "Request refused; returning placeholder connection"
                );
                Connection::placeholder(self)
            }
        }
    }

    /// Create a connection, failing with [`Error::InvalidUrl`] on an
    /// unparseable URL and [`Error::ShuttingDown`] after [`Plug::shutdown`]
    pub fn try_request(
        &self,
        method: Method,
        url: &str,
        parameters: Parameters,
    ) -> Result<Connection> {
        if self.is_shutting_down() {
            return Err(Error::ShuttingDown);
        }

        let connection = Connection::new(self, method, url, parameters)?;
        tracing::debug!(
            connection_id = %connection.id(),
            method = %connection.method(),
            url = %connection.url(),
            "Connection created"
        );

        if self.config.autostart_connections {
            self.schedule_autostart(&connection);
        }
        Ok(connection)
    }

    /// Queue `connection` after the configured delay
    ///
    /// The pending autostart keeps the connection alive until it is queued.
    pub(super) fn schedule_autostart(&self, connection: &Connection) {
        let delay = self.config.autostart_delay;
        let connection = connection.clone();
        self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            connection.queue();
        });
    }
}
