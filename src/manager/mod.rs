//! The engine context.
//!
//! [`Plug`] owns everything connections share: the transport session, default
//! configuration and headers, the task registry, the main delivery context, the
//! default channel, and the optional persistence delegate. It is cheap to clone;
//! all fields are shared.
//!
//! - [`requests`] - connection construction and autostart
//! - [`persistence`] - persistence hooks and restoring leftover requests
//! - [`shutdown`] - graceful shutdown

mod persistence;
mod requests;
mod shutdown;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use url::Url;

use crate::channel::{Channel, LimitedChannel};
use crate::config::Config;
use crate::connection::{Connection, ConnectionInner};
use crate::dispatcher::Dispatcher;
use crate::error::{Error, Result};
use crate::persistence::{PersistenceDelegate, SqlitePersistence};
use crate::registry::TaskRegistry;
use crate::transport::{ReqwestTransport, TaskEvents, Transport};
use crate::types::{Event, TaskId};

/// Where placeholder connections point
const PLACEHOLDER_URL: &str = "about:blank";

/// Request persistence wiring
#[derive(Clone)]
pub(crate) struct PersistenceHooks {
    /// Delegate notified when persistent connections start and finish
    pub(crate) delegate: Option<Arc<dyn PersistenceDelegate>>,
    /// Built-in SQLite store, when configured through `Config::persistence`
    pub(crate) store: Option<Arc<SqlitePersistence>>,
    /// Serial context every delegate call runs on, so a connection's
    /// `finished` notification never overtakes its `started` one
    pub(crate) queue: Dispatcher,
}

/// Engine context issuing and tracking connections (cloneable - all fields are shared)
#[derive(Clone)]
pub struct Plug {
    /// Configuration (wrapped in Arc for sharing across connections)
    pub(crate) config: Arc<Config>,
    /// Network session every connection submits to
    pub(crate) transport: Arc<dyn Transport>,
    /// Task id -> connection routing for transport outcomes
    pub(crate) registry: TaskRegistry<ConnectionInner>,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: tokio::sync::broadcast::Sender<Event>,
    /// Default delivery context for callbacks
    pub(crate) main: Dispatcher,
    /// Channel used by connections that were not given one
    pub(crate) channel: Arc<LimitedChannel>,
    /// Persistence delegate and store
    pub(crate) persistence: PersistenceHooks,
    /// Runtime the engine was created on; hooks are spawned here
    pub(crate) runtime: tokio::runtime::Handle,
    /// Whether new requests are accepted (false once shutdown begins)
    pub(crate) accepting_new: Arc<AtomicBool>,
    /// Target of placeholder connections
    pub(crate) placeholder_url: Url,
}

impl Plug {
    /// Create an engine backed by [`ReqwestTransport`]
    ///
    /// This initializes:
    /// - the temp directory downloaded files are moved into
    /// - a reqwest client built from `config.session`
    /// - the SQLite persistence store, if `config.persistence.database_path` is set
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let transport = ReqwestTransport::new(&config.session, config.temp_dir.join("transport"))?;
        Self::with_transport(config, Arc::new(transport)).await
    }

    /// Create an engine on top of any transport
    pub async fn with_transport(config: Config, transport: Arc<dyn Transport>) -> Result<Self> {
        config.validate()?;

        tokio::fs::create_dir_all(&config.temp_dir)
            .await
            .map_err(|e| {
                Error::Io(std::io::Error::new(
                    e.kind(),
                    format!(
                        "Failed to create temp directory '{}': {}",
                        config.temp_dir.display(),
                        e
                    ),
                ))
            })?;

        let store = match &config.persistence.database_path {
            Some(path) => Some(Arc::new(SqlitePersistence::open(path).await?)),
            None => None,
        };
        let persistence = PersistenceHooks {
            delegate: store
                .clone()
                .map(|store| store as Arc<dyn PersistenceDelegate>),
            store,
            queue: Dispatcher::new("persistence"),
        };
        let placeholder_url = Url::parse(PLACEHOLDER_URL).map_err(|e| Error::InvalidUrl {
            url: PLACEHOLDER_URL.to_string(),
            reason: e.to_string(),
        })?;

        let (event_tx, _rx) = tokio::sync::broadcast::channel(config.event_buffer);
        let channel = Arc::new(LimitedChannel::new(
            config.channel.name.clone(),
            config.channel.max_simultaneous,
        ));

        tracing::info!(
            temp_dir = %config.temp_dir.display(),
            channel = %config.channel.name,
            max_simultaneous = config.channel.max_simultaneous,
            autostart = config.autostart_connections,
            persistence = persistence.store.is_some(),
            "Plug initialized"
        );

        Ok(Self {
            config: Arc::new(config),
            transport,
            registry: TaskRegistry::new(),
            event_tx,
            main: Dispatcher::new("main"),
            channel,
            persistence,
            runtime: tokio::runtime::Handle::current(),
            accepting_new: Arc::new(AtomicBool::new(true)),
            placeholder_url,
        })
    }

    /// Subscribe to lifecycle events
    ///
    /// Each subscriber receives every event independently. A subscriber that
    /// falls more than `config.event_buffer` events behind gets
    /// `RecvError::Lagged`.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Current configuration
    pub fn config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// Delivery context callbacks run on unless another one is given
    pub fn main_dispatcher(&self) -> &Dispatcher {
        &self.main
    }

    /// Default channel
    pub fn channel(&self) -> Arc<dyn Channel> {
        self.channel.clone()
    }

    /// Default channel with its concrete type, for inspecting slot usage
    pub fn limited_channel(&self) -> Arc<LimitedChannel> {
        Arc::clone(&self.channel)
    }

    /// Connection that owns a transport task, if it is still in flight
    pub async fn lookup_task(&self, task_id: TaskId) -> Option<Connection> {
        self.registry.lookup(task_id).await.map(Connection::from_inner)
    }

    /// Number of transport tasks currently routed to a connection
    pub async fn active_tasks(&self) -> usize {
        self.registry.len().await
    }

    pub(crate) fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub(crate) fn registry(&self) -> &TaskRegistry<ConnectionInner> {
        &self.registry
    }

    pub(crate) fn task_events(&self) -> TaskEvents {
        TaskEvents::new(self.registry.clone())
    }

    /// Emit an event to all subscribers
    ///
    /// With no subscribers the event is dropped.
    pub(crate) fn emit(&self, event: Event) {
        self.event_tx.send(event).ok();
    }
}

impl std::fmt::Debug for Plug {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Plug")
            .field("temp_dir", &self.config.temp_dir)
            .field("channel", &self.channel)
            .field("persistence", &self.persistence.delegate.is_some())
            .finish()
    }
}
