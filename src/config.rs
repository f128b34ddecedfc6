//! Configuration types for plug

use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

use crate::error::{Error, Result};
use crate::headers::Headers;

/// Network session settings handed to the transport
///
/// Timeouts are owned entirely by the transport; the engine itself never
/// times a request out.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Whole-request timeout (None = transport default)
    #[serde(default, with = "optional_duration_serde")]
    pub request_timeout: Option<Duration>,

    /// Connect timeout (None = transport default)
    #[serde(default, with = "optional_duration_serde")]
    pub connect_timeout: Option<Duration>,

    /// User-Agent header sent by the session
    #[serde(default)]
    pub user_agent: Option<String>,
}

/// Admission settings for the default channel
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Channel name, used in logs (default: "default")
    #[serde(default = "default_channel_name")]
    pub name: String,

    /// Maximum connections running at once (default: 5)
    #[serde(default = "default_max_simultaneous")]
    pub max_simultaneous: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            name: default_channel_name(),
            max_simultaneous: default_max_simultaneous(),
        }
    }
}

/// Request persistence settings
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// SQLite database recording in-flight requests (None = persistence disabled)
    #[serde(default)]
    pub database_path: Option<PathBuf>,
}

/// Main configuration for [`Plug`](crate::Plug)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Directory downloaded files are moved into (default: "<os temp>/plug")
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,

    /// Queue new connections automatically (default: true)
    #[serde(default = "default_true")]
    pub autostart_connections: bool,

    /// Delay before an autostarted connection is queued (default: 50ms)
    ///
    /// Leaves the caller time to attach callbacks before the request is admitted.
    #[serde(default = "default_autostart_delay", with = "duration_serde")]
    pub autostart_delay: Duration,

    /// Headers applied to requests that never had headers set explicitly
    #[serde(default = "default_headers")]
    pub default_headers: Headers,

    /// Event broadcast buffer size (default: 1000)
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,

    /// How long shutdown waits for running connections (default: 30s)
    #[serde(default = "default_shutdown_timeout", with = "duration_serde")]
    pub shutdown_timeout: Duration,

    /// Network session settings
    #[serde(default)]
    pub session: SessionConfig,

    /// Default channel settings
    #[serde(default)]
    pub channel: ChannelConfig,

    /// Request persistence settings
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            temp_dir: default_temp_dir(),
            autostart_connections: true,
            autostart_delay: default_autostart_delay(),
            default_headers: default_headers(),
            event_buffer: default_event_buffer(),
            shutdown_timeout: default_shutdown_timeout(),
            session: SessionConfig::default(),
            channel: ChannelConfig::default(),
            persistence: PersistenceConfig::default(),
        }
    }
}

impl Config {
    /// Check settings that would make the engine unusable
    pub fn validate(&self) -> Result<()> {
        if self.channel.max_simultaneous == 0 {
            return Err(Error::Config {
                message: "channel must admit at least one connection".to_string(),
                key: Some("channel.max_simultaneous".to_string()),
            });
        }
        if self.event_buffer == 0 {
            return Err(Error::Config {
                message: "event buffer must hold at least one event".to_string(),
                key: Some("event_buffer".to_string()),
            });
        }
        Ok(())
    }
}

fn default_temp_dir() -> PathBuf {
    std::env::temp_dir().join("plug")
}

fn default_true() -> bool {
    true
}

fn default_autostart_delay() -> Duration {
    Duration::from_millis(50)
}

fn default_headers() -> Headers {
    [
        ("Accept", "application/json"),
        ("Accept-Encoding", "gzip;q=1.0,compress;q=0.5"),
    ]
    .into_iter()
    .collect()
}

fn default_event_buffer() -> usize {
    1000
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_channel_name() -> String {
    "default".to_string()
}

fn default_max_simultaneous() -> usize {
    5
}

// Durations are written as integer milliseconds
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

mod optional_duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = Option::<u64>::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}
