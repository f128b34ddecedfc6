//! Common test utilities for plug integration tests

use plug::{Config, Connection, ConnectionError, Plug, Reply, State};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::oneshot;

/// How long a single request may take before a test gives up
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Engine on the reqwest transport with its temp directory inside a fresh tempdir
///
/// Autostart is off; tests queue connections themselves.
pub async fn create_http_plug() -> (Plug, TempDir) {
    let temp_dir = tempfile::tempdir().unwrap();
    let config = Config {
        temp_dir: temp_dir.path().join("temp"),
        autostart_connections: false,
        ..Config::default()
    };
    let plug = Plug::new(config).await.unwrap();
    (plug, temp_dir)
}

/// Terminal result of a connection as seen by its callbacks
#[derive(Debug)]
pub enum Outcome {
    Success(Reply),
    Failure(ConnectionError),
}

/// Queue `connection` and wait for its success or failure callback
pub async fn run(connection: &Connection) -> Outcome {
    let (tx, rx) = oneshot::channel();
    let tx = std::sync::Arc::new(std::sync::Mutex::new(Some(tx)));
    let on_failure = tx.clone();

    connection
        .on_success(move |reply| async move {
            if let Some(tx) = tx.lock().unwrap().take() {
                tx.send(Outcome::Success(reply)).ok();
            }
        })
        .on_failure(move |error| async move {
            if let Some(tx) = on_failure.lock().unwrap().take() {
                tx.send(Outcome::Failure(error)).ok();
            }
        });
    assert!(connection.queue(), "connection was not queueable");

    tokio::time::timeout(REQUEST_TIMEOUT, rx)
        .await
        .expect("request timed out")
        .expect("callback dropped without running")
}

/// Poll until `connection` reaches `state`
pub async fn wait_for_state(connection: &Connection, state: State) -> bool {
    for _ in 0..200 {
        if connection.state() == state {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    connection.state() == state
}
