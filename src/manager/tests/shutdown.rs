use super::*;
use crate::config::Config;
use crate::error::Error;

const URL: &str = "http://example.test/report";

async fn plug_with(
    limit: usize,
    timeout: Duration,
) -> (Plug, Arc<FakeTransport>, tempfile::TempDir) {
    let temp_dir = tempfile::tempdir().unwrap();
    let mut config: Config = test_config(temp_dir.path());
    config.channel.max_simultaneous = limit;
    config.shutdown_timeout = timeout;
    create_test_plug_with(config, temp_dir).await
}

#[tokio::test]
async fn test_shutdown_refuses_new_requests() {
    let (plug, _fake, _temp_dir) = create_test_plug().await;
    assert!(!plug.is_shutting_down());

    plug.shutdown().await.unwrap();

    assert!(plug.is_shutting_down());
    match plug.try_request(Method::Get, URL, Parameters::None) {
        Err(Error::ShuttingDown) => {}
        other => panic!("Expected ShuttingDown error, got: {:?}", other),
    }
    assert!(plug.request(Method::Get, URL, Parameters::None).is_placeholder());
}

#[tokio::test]
async fn test_shutdown_cancels_queued_and_waits_for_running() {
    let (plug, fake, _temp_dir) = plug_with(1, Duration::from_secs(5)).await;
    let running = plug.try_request(Method::Get, URL, Parameters::None).unwrap();
    let queued = plug.try_request(Method::Get, URL, Parameters::None).unwrap();
    running.queue();
    queued.queue();
    assert_eq!(queued.state(), State::Queued);

    let shutdown = {
        let plug = plug.clone();
        tokio::spawn(async move { plug.shutdown().await })
    };
    assert!(eventually(|| queued.state() == State::Canceled).await);
    assert_eq!(running.state(), State::Running);

    fake.last().respond(data_outcome(URL, 200, b"{}")).await;
    shutdown.await.unwrap().unwrap();

    assert_eq!(running.state(), State::Completed);
    assert_eq!(fake.count(), 1);
}

#[tokio::test]
async fn test_shutdown_timeout_cancels_running() {
    let (plug, fake, _temp_dir) = plug_with(2, Duration::from_millis(100)).await;
    let (conn, submission) = started_get(&plug, &fake, URL).await;

    plug.shutdown().await.unwrap();

    assert_eq!(conn.state(), State::Canceled);
    assert!(submission.canceled());
    assert_eq!(plug.limited_channel().running_count(), 0);
}

#[tokio::test]
async fn test_queue_refused_during_shutdown() {
    let (plug, fake, _temp_dir) = create_test_plug().await;
    let conn = plug.try_request(Method::Get, URL, Parameters::None).unwrap();

    plug.shutdown().await.unwrap();

    assert!(!conn.queue());
    assert_eq!(conn.state(), State::Waiting);
    assert_eq!(fake.count(), 0);
}

#[tokio::test]
async fn test_interrupted_connection_keeps_persistence_record() {
    let temp_dir = tempfile::tempdir().unwrap();
    let db_path = temp_dir.path().join("plug.db");
    let mut config: Config = test_config(temp_dir.path());
    config.persistence.database_path = Some(db_path.clone());
    config.shutdown_timeout = Duration::from_millis(50);
    let (plug, _fake, temp_dir) = create_test_plug_with(config.clone(), temp_dir).await;

    let conn = plug.try_request(Method::Post, URL, Parameters::None).unwrap();
    conn.set_persistence(PersistenceInfo::new("nightly")).unwrap();
    conn.start();

    let store = plug.persistence_store().unwrap();
    let mut recorded = false;
    for _ in 0..100 {
        if !store.pending().await.unwrap().is_empty() {
            recorded = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(recorded);

    plug.shutdown().await.unwrap();
    assert_eq!(conn.state(), State::Canceled);

    // The next process picks the request up again
    let (next, _fake, _temp_dir) = create_test_plug_with(config, temp_dir).await;
    let restored = next.restore_persisted().await.unwrap();
    assert_eq!(restored.len(), 1);
    assert_eq!(restored[0].persistence().unwrap().key, "nightly");
}
