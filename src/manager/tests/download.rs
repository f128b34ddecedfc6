use super::*;

const URL: &str = "http://example.test/file.bin";

async fn started_download(
    plug: &Plug,
    fake: &FakeTransport,
) -> (crate::connection::Connection, Submission) {
    let conn = plug.try_request(Method::Get, URL, Parameters::None).unwrap();
    conn.set_download_to_file(true).unwrap();
    assert!(conn.start());
    (conn, fake.last())
}

/// Write `contents` where a transport would leave a finished download
fn transport_file(dir: &std::path::Path, name: &str, contents: &[u8]) -> std::path::PathBuf {
    let location = dir.join("transport");
    std::fs::create_dir_all(&location).unwrap();
    let path = location.join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

#[tokio::test]
async fn test_download_is_moved_into_temp_dir() {
    let (plug, fake, temp_dir) = create_test_plug().await;
    let (conn, submission) = started_download(&plug, &fake).await;
    assert_eq!(submission.mode, TransferMode::StreamToFile);

    let location = transport_file(temp_dir.path(), "task-1.download", b"file body");
    submission
        .respond(TransportOutcome::File {
            location: location.clone(),
            response: http_response(URL, 200),
        })
        .await;

    assert_eq!(conn.state(), State::Completed);
    let stored = conn.result_url().unwrap();
    assert!(stored.starts_with(&plug.config().temp_dir));
    let name = stored.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("plug-temp-"));
    assert!(name.ends_with(".tmp"));
    assert!(!location.exists());
    assert_eq!(std::fs::read(&stored).unwrap(), b"file body");
}

#[tokio::test]
async fn test_result_data_materializes_once() {
    let (plug, fake, temp_dir) = create_test_plug().await;
    let (conn, submission) = started_download(&plug, &fake).await;

    let location = transport_file(temp_dir.path(), "task-1.download", b"read me once");
    submission
        .respond(TransportOutcome::File {
            location,
            response: http_response(URL, 200),
        })
        .await;

    let body = conn.result_body().unwrap();
    assert!(!body.is_materialized());

    let first = conn.result_data().await.unwrap();
    assert_eq!(first, &b"read me once"[..]);
    assert!(body.is_materialized());

    // The second read must not touch the disk
    std::fs::remove_file(conn.result_url().unwrap()).unwrap();
    let second = conn.result_data().await.unwrap();
    assert_eq!(second, first);
}

#[tokio::test]
async fn test_success_callback_reads_file_body() {
    let (plug, fake, temp_dir) = create_test_plug().await;
    let (conn, submission) = started_download(&plug, &fake).await;
    let (tx, rx) = tokio::sync::oneshot::channel();
    conn.on_success(move |reply| async move {
        tx.send(reply).ok();
    });

    let location = transport_file(temp_dir.path(), "task-1.download", b"streamed");
    submission
        .respond(TransportOutcome::File {
            location,
            response: http_response(URL, 200),
        })
        .await;

    let reply = rx.await.unwrap();
    assert_eq!(reply.data, &b"streamed"[..]);
    assert_eq!(reply.file, conn.result_url());
    // The callback's read is shared with later accessors
    assert!(conn.result_body().unwrap().is_materialized());
}

#[tokio::test]
async fn test_distinct_downloads_get_distinct_names() {
    let (plug, fake, temp_dir) = create_test_plug().await;
    let (a, sub_a) = started_download(&plug, &fake).await;
    let (b, sub_b) = started_download(&plug, &fake).await;

    for (submission, name) in [(&sub_a, "task-1.download"), (&sub_b, "task-2.download")] {
        let location = transport_file(temp_dir.path(), name, name.as_bytes());
        submission
            .respond(TransportOutcome::File {
                location,
                response: http_response(URL, 200),
            })
            .await;
    }

    assert_ne!(a.result_url(), b.result_url());
    assert_eq!(a.result_data().await.unwrap(), &b"task-1.download"[..]);
    assert_eq!(b.result_data().await.unwrap(), &b"task-2.download"[..]);
}

#[tokio::test]
async fn test_failed_move_completes_with_error() {
    let (plug, fake, temp_dir) = create_test_plug().await;
    let (conn, submission) = started_download(&plug, &fake).await;
    let log = CallLog::default();
    let sink = log.clone();
    conn.on_failure(move |error| async move { sink.push(error.kind.to_string()) });

    // Nothing exists at the reported location
    submission
        .respond(TransportOutcome::File {
            location: temp_dir.path().join("transport/missing.download"),
            response: http_response(URL, 200),
        })
        .await;
    plug.main_dispatcher().flush().await;

    assert_eq!(conn.state(), State::CompletedWithError);
    assert_eq!(conn.result_error().unwrap().kind, ConnectionErrorKind::TempFile);
    assert!(conn.result_url().is_none());
    assert_eq!(conn.status_code(), Some(200));
    assert_eq!(log.entries(), vec!["temp_file"]);
}

#[tokio::test]
async fn test_late_file_for_canceled_download_is_removed() {
    let (plug, fake, temp_dir) = create_test_plug().await;
    let (conn, submission) = started_download(&plug, &fake).await;
    conn.cancel();

    let location = transport_file(temp_dir.path(), "task-1.download", b"too late");
    conn.handle_transport_outcome(TransportOutcome::File {
        location: location.clone(),
        response: http_response(URL, 200),
    })
    .await;

    assert_eq!(conn.state(), State::Canceled);
    assert!(!location.exists());
    assert!(submission.canceled());
}
