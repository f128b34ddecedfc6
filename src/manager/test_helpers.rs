//! Shared test helpers: a scriptable transport and engine factories.

use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::tempdir;
use url::Url;

use crate::config::Config;
use crate::connection::Connection;
use crate::error::ConnectionError;
use crate::headers::Headers;
use crate::manager::Plug;
use crate::parameters::Parameters;
use crate::transport::{
    HttpRequest, TaskEvents, TransferMode, Transport, TransportOutcome, TransportTask,
};
use crate::types::{HttpResponse, Method, Response, TaskId};

/// Calls a fake task has received
#[derive(Debug, Default)]
pub(crate) struct TaskControl {
    pub(crate) resumed: AtomicUsize,
    pub(crate) suspended: AtomicUsize,
    pub(crate) canceled: AtomicBool,
}

/// One request handed to the fake transport
#[derive(Clone)]
pub(crate) struct Submission {
    pub(crate) task_id: TaskId,
    pub(crate) request: HttpRequest,
    pub(crate) mode: TransferMode,
    pub(crate) events: TaskEvents,
    pub(crate) control: Arc<TaskControl>,
}

impl Submission {
    /// Report `outcome` the way a real transport would
    pub(crate) async fn respond(&self, outcome: TransportOutcome) {
        self.events.finish(self.task_id, outcome).await;
    }

    pub(crate) fn resumed(&self) -> usize {
        self.control.resumed.load(Ordering::SeqCst)
    }

    pub(crate) fn canceled(&self) -> bool {
        self.control.canceled.load(Ordering::SeqCst)
    }
}

struct FakeTask {
    id: TaskId,
    control: Arc<TaskControl>,
}

impl TransportTask for FakeTask {
    fn id(&self) -> TaskId {
        self.id
    }

    fn resume(&self) {
        self.control.resumed.fetch_add(1, Ordering::SeqCst);
    }

    fn suspend(&self) {
        self.control.suspended.fetch_add(1, Ordering::SeqCst);
    }

    fn cancel(&self) {
        self.control.canceled.store(true, Ordering::SeqCst);
    }
}

/// Transport that records submissions and reports whatever the test scripts
#[derive(Default)]
pub(crate) struct FakeTransport {
    next_id: AtomicU64,
    submissions: Mutex<Vec<Submission>>,
}

impl FakeTransport {
    pub(crate) fn submissions(&self) -> Vec<Submission> {
        self.submissions.lock().unwrap().clone()
    }

    pub(crate) fn last(&self) -> Submission {
        self.submissions
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no request was submitted")
    }

    pub(crate) fn count(&self) -> usize {
        self.submissions.lock().unwrap().len()
    }
}

impl Transport for FakeTransport {
    fn submit(
        &self,
        request: HttpRequest,
        mode: TransferMode,
        events: TaskEvents,
    ) -> Box<dyn TransportTask> {
        let id = TaskId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let control = Arc::new(TaskControl::default());
        self.submissions.lock().unwrap().push(Submission {
            task_id: id,
            request,
            mode,
            events,
            control: Arc::clone(&control),
        });
        Box::new(FakeTask { id, control })
    }
}

/// Config rooted in `dir`, with autostart off so tests drive the lifecycle
pub(crate) fn test_config(dir: &std::path::Path) -> Config {
    Config {
        temp_dir: dir.join("temp"),
        autostart_connections: false,
        ..Config::default()
    }
}

/// Engine on a fake transport. Returns the plug, the transport, and the
/// tempdir (which must be kept alive).
pub(crate) async fn create_test_plug() -> (Plug, Arc<FakeTransport>, tempfile::TempDir) {
    let temp_dir = tempdir().unwrap();
    let config = test_config(temp_dir.path());
    create_test_plug_with(config, temp_dir).await
}

/// Engine on a fake transport with a custom config
pub(crate) async fn create_test_plug_with(
    config: Config,
    temp_dir: tempfile::TempDir,
) -> (Plug, Arc<FakeTransport>, tempfile::TempDir) {
    let transport = Arc::new(FakeTransport::default());
    let plug = Plug::with_transport(config, transport.clone())
        .await
        .unwrap();
    (plug, transport, temp_dir)
}

/// GET connection to `url`, started directly (bypassing the channel)
pub(crate) async fn started_get(
    plug: &Plug,
    fake: &FakeTransport,
    url: &str,
) -> (Connection, Submission) {
    let conn = plug.try_request(Method::Get, url, Parameters::None).unwrap();
    assert!(conn.start());
    let submission = fake.last();
    (conn, submission)
}

/// HTTP response metadata with `status`
pub(crate) fn http_response(url: &str, status: u16) -> Response {
    Response::Http(HttpResponse {
        url: Url::parse(url).unwrap(),
        status,
        headers: Headers::from_iter([("Content-Type", "application/json")]),
    })
}

/// Buffered body outcome
pub(crate) fn data_outcome(url: &str, status: u16, body: &'static [u8]) -> TransportOutcome {
    TransportOutcome::Data {
        body: Bytes::from_static(body),
        response: http_response(url, status),
    }
}

/// Connectivity failure outcome with no response
pub(crate) fn connectivity_failure() -> TransportOutcome {
    TransportOutcome::Failure {
        error: ConnectionError::connectivity("could not connect to host"),
        response: None,
    }
}

/// Collects callback invocations in order
#[derive(Clone, Default)]
pub(crate) struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub(crate) fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub(crate) fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}
