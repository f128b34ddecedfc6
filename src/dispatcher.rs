//! Serial delivery contexts for completion callbacks
//!
//! A [`Dispatcher`] runs submitted futures one at a time, in submission order, on a
//! single Tokio worker task. Each [`Plug`](crate::Plug) owns one as its "main"
//! context; callers can create their own to keep their callbacks off it.

use futures::FutureExt;
use futures::future::BoxFuture;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

type Job = BoxFuture<'static, ()>;

/// Handle to a serial execution context (cheap to clone)
#[derive(Clone)]
pub struct Dispatcher {
    name: Arc<str>,
    tx: mpsc::UnboundedSender<Job>,
}

impl Dispatcher {
    /// Spawn a new serial context
    ///
    /// The worker stops once every handle has been dropped and the queue is drained.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn new(name: impl Into<String>) -> Self {
        let name: Arc<str> = Arc::from(name.into());
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();

        let worker_name = Arc::clone(&name);
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                // A panicking callback must not take the whole context down
                if AssertUnwindSafe(job).catch_unwind().await.is_err() {
                    tracing::error!(dispatcher = %worker_name, "Callback panicked");
                }
            }
            tracing::trace!(dispatcher = %worker_name, "Dispatcher worker stopped");
        });

        Self { name, tx }
    }

    /// Name given at construction
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue a future behind everything already submitted
    ///
    /// Returns false if the worker is gone (the runtime shut down).
    pub fn dispatch<F>(&self, job: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tx.send(Box::pin(job)).is_ok()
    }

    /// Wait until every job submitted before this call has run
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.dispatch(async move {
            done_tx.send(()).ok();
        }) {
            done_rx.await.ok();
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher").field("name", &self.name).finish()
    }
}
