//! Task registry: routes transport callbacks back to their connection
//!
//! The map from transport task id to connection is owned by a single worker task.
//! Every operation is a message on one FIFO channel, so operations never
//! interleave and, for a given task id, are applied in the order they were issued.
//!
//! Entries are weak: the registry never keeps a connection alive. A lookup that
//! finds a dropped connection prunes the entry and reports nothing.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, oneshot};

use crate::types::TaskId;

enum Command<T> {
    Register { task_id: TaskId, target: Weak<T> },
    Unregister { task_id: TaskId },
    Lookup {
        task_id: TaskId,
        reply: oneshot::Sender<Option<Arc<T>>>,
    },
    Len { reply: oneshot::Sender<usize> },
}

/// Handle to the serialized task id → connection map (cheap to clone)
pub struct TaskRegistry<T> {
    tx: mpsc::UnboundedSender<Command<T>>,
}

impl<T> Clone for TaskRegistry<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T: Send + Sync + 'static> TaskRegistry<T> {
    /// Spawn the registry worker
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn new() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Command<T>>();

        tokio::spawn(async move {
            let mut entries: HashMap<TaskId, Weak<T>> = HashMap::new();
            while let Some(command) = rx.recv().await {
                match command {
                    Command::Register { task_id, target } => {
                        if entries.insert(task_id, target).is_some() {
                            tracing::warn!(
                                task_id = %task_id,
                                "Task registered twice; replacing entry"
                            );
                        }
                    }
                    Command::Unregister { task_id } => {
                        entries.remove(&task_id);
                    }
                    Command::Lookup { task_id, reply } => {
                        let found = entries.get(&task_id).and_then(Weak::upgrade);
                        if found.is_none() && entries.remove(&task_id).is_some() {
                            tracing::debug!(
                                task_id = %task_id,
                                "Pruned registry entry for dropped connection"
                            );
                        }
                        reply.send(found).ok();
                    }
                    Command::Len { reply } => {
                        reply.send(entries.len()).ok();
                    }
                }
            }
            tracing::trace!("Task registry worker stopped");
        });

        Self { tx }
    }

    /// Map `task_id` to `target`
    pub fn register(&self, task_id: TaskId, target: &Arc<T>) {
        self.send(Command::Register {
            task_id,
            target: Arc::downgrade(target),
        });
    }

    /// Remove the entry for `task_id`, if any
    pub fn unregister(&self, task_id: TaskId) {
        self.send(Command::Unregister { task_id });
    }

    /// Find the live target for `task_id`
    ///
    /// Unknown ids (never registered, already unregistered, or whose target was
    /// dropped) yield `None`.
    pub async fn lookup(&self, task_id: TaskId) -> Option<Arc<T>> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Lookup { task_id, reply });
        rx.await.ok().flatten()
    }

    /// Number of entries currently held
    pub async fn len(&self) -> usize {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Len { reply });
        rx.await.unwrap_or(0)
    }

    /// Whether the registry holds no entries
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn send(&self, command: Command<T>) {
        if self.tx.send(command).is_err() {
            tracing::warn!("Task registry worker is gone; command dropped");
        }
    }
}

impl<T: Send + Sync + 'static> Default for TaskRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}
