//! Lifecycle transitions driven by the caller and the channel
//!
//! Every transition is decided under the connection's lock. Work that only
//! queues a message (events, registry commands, persistence hooks) may happen
//! under it; channel notifications happen after it is released. Channels take
//! their own lock before reading connection state, never the other way around.

use chrono::Utc;

use super::outcome::discard_outcome;
use super::{Connection, Lifecycle};
use crate::channel::Channel;
use crate::transport::TransferMode;
use crate::types::{Event, State};
use std::sync::Arc;

impl Connection {
    pub(super) fn channel_of(&self, lifecycle: &Lifecycle) -> Arc<dyn Channel> {
        lifecycle
            .channel
            .clone()
            .unwrap_or_else(|| self.plug().channel())
    }

    /// Hand the connection to its channel for admission (`Waiting -> Queued`)
    ///
    /// Returns false if the connection was not waiting. Placeholders are never
    /// queued, and nothing is queued once the engine is shutting down.
    pub fn queue(&self) -> bool {
        if self.is_placeholder() {
            tracing::debug!(connection_id = %self.id(), "Not queueing placeholder connection");
            return false;
        }
        if self.plug().is_shutting_down() {
            tracing::debug!(connection_id = %self.id(), "Not queueing connection during shutdown");
            return false;
        }

        let channel = {
            let mut lifecycle = self.lock();
            if lifecycle.state != State::Waiting {
                return false;
            }
            lifecycle.state = State::Queued;
            self.plug().emit(Event::Queued { id: self.id() });
            self.channel_of(&lifecycle)
        };

        tracing::debug!(
            connection_id = %self.id(),
            channel = channel.name(),
            "Connection queued"
        );
        channel.enqueue(self);
        true
    }

    /// Generate the transport task, register it, and run it
    ///
    /// No-op (returns false) unless the connection is `Waiting` or `Queued`.
    /// The task is created suspended and only resumed once it is registered, so
    /// its outcome can always be routed back here.
    pub fn start(&self) -> bool {
        if self.is_placeholder() {
            return false;
        }

        let request = self.current_request();
        let plug = self.plug();

        let (channel, task_id) = {
            let mut lifecycle = self.lock();
            if !lifecycle.state.can_start() {
                tracing::debug!(
                    connection_id = %self.id(),
                    state = %lifecycle.state,
                    "Ignoring start"
                );
                return false;
            }

            let mode = if lifecycle.download_to_file {
                TransferMode::StreamToFile
            } else {
                TransferMode::Buffer
            };
            let task = plug.transport().submit(request, mode, plug.task_events());
            let task_id = task.id();
            plug.registry().register(task_id, &self.inner);

            lifecycle.state = State::Running;
            lifecycle.started_at = Some(Utc::now());
            lifecycle.task_id = Some(task_id);
            task.resume();
            lifecycle.task = Some(task);

            // Emitted under the lock so it always precedes the terminal event
            plug.emit(Event::Started {
                id: self.id(),
                task_id,
            });
            // Queued under the lock for the same reason: the finished hook can
            // only be queued after a terminal transition
            if let Some(info) = lifecycle.persistence.clone() {
                plug.persistence_started(self, info);
            }

            (self.channel_of(&lifecycle), task_id)
        };

        tracing::debug!(
            connection_id = %self.id(),
            task_id = %task_id,
            mode = if self.download_to_file() { "file" } else { "memory" },
            "Connection started"
        );

        channel.connection_started(self);
        true
    }

    /// Pause the transport task (`Running -> Suspended`)
    ///
    /// Returns false once the task's outcome is already being applied.
    pub fn suspend(&self) -> bool {
        let channel = {
            let mut lifecycle = self.lock();
            if lifecycle.state != State::Running || lifecycle.finishing {
                return false;
            }
            lifecycle.state = State::Suspended;
            if let Some(task) = &lifecycle.task {
                task.suspend();
            }
            self.channel_of(&lifecycle)
        };

        tracing::debug!(connection_id = %self.id(), "Connection suspended");
        channel.connection_stopped(self);
        true
    }

    /// Continue the transport task (`Suspended -> Running`)
    ///
    /// An outcome the task reported while suspended is applied right after.
    pub fn resume(&self) -> bool {
        let (channel, parked) = {
            let mut lifecycle = self.lock();
            if lifecycle.state != State::Suspended {
                return false;
            }
            lifecycle.state = State::Running;
            if let Some(task) = &lifecycle.task {
                task.resume();
            }
            (self.channel_of(&lifecycle), lifecycle.parked.take())
        };

        tracing::debug!(connection_id = %self.id(), "Connection resumed");
        channel.connection_started(self);
        if let Some(outcome) = parked {
            let connection = self.clone();
            self.plug().runtime.spawn(async move {
                connection.handle_transport_outcome(outcome).await;
            });
        }
        true
    }

    /// Cancel from any non-terminal state
    ///
    /// Always reaches `Canceled`, even if the transport cannot stop the task
    /// right away. Outcomes arriving afterwards are dropped and no callback runs.
    /// Returns false if the connection had already finished.
    pub fn cancel(&self) -> bool {
        let (task, task_id, channel, persistence, parked) = {
            let mut lifecycle = self.lock();
            if lifecycle.state.is_terminal() {
                return false;
            }
            lifecycle.state = State::Canceled;
            lifecycle.completed_at = Some(Utc::now());
            (
                lifecycle.task.take(),
                lifecycle.task_id,
                self.channel_of(&lifecycle),
                lifecycle.persistence.clone(),
                lifecycle.parked.take(),
            )
        };

        if let Some(task) = task {
            task.cancel();
        }
        let plug = self.plug();
        if let Some(outcome) = parked {
            plug.runtime.spawn(discard_outcome(outcome));
        }
        if let Some(task_id) = task_id {
            plug.registry().unregister(task_id);
        }
        channel.connection_stopped(self);
        channel.dequeue(self);
        self.inner.completion.abandon();

        tracing::debug!(connection_id = %self.id(), "Connection canceled");
        plug.emit(Event::Canceled { id: self.id() });
        if let Some(info) = persistence {
            plug.persistence_finished(self, info);
        }
        true
    }
}
