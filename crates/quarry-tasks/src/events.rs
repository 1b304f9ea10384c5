//! A FIFO event bus per task run: status transitions, progress updates, and
//! handler log lines, all multiplexed onto one ordered stream so a
//! `Tracker` can observe a task's whole lifecycle without polling three
//! separate channels.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::model::TaskStatus;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskEvent {
    Status {
        task_id: Uuid,
        status: TaskStatus,
        at: DateTime<Utc>,
    },
    Progress {
        task_id: Uuid,
        percent: Option<u8>,
        message: Option<String>,
        at: DateTime<Utc>,
    },
    Log {
        task_id: Uuid,
        level: LogLevel,
        message: String,
        at: DateTime<Utc>,
    },
    Result {
        task_id: Uuid,
        output: Value,
        at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// A bounded FIFO channel of events for one task run. Bounded so a stalled
/// consumer applies backpressure to the handler rather than letting an
/// unbounded backlog grow without limit.
#[derive(Clone)]
pub struct EventBus {
    sender: mpsc::Sender<TaskEvent>,
}

pub struct EventReceiver {
    receiver: mpsc::Receiver<TaskEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> (Self, EventReceiver) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self { sender }, EventReceiver { receiver })
    }

    pub async fn emit(&self, event: TaskEvent) {
        if self.sender.send(event).await.is_err() {
            tracing::debug!("event bus receiver dropped, discarding event");
        }
    }
}

impl EventReceiver {
    pub async fn recv(&mut self) -> Option<TaskEvent> {
        self.receiver.recv().await
    }

    /// Drain whatever is already buffered without waiting for more.
    pub fn drain(&mut self) -> Vec<TaskEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.receiver.try_recv() {
            events.push(event);
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_are_delivered_in_order() {
        let (bus, mut rx) = EventBus::new(8);
        let task_id = Uuid::new_v4();
        bus.emit(TaskEvent::Status {
            task_id,
            status: TaskStatus::Running,
            at: Utc::now(),
        })
        .await;
        bus.emit(TaskEvent::Progress {
            task_id,
            percent: Some(50),
            message: None,
            at: Utc::now(),
        })
        .await;

        let first = rx.recv().await.unwrap();
        assert!(matches!(first, TaskEvent::Status { .. }));
        let second = rx.recv().await.unwrap();
        assert!(matches!(second, TaskEvent::Progress { .. }));
    }
}
