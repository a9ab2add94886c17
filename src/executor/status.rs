use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};

/// Coarse lifecycle of one executor instance. Pause is an orthogonal flag on
/// top of `Running`, not a status value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionStatus {
    Idle,
    Running,
    Completed,
    Cancelled,
    Error { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Action,
    Warning,
    Error,
}

/// One line of the user-visible task log. Append-only; length is bounded by
/// subscribers (broadcast backpressure drops the oldest entries for slow
/// readers), never by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

/// Coarse progress line for a live display: what the task is doing plus the
/// action currently in flight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub status: String,
    pub detail: String,
}

const CHANNEL_CAPACITY: usize = 256;

/// Fan-out hub for the executor's observable streams. Subscribers never
/// coordinate with each other or with the loop.
pub(crate) struct EventHub {
    logs_tx: broadcast::Sender<LogEntry>,
    updates_tx: broadcast::Sender<StatusUpdate>,
    status_tx: watch::Sender<ExecutionStatus>,
    /// Held so the watch channel never loses all receivers; without a live
    /// receiver `status_tx.send` is a no-op and status updates are dropped.
    _status_rx: watch::Receiver<ExecutionStatus>,
}

impl EventHub {
    pub fn new() -> Self {
        let (logs_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (updates_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (status_tx, _status_rx) = watch::channel(ExecutionStatus::Idle);
        Self { logs_tx, updates_tx, status_tx, _status_rx }
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            LogLevel::Warning => tracing::warn!("{message}"),
            LogLevel::Error => tracing::error!("{message}"),
            _ => tracing::info!("{message}"),
        }
        let _ = self.logs_tx.send(LogEntry { timestamp: Utc::now(), level, message });
    }

    pub fn update(&self, status: impl Into<String>, detail: impl Into<String>) {
        let _ = self
            .updates_tx
            .send(StatusUpdate { status: status.into(), detail: detail.into() });
    }

    pub fn set_status(&self, status: ExecutionStatus) {
        let _ = self.status_tx.send(status);
    }

    pub fn status(&self) -> ExecutionStatus {
        self.status_tx.borrow().clone()
    }

    pub fn subscribe_logs(&self) -> broadcast::Receiver<LogEntry> {
        self.logs_tx.subscribe()
    }

    pub fn subscribe_updates(&self) -> broadcast::Receiver<StatusUpdate> {
        self.updates_tx.subscribe()
    }

    pub fn watch_status(&self) -> watch::Receiver<ExecutionStatus> {
        self.status_tx.subscribe()
    }
}
