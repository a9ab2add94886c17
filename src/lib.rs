//! SeeTap: a task-execution engine for model-driven UI automation.
//!
//! The engine repeatedly captures the device's visual and structural state,
//! asks a vision-language model what to do next in natural language, and
//! executes the interpreted commands, with retry and failover across model
//! endpoints and safe pausing for human confirmation on risky steps.
//!
//! The host supplies two seams: a [`executor::Driver`] that performs taps,
//! swipes, text entry and captures on a real device, and (optionally) a
//! [`client::transport::Transport`] replacing the default HTTP one. Progress
//! is observable through the executor's log and status streams.

pub mod client;
pub mod config;
pub mod errors;
pub mod executor;
pub mod model;
pub mod parser;
pub mod perception;

pub use client::transport::{HttpTransport, Transport};
pub use client::ResilientClient;
pub use config::{AppConfig, EndpointConfig, ExecutorConfig, ProviderKind, RetryConfig};
pub use errors::{SeeTapError, SeeTapResult};
pub use executor::{Driver, DriverOutcome, ExecutionStatus, LogEntry, LogLevel, StatusUpdate, TaskExecutor};
pub use model::{AIResponse, Action, ScreenSize, TaskResult};
pub use perception::{Bounds, RawNode, UIElement};
