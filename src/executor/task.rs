//! Step-loop state machine: capture -> mark -> analyze -> execute, repeated
//! until the model finishes the task, the step budget runs out, the user
//! stops the run, or the provider accounts are dead.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{broadcast, watch};

use crate::client::{is_fatal_error, ResilientClient};
use crate::config::ExecutorConfig;
use crate::errors::{SeeTapError, SeeTapResult};
use crate::executor::driver::Driver;
use crate::executor::status::{EventHub, ExecutionStatus, LogEntry, LogLevel, StatusUpdate};
use crate::model::action::{Action, TaskResult};
use crate::model::coords::ScreenSize;
use crate::parser::fallback::DEFAULT_DONE_MESSAGE;
use crate::perception::marker::{draw_marks, find_by_mark, mark_elements};
use crate::perception::types::UIElement;

/// Rolling action-history entries kept as context for analysis calls.
const HISTORY_LIMIT: usize = 50;
/// Consecutive fatal analysis failures that abort the task.
const MAX_FATAL_STREAK: u32 = 3;
/// Settle time after the initial Home press.
const HOME_SETTLE_MS: u64 = 1000;

pub struct TaskExecutor {
    driver: Arc<dyn Driver>,
    client: ResilientClient,
    config: ExecutorConfig,
    hub: EventHub,
    paused: AtomicBool,
    cancelled: AtomicBool,
    history: Mutex<Vec<String>>,
}

impl TaskExecutor {
    pub fn new(driver: Arc<dyn Driver>, client: ResilientClient, config: ExecutorConfig) -> Self {
        Self {
            driver,
            client,
            config,
            hub: EventHub::new(),
            paused: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            history: Mutex::new(Vec::new()),
        }
    }

    // ── Observability ────────────────────────────────────────────────────

    pub fn logs(&self) -> broadcast::Receiver<LogEntry> {
        self.hub.subscribe_logs()
    }

    pub fn status_updates(&self) -> broadcast::Receiver<StatusUpdate> {
        self.hub.subscribe_updates()
    }

    pub fn status(&self) -> watch::Receiver<ExecutionStatus> {
        self.hub.watch_status()
    }

    pub fn current_status(&self) -> ExecutionStatus {
        self.hub.status()
    }

    // ── Control surface ──────────────────────────────────────────────────

    /// No-op unless a task is running and not already paused.
    pub fn pause(&self) {
        if self.is_running() && !self.is_paused() {
            self.paused.store(true, Ordering::SeqCst);
            self.hub.log(LogLevel::Info, "task paused");
            self.hub.update("paused", "resume to continue");
        }
    }

    /// No-op unless a task is running and paused.
    pub fn resume(&self) {
        if self.is_running() && self.is_paused() {
            self.paused.store(false, Ordering::SeqCst);
            self.hub.log(LogLevel::Info, "task resumed");
            self.hub.update("resuming", "");
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Cooperative cancellation: observed at the top of the loop, at
    /// pause-wait points and between queued actions. An in-flight network or
    /// device call may complete before it is honored.
    pub fn stop(&self) {
        if self.is_running() {
            self.cancelled.store(true, Ordering::SeqCst);
            self.hub.set_status(ExecutionStatus::Cancelled);
            self.hub.log(LogLevel::Info, "task stopped by user");
            self.hub.update("cancelled", "");
        }
    }

    fn is_running(&self) -> bool {
        matches!(self.hub.status(), ExecutionStatus::Running)
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    // ── Task entry point ─────────────────────────────────────────────────

    pub async fn execute_task(&self, task: &str) -> TaskResult {
        if self.is_running() {
            self.hub.log(LogLevel::Warning, "rejecting task: one is already running");
            return TaskResult::Failed { error: "task already running".into() };
        }

        self.cancelled.store(false, Ordering::SeqCst);
        self.paused.store(false, Ordering::SeqCst);
        self.history.lock().unwrap().clear();
        self.hub.set_status(ExecutionStatus::Running);
        self.hub.log(LogLevel::Info, "===== task started =====");
        self.hub.log(LogLevel::Info, format!("Task: {task}"));

        match self.run_loop(task).await {
            Ok(message) => {
                if self.is_cancelled() {
                    self.hub.set_status(ExecutionStatus::Cancelled);
                    self.hub.log(LogLevel::Info, "task cancelled");
                    TaskResult::Cancelled
                } else {
                    self.hub.set_status(ExecutionStatus::Completed);
                    self.hub.log(LogLevel::Info, "===== task finished =====");
                    TaskResult::Success { message }
                }
            }
            Err(SeeTapError::Cancelled) => {
                self.hub.set_status(ExecutionStatus::Cancelled);
                self.hub.log(LogLevel::Info, "task cancelled");
                TaskResult::Cancelled
            }
            Err(e) => {
                let error = e.to_string();
                self.hub.set_status(ExecutionStatus::Error { message: error.clone() });
                self.hub.log(LogLevel::Error, "===== task failed =====");
                self.hub.log(LogLevel::Error, format!("error: {error}"));
                TaskResult::Failed { error }
            }
        }
    }

    async fn run_loop(&self, task: &str) -> SeeTapResult<String> {
        let mut step = 0u32;
        let mut fatal_streak = 0u32;

        // Leave the host app's own UI before the first capture.
        self.hub.log(LogLevel::Info, "returning to the home screen");
        if let Err(msg) = self.driver.press_home().await {
            self.hub.log(LogLevel::Warning, format!("home press failed: {msg}"));
        }
        tokio::time::sleep(Duration::from_millis(HOME_SETTLE_MS)).await;

        while step < self.config.max_steps && self.is_running() {
            self.wait_while_paused().await?;
            if !self.is_running() {
                break;
            }

            step += 1;
            self.hub.log(
                LogLevel::Info,
                format!("--- step {step}/{} ---", self.config.max_steps),
            );

            // 1. Capture.
            self.hub.update(format!("step {step}: capturing"), "");
            let png = self.driver.capture_screen().await?;
            let screen = screen_size_of(&png)?;
            self.hub.log(
                LogLevel::Info,
                format!("screenshot captured: {}x{}", screen.width, screen.height),
            );

            // 2. Mark. A missing or empty UI dump is not an error; the model
            // falls back to coordinates.
            let nodes = match self.driver.capture_ui_tree().await {
                Ok(nodes) => nodes,
                Err(e) => {
                    self.hub.log(LogLevel::Warning, format!("UI dump failed: {e}"));
                    Vec::new()
                }
            };
            let elements = mark_elements(&nodes);
            let image = if elements.is_empty() {
                png
            } else {
                self.hub.log(LogLevel::Info, format!("{} elements marked", elements.len()));
                match draw_marks(&png, &elements) {
                    Ok(annotated) => annotated,
                    Err(e) => {
                        self.hub.log(LogLevel::Warning, format!("annotation failed: {e}"));
                        png
                    }
                }
            };

            // 3. Analyze.
            self.hub.update(format!("step {step}: analyzing"), "");
            let history_snapshot = self.history.lock().unwrap().clone();
            let response = match self.client.analyze(&image, task, &history_snapshot, &screen).await
            {
                Ok(response) => {
                    fatal_streak = 0;
                    response
                }
                Err(e) => {
                    self.hub
                        .log(LogLevel::Warning, format!("analysis failed: {}", excerpt(&e, 100)));

                    // Nothing was even attempted: no endpoints to call.
                    if matches!(e, SeeTapError::Config(_)) {
                        return Err(e);
                    }
                    if is_fatal_error(&e) {
                        fatal_streak += 1;
                        self.hub.log(
                            LogLevel::Error,
                            format!("fatal provider error ({fatal_streak}/{MAX_FATAL_STREAK})"),
                        );
                        if fatal_streak >= MAX_FATAL_STREAK {
                            self.hub.log(
                                LogLevel::Error,
                                "three consecutive fatal errors, aborting task",
                            );
                            self.hub.update("task aborted", "provider account problem");
                            return Err(e);
                        }
                    }

                    self.hub.update(format!("step {step}: retrying"), "last analysis failed");
                    self.push_history(format!("[last attempt failed] {}", excerpt(&e, 50)));
                    tokio::time::sleep(Duration::from_millis(self.config.step_delay_ms)).await;
                    continue;
                }
            };

            // The user may have stopped the task during the network call.
            if self.is_cancelled() {
                return Err(SeeTapError::Cancelled);
            }

            let all = response.all_actions();
            self.hub.log(LogLevel::Action, format!("model returned {} action(s)", all.len()));
            let status_msg = if response.status_text.is_empty() {
                "working...".to_string()
            } else {
                response.status_text.clone()
            };
            if let Some(thinking) = &response.thinking_text {
                self.hub.log(LogLevel::Info, format!("model reasoning: {thinking}"));
                self.hub.update(status_msg.as_str(), preview(thinking, 30));
            }

            // 4. Done / AskUser suppress everything else in the same reply.
            match all.iter().find(|a| a.is_terminal_or_pausing()) {
                Some(Action::Done { message }) => {
                    self.hub.log(LogLevel::Info, "model declared the task complete");
                    self.hub.update("task complete", message.clone());
                    let message = if message.is_empty() {
                        DEFAULT_DONE_MESSAGE.to_string()
                    } else {
                        message.clone()
                    };
                    return Ok(message);
                }
                Some(Action::AskUser { reason, suggestion }) => {
                    self.hub.log(LogLevel::Warning, "model asked for user intervention");
                    self.hub.log(LogLevel::Info, format!("reason: {reason}"));
                    if !suggestion.is_empty() {
                        self.hub.log(LogLevel::Info, format!("suggestion: {suggestion}"));
                    }
                    self.paused.store(true, Ordering::SeqCst);
                    self.hub.update("waiting for user", reason.clone());
                    self.push_history(format!("[waiting for user] {reason}"));

                    self.wait_while_paused().await?;
                    // Resume with a fresh capture, never a replay.
                    self.hub.log(LogLevel::Info, "user resumed, continuing");
                    continue;
                }
                _ => {}
            }

            // 5. Execute the reply's actions in source order.
            for (index, action) in all.iter().enumerate() {
                if self.is_cancelled() || !self.is_running() {
                    return Err(SeeTapError::Cancelled);
                }
                // Unreachable when a terminal action was present, but a
                // malformed batch must never execute one.
                if action.is_terminal_or_pausing() {
                    continue;
                }

                self.hub.log(
                    LogLevel::Action,
                    format!("executing action {}/{}: {action}", index + 1, all.len()),
                );
                self.hub.update(status_msg.as_str(), action.to_string());

                match self.execute_action(action, &elements).await {
                    Ok(()) => {
                        self.push_history(action.to_string());
                    }
                    Err(msg) => {
                        self.hub.log(LogLevel::Warning, format!("action failed: {msg}"));
                        let tagged = if matches!(action, Action::Launch { .. }) {
                            format!("[launch failed] {msg}")
                        } else {
                            format!("[action failed] {msg}")
                        };
                        self.push_history(tagged);
                    }
                }

                if index + 1 < all.len() {
                    tokio::time::sleep(Duration::from_millis(self.config.inter_action_delay_ms))
                        .await;
                }
            }

            self.hub.update(status_msg.as_str(), "actions done");
            tokio::time::sleep(Duration::from_millis(self.config.step_delay_ms)).await;
        }

        if self.is_cancelled() || !self.is_running() {
            return Err(SeeTapError::Cancelled);
        }

        // Soft limit: running out of steps is not a failure.
        self.hub.log(
            LogLevel::Warning,
            format!("step budget of {} reached", self.config.max_steps),
        );
        Ok(format!("step budget of {} reached", self.config.max_steps))
    }

    /// Cooperative pause point. Returns `Cancelled` if the task is stopped
    /// while waiting.
    async fn wait_while_paused(&self) -> SeeTapResult<()> {
        while self.is_paused() && self.is_running() {
            tokio::time::sleep(Duration::from_millis(self.config.pause_poll_ms)).await;
        }
        if self.is_cancelled() || !self.is_running() {
            return Err(SeeTapError::Cancelled);
        }
        Ok(())
    }

    async fn execute_action(&self, action: &Action, elements: &[UIElement]) -> Result<(), String> {
        match action {
            Action::Tap { x, y } => self.driver.tap(*x, *y).await,
            Action::TapMark { mark_id } => match find_by_mark(elements, *mark_id) {
                Some(element) => {
                    let (x, y) = element.center();
                    self.hub.log(LogLevel::Info, format!("mark [{mark_id}] -> ({x}, {y})"));
                    self.driver.tap(x, y).await
                }
                None => Err(format!("no element with mark {mark_id} on this screen")),
            },
            Action::Swipe { x1, y1, x2, y2, duration_ms } => {
                self.driver.swipe(*x1, *y1, *x2, *y2, *duration_ms).await
            }
            Action::LongPress { x, y, duration_ms } => {
                self.driver.long_press(*x, *y, *duration_ms).await
            }
            Action::Input { text } => self.driver.type_text(text).await,
            Action::Enter => self.driver.press_enter().await,
            Action::Back => self.driver.press_back().await,
            Action::Home => self.driver.press_home().await,
            Action::Wait { ms } => {
                tokio::time::sleep(Duration::from_millis(*ms)).await;
                Ok(())
            }
            Action::Launch { app_name } => self.driver.launch_app(app_name).await,
            // Handled before the action loop.
            Action::Done { .. } | Action::AskUser { .. } => Ok(()),
        }
    }

    fn push_history(&self, line: String) {
        let mut history = self.history.lock().unwrap();
        history.push(line);
        let overflow = history.len().saturating_sub(HISTORY_LIMIT);
        if overflow > 0 {
            history.drain(..overflow);
        }
    }
}

/// Screen dimensions from the encoded image header; cheap enough to run per
/// capture, which also picks up device rotation.
fn screen_size_of(image_bytes: &[u8]) -> SeeTapResult<ScreenSize> {
    let (w, h) = image::ImageReader::new(std::io::Cursor::new(image_bytes))
        .with_guessed_format()?
        .into_dimensions()?;
    Ok(ScreenSize::new(w as i32, h as i32))
}

fn excerpt(err: &SeeTapError, limit: usize) -> String {
    err.to_string().chars().take(limit).collect()
}

fn preview(text: &str, limit: usize) -> String {
    if text.chars().count() > limit {
        let head: String = text.chars().take(limit).collect();
        format!("{head}...")
    } else {
        text.to_string()
    }
}
