#![forbid(unsafe_code)]

// Session lifecycle - one virtual user's connection, timers and shutdown

pub mod control;
pub mod transport;

pub use control::{HttpTestControl, TestControl, TestStatus};
pub use transport::{Transport, WsTransport};

use std::fmt;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio::time::{interval, interval_at, sleep, Instant, MissedTickBehavior};

use crate::config::SessionTiming;
use crate::engine::Engine;
use crate::error::{BookkeepingError, TransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Running,
    Ended,
}

/// Why a session stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The remote test was deleted
    Deleted,
    /// The remote test ended while running
    Ended,
    /// The hard ceiling elapsed
    Timeout,
    /// The server closed the connection
    TransportClosed,
    TransportError,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::Deleted => "deleted",
            StopReason::Ended => "ended",
            StopReason::Timeout => "timeout",
            StopReason::TransportClosed => "transport_closed",
            StopReason::TransportError => "transport_error",
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    None,
    Started,
    Stop(StopReason),
}

/// Idle -> Running -> Ended, driven by polled test status.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    state: SessionState,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self {
            state: SessionState::Idle,
        }
    }
}

impl Lifecycle {
    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == SessionState::Running
    }

    /// Deletion stops the session from any live state and wins over a start
    /// reported in the same poll. An end only counts once running.
    pub fn observe(&mut self, status: TestStatus) -> Transition {
        match self.state {
            SessionState::Ended => Transition::None,
            _ if status.deleted => Transition::Stop(StopReason::Deleted),
            SessionState::Idle if status.started => {
                self.state = SessionState::Running;
                Transition::Started
            }
            SessionState::Running if status.ended => Transition::Stop(StopReason::Ended),
            _ => Transition::None,
        }
    }

    /// Enters the terminal state. Returns `false` if already there.
    pub fn finish(&mut self) -> bool {
        if self.state == SessionState::Ended {
            return false;
        }
        self.state = SessionState::Ended;
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    pub reason: StopReason,
    pub became_ready: bool,
    pub log_entries: usize,
}

/// Drives one virtual user until remote termination, the hard ceiling or a
/// transport failure, then stops gracefully.
///
/// Message arrivals, timer ticks and status-poll results are merged in a
/// single `select!` loop, so the engine is never touched concurrently.
pub async fn run_session<T: Transport>(
    timing: &SessionTiming,
    control: Arc<dyn TestControl>,
    mut transport: T,
    mut engine: Engine,
) -> SessionOutcome {
    let client_id = engine.client_id().to_string();
    let metrics = engine.metrics().clone();
    let mut lifecycle = Lifecycle::default();

    let start = Instant::now();
    let mut poll_timer = interval(timing.status_poll);
    poll_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut action_timer = interval_at(start + timing.action, timing.action);
    action_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut liveness_timer = interval_at(start + timing.liveness, timing.liveness);
    let mut new_file_timer = interval_at(start + timing.new_file, timing.new_file);
    let deadline = sleep(timing.max_duration);
    tokio::pin!(deadline);

    // At most one status poll in flight; its result re-enters the loop
    let mut polls: JoinSet<Result<TestStatus, BookkeepingError>> = JoinSet::new();

    engine.on_open();

    let reason = loop {
        if let Err(e) = flush(&mut engine, &mut transport).await {
            tracing::error!("{}: send failed: {}", client_id, e);
            metrics.record_transport_error(e.to_string());
            break StopReason::TransportError;
        }

        tokio::select! {
            incoming = transport.recv() => match incoming {
                Some(Ok(text)) => engine.handle_text(&text),
                Some(Err(e)) => {
                    tracing::error!("{}: unexpected transport error: {}", client_id, e);
                    metrics.record_transport_error(e.to_string());
                    break StopReason::TransportError;
                }
                None => {
                    tracing::warn!("{}: connection closed by server", client_id);
                    break StopReason::TransportClosed;
                }
            },

            _ = poll_timer.tick(), if polls.is_empty() => {
                let control = Arc::clone(&control);
                polls.spawn(async move { control.poll_status().await });
            }

            Some(joined) = polls.join_next() => match joined {
                Ok(Ok(status)) => match lifecycle.observe(status) {
                    Transition::Started => tracing::info!("{}: test started", client_id),
                    Transition::Stop(reason) => break reason,
                    Transition::None => {}
                },
                Ok(Err(e)) => {
                    tracing::warn!("{}: status poll failed: {}", client_id, e);
                    metrics.record_bookkeeping_failure(e.to_string());
                }
                Err(e) => tracing::warn!("{}: status poll task failed: {}", client_id, e),
            },

            _ = action_timer.tick() => {
                if lifecycle.is_running() {
                    engine.tick_action();
                }
            }

            _ = liveness_timer.tick() => engine.housekeeping(),

            _ = new_file_timer.tick() => {
                if lifecycle.is_running() {
                    engine.spawn_file();
                }
            }

            _ = &mut deadline => break StopReason::Timeout,
        }
    };

    polls.abort_all();
    lifecycle.finish();
    graceful_stop(reason, control.as_ref(), transport, engine).await
}

/// Uploads the log, sends the disconnect frame and closes the transport.
async fn graceful_stop<T: Transport>(
    reason: StopReason,
    control: &dyn TestControl,
    mut transport: T,
    mut engine: Engine,
) -> SessionOutcome {
    let client_id = engine.client_id().to_string();
    let metrics = engine.metrics().clone();
    tracing::info!("{}: stopping ({})", client_id, reason);
    metrics.set_stop_reason(reason.as_str());

    let log = engine.take_log();
    let log_entries = log.len();
    if let Err(e) = control.end_test(log).await {
        tracing::warn!("{}: end-of-test upload failed: {}", client_id, e);
        metrics.record_bookkeeping_failure(e.to_string());
    }

    if !matches!(reason, StopReason::TransportClosed | StopReason::TransportError) {
        engine.disconnect();
        if let Err(e) = flush(&mut engine, &mut transport).await {
            tracing::debug!("{}: disconnect not delivered: {}", client_id, e);
        }
    }
    if let Err(e) = transport.close().await {
        tracing::debug!("{}: close failed: {}", client_id, e);
    }

    SessionOutcome {
        reason,
        became_ready: engine.is_ready(),
        log_entries,
    }
}

async fn flush<T: Transport>(engine: &mut Engine, transport: &mut T) -> Result<(), TransportError> {
    for frame in engine.drain_outbox() {
        transport.send(frame).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(started: bool, ended: bool, deleted: bool) -> TestStatus {
        TestStatus { started, ended, deleted }
    }

    #[test]
    fn test_idle_to_running_once() {
        let mut lifecycle = Lifecycle::default();
        assert_eq!(lifecycle.observe(status(false, false, false)), Transition::None);
        assert_eq!(lifecycle.observe(status(true, false, false)), Transition::Started);
        assert!(lifecycle.is_running());
        assert_eq!(lifecycle.observe(status(true, false, false)), Transition::None);
    }

    #[test]
    fn test_end_ignored_while_idle() {
        let mut lifecycle = Lifecycle::default();
        assert_eq!(lifecycle.observe(status(false, true, false)), Transition::None);
        assert_eq!(lifecycle.state(), SessionState::Idle);
    }

    #[test]
    fn test_end_while_running_stops() {
        let mut lifecycle = Lifecycle::default();
        lifecycle.observe(status(true, false, false));
        assert_eq!(
            lifecycle.observe(status(true, true, false)),
            Transition::Stop(StopReason::Ended)
        );
    }

    #[test]
    fn test_deleted_wins_over_started() {
        let mut lifecycle = Lifecycle::default();
        assert_eq!(
            lifecycle.observe(status(true, false, true)),
            Transition::Stop(StopReason::Deleted)
        );
        assert_eq!(lifecycle.state(), SessionState::Idle);
    }

    #[test]
    fn test_finish_is_terminal() {
        let mut lifecycle = Lifecycle::default();
        assert!(lifecycle.finish());
        assert!(!lifecycle.finish());
        assert_eq!(lifecycle.observe(status(true, true, true)), Transition::None);
        assert_eq!(lifecycle.state(), SessionState::Ended);
    }
}
