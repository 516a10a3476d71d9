//! Logging Observer for recursive runs
//!
//! Events are logged at:
//! - INFO: RunCompleted, ErrorsInjected
//! - WARN: ContractViolation, OracleFailed
//! - DEBUG: RunStarted, RoundDispatched

use crate::events::{AmplifyEvent, EventBus};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Observer that logs run events using tracing
pub struct LoggingObserver {
    receiver: broadcast::Receiver<AmplifyEvent>,
}

impl LoggingObserver {
    /// Create a new logging observer subscribed to the event bus
    pub fn new(bus: &EventBus) -> Self {
        Self {
            receiver: bus.subscribe(),
        }
    }

    /// Run the observer, logging events until the channel closes
    ///
    /// ```rust,ignore
    /// tokio::spawn(observer.run());
    /// ```
    pub async fn run(mut self) {
        loop {
            match self.receiver.recv().await {
                Ok(event) => Self::log_event(&event),
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("EventBus closed, logging observer stopping");
                    break;
                }
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    warn!(skipped = count, "Logging observer lagged");
                }
            }
        }
    }

    /// Log events already queued, without waiting for more
    pub fn drain(&mut self) -> usize {
        let mut logged = 0;
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    Self::log_event(&event);
                    logged += 1;
                }
                Err(broadcast::error::TryRecvError::Lagged(count)) => {
                    warn!(skipped = count, "Logging observer lagged");
                }
                Err(_) => break,
            }
        }
        logged
    }

    /// Log a single event at the appropriate level
    pub fn log_event(event: &AmplifyEvent) {
        match event {
            AmplifyEvent::RunStarted {
                task, batch_size, ..
            } => {
                debug!(task = %task, batch = batch_size, "Run started");
            }

            AmplifyEvent::RoundDispatched {
                task, round, rows, ..
            } => {
                debug!(task = %task, round = round, rows = rows, "Round dispatched");
            }

            AmplifyEvent::RunCompleted {
                task,
                batch_size,
                rounds,
                oracle_rows,
                idk_answers,
                elapsed_ms,
                ..
            } => {
                info!(
                    task = %task,
                    batch = batch_size,
                    rounds = rounds,
                    oracle_rows = oracle_rows,
                    idk_answers = idk_answers,
                    elapsed_ms = elapsed_ms,
                    "Run completed"
                );
            }

            AmplifyEvent::ContractViolation {
                task,
                element,
                round,
                kind,
                detail,
                ..
            } => {
                warn!(
                    task = %task,
                    element = ?element,
                    round = round,
                    kind = %kind,
                    detail = %detail,
                    "Contract violation"
                );
            }

            AmplifyEvent::OracleFailed {
                task, round, error, ..
            } => {
                warn!(task = %task, round = round, error = %error, "Oracle failed");
            }

            AmplifyEvent::ErrorsInjected {
                task,
                rows,
                injected,
                probability,
                ..
            } => {
                info!(
                    task = %task,
                    rows = rows,
                    injected = injected,
                    probability = %probability,
                    "Errors injected"
                );
            }
        }
    }
}
