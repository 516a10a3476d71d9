//! Event-Driven Observability for Recursive Runs
//!
//! Structured events for monitoring amplification, including:
//! - Run start and completion with round and oracle-row counts
//! - Every dispatched oracle round
//! - Contract violations and failed oracle calls
//! - Error injection batches
//!
//! # Architecture
//!
//! Runners emit through an optional callback; wiring that callback to an
//! `EventBus` fans events out to any number of observers:
//!
//! ```text
//! RecursiveRunner → EventBus → [LoggingObserver, MetricsObserver, ...]
//! ```

pub mod bus;
pub mod observers;

use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// All events emitted while answering questions by decomposition
///
/// Events are tagged with their type for JSON serialization and carry a
/// timestamp.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum AmplifyEvent {
    /// A recursive run began
    RunStarted {
        /// Task name
        task: String,
        /// Number of top-level questions
        batch_size: usize,
        #[serde(with = "system_time_serde")]
        timestamp: SystemTime,
    },

    /// Pending sub-questions were handed to the oracle
    RoundDispatched {
        /// Task name
        task: String,
        /// Round number, starting at 1
        round: usize,
        /// Sub-questions in this round
        rows: usize,
        #[serde(with = "system_time_serde")]
        timestamp: SystemTime,
    },

    /// A recursive run finished (possibly with violations)
    RunCompleted {
        /// Task name
        task: String,
        /// Number of top-level questions
        batch_size: usize,
        /// Rounds dispatched
        rounds: usize,
        /// Sub-questions sent to the oracle over all rounds
        oracle_rows: usize,
        /// Final answers that are entirely `IDK`
        idk_answers: usize,
        /// Wall-clock duration in milliseconds
        elapsed_ms: u64,
        #[serde(with = "system_time_serde")]
        timestamp: SystemTime,
    },

    /// A procedure or the oracle broke the decomposition protocol
    ContractViolation {
        /// Task name
        task: String,
        /// Affected element, if a single one
        #[serde(skip_serializing_if = "Option::is_none")]
        element: Option<usize>,
        /// Round in which it was observed
        round: usize,
        /// Violation kind (e.g., "BudgetExceeded", "OracleShape")
        kind: String,
        /// Human-readable detail
        detail: String,
        #[serde(with = "system_time_serde")]
        timestamp: SystemTime,
    },

    /// An oracle call failed and its round was answered with `IDK`
    OracleFailed {
        /// Task name
        task: String,
        /// Round number
        round: usize,
        /// Error message
        error: String,
        #[serde(with = "system_time_serde")]
        timestamp: SystemTime,
    },

    /// Answers were corrupted on purpose
    ErrorsInjected {
        /// Task name
        task: String,
        /// Answers considered
        rows: usize,
        /// Answers replaced
        injected: usize,
        /// Per-answer replacement probability
        probability: f64,
        #[serde(with = "system_time_serde")]
        timestamp: SystemTime,
    },
}

impl AmplifyEvent {
    /// Create a RunStarted event
    pub fn run_started(task: &str, batch_size: usize) -> Self {
        Self::RunStarted {
            task: task.to_string(),
            batch_size,
            timestamp: SystemTime::now(),
        }
    }

    /// Create a RoundDispatched event
    pub fn round_dispatched(task: &str, round: usize, rows: usize) -> Self {
        Self::RoundDispatched {
            task: task.to_string(),
            round,
            rows,
            timestamp: SystemTime::now(),
        }
    }

    /// Create a RunCompleted event
    pub fn run_completed(
        task: &str,
        batch_size: usize,
        rounds: usize,
        oracle_rows: usize,
        idk_answers: usize,
        elapsed_ms: u64,
    ) -> Self {
        Self::RunCompleted {
            task: task.to_string(),
            batch_size,
            rounds,
            oracle_rows,
            idk_answers,
            elapsed_ms,
            timestamp: SystemTime::now(),
        }
    }

    /// Create a ContractViolation event
    pub fn contract_violation(
        task: &str,
        element: Option<usize>,
        round: usize,
        kind: &str,
        detail: &str,
    ) -> Self {
        Self::ContractViolation {
            task: task.to_string(),
            element,
            round,
            kind: kind.to_string(),
            detail: detail.to_string(),
            timestamp: SystemTime::now(),
        }
    }

    /// Create an OracleFailed event
    pub fn oracle_failed(task: &str, round: usize, error: &str) -> Self {
        Self::OracleFailed {
            task: task.to_string(),
            round,
            error: error.to_string(),
            timestamp: SystemTime::now(),
        }
    }

    /// Create an ErrorsInjected event
    pub fn errors_injected(task: &str, rows: usize, injected: usize, probability: f64) -> Self {
        Self::ErrorsInjected {
            task: task.to_string(),
            rows,
            injected,
            probability,
            timestamp: SystemTime::now(),
        }
    }

    /// Get the event type name
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::RunStarted { .. } => "RunStarted",
            Self::RoundDispatched { .. } => "RoundDispatched",
            Self::RunCompleted { .. } => "RunCompleted",
            Self::ContractViolation { .. } => "ContractViolation",
            Self::OracleFailed { .. } => "OracleFailed",
            Self::ErrorsInjected { .. } => "ErrorsInjected",
        }
    }

    /// Task the event belongs to
    pub fn task(&self) -> &str {
        match self {
            Self::RunStarted { task, .. }
            | Self::RoundDispatched { task, .. }
            | Self::RunCompleted { task, .. }
            | Self::ContractViolation { task, .. }
            | Self::OracleFailed { task, .. }
            | Self::ErrorsInjected { task, .. } => task,
        }
    }

    /// Get the timestamp of the event
    pub fn timestamp(&self) -> SystemTime {
        match self {
            Self::RunStarted { timestamp, .. }
            | Self::RoundDispatched { timestamp, .. }
            | Self::RunCompleted { timestamp, .. }
            | Self::ContractViolation { timestamp, .. }
            | Self::OracleFailed { timestamp, .. }
            | Self::ErrorsInjected { timestamp, .. } => *timestamp,
        }
    }
}

/// Milliseconds since the Unix epoch
mod system_time_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    pub fn serialize<S>(time: &SystemTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = time
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SystemTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(UNIX_EPOCH + Duration::from_millis(millis))
    }
}

pub use bus::EventBus;

#[cfg(test)]
mod tests {
    use super::*;

    // ==========================================
    // Event Creation Tests
    // ==========================================

    #[test]
    fn test_run_completed_creation() {
        let event = AmplifyEvent::run_completed("iterate", 16, 3, 40, 2, 5);

        match event {
            AmplifyEvent::RunCompleted {
                task,
                batch_size,
                rounds,
                oracle_rows,
                idk_answers,
                ..
            } => {
                assert_eq!(task, "iterate");
                assert_eq!(batch_size, 16);
                assert_eq!(rounds, 3);
                assert_eq!(oracle_rows, 40);
                assert_eq!(idk_answers, 2);
            }
            _ => panic!("Wrong event type"),
        }
    }

    #[test]
    fn test_event_type_and_task() {
        let event = AmplifyEvent::oracle_failed("sat", 2, "timeout");
        assert_eq!(event.event_type(), "OracleFailed");
        assert_eq!(event.task(), "sat");
        assert_eq!(
            AmplifyEvent::round_dispatched("sat", 1, 4).event_type(),
            "RoundDispatched"
        );
    }

    #[test]
    fn test_event_has_timestamp() {
        let before = SystemTime::now();
        let event = AmplifyEvent::run_started("iterate", 1);
        let after = SystemTime::now();

        let ts = event.timestamp();
        assert!(ts >= before);
        assert!(ts <= after);
    }

    // ==========================================
    // Serialization Tests
    // ==========================================

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = AmplifyEvent::round_dispatched("iterate", 2, 7);
        let json = serde_json::to_string(&event).unwrap();

        assert!(json.contains(r#""type":"RoundDispatched""#));
        assert!(json.contains(r#""round":2"#));
        assert!(json.contains(r#""rows":7"#));
    }

    #[test]
    fn test_batch_wide_violation_skips_element() {
        let event = AmplifyEvent::contract_violation("sat", None, 1, "OracleShape", "bad shape");
        let json = serde_json::to_string(&event).unwrap();
        assert!(!json.contains("element"));

        let event = AmplifyEvent::contract_violation("sat", Some(4), 1, "BudgetExceeded", "x");
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""element":4"#));
    }

    #[test]
    fn test_event_deserializes_from_json() {
        let json = r#"{
            "type": "ErrorsInjected",
            "task": "iterate",
            "rows": 100,
            "injected": 31,
            "probability": 0.3,
            "timestamp": 1704067200000
        }"#;

        match serde_json::from_str::<AmplifyEvent>(json).unwrap() {
            AmplifyEvent::ErrorsInjected {
                rows, injected, ..
            } => {
                assert_eq!(rows, 100);
                assert_eq!(injected, 31);
            }
            _ => panic!("Wrong event type"),
        }
    }

    #[test]
    fn test_all_events_roundtrip() {
        let events = vec![
            AmplifyEvent::run_started("t", 1),
            AmplifyEvent::round_dispatched("t", 1, 1),
            AmplifyEvent::run_completed("t", 1, 1, 1, 0, 0),
            AmplifyEvent::contract_violation("t", Some(0), 1, "RoundLimit", "pending"),
            AmplifyEvent::oracle_failed("t", 1, "down"),
            AmplifyEvent::errors_injected("t", 10, 3, 0.3),
        ];

        for event in events {
            let json = serde_json::to_string(&event).unwrap();
            let parsed: AmplifyEvent = serde_json::from_str(&json).unwrap();
            assert_eq!(event.event_type(), parsed.event_type());
        }
    }
}
