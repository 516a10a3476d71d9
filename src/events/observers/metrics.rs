//! Metrics Observer for recursive runs
//!
//! Tracks Prometheus-compatible metrics:
//! - Counters: runs, rounds, oracle rows, idk answers, violations, injected errors
//! - Histogram: sub-questions per dispatched round

use crate::events::{AmplifyEvent, EventBus};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

/// Histogram bucket boundaries for sub-questions per round
pub const ROUND_SIZE_BUCKETS: [u64; 7] = [1, 4, 16, 64, 256, 1024, 4096];

/// Metrics collected from run events
#[derive(Debug, Clone, Default)]
pub struct Metrics {
    /// Completed runs, by task
    pub runs_total: HashMap<String, u64>,
    /// Top-level questions answered, by task
    pub questions_total: HashMap<String, u64>,
    /// Rounds dispatched, by task
    pub rounds_total: HashMap<String, u64>,
    /// Sub-questions sent to oracles
    pub oracle_rows_total: u64,
    /// Final answers that were entirely `IDK`
    pub idk_answers_total: u64,
    /// Contract violations, by kind
    pub violations_total: HashMap<String, u64>,
    /// Oracle calls that failed
    pub oracle_failures_total: u64,
    /// Answers corrupted by error injection
    pub errors_injected_total: u64,
    /// Answers considered by error injection
    pub injection_rows_total: u64,
    /// Round size histogram (bucket -> count)
    pub round_size_histogram: HashMap<u64, u64>,
    /// Total elapsed run time
    pub run_ms_total: u64,
}

impl Metrics {
    /// Create new empty metrics
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a dispatched round of `rows` sub-questions
    pub fn record_round(&mut self, task: &str, rows: usize) {
        *self.rounds_total.entry(task.to_string()).or_insert(0) += 1;
        let rows = rows as u64;
        let bucket = ROUND_SIZE_BUCKETS
            .iter()
            .copied()
            .find(|&b| rows <= b)
            .unwrap_or(ROUND_SIZE_BUCKETS[ROUND_SIZE_BUCKETS.len() - 1]);
        *self.round_size_histogram.entry(bucket).or_insert(0) += 1;
    }

    /// Record a finished run
    pub fn record_run(
        &mut self,
        task: &str,
        batch_size: usize,
        oracle_rows: usize,
        idk_answers: usize,
        elapsed_ms: u64,
    ) {
        *self.runs_total.entry(task.to_string()).or_insert(0) += 1;
        *self.questions_total.entry(task.to_string()).or_insert(0) += batch_size as u64;
        self.oracle_rows_total += oracle_rows as u64;
        self.idk_answers_total += idk_answers as u64;
        self.run_ms_total += elapsed_ms;
    }

    /// Record a contract violation
    pub fn record_violation(&mut self, kind: &str) {
        *self.violations_total.entry(kind.to_string()).or_insert(0) += 1;
    }

    /// Record an error injection batch
    pub fn record_injection(&mut self, rows: usize, injected: usize) {
        self.injection_rows_total += rows as u64;
        self.errors_injected_total += injected as u64;
    }

    /// Total rounds over every task
    pub fn total_rounds(&self) -> u64 {
        self.rounds_total.values().sum()
    }

    /// Fraction of top-level answers that were `IDK`
    pub fn idk_rate(&self) -> f64 {
        let questions: u64 = self.questions_total.values().sum();
        if questions == 0 {
            0.0
        } else {
            self.idk_answers_total as f64 / questions as f64
        }
    }

    /// Observed fraction of injected answers
    pub fn injection_rate(&self) -> f64 {
        if self.injection_rows_total == 0 {
            0.0
        } else {
            self.errors_injected_total as f64 / self.injection_rows_total as f64
        }
    }

    /// Format metrics as Prometheus text format
    pub fn to_prometheus(&self) -> String {
        let mut output = String::new();

        output.push_str("# HELP amplify_runs_total Completed recursive runs\n");
        output.push_str("# TYPE amplify_runs_total counter\n");
        for (task, count) in &self.runs_total {
            output.push_str(&format!("amplify_runs_total{{task=\"{}\"}} {}\n", task, count));
        }

        output.push_str("# HELP amplify_questions_total Top-level questions answered\n");
        output.push_str("# TYPE amplify_questions_total counter\n");
        for (task, count) in &self.questions_total {
            output.push_str(&format!(
                "amplify_questions_total{{task=\"{}\"}} {}\n",
                task, count
            ));
        }

        output.push_str("# HELP amplify_rounds_total Oracle rounds dispatched\n");
        output.push_str("# TYPE amplify_rounds_total counter\n");
        for (task, count) in &self.rounds_total {
            output.push_str(&format!(
                "amplify_rounds_total{{task=\"{}\"}} {}\n",
                task, count
            ));
        }

        output.push_str("# HELP amplify_violations_total Contract violations\n");
        output.push_str("# TYPE amplify_violations_total counter\n");
        for (kind, count) in &self.violations_total {
            output.push_str(&format!(
                "amplify_violations_total{{kind=\"{}\"}} {}\n",
                kind, count
            ));
        }

        output.push_str("# HELP amplify_round_size Sub-questions per round\n");
        output.push_str("# TYPE amplify_round_size histogram\n");
        let mut cumulative = 0u64;
        for &bucket in &ROUND_SIZE_BUCKETS {
            cumulative += self.round_size_histogram.get(&bucket).copied().unwrap_or(0);
            output.push_str(&format!(
                "amplify_round_size_bucket{{le=\"{}\"}} {}\n",
                bucket, cumulative
            ));
        }
        output.push_str(&format!(
            "amplify_round_size_bucket{{le=\"+Inf\"}} {}\n",
            self.total_rounds()
        ));
        output.push_str(&format!("amplify_round_size_sum {}\n", self.oracle_rows_total));
        output.push_str(&format!("amplify_round_size_count {}\n", self.total_rounds()));

        for (name, help, value) in [
            (
                "amplify_idk_answers_total",
                "Top-level answers that were idk",
                self.idk_answers_total,
            ),
            (
                "amplify_oracle_failures_total",
                "Oracle calls that failed",
                self.oracle_failures_total,
            ),
            (
                "amplify_errors_injected_total",
                "Answers replaced by error injection",
                self.errors_injected_total,
            ),
        ] {
            output.push_str(&format!("# HELP {} {}\n", name, help));
            output.push_str(&format!("# TYPE {} counter\n", name));
            output.push_str(&format!("{} {}\n", name, value));
        }

        output
    }

    /// Generate a human-readable report
    pub fn report(&self) -> String {
        let mut output = String::new();

        output.push_str("=== Amplify Metrics Report ===\n\n");

        output.push_str("Runs:\n");
        for (task, count) in &self.runs_total {
            let rounds = self.rounds_total.get(task).copied().unwrap_or(0);
            output.push_str(&format!("  {}: {} runs, {} rounds\n", task, count, rounds));
        }

        output.push_str("\nViolations:\n");
        for (kind, count) in &self.violations_total {
            output.push_str(&format!("  {}: {}\n", kind, count));
        }

        output.push_str(&format!(
            "\nOracle: rows={}, failures={}\n",
            self.oracle_rows_total, self.oracle_failures_total
        ));
        output.push_str(&format!(
            "Answers: idk={} ({:.1}%)\n",
            self.idk_answers_total,
            self.idk_rate() * 100.0
        ));
        output.push_str(&format!(
            "Injection: {}/{} ({:.1}%)\n",
            self.errors_injected_total,
            self.injection_rows_total,
            self.injection_rate() * 100.0
        ));

        output
    }
}

/// Observer that collects metrics from run events
pub struct MetricsObserver {
    receiver: broadcast::Receiver<AmplifyEvent>,
    metrics: Arc<Mutex<Metrics>>,
}

impl MetricsObserver {
    /// Create a new metrics observer subscribed to the event bus
    pub fn new(bus: &EventBus) -> Self {
        Self {
            receiver: bus.subscribe(),
            metrics: Arc::new(Mutex::new(Metrics::new())),
        }
    }

    /// Get a handle to the metrics for reading
    pub fn metrics(&self) -> Arc<Mutex<Metrics>> {
        Arc::clone(&self.metrics)
    }

    /// Run the observer, collecting metrics until the channel closes
    pub async fn run(mut self) {
        loop {
            match self.receiver.recv().await {
                Ok(event) => self.process_event(&event),
                Err(broadcast::error::RecvError::Closed) => break,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
            }
        }
    }

    /// Drain events already queued, without waiting for more
    pub fn drain(&mut self) -> usize {
        let mut processed = 0;
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    self.process_event(&event);
                    processed += 1;
                }
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
        processed
    }

    fn process_event(&self, event: &AmplifyEvent) {
        let mut metrics = match self.metrics.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        match event {
            AmplifyEvent::RunStarted { .. } => {}

            AmplifyEvent::RoundDispatched { task, rows, .. } => {
                metrics.record_round(task, *rows);
            }

            AmplifyEvent::RunCompleted {
                task,
                batch_size,
                oracle_rows,
                idk_answers,
                elapsed_ms,
                ..
            } => {
                metrics.record_run(task, *batch_size, *oracle_rows, *idk_answers, *elapsed_ms);
            }

            AmplifyEvent::ContractViolation { kind, .. } => {
                metrics.record_violation(kind);
            }

            AmplifyEvent::OracleFailed { .. } => {
                metrics.oracle_failures_total += 1;
            }

            AmplifyEvent::ErrorsInjected { rows, injected, .. } => {
                metrics.record_injection(*rows, *injected);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==========================================
    // Metrics Recording Tests
    // ==========================================

    #[test]
    fn test_record_round_buckets() {
        let mut metrics = Metrics::new();
        metrics.record_round("iterate", 1);
        metrics.record_round("iterate", 3);
        metrics.record_round("sat", 10_000);

        assert_eq!(metrics.rounds_total.get("iterate"), Some(&2));
        assert_eq!(metrics.round_size_histogram.get(&1), Some(&1));
        assert_eq!(metrics.round_size_histogram.get(&4), Some(&1));
        assert_eq!(metrics.round_size_histogram.get(&4096), Some(&1));
        assert_eq!(metrics.total_rounds(), 3);
    }

    #[test]
    fn test_idk_rate() {
        let mut metrics = Metrics::new();
        assert!((metrics.idk_rate() - 0.0).abs() < f64::EPSILON);

        metrics.record_run("sat", 8, 20, 2, 1);
        metrics.record_run("sat", 8, 20, 0, 1);
        assert!((metrics.idk_rate() - 0.125).abs() < f64::EPSILON);
        assert_eq!(metrics.oracle_rows_total, 40);
    }

    #[test]
    fn test_injection_rate() {
        let mut metrics = Metrics::new();
        metrics.record_injection(100, 30);
        metrics.record_injection(100, 20);
        assert!((metrics.injection_rate() - 0.25).abs() < f64::EPSILON);
    }

    // ==========================================
    // Export Format Tests
    // ==========================================

    #[test]
    fn test_prometheus_format() {
        let mut metrics = Metrics::new();
        metrics.record_round("iterate", 5);
        metrics.record_run("iterate", 5, 5, 0, 2);
        metrics.record_violation("BudgetExceeded");

        let output = metrics.to_prometheus();

        assert!(output.contains("amplify_runs_total{task=\"iterate\"} 1"));
        assert!(output.contains("amplify_rounds_total{task=\"iterate\"} 1"));
        assert!(output.contains("amplify_violations_total{kind=\"BudgetExceeded\"} 1"));
        assert!(output.contains("amplify_round_size_bucket{le=\"+Inf\"} 1"));
        assert!(output.contains("amplify_round_size_sum 5"));
        assert!(output.contains("amplify_errors_injected_total 0"));
    }

    #[test]
    fn test_report_format() {
        let mut metrics = Metrics::new();
        metrics.record_round("sat", 2);
        metrics.record_run("sat", 2, 2, 1, 0);

        let report = metrics.report();

        assert!(report.contains("Amplify Metrics Report"));
        assert!(report.contains("sat: 1 runs, 1 rounds"));
        assert!(report.contains("idk=1 (50.0%)"));
    }

    // ==========================================
    // Observer Integration Tests
    // ==========================================

    #[test]
    fn test_drain_processes_queued_events() {
        let bus = EventBus::new(100);
        let mut observer = MetricsObserver::new(&bus);
        let metrics = observer.metrics();

        bus.emit(AmplifyEvent::round_dispatched("iterate", 1, 4));
        bus.emit(AmplifyEvent::oracle_failed("iterate", 1, "down"));
        bus.emit(AmplifyEvent::errors_injected("iterate", 10, 3, 0.3));

        assert_eq!(observer.drain(), 3);
        let m = metrics.lock().unwrap();
        assert_eq!(m.total_rounds(), 1);
        assert_eq!(m.oracle_failures_total, 1);
        assert_eq!(m.errors_injected_total, 3);
    }

    #[tokio::test]
    async fn test_observer_run_processes_all_event_types() {
        let bus = EventBus::new(100);
        let observer = MetricsObserver::new(&bus);
        let metrics = observer.metrics();

        let bus_clone = bus.clone();
        let handle = tokio::spawn(async move {
            observer.run().await;
        });

        bus_clone.emit(AmplifyEvent::run_started("sat", 4));
        bus_clone.emit(AmplifyEvent::round_dispatched("sat", 1, 4));
        bus_clone.emit(AmplifyEvent::contract_violation("sat", Some(2), 1, "RoundLimit", "x"));
        bus_clone.emit(AmplifyEvent::run_completed("sat", 4, 1, 4, 1, 3));

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        {
            let m = metrics.lock().unwrap();
            assert_eq!(m.runs_total.get("sat"), Some(&1));
            assert_eq!(m.rounds_total.get("sat"), Some(&1));
            assert_eq!(m.violations_total.get("RoundLimit"), Some(&1));
            assert_eq!(m.idk_answers_total, 1);
        }

        drop(bus);
        drop(bus_clone);

        tokio::time::timeout(std::time::Duration::from_secs(2), handle)
            .await
            .expect("Timeout")
            .expect("Observer task should complete");
    }
}
