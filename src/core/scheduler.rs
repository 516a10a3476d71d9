//! Batched Recursive Run
//!
//! Drives one decomposition procedure per batch element in lockstep rounds:
//!
//! ```text
//! decompose + start every question
//!       ↓
//! ┌─▶ gather pending sub-questions (finalized elements excluded)
//! │         ↓
//! │   oracle.answer(origins, sub-questions)      one call per round
//! │         ↓
//! │   resume each pending procedure, record (sub-question, sub-answer)
//! └── while anything is pending and the round cap is not reached
//!       ↓
//! RunOutput { answers, traces }
//! ```
//!
//! # Failure Tiers
//!
//! - **Unknown**: malformed questions, malformed sub-answers and failed oracle
//!   calls end as `IDK` answers. The run continues.
//! - **Broken protocol**: budget overruns, wrong widths, out-of-order calls and
//!   mis-shaped oracle batches force the affected elements to `IDK` and are
//!   returned as [`SchedulerError::ContractViolations`], which still carries
//!   the padded output.

use super::oracle::Oracle;
use super::procedure::{Procedure, ProtocolError, Step};
use super::symbols::{Symbol, SymbolBatch};
use super::task::{Task, TaskShape};
use crate::events::AmplifyEvent;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Record of the sub-questions asked for one top-level question
///
/// Always holds `interaction_length` slots; slots past `used` are `IDK`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionTrace {
    subquestions: SymbolBatch,
    subanswers: SymbolBatch,
    used: usize,
}

impl InteractionTrace {
    /// All-`IDK` trace sized for `shape`
    pub fn empty(shape: &TaskShape) -> Self {
        Self {
            subquestions: SymbolBatch::idk(shape.question_length, shape.interaction_length),
            subanswers: SymbolBatch::idk(shape.answer_length, shape.interaction_length),
            used: 0,
        }
    }

    /// Number of slots holding a real interaction
    pub fn used(&self) -> usize {
        self.used
    }

    /// Total slots, used or not
    pub fn capacity(&self) -> usize {
        self.subquestions.len()
    }

    /// Padded sub-question slots
    pub fn subquestions(&self) -> &SymbolBatch {
        &self.subquestions
    }

    /// Padded sub-answer slots
    pub fn subanswers(&self) -> &SymbolBatch {
        &self.subanswers
    }

    /// The used (sub-question, sub-answer) pairs in the order they occurred
    pub fn pairs(&self) -> impl Iterator<Item = (&[Symbol], &[Symbol])> + '_ {
        self.subquestions
            .rows()
            .zip(self.subanswers.rows())
            .take(self.used)
    }

    fn record(&mut self, subquestion: &[Symbol], subanswer: &[Symbol]) -> bool {
        if self.used >= self.capacity() {
            return false;
        }
        let stored = self.subquestions.set_row(self.used, subquestion).is_ok()
            && self.subanswers.set_row(self.used, subanswer).is_ok();
        if stored {
            self.used += 1;
        }
        stored
    }
}

/// Answers and traces of a recursive run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOutput {
    /// One answer row per question
    pub answers: SymbolBatch,
    /// One trace per question
    pub traces: Vec<InteractionTrace>,
    /// Oracle rounds actually dispatched
    pub rounds: usize,
}

impl RunOutput {
    /// Number of answers that are entirely `IDK`
    pub fn idk_answers(&self) -> usize {
        self.answers
            .rows()
            .filter(|row| row.iter().all(|&s| s == super::symbols::IDK))
            .count()
    }
}

/// What a misbehaving procedure or oracle did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViolationKind {
    /// More sub-questions than `interaction_length`
    BudgetExceeded { limit: usize },
    /// Sub-question of the wrong width
    SubquestionWidth { expected: usize, actual: usize },
    /// Final answer of the wrong width
    AnswerWidth { expected: usize, actual: usize },
    /// Procedure driven out of order
    Protocol(ProtocolError),
    /// Still pending after the last allowed round
    RoundLimit { limit: usize },
    /// Oracle returned a batch of the wrong shape
    OracleShape {
        expected_rows: usize,
        actual_rows: usize,
        expected_width: usize,
        actual_width: usize,
    },
}

impl ViolationKind {
    /// Stable name for logs and metrics
    pub fn name(&self) -> &'static str {
        match self {
            Self::BudgetExceeded { .. } => "BudgetExceeded",
            Self::SubquestionWidth { .. } => "SubquestionWidth",
            Self::AnswerWidth { .. } => "AnswerWidth",
            Self::Protocol(_) => "Protocol",
            Self::RoundLimit { .. } => "RoundLimit",
            Self::OracleShape { .. } => "OracleShape",
        }
    }
}

impl std::fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BudgetExceeded { limit } => {
                write!(f, "requested more than {} sub-questions", limit)
            }
            Self::SubquestionWidth { expected, actual } => {
                write!(f, "sub-question width {}, expected {}", actual, expected)
            }
            Self::AnswerWidth { expected, actual } => {
                write!(f, "answer width {}, expected {}", actual, expected)
            }
            Self::Protocol(e) => write!(f, "{}", e),
            Self::RoundLimit { limit } => write!(f, "still pending after {} rounds", limit),
            Self::OracleShape {
                expected_rows,
                actual_rows,
                expected_width,
                actual_width,
            } => write!(
                f,
                "oracle returned {}x{} answers, expected {}x{}",
                actual_rows, actual_width, expected_rows, expected_width
            ),
        }
    }
}

/// A contract violation observed during a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractViolation {
    /// Affected batch element (`None` when a whole round was affected)
    pub element: Option<usize>,
    /// Round in which it was observed (0 = during `start`)
    pub round: usize,
    /// What went wrong
    pub kind: ViolationKind,
}

impl std::fmt::Display for ContractViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.element {
            Some(element) => write!(
                f,
                "element {} in round {}: {}",
                element, self.round, self.kind
            ),
            None => write!(f, "round {}: {}", self.round, self.kind),
        }
    }
}

/// Errors that abort a recursive run
#[derive(Debug, Clone, PartialEq)]
pub enum SchedulerError {
    /// Procedures or the oracle broke the protocol; affected elements are `IDK`
    ContractViolations {
        violations: Vec<ContractViolation>,
        output: Box<RunOutput>,
    },
    /// A nested amplification level reported a broken protocol
    OracleProtocol { round: usize, message: String },
}

impl SchedulerError {
    /// Padded output, when the run got far enough to produce one
    pub fn output(&self) -> Option<&RunOutput> {
        match self {
            Self::ContractViolations { output, .. } => Some(output),
            Self::OracleProtocol { .. } => None,
        }
    }
}

impl std::fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ContractViolations { violations, .. } => {
                write!(f, "{} contract violation(s)", violations.len())?;
                if let Some(first) = violations.first() {
                    write!(f, "; first: {}", first)?;
                }
                Ok(())
            }
            Self::OracleProtocol { round, message } => {
                write!(f, "Oracle broke the protocol in round {}: {}", round, message)
            }
        }
    }
}

impl std::error::Error for SchedulerError {}

/// Configuration for a [`RecursiveRunner`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Lower the round cap below `interaction_length`
    #[serde(default)]
    pub round_limit: Option<usize>,

    /// Whether to emit events to the configured emitter
    #[serde(default = "default_emit_events")]
    pub emit_events: bool,
}

fn default_emit_events() -> bool {
    true
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            round_limit: None,
            emit_events: default_emit_events(),
        }
    }
}

impl RunnerConfig {
    /// Stop after at most `limit` rounds
    pub fn with_round_limit(mut self, limit: usize) -> Self {
        self.round_limit = Some(limit);
        self
    }

    /// Round cap for a task allowing `interaction_length` sub-questions
    pub fn round_cap(&self, interaction_length: usize) -> usize {
        match self.round_limit {
            Some(limit) => limit.min(interaction_length),
            None => interaction_length,
        }
    }

    /// Disable events
    pub fn without_events(mut self) -> Self {
        self.emit_events = false;
        self
    }
}

/// Lockstep scheduler for one task
pub struct RecursiveRunner<'a, T: Task> {
    task: &'a T,
    config: RunnerConfig,
    event_emitter: Option<Arc<dyn Fn(AmplifyEvent) + Send + Sync>>,
}

impl<'a, T: Task> RecursiveRunner<'a, T> {
    /// Runner with the default configuration
    pub fn new(task: &'a T) -> Self {
        Self::with_config(task, RunnerConfig::default())
    }

    /// Runner with a custom configuration
    pub fn with_config(task: &'a T, config: RunnerConfig) -> Self {
        Self {
            task,
            config,
            event_emitter: None,
        }
    }

    /// Set an event emitter
    pub fn with_event_emitter(mut self, emitter: Arc<dyn Fn(AmplifyEvent) + Send + Sync>) -> Self {
        self.event_emitter = Some(emitter);
        self
    }

    /// Get the configuration
    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    fn emit(&self, event: AmplifyEvent) {
        if self.config.emit_events {
            if let Some(emitter) = &self.event_emitter {
                emitter(event);
            }
        }
    }

    /// Answer every row of `questions` by decomposition against `oracle`
    ///
    /// The oracle sees `origins` relative to `questions`: row `i` of a round's
    /// batch was asked on behalf of question `origins[i]`.
    pub fn run<O: Oracle + ?Sized>(
        &self,
        questions: &SymbolBatch,
        oracle: &mut O,
    ) -> Result<RunOutput, SchedulerError> {
        let started = Instant::now();
        let shape = self.task.shape();
        let task_name = self.task.name();
        let batch_size = questions.len();
        let round_cap = self.config.round_cap(shape.interaction_length);

        self.emit(AmplifyEvent::run_started(task_name, batch_size));

        let mut procedures: Vec<Procedure<T::Logic>> =
            questions.rows().map(|q| self.task.decompose(q)).collect();
        let mut state = RunState::new(&shape, batch_size);

        for (element, procedure) in procedures.iter_mut().enumerate() {
            let step = procedure.start();
            state.settle(element, 0, step, procedure.subquestions_asked());
        }

        let mut round = 0;
        let mut oracle_rows = 0;
        while !state.pending.is_empty() {
            if round >= round_cap {
                for (element, _) in std::mem::take(&mut state.pending) {
                    state.violate(Some(element), round, ViolationKind::RoundLimit { limit: round_cap });
                }
                break;
            }
            round += 1;

            let pending = std::mem::take(&mut state.pending);
            let origins: Vec<usize> = pending.iter().map(|(element, _)| *element).collect();
            let mut batch = SymbolBatch::with_capacity(shape.question_length, pending.len());
            for (_, subquestion) in &pending {
                // widths were checked when the sub-question was requested
                let _ = batch.push(subquestion);
            }
            oracle_rows += pending.len();

            debug!(
                task = task_name,
                round = round,
                pending = pending.len(),
                "Dispatching round"
            );
            self.emit(AmplifyEvent::round_dispatched(task_name, round, pending.len()));

            let subanswers = match oracle.answer(&origins, &batch) {
                Ok(answers)
                    if answers.len() == pending.len()
                        && answers.width() == shape.answer_length =>
                {
                    answers
                }
                Ok(answers) => {
                    state.violate(
                        None,
                        round,
                        ViolationKind::OracleShape {
                            expected_rows: pending.len(),
                            actual_rows: answers.len(),
                            expected_width: shape.answer_length,
                            actual_width: answers.width(),
                        },
                    );
                    // every pending element stays IDK
                    break;
                }
                Err(e) if e.is_protocol_violation() => {
                    return Err(SchedulerError::OracleProtocol {
                        round,
                        message: e.to_string(),
                    });
                }
                Err(e) => {
                    debug!(
                        task = task_name,
                        round = round,
                        error = %e,
                        "Oracle failed, treating round as unknown"
                    );
                    self.emit(AmplifyEvent::oracle_failed(task_name, round, &e.to_string()));
                    SymbolBatch::idk(shape.answer_length, pending.len())
                }
            };

            for ((element, subquestion), subanswer) in pending.into_iter().zip(subanswers.rows()) {
                state.traces[element].record(&subquestion, subanswer);
                let procedure = &mut procedures[element];
                let step = procedure.resume(subanswer);
                state.settle(element, round, step, procedure.subquestions_asked());
            }
        }

        let output = RunOutput {
            answers: state.answers,
            traces: state.traces,
            rounds: round,
        };
        let idk_answers = output.idk_answers();
        let elapsed_ms = started.elapsed().as_millis() as u64;

        debug!(
            task = task_name,
            batch = batch_size,
            rounds = round,
            oracle_rows = oracle_rows,
            idk_answers = idk_answers,
            elapsed_ms = elapsed_ms,
            "Recursive run completed"
        );
        self.emit(AmplifyEvent::run_completed(
            task_name,
            batch_size,
            round,
            oracle_rows,
            idk_answers,
            elapsed_ms,
        ));

        if state.violations.is_empty() {
            return Ok(output);
        }

        for violation in &state.violations {
            debug!(task = task_name, violation = %violation, "Contract violation");
            self.emit(AmplifyEvent::contract_violation(
                task_name,
                violation.element,
                violation.round,
                violation.kind.name(),
                &violation.kind.to_string(),
            ));
        }
        Err(SchedulerError::ContractViolations {
            violations: state.violations,
            output: Box::new(output),
        })
    }
}

impl<T: Task> std::fmt::Debug for RecursiveRunner<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecursiveRunner")
            .field("task", &self.task.name())
            .field("config", &self.config)
            .finish()
    }
}

/// Run `questions` through `task`'s decomposition with default settings
pub fn recursive_run<T: Task, O: Oracle + ?Sized>(
    task: &T,
    questions: &SymbolBatch,
    oracle: &mut O,
) -> Result<RunOutput, SchedulerError> {
    RecursiveRunner::new(task).run(questions, oracle)
}

/// Mutable bookkeeping of one run
struct RunState {
    shape: TaskShape,
    answers: SymbolBatch,
    traces: Vec<InteractionTrace>,
    pending: Vec<(usize, Vec<Symbol>)>,
    violations: Vec<ContractViolation>,
}

impl RunState {
    fn new(shape: &TaskShape, batch_size: usize) -> Self {
        Self {
            shape: *shape,
            answers: SymbolBatch::idk(shape.answer_length, batch_size),
            traces: vec![InteractionTrace::empty(shape); batch_size],
            pending: Vec::new(),
            violations: Vec::new(),
        }
    }

    fn violate(&mut self, element: Option<usize>, round: usize, kind: ViolationKind) {
        self.violations.push(ContractViolation {
            element,
            round,
            kind,
        });
    }

    /// File a procedure's step as final, pending or violating
    fn settle(
        &mut self,
        element: usize,
        round: usize,
        step: Result<Step, ProtocolError>,
        asked: usize,
    ) {
        match step {
            Err(e) => self.violate(Some(element), round, ViolationKind::Protocol(e)),
            Ok(Step::Final(answer)) => {
                if answer.len() != self.shape.answer_length {
                    self.violate(
                        Some(element),
                        round,
                        ViolationKind::AnswerWidth {
                            expected: self.shape.answer_length,
                            actual: answer.len(),
                        },
                    );
                } else {
                    let _ = self.answers.set_row(element, &answer);
                }
            }
            Ok(Step::NeedSubquestion(subquestion)) => {
                if asked > self.shape.interaction_length {
                    self.violate(
                        Some(element),
                        round,
                        ViolationKind::BudgetExceeded {
                            limit: self.shape.interaction_length,
                        },
                    );
                } else if subquestion.len() != self.shape.question_length {
                    self.violate(
                        Some(element),
                        round,
                        ViolationKind::SubquestionWidth {
                            expected: self.shape.question_length,
                            actual: subquestion.len(),
                        },
                    );
                } else {
                    self.pending.push((element, subquestion));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::oracle::{IdkOracle, OracleError};
    use crate::core::procedure::Decomposition;
    use crate::core::symbols::IDK;
    use crate::core::task::Difficulty;
    use rand::RngCore;
    use std::sync::Mutex;

    /// Toy task: a question `[k, v]` asks `k` sub-questions `[k-1, v]`, ..., and
    /// answers with the last sub-answer; `k = 0` answers `[v]` directly.
    /// `k = 9` never finishes and `k = 8` asks a too-wide sub-question.
    struct Countdown {
        interaction_length: usize,
    }

    struct CountdownLogic {
        question: Vec<Symbol>,
        left: Symbol,
        last: Symbol,
    }

    impl Decomposition for CountdownLogic {
        fn begin(&mut self) -> Step {
            if self.question.len() != 2 {
                return Step::Final(vec![IDK]);
            }
            self.left = self.question[0];
            self.last = self.question[1];
            self.next()
        }

        fn advance(&mut self, subanswer: &[Symbol]) -> Step {
            self.last = subanswer[0];
            self.next()
        }
    }

    impl CountdownLogic {
        fn next(&mut self) -> Step {
            match self.left {
                0 => Step::Final(vec![self.last]),
                9 => Step::NeedSubquestion(vec![9, self.last]),
                8 => Step::NeedSubquestion(vec![8, self.last, 0]),
                _ => {
                    self.left -= 1;
                    Step::NeedSubquestion(vec![0, self.last])
                }
            }
        }
    }

    impl Task for Countdown {
        type Environment = ();
        type Logic = CountdownLogic;

        fn name(&self) -> &str {
            "countdown"
        }

        fn shape(&self) -> TaskShape {
            TaskShape {
                question_length: 2,
                answer_length: 1,
                fact_length: 1,
                interaction_length: self.interaction_length,
                vocab_size: 16,
            }
        }

        fn make_environment(&self, _: Difficulty, _: &mut dyn RngCore) -> (SymbolBatch, ()) {
            (SymbolBatch::new(1), ())
        }

        fn sample_question(&self, _: &(), _: &mut dyn RngCore) -> Vec<Symbol> {
            vec![1, 5]
        }

        fn direct_answer(&self, questions: &SymbolBatch, _: &()) -> SymbolBatch {
            SymbolBatch::from_rows(1, questions.rows().map(|q| [q[1] + 1]))
                .unwrap_or_else(|_| SymbolBatch::new(1))
        }

        fn decompose(&self, question: &[Symbol]) -> Procedure<CountdownLogic> {
            Procedure::new(CountdownLogic {
                question: question.to_vec(),
                left: 0,
                last: IDK,
            })
        }

        fn classify(&self, question: &[Symbol], _: &()) -> String {
            format!("k{}", question[0])
        }

        fn answer_ranges(&self) -> Vec<crate::core::symbols::SymbolRange> {
            Vec::new()
        }

        fn is_simple(&self, question: &[Symbol]) -> bool {
            question[0] == 0
        }

        fn all_questions(&self, _: &()) -> SymbolBatch {
            SymbolBatch::new(2)
        }

        fn repr_symbol(&self, symbol: Symbol) -> String {
            symbol.to_string()
        }
    }

    fn plus_one() -> impl FnMut(&[usize], &SymbolBatch) -> Result<SymbolBatch, OracleError> {
        |_origins: &[usize], questions: &SymbolBatch| {
            Ok(SymbolBatch::from_rows(1, questions.rows().map(|q| [q[1] + 1])).unwrap())
        }
    }

    // ==========================================
    // Round Structure Tests
    // ==========================================

    #[test]
    fn test_immediate_answers_use_no_rounds() {
        let task = Countdown {
            interaction_length: 3,
        };
        let questions = SymbolBatch::from_rows(2, [[0, 4], [0, 7]]).unwrap();
        let mut calls = 0;
        let mut oracle = |_: &[usize], q: &SymbolBatch| -> Result<SymbolBatch, OracleError> {
            calls += 1;
            Ok(SymbolBatch::idk(1, q.len()))
        };

        let output = recursive_run(&task, &questions, &mut oracle).unwrap();
        assert_eq!(output.rounds, 0);
        assert_eq!(calls, 0);
        assert_eq!(output.answers.row(0), Some(&[4][..]));
        assert_eq!(output.answers.row(1), Some(&[7][..]));
        assert!(output.traces.iter().all(|t| t.used() == 0));
    }

    #[test]
    fn test_ragged_termination_excludes_finished_elements() {
        let task = Countdown {
            interaction_length: 3,
        };
        let questions = SymbolBatch::from_rows(2, [[1, 10], [3, 20]]).unwrap();
        let seen = Mutex::new(Vec::new());
        let mut oracle = |origins: &[usize], q: &SymbolBatch| -> Result<SymbolBatch, OracleError> {
            seen.lock().unwrap().push(origins.to_vec());
            Ok(SymbolBatch::from_rows(1, q.rows().map(|r| [r[1] + 1])).unwrap())
        };

        let output = recursive_run(&task, &questions, &mut oracle).unwrap();
        assert_eq!(output.rounds, 3);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![vec![0, 1], vec![1], vec![1]]
        );
        assert_eq!(output.answers.row(0), Some(&[11][..]));
        assert_eq!(output.answers.row(1), Some(&[23][..]));
        assert_eq!(output.traces[0].used(), 1);
        assert_eq!(output.traces[1].used(), 3);
    }

    #[test]
    fn test_trace_records_pairs_in_order_and_pads() {
        let task = Countdown {
            interaction_length: 4,
        };
        let questions = SymbolBatch::from_rows(2, [[2, 1]]).unwrap();
        let output = recursive_run(&task, &questions, &mut plus_one()).unwrap();

        let trace = &output.traces[0];
        let pairs: Vec<_> = trace
            .pairs()
            .map(|(q, a)| (q.to_vec(), a.to_vec()))
            .collect();
        assert_eq!(
            pairs,
            vec![(vec![0, 1], vec![2]), (vec![0, 2], vec![3])]
        );
        assert_eq!(trace.capacity(), 4);
        assert!(trace.subquestions().row(2).unwrap().iter().all(|&s| s == IDK));
        assert!(trace.subanswers().row(3).unwrap().iter().all(|&s| s == IDK));
    }

    #[test]
    fn test_empty_batch() {
        let task = Countdown {
            interaction_length: 3,
        };
        let output = recursive_run(&task, &SymbolBatch::new(2), &mut IdkOracle::new(1)).unwrap();
        assert_eq!(output.answers.len(), 0);
        assert!(output.traces.is_empty());
        assert_eq!(output.rounds, 0);
    }

    // ==========================================
    // Failure Tier Tests
    // ==========================================

    #[test]
    fn test_oracle_failure_becomes_idk() {
        let task = Countdown {
            interaction_length: 3,
        };
        let questions = SymbolBatch::from_rows(2, [[1, 10]]).unwrap();
        let mut oracle = |_: &[usize], _: &SymbolBatch| -> Result<SymbolBatch, OracleError> {
            Err(OracleError::Timeout {
                elapsed_ms: 10,
                limit_ms: 5,
            })
        };

        let output = recursive_run(&task, &questions, &mut oracle).unwrap();
        assert_eq!(output.answers.row(0), Some(&[IDK][..]));
        assert_eq!(output.traces[0].used(), 1);
    }

    #[test]
    fn test_never_finishing_procedure_is_a_violation() {
        let task = Countdown {
            interaction_length: 3,
        };
        let questions = SymbolBatch::from_rows(2, [[9, 1], [1, 1]]).unwrap();
        let err = recursive_run(&task, &questions, &mut plus_one()).unwrap_err();

        match err {
            SchedulerError::ContractViolations { violations, output } => {
                assert_eq!(violations.len(), 1);
                assert_eq!(violations[0].element, Some(0));
                assert_eq!(
                    violations[0].kind,
                    ViolationKind::BudgetExceeded { limit: 3 }
                );
                assert_eq!(output.answers.row(0), Some(&[IDK][..]));
                assert_eq!(output.answers.row(1), Some(&[2][..]));
                assert!(output.rounds <= 3);
                assert_eq!(output.traces[0].used(), 3);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_wrong_width_subquestion_is_a_violation() {
        let task = Countdown {
            interaction_length: 3,
        };
        let questions = SymbolBatch::from_rows(2, [[8, 1]]).unwrap();
        let err = recursive_run(&task, &questions, &mut plus_one()).unwrap_err();
        let output = err.output().unwrap();
        assert_eq!(output.answers.row(0), Some(&[IDK][..]));
        assert!(err.to_string().contains("sub-question width 3"));
    }

    #[test]
    fn test_misshaped_oracle_batch_is_a_violation() {
        let task = Countdown {
            interaction_length: 3,
        };
        let questions = SymbolBatch::from_rows(2, [[1, 1], [1, 2]]).unwrap();
        let mut short = |_: &[usize], _: &SymbolBatch| -> Result<SymbolBatch, OracleError> {
            Ok(SymbolBatch::idk(1, 1))
        };

        match recursive_run(&task, &questions, &mut short).unwrap_err() {
            SchedulerError::ContractViolations { violations, output } => {
                assert_eq!(violations[0].element, None);
                assert!(matches!(violations[0].kind, ViolationKind::OracleShape { .. }));
                assert!(output.answers.is_all_idk());
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_nested_protocol_error_aborts() {
        let task = Countdown {
            interaction_length: 3,
        };
        let questions = SymbolBatch::from_rows(2, [[1, 1]]).unwrap();
        let mut broken = |_: &[usize], _: &SymbolBatch| -> Result<SymbolBatch, OracleError> {
            Err(OracleError::Protocol {
                message: "nested".into(),
            })
        };

        assert!(matches!(
            recursive_run(&task, &questions, &mut broken),
            Err(SchedulerError::OracleProtocol { round: 1, .. })
        ));
    }

    // ==========================================
    // Round Limit Tests
    // ==========================================

    #[test]
    fn test_round_limit_only_lowers_cap() {
        let config = RunnerConfig::default().with_round_limit(2);
        assert_eq!(config.round_cap(3), 2);
        assert_eq!(config.round_cap(1), 1);
        assert_eq!(RunnerConfig::default().round_cap(3), 3);
    }

    #[test]
    fn test_round_limit_cuts_long_procedures() {
        let task = Countdown {
            interaction_length: 3,
        };
        let runner = RecursiveRunner::with_config(&task, RunnerConfig::default().with_round_limit(1));
        let questions = SymbolBatch::from_rows(2, [[1, 1], [3, 1]]).unwrap();

        match runner.run(&questions, &mut plus_one()).unwrap_err() {
            SchedulerError::ContractViolations { violations, output } => {
                assert_eq!(violations.len(), 1);
                assert_eq!(violations[0].element, Some(1));
                assert_eq!(violations[0].kind, ViolationKind::RoundLimit { limit: 1 });
                assert_eq!(output.rounds, 1);
                assert_eq!(output.answers.row(0), Some(&[2][..]));
                assert_eq!(output.answers.row(1), Some(&[IDK][..]));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    // ==========================================
    // Event Tests
    // ==========================================

    #[test]
    fn test_events_are_emitted() {
        let task = Countdown {
            interaction_length: 3,
        };
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let runner = RecursiveRunner::new(&task).with_event_emitter(Arc::new(move |e: AmplifyEvent| {
            sink.lock().unwrap().push(e.event_type());
        }));

        let questions = SymbolBatch::from_rows(2, [[2, 1]]).unwrap();
        runner.run(&questions, &mut plus_one()).unwrap();

        assert_eq!(
            *events.lock().unwrap(),
            vec!["RunStarted", "RoundDispatched", "RoundDispatched", "RunCompleted"]
        );
    }

    #[test]
    fn test_events_can_be_disabled() {
        let task = Countdown {
            interaction_length: 3,
        };
        let events = Arc::new(Mutex::new(0usize));
        let sink = Arc::clone(&events);
        let runner = RecursiveRunner::with_config(&task, RunnerConfig::default().without_events())
            .with_event_emitter(Arc::new(move |_: AmplifyEvent| {
                *sink.lock().unwrap() += 1;
            }));

        let questions = SymbolBatch::from_rows(2, [[2, 1]]).unwrap();
        runner.run(&questions, &mut plus_one()).unwrap();
        assert_eq!(*events.lock().unwrap(), 0);
    }
}
