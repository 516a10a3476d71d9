//! Oracles: Batched Question Answering
//!
//! An oracle answers a whole batch of fixed-width questions in one call. The
//! scheduler hands it every sub-question pending in a round together with
//! `origins`, the index of the top-level batch element that asked each row,
//! so ground-truth oracles can route each row to that element's environment.
//!
//! Levels compose by value:
//!
//! ```text
//! AmplifiedOracle ──▶ AmplifiedOracle ──▶ DirectOracle
//!  (scheduler, L2)     (scheduler, L1)     (ground truth)
//! ```
//!
//! Closures `FnMut(&[usize], &SymbolBatch) -> Result<SymbolBatch, OracleError>`
//! are oracles too, which is how external models plug in.

use super::scheduler::{RecursiveRunner, RunnerConfig, SchedulerError};
use super::symbols::SymbolBatch;
use super::task::Task;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::warn;

/// Failures reported by an oracle
#[derive(Debug, Clone, PartialEq)]
pub enum OracleError {
    /// The oracle exceeded its time budget
    Timeout { elapsed_ms: u64, limit_ms: u64 },
    /// The oracle could not produce answers
    Unavailable { message: String },
    /// A lower amplification level broke the decomposition protocol
    Protocol { message: String },
}

impl OracleError {
    /// Whether this error signals a broken protocol rather than missing knowledge
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, Self::Protocol { .. })
    }
}

impl std::fmt::Display for OracleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout {
                elapsed_ms,
                limit_ms,
            } => write!(
                f,
                "Oracle timed out after {}ms (limit: {}ms)",
                elapsed_ms, limit_ms
            ),
            Self::Unavailable { message } => write!(f, "Oracle unavailable: {}", message),
            Self::Protocol { message } => {
                write!(f, "Protocol violation below this level: {}", message)
            }
        }
    }
}

impl std::error::Error for OracleError {}

impl From<SchedulerError> for OracleError {
    fn from(e: SchedulerError) -> Self {
        Self::Protocol {
            message: e.to_string(),
        }
    }
}

/// Anything that answers a batch of questions
pub trait Oracle {
    /// Answer `questions`; row `i` was asked on behalf of element `origins[i]`
    ///
    /// Must return exactly one answer row per question row.
    fn answer(
        &mut self,
        origins: &[usize],
        questions: &SymbolBatch,
    ) -> Result<SymbolBatch, OracleError>;
}

impl<F> Oracle for F
where
    F: FnMut(&[usize], &SymbolBatch) -> Result<SymbolBatch, OracleError>,
{
    fn answer(
        &mut self,
        origins: &[usize],
        questions: &SymbolBatch,
    ) -> Result<SymbolBatch, OracleError> {
        self(origins, questions)
    }
}

/// Ground-truth oracle backed by one environment per top-level element
///
/// `env_of[origin]` selects the environment for a row asked by `origin`.
pub struct DirectOracle<'a, T: Task> {
    task: &'a T,
    environments: &'a [T::Environment],
    env_of: &'a [usize],
}

impl<'a, T: Task> DirectOracle<'a, T> {
    /// Route origins to `environments` through `env_of`
    pub fn new(task: &'a T, environments: &'a [T::Environment], env_of: &'a [usize]) -> Self {
        Self {
            task,
            environments,
            env_of,
        }
    }
}

impl<T: Task> Oracle for DirectOracle<'_, T> {
    fn answer(
        &mut self,
        origins: &[usize],
        questions: &SymbolBatch,
    ) -> Result<SymbolBatch, OracleError> {
        let answer_length = self.task.shape().answer_length;
        let mut answers = SymbolBatch::idk(answer_length, questions.len());

        let mut rows_by_env: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (row, &origin) in origins.iter().enumerate().take(questions.len()) {
            match self.env_of.get(origin) {
                Some(&env) if env < self.environments.len() => {
                    rows_by_env.entry(env).or_default().push(row)
                }
                _ => warn!(origin = origin, row = row, "No environment for origin"),
            }
        }

        for (env, rows) in rows_by_env {
            let mut batch = SymbolBatch::with_capacity(questions.width(), rows.len());
            for &row in &rows {
                if let Some(question) = questions.row(row) {
                    let _ = batch.push(question);
                }
            }
            let env_answers = self.task.direct_answer(&batch, &self.environments[env]);
            for (&row, answer) in rows.iter().zip(env_answers.rows()) {
                let _ = answers.set_row(row, answer);
            }
        }

        Ok(answers)
    }
}

/// One amplification level: answers by running the scheduler against `inner`
pub struct AmplifiedOracle<'a, T: Task, O> {
    task: &'a T,
    inner: O,
    config: RunnerConfig,
}

impl<'a, T: Task, O: Oracle> AmplifiedOracle<'a, T, O> {
    /// Decompose every question one level further before asking `inner`
    pub fn new(task: &'a T, inner: O) -> Self {
        Self {
            task,
            inner,
            config: RunnerConfig::default().without_events(),
        }
    }

    /// Use a custom runner configuration for this level
    pub fn with_config(mut self, config: RunnerConfig) -> Self {
        self.config = config;
        self
    }

    /// Give back the wrapped oracle
    pub fn into_inner(self) -> O {
        self.inner
    }
}

impl<T: Task, O: Oracle> Oracle for AmplifiedOracle<'_, T, O> {
    fn answer(
        &mut self,
        origins: &[usize],
        questions: &SymbolBatch,
    ) -> Result<SymbolBatch, OracleError> {
        let runner = RecursiveRunner::with_config(self.task, self.config.clone());
        let inner = &mut self.inner;

        // Rows of the nested run are indexed by our question rows; map them
        // back to the top-level elements that asked.
        let mut remapped = |nested: &[usize],
                            subquestions: &SymbolBatch|
         -> Result<SymbolBatch, OracleError> {
            let mapped: Vec<usize> = nested
                .iter()
                .map(|&row| origins.get(row).copied().unwrap_or(usize::MAX))
                .collect();
            inner.answer(&mapped, subquestions)
        };

        let output = runner.run(questions, &mut remapped)?;
        Ok(output.answers)
    }
}

/// Wrap `base` in `levels` amplification layers
///
/// With `levels = 0` the result answers exactly like `base`.
pub fn amplified<'a, T, O>(task: &'a T, base: O, levels: usize) -> Box<dyn Oracle + 'a>
where
    T: Task + 'a,
    O: Oracle + 'a,
{
    let mut oracle: Box<dyn Oracle + 'a> = Box::new(base);
    for _ in 0..levels {
        let mut inner = oracle;
        let forward = move |origins: &[usize],
                            questions: &SymbolBatch|
              -> Result<SymbolBatch, OracleError> {
            inner.answer(origins, questions)
        };
        oracle = Box::new(AmplifiedOracle::new(task, forward));
    }
    oracle
}

/// Oracle that never knows
#[derive(Debug, Clone, Copy)]
pub struct IdkOracle {
    answer_length: usize,
}

impl IdkOracle {
    /// Answer every question with `answer_length` `IDK` symbols
    pub fn new(answer_length: usize) -> Self {
        Self { answer_length }
    }
}

impl Oracle for IdkOracle {
    fn answer(
        &mut self,
        _origins: &[usize],
        questions: &SymbolBatch,
    ) -> Result<SymbolBatch, OracleError> {
        Ok(SymbolBatch::idk(self.answer_length, questions.len()))
    }
}

/// Time budget around a blocking oracle
///
/// The wrapped call cannot be interrupted; a call that overruns its budget is
/// reported as [`OracleError::Timeout`] and its answers are discarded.
pub struct Deadline<O> {
    inner: O,
    limit: Duration,
}

impl<O: Oracle> Deadline<O> {
    /// Enforce `limit` on every call to `inner`
    pub fn new(inner: O, limit: Duration) -> Self {
        Self { inner, limit }
    }
}

impl<O: Oracle> Oracle for Deadline<O> {
    fn answer(
        &mut self,
        origins: &[usize],
        questions: &SymbolBatch,
    ) -> Result<SymbolBatch, OracleError> {
        let start = Instant::now();
        let answers = self.inner.answer(origins, questions)?;
        let elapsed = start.elapsed();
        if elapsed > self.limit {
            return Err(OracleError::Timeout {
                elapsed_ms: elapsed.as_millis() as u64,
                limit_ms: self.limit.as_millis() as u64,
            });
        }
        Ok(answers)
    }
}
