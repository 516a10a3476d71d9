//! The Task Contract
//!
//! A task bundles everything the scheduler and its collaborators need to know
//! about one family of questions:
//!
//! - environment generation at a requested difficulty
//! - question sampling and exhaustive enumeration
//! - ground-truth ("direct") answering
//! - the decomposition procedure for a single question
//! - structural classification and error injection for reporting/simulation
//!
//! All widths are fixed per task and published through [`TaskShape`].

use super::procedure::{Decomposition, Procedure};
use super::symbols::{Symbol, SymbolBatch, SymbolRange, IDK};
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};

/// Instance size at difficulty level 0
pub const BASE_INSTANCE_SIZE: usize = 8;

/// Fixed widths and alphabet size of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskShape {
    /// Symbols per question
    pub question_length: usize,
    /// Symbols per answer
    pub answer_length: usize,
    /// Symbols per fact row
    pub fact_length: usize,
    /// Maximum sub-questions per decomposition (trace slots per question)
    pub interaction_length: usize,
    /// Total alphabet size, `IDK` included
    pub vocab_size: usize,
}

/// Hardness of a generated environment, chosen by an external curriculum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    /// Instance size `BASE_INSTANCE_SIZE + level`, capped by the task's maximum
    Level(usize),
    /// The task's maximum instance size
    #[default]
    Unbounded,
}

impl Difficulty {
    /// Instance size for a task whose largest instance has `max_size` elements
    pub fn instance_size(self, max_size: usize) -> usize {
        match self {
            Self::Level(level) => BASE_INSTANCE_SIZE.saturating_add(level).min(max_size),
            Self::Unbounded => max_size,
        }
    }
}

/// A sampled batch of instances with questions and ground truth
///
/// Questions are flattened: row `i` of `questions` belongs to environment
/// `env_of[i]`, and `truth` holds the direct answer for each row.
#[derive(Debug, Clone)]
pub struct InstanceBatch<E> {
    /// Fact rows per environment
    pub facts: Vec<SymbolBatch>,
    /// One environment per instance
    pub environments: Vec<E>,
    /// All questions, instance-major
    pub questions: SymbolBatch,
    /// Environment index of every question row
    pub env_of: Vec<usize>,
    /// Direct answer of every question row
    pub truth: SymbolBatch,
}

/// Contract every decomposition task implements
pub trait Task: Send + Sync {
    /// Precomputed instance data backing direct answers
    type Environment: Send + Sync;

    /// Decomposition logic for one question
    type Logic: Decomposition;

    /// Short task name used in logs and reports
    fn name(&self) -> &str;

    /// Fixed widths and alphabet size
    fn shape(&self) -> TaskShape;

    /// Draw a random instance; returns its fact rows and environment
    fn make_environment(
        &self,
        difficulty: Difficulty,
        rng: &mut dyn RngCore,
    ) -> (SymbolBatch, Self::Environment);

    /// Draw one well-formed question answerable against `environment`
    fn sample_question(&self, environment: &Self::Environment, rng: &mut dyn RngCore)
        -> Vec<Symbol>;

    /// Ground-truth answers for a batch of questions against one environment
    fn direct_answer(&self, questions: &SymbolBatch, environment: &Self::Environment)
        -> SymbolBatch;

    /// Fresh decomposition procedure for `question`
    fn decompose(&self, question: &[Symbol]) -> Procedure<Self::Logic>;

    /// Structural difficulty label, for reporting only
    fn classify(&self, question: &[Symbol], environment: &Self::Environment) -> String;

    /// Range of valid symbols at each answer position
    fn answer_ranges(&self) -> Vec<SymbolRange>;

    /// Whether the decomposition resolves `question` with a single delegating sub-question
    fn is_simple(&self, question: &[Symbol]) -> bool;

    /// Every well-formed question answerable against `environment`
    fn all_questions(&self, environment: &Self::Environment) -> SymbolBatch;

    /// Human-readable form of one symbol
    fn repr_symbol(&self, symbol: Symbol) -> String;

    /// Human-readable form of a fact, question or answer row
    fn repr_row(&self, row: &[Symbol]) -> String {
        row.iter().map(|&s| self.repr_symbol(s)).collect()
    }

    /// Draw `n` questions against `environment`
    fn sample_questions(
        &self,
        environment: &Self::Environment,
        n: usize,
        rng: &mut dyn RngCore,
    ) -> SymbolBatch {
        let width = self.shape().question_length;
        let mut questions = SymbolBatch::with_capacity(width, n);
        for _ in 0..n {
            let question = self.sample_question(environment, &mut *rng);
            // sample_question always produces question_length symbols
            let _ = questions.push(&question);
        }
        questions
    }

    /// Replace each answer, with probability `probability`, by a random incorrect one
    ///
    /// Answers are corrupted independently of each other. Untouched rows are
    /// left exactly as they were. Returns the number of replaced rows.
    fn inject_errors(
        &self,
        answers: &mut SymbolBatch,
        _environment: &Self::Environment,
        probability: f64,
        rng: &mut dyn RngCore,
    ) -> usize {
        let p = if probability.is_nan() {
            0.0
        } else {
            probability.clamp(0.0, 1.0)
        };
        if p == 0.0 {
            return 0;
        }

        let ranges = self.answer_ranges();
        let mut injected = 0;
        for index in 0..answers.len() {
            if !rng.gen_bool(p) {
                continue;
            }
            let replacement = match answers.row(index) {
                Some(current) => random_incorrect_answer(&ranges, current, &mut *rng),
                None => None,
            };
            if let Some(replacement) = replacement {
                if answers.set_row(index, &replacement).is_ok() {
                    injected += 1;
                }
            }
        }

        if injected > 0 {
            tracing::debug!(
                task = self.name(),
                rows = answers.len(),
                injected = injected,
                probability = p,
                "Injected answer errors"
            );
        }
        injected
    }

    /// Sample `nbatch` environments with `nqs` questions each, plus ground truth
    fn sample_batch(
        &self,
        nbatch: usize,
        nqs: usize,
        difficulty: Difficulty,
        rng: &mut dyn RngCore,
    ) -> InstanceBatch<Self::Environment> {
        let shape = self.shape();
        let mut facts = Vec::with_capacity(nbatch);
        let mut environments = Vec::with_capacity(nbatch);
        let mut questions = SymbolBatch::with_capacity(shape.question_length, nbatch * nqs);
        let mut truth = SymbolBatch::with_capacity(shape.answer_length, nbatch * nqs);
        let mut env_of = Vec::with_capacity(nbatch * nqs);

        for instance in 0..nbatch {
            let (instance_facts, environment) = self.make_environment(difficulty, &mut *rng);
            let instance_questions = self.sample_questions(&environment, nqs, &mut *rng);
            let instance_truth = self.direct_answer(&instance_questions, &environment);

            for (question, answer) in instance_questions.rows().zip(instance_truth.rows()) {
                let _ = questions.push(question);
                let _ = truth.push(answer);
                env_of.push(instance);
            }
            facts.push(instance_facts);
            environments.push(environment);
        }

        InstanceBatch {
            facts,
            environments,
            questions,
            env_of,
            truth,
        }
    }
}

/// Draw a uniformly random answer from the domain spanned by `ranges` that differs from `current`
///
/// Answers outside the domain (such as `IDK`) make every domain element
/// eligible. Returns `None` when no different answer exists.
pub fn random_incorrect_answer<R: Rng + ?Sized>(
    ranges: &[SymbolRange],
    current: &[Symbol],
    rng: &mut R,
) -> Option<Vec<Symbol>> {
    let size = ranges
        .iter()
        .try_fold(1u64, |acc, r| acc.checked_mul(r.len() as u64))?;

    let current_index = if current.len() == ranges.len() {
        ranges
            .iter()
            .zip(current)
            .try_fold(0u64, |acc, (range, &s)| {
                range.index_of(s).map(|i| acc * range.len() as u64 + i as u64)
            })
    } else {
        None
    };

    let mut draw = match current_index {
        Some(index) => {
            if size < 2 {
                return None;
            }
            let r = rng.gen_range(0..size - 1);
            if r >= index {
                r + 1
            } else {
                r
            }
        }
        None => {
            if size == 0 {
                return None;
            }
            rng.gen_range(0..size)
        }
    };

    let mut answer = vec![IDK; ranges.len()];
    for (slot, range) in answer.iter_mut().zip(ranges).rev() {
        let len = range.len() as u64;
        *slot = range.get((draw % len) as usize)?;
        draw /= len;
    }
    Some(answer)
}
