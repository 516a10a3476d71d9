//! Accuracy Reports and Trace Rendering
//!
//! Accuracy of a batch of guesses against ground truth, broken down by the
//! task's structural classification, plus human-readable interaction dumps
//! for debugging decompositions.

use super::scheduler::InteractionTrace;
use super::symbols::{Symbol, SymbolBatch, IDK};
use super::task::Task;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Correct, unknown and total answers in one bucket
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketStats {
    pub correct: usize,
    pub idk: usize,
    pub total: usize,
}

impl BucketStats {
    /// Fraction answered correctly (0 for an empty bucket)
    pub fn accuracy(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.correct as f64 / self.total as f64
        }
    }

    fn record(&mut self, correct: bool, idk: bool) {
        self.total += 1;
        if correct {
            self.correct += 1;
        }
        if idk {
            self.idk += 1;
        }
    }
}

/// Accuracy by classification bucket
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccuracyReport {
    pub buckets: BTreeMap<String, BucketStats>,
    pub overall: BucketStats,
}

impl AccuracyReport {
    /// Compare `guesses` with `truth` row by row
    ///
    /// Row `i` belongs to `environments[env_of[i]]`, which is used only to
    /// classify the question. Rows without an environment are skipped.
    pub fn evaluate<T: Task + ?Sized>(
        task: &T,
        questions: &SymbolBatch,
        guesses: &SymbolBatch,
        truth: &SymbolBatch,
        environments: &[T::Environment],
        env_of: &[usize],
    ) -> Self {
        let mut report = Self::default();
        let rows = questions
            .rows()
            .zip(guesses.rows())
            .zip(truth.rows())
            .zip(env_of);

        for (((question, guess), answer), &env) in rows {
            let environment = match environments.get(env) {
                Some(environment) => environment,
                None => continue,
            };
            let correct = guess == answer;
            let idk = guess.iter().all(|&s| s == IDK);
            report
                .buckets
                .entry(task.classify(question, environment))
                .or_default()
                .record(correct, idk);
            report.overall.record(correct, idk);
        }
        report
    }

    /// Accuracy of one bucket, if any question fell into it
    pub fn accuracy(&self, bucket: &str) -> Option<f64> {
        self.buckets.get(bucket).map(BucketStats::accuracy)
    }
}

impl fmt::Display for AccuracyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (bucket, stats) in &self.buckets {
            writeln!(
                f,
                "{:>8}: {:5.1}% ({}/{}, {} idk)",
                bucket,
                stats.accuracy() * 100.0,
                stats.correct,
                stats.total,
                stats.idk
            )?;
        }
        write!(
            f,
            "{:>8}: {:5.1}% ({}/{}, {} idk)",
            "overall",
            self.overall.accuracy() * 100.0,
            self.overall.correct,
            self.overall.total,
            self.overall.idk
        )
    }
}

/// Multi-line rendering of one question, its sub-interactions and its answer
pub fn render_interaction<T: Task + ?Sized>(
    task: &T,
    question: &[Symbol],
    trace: &InteractionTrace,
    answer: &[Symbol],
) -> String {
    let mut out = format!("Q: {}\n", task.repr_row(question));
    for (subquestion, subanswer) in trace.pairs() {
        out.push_str(&format!(
            "  {} -> {}\n",
            task.repr_row(subquestion),
            task.repr_row(subanswer)
        ));
    }
    out.push_str(&format!("A: {}", task.repr_row(answer)));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::oracle::DirectOracle;
    use crate::core::scheduler::recursive_run;
    use crate::core::task::Difficulty;
    use crate::tasks::{SatConfig, SatTask};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_perfect_guesses_score_one() {
        let task = SatTask::new(&SatConfig::default()).unwrap();
        let mut rng = StdRng::seed_from_u64(12);
        let batch = task.sample_batch(3, 10, Difficulty::Level(0), &mut rng);

        let report = AccuracyReport::evaluate(
            &task,
            &batch.questions,
            &batch.truth,
            &batch.truth,
            &batch.environments,
            &batch.env_of,
        );
        assert_eq!(report.overall.total, 30);
        assert!((report.overall.accuracy() - 1.0).abs() < f64::EPSILON);
        assert!(report.buckets.keys().all(|k| k.starts_with("sat")));
    }

    #[test]
    fn test_idk_guesses_are_counted() {
        let task = SatTask::new(&SatConfig::default()).unwrap();
        let mut rng = StdRng::seed_from_u64(13);
        let batch = task.sample_batch(2, 5, Difficulty::Level(0), &mut rng);
        let guesses = SymbolBatch::idk(1, batch.questions.len());

        let report = AccuracyReport::evaluate(
            &task,
            &batch.questions,
            &guesses,
            &batch.truth,
            &batch.environments,
            &batch.env_of,
        );
        assert_eq!(report.overall.idk, 10);
        assert_eq!(report.overall.correct, 0);
        assert!(report.to_string().contains("overall"));
    }

    #[test]
    fn test_render_interaction() {
        let task = SatTask::new(&SatConfig {
            nvars: 2,
            length: 1,
            ..SatConfig::default()
        })
        .unwrap();
        let clauses = SymbolBatch::from_rows(2, [[task.names().first(), task.values().last()]])
            .unwrap();
        let env = crate::tasks::SatEnvironment::from_clauses(&task, clauses).unwrap();
        let questions = SymbolBatch::from_rows(2, [[crate::tasks::sat::WILD, task.values().first()]])
            .unwrap();

        let environments = [env];
        let env_of = [0];
        let mut oracle = DirectOracle::new(&task, &environments, &env_of);
        let output = recursive_run(&task, &questions, &mut oracle).unwrap();
        let text = render_interaction(
            &task,
            questions.row(0).unwrap(),
            &output.traces[0],
            output.answers.row(0).unwrap(),
        );

        assert_eq!(text, "Q: * 0\n  0 0 -> 0\n  1 0 -> 1\nA: 1");
    }
}
