//! Amplify CLI - explore, check and stress decomposition tasks from the shell
//!
//! Every command builds a task from its name (or a JSON config file), samples
//! environments with a seeded RNG and drives the recursive scheduler against a
//! ground-truth oracle, optionally wrapped in amplification levels.

use amplify::core::{
    amplified, render_interaction, AccuracyReport, Difficulty, DirectOracle, RecursiveRunner,
    RunOutput, RunnerConfig, SchedulerError, SymbolBatch, Task,
};
use amplify::events::observers::{LoggingObserver, MetricsObserver};
use amplify::events::{AmplifyEvent, EventBus};
use amplify::tasks::{IterTask, SatTask, TaskConfig};
use clap::{Args, Parser, Subcommand, ValueEnum};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

/// Amplify CLI - recursive question answering over synthetic tasks
#[derive(Parser)]
#[command(name = "amplify-cli")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Output format
    #[arg(short, long, value_enum, default_value = "text", global = true)]
    format: OutputFormat,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Print Prometheus metrics to stderr after the command
    #[arg(long, global = true)]
    metrics: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Output format for CLI responses
#[derive(Clone, Copy, ValueEnum, Default)]
enum OutputFormat {
    /// Human-readable text output
    #[default]
    Text,
    /// JSON output for programmatic use
    Json,
}

/// Task selection shared by every command
#[derive(Args, Clone)]
struct TaskArgs {
    /// Task name (iterate, sat)
    #[arg(short, long, default_value = "iterate")]
    task: String,

    /// JSON task config file (overrides --task)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Difficulty level (omit for the largest instances)
    #[arg(short, long)]
    difficulty: Option<usize>,

    /// RNG seed
    #[arg(short, long, default_value = "0")]
    seed: u64,
}

#[derive(Subcommand)]
enum Commands {
    /// Sample instances and print questions with their decompositions
    Explore {
        #[command(flatten)]
        task: TaskArgs,

        /// Number of environments
        #[arg(short, long, default_value = "2")]
        nbatch: usize,

        /// Questions per environment
        #[arg(short = 'q', long, default_value = "3")]
        nqs: usize,

        /// Amplification levels wrapped around the ground-truth oracle
        #[arg(short, long, default_value = "0")]
        levels: usize,
    },

    /// Compare recursive answers with direct answers
    Check {
        #[command(flatten)]
        task: TaskArgs,

        /// Number of environments
        #[arg(short, long, default_value = "20")]
        instances: usize,

        /// Questions per environment
        #[arg(short = 'q', long, default_value = "30")]
        nqs: usize,

        /// Amplification levels wrapped around the ground-truth oracle
        #[arg(short, long, default_value = "0")]
        levels: usize,

        /// Check every question of each environment instead of sampling
        #[arg(long)]
        exhaustive: bool,
    },

    /// Corrupt ground-truth answers and report the observed error rate
    Inject {
        #[command(flatten)]
        task: TaskArgs,

        /// Number of environments
        #[arg(short, long, default_value = "1000")]
        nbatch: usize,

        /// Questions per environment
        #[arg(short = 'q', long, default_value = "1")]
        nqs: usize,

        /// Probability of corrupting each answer
        #[arg(short, long, default_value = "0.3")]
        probability: f64,
    },
}

// ============================================================================
// Response Types
// ============================================================================

#[derive(Serialize)]
struct InteractionView {
    rendered: String,
    truth: String,
    correct: bool,
}

#[derive(Serialize)]
struct InstanceView {
    facts: Vec<String>,
    interactions: Vec<InteractionView>,
}

#[derive(Serialize)]
struct ExploreResponse {
    task: String,
    seed: u64,
    levels: usize,
    rounds: usize,
    instances: Vec<InstanceView>,
    accuracy: AccuracyReport,
    run: RunOutput,
}

#[derive(Serialize)]
struct Mismatch {
    instance: usize,
    question: String,
    recursive: String,
    direct: String,
}

#[derive(Serialize)]
struct CheckResponse {
    task: String,
    instances: usize,
    questions: usize,
    levels: usize,
    max_rounds: usize,
    mismatches: Vec<Mismatch>,
    env_ms_mean: f64,
    direct_us_per_question: f64,
    recursive_us_per_question: f64,
}

#[derive(Serialize)]
struct InjectResponse {
    task: String,
    rows: usize,
    injected: usize,
    probability: f64,
    observed_rate: f64,
    shapes_preserved: bool,
    injected_changed: bool,
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .with_writer(io::stderr)
        .init();

    let bus = EventBus::with_default_capacity();
    let mut observers = Observers::new(&bus);

    let result = match cli.command {
        Commands::Explore {
            task,
            nbatch,
            nqs,
            levels,
        } => execute_explore(cli.format, &task, nbatch, nqs, levels, &bus, &mut observers),
        Commands::Check {
            task,
            instances,
            nqs,
            levels,
            exhaustive,
        } => execute_check(
            cli.format,
            &task,
            instances,
            nqs,
            levels,
            exhaustive,
            &bus,
            &mut observers,
        ),
        Commands::Inject {
            task,
            nbatch,
            nqs,
            probability,
        } => execute_inject(cli.format, &task, nbatch, nqs, probability, &bus, &mut observers),
    };

    observers.drain();
    if cli.metrics {
        eprintln!("{}", observers.prometheus());
    }

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// Logging and metrics subscribers fed synchronously between runs
struct Observers {
    logging: LoggingObserver,
    metrics: MetricsObserver,
}

impl Observers {
    fn new(bus: &EventBus) -> Self {
        Self {
            logging: LoggingObserver::new(bus),
            metrics: MetricsObserver::new(bus),
        }
    }

    fn drain(&mut self) {
        self.logging.drain();
        self.metrics.drain();
    }

    fn prometheus(&self) -> String {
        let metrics = self.metrics.metrics();
        let guard = match metrics.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.to_prometheus()
    }
}

/// Build the selected task and bind it to `$task` for `$body`
macro_rules! with_task {
    ($args:expr, |$task:ident| $body:expr) => {
        match load_task_config($args)? {
            TaskConfig::Iterate(config) => {
                let $task = IterTask::new(&config).map_err(|e| e.to_string())?;
                $body
            }
            TaskConfig::Sat(config) => {
                let $task = SatTask::new(&config).map_err(|e| e.to_string())?;
                $body
            }
        }
    };
}

fn load_task_config(args: &TaskArgs) -> Result<TaskConfig, String> {
    match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
            serde_json::from_str(&text)
                .map_err(|e| format!("Invalid task config {}: {}", path.display(), e))
        }
        None => TaskConfig::from_name(&args.task).map_err(|e| e.to_string()),
    }
}

fn difficulty(args: &TaskArgs) -> Difficulty {
    args.difficulty
        .map(Difficulty::Level)
        .unwrap_or(Difficulty::Unbounded)
}

fn runner_for<'a, T: Task>(task: &'a T, bus: &EventBus) -> RecursiveRunner<'a, T> {
    RecursiveRunner::with_config(task, RunnerConfig::default()).with_event_emitter(bus.emitter())
}

/// Keep the padded output of a run that broke the contract, failing otherwise
fn settle_run(result: Result<RunOutput, SchedulerError>) -> Result<RunOutput, String> {
    match result {
        Ok(output) => Ok(output),
        Err(e) => {
            tracing::warn!(error = %e, "Run finished with errors");
            e.output().cloned().ok_or_else(|| e.to_string())
        }
    }
}

// ============================================================================
// Explore
// ============================================================================

fn execute_explore(
    format: OutputFormat,
    args: &TaskArgs,
    nbatch: usize,
    nqs: usize,
    levels: usize,
    bus: &EventBus,
    observers: &mut Observers,
) -> Result<(), String> {
    let response = with_task!(args, |task| explore(&task, args, nbatch, nqs, levels, bus)?);
    observers.drain();

    match format {
        OutputFormat::Json => output_response(format, &response),
        OutputFormat::Text => {
            for (i, instance) in response.instances.iter().enumerate() {
                println!("=== Instance {} ===", i);
                println!("Facts:");
                for fact in &instance.facts {
                    println!("  {}", fact);
                }
                for interaction in &instance.interactions {
                    println!();
                    println!("{}", interaction.rendered);
                    if !interaction.correct {
                        println!("   (expected {})", interaction.truth);
                    }
                }
                println!();
            }
            println!("Rounds: {}", response.rounds);
            println!("{}", response.accuracy);
            Ok(())
        }
    }
}

fn explore<T: Task>(
    task: &T,
    args: &TaskArgs,
    nbatch: usize,
    nqs: usize,
    levels: usize,
    bus: &EventBus,
) -> Result<ExploreResponse, String> {
    let mut rng = StdRng::seed_from_u64(args.seed);
    let batch = task.sample_batch(nbatch, nqs, difficulty(args), &mut rng);

    let direct = DirectOracle::new(task, &batch.environments, &batch.env_of);
    let mut oracle = amplified(task, direct, levels);
    let output = settle_run(runner_for(task, bus).run(&batch.questions, &mut *oracle))?;

    let accuracy = AccuracyReport::evaluate(
        task,
        &batch.questions,
        &output.answers,
        &batch.truth,
        &batch.environments,
        &batch.env_of,
    );

    let mut instances: Vec<InstanceView> = batch
        .facts
        .iter()
        .map(|facts| InstanceView {
            facts: facts.rows().map(|row| task.repr_row(row)).collect(),
            interactions: Vec::new(),
        })
        .collect();

    for (row, &env) in batch.env_of.iter().enumerate() {
        let (question, answer, truth) = match (
            batch.questions.row(row),
            output.answers.row(row),
            batch.truth.row(row),
        ) {
            (Some(q), Some(a), Some(t)) => (q, a, t),
            _ => continue,
        };
        if let Some(instance) = instances.get_mut(env) {
            instance.interactions.push(InteractionView {
                rendered: render_interaction(task, question, &output.traces[row], answer),
                truth: task.repr_row(truth),
                correct: answer == truth,
            });
        }
    }

    Ok(ExploreResponse {
        task: task.name().to_string(),
        seed: args.seed,
        levels,
        rounds: output.rounds,
        instances,
        accuracy,
        run: output,
    })
}

// ============================================================================
// Check
// ============================================================================

#[allow(clippy::too_many_arguments)]
fn execute_check(
    format: OutputFormat,
    args: &TaskArgs,
    instances: usize,
    nqs: usize,
    levels: usize,
    exhaustive: bool,
    bus: &EventBus,
    observers: &mut Observers,
) -> Result<(), String> {
    let response = with_task!(args, |task| check(
        &task, args, instances, nqs, levels, exhaustive, bus, observers
    )?);

    output_response(format, &response)?;
    if response.mismatches.is_empty() {
        Ok(())
    } else {
        Err(format!(
            "{} of {} recursive answers differ from direct answers",
            response.mismatches.len(),
            response.questions
        ))
    }
}

#[allow(clippy::too_many_arguments)]
fn check<T: Task>(
    task: &T,
    args: &TaskArgs,
    instances: usize,
    nqs: usize,
    levels: usize,
    exhaustive: bool,
    bus: &EventBus,
    observers: &mut Observers,
) -> Result<CheckResponse, String> {
    let mut rng = StdRng::seed_from_u64(args.seed);
    let runner = runner_for(task, bus);

    let mut mismatches = Vec::new();
    let mut questions_total = 0;
    let mut max_rounds = 0;
    let mut env_ms = 0.0;
    let mut direct_us = 0.0;
    let mut recursive_us = 0.0;

    for instance in 0..instances {
        let started = Instant::now();
        let (_facts, environment) = task.make_environment(difficulty(args), &mut rng);
        env_ms += started.elapsed().as_secs_f64() * 1e3;

        let questions: SymbolBatch = if exhaustive {
            task.all_questions(&environment)
        } else {
            task.sample_questions(&environment, nqs, &mut rng)
        };
        questions_total += questions.len();

        let started = Instant::now();
        let truth = task.direct_answer(&questions, &environment);
        direct_us += started.elapsed().as_secs_f64() * 1e6;

        let environments = [environment];
        let env_of = vec![0; questions.len()];
        let direct = DirectOracle::new(task, &environments, &env_of);
        let mut oracle = amplified(task, direct, levels);

        let started = Instant::now();
        let output = settle_run(runner.run(&questions, &mut *oracle))?;
        recursive_us += started.elapsed().as_secs_f64() * 1e6;
        max_rounds = max_rounds.max(output.rounds);

        let rows = questions
            .rows()
            .zip(output.answers.rows())
            .zip(truth.rows());
        for ((question, recursive), direct) in rows {
            if recursive != direct {
                mismatches.push(Mismatch {
                    instance,
                    question: task.repr_row(question),
                    recursive: task.repr_row(recursive),
                    direct: task.repr_row(direct),
                });
            }
        }
        observers.drain();
    }

    let per_question = |total: f64| {
        if questions_total == 0 {
            0.0
        } else {
            total / questions_total as f64
        }
    };

    Ok(CheckResponse {
        task: task.name().to_string(),
        instances,
        questions: questions_total,
        levels,
        max_rounds,
        mismatches,
        env_ms_mean: if instances == 0 {
            0.0
        } else {
            env_ms / instances as f64
        },
        direct_us_per_question: per_question(direct_us),
        recursive_us_per_question: per_question(recursive_us),
    })
}

// ============================================================================
// Inject
// ============================================================================

fn execute_inject(
    format: OutputFormat,
    args: &TaskArgs,
    nbatch: usize,
    nqs: usize,
    probability: f64,
    bus: &EventBus,
    observers: &mut Observers,
) -> Result<(), String> {
    if !(0.0..=1.0).contains(&probability) {
        return Err(format!(
            "Invalid probability {}: must be between 0 and 1",
            probability
        ));
    }

    let response = with_task!(args, |task| inject(&task, args, nbatch, nqs, probability, bus));
    observers.drain();
    output_response(format, &response)
}

fn inject<T: Task>(
    task: &T,
    args: &TaskArgs,
    nbatch: usize,
    nqs: usize,
    probability: f64,
    bus: &EventBus,
) -> InjectResponse {
    let mut rng = StdRng::seed_from_u64(args.seed);
    let batch = task.sample_batch(nbatch, nqs, difficulty(args), &mut rng);

    let mut rows = 0;
    let mut injected = 0;
    let mut shapes_preserved = true;
    let mut injected_changed = true;

    for (env, environment) in batch.environments.iter().enumerate() {
        let mut truth = SymbolBatch::with_capacity(batch.truth.width(), nqs);
        for (row, _) in batch.env_of.iter().enumerate().filter(|&(_, &e)| e == env) {
            if let Some(answer) = batch.truth.row(row) {
                let _ = truth.push(answer);
            }
        }

        let mut answers = truth.clone();
        let count = task.inject_errors(&mut answers, environment, probability, &mut rng);
        let changed = truth
            .rows()
            .zip(answers.rows())
            .filter(|(before, after)| before != after)
            .count();

        // corrupted rows always differ from the truth
        injected_changed &= changed == count;
        shapes_preserved &= answers.len() == truth.len() && answers.width() == truth.width();
        rows += truth.len();
        injected += count;
    }

    bus.emit(AmplifyEvent::errors_injected(
        task.name(),
        rows,
        injected,
        probability,
    ));

    InjectResponse {
        task: task.name().to_string(),
        rows,
        injected,
        probability,
        observed_rate: if rows == 0 {
            0.0
        } else {
            injected as f64 / rows as f64
        },
        shapes_preserved,
        injected_changed,
    }
}

// ============================================================================
// Output Helpers
// ============================================================================

fn output_response<T: Serialize>(format: OutputFormat, response: &T) -> Result<(), String> {
    let rendered = match format {
        OutputFormat::Json => serde_json::to_string_pretty(response),
        OutputFormat::Text => serde_json::to_value(response).map(|value| {
            let mut out = String::new();
            render_text(&value, 0, &mut out);
            out.trim_end().to_string()
        }),
    }
    .map_err(|e| format!("Failed to serialize response: {}", e))?;
    println!("{}", rendered);
    Ok(())
}

/// Flatten a report into indented `label: value` lines; nested values get their own block
fn render_text(value: &serde_json::Value, depth: usize, out: &mut String) {
    use serde_json::Value;

    let entries: Vec<(String, &Value)> = match value {
        Value::Object(fields) => fields.iter().map(|(k, v)| (k.clone(), v)).collect(),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, v)| (format!("[{}]", i), v))
            .collect(),
        scalar => {
            out.push_str(&format!("{:width$}{}\n", "", scalar_text(scalar), width = depth * 2));
            return;
        }
    };

    let in_list = value.is_array();
    for (label, child) in entries {
        let pad = depth * 2;
        if child.is_object() || child.is_array() {
            out.push_str(&format!("{:pad$}{}:\n", "", label, pad = pad));
            render_text(child, depth + 1, out);
        } else if in_list {
            out.push_str(&format!("{:pad$}- {}\n", "", scalar_text(child), pad = pad));
        } else {
            out.push_str(&format!("{:pad$}{}: {}\n", "", label, scalar_text(child), pad = pad));
        }
    }
}

fn scalar_text(value: &serde_json::Value) -> String {
    value
        .as_str()
        .map(str::to_string)
        .unwrap_or_else(|| value.to_string())
}
