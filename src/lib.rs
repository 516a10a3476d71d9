//! Amplify - Recursive Question Answering by Decomposition
//!
//! A question about a hidden environment is answered either directly, by an
//! oracle that knows the environment, or by decomposing it into a bounded
//! number of simpler sub-questions answered one level down. Levels compose:
//!
//! ```text
//! question ─▶ RecursiveRunner ─▶ AmplifiedOracle ─▶ ... ─▶ DirectOracle
//!                 │
//!                 └─▶ answers + fixed-shape interaction traces
//! ```
//!
//! - **Procedures**: one resumable state machine per question
//! - **Scheduler**: drives a whole batch in lockstep, one oracle call per round
//! - **Tasks**: permutation powers and satisfying-assignment counting
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use amplify::core::{recursive_run, Difficulty, DirectOracle, Task};
//! use amplify::tasks::{IterConfig, IterTask};
//! use rand::SeedableRng;
//!
//! let task = IterTask::new(&IterConfig::default()).unwrap();
//! let mut rng = rand::rngs::StdRng::seed_from_u64(0);
//! let batch = task.sample_batch(4, 8, Difficulty::Level(0), &mut rng);
//!
//! let mut oracle = DirectOracle::new(&task, &batch.environments, &batch.env_of);
//! let output = recursive_run(&task, &batch.questions, &mut oracle).unwrap();
//! assert_eq!(output.answers, batch.truth);
//! ```

pub mod core;
pub mod events;
pub mod tasks;

// Re-export commonly used items at crate root
pub use core::{
    recursive_run, AmplifiedOracle, DirectOracle, Oracle, OracleError, RecursiveRunner, RunOutput,
    SchedulerError, SymbolBatch, Task,
};
pub use events::observers::{LoggingObserver, MetricsObserver};
pub use events::{AmplifyEvent, EventBus};
pub use tasks::{IterTask, SatTask, TaskConfig};
