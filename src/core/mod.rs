//! Decomposition core
//!
//! - `symbols`: alphabet allocation and fixed-width symbol batches
//! - `task`: the contract every decomposition task implements
//! - `procedure`: resumable single-question decomposition
//! - `scheduler`: lockstep batched recursive runs
//! - `oracle`: batch answerers and their compositions
//! - `report`: accuracy by bucket and trace rendering

pub mod oracle;
pub mod procedure;
pub mod report;
pub mod scheduler;
pub mod symbols;
pub mod task;

pub use oracle::{amplified, AmplifiedOracle, Deadline, DirectOracle, IdkOracle, Oracle, OracleError};
pub use procedure::{Decomposition, Procedure, ProcedureState, ProtocolError, Step};
pub use report::{render_interaction, AccuracyReport, BucketStats};
pub use scheduler::{
    recursive_run, ContractViolation, InteractionTrace, RecursiveRunner, RunOutput, RunnerConfig,
    SchedulerError, ViolationKind,
};
pub use symbols::{pad, Symbol, SymbolBatch, SymbolRange, Vocabulary, WidthMismatch, IDK};
pub use task::{
    random_incorrect_answer, Difficulty, InstanceBatch, Task, TaskShape, BASE_INSTANCE_SIZE,
};
