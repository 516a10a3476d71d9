//! Resumable Decomposition Procedures
//!
//! A decomposition procedure answers exactly one question. It either finishes
//! immediately or asks a sub-question and suspends until the caller resumes it
//! with the sub-answer:
//!
//! ```text
//!            start()                    resume(a)
//! Running ───────────▶ AwaitingSubanswer ─────────▶ AwaitingSubanswer ...
//!    │                        │
//!    └── Final ──▶ Done ◀─────┘ Final
//! ```
//!
//! Task-specific logic implements [`Decomposition`]; [`Procedure`] wraps it,
//! owns the state machine and rejects out-of-order calls with a
//! [`ProtocolError`]. Logic types never hold an environment, so the same
//! procedure runs unchanged against a ground-truth or a model oracle.

use super::symbols::Symbol;
use serde::{Deserialize, Serialize};

/// Outcome of advancing a procedure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Step {
    /// The procedure finished with this answer
    Final(Vec<Symbol>),
    /// The procedure needs this sub-question answered before it can continue
    NeedSubquestion(Vec<Symbol>),
}

impl Step {
    /// Whether this step terminates the procedure
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Final(_))
    }
}

/// Lifecycle state of a [`Procedure`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcedureState {
    /// Created, not yet started
    Running,
    /// Suspended on a sub-question
    AwaitingSubanswer,
    /// Finished; no further calls allowed
    Done,
}

impl std::fmt::Display for ProcedureState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::AwaitingSubanswer => write!(f, "awaiting_subanswer"),
            Self::Done => write!(f, "done"),
        }
    }
}

/// Usage errors: a caller drove a procedure out of order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// `start` called on a procedure that already started
    AlreadyStarted { state: ProcedureState },
    /// `resume` called outside `AwaitingSubanswer`
    ResumeOutOfState { state: ProcedureState },
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlreadyStarted { state } => {
                write!(f, "Procedure already started (state: {})", state)
            }
            Self::ResumeOutOfState { state } => {
                write!(
                    f,
                    "Procedure resumed in state {}, expected awaiting_subanswer",
                    state
                )
            }
        }
    }
}

impl std::error::Error for ProtocolError {}

/// Task-specific decomposition logic
///
/// Implementations validate their question in [`begin`](Self::begin) and
/// answer `IDK` for malformed questions or sub-answers instead of failing.
pub trait Decomposition: Send {
    /// Run until the first sub-question or the final answer
    fn begin(&mut self) -> Step;

    /// Consume a sub-answer and run until the next sub-question or the final answer
    fn advance(&mut self, subanswer: &[Symbol]) -> Step;
}

/// State machine driving one [`Decomposition`]
#[derive(Debug, Clone)]
pub struct Procedure<D> {
    logic: D,
    state: ProcedureState,
    asked: usize,
}

impl<D: Decomposition> Procedure<D> {
    /// Wrap fresh decomposition logic
    pub fn new(logic: D) -> Self {
        Self {
            logic,
            state: ProcedureState::Running,
            asked: 0,
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> ProcedureState {
        self.state
    }

    /// Sub-questions requested so far
    pub fn subquestions_asked(&self) -> usize {
        self.asked
    }

    /// Begin execution
    pub fn start(&mut self) -> Result<Step, ProtocolError> {
        if self.state != ProcedureState::Running {
            return Err(ProtocolError::AlreadyStarted { state: self.state });
        }
        let step = self.logic.begin();
        Ok(self.transition(step))
    }

    /// Feed the answer to the pending sub-question back in
    pub fn resume(&mut self, subanswer: &[Symbol]) -> Result<Step, ProtocolError> {
        if self.state != ProcedureState::AwaitingSubanswer {
            return Err(ProtocolError::ResumeOutOfState { state: self.state });
        }
        let step = self.logic.advance(subanswer);
        Ok(self.transition(step))
    }

    fn transition(&mut self, step: Step) -> Step {
        match &step {
            Step::Final(_) => self.state = ProcedureState::Done,
            Step::NeedSubquestion(_) => {
                self.asked += 1;
                self.state = ProcedureState::AwaitingSubanswer;
            }
        }
        step
    }
}
