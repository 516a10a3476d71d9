//! Counting Satisfying Assignments
//!
//! An environment is a random set of clauses over `nvars` variables, each
//! clause a disjunction of `length` `variable = value` literals. A question is
//! a pattern with one entry per variable, either a value or the wildcard; the
//! answer is the number of satisfying assignments matching the pattern,
//! encoded as a signed "difference" symbol.
//!
//! ```text
//! fact       a 1 b 0 a 0        (a=1 ∨ b=0 ∨ a=0)
//! question   1 * 0 * * *
//! answer     12
//! ```
//!
//! The decomposition splits on the first wildcard: the count of a pattern is
//! the sum of the counts with that wildcard replaced by each value. Patterns
//! without wildcards are delegated unchanged.

use super::{letter, ConfigError, FactError};
use crate::core::procedure::{Decomposition, Procedure, Step};
use crate::core::symbols::{Symbol, SymbolBatch, SymbolRange, Vocabulary, WidthMismatch, IDK};
use crate::core::task::{Difficulty, Task, TaskShape};
use rand::seq::index;
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};

/// Wildcard matching any value
pub const WILD: Symbol = 1;

const RESERVED: u32 = 1;

/// Clause cap applied when the config leaves `size` unset
pub const UNSIZED_CLAUSE_LIMIT: usize = 1 << 16;

/// Parameters of the counting task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SatConfig {
    /// Literals per clause
    #[serde(default = "default_length")]
    pub length: usize,

    /// Upper bound on clauses per environment ([`UNSIZED_CLAUSE_LIMIT`] when absent)
    #[serde(default)]
    pub size: Option<usize>,

    /// Number of variables
    #[serde(default = "default_nvars")]
    pub nvars: usize,

    /// Values each variable can take
    #[serde(default = "default_nvalues")]
    pub nvalues: usize,
}

fn default_length() -> usize {
    3
}

fn default_nvars() -> usize {
    6
}

fn default_nvalues() -> usize {
    2
}

impl Default for SatConfig {
    fn default() -> Self {
        Self {
            length: default_length(),
            size: None,
            nvars: default_nvars(),
            nvalues: default_nvalues(),
        }
    }
}

impl SatConfig {
    /// Check parameter ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.nvalues < 2 {
            return Err(ConfigError::InvalidValue {
                field: "nvalues",
                value: self.nvalues,
                requirement: "at least 2",
            });
        }
        // splitting one wildcard asks nvalues sub-questions out of nvars slots
        if self.nvars < self.nvalues {
            return Err(ConfigError::InvalidValue {
                field: "nvars",
                value: self.nvars,
                requirement: "at least nvalues",
            });
        }
        if self.length == 0 {
            return Err(ConfigError::InvalidValue {
                field: "length",
                value: self.length,
                requirement: "at least 1",
            });
        }
        Ok(())
    }
}

/// The satisfying-assignment counting task
#[derive(Debug, Clone)]
pub struct SatTask {
    length: usize,
    nvars: usize,
    names: SymbolRange,
    values: SymbolRange,
    differences: SymbolRange,
    zero: Symbol,
    max_d: usize,
    all_clauses: usize,
    max_clauses: usize,
    vocab_size: usize,
}

impl SatTask {
    /// Build the task, allocating its alphabet
    pub fn new(config: &SatConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let overflow = ConfigError::AlphabetOverflow { task: "sat" };

        let max_d = u32::try_from(config.nvars)
            .ok()
            .and_then(|nvars| config.nvalues.checked_pow(nvars))
            .ok_or_else(|| overflow.clone())?;

        let mut vocab = Vocabulary::new(RESERVED);
        let names = vocab
            .allocate(config.nvars)
            .ok_or_else(|| overflow.clone())?;
        let values = vocab
            .allocate(config.nvalues)
            .ok_or_else(|| overflow.clone())?;
        let differences = max_d
            .checked_mul(2)
            .and_then(|d| d.checked_add(1))
            .and_then(|n| vocab.allocate(n))
            .ok_or_else(|| overflow.clone())?;
        let zero = differences.get(max_d).ok_or(overflow)?;

        // clauses are sampled by index, so every clause code must fit in usize
        let all_clauses = u32::try_from(config.length)
            .ok()
            .zip(config.nvars.checked_mul(config.nvalues))
            .and_then(|(length, literals)| literals.checked_pow(length))
            .ok_or(ConfigError::InvalidValue {
                field: "length",
                value: config.length,
                requirement: "small enough that (nvars*nvalues)^length fits in memory",
            })?;
        let max_clauses = config
            .size
            .unwrap_or(UNSIZED_CLAUSE_LIMIT)
            .min(all_clauses);

        Ok(Self {
            length: config.length,
            nvars: config.nvars,
            names,
            values,
            differences,
            zero,
            max_d,
            all_clauses,
            max_clauses,
            vocab_size: vocab.size(),
        })
    }

    /// Symbols naming the variables
    pub fn names(&self) -> SymbolRange {
        self.names
    }

    /// Symbols for variable values
    pub fn values(&self) -> SymbolRange {
        self.values
    }

    /// Largest representable count
    pub fn max_count(&self) -> usize {
        self.max_d
    }

    /// Largest number of clauses in an environment
    pub fn max_clauses(&self) -> usize {
        self.max_clauses
    }

    /// Answer symbol for `count`, clamped to `[-max_d, max_d]`
    pub fn encode_count(&self, count: i64) -> Symbol {
        encode(self.zero, self.max_d as i64, count)
    }

    /// Count encoded by `symbol`
    pub fn decode_count(&self, symbol: Symbol) -> Option<i64> {
        self.differences
            .contains(symbol)
            .then(|| i64::from(symbol) - i64::from(self.zero))
    }

    /// Whether `pattern` has one value-or-wildcard entry per variable
    pub fn is_pattern(&self, pattern: &[Symbol]) -> bool {
        pattern.len() == self.nvars
            && pattern
                .iter()
                .all(|&s| s == WILD || self.values.contains(s))
    }

    /// The `code`-th clause in lexicographic (variable, value) order
    fn clause(&self, mut code: usize) -> Vec<Symbol> {
        let nvalues = self.values.len();
        let radix = self.nvars * nvalues;
        let mut clause = vec![IDK; 2 * self.length];
        for literal in clause.chunks_exact_mut(2).rev() {
            let digit = code % radix;
            code /= radix;
            literal[0] = self.names.get(digit / nvalues).unwrap_or(IDK);
            literal[1] = self.values.get(digit % nvalues).unwrap_or(IDK);
        }
        clause
    }

    /// The `code`-th complete assignment, one value symbol per variable
    fn assignment(&self, mut code: usize) -> Vec<Symbol> {
        let nvalues = self.values.len();
        let mut assignment = vec![IDK; self.nvars];
        for slot in assignment.iter_mut().rev() {
            *slot = self.values.get(code % nvalues).unwrap_or(IDK);
            code /= nvalues;
        }
        assignment
    }

    fn satisfies(&self, assignment: &[Symbol], clause: &[Symbol]) -> bool {
        clause.chunks_exact(2).any(|literal| {
            self.names
                .index_of(literal[0])
                .and_then(|var| assignment.get(var))
                .map_or(false, |&value| value == literal[1])
        })
    }

    fn environment(&self, clauses: SymbolBatch) -> SatEnvironment {
        let mut assignments = SymbolBatch::new(self.nvars);
        for code in 0..self.max_d {
            let assignment = self.assignment(code);
            if clauses.rows().all(|clause| self.satisfies(&assignment, clause)) {
                let _ = assignments.push(&assignment);
            }
        }
        SatEnvironment {
            clauses,
            assignments,
        }
    }
}

fn encode(zero: Symbol, max_d: i64, count: i64) -> Symbol {
    let shifted = i64::from(zero) + count.clamp(-max_d, max_d);
    // zero - max_d is the first difference symbol, so this never underflows
    shifted as Symbol
}

/// Clauses with every satisfying assignment precomputed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SatEnvironment {
    clauses: SymbolBatch,
    assignments: SymbolBatch,
}

impl SatEnvironment {
    /// Environment for explicit clause rows `[var, value, var, value, ...]`
    pub fn from_clauses(task: &SatTask, clauses: SymbolBatch) -> Result<Self, FactError> {
        if clauses.width() != 2 * task.length {
            return Err(FactError::Width(WidthMismatch {
                expected: 2 * task.length,
                actual: clauses.width(),
            }));
        }
        for (row, clause) in clauses.rows().enumerate() {
            for (position, &symbol) in clause.iter().enumerate() {
                let range = if position % 2 == 0 {
                    task.names
                } else {
                    task.values
                };
                if !range.contains(symbol) {
                    return Err(FactError::InvalidSymbol {
                        row,
                        position,
                        symbol,
                    });
                }
            }
        }
        Ok(task.environment(clauses))
    }

    /// Clause rows, which are also the environment's facts
    pub fn clauses(&self) -> &SymbolBatch {
        &self.clauses
    }

    /// Every satisfying assignment
    pub fn assignments(&self) -> &SymbolBatch {
        &self.assignments
    }

    /// Satisfying assignments matching `pattern`
    pub fn count_matching(&self, pattern: &[Symbol]) -> usize {
        self.assignments
            .rows()
            .filter(|assignment| {
                assignment
                    .iter()
                    .zip(pattern)
                    .all(|(&value, &p)| p == WILD || p == value)
            })
            .count()
    }
}

impl Task for SatTask {
    type Environment = SatEnvironment;
    type Logic = SatLogic;

    fn name(&self) -> &str {
        "sat"
    }

    fn shape(&self) -> TaskShape {
        TaskShape {
            question_length: self.nvars,
            answer_length: 1,
            fact_length: 2 * self.length,
            interaction_length: self.nvars,
            vocab_size: self.vocab_size,
        }
    }

    fn make_environment(
        &self,
        difficulty: Difficulty,
        rng: &mut dyn RngCore,
    ) -> (SymbolBatch, SatEnvironment) {
        let count = difficulty.instance_size(self.max_clauses);
        let mut clauses = SymbolBatch::with_capacity(2 * self.length, count);
        for code in index::sample(&mut *rng, self.all_clauses, count).into_iter() {
            let _ = clauses.push(&self.clause(code));
        }
        let environment = self.environment(clauses);
        (environment.clauses.clone(), environment)
    }

    fn sample_question(&self, _environment: &SatEnvironment, rng: &mut dyn RngCore) -> Vec<Symbol> {
        let mut question: Vec<Symbol> = (0..self.nvars)
            .map(|_| {
                self.values
                    .get(rng.gen_range(0..self.values.len()))
                    .unwrap_or(WILD)
            })
            .collect();
        let wilds = rng.gen_range(1..=self.nvars);
        for position in index::sample(&mut *rng, self.nvars, wilds).into_iter() {
            question[position] = WILD;
        }
        question
    }

    fn direct_answer(&self, questions: &SymbolBatch, environment: &SatEnvironment) -> SymbolBatch {
        let mut answers = SymbolBatch::idk(1, questions.len());
        for (row, question) in questions.rows().enumerate() {
            if self.is_pattern(question) {
                let count = environment.count_matching(question) as i64;
                let _ = answers.set_row(row, &[self.encode_count(count)]);
            }
        }
        answers
    }

    fn decompose(&self, question: &[Symbol]) -> Procedure<SatLogic> {
        Procedure::new(SatLogic {
            question: question.to_vec(),
            nvars: self.nvars,
            values: self.values,
            differences: self.differences,
            zero: self.zero,
            max_d: self.max_d as i64,
            split: None,
        })
    }

    fn classify(&self, question: &[Symbol], _environment: &SatEnvironment) -> String {
        format!("sat{}", question.iter().filter(|&&s| s == WILD).count())
    }

    fn answer_ranges(&self) -> Vec<SymbolRange> {
        vec![self.differences]
    }

    fn is_simple(&self, question: &[Symbol]) -> bool {
        self.is_pattern(question) && !question.contains(&WILD)
    }

    fn all_questions(&self, _environment: &SatEnvironment) -> SymbolBatch {
        let radix = self.values.len() + 1;
        let total = u32::try_from(self.nvars)
            .ok()
            .and_then(|nvars| radix.checked_pow(nvars))
            .unwrap_or(usize::MAX);

        let mut questions = SymbolBatch::new(self.nvars);
        let mut pattern = vec![WILD; self.nvars];
        for mut code in 0..total {
            for slot in pattern.iter_mut().rev() {
                let digit = code % radix;
                code /= radix;
                *slot = match digit {
                    0 => WILD,
                    d => self.values.get(d - 1).unwrap_or(WILD),
                };
            }
            let _ = questions.push(&pattern);
        }
        questions
    }

    fn repr_symbol(&self, symbol: Symbol) -> String {
        if symbol == IDK {
            return "?".to_string();
        }
        if symbol == WILD {
            return "*".to_string();
        }
        if let Some(count) = self.decode_count(symbol) {
            return count.to_string();
        }
        if let Some(i) = self.names.index_of(symbol) {
            return letter(i);
        }
        match self.values.index_of(symbol) {
            Some(i) => i.to_string(),
            None => format!("<{}>", symbol),
        }
    }

    fn repr_row(&self, row: &[Symbol]) -> String {
        row.iter()
            .map(|&s| self.repr_symbol(s))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Progress of a wildcard split
#[derive(Debug, Clone, Copy)]
struct Split {
    position: usize,
    next_value: usize,
    total: i64,
}

/// Wildcard-splitting decomposition of one counting question
#[derive(Debug, Clone)]
pub struct SatLogic {
    question: Vec<Symbol>,
    nvars: usize,
    values: SymbolRange,
    differences: SymbolRange,
    zero: Symbol,
    max_d: i64,
    /// `None` while the whole question is delegated
    split: Option<Split>,
}

impl SatLogic {
    fn ask(&mut self) -> Step {
        let split = match self.split.as_mut() {
            Some(split) => split,
            None => return Step::Final(vec![IDK]),
        };
        match self.values.get(split.next_value) {
            Some(value) => {
                split.next_value += 1;
                let mut subquestion = self.question.clone();
                subquestion[split.position] = value;
                Step::NeedSubquestion(subquestion)
            }
            None => Step::Final(vec![encode(self.zero, self.max_d, split.total)]),
        }
    }
}

impl Decomposition for SatLogic {
    fn begin(&mut self) -> Step {
        let valid = self.question.len() == self.nvars
            && self
                .question
                .iter()
                .all(|&s| s == WILD || self.values.contains(s));
        if !valid {
            return Step::Final(vec![IDK]);
        }

        match self.question.iter().position(|&s| s == WILD) {
            None => Step::NeedSubquestion(self.question.clone()),
            Some(position) => {
                self.split = Some(Split {
                    position,
                    next_value: 0,
                    total: 0,
                });
                self.ask()
            }
        }
    }

    fn advance(&mut self, subanswer: &[Symbol]) -> Step {
        let count = match subanswer {
            [d] if self.differences.contains(*d) => *d,
            _ => return Step::Final(vec![IDK]),
        };
        match self.split.as_mut() {
            None => Step::Final(vec![count]),
            Some(split) => {
                split.total += i64::from(count) - i64::from(self.zero);
                self.ask()
            }
        }
    }
}
