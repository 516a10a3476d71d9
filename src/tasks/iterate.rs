//! Permutation Powers
//!
//! An environment is a random permutation σ over a subset of the words of
//! `length` characters. A question asks for σⁿ(x): `length` characters of `x`
//! followed by `log_iters` binary digits of `n`, most significant first.
//!
//! ```text
//! question   a b 0 1 1 0 1 0      x = "ab", n = 26
//! fact       a b c a              σ("ab") = "ca"
//! answer     c a
//! ```
//!
//! The decomposition squares: σⁿ(x) = σ^(n mod 2)(σ^(n>>1)(σ^(n>>1)(x))), so
//! every question needs at most three sub-questions, each with a smaller
//! exponent. Exponents 0 and 1 are delegated unchanged.

use super::{letter, ConfigError, FactError};
use crate::core::procedure::{Decomposition, Procedure, Step};
use crate::core::symbols::{pad, Symbol, SymbolBatch, SymbolRange, Vocabulary, IDK};
use crate::core::task::{Difficulty, Task, TaskShape};
use rand::seq::{index, SliceRandom};
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Binary digit 0
pub const ZERO: Symbol = 1;
/// Binary digit 1
pub const ONE: Symbol = 2;

const RESERVED: u32 = 2;
const INTERACTION_LENGTH: usize = 3;
const MAX_LOG_ITERS: usize = 32;

/// Parameters of the permutation task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterConfig {
    /// Characters in the alphabet
    #[serde(default = "default_nchars")]
    pub nchars: usize,

    /// Characters per permuted word
    #[serde(default = "default_length")]
    pub length: usize,

    /// Binary digits of the exponent
    #[serde(default = "default_log_iters")]
    pub log_iters: usize,
}

fn default_nchars() -> usize {
    8
}

fn default_length() -> usize {
    2
}

fn default_log_iters() -> usize {
    6
}

impl Default for IterConfig {
    fn default() -> Self {
        Self {
            nchars: default_nchars(),
            length: default_length(),
            log_iters: default_log_iters(),
        }
    }
}

impl IterConfig {
    /// Check parameter ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.nchars == 0 {
            return Err(ConfigError::InvalidValue {
                field: "nchars",
                value: self.nchars,
                requirement: "at least 1",
            });
        }
        if self.length == 0 {
            return Err(ConfigError::InvalidValue {
                field: "length",
                value: self.length,
                requirement: "at least 1",
            });
        }
        if !(2..=MAX_LOG_ITERS).contains(&self.log_iters) {
            return Err(ConfigError::InvalidValue {
                field: "log_iters",
                value: self.log_iters,
                requirement: "between 2 and 32",
            });
        }
        Ok(())
    }
}

/// The permutation-power task
#[derive(Debug, Clone)]
pub struct IterTask {
    length: usize,
    log_iters: usize,
    chars: SymbolRange,
    max_size: usize,
    vocab_size: usize,
}

impl IterTask {
    /// Build the task, allocating its alphabet
    pub fn new(config: &IterConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let mut vocab = Vocabulary::new(RESERVED);
        let chars = vocab
            .allocate(config.nchars)
            .ok_or(ConfigError::AlphabetOverflow { task: "iterate" })?;
        let max_size = u32::try_from(config.length)
            .ok()
            .and_then(|length| config.nchars.checked_pow(length))
            .ok_or(ConfigError::InvalidValue {
                field: "length",
                value: config.length,
                requirement: "small enough that nchars^length fits in memory",
            })?;

        Ok(Self {
            length: config.length,
            log_iters: config.log_iters,
            chars,
            max_size,
            vocab_size: vocab.size(),
        })
    }

    /// Symbols usable as word characters
    pub fn chars(&self) -> SymbolRange {
        self.chars
    }

    /// Characters per word
    pub fn word_length(&self) -> usize {
        self.length
    }

    /// Binary digits per exponent
    pub fn log_iters(&self) -> usize {
        self.log_iters
    }

    /// Number of distinct words, the largest possible permutation
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Whether `word` is `length` valid characters
    pub fn is_word(&self, word: &[Symbol]) -> bool {
        word.len() == self.length && word.iter().all(|&s| self.chars.contains(s))
    }

    /// Question asking for σⁿ(`word`)
    ///
    /// Returns `None` if `word` is not a word or `n` needs more than
    /// `log_iters` digits.
    pub fn question(&self, word: &[Symbol], n: u64) -> Option<Vec<Symbol>> {
        if !self.is_word(word) || (self.log_iters < 64 && n >> self.log_iters != 0) {
            return None;
        }
        let mut question = word.to_vec();
        question.extend(self.exponent_digits(n));
        Some(question)
    }

    fn exponent_digits(&self, n: u64) -> impl Iterator<Item = Symbol> + '_ {
        (0..self.log_iters).rev().map(move |bit| {
            if bit < 64 && (n >> bit) & 1 == 1 {
                ONE
            } else {
                ZERO
            }
        })
    }

    /// The `code`-th word in lexicographic order
    fn word(&self, mut code: usize) -> Vec<Symbol> {
        let nchars = self.chars.len();
        let mut word = vec![IDK; self.length];
        for slot in word.iter_mut().rev() {
            *slot = self.chars.get(code % nchars).unwrap_or(IDK);
            code /= nchars;
        }
        word
    }

    fn split<'q>(&self, question: &'q [Symbol]) -> Option<(&'q [Symbol], &'q [Symbol])> {
        if question.len() != self.length + self.log_iters {
            return None;
        }
        Some(question.split_at(self.length))
    }
}

/// Random permutation with precomputed power-of-two iterates
///
/// Words are stored once; `squares[k][i]` is the index of σ^(2^k) applied to
/// word `i`.
#[derive(Debug, Clone)]
pub struct IterEnvironment {
    words: SymbolBatch,
    index: HashMap<Vec<Symbol>, usize>,
    squares: Vec<Vec<usize>>,
}

impl IterEnvironment {
    fn build(words: SymbolBatch, successor: Vec<usize>, log_iters: usize) -> Self {
        let index = words
            .rows()
            .enumerate()
            .map(|(i, word)| (word.to_vec(), i))
            .collect();

        let mut squares = Vec::with_capacity(log_iters);
        squares.push(successor);
        while squares.len() < log_iters {
            let last = &squares[squares.len() - 1];
            let squared: Vec<usize> = last.iter().map(|&i| last[i]).collect();
            squares.push(squared);
        }

        Self {
            words,
            index,
            squares,
        }
    }

    /// Environment for an explicit permutation given as `[x, σ(x)]` fact rows
    pub fn from_mapping(task: &IterTask, facts: &SymbolBatch) -> Result<Self, FactError> {
        if facts.width() != 2 * task.length {
            return Err(FactError::Width(crate::core::symbols::WidthMismatch {
                expected: 2 * task.length,
                actual: facts.width(),
            }));
        }
        if facts.is_empty() {
            return Err(FactError::Empty);
        }

        let mut words = SymbolBatch::with_capacity(task.length, facts.len());
        let mut index: HashMap<&[Symbol], usize> = HashMap::new();
        for (row, fact) in facts.rows().enumerate() {
            if let Some(position) = fact.iter().position(|&s| !task.chars.contains(s)) {
                return Err(FactError::InvalidSymbol {
                    row,
                    position,
                    symbol: fact[position],
                });
            }
            let word = &fact[..task.length];
            if index.insert(word, row).is_some() {
                return Err(FactError::Duplicate { row });
            }
            words.push(word)?;
        }

        let mut successor = Vec::with_capacity(facts.len());
        let mut seen = vec![false; facts.len()];
        for fact in facts.rows() {
            let image = index
                .get(&fact[task.length..])
                .copied()
                .ok_or(FactError::NotAPermutation)?;
            if std::mem::replace(&mut seen[image], true) {
                return Err(FactError::NotAPermutation);
            }
            successor.push(image);
        }

        Ok(Self::build(words, successor, task.log_iters))
    }

    /// Number of permuted words
    pub fn size(&self) -> usize {
        self.words.len()
    }

    /// The permuted words, in fact order
    pub fn words(&self) -> &SymbolBatch {
        &self.words
    }

    /// Fact rows `[x, σ(x)]`
    pub fn facts(&self) -> SymbolBatch {
        let width = 2 * self.words.width();
        let mut facts = SymbolBatch::with_capacity(width, self.size());
        for (word, &image) in self.words.rows().zip(&self.squares[0]) {
            let mut row = word.to_vec();
            row.extend_from_slice(self.words.row(image).unwrap_or_default());
            let _ = facts.push(&row);
        }
        facts
    }

    /// σⁿ(`word`) for exponent digits `digits` (most significant first)
    ///
    /// `None` if `word` is not permuted or a digit is not binary.
    pub fn power(&self, word: &[Symbol], digits: &[Symbol]) -> Option<&[Symbol]> {
        let mut current = *self.index.get(word)?;
        for (i, &digit) in digits.iter().enumerate() {
            match digit {
                ONE => {
                    let square = self.squares.get(digits.len() - 1 - i)?;
                    current = square[current];
                }
                ZERO => {}
                _ => return None,
            }
        }
        self.words.row(current)
    }
}

impl Task for IterTask {
    type Environment = IterEnvironment;
    type Logic = IterLogic;

    fn name(&self) -> &str {
        "iterate"
    }

    fn shape(&self) -> TaskShape {
        TaskShape {
            question_length: self.length + self.log_iters,
            answer_length: self.length,
            fact_length: 2 * self.length,
            interaction_length: INTERACTION_LENGTH,
            vocab_size: self.vocab_size,
        }
    }

    fn make_environment(
        &self,
        difficulty: Difficulty,
        rng: &mut dyn RngCore,
    ) -> (SymbolBatch, IterEnvironment) {
        let size = difficulty.instance_size(self.max_size);

        let mut words = SymbolBatch::with_capacity(self.length, size);
        for code in index::sample(&mut *rng, self.max_size, size).into_iter() {
            let _ = words.push(&self.word(code));
        }

        let mut successor: Vec<usize> = (0..size).collect();
        successor.shuffle(&mut *rng);

        let environment = IterEnvironment::build(words, successor, self.log_iters);
        (environment.facts(), environment)
    }

    fn sample_question(&self, environment: &IterEnvironment, rng: &mut dyn RngCore) -> Vec<Symbol> {
        let width = self.length + self.log_iters;
        if environment.size() == 0 {
            return vec![IDK; width];
        }
        let word = environment
            .words
            .row(rng.gen_range(0..environment.size()))
            .unwrap_or_default();

        // leading one anywhere but the last digit, random digits after it
        let leading = rng.gen_range(0..self.log_iters - 1);
        let mut question = word.to_vec();
        for digit in 0..self.log_iters {
            let symbol = match digit.cmp(&leading) {
                std::cmp::Ordering::Less => ZERO,
                std::cmp::Ordering::Equal => ONE,
                std::cmp::Ordering::Greater => {
                    if rng.gen_bool(0.5) {
                        ONE
                    } else {
                        ZERO
                    }
                }
            };
            question.push(symbol);
        }
        question
    }

    fn direct_answer(&self, questions: &SymbolBatch, environment: &IterEnvironment) -> SymbolBatch {
        let mut answers = SymbolBatch::idk(self.length, questions.len());
        for (row, question) in questions.rows().enumerate() {
            let answer = self
                .split(question)
                .and_then(|(word, digits)| environment.power(word, digits));
            if let Some(answer) = answer {
                let _ = answers.set_row(row, answer);
            }
        }
        answers
    }

    fn decompose(&self, question: &[Symbol]) -> Procedure<IterLogic> {
        Procedure::new(IterLogic {
            question: question.to_vec(),
            length: self.length,
            log_iters: self.log_iters,
            chars: self.chars,
            word: Vec::new(),
            exponents: Vec::new(),
            next: 0,
        })
    }

    fn classify(&self, question: &[Symbol], _environment: &IterEnvironment) -> String {
        let leading = question
            .get(self.length..)
            .and_then(|digits| digits.iter().position(|&d| d == ONE));
        match leading {
            Some(position) => format!("iter{}", self.log_iters - position),
            None => "iter0".to_string(),
        }
    }

    fn answer_ranges(&self) -> Vec<SymbolRange> {
        vec![self.chars; self.length]
    }

    fn is_simple(&self, question: &[Symbol]) -> bool {
        match self.split(question) {
            Some((_, digits)) => digits[..digits.len() - 1].iter().all(|&d| d == ZERO),
            None => false,
        }
    }

    fn all_questions(&self, environment: &IterEnvironment) -> SymbolBatch {
        let exponents = 1u64 << self.log_iters;
        let mut questions = SymbolBatch::new(self.length + self.log_iters);
        for word in environment.words.rows() {
            for n in 0..exponents {
                if let Some(question) = self.question(word, n) {
                    let _ = questions.push(&question);
                }
            }
        }
        questions
    }

    fn repr_symbol(&self, symbol: Symbol) -> String {
        match symbol {
            IDK => "?".to_string(),
            ZERO => "0".to_string(),
            ONE => "1".to_string(),
            s => match self.chars.index_of(s) {
                Some(i) => letter(i),
                None => format!("<{}>", s),
            },
        }
    }
}

/// Repeated-squaring decomposition of one permutation-power question
#[derive(Debug, Clone)]
pub struct IterLogic {
    question: Vec<Symbol>,
    length: usize,
    log_iters: usize,
    chars: SymbolRange,
    word: Vec<Symbol>,
    /// Exponent digits still to apply; empty when the question is delegated whole
    exponents: Vec<Vec<Symbol>>,
    next: usize,
}

impl IterLogic {
    fn is_word(&self, word: &[Symbol]) -> bool {
        word.len() == self.length && word.iter().all(|&s| self.chars.contains(s))
    }

    fn fail(&self) -> Step {
        Step::Final(pad(&[], self.length))
    }

    fn ask_next(&mut self) -> Step {
        match self.exponents.get(self.next) {
            Some(digits) => {
                self.next += 1;
                let mut subquestion = self.word.clone();
                subquestion.extend_from_slice(digits);
                Step::NeedSubquestion(subquestion)
            }
            None => Step::Final(self.word.clone()),
        }
    }
}

impl Decomposition for IterLogic {
    fn begin(&mut self) -> Step {
        if self.question.len() != self.length + self.log_iters {
            return self.fail();
        }
        let (word, digits) = self.question.split_at(self.length);
        if !self.is_word(word) || !digits.iter().all(|&d| d == ZERO || d == ONE) {
            return self.fail();
        }

        if digits[..self.log_iters - 1].iter().all(|&d| d == ZERO) {
            return Step::NeedSubquestion(self.question.clone());
        }

        // n >> 1: drop the last digit, shift a zero in at the front
        let mut half = Vec::with_capacity(self.log_iters);
        half.push(ZERO);
        half.extend_from_slice(&digits[..self.log_iters - 1]);

        let odd = digits[self.log_iters - 1] == ONE;
        self.word = word.to_vec();
        self.exponents = vec![half.clone(), half];
        if odd {
            let mut one = vec![ZERO; self.log_iters];
            one[self.log_iters - 1] = ONE;
            self.exponents.push(one);
        }
        self.ask_next()
    }

    fn advance(&mut self, subanswer: &[Symbol]) -> Step {
        if !self.is_word(subanswer) {
            return self.fail();
        }
        self.word = subanswer.to_vec();
        if self.exponents.is_empty() {
            return Step::Final(self.word.clone());
        }
        self.ask_next()
    }
}
