//! Symbols, Vocabularies and Fixed-Width Batches
//!
//! Every fact, question and answer is a fixed-length row of small integers
//! ("symbols") drawn from a per-task alphabet. Symbol `0` is reserved for
//! [`IDK`]; each task reserves a handful of fixed symbols right after it and
//! carves the rest of its alphabet into disjoint [`SymbolRange`]s with a
//! [`Vocabulary`].
//!
//! # Layout
//!
//! ```text
//! 0      1 .. reserved      next allocation ...
//! IDK    fixed symbols      [range A][range B][range C]
//! ```
//!
//! [`SymbolBatch`] stores rows in a canonical row-major buffer so a whole batch
//! of questions can be handed to an oracle in one call.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single alphabet entry
pub type Symbol = u32;

/// Reserved "I don't know" symbol: no answer, or an invalid one
pub const IDK: Symbol = 0;

/// A contiguous, allocated run of symbols
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SymbolRange {
    start: Symbol,
    len: u32,
}

impl SymbolRange {
    /// First symbol of the range
    pub fn first(&self) -> Symbol {
        self.start
    }

    /// Last symbol of the range (equal to `first` for a one-symbol range)
    pub fn last(&self) -> Symbol {
        self.start + self.len.saturating_sub(1)
    }

    /// Number of symbols in the range
    pub fn len(&self) -> usize {
        self.len as usize
    }

    /// Whether the range holds no symbols
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether `symbol` belongs to this range
    pub fn contains(&self, symbol: Symbol) -> bool {
        symbol >= self.start && symbol - self.start < self.len
    }

    /// The `index`-th symbol, if the range is long enough
    pub fn get(&self, index: usize) -> Option<Symbol> {
        if index < self.len as usize {
            Some(self.start + index as u32)
        } else {
            None
        }
    }

    /// Position of `symbol` within the range
    pub fn index_of(&self, symbol: Symbol) -> Option<usize> {
        if self.contains(symbol) {
            Some((symbol - self.start) as usize)
        } else {
            None
        }
    }

    /// Iterate the symbols of the range in order
    pub fn iter(&self) -> impl Iterator<Item = Symbol> + '_ {
        self.start..self.start + self.len
    }
}

/// Sequential symbol allocator owned by one task instance
///
/// Ranges are handed out once, during task construction, and never returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vocabulary {
    next: Symbol,
}

impl Vocabulary {
    /// Start allocating after `IDK` and `reserved` fixed symbols
    pub fn new(reserved: u32) -> Self {
        Self {
            next: IDK + 1 + reserved,
        }
    }

    /// Claim `n` previously unused consecutive symbols
    ///
    /// Returns `None` when the alphabet would overflow `Symbol`.
    pub fn allocate(&mut self, n: usize) -> Option<SymbolRange> {
        let len = u32::try_from(n).ok()?;
        let start = self.next;
        self.next = start.checked_add(len)?;
        Some(SymbolRange { start, len })
    }

    /// Total alphabet size so far, `IDK` and reserved symbols included
    pub fn size(&self) -> usize {
        self.next as usize
    }
}

/// Error raised when a row does not match a batch's width
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WidthMismatch {
    /// Width declared by the batch
    pub expected: usize,
    /// Width of the offending row
    pub actual: usize,
}

impl fmt::Display for WidthMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Row has width {}, batch expects {}",
            self.actual, self.expected
        )
    }
}

impl std::error::Error for WidthMismatch {}

/// Symbols reserved up front by [`SymbolBatch::with_capacity`]; larger batches grow on push
const PREALLOCATE_LIMIT: usize = 1 << 20;

/// Row-major matrix of symbols with a fixed row width
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawBatch")]
pub struct SymbolBatch {
    width: usize,
    data: Vec<Symbol>,
}

/// Wire form of [`SymbolBatch`], checked before it becomes one
#[derive(Deserialize)]
struct RawBatch {
    width: usize,
    data: Vec<Symbol>,
}

impl TryFrom<RawBatch> for SymbolBatch {
    type Error = WidthMismatch;

    fn try_from(raw: RawBatch) -> Result<Self, Self::Error> {
        let partial = match raw.width {
            0 => raw.data.len(),
            width => raw.data.len() % width,
        };
        if partial != 0 {
            return Err(WidthMismatch {
                expected: raw.width,
                actual: partial,
            });
        }
        Ok(Self {
            width: raw.width,
            data: raw.data,
        })
    }
}

impl SymbolBatch {
    /// Empty batch whose rows will have `width` symbols
    pub fn new(width: usize) -> Self {
        Self {
            width,
            data: Vec::new(),
        }
    }

    /// Empty batch with room for `rows` rows, up to a fixed preallocation limit
    pub fn with_capacity(width: usize, rows: usize) -> Self {
        let capacity = width
            .checked_mul(rows)
            .map_or(PREALLOCATE_LIMIT, |n| n.min(PREALLOCATE_LIMIT));
        Self {
            width,
            data: Vec::with_capacity(capacity),
        }
    }

    /// `rows` rows filled entirely with `IDK`
    pub fn idk(width: usize, rows: usize) -> Self {
        Self {
            width,
            data: vec![IDK; width.saturating_mul(rows)],
        }
    }

    /// Build a batch from individual rows, checking every width
    pub fn from_rows<R: AsRef<[Symbol]>>(
        width: usize,
        rows: impl IntoIterator<Item = R>,
    ) -> Result<Self, WidthMismatch> {
        let mut batch = Self::new(width);
        for row in rows {
            batch.push(row.as_ref())?;
        }
        Ok(batch)
    }

    /// Symbols per row
    pub fn width(&self) -> usize {
        self.width
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        if self.width == 0 {
            0
        } else {
            self.data.len() / self.width
        }
    }

    /// Whether the batch holds no rows
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Append a row
    pub fn push(&mut self, row: &[Symbol]) -> Result<(), WidthMismatch> {
        if row.len() != self.width {
            return Err(WidthMismatch {
                expected: self.width,
                actual: row.len(),
            });
        }
        self.data.extend_from_slice(row);
        Ok(())
    }

    /// Borrow row `index`
    pub fn row(&self, index: usize) -> Option<&[Symbol]> {
        let start = index.checked_mul(self.width)?;
        self.data.get(start..start + self.width)
    }

    /// Mutably borrow row `index`
    pub fn row_mut(&mut self, index: usize) -> Option<&mut [Symbol]> {
        let start = index.checked_mul(self.width)?;
        self.data.get_mut(start..start + self.width)
    }

    /// Overwrite row `index` with `row`
    pub fn set_row(&mut self, index: usize, row: &[Symbol]) -> Result<(), WidthMismatch> {
        if row.len() != self.width {
            return Err(WidthMismatch {
                expected: self.width,
                actual: row.len(),
            });
        }
        if let Some(slot) = self.row_mut(index) {
            slot.copy_from_slice(row);
        }
        Ok(())
    }

    /// Iterate rows in order
    pub fn rows(&self) -> impl Iterator<Item = &[Symbol]> + '_ {
        // chunks_exact panics on a zero chunk size; a zero-width batch has no rows
        self.data.chunks_exact(self.width.max(1))
    }

    /// Flat row-major view
    pub fn as_slice(&self) -> &[Symbol] {
        &self.data
    }

    /// Whether every symbol equals `IDK`
    pub fn is_all_idk(&self) -> bool {
        self.data.iter().all(|&s| s == IDK)
    }
}

/// Left-align `symbols` in a row of `width`, padding with `IDK`
///
/// Extra symbols beyond `width` are dropped.
pub fn pad(symbols: &[Symbol], width: usize) -> Vec<Symbol> {
    let mut row = vec![IDK; width];
    let n = symbols.len().min(width);
    row[..n].copy_from_slice(&symbols[..n]);
    row
}
