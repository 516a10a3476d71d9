//! Concrete Decomposition Tasks
//!
//! - `iterate`: powers of a random permutation, by repeated squaring
//! - `sat`: counting satisfying assignments of random clauses under a pattern
//!
//! Both are built from a serde-deserializable config; [`TaskConfig`] selects
//! one by name.

pub mod iterate;
pub mod sat;

pub use iterate::{IterConfig, IterEnvironment, IterLogic, IterTask};
pub use sat::{SatConfig, SatEnvironment, SatLogic, SatTask};

use crate::core::symbols::{Symbol, WidthMismatch};
use serde::{Deserialize, Serialize};

/// Invalid task configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A parameter is outside its allowed range
    InvalidValue {
        field: &'static str,
        value: usize,
        requirement: &'static str,
    },
    /// The task's alphabet would not fit in `Symbol`
    AlphabetOverflow { task: &'static str },
    /// No task by that name
    UnknownTask { name: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue {
                field,
                value,
                requirement,
            } => write!(f, "Invalid {}={}: must be {}", field, value, requirement),
            Self::AlphabetOverflow { task } => {
                write!(f, "Alphabet of task '{}' does not fit in 32-bit symbols", task)
            }
            Self::UnknownTask { name } => {
                write!(f, "Unknown task '{}' (expected iterate or sat)", name)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Fact rows that do not describe a valid environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FactError {
    /// A row has the wrong width
    Width(WidthMismatch),
    /// A symbol is outside the range its position allows
    InvalidSymbol {
        row: usize,
        position: usize,
        symbol: Symbol,
    },
    /// The same element appears twice where it must be unique
    Duplicate { row: usize },
    /// Mapped values are not a permutation of the mapped keys
    NotAPermutation,
    /// No rows at all
    Empty,
}

impl std::fmt::Display for FactError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Width(e) => write!(f, "{}", e),
            Self::InvalidSymbol {
                row,
                position,
                symbol,
            } => write!(
                f,
                "Fact row {} has invalid symbol {} at position {}",
                row, symbol, position
            ),
            Self::Duplicate { row } => write!(f, "Fact row {} repeats an earlier element", row),
            Self::NotAPermutation => write!(f, "Facts do not describe a permutation"),
            Self::Empty => write!(f, "No facts"),
        }
    }
}

impl std::error::Error for FactError {}

impl From<WidthMismatch> for FactError {
    fn from(e: WidthMismatch) -> Self {
        Self::Width(e)
    }
}

/// Which task to build, with its parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum TaskConfig {
    /// Permutation powers
    #[serde(alias = "iter")]
    Iterate(IterConfig),
    /// Satisfying-assignment counting
    Sat(SatConfig),
}

impl TaskConfig {
    /// Default configuration for the task called `name`
    pub fn from_name(name: &str) -> Result<Self, ConfigError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "iterate" | "iter" => Ok(Self::Iterate(IterConfig::default())),
            "sat" => Ok(Self::Sat(SatConfig::default())),
            _ => Err(ConfigError::UnknownTask {
                name: name.to_string(),
            }),
        }
    }

    /// Canonical task name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Iterate(_) => "iterate",
            Self::Sat(_) => "sat",
        }
    }
}

/// Render the `index`-th lowercase letter, falling back to `#index`
pub(crate) fn letter(index: usize) -> String {
    u8::try_from(index)
        .ok()
        .filter(|&i| i < 26)
        .map(|i| char::from(b'a' + i).to_string())
        .unwrap_or_else(|| format!("#{}", index))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_name_accepts_aliases() {
        assert_eq!(
            TaskConfig::from_name("iter").unwrap(),
            TaskConfig::Iterate(IterConfig::default())
        );
        assert_eq!(TaskConfig::from_name(" SAT ").unwrap().name(), "sat");
        assert!(matches!(
            TaskConfig::from_name("hanoi"),
            Err(ConfigError::UnknownTask { .. })
        ));
    }

    #[test]
    fn test_task_config_deserializes_with_defaults() {
        let config: TaskConfig = serde_json::from_str(r#"{"name":"iter","log_iters":3}"#).unwrap();
        match config {
            TaskConfig::Iterate(iter) => {
                assert_eq!(iter.log_iters, 3);
                assert_eq!(iter.nchars, 8);
            }
            other => panic!("unexpected config: {:?}", other),
        }

        let config: TaskConfig = serde_json::from_str(r#"{"name":"sat","size":20}"#).unwrap();
        assert_eq!(
            config,
            TaskConfig::Sat(SatConfig {
                size: Some(20),
                ..SatConfig::default()
            })
        );
    }

    #[test]
    fn test_letters() {
        assert_eq!(letter(0), "a");
        assert_eq!(letter(25), "z");
        assert_eq!(letter(26), "#26");
    }
}
