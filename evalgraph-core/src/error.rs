// Copyright 2025 Sushanth (https://github.com/sushanthpy)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Error types for the evalgraph engine

use thiserror::Error;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EvalGraphError>;

/// Errors raised by the registry, the DAG and check execution.
///
/// Structural variants (`CyclicDependency`, `UnresolvedSignal`, `NameCollision`)
/// are always raised before any row is processed.
#[derive(Debug, Error)]
pub enum EvalGraphError {
    // Settings errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    // Registry errors
    #[error("Unknown operator type: {0}")]
    UnknownOperator(String),

    #[error("Operator type already registered with a different constructor: {0}")]
    DuplicateRegistration(String),

    #[error("Invalid parameters for {type_name}: {message}")]
    InvalidParameters { type_name: String, message: String },

    // Structural errors
    #[error("Cyclic dependency between operators: {}", .nodes.join(" -> "))]
    CyclicDependency { nodes: Vec<String> },

    #[error("Unresolved signal '{signal}' consumed by operator '{operator}'")]
    UnresolvedSignal { operator: String, signal: String },

    #[error("Name collision on '{name}': already declared by '{existing}', redeclared by '{incoming}'")]
    NameCollision {
        name: String,
        existing: String,
        incoming: String,
    },

    // Runtime errors
    #[error("Operator '{operator}' failed{}: {message}", .row.map(|r| format!(" at row {}", r)).unwrap_or_default())]
    OperatorRuntime {
        operator: String,
        row: Option<usize>,
        message: String,
    },

    #[error("Dataset shape error: {0}")]
    Shape(String),

    // IO errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl EvalGraphError {
    /// True for errors detected while building or resolving a graph.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            EvalGraphError::CyclicDependency { .. }
                | EvalGraphError::UnresolvedSignal { .. }
                | EvalGraphError::NameCollision { .. }
        )
    }
}

impl From<toml::de::Error> for EvalGraphError {
    fn from(e: toml::de::Error) -> Self {
        EvalGraphError::Configuration(format!("Invalid settings file: {}", e))
    }
}

/// Errors reported by an operator while it runs.
#[derive(Debug, Clone, Error)]
pub enum OperatorError {
    #[error("Missing column: {0}")]
    MissingColumn(String),

    #[error("Invalid row {row}: {message}")]
    InvalidRow { row: usize, message: String },

    #[error("LLM client error: {0}")]
    Llm(String),

    #[error("Operator not set up: {0}")]
    NotSetUp(String),

    #[error("Operator timed out")]
    Timeout,

    #[error("IO error: {0}")]
    Io(String),

    #[error("{0}")]
    Other(String),
}

impl OperatorError {
    /// The row this error is tied to, if any.
    pub fn row(&self) -> Option<usize> {
        match self {
            OperatorError::InvalidRow { row, .. } => Some(*row),
            _ => None,
        }
    }

    /// Errors that invalidate the whole invocation rather than one row.
    pub fn is_fatal(&self) -> bool {
        matches!(self, OperatorError::NotSetUp(_) | OperatorError::Timeout)
    }
}

impl From<std::io::Error> for OperatorError {
    fn from(e: std::io::Error) -> Self {
        OperatorError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for OperatorError {
    fn from(e: serde_json::Error) -> Self {
        OperatorError::Other(format!("JSON error: {}", e))
    }
}

impl From<csv::Error> for OperatorError {
    fn from(e: csv::Error) -> Self {
        OperatorError::Io(e.to_string())
    }
}

impl From<EvalGraphError> for OperatorError {
    fn from(e: EvalGraphError) -> Self {
        OperatorError::Other(e.to_string())
    }
}
