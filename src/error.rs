//! Error types for the solving session

use std::path::PathBuf;
use thiserror::Error;

use crate::expr::ExprId;

/// Errors surfaced by the solving core
///
/// Only `Config` is fatal. Everything else is reported and the session keeps
/// processing the rest of the trace.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Bad output directory or unreadable input file
    #[error("configuration error: {message} ({})", path.display())]
    Config { path: PathBuf, message: String },

    /// Failure while writing a test case
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A back-reference pointed at a parent that no longer holds the expected child
    #[error("graph inconsistency: parent {parent} does not reference child {child}")]
    GraphInconsistency { parent: ExprId, child: ExprId },

    /// Neither a signed nor an unsigned interval form exists for a tracked value
    #[error("no range constraint derivable for {node}: {rendered}")]
    RangeDerivation { node: ExprId, rendered: String },

    /// The trace reported an outcome that contradicts a constant condition
    #[error("branch outcome {taken} contradicts constant condition {value}")]
    TraceMismatch { value: bool, taken: bool },

    /// A branch condition that is not a predicate
    #[error("branch condition {node} is not boolean: {rendered}")]
    NonBooleanCondition { node: ExprId, rendered: String },

    /// The accumulated path constraints are not jointly satisfiable
    #[error("infeasible path constraints ({count} asserted)")]
    Infeasible { count: usize },
}

impl SessionError {
    pub fn config(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        SessionError::Config {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Whether this error must terminate the process
    pub fn is_fatal(&self) -> bool {
        matches!(self, SessionError::Config { .. })
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
