//! Unified error types for the gridscen crates
//!
//! [`GridError`] covers every failure the core can report: rejected
//! change-table arguments, dangling identifiers, invariant violations,
//! missing inputs and malformed cost curves. I/O-facing crates wrap it in
//! `anyhow::Error` at their boundaries.
//!
//! # Example
//!
//! ```ignore
//! use gridscen_core::{GridError, GridResult};
//!
//! fn check_factor(factor: f64) -> GridResult<()> {
//!     if factor < 0.0 {
//!         return Err(GridError::invalid("scaling factor must be non-negative"));
//!     }
//!     Ok(())
//! }
//! ```

use thiserror::Error;

use crate::diagnostics::Diagnostics;

/// Unified error type for grid construction and transformation.
#[derive(Error, Debug)]
pub enum GridError {
    /// I/O errors (file access, network, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Parsing/deserialization errors
    #[error("Parse error: {0}")]
    Parse(String),

    /// Wrong type or value: negative scaling, out-of-range share, unknown resource or key
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A referenced element is not part of the grid
    #[error("Unknown {kind}: {id}")]
    UnknownIdentifier { kind: &'static str, id: String },

    /// One or more grid invariants are violated; every violation is carried
    #[error("Topology violation ({count} issue(s)):\n{0}", count = .0.error_count())]
    Topology(Diagnostics),

    /// A required file, table or key is absent
    #[error("Missing input: {0}")]
    MissingInput(String),

    /// Cost curve cannot be linearized
    #[error("Malformed gencost: {0}")]
    MalformedGencost(String),

    /// Generic errors (for wrapping external errors)
    #[error("{0}")]
    Other(String),
}

/// Convenience type alias for Results using GridError.
pub type GridResult<T> = Result<T, GridError>;

impl GridError {
    pub fn invalid(message: impl Into<String>) -> Self {
        GridError::InvalidArgument(message.into())
    }

    pub fn unknown(kind: &'static str, id: impl ToString) -> Self {
        GridError::UnknownIdentifier {
            kind,
            id: id.to_string(),
        }
    }

    pub fn missing(message: impl Into<String>) -> Self {
        GridError::MissingInput(message.into())
    }
}

// Conversion from anyhow::Error
impl From<anyhow::Error> for GridError {
    fn from(err: anyhow::Error) -> Self {
        GridError::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GridError::unknown("plant", 42);
        assert_eq!(err.to_string(), "Unknown plant: 42");

        let err = GridError::invalid("factor must be non-negative");
        assert!(err.to_string().contains("Invalid argument"));
    }

    #[test]
    fn test_topology_error_lists_every_issue() {
        let mut diag = Diagnostics::new();
        diag.add_error("reference", "branch 3 references missing bus 9");
        diag.add_error("substation", "transformer 4 spans two substations");
        let err = GridError::Topology(diag);
        let text = err.to_string();
        assert!(text.contains("2 issue(s)"));
        assert!(text.contains("missing bus 9"));
        assert!(text.contains("two substations"));
    }

    #[test]
    fn test_anyhow_error_becomes_other() {
        let err: GridError = anyhow::anyhow!("zone table has no rows").into();
        assert!(matches!(err, GridError::Other(ref m) if m == "zone table has no rows"));
        assert_eq!(err.to_string(), "zone table has no rows");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: GridError = io_err.into();
        assert!(matches!(err, GridError::Io(_)));
    }

    #[test]
    fn test_question_mark_operator() {
        fn inner() -> GridResult<()> {
            Err(GridError::missing("bus.csv"))
        }

        fn outer() -> GridResult<()> {
            inner()?;
            Ok(())
        }

        assert!(matches!(outer(), Err(GridError::MissingInput(_))));
    }
}
