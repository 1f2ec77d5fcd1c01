//! Centralized error handling for the preparation pipeline.
//!
//! Every stage reports failures through [`PipelineError`]. The variants split
//! into two groups:
//!
//! - **Invariant violations** raised by execution stages
//!   ([`PipelineError::SourceNotFound`], [`PipelineError::ContractViolation`],
//!   [`PipelineError::ScopeIntegrity`], [`PipelineError::StructuralInvariant`],
//!   [`PipelineError::MappingCoverage`],
//!   [`PipelineError::RepresentationInconsistency`],
//!   [`PipelineError::UnknownCategory`]).
//! - **Ambient failures** such as I/O, Polars or configuration errors.
//!
//! Each variant maps to a stable invariant name via
//! [`PipelineError::invariant`], which the orchestrator surfaces together with
//! the last consistent audit record.
//!
//! ## The `From` Trait for Error Conversion
//!
//! ```no_run
//! use churnprep::error::Result;
//! use std::fs;
//!
//! fn read_contract(path: &str) -> Result<String> {
//!     // std::io::Error converts into PipelineError::Io
//!     let content = fs::read_to_string(path)?;
//!     Ok(content)
//! }
//! ```
//!
//! ## Context Extension Trait
//!
//! ```no_run
//! use churnprep::error::ResultExt as _;
//! use std::fs;
//!
//! fn load_plan() -> churnprep::error::Result<String> {
//!     let text = fs::read_to_string("plan.yaml").context("Failed to load run plan")?;
//!     Ok(text)
//! }
//! ```

use std::fmt;

/// Main error type for pipeline operations.
#[derive(Debug)]
pub enum PipelineError {
    /// No unambiguous raw source could be resolved
    SourceNotFound(String),

    /// A declared contract column or target is absent from the data
    ContractViolation(String),

    /// The target leaked into the feature scope, or a column outside the
    /// feature scope was handed to a transformation
    ScopeIntegrity(String),

    /// Row or column counts drifted where none was expected
    StructuralInvariant(String),

    /// The target mapping does not cover every observed target value
    MappingCoverage {
        missing: Vec<String>,
    },

    /// Train and test representations disagree after transformation
    RepresentationInconsistency(String),

    /// A value outside the fitted categories reached a strict encoder
    UnknownCategory {
        column: String,
        value: String,
    },

    /// A decision is missing a required field or declares an unknown strategy
    Decision(String),

    /// A stage was invoked out of order
    StageOrder(String),

    /// The target audit gate blocked downstream execution
    TargetGate(String),

    /// I/O errors (file operations)
    Io(std::io::Error),

    /// Data processing errors (Polars, parsing, etc.)
    DataProcessing(String),

    /// Configuration errors (contract, plan and settings documents)
    Config(String),

    /// Generic error with context
    Other(String),
}

impl PipelineError {
    /// Stable name of the invariant (or failure class) this error reports.
    pub fn invariant(&self) -> &'static str {
        match self {
            Self::SourceNotFound(_) => "source-resolution",
            Self::ContractViolation(_) => "contract-columns-present",
            Self::ScopeIntegrity(_) => "target-isolation",
            Self::StructuralInvariant(_) => "shape-preserved",
            Self::MappingCoverage { .. } => "mapping-coverage",
            Self::RepresentationInconsistency(_) => "train-test-feature-parity",
            Self::UnknownCategory { .. } => "known-categories",
            Self::Decision(_) => "explicit-decision",
            Self::StageOrder(_) => "stage-order",
            Self::TargetGate(_) => "target-gate",
            Self::Io(_) => "io",
            Self::DataProcessing(_) => "data-processing",
            Self::Config(_) => "configuration",
            Self::Other(_) => "unclassified",
        }
    }

    /// True for the invariant-violation family raised by execution stages.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            Self::SourceNotFound(_)
                | Self::ContractViolation(_)
                | Self::ScopeIntegrity(_)
                | Self::StructuralInvariant(_)
                | Self::MappingCoverage { .. }
                | Self::RepresentationInconsistency(_)
                | Self::UnknownCategory { .. }
        )
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SourceNotFound(msg) => write!(f, "Source not found: {msg}"),
            Self::ContractViolation(msg) => write!(f, "Contract violation: {msg}"),
            Self::ScopeIntegrity(msg) => write!(f, "Scope integrity violation: {msg}"),
            Self::StructuralInvariant(msg) => write!(f, "Structural invariant violated: {msg}"),
            Self::MappingCoverage { missing } => write!(
                f,
                "Target mapping does not cover observed values: {}",
                missing.join(", ")
            ),
            Self::RepresentationInconsistency(msg) => {
                write!(f, "Representation inconsistency: {msg}")
            }
            Self::UnknownCategory { column, value } => {
                write!(f, "Column '{column}' has a category not seen during fit: {value}")
            }
            Self::Decision(msg) => write!(f, "Invalid decision: {msg}"),
            Self::StageOrder(msg) => write!(f, "Stage order violation: {msg}"),
            Self::TargetGate(msg) => write!(f, "Target gate blocked execution: {msg}"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::DataProcessing(msg) => write!(f, "Data processing error: {msg}"),
            Self::Config(msg) => write!(f, "Configuration error: {msg}"),
            Self::Other(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<anyhow::Error> for PipelineError {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Config(format!("JSON error: {err}"))
    }
}

impl From<serde_yaml::Error> for PipelineError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Config(format!("YAML error: {err}"))
    }
}

impl From<polars::error::PolarsError> for PipelineError {
    fn from(err: polars::error::PolarsError) -> Self {
        Self::DataProcessing(err.to_string())
    }
}

impl From<ndarray::ShapeError> for PipelineError {
    fn from(err: ndarray::ShapeError) -> Self {
        Self::DataProcessing(format!("matrix shape error: {err}"))
    }
}

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Extension trait to add context to results.
///
/// Invariant violations keep their variant so the orchestrator can still name
/// them; every other error is folded into [`PipelineError::Other`].
pub trait ResultExt<T> {
    /// Add context to an error.
    fn context(self, msg: impl Into<String>) -> Result<T>;

    /// Add context using a closure (lazy evaluation).
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<PipelineError>,
{
    fn context(self, msg: impl Into<String>) -> Result<T> {
        self.map_err(|e| wrap(e.into(), msg.into()))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| wrap(e.into(), f()))
    }
}

fn wrap(err: PipelineError, msg: String) -> PipelineError {
    if err.is_invariant_violation() {
        err
    } else {
        PipelineError::Other(format!("{msg}: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PipelineError::ContractViolation("column 'tenure' not found".to_owned());
        assert_eq!(
            err.to_string(),
            "Contract violation: column 'tenure' not found"
        );
    }

    #[test]
    fn test_mapping_coverage_lists_values() {
        let err = PipelineError::MappingCoverage {
            missing: vec!["maybe".to_owned(), "unknown".to_owned()],
        };
        assert_eq!(err.invariant(), "mapping-coverage");
        assert!(err.to_string().contains("maybe, unknown"));
    }

    #[test]
    fn test_result_context() {
        let result: std::result::Result<(), std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "plan.yaml",
        ));

        let result: Result<()> = result.context("Failed to read plan");
        let err = result.unwrap_err();
        assert!(err.to_string().contains("Failed to read plan"));
        assert_eq!(err.invariant(), "unclassified");
    }

    #[test]
    fn test_context_keeps_invariant_variant() {
        let result: Result<()> = Err(PipelineError::ScopeIntegrity("Exited".to_owned()));
        let err = result.context("split").unwrap_err();
        assert_eq!(err.invariant(), "target-isolation");
    }
}
