//! Unified error hierarchy for SitePulse
//!
//! Provides a structured error type system with an analysis sub-enum,
//! severity classification, and integration with the tracing system.

use thiserror::Error;

/// Top-level error type for all SitePulse operations
#[derive(Debug, Error)]
pub enum SitePulseError {
    /// Statistical analysis errors
    #[error("Analysis error: {0}")]
    Analysis(#[from] AnalysisError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors raised by the analysis core.
///
/// Per-user and per-group failures are local: callers record them in the
/// run's skip ledger and continue with the remaining users/groups. Only
/// `EmptyInput` is treated as fatal for a whole run.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AnalysisError {
    /// A user has no valid baseline (no working-hours samples)
    #[error("No baseline for user {user_id}: {reason}")]
    MissingBaseline { user_id: String, reason: String },

    /// Heart-rate reserve is zero or negative, classification undefined
    #[error("Degenerate heart-rate reserve for user {user_id}: {reserve:.1} bpm")]
    DegenerateReserve { user_id: String, reserve: f64 },

    /// Fewer samples/days than a statistical test requires
    #[error("Insufficient samples for {context}: needed {needed}, got {got}")]
    InsufficientSamples {
        context: String,
        needed: usize,
        got: usize,
    },

    /// An activity state has no outgoing transitions in a group
    #[error("No outgoing transitions from state {state} in group {group}")]
    EmptyTransition { group: String, state: String },

    /// Structurally fatal: nothing to analyze
    #[error("Empty input: {0}")]
    EmptyInput(String),
}

/// Result type alias for SitePulse operations
pub type Result<T> = std::result::Result<T, SitePulseError>;

impl SitePulseError {
    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            SitePulseError::Analysis(AnalysisError::EmptyInput(_)) => ErrorSeverity::Error,
            SitePulseError::Analysis(_) => ErrorSeverity::Warning,
            SitePulseError::Configuration(_) => ErrorSeverity::Error,
            SitePulseError::Io(_) => ErrorSeverity::Error,
            SitePulseError::Internal(_) => ErrorSeverity::Critical,
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            SitePulseError::Analysis(AnalysisError::MissingBaseline { user_id, .. }) => {
                format!(
                    "User {} has no working-hours data and was excluded from analysis.",
                    user_id
                )
            }
            SitePulseError::Analysis(AnalysisError::EmptyInput(what)) => {
                format!("No data to analyze: {}", what)
            }
            SitePulseError::Configuration(reason) => {
                format!("Invalid configuration: {}", reason)
            }
            _ => self.to_string(),
        }
    }
}

/// Error severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Critical system error requiring immediate attention
    Critical,
    /// Error that prevents operation but system can continue
    Error,
    /// Warning that doesn't prevent operation
    Warning,
}

impl ErrorSeverity {
    /// Convert to tracing level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            ErrorSeverity::Critical => tracing::Level::ERROR,
            ErrorSeverity::Error => tracing::Level::ERROR,
            ErrorSeverity::Warning => tracing::Level::WARN,
        }
    }
}
