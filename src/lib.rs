// Library interface for SitePulse modules
// This allows integration tests to access the core functionality

pub mod activity;
pub mod baseline;
pub mod breaks;
pub mod config;
pub mod correlation;
pub mod error;
pub mod hypothesis;
pub mod logging;
pub mod markov;
pub mod models;
pub mod peaks;
pub mod pipeline;
pub mod variance;

// Re-export commonly used types for convenience
pub use models::*;
pub use activity::ActivityClassifier;
pub use baseline::{BaselineEstimator, BaselineTable};
pub use breaks::BreakDetector;
pub use config::{AnalysisConfig, OutlierMethod};
pub use error::{AnalysisError, Result, SitePulseError};
pub use hypothesis::{kruskal_wallis, mann_whitney_u, TimeBucketComparator};
pub use logging::{LogConfig, LogFormat, LogLevel};
pub use markov::{TransitionEngine, TransitionModel};
pub use peaks::PeakDetector;
pub use pipeline::{AnalysisPipeline, AnalysisReport};
