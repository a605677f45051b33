use anyhow::{Context, Result};
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Immutable analysis configuration.
///
/// Every component takes the parameters it needs at construction; there is
/// no process-wide mutable state. Loaded from TOML or built from defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Baseline estimation parameters
    pub baseline: BaselineSettings,

    /// Activity classification thresholds
    pub activity: ActivityThresholds,

    /// Break detection parameters
    pub breaks: BreakSettings,

    /// Peak detection parameters
    pub peaks: PeakSettings,

    /// Group statistics and hypothesis testing parameters
    pub stats: StatsSettings,

    /// Working-hours window used for time-of-day bucketing
    pub working_hours: WorkingHours,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            baseline: BaselineSettings::default(),
            activity: ActivityThresholds::default(),
            breaks: BreakSettings::default(),
            peaks: PeakSettings::default(),
            stats: StatsSettings::default(),
            working_hours: WorkingHours::default(),
        }
    }
}

/// Baseline estimation parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaselineSettings {
    /// Percentile of working-hours heart rate used as resting HR (0-100)
    pub resting_hr_percentile: f64,

    /// Max heart rate when age is unknown (otherwise 220 - age)
    pub fallback_max_hr: f64,

    /// Lower bound of the plausible heart-rate range, anchors the stress
    /// score rescaling
    pub min_hr: f64,
}

impl Default for BaselineSettings {
    fn default() -> Self {
        Self {
            resting_hr_percentile: 5.0,
            fallback_max_hr: 180.0,
            min_hr: 40.0,
        }
    }
}

/// Reserve-fraction cutoffs for activity classification.
///
/// Ascending: f <= sedentary -> sedentary, f <= light -> light,
/// f <= moderate -> moderate, else intense.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityThresholds {
    pub sedentary: f64,
    pub light: f64,
    pub moderate: f64,
}

impl Default for ActivityThresholds {
    fn default() -> Self {
        Self {
            sedentary: 0.20,
            light: 0.40,
            moderate: 0.70,
        }
    }
}

/// Break detection parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakSettings {
    /// Trailing moving-average window (samples) for smoothing
    pub smoothing_window: usize,

    /// Smoothed first-difference magnitude that opens/closes a break
    pub stress_drop: f64,

    /// Minimum wall-clock duration (minutes) for a segment to qualify
    pub min_duration_minutes: f64,
}

impl Default for BreakSettings {
    fn default() -> Self {
        Self {
            smoothing_window: 5,
            stress_drop: 20.0,
            min_duration_minutes: 10.0,
        }
    }
}

/// Peak detection parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeakSettings {
    /// Minimum peak prominence (stress-score units)
    pub prominence: f64,

    /// Minimum width at half prominence (samples)
    pub min_width: f64,

    /// Recovery is reached when stress returns to within this fraction of
    /// (peak - pre-peak baseline) above the baseline
    pub recovery_fraction: f64,
}

impl Default for PeakSettings {
    fn default() -> Self {
        Self {
            prominence: 20.0,
            min_width: 5.0,
            recovery_fraction: 0.2,
        }
    }
}

/// Outlier detection methods for group statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutlierMethod {
    /// Outside Q1 - 1.5*IQR .. Q3 + 1.5*IQR
    Iqr,
    /// |z| > 3
    ZScore,
}

/// Hypothesis testing and variance parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSettings {
    /// Time-of-day bucket width in minutes
    pub bucket_minutes: u32,

    /// Minimum distinct days of data per group for a bucket to be tested
    pub min_days_per_group: usize,

    /// Omnibus significance level
    pub alpha: f64,

    /// Outlier detection method
    pub outlier_method: OutlierMethod,
}

impl Default for StatsSettings {
    fn default() -> Self {
        Self {
            bucket_minutes: 15,
            min_days_per_group: 5,
            alpha: 0.05,
            outlier_method: OutlierMethod::Iqr,
        }
    }
}

/// Working-hours window ("HH:MM" strings, inclusive)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkingHours {
    pub start: String,
    pub end: String,
}

impl Default for WorkingHours {
    fn default() -> Self {
        Self {
            start: "08:00".to_string(),
            end: "17:00".to_string(),
        }
    }
}

impl WorkingHours {
    /// Parse the window into `NaiveTime` bounds
    pub fn bounds(&self) -> Result<(NaiveTime, NaiveTime)> {
        let start = NaiveTime::parse_from_str(&self.start, "%H:%M")
            .with_context(|| format!("Invalid working-hours start: {}", self.start))?;
        let end = NaiveTime::parse_from_str(&self.end, "%H:%M")
            .with_context(|| format!("Invalid working-hours end: {}", self.end))?;
        Ok((start, end))
    }
}

impl AnalysisConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: AnalysisConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: &Path) -> Result<()> {
        self.validate()?;
        let content =
            toml::to_string_pretty(self).context("Failed to serialize configuration")?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Validate parameter ranges
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=100.0).contains(&self.baseline.resting_hr_percentile) {
            anyhow::bail!(
                "resting_hr_percentile must be in 0-100, got {}",
                self.baseline.resting_hr_percentile
            );
        }
        if self.baseline.fallback_max_hr <= self.baseline.min_hr {
            anyhow::bail!("fallback_max_hr must exceed min_hr");
        }
        let t = &self.activity;
        if !(t.sedentary > 0.0 && t.sedentary < t.light && t.light < t.moderate) {
            anyhow::bail!(
                "activity thresholds must be ascending and positive: {} / {} / {}",
                t.sedentary,
                t.light,
                t.moderate
            );
        }
        if self.breaks.smoothing_window == 0 {
            anyhow::bail!("smoothing_window must be at least 1");
        }
        if self.breaks.min_duration_minutes < 0.0 {
            anyhow::bail!("min_duration_minutes must be non-negative");
        }
        if self.peaks.prominence <= 0.0 {
            anyhow::bail!("peak prominence must be positive");
        }
        if !(0.0..1.0).contains(&self.peaks.recovery_fraction) {
            anyhow::bail!(
                "recovery_fraction must be in [0, 1), got {}",
                self.peaks.recovery_fraction
            );
        }
        if self.stats.bucket_minutes == 0 || self.stats.bucket_minutes > 1440 {
            anyhow::bail!("bucket_minutes must be in 1-1440");
        }
        if !(0.0..=1.0).contains(&self.stats.alpha) {
            anyhow::bail!("alpha must be in 0-1, got {}", self.stats.alpha);
        }
        let (start, end) = self.working_hours.bounds()?;
        if start >= end {
            anyhow::bail!("working-hours start must precede end");
        }
        Ok(())
    }
}
