use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Discrete activity states derived from heart-rate-reserve usage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityState {
    Sedentary,
    Light,
    Moderate,
    Intense,
}

impl ActivityState {
    /// All states in ascending intensity order. Matrix rows/columns use
    /// this ordering.
    pub const ALL: [ActivityState; 4] = [
        ActivityState::Sedentary,
        ActivityState::Light,
        ActivityState::Moderate,
        ActivityState::Intense,
    ];

    /// Number of activity states
    pub const COUNT: usize = 4;

    /// Index of this state in [`ActivityState::ALL`]
    pub fn index(&self) -> usize {
        match self {
            ActivityState::Sedentary => 0,
            ActivityState::Light => 1,
            ActivityState::Moderate => 2,
            ActivityState::Intense => 3,
        }
    }

    pub fn from_index(index: usize) -> Option<ActivityState> {
        ActivityState::ALL.get(index).copied()
    }
}

impl fmt::Display for ActivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActivityState::Sedentary => write!(f, "sedentary"),
            ActivityState::Light => write!(f, "light"),
            ActivityState::Moderate => write!(f, "moderate"),
            ActivityState::Intense => write!(f, "intense"),
        }
    }
}

/// One cleaned biometric observation.
///
/// Produced by the upstream cleaning collaborator (timezone resolution,
/// working-hours tagging, heart-rate range filtering, deduplication);
/// immutable once inside the analysis core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Wearer identifier
    pub user_id: String,

    /// Observation timestamp (UTC)
    pub timestamp: DateTime<Utc>,

    /// Timestamp resolved to the site's local timezone
    pub local_time: NaiveDateTime,

    /// Heart rate in beats per minute
    pub heart_rate: f64,

    /// Derived stress score, 0-100 (linear rescaling of heart rate)
    pub stress_score: f64,

    /// Site/team label
    pub group: String,

    /// Whether the observation falls inside configured working hours
    pub is_working_hours: bool,

    /// Wearer age in years, when known
    pub age: Option<u8>,
}

impl Sample {
    /// Local calendar date of the observation
    pub fn date(&self) -> NaiveDate {
        self.local_time.date()
    }

    /// Local hour of day (0-23)
    pub fn hour(&self) -> u32 {
        self.local_time.hour()
    }

    pub fn year(&self) -> i32 {
        self.local_time.year()
    }

    pub fn month(&self) -> u32 {
        self.local_time.month()
    }
}

/// Per-user physiological baseline.
///
/// Computed once per analysis run from the user's full cleaned sample set
/// and read-only thereafter. `hr_reserve > 0` holds for every baseline the
/// estimator emits; degenerate users are excluded at estimation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub user_id: String,

    /// Resting heart rate: low percentile of working-hours heart rate
    pub resting_hr: f64,

    /// Age-derived maximum heart rate (220 - age, or fallback)
    pub max_hr: f64,

    /// max_hr - resting_hr
    pub hr_reserve: f64,
}

/// A sustained drop in smoothed stress, long enough to count as a break
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakEvent {
    pub user_id: String,
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
    /// Wall-clock length of the segment in minutes
    pub duration_minutes: f64,
    /// Mean stress score over the segment
    pub stress_reduction: f64,
}

/// A detected stress peak with optional recovery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeakEvent {
    pub user_id: String,
    pub peak_time: NaiveDateTime,
    pub peak_value: f64,
    pub prominence: f64,
    /// Width at half prominence, in samples
    pub width: f64,
    /// Minutes from peak until stress returned to within 20% of the
    /// pre-peak baseline. None when recovery never occurs in the series;
    /// duration statistics must exclude such events, not coerce to zero.
    pub recovery_minutes: Option<f64>,
}

/// One month of site productivity (cask receipts/dispatches)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductivityRecord {
    pub year: i32,
    pub month: u32,
    pub site: String,
    pub receipts: f64,
    pub dispatches: f64,
}

/// Monthly biometric roll-up for one group, join key (year, month, group)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyBiometricSummary {
    pub year: i32,
    pub month: u32,
    pub group: String,
    pub stress_mean: f64,
    pub stress_std: f64,
    pub stress_median: f64,
    pub heart_rate_mean: f64,
    pub heart_rate_std: f64,
    /// Distinct users contributing to the month
    pub user_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_activity_state_ordering() {
        assert_eq!(ActivityState::Sedentary.index(), 0);
        assert_eq!(ActivityState::Intense.index(), 3);
        for (i, state) in ActivityState::ALL.iter().enumerate() {
            assert_eq!(ActivityState::from_index(i), Some(*state));
        }
        assert_eq!(ActivityState::from_index(4), None);
    }

    #[test]
    fn test_sample_date_parts() {
        let local = NaiveDate::from_ymd_opt(2024, 3, 15)
            .unwrap()
            .and_hms_opt(9, 30, 0)
            .unwrap();
        let sample = Sample {
            user_id: "u1".to_string(),
            timestamp: Utc::now(),
            local_time: local,
            heart_rate: 72.0,
            stress_score: 20.0,
            group: "DALMUIR".to_string(),
            is_working_hours: true,
            age: Some(30),
        };
        assert_eq!(sample.year(), 2024);
        assert_eq!(sample.month(), 3);
        assert_eq!(sample.hour(), 9);
        assert_eq!(sample.date(), NaiveDate::from_ymd_opt(2024, 3, 15).unwrap());
    }
}
