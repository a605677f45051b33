//! Per-user physiological baseline estimation
//!
//! Resting heart rate is a low percentile (default 5th) of the user's
//! working-hours heart rate; max heart rate is age-derived (220 - age) with
//! a fixed fallback when age is unknown. Heart-rate reserve is the spread
//! between the two and normalizes intensity across individuals.

use std::collections::BTreeMap;

use statrs::statistics::{Data, OrderStatistics};
use tracing::{debug, warn};

use crate::config::{AnalysisConfig, BaselineSettings};
use crate::error::AnalysisError;
use crate::models::{Baseline, Sample};

/// Derived stress score: heart rate rescaled linearly between `min_hr` and
/// the age-derived max heart rate, clamped to 0-100.
pub fn derived_stress_score(heart_rate: f64, age: Option<u8>, settings: &BaselineSettings) -> f64 {
    let max_hr = age_max_hr(age, settings.fallback_max_hr);
    let score = (heart_rate - settings.min_hr) / (max_hr - settings.min_hr) * 100.0;
    score.clamp(0.0, 100.0)
}

/// Age-derived maximum heart rate (220 - age), or the fallback when age is
/// unknown.
pub fn age_max_hr(age: Option<u8>, fallback: f64) -> f64 {
    match age {
        Some(age) => 220.0 - f64::from(age),
        None => fallback,
    }
}

/// Baselines for every estimable user plus the skip ledger for the rest
#[derive(Debug, Clone, Default)]
pub struct BaselineTable {
    pub baselines: BTreeMap<String, Baseline>,
    /// Users excluded from activity/transition analysis, with the reason
    pub skipped: Vec<AnalysisError>,
}

impl BaselineTable {
    pub fn get(&self, user_id: &str) -> Option<&Baseline> {
        self.baselines.get(user_id)
    }
}

/// Estimates per-user baselines from cleaned samples
#[derive(Debug, Clone)]
pub struct BaselineEstimator {
    settings: BaselineSettings,
}

impl BaselineEstimator {
    pub fn new(settings: BaselineSettings) -> Self {
        Self { settings }
    }

    pub fn from_config(config: &AnalysisConfig) -> Self {
        Self::new(config.baseline.clone())
    }

    /// Estimate one user's baseline from their cleaned samples.
    ///
    /// Fails with `MissingBaseline` when the user has no working-hours
    /// samples (the percentile is undefined over an empty set) and with
    /// `DegenerateReserve` when resting HR meets or exceeds max HR.
    /// Consumers divide by the reserve, so a degenerate user is excluded
    /// rather than handed downstream.
    pub fn estimate(&self, user_id: &str, samples: &[Sample]) -> Result<Baseline, AnalysisError> {
        let working_hr: Vec<f64> = samples
            .iter()
            .filter(|s| s.user_id == user_id && s.is_working_hours)
            .map(|s| s.heart_rate)
            .collect();

        if working_hr.is_empty() {
            return Err(AnalysisError::MissingBaseline {
                user_id: user_id.to_string(),
                reason: "no working-hours samples".to_string(),
            });
        }

        let mut data = Data::new(working_hr);
        let resting_hr = data.quantile(self.settings.resting_hr_percentile / 100.0);

        let age = samples
            .iter()
            .find(|s| s.user_id == user_id)
            .and_then(|s| s.age);
        let max_hr = age_max_hr(age, self.settings.fallback_max_hr);

        let hr_reserve = max_hr - resting_hr;
        if hr_reserve <= 0.0 {
            return Err(AnalysisError::DegenerateReserve {
                user_id: user_id.to_string(),
                reserve: hr_reserve,
            });
        }

        Ok(Baseline {
            user_id: user_id.to_string(),
            resting_hr,
            max_hr,
            hr_reserve,
        })
    }

    /// Estimate baselines for every user in the sample set.
    ///
    /// One user's failure never aborts the batch; failures land in the
    /// table's skip ledger.
    pub fn estimate_all(&self, samples: &[Sample]) -> BaselineTable {
        let mut user_ids: Vec<&str> = samples.iter().map(|s| s.user_id.as_str()).collect();
        user_ids.sort_unstable();
        user_ids.dedup();

        let mut table = BaselineTable::default();
        for user_id in user_ids {
            match self.estimate(user_id, samples) {
                Ok(baseline) => {
                    debug!(
                        user_id,
                        resting_hr = baseline.resting_hr,
                        hr_reserve = baseline.hr_reserve,
                        "estimated baseline"
                    );
                    table.baselines.insert(user_id.to_string(), baseline);
                }
                Err(err) => {
                    warn!(user_id, %err, "excluding user from analysis");
                    table.skipped.push(err);
                }
            }
        }
        table
    }
}
