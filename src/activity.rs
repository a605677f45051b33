//! Activity-state classification from heart-rate reserve
//!
//! Classification is a pure step function: reserve fraction
//! f = (heart_rate - resting_hr) / hr_reserve mapped through four ascending
//! cutoffs. Same inputs always yield the same state.

use std::collections::BTreeMap;

use crate::baseline::BaselineTable;
use crate::config::{ActivityThresholds, AnalysisConfig};
use crate::error::AnalysisError;
use crate::models::{ActivityState, Baseline, Sample};

/// Pure, stateless classifier mapping (sample, baseline) to a state
#[derive(Debug, Clone)]
pub struct ActivityClassifier {
    thresholds: ActivityThresholds,
}

impl ActivityClassifier {
    pub fn new(thresholds: ActivityThresholds) -> Self {
        Self { thresholds }
    }

    pub fn from_config(config: &AnalysisConfig) -> Self {
        Self::new(config.activity.clone())
    }

    /// Fraction of heart-rate reserve in use.
    ///
    /// Guards against a degenerate reserve: dividing by a zero or negative
    /// reserve would invert the mapping, so it is a domain error here even
    /// though the estimator already refuses to emit such baselines.
    pub fn reserve_fraction(
        &self,
        heart_rate: f64,
        baseline: &Baseline,
    ) -> Result<f64, AnalysisError> {
        if baseline.hr_reserve <= 0.0 {
            return Err(AnalysisError::DegenerateReserve {
                user_id: baseline.user_id.clone(),
                reserve: baseline.hr_reserve,
            });
        }
        Ok((heart_rate - baseline.resting_hr) / baseline.hr_reserve)
    }

    /// Classify a heart rate against a baseline
    pub fn classify(
        &self,
        heart_rate: f64,
        baseline: &Baseline,
    ) -> Result<ActivityState, AnalysisError> {
        let fraction = self.reserve_fraction(heart_rate, baseline)?;
        Ok(self.classify_fraction(fraction))
    }

    /// Map a reserve fraction through the threshold ladder
    pub fn classify_fraction(&self, fraction: f64) -> ActivityState {
        if fraction <= self.thresholds.sedentary {
            ActivityState::Sedentary
        } else if fraction <= self.thresholds.light {
            ActivityState::Light
        } else if fraction <= self.thresholds.moderate {
            ActivityState::Moderate
        } else {
            ActivityState::Intense
        }
    }
}

/// Share of samples per state, overall and by hour of day, for one group
#[derive(Debug, Clone, serde::Serialize)]
pub struct ActivityDistribution {
    /// Counts per state, [`ActivityState::ALL`] order
    pub counts: [usize; ActivityState::COUNT],
    /// Percentage per state over classified samples
    pub percentages: [f64; ActivityState::COUNT],
    /// Hour of day -> counts per state
    pub hourly: BTreeMap<u32, [usize; ActivityState::COUNT]>,
    /// Samples with a valid baseline
    pub classified_samples: usize,
    /// Samples skipped because their user has no baseline
    pub unknown_samples: usize,
}

impl ActivityDistribution {
    /// Percentage breakdown for one hour, None when the hour has no data
    pub fn hourly_percentages(&self, hour: u32) -> Option<[f64; ActivityState::COUNT]> {
        let counts = self.hourly.get(&hour)?;
        let total: usize = counts.iter().sum();
        if total == 0 {
            return None;
        }
        let mut pct = [0.0; ActivityState::COUNT];
        for (p, &c) in pct.iter_mut().zip(counts.iter()) {
            *p = c as f64 / total as f64 * 100.0;
        }
        Some(pct)
    }
}

/// Distribution of activity states for one group's samples.
///
/// Samples whose user has no baseline are counted as unknown and excluded
/// from the percentages, per the exclusion policy for missing baselines.
pub fn activity_distribution(
    samples: &[Sample],
    baselines: &BaselineTable,
    classifier: &ActivityClassifier,
) -> ActivityDistribution {
    let mut counts = [0usize; ActivityState::COUNT];
    let mut hourly: BTreeMap<u32, [usize; ActivityState::COUNT]> = BTreeMap::new();
    let mut unknown = 0usize;

    for sample in samples {
        let Some(baseline) = baselines.get(&sample.user_id) else {
            unknown += 1;
            continue;
        };
        // Estimator guarantees a positive reserve for stored baselines
        let Ok(state) = classifier.classify(sample.heart_rate, baseline) else {
            unknown += 1;
            continue;
        };
        counts[state.index()] += 1;
        hourly.entry(sample.hour()).or_default()[state.index()] += 1;
    }

    let classified: usize = counts.iter().sum();
    let mut percentages = [0.0; ActivityState::COUNT];
    if classified > 0 {
        for (p, &c) in percentages.iter_mut().zip(counts.iter()) {
            *p = c as f64 / classified as f64 * 100.0;
        }
    }

    ActivityDistribution {
        counts,
        percentages,
        hourly,
        classified_samples: classified,
        unknown_samples: unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BaselineSettings;
    use chrono::{NaiveDate, Utc};
    use proptest::prelude::*;

    fn baseline(resting: f64, max: f64) -> Baseline {
        Baseline {
            user_id: "u1".to_string(),
            resting_hr: resting,
            max_hr: max,
            hr_reserve: max - resting,
        }
    }

    fn classifier() -> ActivityClassifier {
        ActivityClassifier::new(ActivityThresholds::default())
    }

    #[test]
    fn test_step_function_on_default_thresholds() {
        let c = classifier();
        assert_eq!(c.classify_fraction(0.15), ActivityState::Sedentary);
        assert_eq!(c.classify_fraction(0.20), ActivityState::Sedentary);
        assert_eq!(c.classify_fraction(0.25), ActivityState::Light);
        assert_eq!(c.classify_fraction(0.50), ActivityState::Moderate);
        assert_eq!(c.classify_fraction(0.85), ActivityState::Intense);
    }

    #[test]
    fn test_classify_uses_reserve_fraction() {
        let c = classifier();
        let b = baseline(70.0, 190.0); // reserve 120
        // 130 bpm -> (130-70)/120 = 0.50 -> moderate
        assert_eq!(c.classify(130.0, &b).unwrap(), ActivityState::Moderate);
        // 135 bpm -> 0.54 -> still moderate
        assert_eq!(c.classify(135.0, &b).unwrap(), ActivityState::Moderate);
    }

    #[test]
    fn test_degenerate_reserve_is_an_error() {
        let c = classifier();
        let b = baseline(190.0, 190.0);
        assert!(matches!(
            c.classify(120.0, &b),
            Err(AnalysisError::DegenerateReserve { .. })
        ));
    }

    #[test]
    fn test_distribution_counts_unknown_users() {
        let c = classifier();
        let estimator = crate::baseline::BaselineEstimator::new(BaselineSettings::default());

        let mk = |user: &str, hr: f64| Sample {
            user_id: user.to_string(),
            timestamp: Utc::now(),
            local_time: NaiveDate::from_ymd_opt(2024, 2, 5)
                .unwrap()
                .and_hms_opt(10, 0, 0)
                .unwrap(),
            heart_rate: hr,
            stress_score: 0.0,
            group: "KB3".to_string(),
            is_working_hours: true,
            age: Some(30),
        };

        let mut samples: Vec<Sample> = [70.0, 75.0, 80.0].iter().map(|&hr| mk("u1", hr)).collect();
        let mut stray = mk("ghost", 80.0);
        stray.is_working_hours = false;
        samples.push(stray);

        let table = estimator.estimate_all(&samples);
        let dist = activity_distribution(&samples, &table, &c);

        assert_eq!(dist.classified_samples, 3);
        assert_eq!(dist.unknown_samples, 1);
        let pct_sum: f64 = dist.percentages.iter().sum();
        assert!((pct_sum - 100.0).abs() < 1e-9);
    }

    proptest! {
        /// Classification is monotone in the reserve fraction
        #[test]
        fn prop_classification_monotone(a in -0.5f64..1.5, b in -0.5f64..1.5) {
            let c = classifier();
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(c.classify_fraction(lo).index() <= c.classify_fraction(hi).index());
        }
    }
}
