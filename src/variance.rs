//! Group variance decomposition, consistency scoring, and outlier detection
//!
//! Three orthogonal variance components per group: within-day (per-user
//! daily spread, averaged), between-day (spread of daily group means), and
//! user-to-user (spread of per-user means). Groups with a single day or a
//! single user get 0 for the affected component rather than NaN.

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, OrderStatistics, Statistics};

use crate::config::OutlierMethod;
use crate::models::Sample;

/// Orthogonal variance components for one group, all non-negative
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarianceComponents {
    /// Mean over (date, user) of the std of stress within that day
    pub within_day: f64,
    /// Std of daily group means; 0 when the group has a single day
    pub between_day: f64,
    /// Std of per-user means; 0 when the group has a single user
    pub user_to_user: f64,
    /// Overall std of the group's stress scores
    pub total: f64,
    /// 1 / (1 + ln(1 + within_day + between_day)), in (0, 1]; higher
    /// means a steadier group
    pub stability: f64,
}

/// Day-to-day consistency scores for one group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsistencyScores {
    /// Mean daily coefficient of variation of stress
    pub cv_stress: f64,
    /// Mean daily coefficient of variation of heart rate
    pub cv_heart_rate: f64,
    /// Mean over hours of the std of stress within the hour
    pub temporal_consistency: f64,
    /// Mean daily std of stress
    pub daily_variation: f64,
}

fn std_or_zero(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    Statistics::std_dev(values)
}

fn mean_or_zero(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    Statistics::mean(values)
}

/// Variance decomposition for one group's samples
pub fn variance_components(samples: &[Sample]) -> VarianceComponents {
    let mut by_day_user: BTreeMap<(NaiveDate, &str), Vec<f64>> = BTreeMap::new();
    let mut by_day: BTreeMap<NaiveDate, Vec<f64>> = BTreeMap::new();
    let mut by_user: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    let mut all = Vec::with_capacity(samples.len());

    for s in samples {
        by_day_user
            .entry((s.date(), s.user_id.as_str()))
            .or_default()
            .push(s.stress_score);
        by_day.entry(s.date()).or_default().push(s.stress_score);
        by_user
            .entry(s.user_id.as_str())
            .or_default()
            .push(s.stress_score);
        all.push(s.stress_score);
    }

    let day_user_stds: Vec<f64> = by_day_user.values().map(|v| std_or_zero(v)).collect();
    let daily_means: Vec<f64> = by_day.values().map(|v| mean_or_zero(v)).collect();
    let user_means: Vec<f64> = by_user.values().map(|v| mean_or_zero(v)).collect();

    let within_day = mean_or_zero(&day_user_stds);
    let between_day = std_or_zero(&daily_means);

    VarianceComponents {
        within_day,
        between_day,
        user_to_user: std_or_zero(&user_means),
        total: std_or_zero(&all),
        stability: 1.0 / (1.0 + (within_day + between_day).ln_1p()),
    }
}

/// Consistency scores for one group's samples
pub fn consistency_scores(samples: &[Sample]) -> ConsistencyScores {
    let mut stress_by_day: BTreeMap<NaiveDate, Vec<f64>> = BTreeMap::new();
    let mut hr_by_day: BTreeMap<NaiveDate, Vec<f64>> = BTreeMap::new();
    let mut stress_by_hour: BTreeMap<u32, Vec<f64>> = BTreeMap::new();

    for s in samples {
        stress_by_day.entry(s.date()).or_default().push(s.stress_score);
        hr_by_day.entry(s.date()).or_default().push(s.heart_rate);
        stress_by_hour.entry(s.hour()).or_default().push(s.stress_score);
    }

    // Coefficient of variation per day, averaged; days with a zero mean
    // contribute nothing
    let cv = |by_day: &BTreeMap<NaiveDate, Vec<f64>>| -> f64 {
        let cvs: Vec<f64> = by_day
            .values()
            .filter_map(|v| {
                let mean = mean_or_zero(v);
                (mean.abs() > f64::EPSILON).then(|| std_or_zero(v) / mean)
            })
            .collect();
        mean_or_zero(&cvs)
    };

    let hourly_stds: Vec<f64> = stress_by_hour.values().map(|v| std_or_zero(v)).collect();
    let daily_stds: Vec<f64> = stress_by_day.values().map(|v| std_or_zero(v)).collect();

    ConsistencyScores {
        cv_stress: cv(&stress_by_day),
        cv_heart_rate: cv(&hr_by_day),
        temporal_consistency: mean_or_zero(&hourly_stds),
        daily_variation: mean_or_zero(&daily_stds),
    }
}

/// Stress and heart-rate statistics for one day of the week
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeekdayPattern {
    /// Short weekday name, "Mon" through "Sun"
    pub weekday: String,
    pub stress_mean: f64,
    pub stress_std: f64,
    pub heart_rate_mean: f64,
    pub heart_rate_std: f64,
    pub samples: usize,
}

/// Day-of-week patterns for one group's samples, Monday first; weekdays
/// with no samples are omitted
pub fn weekday_patterns(samples: &[Sample]) -> Vec<WeekdayPattern> {
    let mut by_day: BTreeMap<u32, Vec<&Sample>> = BTreeMap::new();
    for s in samples {
        by_day
            .entry(s.local_time.weekday().num_days_from_monday())
            .or_default()
            .push(s);
    }

    by_day
        .into_values()
        .map(|bucket| {
            let stress: Vec<f64> = bucket.iter().map(|s| s.stress_score).collect();
            let hr: Vec<f64> = bucket.iter().map(|s| s.heart_rate).collect();
            WeekdayPattern {
                weekday: bucket[0].local_time.weekday().to_string(),
                stress_mean: mean_or_zero(&stress),
                stress_std: std_or_zero(&stress),
                heart_rate_mean: mean_or_zero(&hr),
                heart_rate_std: std_or_zero(&hr),
                samples: bucket.len(),
            }
        })
        .collect()
}

/// Indices of outlying stress scores within one group.
///
/// IQR: outside Q1 - 1.5*IQR .. Q3 + 1.5*IQR. Z-score: |z| > 3. Fewer
/// than four samples (IQR) or two (z-score) yields no outliers.
pub fn detect_outliers(stress: &[f64], method: OutlierMethod) -> Vec<usize> {
    match method {
        OutlierMethod::Iqr => {
            if stress.len() < 4 {
                return Vec::new();
            }
            let mut data = Data::new(stress.to_vec());
            let q1 = data.lower_quartile();
            let q3 = data.upper_quartile();
            let iqr = q3 - q1;
            let lo = q1 - 1.5 * iqr;
            let hi = q3 + 1.5 * iqr;
            stress
                .iter()
                .enumerate()
                .filter(|(_, &v)| v < lo || v > hi)
                .map(|(i, _)| i)
                .collect()
        }
        OutlierMethod::ZScore => {
            if stress.len() < 2 {
                return Vec::new();
            }
            let mean = Statistics::mean(stress);
            let std = Statistics::std_dev(stress);
            if std <= f64::EPSILON {
                return Vec::new();
            }
            stress
                .iter()
                .enumerate()
                .filter(|(_, &v)| ((v - mean) / std).abs() > 3.0)
                .map(|(i, _)| i)
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate, Utc};

    fn sample(user: &str, day: u32, hour: u32, stress: f64) -> Sample {
        Sample {
            user_id: user.to_string(),
            timestamp: Utc::now(),
            local_time: NaiveDate::from_ymd_opt(2024, 3, day)
                .unwrap()
                .and_hms_opt(hour, 0, 0)
                .unwrap(),
            heart_rate: 40.0 + stress,
            stress_score: stress,
            group: "KB3".to_string(),
            is_working_hours: true,
            age: Some(30),
        }
    }

    #[test]
    fn test_single_day_single_user_substitutes_zero() {
        let samples = vec![sample("u1", 4, 9, 50.0), sample("u1", 4, 10, 60.0)];
        let components = variance_components(&samples);
        assert_eq!(components.between_day, 0.0);
        assert_eq!(components.user_to_user, 0.0);
        assert!(components.within_day > 0.0);
    }

    #[test]
    fn test_components_non_negative() {
        let mut samples = Vec::new();
        for day in 4..9 {
            for (user, base) in [("u1", 30.0), ("u2", 60.0)] {
                for hour in 9..12 {
                    samples.push(sample(user, day, hour, base + hour as f64));
                }
            }
        }
        let c = variance_components(&samples);
        assert!(c.within_day >= 0.0);
        assert!(c.between_day >= 0.0);
        assert!(c.user_to_user > 0.0);
        assert!(c.total > 0.0);
        assert!(c.stability > 0.0 && c.stability <= 1.0);
    }

    #[test]
    fn test_stability_is_one_for_flat_group() {
        let samples = vec![sample("u1", 4, 9, 50.0), sample("u1", 4, 10, 50.0)];
        let c = variance_components(&samples);
        assert!((c.stability - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_consistency_scores_flat_series() {
        let samples: Vec<Sample> = (9..12).map(|h| sample("u1", 4, h, 50.0)).collect();
        let scores = consistency_scores(&samples);
        assert_eq!(scores.cv_stress, 0.0);
        assert_eq!(scores.daily_variation, 0.0);
    }

    #[test]
    fn test_weekday_patterns_split_by_day() {
        // 2024-03-04 is a Monday
        let samples = vec![
            sample("u1", 4, 9, 30.0),
            sample("u1", 4, 10, 50.0),
            sample("u1", 5, 9, 80.0),
        ];
        let patterns = weekday_patterns(&samples);

        assert_eq!(patterns.len(), 2);
        assert_eq!(patterns[0].weekday, "Mon");
        assert_eq!(patterns[0].samples, 2);
        assert!((patterns[0].stress_mean - 40.0).abs() < 1e-9);
        assert_eq!(patterns[1].weekday, "Tue");
        assert_eq!(patterns[1].samples, 1);
        assert_eq!(patterns[1].stress_std, 0.0);
    }

    #[test]
    fn test_iqr_outliers() {
        let mut stress = vec![50.0; 20];
        stress.push(500.0);
        let outliers = detect_outliers(&stress, OutlierMethod::Iqr);
        assert_eq!(outliers, vec![20]);
    }

    #[test]
    fn test_zscore_outliers() {
        let mut stress: Vec<f64> = (0..40).map(|i| 50.0 + (i % 5) as f64).collect();
        stress.push(200.0);
        let outliers = detect_outliers(&stress, OutlierMethod::ZScore);
        assert_eq!(outliers, vec![40]);
    }

    #[test]
    fn test_constant_series_has_no_outliers() {
        let stress = vec![42.0; 30];
        assert!(detect_outliers(&stress, OutlierMethod::Iqr).is_empty());
        assert!(detect_outliers(&stress, OutlierMethod::ZScore).is_empty());
    }

    #[test]
    fn test_between_day_tracks_daily_drift() {
        let mut samples = Vec::new();
        for day in 0..5 {
            let s = sample("u1", 4, 9, 40.0 + day as f64 * 10.0);
            let mut s = s;
            s.local_time += Duration::days(day as i64);
            samples.push(s);
        }
        let c = variance_components(&samples);
        assert!(c.between_day > 0.0);
        assert_eq!(c.within_day, 0.0);
    }
}
