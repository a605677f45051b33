//! Correlation between monthly biometric summaries and site productivity
//!
//! Biometric samples roll up to (year, month, group) summaries, inner-join
//! against productivity records keyed by (year, month, site), and each
//! physical metric is correlated (Pearson, two-sided p) with each
//! productivity metric per group. Months missing on either side are
//! dropped, not imputed; groups with too few paired months report an
//! explicit insufficient-data outcome instead of a spurious coefficient.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, StudentsT};
use statrs::statistics::{Data, OrderStatistics, Statistics};
use tracing::debug;

use crate::models::{MonthlyBiometricSummary, ProductivityRecord, Sample};

/// Monthly roll-up of one group's samples
pub fn monthly_summaries(samples: &[Sample]) -> Vec<MonthlyBiometricSummary> {
    let mut buckets: BTreeMap<(i32, u32, String), Vec<&Sample>> = BTreeMap::new();
    for s in samples {
        buckets
            .entry((s.year(), s.month(), s.group.to_uppercase()))
            .or_default()
            .push(s);
    }

    buckets
        .into_iter()
        .map(|((year, month, group), bucket)| {
            let stress: Vec<f64> = bucket.iter().map(|s| s.stress_score).collect();
            let hr: Vec<f64> = bucket.iter().map(|s| s.heart_rate).collect();
            let mut users: Vec<&str> = bucket.iter().map(|s| s.user_id.as_str()).collect();
            users.sort_unstable();
            users.dedup();

            MonthlyBiometricSummary {
                year,
                month,
                group,
                stress_mean: Statistics::mean(&stress),
                stress_std: if stress.len() > 1 {
                    Statistics::std_dev(&stress)
                } else {
                    0.0
                },
                stress_median: Data::new(stress).median(),
                heart_rate_mean: Statistics::mean(&hr),
                heart_rate_std: if hr.len() > 1 {
                    Statistics::std_dev(&hr)
                } else {
                    0.0
                },
                user_count: users.len(),
            }
        })
        .collect()
}

/// One month where biometric and productivity data overlap
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinedMonth {
    pub year: i32,
    pub month: u32,
    pub group: String,
    pub stress_mean: f64,
    pub stress_median: f64,
    pub heart_rate_mean: f64,
    pub user_count: usize,
    pub receipts: f64,
    pub dispatches: f64,
    /// receipts / stress_mean; None when mean stress is ~0
    pub productivity_stress_ratio: Option<f64>,
}

/// Inner join of monthly summaries with productivity records on
/// (year, month, group/site). Site labels compare case-insensitively.
/// Unmatched months on either side are silently excluded by design.
pub fn join_productivity(
    summaries: &[MonthlyBiometricSummary],
    records: &[ProductivityRecord],
) -> Vec<JoinedMonth> {
    let by_key: BTreeMap<(i32, u32, String), &ProductivityRecord> = records
        .iter()
        .map(|r| ((r.year, r.month, r.site.to_uppercase()), r))
        .collect();

    let joined: Vec<JoinedMonth> = summaries
        .iter()
        .filter_map(|s| {
            let record = by_key.get(&(s.year, s.month, s.group.to_uppercase()))?;
            Some(JoinedMonth {
                year: s.year,
                month: s.month,
                group: s.group.to_uppercase(),
                stress_mean: s.stress_mean,
                stress_median: s.stress_median,
                heart_rate_mean: s.heart_rate_mean,
                user_count: s.user_count,
                receipts: record.receipts,
                dispatches: record.dispatches,
                productivity_stress_ratio: (s.stress_mean.abs() > f64::EPSILON)
                    .then(|| record.receipts / s.stress_mean),
            })
        })
        .collect();

    debug!(
        summaries = summaries.len(),
        records = records.len(),
        joined = joined.len(),
        "joined biometric and productivity months"
    );
    joined
}

/// Correlation outcome for one metric pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum CorrelationOutcome {
    Computed {
        r: f64,
        /// Two-sided p-value; None when fewer than 3 paired points leave
        /// no degrees of freedom for the t test
        p_value: Option<f64>,
        n: usize,
    },
    /// Fewer than 2 paired observations
    InsufficientData { n: usize },
}

/// Correlation between one physical and one productivity metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricCorrelation {
    pub physical: String,
    pub productivity: String,
    pub outcome: CorrelationOutcome,
}

/// Pearson correlation with a two-sided p-value from the t distribution.
/// Degenerate inputs (zero variance on either side) report r undefined via
/// `InsufficientData`.
pub fn pearson(x: &[f64], y: &[f64]) -> CorrelationOutcome {
    let n = x.len().min(y.len());
    if n < 2 {
        return CorrelationOutcome::InsufficientData { n };
    }
    let x = &x[..n];
    let y = &y[..n];

    let mean_x = Statistics::mean(x);
    let mean_y = Statistics::mean(y);
    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for i in 0..n {
        let dx = x[i] - mean_x;
        let dy = y[i] - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }
    if var_x <= f64::EPSILON || var_y <= f64::EPSILON {
        return CorrelationOutcome::InsufficientData { n };
    }

    let r = (cov / (var_x.sqrt() * var_y.sqrt())).clamp(-1.0, 1.0);

    let p_value = if n >= 3 && r.abs() < 1.0 {
        let df = (n - 2) as f64;
        let t = r * (df / (1.0 - r * r)).sqrt();
        let dist = StudentsT::new(0.0, 1.0, df).expect("positive degrees of freedom");
        Some((2.0 * (1.0 - dist.cdf(t.abs()))).clamp(0.0, 1.0))
    } else if n >= 3 {
        // |r| = 1 exactly: the t statistic diverges
        Some(0.0)
    } else {
        None
    };

    CorrelationOutcome::Computed { r, p_value, n }
}

/// Names of the physical metrics correlated against productivity
const PHYSICAL_METRICS: [&str; 2] = ["stress_mean", "heart_rate_mean"];
/// Names of the productivity metrics
const PRODUCTIVITY_METRICS: [&str; 2] = ["receipts", "dispatches"];

fn physical_value(month: &JoinedMonth, metric: &str) -> f64 {
    match metric {
        "stress_mean" => month.stress_mean,
        "heart_rate_mean" => month.heart_rate_mean,
        other => unreachable!("unknown physical metric {other}"),
    }
}

fn productivity_value(month: &JoinedMonth, metric: &str) -> f64 {
    match metric {
        "receipts" => month.receipts,
        "dispatches" => month.dispatches,
        other => unreachable!("unknown productivity metric {other}"),
    }
}

/// Per-group correlations between every physical/productivity metric pair
pub fn correlate_by_group(
    joined: &[JoinedMonth],
) -> BTreeMap<String, Vec<MetricCorrelation>> {
    let mut by_group: BTreeMap<String, Vec<&JoinedMonth>> = BTreeMap::new();
    for month in joined {
        by_group.entry(month.group.clone()).or_default().push(month);
    }

    by_group
        .into_iter()
        .map(|(group, months)| {
            let mut correlations = Vec::new();
            for phys in PHYSICAL_METRICS {
                for prod in PRODUCTIVITY_METRICS {
                    let x: Vec<f64> = months.iter().map(|m| physical_value(m, phys)).collect();
                    let y: Vec<f64> =
                        months.iter().map(|m| productivity_value(m, prod)).collect();
                    correlations.push(MetricCorrelation {
                        physical: phys.to_string(),
                        productivity: prod.to_string(),
                        outcome: pearson(&x, &y),
                    });
                }
            }
            (group, correlations)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};

    fn sample(user: &str, group: &str, month: u32, stress: f64) -> Sample {
        Sample {
            user_id: user.to_string(),
            timestamp: Utc::now(),
            local_time: NaiveDate::from_ymd_opt(2024, month, 5)
                .unwrap()
                .and_hms_opt(10, 0, 0)
                .unwrap(),
            heart_rate: 40.0 + stress,
            stress_score: stress,
            group: group.to_string(),
            is_working_hours: true,
            age: Some(30),
        }
    }

    fn record(site: &str, month: u32, receipts: f64) -> ProductivityRecord {
        ProductivityRecord {
            year: 2024,
            month,
            site: site.to_string(),
            receipts,
            dispatches: receipts / 2.0,
        }
    }

    #[test]
    fn test_monthly_summary_counts_distinct_users() {
        let samples = vec![
            sample("u1", "KB3", 1, 40.0),
            sample("u1", "KB3", 1, 50.0),
            sample("u2", "KB3", 1, 60.0),
        ];
        let summaries = monthly_summaries(&samples);
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].user_count, 2);
        assert!((summaries[0].stress_mean - 50.0).abs() < 1e-9);
        assert_eq!(summaries[0].stress_median, 50.0);
    }

    #[test]
    fn test_inner_join_drops_unmatched_months() {
        let samples = vec![
            sample("u1", "KB3", 1, 40.0),
            sample("u1", "KB3", 2, 50.0),
            sample("u1", "KB3", 3, 60.0),
        ];
        let summaries = monthly_summaries(&samples);
        // Productivity exists for months 1 and 2 only, plus an extra month
        // with no biometric counterpart
        let records = vec![record("kb3", 1, 100.0), record("kb3", 2, 120.0), record("kb3", 7, 90.0)];

        let joined = join_productivity(&summaries, &records);
        assert_eq!(joined.len(), 2);
        assert!(joined.len() <= summaries.len().min(records.len()));
        assert!(joined[0].productivity_stress_ratio.is_some());
    }

    #[test]
    fn test_pearson_perfect_positive() {
        let x = [1.0, 2.0, 3.0, 4.0];
        let y = [10.0, 20.0, 30.0, 40.0];
        match pearson(&x, &y) {
            CorrelationOutcome::Computed { r, p_value, n } => {
                assert!((r - 1.0).abs() < 1e-12);
                assert_eq!(p_value, Some(0.0));
                assert_eq!(n, 4);
            }
            other => panic!("expected computed outcome, got {:?}", other),
        }
    }

    #[test]
    fn test_pearson_insufficient_data() {
        assert_eq!(
            pearson(&[1.0], &[2.0]),
            CorrelationOutcome::InsufficientData { n: 1 }
        );
        // Zero variance side
        assert_eq!(
            pearson(&[1.0, 1.0, 1.0], &[2.0, 3.0, 4.0]),
            CorrelationOutcome::InsufficientData { n: 3 }
        );
    }

    #[test]
    fn test_pearson_two_points_has_no_p_value() {
        match pearson(&[1.0, 2.0], &[5.0, 9.0]) {
            CorrelationOutcome::Computed { r, p_value, n } => {
                assert!((r - 1.0).abs() < 1e-12);
                assert_eq!(p_value, None);
                assert_eq!(n, 2);
            }
            other => panic!("expected computed outcome, got {:?}", other),
        }
    }

    #[test]
    fn test_correlate_by_group_covers_metric_grid() {
        let months: Vec<JoinedMonth> = (1..6)
            .map(|m| JoinedMonth {
                year: 2024,
                month: m,
                group: "KB3".to_string(),
                stress_mean: 40.0 + m as f64,
                stress_median: 40.0,
                heart_rate_mean: 80.0 + m as f64,
                user_count: 4,
                receipts: 100.0 + m as f64 * 10.0,
                dispatches: 50.0 + m as f64 * 5.0,
                productivity_stress_ratio: Some(2.0),
            })
            .collect();

        let by_group = correlate_by_group(&months);
        let correlations = &by_group["KB3"];
        assert_eq!(correlations.len(), 4);
        for c in correlations {
            match &c.outcome {
                CorrelationOutcome::Computed { r, .. } => assert!(*r > 0.99),
                other => panic!("expected computed outcome, got {:?}", other),
            }
        }
    }
}
