//! Non-parametric hypothesis testing across groups
//!
//! Kruskal-Wallis omnibus tests per time-of-day bucket with
//! epsilon-squared effect sizes, Bonferroni-corrected pairwise
//! Mann-Whitney follow-ups, and a per-group versus-pooled-rest variant.
//! Buckets are gated on distinct days of data per group rather than raw
//! sample counts to avoid pseudo-replication, and insufficient buckets are
//! marked undefined instead of dropped so the time axis stays intact.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ChiSquared, ContinuousCDF, Normal};
use statrs::statistics::{Data, OrderStatistics, RankTieBreaker};
use tracing::debug;

use crate::config::StatsSettings;
use crate::error::AnalysisError;
use crate::models::Sample;

/// Kruskal-Wallis omnibus result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KruskalWallisResult {
    pub h_statistic: f64,
    pub p_value: f64,
    /// Epsilon-squared: (H - k + 1) / (n - k), floored at 0
    pub effect_size: f64,
    pub group_sizes: Vec<usize>,
}

/// Mann-Whitney U result (two-sided, normal approximation with tie and
/// continuity corrections)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MannWhitneyResult {
    pub u_statistic: f64,
    pub p_value: f64,
}

/// Sum of (t^3 - t) over tie runs
fn tie_term(values: &[f64]) -> f64 {
    let mut sorted: Vec<f64> = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).expect("NaN in rank data"));
    let mut term = 0.0;
    let mut run = 1usize;
    for i in 1..sorted.len() {
        if sorted[i] == sorted[i - 1] {
            run += 1;
        } else {
            if run > 1 {
                let t = run as f64;
                term += t * t * t - t;
            }
            run = 1;
        }
    }
    if run > 1 {
        let t = run as f64;
        term += t * t * t - t;
    }
    term
}

/// Rank-based k-sample test for equal distributions.
///
/// Requires at least two groups, each non-empty. Ties use average ranks
/// with the standard correction. When every observation is identical the
/// statistic carries no information and the result is H = 0, p = 1.
pub fn kruskal_wallis(groups: &[&[f64]]) -> Result<KruskalWallisResult, AnalysisError> {
    let k = groups.len();
    if k < 2 {
        return Err(AnalysisError::InsufficientSamples {
            context: "kruskal-wallis groups".to_string(),
            needed: 2,
            got: k,
        });
    }
    for (i, g) in groups.iter().enumerate() {
        if g.is_empty() {
            return Err(AnalysisError::InsufficientSamples {
                context: format!("kruskal-wallis group {}", i),
                needed: 1,
                got: 0,
            });
        }
    }

    let combined: Vec<f64> = groups.iter().flat_map(|g| g.iter().copied()).collect();
    let n = combined.len();
    if n <= k {
        return Err(AnalysisError::InsufficientSamples {
            context: "kruskal-wallis observations".to_string(),
            needed: k + 1,
            got: n,
        });
    }

    let ranks = Data::new(combined.clone()).ranks(RankTieBreaker::Average);

    let n_f = n as f64;
    let mut h = 0.0;
    let mut offset = 0;
    for g in groups {
        let rank_sum: f64 = ranks[offset..offset + g.len()].iter().sum();
        h += rank_sum * rank_sum / g.len() as f64;
        offset += g.len();
    }
    h = 12.0 / (n_f * (n_f + 1.0)) * h - 3.0 * (n_f + 1.0);

    let correction = 1.0 - tie_term(&combined) / (n_f * n_f * n_f - n_f);
    let (h_statistic, p_value) = if correction <= 0.0 {
        // Every observation identical: no detectable difference
        (0.0, 1.0)
    } else {
        let h = h / correction;
        let chi2 = ChiSquared::new((k - 1) as f64)
            .expect("chi-squared degrees of freedom is positive");
        (h, (1.0 - chi2.cdf(h)).clamp(0.0, 1.0))
    };

    Ok(KruskalWallisResult {
        h_statistic,
        p_value,
        effect_size: ((h_statistic - k as f64 + 1.0) / (n_f - k as f64)).max(0.0),
        group_sizes: groups.iter().map(|g| g.len()).collect(),
    })
}

/// Two-sided rank-sum test between two samples.
///
/// Reports U for the first sample and the normal-approximation p-value
/// with tie and continuity corrections.
pub fn mann_whitney_u(a: &[f64], b: &[f64]) -> Result<MannWhitneyResult, AnalysisError> {
    if a.is_empty() || b.is_empty() {
        return Err(AnalysisError::InsufficientSamples {
            context: "mann-whitney samples".to_string(),
            needed: 1,
            got: 0,
        });
    }

    let n1 = a.len() as f64;
    let n2 = b.len() as f64;
    let n = n1 + n2;

    let combined: Vec<f64> = a.iter().chain(b.iter()).copied().collect();
    let ranks = Data::new(combined.clone()).ranks(RankTieBreaker::Average);
    let rank_sum_a: f64 = ranks[..a.len()].iter().sum();
    let u_statistic = rank_sum_a - n1 * (n1 + 1.0) / 2.0;

    let mean = n1 * n2 / 2.0;
    let variance = n1 * n2 / 12.0 * ((n + 1.0) - tie_term(&combined) / (n * (n - 1.0)));
    if variance <= 0.0 {
        // All observations identical
        return Ok(MannWhitneyResult {
            u_statistic,
            p_value: 1.0,
        });
    }

    let centered = u_statistic - mean;
    let continuity = 0.5 * centered.signum();
    let z = (centered - continuity) / variance.sqrt();
    let normal = Normal::new(0.0, 1.0).expect("unit normal");
    let p_value = (2.0 * (1.0 - normal.cdf(z.abs()))).clamp(0.0, 1.0);

    Ok(MannWhitneyResult {
        u_statistic,
        p_value,
    })
}

/// One pairwise follow-up inside a tested bucket
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairwiseComparison {
    pub group_a: String,
    pub group_b: String,
    pub u_statistic: f64,
    pub p_value: f64,
    /// p below the Bonferroni-corrected threshold alpha / C(k,2)
    pub significant: bool,
}

/// Outcome for one time-of-day bucket
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BucketOutcome {
    /// One or more groups fell below the distinct-day gate; the bucket is
    /// reported undefined, preserving the time axis
    Undefined {
        /// (group, distinct days present) for groups below the gate
        insufficient: Vec<(String, usize)>,
    },
    Tested {
        h_statistic: f64,
        p_value: f64,
        effect_size: f64,
        group_medians: BTreeMap<String, f64>,
        /// Present only when the omnibus test is significant
        pairwise: Vec<PairwiseComparison>,
    },
}

/// Result for one bucket on the time axis
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeBucketResult {
    /// Bucket start, "HH:MM"
    pub bucket: String,
    pub outcome: BucketOutcome,
}

/// Per-group versus pooled-rest outcome for one bucket
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum VsRestOutcome {
    Undefined {
        group_days: usize,
        others_days: usize,
    },
    Tested {
        u_statistic: f64,
        p_value: f64,
        /// Uncorrected p < alpha. This variant deliberately carries no
        /// multiple-comparison correction, unlike the pairwise follow-ups;
        /// the asymmetry is intentional and preserved as-is.
        significant: bool,
        group_median: f64,
        others_median: f64,
        /// group_median - others_median
        difference: f64,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupVsRestResult {
    pub group: String,
    pub bucket: String,
    pub outcome: VsRestOutcome,
}

/// Runs bucket-by-bucket comparisons across groups
#[derive(Debug, Clone)]
pub struct TimeBucketComparator {
    settings: StatsSettings,
    start: NaiveTime,
    end: NaiveTime,
}

impl TimeBucketComparator {
    pub fn new(settings: StatsSettings, start: NaiveTime, end: NaiveTime) -> Self {
        Self {
            settings,
            start,
            end,
        }
    }

    /// All bucket starts spanning the working-hours window, inclusive.
    /// The axis is floored onto the same midnight-anchored grid that
    /// `floor_to_bucket` assigns samples to, so a window start that is not
    /// a multiple of the bucket width still lines up with its samples.
    fn buckets(&self) -> Vec<NaiveTime> {
        let step = self.settings.bucket_minutes;
        let mut out = Vec::new();
        let start_minutes = self.start.hour() * 60 + self.start.minute();
        let mut minutes = start_minutes - start_minutes % step;
        let end_minutes = self.end.hour() * 60 + self.end.minute();
        while minutes <= end_minutes {
            if let Some(t) = NaiveTime::from_hms_opt(minutes / 60, minutes % 60, 0) {
                out.push(t);
            }
            minutes += step;
        }
        out
    }

    fn floor_to_bucket(&self, t: NaiveTime) -> Option<NaiveTime> {
        let minutes = t.hour() * 60 + t.minute();
        let floored = minutes - minutes % self.settings.bucket_minutes;
        NaiveTime::from_hms_opt(floored / 60, floored % 60, 0)
    }

    /// Stress values and distinct days for one group at one bucket
    fn bucket_slice<'a>(
        &self,
        samples: &'a [Sample],
        bucket: NaiveTime,
    ) -> (Vec<f64>, usize) {
        let mut days = BTreeSet::new();
        let mut stress = Vec::new();
        for s in samples {
            if self.floor_to_bucket(s.local_time.time()) == Some(bucket) {
                stress.push(s.stress_score);
                days.insert(s.date());
            }
        }
        (stress, days.len())
    }

    /// Omnibus + pairwise comparisons for every bucket on the time axis
    pub fn compare(&self, groups: &BTreeMap<String, Vec<Sample>>) -> Vec<TimeBucketResult> {
        let k = groups.len();
        let pair_count = k * (k.saturating_sub(1)) / 2;
        let mut results = Vec::new();

        for bucket in self.buckets() {
            let label = bucket.format("%H:%M").to_string();

            let mut slices: Vec<(&String, Vec<f64>, usize)> = Vec::with_capacity(k);
            for (name, samples) in groups {
                let (stress, days) = self.bucket_slice(samples, bucket);
                slices.push((name, stress, days));
            }

            let insufficient: Vec<(String, usize)> = slices
                .iter()
                .filter(|(_, _, days)| *days < self.settings.min_days_per_group)
                .map(|(name, _, days)| ((*name).clone(), *days))
                .collect();
            if !insufficient.is_empty() || k < 2 {
                results.push(TimeBucketResult {
                    bucket: label,
                    outcome: BucketOutcome::Undefined { insufficient },
                });
                continue;
            }

            let views: Vec<&[f64]> = slices.iter().map(|(_, s, _)| s.as_slice()).collect();
            let omnibus = match kruskal_wallis(&views) {
                Ok(r) => r,
                Err(_) => {
                    results.push(TimeBucketResult {
                        bucket: label,
                        outcome: BucketOutcome::Undefined {
                            insufficient: Vec::new(),
                        },
                    });
                    continue;
                }
            };

            let group_medians: BTreeMap<String, f64> = slices
                .iter()
                .map(|(name, stress, _)| {
                    ((*name).clone(), Data::new(stress.clone()).median())
                })
                .collect();

            let mut pairwise = Vec::new();
            if omnibus.p_value < self.settings.alpha && pair_count > 0 {
                let corrected_alpha = self.settings.alpha / pair_count as f64;
                for i in 0..slices.len() {
                    for j in (i + 1)..slices.len() {
                        if let Ok(result) = mann_whitney_u(&slices[i].1, &slices[j].1) {
                            pairwise.push(PairwiseComparison {
                                group_a: slices[i].0.clone(),
                                group_b: slices[j].0.clone(),
                                u_statistic: result.u_statistic,
                                p_value: result.p_value,
                                significant: result.p_value < corrected_alpha,
                            });
                        }
                    }
                }
            }

            results.push(TimeBucketResult {
                bucket: label,
                outcome: BucketOutcome::Tested {
                    h_statistic: omnibus.h_statistic,
                    p_value: omnibus.p_value,
                    effect_size: omnibus.effect_size,
                    group_medians,
                    pairwise,
                },
            });
        }

        debug!(buckets = results.len(), "time-bucket comparison finished");
        results
    }

    /// Each group against the pooled rest, per bucket. Same day gate and
    /// test as the pairwise variant, but no correction across groups.
    pub fn compare_vs_rest(
        &self,
        groups: &BTreeMap<String, Vec<Sample>>,
    ) -> Vec<GroupVsRestResult> {
        let mut results = Vec::new();
        if groups.len() < 2 {
            return results;
        }

        for bucket in self.buckets() {
            let label = bucket.format("%H:%M").to_string();
            for (name, samples) in groups {
                let (group_stress, group_days) = self.bucket_slice(samples, bucket);

                let mut others_stress = Vec::new();
                let mut others_days = BTreeSet::new();
                for (other_name, other_samples) in groups {
                    if other_name == name {
                        continue;
                    }
                    for s in other_samples {
                        if self.floor_to_bucket(s.local_time.time()) == Some(bucket) {
                            others_stress.push(s.stress_score);
                            others_days.insert(s.date());
                        }
                    }
                }
                let others_days = others_days.len();

                if group_days < self.settings.min_days_per_group
                    || others_days < self.settings.min_days_per_group
                {
                    results.push(GroupVsRestResult {
                        group: name.clone(),
                        bucket: label.clone(),
                        outcome: VsRestOutcome::Undefined {
                            group_days,
                            others_days,
                        },
                    });
                    continue;
                }

                let Ok(test) = mann_whitney_u(&group_stress, &others_stress) else {
                    results.push(GroupVsRestResult {
                        group: name.clone(),
                        bucket: label.clone(),
                        outcome: VsRestOutcome::Undefined {
                            group_days,
                            others_days,
                        },
                    });
                    continue;
                };

                let group_median = Data::new(group_stress).median();
                let others_median = Data::new(others_stress).median();
                results.push(GroupVsRestResult {
                    group: name.clone(),
                    bucket: label.clone(),
                    outcome: VsRestOutcome::Tested {
                        u_statistic: test.u_statistic,
                        p_value: test.p_value,
                        significant: test.p_value < self.settings.alpha,
                        group_median,
                        others_median,
                        difference: group_median - others_median,
                    },
                });
            }
        }
        results
    }
}
