//! Break detection: sustained drops in smoothed stress
//!
//! A break opens at the first sample where the smoothed first difference
//! falls below -stress_drop and closes at the first later sample where it
//! rises above +stress_drop. Segments shorter than the configured duration
//! are discarded. Detection is a single left-to-right pass per user, so
//! re-running on the same series yields identical boundaries.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{AnalysisConfig, BreakSettings};
use crate::hypothesis::{mann_whitney_u, MannWhitneyResult};
use crate::models::{BreakEvent, Sample};

/// Detects breaks in per-user stress series
#[derive(Debug, Clone)]
pub struct BreakDetector {
    settings: BreakSettings,
}

impl BreakDetector {
    pub fn new(settings: BreakSettings) -> Self {
        Self { settings }
    }

    pub fn from_config(config: &AnalysisConfig) -> Self {
        Self::new(config.breaks.clone())
    }

    /// Detect breaks for one user. `samples` may arrive unsorted; they are
    /// ordered by local time before smoothing.
    pub fn detect_user(&self, user_id: &str, samples: &[Sample]) -> Vec<BreakEvent> {
        let mut ordered: Vec<&Sample> = samples
            .iter()
            .filter(|s| s.user_id == user_id)
            .collect();
        ordered.sort_by_key(|s| s.local_time);
        if ordered.len() < 2 {
            return Vec::new();
        }

        let stress: Vec<f64> = ordered.iter().map(|s| s.stress_score).collect();
        let smooth = trailing_mean(&stress, self.settings.smoothing_window);

        let mut events = Vec::new();
        let mut break_start: Option<usize> = None;
        for i in 1..smooth.len() {
            let diff = smooth[i] - smooth[i - 1];
            match break_start {
                None if diff < -self.settings.stress_drop => {
                    break_start = Some(i);
                }
                Some(start) if diff > self.settings.stress_drop => {
                    let start_time = ordered[start].local_time;
                    let end_time = ordered[i].local_time;
                    let duration_minutes =
                        (end_time - start_time).num_seconds() as f64 / 60.0;
                    if duration_minutes >= self.settings.min_duration_minutes {
                        let segment = &stress[start..=i];
                        let mean_stress =
                            segment.iter().sum::<f64>() / segment.len() as f64;
                        events.push(BreakEvent {
                            user_id: user_id.to_string(),
                            start_time,
                            end_time,
                            duration_minutes,
                            stress_reduction: mean_stress,
                        });
                    }
                    break_start = None;
                }
                _ => {}
            }
        }

        debug!(user_id, breaks = events.len(), "break detection finished");
        events
    }

    /// Detect breaks for every user in a group's samples
    pub fn detect_group(&self, samples: &[Sample]) -> Vec<BreakEvent> {
        let mut user_ids: Vec<&str> = samples.iter().map(|s| s.user_id.as_str()).collect();
        user_ids.sort_unstable();
        user_ids.dedup();

        let mut events = Vec::new();
        for user_id in user_ids {
            events.extend(self.detect_user(user_id, samples));
        }
        events
    }
}

/// Trailing moving average with a shrinking window at the series head
fn trailing_mean(values: &[f64], window: usize) -> Vec<f64> {
    let window = window.max(1);
    let mut out = Vec::with_capacity(values.len());
    for i in 0..values.len() {
        let lo = i.saturating_sub(window - 1);
        let slice = &values[lo..=i];
        out.push(slice.iter().sum::<f64>() / slice.len() as f64);
    }
    out
}

/// Aggregate break behavior for one group
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakSummary {
    pub count: usize,
    pub mean_duration_minutes: Option<f64>,
    /// Breaks per user with at least one sample in the group
    pub breaks_per_user: Option<f64>,
    /// Most common start hours with their counts, up to three
    pub common_start_hours: Vec<(u32, usize)>,
    pub mean_stress_reduction: Option<f64>,
}

/// Summarize timing and magnitude patterns for a group's breaks
pub fn summarize_breaks(events: &[BreakEvent], user_count: usize) -> BreakSummary {
    if events.is_empty() {
        return BreakSummary {
            count: 0,
            mean_duration_minutes: None,
            breaks_per_user: None,
            common_start_hours: Vec::new(),
            mean_stress_reduction: None,
        };
    }

    let n = events.len() as f64;
    let mean_duration = events.iter().map(|e| e.duration_minutes).sum::<f64>() / n;
    let mean_reduction = events.iter().map(|e| e.stress_reduction).sum::<f64>() / n;

    let mut hour_counts: BTreeMap<u32, usize> = BTreeMap::new();
    for event in events {
        use chrono::Timelike;
        *hour_counts.entry(event.start_time.hour()).or_default() += 1;
    }
    let mut hours: Vec<(u32, usize)> = hour_counts.into_iter().collect();
    hours.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    hours.truncate(3);

    BreakSummary {
        count: events.len(),
        mean_duration_minutes: Some(mean_duration),
        breaks_per_user: (user_count > 0).then(|| n / user_count as f64),
        common_start_hours: hours,
        mean_stress_reduction: Some(mean_reduction),
    }
}

/// Rank-sum comparison of break durations between two groups
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakComparison {
    pub group_a: String,
    pub group_b: String,
    pub u_statistic: f64,
    pub p_value: f64,
    /// U / sqrt(n_a * n_b)
    pub effect_size: f64,
}

/// Pairwise Mann-Whitney comparison of break durations across groups.
/// Pairs where either group has no breaks are skipped.
pub fn compare_break_durations(
    groups: &BTreeMap<String, Vec<BreakEvent>>,
) -> Vec<BreakComparison> {
    let names: Vec<&String> = groups.keys().collect();
    let mut comparisons = Vec::new();
    for i in 0..names.len() {
        for j in (i + 1)..names.len() {
            let a: Vec<f64> = groups[names[i]].iter().map(|e| e.duration_minutes).collect();
            let b: Vec<f64> = groups[names[j]].iter().map(|e| e.duration_minutes).collect();
            if a.is_empty() || b.is_empty() {
                continue;
            }
            if let Ok(MannWhitneyResult { u_statistic, p_value }) = mann_whitney_u(&a, &b) {
                comparisons.push(BreakComparison {
                    group_a: names[i].clone(),
                    group_b: names[j].clone(),
                    u_statistic,
                    p_value,
                    effect_size: u_statistic / (a.len() as f64 * b.len() as f64).sqrt(),
                });
            }
        }
    }
    comparisons
}
