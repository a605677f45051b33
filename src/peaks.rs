//! Stress peak detection and recovery analysis
//!
//! Local-maxima detection with prominence and width gating over the raw
//! stress series, followed by recovery-time estimation. Recovery is the
//! first later sample where stress returns to within a fraction (default
//! 20%) of the peak's rise above the pre-peak baseline mean; peaks that
//! never recover within the series carry no recovery time and are excluded
//! from duration statistics.

use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, OrderStatistics, Statistics};
use tracing::debug;

use crate::config::{AnalysisConfig, PeakSettings};
use crate::models::{PeakEvent, Sample};

/// Detects stress peaks in per-user series
#[derive(Debug, Clone)]
pub struct PeakDetector {
    settings: PeakSettings,
}

/// A candidate local maximum before event construction
#[derive(Debug, Clone, Copy, PartialEq)]
struct PeakCandidate {
    index: usize,
    prominence: f64,
    width: f64,
}

impl PeakDetector {
    pub fn new(settings: PeakSettings) -> Self {
        Self { settings }
    }

    pub fn from_config(config: &AnalysisConfig) -> Self {
        Self::new(config.peaks.clone())
    }

    /// Detect peaks for one user, samples ordered by local time
    pub fn detect_user(&self, user_id: &str, samples: &[Sample]) -> Vec<PeakEvent> {
        let mut ordered: Vec<&Sample> = samples
            .iter()
            .filter(|s| s.user_id == user_id)
            .collect();
        ordered.sort_by_key(|s| s.local_time);
        if ordered.len() < 3 {
            return Vec::new();
        }

        let stress: Vec<f64> = ordered.iter().map(|s| s.stress_score).collect();
        let candidates = find_peaks(&stress, self.settings.prominence, self.settings.min_width);

        let events: Vec<PeakEvent> = candidates
            .into_iter()
            .map(|c| {
                let peak_value = stress[c.index];
                let recovery_minutes =
                    self.recovery_minutes(&ordered, &stress, c.index, peak_value);
                PeakEvent {
                    user_id: user_id.to_string(),
                    peak_time: ordered[c.index].local_time,
                    peak_value,
                    prominence: c.prominence,
                    width: c.width,
                    recovery_minutes,
                }
            })
            .collect();

        debug!(user_id, peaks = events.len(), "peak detection finished");
        events
    }

    /// Detect peaks for every user in a group's samples
    pub fn detect_group(&self, samples: &[Sample]) -> Vec<PeakEvent> {
        let mut user_ids: Vec<&str> = samples.iter().map(|s| s.user_id.as_str()).collect();
        user_ids.sort_unstable();
        user_ids.dedup();

        let mut events = Vec::new();
        for user_id in user_ids {
            events.extend(self.detect_user(user_id, samples));
        }
        events
    }

    /// Minutes from the peak until stress first returns to within
    /// `recovery_fraction` of the rise above the pre-peak baseline mean.
    fn recovery_minutes(
        &self,
        ordered: &[&Sample],
        stress: &[f64],
        peak_index: usize,
        peak_value: f64,
    ) -> Option<f64> {
        // Local maxima always have at least one predecessor
        let baseline = Statistics::mean(&stress[..peak_index]);
        let threshold = baseline + (peak_value - baseline) * self.settings.recovery_fraction;

        for i in (peak_index + 1)..stress.len() {
            if stress[i] <= threshold {
                let minutes = (ordered[i].local_time - ordered[peak_index].local_time)
                    .num_seconds() as f64
                    / 60.0;
                return Some(minutes);
            }
        }
        None
    }
}

/// Local maxima with prominence and half-prominence-width gating.
/// Plateaus resolve to their midpoint sample.
fn find_peaks(values: &[f64], min_prominence: f64, min_width: f64) -> Vec<PeakCandidate> {
    let n = values.len();
    let mut candidates = Vec::new();
    let mut i = 1;
    while i + 1 < n {
        if values[i - 1] < values[i] {
            let mut j = i;
            while j + 1 < n && values[j + 1] == values[i] {
                j += 1;
            }
            if j + 1 < n && values[j + 1] < values[i] {
                let index = (i + j) / 2;
                let prominence = prominence_at(values, index);
                if prominence >= min_prominence {
                    let width = width_at_half_prominence(values, index, prominence);
                    if width >= min_width {
                        candidates.push(PeakCandidate {
                            index,
                            prominence,
                            width,
                        });
                    }
                }
                i = j + 2;
                continue;
            }
            i = j + 1;
            continue;
        }
        i += 1;
    }
    candidates
}

/// Topographic prominence: height above the higher of the two base minima,
/// where each base extends to the nearest strictly higher point or series
/// end.
fn prominence_at(values: &[f64], peak: usize) -> f64 {
    let peak_value = values[peak];

    let mut left_min = peak_value;
    for i in (0..peak).rev() {
        if values[i] > peak_value {
            break;
        }
        left_min = left_min.min(values[i]);
    }

    let mut right_min = peak_value;
    for &value in &values[peak + 1..] {
        if value > peak_value {
            break;
        }
        right_min = right_min.min(value);
    }

    peak_value - left_min.max(right_min)
}

/// Width (in samples) where the signal crosses peak - prominence/2, with
/// linear interpolation at the crossings.
fn width_at_half_prominence(values: &[f64], peak: usize, prominence: f64) -> f64 {
    let height = values[peak] - prominence / 2.0;

    let mut left = peak as f64;
    for i in (0..peak).rev() {
        if values[i] <= height {
            let span = values[i + 1] - values[i];
            let frac = if span.abs() > f64::EPSILON {
                (height - values[i]) / span
            } else {
                0.0
            };
            left = i as f64 + frac;
            break;
        }
        if i == 0 {
            left = 0.0;
        }
    }

    let mut right = peak as f64;
    let n = values.len();
    for i in (peak + 1)..n {
        if values[i] <= height {
            let span = values[i - 1] - values[i];
            let frac = if span.abs() > f64::EPSILON {
                (height - values[i]) / span
            } else {
                0.0
            };
            right = i as f64 - frac;
            break;
        }
        if i == n - 1 {
            right = (n - 1) as f64;
        }
    }

    right - left
}

/// Aggregate peak behavior for one group
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeakSummary {
    pub count: usize,
    pub mean_peak_value: Option<f64>,
    pub peaks_per_user: Option<f64>,
    pub mean_prominence: Option<f64>,
}

/// Recovery statistics for one group; undefined recoveries are excluded
/// from the duration figures, never coerced to zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryMetrics {
    /// Median recovery time over recovered peaks
    pub median_recovery_minutes: Option<f64>,
    /// Sample standard deviation of recovery times
    pub recovery_std_minutes: Option<f64>,
    /// Share of peaks that recovered within the series (0-100)
    pub recovery_success_rate: Option<f64>,
    pub recovered: usize,
    pub unrecovered: usize,
}

pub fn summarize_peaks(events: &[PeakEvent], user_count: usize) -> PeakSummary {
    if events.is_empty() {
        return PeakSummary {
            count: 0,
            mean_peak_value: None,
            peaks_per_user: None,
            mean_prominence: None,
        };
    }
    let n = events.len() as f64;
    PeakSummary {
        count: events.len(),
        mean_peak_value: Some(events.iter().map(|e| e.peak_value).sum::<f64>() / n),
        peaks_per_user: (user_count > 0).then(|| n / user_count as f64),
        mean_prominence: Some(events.iter().map(|e| e.prominence).sum::<f64>() / n),
    }
}

pub fn recovery_metrics(events: &[PeakEvent]) -> RecoveryMetrics {
    let recoveries: Vec<f64> = events.iter().filter_map(|e| e.recovery_minutes).collect();
    let recovered = recoveries.len();
    let unrecovered = events.len() - recovered;

    if recovered == 0 {
        return RecoveryMetrics {
            median_recovery_minutes: None,
            recovery_std_minutes: None,
            recovery_success_rate: (!events.is_empty()).then_some(0.0),
            recovered,
            unrecovered,
        };
    }

    let median = Data::new(recoveries.clone()).median();
    let std = (recovered > 1).then(|| Statistics::std_dev(&recoveries));

    RecoveryMetrics {
        median_recovery_minutes: Some(median),
        recovery_std_minutes: std,
        recovery_success_rate: Some(recovered as f64 / events.len() as f64 * 100.0),
        recovered,
        unrecovered,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate, Utc};

    fn series(user_id: &str, stress: &[f64], step_minutes: i64) -> Vec<Sample> {
        let base = NaiveDate::from_ymd_opt(2024, 2, 5)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap();
        stress
            .iter()
            .enumerate()
            .map(|(i, &score)| Sample {
                user_id: user_id.to_string(),
                timestamp: Utc::now(),
                local_time: base + Duration::minutes(i as i64 * step_minutes),
                heart_rate: 70.0,
                stress_score: score,
                group: "KB3".to_string(),
                is_working_hours: true,
                age: Some(30),
            })
            .collect()
    }

    fn detector(prominence: f64, min_width: f64) -> PeakDetector {
        PeakDetector::new(PeakSettings {
            prominence,
            min_width,
            recovery_fraction: 0.2,
        })
    }

    #[test]
    fn test_prominence_of_isolated_peak() {
        let values = [10.0, 10.0, 50.0, 10.0, 10.0];
        assert_eq!(prominence_at(&values, 2), 40.0);
    }

    #[test]
    fn test_find_peaks_plateau_midpoint() {
        let values = [0.0, 10.0, 10.0, 10.0, 0.0];
        let peaks = find_peaks(&values, 5.0, 0.0);
        assert_eq!(peaks.len(), 1);
        assert_eq!(peaks[0].index, 2);
    }

    #[test]
    fn test_low_prominence_peaks_rejected() {
        let values = [10.0, 14.0, 10.0, 14.0, 10.0];
        let peaks = find_peaks(&values, 20.0, 0.0);
        assert!(peaks.is_empty());
    }

    #[test]
    fn test_recovery_after_peak() {
        // baseline before peak ~20, peak 80; threshold 20 + 0.2*60 = 32
        let stress = [20.0, 20.0, 20.0, 80.0, 60.0, 40.0, 30.0, 20.0];
        let samples = series("u1", &stress, 5);
        let events = detector(30.0, 0.0).detect_user("u1", &samples);

        assert_eq!(events.len(), 1);
        let event = &events[0];
        // First sample at or below threshold is index 6, three steps after
        // the peak at index 3
        assert_eq!(event.recovery_minutes, Some(15.0));
    }

    #[test]
    fn test_recovery_never_reached_is_none() {
        // Peak 80 over base 20 with a 45-47 tail: prominence is
        // 80 - max(20, 45) = 35, but the tail never reaches the
        // recovery threshold 20 + 0.2*60 = 32
        let stress = [20.0, 20.0, 20.0, 80.0, 45.0, 46.0, 47.0];
        let samples = series("u1", &stress, 5);
        let events = detector(30.0, 0.0).detect_user("u1", &samples);

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].recovery_minutes, None);
    }

    #[test]
    fn test_recovery_metrics_exclude_unrecovered() {
        let mk = |recovery: Option<f64>| PeakEvent {
            user_id: "u1".to_string(),
            peak_time: NaiveDate::from_ymd_opt(2024, 2, 5)
                .unwrap()
                .and_hms_opt(10, 0, 0)
                .unwrap(),
            peak_value: 80.0,
            prominence: 40.0,
            width: 5.0,
            recovery_minutes: recovery,
        };
        let events = vec![mk(Some(10.0)), mk(Some(20.0)), mk(None)];
        let metrics = recovery_metrics(&events);

        assert_eq!(metrics.recovered, 2);
        assert_eq!(metrics.unrecovered, 1);
        assert_eq!(metrics.median_recovery_minutes, Some(15.0));
        let rate = metrics.recovery_success_rate.unwrap();
        assert!((rate - 66.666).abs() < 0.01);
    }

    #[test]
    fn test_summaries_on_empty_input() {
        assert_eq!(summarize_peaks(&[], 2).count, 0);
        let metrics = recovery_metrics(&[]);
        assert!(metrics.recovery_success_rate.is_none());
    }
}
