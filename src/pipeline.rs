//! End-to-end analysis pipeline
//!
//! Orchestrates the forward dataflow: cleaned samples -> baseline table ->
//! per-group activity, transition, break/peak, and variance results ->
//! cross-group hypothesis tests -> productivity correlations. Groups are
//! independent, so per-group work runs on the rayon pool. Per-user and
//! per-group failures stay local and are reported in the skip ledger; only
//! an empty input stream aborts the run.

use std::collections::BTreeMap;

use rayon::prelude::*;
use serde::Serialize;
use tracing::{info, warn};

use crate::activity::{activity_distribution, ActivityClassifier, ActivityDistribution};
use crate::baseline::{BaselineEstimator, BaselineTable};
use crate::breaks::{
    compare_break_durations, summarize_breaks, BreakComparison, BreakDetector, BreakSummary,
};
use crate::config::AnalysisConfig;
use crate::correlation::{
    correlate_by_group, join_productivity, monthly_summaries, JoinedMonth, MetricCorrelation,
};
use crate::error::{AnalysisError, Result, SitePulseError};
use crate::hypothesis::{BucketOutcome, GroupVsRestResult, TimeBucketComparator, TimeBucketResult};
use crate::markov::{TransitionEngine, TransitionModel};
use crate::models::{Baseline, BreakEvent, PeakEvent, ProductivityRecord, Sample};
use crate::peaks::{recovery_metrics, summarize_peaks, PeakDetector, PeakSummary, RecoveryMetrics};
use crate::variance::{
    consistency_scores, detect_outliers, variance_components, weekday_patterns,
    ConsistencyScores, VarianceComponents, WeekdayPattern,
};

/// One skipped user/group/bucket with the reason
#[derive(Debug, Clone, Serialize)]
pub struct SkipEntry {
    pub subject: String,
    pub reason: String,
}

/// Complete per-group analysis results
#[derive(Debug, Clone, Serialize)]
pub struct GroupReport {
    pub group: String,
    pub sample_count: usize,
    pub user_count: usize,
    pub activity: ActivityDistribution,
    pub transitions: TransitionModel,
    pub breaks: Vec<BreakEvent>,
    pub break_summary: BreakSummary,
    pub peaks: Vec<PeakEvent>,
    pub peak_summary: PeakSummary,
    pub recovery: RecoveryMetrics,
    pub variance: VarianceComponents,
    pub consistency: ConsistencyScores,
    pub weekday: Vec<WeekdayPattern>,
    pub outlier_count: usize,
}

/// Full run output: computed results plus the skip ledger
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub baselines: BTreeMap<String, Baseline>,
    pub skipped_users: Vec<SkipEntry>,
    pub groups: BTreeMap<String, GroupReport>,
    pub time_comparisons: Vec<TimeBucketResult>,
    /// Buckets marked undefined for insufficient data
    pub undefined_buckets: usize,
    pub group_vs_rest: Vec<GroupVsRestResult>,
    pub break_comparisons: Vec<BreakComparison>,
    pub monthly: Vec<JoinedMonth>,
    pub correlations: BTreeMap<String, Vec<MetricCorrelation>>,
}

/// Batch analysis over a fixed input; construction validates the config
#[derive(Debug, Clone)]
pub struct AnalysisPipeline {
    config: AnalysisConfig,
}

impl AnalysisPipeline {
    pub fn new(config: AnalysisConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| SitePulseError::Configuration(e.to_string()))?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Run the full analysis over cleaned samples and productivity records
    pub fn run(
        &self,
        samples: &[Sample],
        productivity: &[ProductivityRecord],
    ) -> Result<AnalysisReport> {
        if samples.is_empty() {
            return Err(AnalysisError::EmptyInput("biometric sample stream".to_string()).into());
        }

        info!(
            samples = samples.len(),
            productivity = productivity.len(),
            "starting analysis run"
        );

        let estimator = BaselineEstimator::from_config(&self.config);
        let baselines = estimator.estimate_all(samples);
        let skipped_users: Vec<SkipEntry> = baselines
            .skipped
            .iter()
            .map(|err| SkipEntry {
                subject: skip_subject(err),
                reason: err.to_string(),
            })
            .collect();

        let mut by_group: BTreeMap<String, Vec<Sample>> = BTreeMap::new();
        for s in samples {
            by_group
                .entry(s.group.to_uppercase())
                .or_default()
                .push(s.clone());
        }

        let classifier = ActivityClassifier::from_config(&self.config);
        let break_detector = BreakDetector::from_config(&self.config);
        let peak_detector = PeakDetector::from_config(&self.config);
        let engine = TransitionEngine::new();

        let group_reports: Vec<GroupReport> = by_group
            .par_iter()
            .map(|(group, group_samples)| {
                self.analyze_group(
                    group,
                    group_samples,
                    &baselines,
                    &classifier,
                    &engine,
                    &break_detector,
                    &peak_detector,
                )
            })
            .collect();
        let groups: BTreeMap<String, GroupReport> = group_reports
            .into_iter()
            .map(|r| (r.group.clone(), r))
            .collect();

        let (start, end) = self
            .config
            .working_hours
            .bounds()
            .map_err(|e| SitePulseError::Configuration(e.to_string()))?;
        let comparator = TimeBucketComparator::new(self.config.stats.clone(), start, end);
        let time_comparisons = comparator.compare(&by_group);
        let undefined_buckets = time_comparisons
            .iter()
            .filter(|r| matches!(r.outcome, BucketOutcome::Undefined { .. }))
            .count();
        if undefined_buckets > 0 {
            warn!(
                undefined_buckets,
                total_buckets = time_comparisons.len(),
                "some time buckets lacked the minimum days of data"
            );
        }
        let group_vs_rest = comparator.compare_vs_rest(&by_group);

        let breaks_by_group: BTreeMap<String, Vec<BreakEvent>> = groups
            .iter()
            .map(|(name, report)| (name.clone(), report.breaks.clone()))
            .collect();
        let break_comparisons = compare_break_durations(&breaks_by_group);

        let summaries = monthly_summaries(samples);
        let monthly = join_productivity(&summaries, productivity);
        let correlations = correlate_by_group(&monthly);

        info!(
            groups = groups.len(),
            skipped_users = skipped_users.len(),
            joined_months = monthly.len(),
            "analysis run complete"
        );

        Ok(AnalysisReport {
            baselines: baselines.baselines,
            skipped_users,
            groups,
            time_comparisons,
            undefined_buckets,
            group_vs_rest,
            break_comparisons,
            monthly,
            correlations,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn analyze_group(
        &self,
        group: &str,
        samples: &[Sample],
        baselines: &BaselineTable,
        classifier: &ActivityClassifier,
        engine: &TransitionEngine,
        break_detector: &BreakDetector,
        peak_detector: &PeakDetector,
    ) -> GroupReport {
        let mut users: Vec<&str> = samples.iter().map(|s| s.user_id.as_str()).collect();
        users.sort_unstable();
        users.dedup();
        let user_count = users.len();

        let activity = activity_distribution(samples, baselines, classifier);
        let transitions = engine.build(group, samples, baselines, classifier);

        let breaks = break_detector.detect_group(samples);
        let break_summary = summarize_breaks(&breaks, user_count);

        let peaks = peak_detector.detect_group(samples);
        let peak_summary = summarize_peaks(&peaks, user_count);
        let recovery = recovery_metrics(&peaks);

        let variance = variance_components(samples);
        let consistency = consistency_scores(samples);
        let weekday = weekday_patterns(samples);
        let stress: Vec<f64> = samples.iter().map(|s| s.stress_score).collect();
        let outlier_count = detect_outliers(&stress, self.config.stats.outlier_method).len();

        GroupReport {
            group: group.to_string(),
            sample_count: samples.len(),
            user_count,
            activity,
            transitions,
            breaks,
            break_summary,
            peaks,
            peak_summary,
            recovery,
            variance,
            consistency,
            weekday,
            outlier_count,
        }
    }
}

fn skip_subject(err: &AnalysisError) -> String {
    match err {
        AnalysisError::MissingBaseline { user_id, .. }
        | AnalysisError::DegenerateReserve { user_id, .. } => user_id.clone(),
        AnalysisError::EmptyTransition { group, .. } => group.clone(),
        AnalysisError::InsufficientSamples { context, .. } => context.clone(),
        AnalysisError::EmptyInput(what) => what.clone(),
    }
}
