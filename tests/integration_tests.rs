use chrono::{Duration, NaiveDate, Utc};

use sitepulse::activity::ActivityClassifier;
use sitepulse::baseline::BaselineEstimator;
use sitepulse::config::AnalysisConfig;
use sitepulse::hypothesis::BucketOutcome;
use sitepulse::markov::DurationEstimate;
use sitepulse::models::{ActivityState, ProductivityRecord, Sample};
use sitepulse::pipeline::AnalysisPipeline;

/// Integration tests exercising complete analysis workflows

fn sample(
    user: &str,
    group: &str,
    day_offset: i64,
    minutes: i64,
    hr: f64,
    stress: f64,
) -> Sample {
    let local = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap()
        + Duration::days(day_offset);
    Sample {
        user_id: user.to_string(),
        timestamp: Utc::now(),
        local_time: local.and_hms_opt(9, 0, 0).unwrap() + Duration::minutes(minutes),
        heart_rate: hr,
        stress_score: stress,
        group: group.to_string(),
        is_working_hours: true,
        age: Some(30),
    }
}

/// Three users with the reference heart-rate ladder: baseline lands near
/// the series minimum and the high samples classify as moderate.
#[test]
fn test_baseline_and_classification_scenario() {
    let heart_rates = [70.0, 75.0, 80.0, 130.0, 135.0];
    let mut samples = Vec::new();
    for user in ["u1", "u2", "u3"] {
        for (i, &hr) in heart_rates.iter().enumerate() {
            samples.push(sample(user, "DALMUIR", 0, i as i64 * 5, hr, 30.0));
        }
    }

    let config = AnalysisConfig::default();
    let estimator = BaselineEstimator::from_config(&config);
    let table = estimator.estimate_all(&samples);
    let classifier = ActivityClassifier::from_config(&config);

    for user in ["u1", "u2", "u3"] {
        let baseline = table.get(user).expect("baseline exists");
        assert_eq!(baseline.max_hr, 190.0);
        assert!((baseline.resting_hr - 70.0).abs() < 2.0);
        assert!((baseline.hr_reserve - 120.0).abs() < 2.0);

        // 130 bpm is ~50% of reserve, 135 bpm ~54%: both moderate
        assert_eq!(
            classifier.classify(130.0, baseline).unwrap(),
            ActivityState::Moderate
        );
        assert_eq!(
            classifier.classify(135.0, baseline).unwrap(),
            ActivityState::Moderate
        );
    }
}

/// A single user at constant heart rate: the occupied state is absorbing
/// with unbounded expected duration, every other row undefined.
#[test]
fn test_constant_series_transition_scenario() {
    let samples: Vec<Sample> = (0..50)
        .map(|i| sample("u1", "KB3", 0, i * 5, 70.0, 20.0))
        .collect();

    let config = AnalysisConfig::default();
    let pipeline = AnalysisPipeline::new(config).unwrap();
    let report = pipeline.run(&samples, &[]).unwrap();

    let model = &report.groups["KB3"].transitions;
    let sedentary = ActivityState::Sedentary;
    assert_eq!(model.probability(sedentary, sedentary), Some(1.0));
    assert_eq!(
        model.expected_duration[sedentary.index()],
        DurationEstimate::Unbounded
    );
    for state in [ActivityState::Light, ActivityState::Moderate, ActivityState::Intense] {
        assert!(model.rows[state.index()].is_none());
        assert_eq!(
            model.expected_duration[state.index()],
            DurationEstimate::Undefined
        );
    }
    assert_eq!(model.steady_state[sedentary.index()], Some(1.0));
    assert!(!model.anomalies.is_empty());
}

/// Fully separated stress distributions at one bucket: the omnibus test is
/// decisive and the pairwise difference survives Bonferroni correction.
#[test]
fn test_separated_groups_hypothesis_scenario() {
    let mut samples = Vec::new();
    for day in 0..10 {
        for i in 0..5 {
            samples.push(sample("a1", "A", day, i * 2, 50.0, 10.0));
            samples.push(sample("b1", "B", day, i * 2, 130.0, 90.0));
        }
    }

    let pipeline = AnalysisPipeline::new(AnalysisConfig::default()).unwrap();
    let report = pipeline.run(&samples, &[]).unwrap();

    let tested = report
        .time_comparisons
        .iter()
        .find(|r| r.bucket == "09:00")
        .expect("09:00 bucket present");
    match &tested.outcome {
        BucketOutcome::Tested {
            p_value, pairwise, ..
        } => {
            assert!(*p_value < 0.001);
            assert_eq!(pairwise.len(), 1);
            assert!(pairwise[0].significant);
        }
        other => panic!("expected tested bucket, got {:?}", other),
    }

    // Bonferroni never reports more significant pairs than uncorrected
    for result in &report.time_comparisons {
        if let BucketOutcome::Tested { pairwise, .. } = &result.outcome {
            let corrected = pairwise.iter().filter(|p| p.significant).count();
            let uncorrected = pairwise.iter().filter(|p| p.p_value < 0.05).count();
            assert!(corrected <= uncorrected);
        }
    }
}

/// The correlation layer joins on (year, month, site) and never produces
/// more rows than either side holds.
#[test]
fn test_correlation_join_scenario() {
    let mut samples = Vec::new();
    for month in 1..=4u32 {
        for day in 0..3 {
            let local = NaiveDate::from_ymd_opt(2024, month, 4 + day).unwrap();
            samples.push(Sample {
                user_id: "u1".to_string(),
                timestamp: Utc::now(),
                local_time: local.and_hms_opt(10, 0, 0).unwrap(),
                heart_rate: 80.0 + month as f64,
                stress_score: 30.0 + month as f64,
                group: "KILMALID".to_string(),
                is_working_hours: true,
                age: Some(30),
            });
        }
    }

    // Productivity covers months 2-5: inner join keeps 2, 3, 4 only
    let productivity: Vec<ProductivityRecord> = (2..=5u32)
        .map(|month| ProductivityRecord {
            year: 2024,
            month,
            site: "Kilmalid".to_string(),
            receipts: 1000.0 + month as f64 * 50.0,
            dispatches: 400.0,
        })
        .collect();

    let pipeline = AnalysisPipeline::new(AnalysisConfig::default()).unwrap();
    let report = pipeline.run(&samples, &productivity).unwrap();

    assert_eq!(report.monthly.len(), 3);
    assert!(report.monthly.len() <= productivity.len());
    for month in &report.monthly {
        assert_eq!(month.group, "KILMALID");
        assert!(month.productivity_stress_ratio.is_some());
    }
    assert!(report.correlations.contains_key("KILMALID"));
    assert_eq!(report.correlations["KILMALID"].len(), 4);
}

/// Steady-state vectors from a mixed workload stay on the probability
/// simplex and transition rows stay stochastic.
#[test]
fn test_full_pipeline_invariants() {
    let mut samples = Vec::new();
    // Alternate between resting and working heart rates over several days
    for day in 0..6 {
        for i in 0..40 {
            let hr = if (i / 4) % 2 == 0 { 72.0 } else { 125.0 };
            let stress = if hr > 100.0 { 70.0 } else { 25.0 };
            samples.push(sample("u1", "DALMUIR", day, i * 5, hr, stress));
            samples.push(sample("u2", "DALMUIR", day, i * 5, hr + 2.0, stress + 2.0));
        }
    }

    let pipeline = AnalysisPipeline::new(AnalysisConfig::default()).unwrap();
    let report = pipeline.run(&samples, &[]).unwrap();
    let model = &report.groups["DALMUIR"].transitions;

    for row in model.rows.iter().flatten() {
        let sum: f64 = row.iter().sum();
        assert!((sum - 1.0).abs() < 1e-9);
    }

    let defined: Vec<f64> = model.steady_state.iter().flatten().copied().collect();
    assert!(!defined.is_empty());
    let total: f64 = defined.iter().sum();
    assert!((total - 1.0).abs() < 1e-6);
    for p in defined {
        assert!(p >= 0.0);
    }

    // Peak recovery, when present, is never negative
    for peak in &report.groups["DALMUIR"].peaks {
        if let Some(minutes) = peak.recovery_minutes {
            assert!(minutes >= 0.0);
        }
    }
}
