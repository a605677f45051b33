//! Markov transition modelling of activity states
//!
//! Builds a per-group row-stochastic transition matrix from consecutive
//! same-user state pairs, then derives the long-run occupation distribution
//! (steady state) and the expected consecutive duration in each state.
//!
//! The steady state is the eigenvector of the transposed matrix for
//! eigenvalue 1, obtained here as the null vector of (P^T - I) via SVD over
//! the observed states. The chain is assumed irreducible and aperiodic;
//! this is not verified, only documented.

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::activity::ActivityClassifier;
use crate::baseline::BaselineTable;
use crate::error::AnalysisError;
use crate::models::{ActivityState, Sample};

const N: usize = ActivityState::COUNT;

/// Expected number of consecutive periods spent in a state
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "periods", rename_all = "lowercase")]
pub enum DurationEstimate {
    /// Geometric mean 1 / (1 - P[i,i])
    Bounded(f64),
    /// P[i,i] = 1: the state is absorbing in the observed data
    Unbounded,
    /// The state has no outgoing transitions; duration is undefined
    Undefined,
}

/// Transition model for one group
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionModel {
    pub group: String,

    /// Raw transition counts, [from][to] in [`ActivityState::ALL`] order
    pub counts: [[u64; N]; N],

    /// Row-normalized probabilities. A row is None when its state has no
    /// outgoing transitions; consumers must treat that as undefined, not
    /// read zeros through it.
    pub rows: [Option<[f64; N]>; N],

    /// Long-run occupation probability per state. None entries are states
    /// absent from the observed chain; all None when no steady state could
    /// be computed.
    pub steady_state: [Option<f64>; N],

    /// Expected consecutive duration per state, in sample periods
    pub expected_duration: [DurationEstimate; N],

    /// States with no outgoing transitions (undefined matrix rows)
    pub undefined_states: Vec<ActivityState>,

    /// Human-readable anomalies surfaced during the solve
    pub anomalies: Vec<String>,
}

impl TransitionModel {
    /// Transition probability, None when the source row is undefined
    pub fn probability(&self, from: ActivityState, to: ActivityState) -> Option<f64> {
        self.rows[from.index()].map(|row| row[to.index()])
    }

    /// Total number of counted transitions
    pub fn total_transitions(&self) -> u64 {
        self.counts.iter().flatten().sum()
    }
}

/// Builds transition models from labeled sample streams
#[derive(Debug, Clone, Default)]
pub struct TransitionEngine;

impl TransitionEngine {
    pub fn new() -> Self {
        Self
    }

    /// Build the transition model for one group's samples.
    ///
    /// Pairs each sample's state with the next state of the same user in
    /// time order; pairs across different users are never counted, and
    /// pairs touching a user without a baseline are dropped.
    pub fn build(
        &self,
        group: &str,
        samples: &[Sample],
        baselines: &BaselineTable,
        classifier: &ActivityClassifier,
    ) -> TransitionModel {
        let mut ordered: Vec<&Sample> = samples.iter().collect();
        ordered.sort_by(|a, b| {
            a.user_id
                .cmp(&b.user_id)
                .then_with(|| a.local_time.cmp(&b.local_time))
        });

        let mut counts = [[0u64; N]; N];
        let mut prev: Option<(&str, ActivityState)> = None;
        for sample in ordered {
            let state = baselines
                .get(&sample.user_id)
                .and_then(|b| classifier.classify(sample.heart_rate, b).ok());
            match (prev, state) {
                (Some((prev_user, from)), Some(to)) if prev_user == sample.user_id => {
                    counts[from.index()][to.index()] += 1;
                }
                _ => {}
            }
            prev = state.map(|s| (sample.user_id.as_str(), s));
        }

        Self::from_counts(group, counts)
    }

    /// Derive probabilities, steady state, and durations from raw counts
    pub fn from_counts(group: &str, counts: [[u64; N]; N]) -> TransitionModel {
        let mut rows: [Option<[f64; N]>; N] = [None; N];
        let mut undefined_states = Vec::new();
        let mut anomalies = Vec::new();

        for (i, count_row) in counts.iter().enumerate() {
            let total: u64 = count_row.iter().sum();
            if total == 0 {
                undefined_states.push(ActivityState::ALL[i]);
                continue;
            }
            let mut row = [0.0; N];
            for (p, &c) in row.iter_mut().zip(count_row.iter()) {
                *p = c as f64 / total as f64;
            }
            rows[i] = Some(row);
        }

        for state in &undefined_states {
            anomalies.push(
                AnalysisError::EmptyTransition {
                    group: group.to_string(),
                    state: state.to_string(),
                }
                .to_string(),
            );
        }

        let steady_state = Self::solve_steady_state(&rows, &mut anomalies);

        let mut expected_duration = [DurationEstimate::Undefined; N];
        for i in 0..N {
            if let Some(row) = rows[i] {
                let stay = row[i];
                if (1.0 - stay).abs() < 1e-12 {
                    anomalies.push(format!(
                        "state {} is absorbing in group {}; expected duration unbounded",
                        ActivityState::ALL[i], group
                    ));
                    expected_duration[i] = DurationEstimate::Unbounded;
                } else {
                    expected_duration[i] = DurationEstimate::Bounded(1.0 / (1.0 - stay));
                }
            }
        }

        debug!(
            group,
            transitions = counts.iter().flatten().sum::<u64>(),
            undefined = undefined_states.len(),
            "built transition model"
        );

        TransitionModel {
            group: group.to_string(),
            counts,
            rows,
            steady_state,
            expected_duration,
            undefined_states,
            anomalies,
        }
    }

    /// Steady state over the observed states: null vector of (P^T - I).
    ///
    /// Restricts the matrix to states with outgoing transitions and
    /// renormalizes rows whose mass leaked into unobserved states, so the
    /// restricted matrix stays stochastic.
    fn solve_steady_state(
        rows: &[Option<[f64; N]>; N],
        anomalies: &mut Vec<String>,
    ) -> [Option<f64>; N] {
        let observed: Vec<usize> = (0..N).filter(|&i| rows[i].is_some()).collect();
        let k = observed.len();
        let mut steady = [None; N];
        if k == 0 {
            return steady;
        }
        if k == 1 {
            steady[observed[0]] = Some(1.0);
            return steady;
        }

        let mut p = DMatrix::<f64>::zeros(k, k);
        for (ri, &i) in observed.iter().enumerate() {
            let row = rows[i].expect("observed row");
            let mass: f64 = observed.iter().map(|&j| row[j]).sum();
            if mass <= 0.0 {
                anomalies.push(format!(
                    "state {} transitions only into terminal states; steady state not computed",
                    ActivityState::ALL[i]
                ));
                return steady;
            }
            if mass < 1.0 - 1e-9 {
                anomalies.push(format!(
                    "renormalized row {} after dropping transitions into terminal states",
                    ActivityState::ALL[i]
                ));
            }
            for (ci, &j) in observed.iter().enumerate() {
                p[(ri, ci)] = row[j] / mass;
            }
        }

        // (P^T - I) x = 0: x is the right singular vector for the smallest
        // singular value.
        let a = p.transpose() - DMatrix::<f64>::identity(k, k);
        let svd = a.svd(true, true);
        let Some(v_t) = svd.v_t else {
            anomalies.push("SVD failed to produce singular vectors".to_string());
            return steady;
        };
        let mut min_idx = 0;
        for i in 1..svd.singular_values.len() {
            if svd.singular_values[i] < svd.singular_values[min_idx] {
                min_idx = i;
            }
        }

        let mut vector: Vec<f64> = v_t.row(min_idx).iter().copied().collect();
        let sum: f64 = vector.iter().sum();
        if sum < 0.0 {
            for v in &mut vector {
                *v = -*v;
            }
        }
        // Numerical noise can leave slightly negative entries
        for v in &mut vector {
            if *v < 0.0 {
                *v = 0.0;
            }
        }
        let total: f64 = vector.iter().sum();
        if total <= 0.0 {
            anomalies.push("steady-state vector degenerate after normalization".to_string());
            return steady;
        }

        for (ri, &i) in observed.iter().enumerate() {
            steady[i] = Some(vector[ri] / total);
        }
        steady
    }
}
