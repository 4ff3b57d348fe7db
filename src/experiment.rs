//! Transfer-learning data preparation
//!
//! Labels sessions as struggling or not, aligns the iSNAP (source) and Parsons
//! (target) feature sets, and splits them into the training sets for the three
//! approaches compared by the experiment:
//!
//! - **Baseline**: Parsons training rows only
//! - **Transfer**: pre-train on iSNAP, then continue on Parsons training rows
//! - **Joint**: iSNAP and Parsons training rows combined
//!
//! Model fitting itself happens outside this crate.

use crate::alignment::{align_features, check_alignment, AlignmentReport, FeatureMatrix};
use crate::config::ExperimentConfig;
use crate::error::TraceError;
use crate::types::{FeatureSource, FEATURE_NAMES};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Success rate below which a session may count as struggling
pub const STRUGGLE_MAX_SUCCESS_RATE: f64 = 0.5;

/// Failure streak at or above which a session may count as struggling
pub const STRUGGLE_MIN_CONSECUTIVE_FAILURES: f64 = 3.0;

/// Manipulations per hint above which a session may count as struggling
pub const STRUGGLE_MIN_MANIPULATION_RATIO: f64 = 10.0;

/// A session struggles when it rarely makes progress after hints, gets stuck
/// repeatedly, and shuffles blocks far more than it asks for help.
///
/// Missing features read as 0.
pub fn is_struggling<S: FeatureSource>(features: &S) -> bool {
    let value = |name: &str| features.feature(name).unwrap_or(0.0);

    value("successRate") < STRUGGLE_MAX_SUCCESS_RATE
        && value("consecutiveFailures") >= STRUGGLE_MIN_CONSECUTIVE_FAILURES
        && value("manipulationToFeedbackRatio") > STRUGGLE_MIN_MANIPULATION_RATIO
}

/// Binary struggle labels (1 = struggling)
pub fn struggle_labels<S: FeatureSource>(features: &[S]) -> Vec<u8> {
    features.iter().map(|f| u8::from(is_struggling(f))).collect()
}

/// Struggle prevalence in one labelled set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelSummary {
    pub struggling: usize,
    pub total: usize,
    /// struggling / total, 0 for an empty set
    pub rate: f64,
}

impl LabelSummary {
    pub fn from_labels(labels: &[u8]) -> Self {
        let struggling = labels.iter().filter(|&&l| l == 1).count();
        let total = labels.len();
        let rate = if total == 0 {
            0.0
        } else {
            struggling as f64 / total as f64
        };
        Self {
            struggling,
            total,
            rate,
        }
    }
}

/// Feature rows with their labels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelledSet {
    pub features: FeatureMatrix,
    pub labels: Vec<u8>,
}

impl LabelledSet {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    fn select(&self, indices: &[usize]) -> Self {
        Self {
            features: FeatureMatrix {
                columns: self.features.columns.clone(),
                rows: indices.iter().map(|&i| self.features.rows[i].clone()).collect(),
            },
            labels: indices.iter().map(|&i| self.labels[i]).collect(),
        }
    }

    fn concat(&self, other: &Self) -> Self {
        let mut rows = self.features.rows.clone();
        rows.extend(other.features.rows.iter().cloned());
        let mut labels = self.labels.clone();
        labels.extend_from_slice(&other.labels);
        Self {
            features: FeatureMatrix {
                columns: self.features.columns.clone(),
                rows,
            },
            labels,
        }
    }
}

/// Aligned, labelled and split data for the transfer experiment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferDataset {
    /// All iSNAP rows (source domain)
    pub isnap: LabelledSet,
    /// Parsons training rows
    pub parsons_train: LabelledSet,
    /// Held-out Parsons rows every approach is scored on
    pub parsons_test: LabelledSet,
    pub alignment: AlignmentReport,
}

impl TransferDataset {
    /// Align both sets, label them from the raw features, and split Parsons rows.
    ///
    /// The test split holds `ceil(test_size * n)` rows chosen by a seeded shuffle.
    pub fn prepare<A, B>(isnap: &[A], parsons: &[B], config: &ExperimentConfig) -> Result<Self, TraceError>
    where
        A: FeatureSource,
        B: FeatureSource,
    {
        if parsons.is_empty() {
            return Err(TraceError::InsufficientData(
                "No Parsons sessions to split".to_string(),
            ));
        }

        let (isnap_matrix, parsons_matrix) = align_features(isnap, parsons)?;
        let alignment = check_alignment(&isnap_matrix, &parsons_matrix);

        let isnap_set = LabelledSet {
            features: isnap_matrix,
            labels: struggle_labels(isnap),
        };
        let parsons_set = LabelledSet {
            features: parsons_matrix,
            labels: struggle_labels(parsons),
        };

        let mut indices: Vec<usize> = (0..parsons_set.len()).collect();
        let mut rng = StdRng::seed_from_u64(config.random_state);
        indices.shuffle(&mut rng);

        let n_test = ((config.test_size * indices.len() as f64).ceil() as usize).min(indices.len());
        let (test_idx, train_idx) = indices.split_at(n_test);

        let dataset = Self {
            isnap: isnap_set,
            parsons_train: parsons_set.select(train_idx),
            parsons_test: parsons_set.select(test_idx),
            alignment,
        };

        info!(
            isnap = dataset.isnap.len(),
            parsons_train = dataset.parsons_train.len(),
            parsons_test = dataset.parsons_test.len(),
            aligned = dataset.alignment.aligned,
            "transfer dataset prepared"
        );

        Ok(dataset)
    }

    /// Training rows for the baseline approach
    pub fn baseline_training(&self) -> &LabelledSet {
        &self.parsons_train
    }

    /// Training stages for the transfer approach: pre-training, then fine-tuning
    pub fn transfer_training(&self) -> (&LabelledSet, &LabelledSet) {
        (&self.isnap, &self.parsons_train)
    }

    /// Training rows for the joint approach
    pub fn joint_training(&self) -> LabelledSet {
        self.isnap.concat(&self.parsons_train)
    }

    pub fn summary(&self) -> ExperimentSummary {
        let mut parsons_labels = self.parsons_train.labels.clone();
        parsons_labels.extend_from_slice(&self.parsons_test.labels);

        ExperimentSummary {
            feature_names: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
            isnap_sessions: self.isnap.len(),
            parsons_sessions: parsons_labels.len(),
            parsons_train: self.parsons_train.len(),
            parsons_test: self.parsons_test.len(),
            isnap_labels: LabelSummary::from_labels(&self.isnap.labels),
            parsons_labels: LabelSummary::from_labels(&parsons_labels),
            alignment: self.alignment.clone(),
        }
    }
}

/// Dataset counts reported alongside experiment results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentSummary {
    pub feature_names: Vec<String>,
    pub isnap_sessions: usize,
    pub parsons_sessions: usize,
    pub parsons_train: usize,
    pub parsons_test: usize,
    pub isnap_labels: LabelSummary,
    pub parsons_labels: LabelSummary,
    pub alignment: AlignmentReport,
}
