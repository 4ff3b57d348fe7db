//! Cross-dataset feature alignment
//!
//! Puts two differently-sourced feature sets on one [0, 1] scale. The scaler is
//! fit on the union of both sets, so a value means the same thing in either
//! output.

use crate::error::TraceError;
use crate::types::{FeatureSource, FEATURE_NAMES};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Mean absolute std difference below which two sets count as aligned
pub const ALIGNED_SCALE_DIFFERENCE: f64 = 0.5;

/// Row-major numeric matrix with named columns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureMatrix {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<f64>>,
}

impl FeatureMatrix {
    /// Build a matrix from feature sources; missing or null values become 0
    pub fn from_sources<S: FeatureSource>(sources: &[S], feature_names: &[&str]) -> Self {
        let rows = sources
            .iter()
            .map(|source| {
                feature_names
                    .iter()
                    .map(|name| source.feature(name).unwrap_or(0.0))
                    .collect()
            })
            .collect();

        Self {
            columns: feature_names.iter().map(|s| s.to_string()).collect(),
            rows,
        }
    }

    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn n_cols(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Values of one column, top to bottom
    pub fn column(&self, idx: usize) -> impl Iterator<Item = f64> + '_ {
        self.rows.iter().map(move |row| row[idx])
    }

    /// Per-column arithmetic mean (0 for an empty matrix)
    pub fn column_means(&self) -> Vec<f64> {
        (0..self.n_cols())
            .map(|idx| mean(self.column(idx)))
            .collect()
    }

    /// Per-column population standard deviation (0 for an empty matrix)
    pub fn column_stds(&self) -> Vec<f64> {
        (0..self.n_cols())
            .map(|idx| {
                let values: Vec<f64> = self.column(idx).collect();
                let mu = mean(values.iter().copied());
                let variance = mean(values.iter().map(|v| (v - mu).powi(2)));
                variance.sqrt()
            })
            .collect()
    }
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

/// Per-column min-max scaler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinMaxScaler {
    pub data_min: Vec<f64>,
    pub data_max: Vec<f64>,
}

impl MinMaxScaler {
    /// Fit column bounds over every row of every matrix given.
    ///
    /// Non-finite values are ignored when finding bounds.
    pub fn fit(matrices: &[&FeatureMatrix]) -> Result<Self, TraceError> {
        let n_cols = matrices.first().map(|m| m.n_cols()).unwrap_or(0);
        if matrices.iter().any(|m| m.n_cols() != n_cols) {
            return Err(TraceError::DimensionMismatch(
                "Cannot fit a scaler on matrices with different column counts".to_string(),
            ));
        }
        if matrices.iter().all(|m| m.is_empty()) {
            return Err(TraceError::InsufficientData(
                "Cannot fit a scaler on zero rows".to_string(),
            ));
        }

        let mut data_min = vec![f64::INFINITY; n_cols];
        let mut data_max = vec![f64::NEG_INFINITY; n_cols];

        for row in matrices.iter().flat_map(|m| m.rows.iter()) {
            for (idx, &value) in row.iter().enumerate() {
                if !value.is_finite() {
                    continue;
                }
                data_min[idx] = data_min[idx].min(value);
                data_max[idx] = data_max[idx].max(value);
            }
        }

        // Columns with no finite values at all
        for idx in 0..n_cols {
            if data_min[idx] > data_max[idx] {
                data_min[idx] = 0.0;
                data_max[idx] = 0.0;
            }
        }

        Ok(Self { data_min, data_max })
    }

    /// Scale a matrix into the fitted range. Constant columns map to 0.
    pub fn transform(&self, matrix: &FeatureMatrix) -> FeatureMatrix {
        let rows = matrix
            .rows
            .iter()
            .map(|row| {
                row.iter()
                    .enumerate()
                    .map(|(idx, &value)| {
                        let range = self.data_max[idx] - self.data_min[idx];
                        let range = if range == 0.0 { 1.0 } else { range };
                        (value - self.data_min[idx]) / range
                    })
                    .collect()
            })
            .collect();

        FeatureMatrix {
            columns: matrix.columns.clone(),
            rows,
        }
    }
}

/// Normalize two feature sets with one jointly fit scaler
pub fn align<A, B>(
    set_a: &[A],
    set_b: &[B],
    feature_names: &[&str],
) -> Result<(FeatureMatrix, FeatureMatrix), TraceError>
where
    A: FeatureSource,
    B: FeatureSource,
{
    let matrix_a = FeatureMatrix::from_sources(set_a, feature_names);
    let matrix_b = FeatureMatrix::from_sources(set_b, feature_names);

    let scaler = MinMaxScaler::fit(&[&matrix_a, &matrix_b])?;
    let normalized_a = scaler.transform(&matrix_a);
    let normalized_b = scaler.transform(&matrix_b);

    info!(
        rows_a = normalized_a.n_rows(),
        rows_b = normalized_b.n_rows(),
        features = feature_names.len(),
        "feature sets aligned"
    );

    Ok((normalized_a, normalized_b))
}

/// Align two feature sets over the canonical 14 features
pub fn align_features<A, B>(
    set_a: &[A],
    set_b: &[B],
) -> Result<(FeatureMatrix, FeatureMatrix), TraceError>
where
    A: FeatureSource,
    B: FeatureSource,
{
    align(set_a, set_b, &FEATURE_NAMES)
}

/// Distribution comparison of two normalized feature sets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlignmentReport {
    pub samples_a: usize,
    pub samples_b: usize,
    pub means_a: Vec<f64>,
    pub means_b: Vec<f64>,
    pub stds_a: Vec<f64>,
    pub stds_b: Vec<f64>,
    /// Mean absolute difference of per-column standard deviations
    pub scale_difference: f64,
    pub aligned: bool,
}

/// Compare the spread of two normalized matrices
pub fn check_alignment(a: &FeatureMatrix, b: &FeatureMatrix) -> AlignmentReport {
    let stds_a = a.column_stds();
    let stds_b = b.column_stds();
    let scale_difference = mean(stds_a.iter().zip(&stds_b).map(|(x, y)| (x - y).abs()));

    AlignmentReport {
        samples_a: a.n_rows(),
        samples_b: b.n_rows(),
        means_a: a.column_means(),
        means_b: b.column_means(),
        stds_a,
        stds_b,
        scale_difference,
        aligned: scale_difference < ALIGNED_SCALE_DIFFERENCE,
    }
}
