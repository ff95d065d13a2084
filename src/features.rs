//! Feature reduction of spike waveforms: per-feature min-max scaling followed by a principal
//! component projection.
use itertools::{Itertools, MinMaxResult};
use nalgebra::{DMatrix, SymmetricEigen};
use serde::{Deserialize, Serialize};

use crate::error::SortError;

/// Check that the rows are non-empty and share the same positive length.
fn num_columns(data: &[Vec<f64>]) -> Result<usize, SortError> {
    let dim = data
        .first()
        .map(|row| row.len())
        .ok_or_else(|| SortError::InvalidParameter("No data to fit".to_string()))?;
    if dim == 0 {
        return Err(SortError::InvalidParameter(
            "Rows must have at least one feature".to_string(),
        ));
    }
    if let Some(n) = data.iter().position(|row| row.len() != dim) {
        return Err(SortError::InvalidParameter(format!(
            "Row {} has {} features, expected {}",
            n,
            data[n].len(),
            dim
        )));
    }
    Ok(dim)
}

/// Scales every feature (column) to the unit interval.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct MinMaxScaler {
    min: Vec<f64>,
    max: Vec<f64>,
}

impl MinMaxScaler {
    /// Learn the range of every column.
    pub fn fit(data: &[Vec<f64>]) -> Result<Self, SortError> {
        let dim = num_columns(data)?;
        let (min, max): (Vec<f64>, Vec<f64>) = (0..dim)
            .map(|j| match data.iter().map(|row| row[j]).minmax_by(|a, b| a.total_cmp(b)) {
                MinMaxResult::NoElements => (0.0, 0.0),
                MinMaxResult::OneElement(x) => (x, x),
                MinMaxResult::MinMax(min, max) => (min, max),
            })
            .unzip();
        Ok(MinMaxScaler { min, max })
    }

    /// Map every feature to `[0, 1]` with respect to the learned range.
    /// Constant features are mapped to zero.
    pub fn transform(&self, data: &[Vec<f64>]) -> Result<Vec<Vec<f64>>, SortError> {
        if num_columns(data)? != self.min.len() {
            return Err(SortError::InvalidParameter(format!(
                "Expected {} features per row",
                self.min.len()
            )));
        }
        Ok(data
            .iter()
            .map(|row| {
                row.iter()
                    .zip(self.min.iter().zip(self.max.iter()))
                    .map(|(x, (min, max))| {
                        let range = max - min;
                        if range > 0.0 {
                            (x - min) / range
                        } else {
                            0.0
                        }
                    })
                    .collect()
            })
            .collect())
    }

    pub fn fit_transform(data: &[Vec<f64>]) -> Result<Vec<Vec<f64>>, SortError> {
        Self::fit(data)?.transform(data)
    }
}

/// Principal component analysis based on the eigen-decomposition of the covariance matrix.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Pca {
    /// The column means of the training data.
    mean: Vec<f64>,
    /// The principal axes, one row per component, by decreasing variance.
    components: Vec<Vec<f64>>,
    /// The variance along each principal axis.
    explained_variance: Vec<f64>,
    /// The total variance of the training data.
    total_variance: f64,
}

impl Pca {
    /// Fit the principal axes of the data.
    ///
    /// The sign of every axis is chosen so that its largest loading (in magnitude) is positive.
    pub fn fit(data: &[Vec<f64>], num_components: usize) -> Result<Self, SortError> {
        let dim = num_columns(data)?;
        let num_samples = data.len();
        if num_components == 0 || num_components > num_samples.min(dim) {
            return Err(SortError::InvalidParameter(format!(
                "Number of components must be between 1 and {}, got {}",
                num_samples.min(dim),
                num_components
            )));
        }

        let mean: Vec<f64> = (0..dim)
            .map(|j| data.iter().map(|row| row[j]).sum::<f64>() / num_samples as f64)
            .collect();
        let centered = DMatrix::from_fn(num_samples, dim, |i, j| data[i][j] - mean[j]);
        let ddof = if num_samples > 1 { num_samples - 1 } else { 1 };
        let covariance = (centered.transpose() * &centered) / ddof as f64;
        let total_variance = covariance.trace();

        let eigen = SymmetricEigen::try_new(covariance, f64::EPSILON, 0).ok_or_else(|| {
            SortError::DecompositionError("Covariance eigen-decomposition did not converge".to_string())
        })?;

        let order = (0..dim)
            .sorted_by(|a, b| eigen.eigenvalues[*b].total_cmp(&eigen.eigenvalues[*a]))
            .take(num_components);

        let (components, explained_variance): (Vec<Vec<f64>>, Vec<f64>) = order
            .map(|k| {
                let axis = eigen.eigenvectors.column(k);
                let sign = axis
                    .iter()
                    .max_by(|a, b| a.abs().total_cmp(&b.abs()))
                    .map_or(1.0, |x| x.signum());
                let axis: Vec<f64> = axis.iter().map(|x| x * sign).collect();
                (axis, eigen.eigenvalues[k].max(0.0))
            })
            .unzip();

        log::debug!(
            "PCA fitted on {} samples of dimension {} with {} components",
            num_samples,
            dim,
            num_components
        );

        Ok(Pca {
            mean,
            components,
            explained_variance,
            total_variance,
        })
    }

    /// Project the data onto the principal axes.
    pub fn transform(&self, data: &[Vec<f64>]) -> Result<Vec<Vec<f64>>, SortError> {
        if num_columns(data)? != self.mean.len() {
            return Err(SortError::InvalidParameter(format!(
                "Expected {} features per row",
                self.mean.len()
            )));
        }
        Ok(data
            .iter()
            .map(|row| {
                self.components
                    .iter()
                    .map(|axis| {
                        row.iter()
                            .zip(self.mean.iter())
                            .zip(axis.iter())
                            .map(|((x, m), a)| (x - m) * a)
                            .sum()
                    })
                    .collect()
            })
            .collect())
    }

    pub fn fit_transform(
        data: &[Vec<f64>],
        num_components: usize,
    ) -> Result<Vec<Vec<f64>>, SortError> {
        Self::fit(data, num_components)?.transform(data)
    }

    pub fn num_components(&self) -> usize {
        self.components.len()
    }

    pub fn components(&self) -> &[Vec<f64>] {
        &self.components
    }

    pub fn explained_variance(&self) -> &[f64] {
        &self.explained_variance
    }

    /// The fraction of the total variance captured by each component.
    pub fn explained_variance_ratio(&self) -> Vec<f64> {
        self.explained_variance
            .iter()
            .map(|v| {
                if self.total_variance > 0.0 {
                    v / self.total_variance
                } else {
                    0.0
                }
            })
            .collect()
    }
}

/// Scale the waveforms to the unit interval then project them on their first principal axes.
pub fn reduce(waveforms: &[Vec<f64>], num_components: usize) -> Result<Vec<Vec<f64>>, SortError> {
    let scaled = MinMaxScaler::fit_transform(waveforms)?;
    Pca::fit_transform(&scaled, num_components)
}
