//! Fit-once min-max scaling over a fixed feature schema
//!
//! Two fitting paths exist and they do not agree:
//!
//! - [`MinMaxNormalizer::fit`] over a full training matrix (the real one)
//! - [`MinMaxNormalizer::fit_single`] over the first inference vector, used
//!   only when serving starts without a fitted normalizer. Every range is
//!   zero there, so scaling collapses to a shift by that first sample and the
//!   models see a distribution unlike their training data.

use super::FeatureSchema;
use crate::error::{Result, TwinError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinMaxNormalizer {
    schema_version: u32,
    names: Vec<String>,
    #[serde(default)]
    min: Vec<f64>,
    /// max - min, with zero ranges stored as 1
    #[serde(default)]
    scale: Vec<f64>,
    /// Substitute for features absent from a vector
    #[serde(default)]
    fill: Vec<f64>,
    #[serde(default)]
    fitted: bool,
    #[serde(default)]
    single_sample: bool,
}

impl MinMaxNormalizer {
    pub fn new(schema: &FeatureSchema) -> Self {
        Self {
            schema_version: schema.version(),
            names: schema.labels(),
            min: Vec::new(),
            scale: Vec::new(),
            fill: Vec::new(),
            fitted: false,
            single_sample: false,
        }
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted
    }

    /// True when the parameters came from the single-sample fallback
    pub fn is_single_sample_fit(&self) -> bool {
        self.single_sample
    }

    pub fn width(&self) -> usize {
        self.names.len()
    }

    fn check_width(&self, width: usize) -> Result<()> {
        if width != self.width() {
            return Err(TwinError::SchemaMismatch {
                expected: format!("{} features", self.width()),
                found: format!("{} features", width),
            });
        }
        Ok(())
    }

    /// Fit over a full matrix of schema-ordered rows and return it scaled
    ///
    /// Absent cells are filled with the column mean of the present values.
    pub fn fit(&mut self, rows: &[Vec<Option<f64>>]) -> Result<Vec<Vec<f64>>> {
        if rows.is_empty() {
            return Err(TwinError::InvalidTrainingData(
                "cannot fit normalizer on an empty matrix".into(),
            ));
        }
        for row in rows {
            self.check_width(row.len())?;
        }

        let width = self.width();
        let mut fill = vec![0.0; width];
        for (col, slot) in fill.iter_mut().enumerate() {
            let (sum, count) = rows
                .iter()
                .filter_map(|row| row[col].filter(|v| v.is_finite()))
                .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
            if count > 0 {
                *slot = sum / count as f64;
            }
        }

        let dense: Vec<Vec<f64>> = rows.iter().map(|row| densify(row, &fill)).collect();

        let mut min = vec![f64::INFINITY; width];
        let mut max = vec![f64::NEG_INFINITY; width];
        for row in &dense {
            for (col, v) in row.iter().enumerate() {
                min[col] = min[col].min(*v);
                max[col] = max[col].max(*v);
            }
        }
        let scale = min
            .iter()
            .zip(&max)
            .map(|(lo, hi)| positive_range(hi - lo))
            .collect();

        self.min = min;
        self.scale = scale;
        self.fill = fill;
        self.fitted = true;
        self.single_sample = false;
        info!("Fitted normalizer on {} samples x {} features", rows.len(), width);

        Ok(dense.iter().map(|row| self.scale_dense(row)).collect())
    }

    /// Fit from one vector; see the module docs for why this diverges from `fit`
    pub fn fit_single(&mut self, row: &[Option<f64>]) -> Result<()> {
        self.check_width(row.len())?;
        let fill: Vec<f64> = row
            .iter()
            .map(|cell| cell.filter(|v| v.is_finite()).unwrap_or(0.0))
            .collect();
        self.min = fill.clone();
        self.scale = vec![1.0; fill.len()];
        self.fill = fill;
        self.fitted = true;
        self.single_sample = true;
        warn!("Normalizer fitted from a single inference sample; scaling will not match training");
        Ok(())
    }

    /// Scale one schema-ordered row; output is always finite
    pub fn transform(&self, row: &[Option<f64>]) -> Result<Vec<f64>> {
        if !self.fitted {
            return Err(TwinError::NotTrained("normalizer"));
        }
        self.check_width(row.len())?;
        Ok(self.scale_dense(&densify(row, &self.fill)))
    }

    fn scale_dense(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .zip(self.min.iter().zip(&self.scale))
            .map(|(v, (lo, scale))| {
                let scaled = (v - lo) / scale;
                if scaled.is_finite() {
                    scaled
                } else {
                    0.0
                }
            })
            .collect()
    }

    pub fn reset(&mut self) {
        self.min.clear();
        self.scale.clear();
        self.fill.clear();
        self.fitted = false;
        self.single_sample = false;
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        if !self.fitted {
            return Err(TwinError::NotTrained("normalizer"));
        }
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        info!("Saved normalizer to {}", path.display());
        Ok(())
    }

    /// Load a fitted normalizer, rejecting one fit against another schema
    pub fn load(path: impl AsRef<Path>, schema: &FeatureSchema) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(TwinError::ModelNotFound(path.to_path_buf()));
        }
        let content = fs::read_to_string(path)?;
        let loaded: MinMaxNormalizer = serde_json::from_str(&content)?;

        if loaded.schema_version != schema.version() || loaded.names != schema.labels() {
            return Err(TwinError::SchemaMismatch {
                expected: format!("v{} ({} features)", schema.version(), schema.len()),
                found: format!("v{} ({} features)", loaded.schema_version, loaded.names.len()),
            });
        }
        let width = loaded.names.len();
        if !loaded.fitted
            || loaded.min.len() != width
            || loaded.scale.len() != width
            || loaded.fill.len() != width
        {
            return Err(TwinError::InvalidTrainingData(format!(
                "{} holds incomplete normalizer parameters",
                path.display()
            )));
        }
        info!("Loaded normalizer from {}", path.display());
        Ok(loaded)
    }
}

/// Absent cells take the fill value; non-finite cells become 0
fn densify(row: &[Option<f64>], fill: &[f64]) -> Vec<f64> {
    row.iter()
        .zip(fill)
        .map(|(cell, fill)| match cell {
            Some(v) if v.is_finite() => *v,
            Some(_) => 0.0,
            None => *fill,
        })
        .collect()
}

fn positive_range(range: f64) -> f64 {
    if range.is_finite() && range > 0.0 {
        range
    } else {
        1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use tempfile::TempDir;

    fn schema() -> FeatureSchema {
        FeatureSchema::v1()
    }

    fn row(values: &[(usize, f64)]) -> Vec<Option<f64>> {
        let mut row = vec![None; schema().len()];
        for (i, v) in values {
            row[*i] = Some(*v);
        }
        row
    }

    #[test]
    fn test_transform_before_fit_fails() {
        let normalizer = MinMaxNormalizer::new(&schema());
        let err = normalizer.transform(&row(&[])).unwrap_err();
        assert!(matches!(err, TwinError::NotTrained(_)));
    }

    #[test]
    fn test_bulk_fit_scales_to_unit_range() {
        let mut normalizer = MinMaxNormalizer::new(&schema());
        let rows = vec![
            row(&[(0, 20.0), (1, 5.0)]),
            row(&[(0, 30.0)]),
            row(&[(0, 40.0), (1, 15.0)]),
        ];
        let scaled = normalizer.fit(&rows).unwrap();
        assert_abs_diff_eq!(scaled[0][0], 0.0);
        assert_abs_diff_eq!(scaled[1][0], 0.5);
        assert_abs_diff_eq!(scaled[2][0], 1.0);
        // absent cell filled with the column mean (10) before scaling
        assert_abs_diff_eq!(scaled[1][1], 0.5);
        // all-absent column has zero range and maps to 0
        assert_eq!(scaled[0][2], 0.0);
    }

    #[test]
    fn test_non_finite_becomes_zero() {
        let mut normalizer = MinMaxNormalizer::new(&schema());
        normalizer
            .fit(&[row(&[(0, -1.0)]), row(&[(0, 1.0)])])
            .unwrap();
        let out = normalizer.transform(&row(&[(0, f64::NAN)])).unwrap();
        assert_abs_diff_eq!(out[0], 0.5);
        assert!(out.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_single_sample_fit_diverges() {
        let mut lazy = MinMaxNormalizer::new(&schema());
        lazy.fit_single(&row(&[(0, 30.0)])).unwrap();
        assert!(lazy.is_single_sample_fit());
        assert_eq!(lazy.transform(&row(&[(0, 30.0)])).unwrap()[0], 0.0);
        assert_eq!(lazy.transform(&row(&[(0, 35.0)])).unwrap()[0], 5.0);
    }

    #[test]
    fn test_width_mismatch() {
        let mut normalizer = MinMaxNormalizer::new(&schema());
        let err = normalizer.fit(&[vec![Some(1.0)]]).unwrap_err();
        assert!(matches!(err, TwinError::SchemaMismatch { .. }));
    }

    #[test]
    fn test_save_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("normalizer.json");
        let mut normalizer = MinMaxNormalizer::new(&schema());
        normalizer.fit(&[row(&[(0, 1.0)]), row(&[(0, 3.0)])]).unwrap();
        normalizer.save(&path).unwrap();

        let loaded = MinMaxNormalizer::load(&path, &schema()).unwrap();
        assert!(loaded.is_fitted());
        let probe = row(&[(0, 2.0)]);
        assert_abs_diff_eq!(
            loaded.transform(&probe).unwrap()[0],
            normalizer.transform(&probe).unwrap()[0],
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_load_rejects_other_schema() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("normalizer.json");
        let mut normalizer = MinMaxNormalizer::new(&schema());
        normalizer.fit(&[row(&[(0, 1.0)])]).unwrap();
        normalizer.names[0] = "pressure_current".into();
        normalizer.save(&path).unwrap();

        let err = MinMaxNormalizer::load(&path, &schema()).unwrap_err();
        assert!(matches!(err, TwinError::SchemaMismatch { .. }));
    }

    #[test]
    fn test_load_missing() {
        let err = MinMaxNormalizer::load("/nonexistent/normalizer.json", &schema()).unwrap_err();
        assert!(matches!(err, TwinError::ModelNotFound(_)));
    }
}
