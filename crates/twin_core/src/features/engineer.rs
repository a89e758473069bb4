//! Rolling-window feature extraction and model input preparation

use super::{
    FeatureName, FeatureSchema, FeatureVector, Metric, MetricSample, MinMaxNormalizer, Ratio,
    RollingBuffer, Statistic,
};
use crate::error::{Result, TwinError};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info, warn};

/// Scaled training matrix in schema order
#[derive(Debug, Clone)]
pub struct TrainingMatrix {
    pub rows: Vec<Vec<f64>>,
    pub feature_names: Vec<String>,
}

impl TrainingMatrix {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

pub struct FeatureEngineer {
    window_size: usize,
    schema: FeatureSchema,
    buffers: BTreeMap<Metric, RollingBuffer>,
    normalizer: MinMaxNormalizer,
}

impl FeatureEngineer {
    pub fn new(window_size: usize) -> Self {
        let schema = FeatureSchema::v1();
        let normalizer = MinMaxNormalizer::new(&schema);
        Self {
            window_size: window_size.max(1),
            schema,
            buffers: BTreeMap::new(),
            normalizer,
        }
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub fn normalizer(&self) -> &MinMaxNormalizer {
        &self.normalizer
    }

    pub fn is_fitted(&self) -> bool {
        self.normalizer.is_fitted()
    }

    /// Number of values buffered for `metric`
    pub fn buffered(&self, metric: Metric) -> usize {
        self.buffers.get(&metric).map_or(0, RollingBuffer::len)
    }

    /// Push each metric into its rolling buffer
    pub fn add_sample(&mut self, metrics: &MetricSample) {
        for (metric, value) in metrics {
            let window = self.window_size;
            self.buffers
                .entry(*metric)
                .or_insert_with(|| RollingBuffer::new(window))
                .push(*value);
        }
    }

    /// Current values, full-window statistics, and ratios
    pub fn extract_features(&self, metrics: &MetricSample) -> FeatureVector {
        let mut features = FeatureVector::new();

        for (metric, value) in metrics {
            features.insert(FeatureName::Current(*metric), *value);
        }

        for (metric, buffer) in &self.buffers {
            if let Some(stats) = buffer.stats() {
                let values = [stats.mean, stats.std, stats.max, stats.min, stats.range];
                for (stat, value) in Statistic::ALL.iter().zip(values) {
                    features.insert(FeatureName::Rolling(*metric, *stat), value);
                }
            }
        }

        for ratio in Ratio::ALL {
            let (numerator, denominator) = ratio.operands();
            if let (Some(n), Some(d)) = (metrics.get(&numerator), metrics.get(&denominator)) {
                features.insert(FeatureName::Ratio(ratio), n / (d.abs() + Ratio::EPSILON));
            }
        }

        features
    }

    /// Schema-ordered, scaled model input
    ///
    /// Without a fitted normalizer this falls back to fitting on `features`
    /// alone, which is logged and kept distinct from bulk fitting.
    pub fn prepare_for_ml(&mut self, features: &FeatureVector) -> Result<Vec<f64>> {
        let row = self.schema.project(features);
        if !self.normalizer.is_fitted() {
            self.normalizer.fit_single(&row)?;
        }
        self.normalizer.transform(&row)
    }

    /// Replay `samples` through fresh buffers and bulk-fit the normalizer
    pub fn create_training_dataset(&mut self, samples: &[MetricSample]) -> Result<TrainingMatrix> {
        if samples.is_empty() {
            return Err(TwinError::InvalidTrainingData(
                "no historical samples to build a dataset from".into(),
            ));
        }

        self.buffers.clear();
        let mut cells = Vec::with_capacity(samples.len());
        for sample in samples {
            self.add_sample(sample);
            let features = self.extract_features(sample);
            cells.push(self.schema.project(&features));
        }

        let rows = self.normalizer.fit(&cells)?;
        info!(
            "Built training matrix: {} samples x {} features",
            rows.len(),
            self.schema.len()
        );
        Ok(TrainingMatrix {
            rows,
            feature_names: self.schema.labels(),
        })
    }

    /// Clear buffers and return the normalizer to unfit
    pub fn reset(&mut self) {
        self.buffers.clear();
        self.normalizer.reset();
        debug!("Feature engineer reset");
    }

    /// Clear buffers only, keeping the fitted normalizer
    pub fn clear_buffers(&mut self) {
        self.buffers.clear();
    }

    pub fn save_normalizer(&self, path: impl AsRef<Path>) -> Result<()> {
        self.normalizer.save(path)
    }

    pub fn load_normalizer(&mut self, path: impl AsRef<Path>) -> Result<()> {
        match MinMaxNormalizer::load(path, &self.schema) {
            Ok(normalizer) => {
                self.normalizer = normalizer;
                Ok(())
            }
            Err(e) => {
                warn!("Normalizer not loaded: {}", e);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn sample(temperature: f64, velocity: f64) -> MetricSample {
        MetricSample::from([
            (Metric::Temperature, temperature),
            (Metric::Velocity, velocity),
            (Metric::Torque, 2.0),
            (Metric::Angle, 0.0),
        ])
    }

    #[test]
    fn test_current_values_and_ratios() {
        let engineer = FeatureEngineer::new(3);
        let features = engineer.extract_features(&sample(30.0, -2.0));
        assert_eq!(features.get(FeatureName::Current(Metric::Temperature)), Some(30.0));
        assert_abs_diff_eq!(
            features.get(FeatureName::Ratio(Ratio::TempVelocity)).unwrap(),
            15.0,
            epsilon = 1e-6
        );
        // zero denominator stays finite
        let torque_angle = features.get(FeatureName::Ratio(Ratio::TorqueAngle)).unwrap();
        assert!(torque_angle.is_finite());
        assert_abs_diff_eq!(torque_angle, 2.0 / Ratio::EPSILON);
    }

    #[test]
    fn test_ratio_needs_both_operands() {
        let engineer = FeatureEngineer::new(3);
        let metrics = MetricSample::from([(Metric::Temperature, 30.0)]);
        let features = engineer.extract_features(&metrics);
        assert!(!features.contains(FeatureName::Ratio(Ratio::TempVelocity)));
    }

    #[test]
    fn test_rolling_stats_after_window() {
        let mut engineer = FeatureEngineer::new(3);
        let mean = FeatureName::Rolling(Metric::Temperature, Statistic::Mean);
        for (i, t) in [20.0, 30.0, 40.0].into_iter().enumerate() {
            let s = sample(t, 1.0);
            engineer.add_sample(&s);
            let features = engineer.extract_features(&s);
            assert_eq!(features.contains(mean), i == 2);
        }
        let features = engineer.extract_features(&sample(40.0, 1.0));
        assert_abs_diff_eq!(features.get(mean).unwrap(), 30.0);
        assert_abs_diff_eq!(
            features
                .get(FeatureName::Rolling(Metric::Temperature, Statistic::Range))
                .unwrap(),
            20.0
        );
    }

    #[test]
    fn test_training_dataset_fits_normalizer() {
        let mut engineer = FeatureEngineer::new(2);
        let samples: Vec<MetricSample> = (0..20).map(|i| sample(20.0 + i as f64, 1.0)).collect();
        let matrix = engineer.create_training_dataset(&samples).unwrap();
        assert_eq!(matrix.len(), 20);
        assert_eq!(matrix.feature_names.len(), 38);
        assert!(engineer.is_fitted());
        assert!(!engineer.normalizer().is_single_sample_fit());
        assert_abs_diff_eq!(matrix.rows[0][0], 0.0);
        assert_abs_diff_eq!(matrix.rows[19][0], 1.0);
    }

    #[test]
    fn test_training_dataset_rejects_empty() {
        let mut engineer = FeatureEngineer::new(2);
        assert!(matches!(
            engineer.create_training_dataset(&[]),
            Err(TwinError::InvalidTrainingData(_))
        ));
    }

    #[test]
    fn test_prepare_for_ml_lazy_fallback() {
        let mut engineer = FeatureEngineer::new(2);
        let features = engineer.extract_features(&sample(30.0, 1.0));
        let vector = engineer.prepare_for_ml(&features).unwrap();
        assert_eq!(vector.len(), 38);
        assert!(engineer.normalizer().is_single_sample_fit());
    }

    #[test]
    fn test_reset_unfits() {
        let mut engineer = FeatureEngineer::new(2);
        let samples: Vec<MetricSample> = (0..5).map(|i| sample(i as f64, 1.0)).collect();
        engineer.create_training_dataset(&samples).unwrap();
        engineer.reset();
        assert!(!engineer.is_fitted());
        assert_eq!(engineer.buffered(Metric::Temperature), 0);
    }
}
