//! Predictive models: anomaly score, failure probability, remaining useful life
//!
//! All three estimators share the [`Estimator`] lifecycle: an untrained
//! estimator refuses to predict with `NotTrained`, `load` on a missing
//! artifact fails with `ModelNotFound`, and a failed load leaves the previous
//! model in place. [`ModelSuite`] runs them side by side and reports each
//! result as a tagged [`Inference`] so callers never see a bare error.

pub mod boosting;
pub mod failure;
pub mod isolation_forest;
pub mod rul;
pub mod tree;

pub use boosting::{BoostingParams, GradientBoostedTrees, Objective};
pub use failure::{Explanation, FailurePredictor};
pub use isolation_forest::AnomalyDetector;
pub use rul::RulEstimator;

use crate::config::ModelConfig;
use crate::error::{Result, TwinError};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

pub const ANOMALY_ARTIFACT: &str = "anomaly_detector.json";
pub const FAILURE_ARTIFACT: &str = "failure_predictor.json";
pub const RUL_ARTIFACT: &str = "rul_estimator.json";
pub const NORMALIZER_ARTIFACT: &str = "normalizer.json";

/// Lifecycle shared by every estimator
pub trait Estimator {
    /// Name used in logs and `NotTrained` errors
    const NAME: &'static str;
    /// File name inside the models directory
    const ARTIFACT: &'static str;

    fn is_trained(&self) -> bool;

    fn save(&self, path: &Path) -> Result<()>;

    /// Replace the model with the artifact at `path`; on error nothing changes
    fn load(&mut self, path: &Path) -> Result<()>;
}

/// Serialize a fitted model as JSON, creating parent directories
pub(crate) fn write_artifact<T: Serialize>(path: &Path, model: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_string(model)?)?;
    info!("Saved model artifact {}", path.display());
    Ok(())
}

pub(crate) fn read_artifact<T: DeserializeOwned>(path: &Path) -> Result<T> {
    if !path.exists() {
        return Err(TwinError::ModelNotFound(path.to_path_buf()));
    }
    let content = fs::read_to_string(path)?;
    let model = serde_json::from_str(&content)?;
    info!("Loaded model artifact {}", path.display());
    Ok(model)
}

/// Reject input vectors of the wrong width
pub(crate) fn check_input(expected: usize, x: &[f64]) -> Result<()> {
    if x.len() != expected {
        return Err(TwinError::SchemaMismatch {
            expected: format!("{} features", expected),
            found: format!("{} features", x.len()),
        });
    }
    Ok(())
}

/// Validate a training matrix and return its width
pub(crate) fn check_matrix(x: &[Vec<f64>], y: Option<&[f64]>) -> Result<usize> {
    let first = x
        .first()
        .ok_or_else(|| TwinError::InvalidTrainingData("empty feature matrix".into()))?;
    let width = first.len();
    if width == 0 {
        return Err(TwinError::InvalidTrainingData("feature rows are empty".into()));
    }
    if x.iter().any(|row| row.len() != width) {
        return Err(TwinError::InvalidTrainingData("ragged feature matrix".into()));
    }
    if x.iter().flatten().any(|v| !v.is_finite()) {
        return Err(TwinError::InvalidTrainingData("non-finite feature value".into()));
    }
    if let Some(y) = y {
        if y.len() != x.len() {
            return Err(TwinError::InvalidTrainingData(format!(
                "{} rows but {} labels",
                x.len(),
                y.len()
            )));
        }
        if y.iter().any(|v| !v.is_finite()) {
            return Err(TwinError::InvalidTrainingData("non-finite label".into()));
        }
    }
    Ok(width)
}

/// Seeded shuffle into (train, holdout) indices; no holdout below 10 rows
pub(crate) fn holdout_split(n: usize, fraction: f64, seed: u64) -> (Vec<usize>, Vec<usize>) {
    let mut indices: Vec<usize> = (0..n).collect();
    if n < 10 {
        return (indices, Vec::new());
    }
    let mut rng = StdRng::seed_from_u64(seed);
    indices.shuffle(&mut rng);
    let holdout = ((n as f64) * fraction).round() as usize;
    let train = indices.split_off(holdout.min(n - 1));
    (train, indices)
}

/// Summary of one training run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingReport {
    pub model: String,
    pub train_samples: usize,
    pub holdout_samples: usize,
    /// Holdout metrics by name (empty without a holdout)
    pub metrics: BTreeMap<String, f64>,
}

impl TrainingReport {
    pub(crate) fn new(model: &str, train_samples: usize, holdout_samples: usize) -> Self {
        Self {
            model: model.to_string(),
            train_samples,
            holdout_samples,
            metrics: BTreeMap::new(),
        }
    }

    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }

    pub(crate) fn log(&self) {
        let metrics: Vec<String> = self
            .metrics
            .iter()
            .map(|(k, v)| format!("{}={:.4}", k, v))
            .collect();
        info!(
            "Trained {} on {} samples ({} held out) {}",
            self.model,
            self.train_samples,
            self.holdout_samples,
            metrics.join(" ")
        );
    }
}

/// Outcome of one model call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", content = "value", rename_all = "snake_case")]
pub enum Inference {
    Scored(f64),
    /// The model could not answer; carries the reason
    Unavailable(String),
}

impl Inference {
    pub fn value(&self) -> Option<f64> {
        match self {
            Inference::Scored(v) => Some(*v),
            Inference::Unavailable(_) => None,
        }
    }

    pub fn value_or(&self, default: f64) -> f64 {
        self.value().unwrap_or(default)
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Inference::Scored(_))
    }
}

impl From<Result<f64>> for Inference {
    fn from(result: Result<f64>) -> Self {
        match result {
            Ok(v) if v.is_finite() => Inference::Scored(v),
            Ok(v) => Inference::Unavailable(format!("non-finite output {}", v)),
            Err(e) => Inference::Unavailable(e.to_string()),
        }
    }
}

/// One inference per model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelOutputs {
    pub anomaly: Inference,
    pub failure: Inference,
    pub rul: Inference,
}

impl ModelOutputs {
    /// Every model unavailable for the same reason
    pub fn unavailable(reason: &str) -> Self {
        Self {
            anomaly: Inference::Unavailable(reason.to_string()),
            failure: Inference::Unavailable(reason.to_string()),
            rul: Inference::Unavailable(reason.to_string()),
        }
    }
}

/// The three estimators, trained and persisted together
pub struct ModelSuite {
    pub anomaly: AnomalyDetector,
    pub failure: FailurePredictor,
    pub rul: RulEstimator,
}

impl ModelSuite {
    pub fn new(config: &ModelConfig) -> Self {
        Self {
            anomaly: AnomalyDetector::from_config(config),
            failure: FailurePredictor::from_config(config),
            rul: RulEstimator::from_config(config),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.anomaly.is_trained() && self.failure.is_trained() && self.rul.is_trained()
    }

    /// Run all three models; non-finite inputs are zeroed first
    pub fn infer(&self, x: &[f64]) -> ModelOutputs {
        let sanitized: Vec<f64>;
        let x = if x.iter().all(|v| v.is_finite()) {
            x
        } else {
            warn!("{}", TwinError::NumericFault("non-finite model input zeroed".into()));
            sanitized = x.iter().map(|v| if v.is_finite() { *v } else { 0.0 }).collect();
            &sanitized
        };

        let outputs = ModelOutputs {
            anomaly: self.anomaly.predict(x).into(),
            failure: self.failure.predict_proba(x).into(),
            rul: self.rul.predict(x).into(),
        };
        for (name, inference) in [
            (AnomalyDetector::NAME, &outputs.anomaly),
            (FailurePredictor::NAME, &outputs.failure),
            (RulEstimator::NAME, &outputs.rul),
        ] {
            if let Inference::Unavailable(reason) = inference {
                warn!("{} unavailable: {}", name, reason);
            }
        }
        outputs
    }

    /// Load all artifacts from `dir`; on any error no estimator changes
    pub fn load_all(&mut self, dir: &Path) -> Result<()> {
        let mut anomaly = self.anomaly.clone();
        let mut failure = self.failure.clone();
        let mut rul = self.rul.clone();
        anomaly.load(&dir.join(AnomalyDetector::ARTIFACT))?;
        failure.load(&dir.join(FailurePredictor::ARTIFACT))?;
        rul.load(&dir.join(RulEstimator::ARTIFACT))?;

        self.anomaly = anomaly;
        self.failure = failure;
        self.rul = rul;
        info!("Loaded all models from {}", dir.display());
        Ok(())
    }

    pub fn save_all(&self, dir: &Path) -> Result<()> {
        self.anomaly.save(&dir.join(AnomalyDetector::ARTIFACT))?;
        self.failure.save(&dir.join(FailurePredictor::ARTIFACT))?;
        self.rul.save(&dir.join(RulEstimator::ARTIFACT))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inference_from_result() {
        assert_eq!(Inference::from(Ok::<f64, TwinError>(0.3)), Inference::Scored(0.3));
        assert!(!Inference::from(Ok::<f64, TwinError>(f64::NAN)).is_available());
        let missing: Inference = Err(TwinError::NotTrained("rul_estimator")).into();
        assert_eq!(missing.value_or(1000.0), 1000.0);
    }

    #[test]
    fn test_inference_serializes_tagged() {
        let json = serde_json::to_string(&Inference::Scored(0.5)).unwrap();
        assert_eq!(json, r#"{"state":"scored","value":0.5}"#);
    }

    #[test]
    fn test_untrained_suite_is_unavailable() {
        let suite = ModelSuite::new(&ModelConfig::default());
        assert!(!suite.is_ready());
        let outputs = suite.infer(&[0.0; 38]);
        assert!(!outputs.anomaly.is_available());
        assert!(!outputs.failure.is_available());
        assert!(!outputs.rul.is_available());
    }

    #[test]
    fn test_holdout_split() {
        let (train, test) = holdout_split(100, 0.2, 42);
        assert_eq!(train.len(), 80);
        assert_eq!(test.len(), 20);
        let mut all: Vec<usize> = train.iter().chain(&test).copied().collect();
        all.sort_unstable();
        assert_eq!(all, (0..100).collect::<Vec<_>>());

        let (train, test) = holdout_split(9, 0.2, 42);
        assert_eq!(train.len(), 9);
        assert!(test.is_empty());
    }

    #[test]
    fn test_check_matrix() {
        assert!(check_matrix(&[], None).is_err());
        assert!(check_matrix(&[vec![1.0], vec![1.0, 2.0]], None).is_err());
        assert!(check_matrix(&[vec![1.0]], Some(&[1.0, 0.0])).is_err());
        assert_eq!(check_matrix(&[vec![1.0, 2.0]], Some(&[1.0])).unwrap(), 2);
    }
}
