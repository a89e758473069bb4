//! Remaining-useful-life regressor

use super::boosting::{BoostingParams, GradientBoostedTrees, Objective};
use super::{holdout_split, read_artifact, write_artifact, Estimator, TrainingReport, RUL_ARTIFACT};
use crate::config::ModelConfig;
use crate::error::{Result, TwinError};
use std::path::Path;

#[derive(Debug, Clone)]
pub struct RulEstimator {
    params: BoostingParams,
    seed: u64,
    model: Option<GradientBoostedTrees>,
}

impl RulEstimator {
    pub fn new(params: BoostingParams, seed: u64) -> Self {
        Self {
            params,
            seed,
            model: None,
        }
    }

    pub fn from_config(config: &ModelConfig) -> Self {
        Self::new(BoostingParams::from_config(config), config.random_seed)
    }

    /// Fit on RUL targets in hours, holding out 20% for evaluation
    pub fn train(&mut self, x: &[Vec<f64>], y: &[f64]) -> Result<TrainingReport> {
        if x.len() != y.len() {
            return Err(TwinError::InvalidTrainingData(format!(
                "{} rows but {} targets",
                x.len(),
                y.len()
            )));
        }
        let (train_idx, test_idx) = holdout_split(x.len(), 0.2, self.seed);
        let x_train: Vec<Vec<f64>> = train_idx.iter().map(|&i| x[i].clone()).collect();
        let y_train: Vec<f64> = train_idx.iter().map(|&i| y[i]).collect();

        let model =
            GradientBoostedTrees::fit(Objective::SquaredError, &x_train, &y_train, &self.params)?;

        let mut report = TrainingReport::new(Self::NAME, train_idx.len(), test_idx.len());
        if !test_idx.is_empty() {
            let n = test_idx.len() as f64;
            let mean = test_idx.iter().map(|&i| y[i]).sum::<f64>() / n;
            let (mut abs, mut sq, mut total) = (0.0, 0.0, 0.0);
            for &i in &test_idx {
                let err = model.predict(&x[i])?.max(0.0) - y[i];
                abs += err.abs();
                sq += err * err;
                total += (y[i] - mean).powi(2);
            }
            report.metrics.insert("mae".into(), abs / n);
            report.metrics.insert("rmse".into(), (sq / n).sqrt());
            if total > 0.0 {
                report.metrics.insert("r2".into(), 1.0 - sq / total);
            }
        }
        report.log();

        self.model = Some(model);
        Ok(report)
    }

    /// Remaining useful life in hours, never negative
    pub fn predict(&self, x: &[f64]) -> Result<f64> {
        let model = self.model.as_ref().ok_or(TwinError::NotTrained(Self::NAME))?;
        Ok(model.predict(x)?.max(0.0))
    }
}

impl Estimator for RulEstimator {
    const NAME: &'static str = "rul_estimator";
    const ARTIFACT: &'static str = RUL_ARTIFACT;

    fn is_trained(&self) -> bool {
        self.model.is_some()
    }

    fn save(&self, path: &Path) -> Result<()> {
        let model = self.model.as_ref().ok_or(TwinError::NotTrained(Self::NAME))?;
        write_artifact(path, model)
    }

    fn load(&mut self, path: &Path) -> Result<()> {
        let model: GradientBoostedTrees = read_artifact(path)?;
        model.validate()?;
        if model.objective() != Objective::SquaredError {
            return Err(TwinError::InvalidTrainingData(format!(
                "{} is not a regressor",
                path.display()
            )));
        }
        self.model = Some(model);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn dataset() -> (Vec<Vec<f64>>, Vec<f64>) {
        let x: Vec<Vec<f64>> = (0..100).map(|i| vec![i as f64 / 99.0]).collect();
        let y = x.iter().map(|r| 500.0 * (1.0 - r[0])).collect();
        (x, y)
    }

    fn estimator() -> RulEstimator {
        let params = BoostingParams {
            n_estimators: 60,
            max_depth: 4,
            ..BoostingParams::default()
        };
        RulEstimator::new(params, 42)
    }

    #[test]
    fn test_untrained() {
        assert!(matches!(
            estimator().predict(&[0.5]),
            Err(TwinError::NotTrained("rul_estimator"))
        ));
    }

    #[test]
    fn test_learns_decreasing_life() {
        let (x, y) = dataset();
        let mut model = estimator();
        let report = model.train(&x, &y).unwrap();
        assert!(report.metric("r2").unwrap() > 0.9);

        let fresh = model.predict(&[0.0]).unwrap();
        let worn = model.predict(&[1.0]).unwrap();
        assert!(fresh > worn);
        assert!(worn >= 0.0);
    }

    #[test]
    fn test_never_negative() {
        let x = vec![vec![0.0], vec![1.0], vec![2.0]];
        let y = vec![-50.0, -60.0, -70.0];
        let mut model = estimator();
        model.train(&x, &y).unwrap();
        assert_eq!(model.predict(&[1.0]).unwrap(), 0.0);
    }

    #[test]
    fn test_load_rejects_classifier_artifact() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("failure_predictor.json");
        let mut classifier = crate::models::FailurePredictor::new(BoostingParams::default(), 0.7, 1);
        classifier
            .train(&[vec![0.0], vec![1.0]], &[0.0, 1.0])
            .unwrap();
        classifier.save(&path).unwrap();

        let mut model = estimator();
        assert!(model.load(&path).is_err());
        assert!(!model.is_trained());
    }
}
