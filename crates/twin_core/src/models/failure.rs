//! Binary failure predictor with additive explanations

use super::boosting::{sigmoid, BoostingParams, GradientBoostedTrees, Objective};
use super::{holdout_split, read_artifact, write_artifact, Estimator, TrainingReport, FAILURE_ARTIFACT};
use crate::config::ModelConfig;
use crate::error::{Result, TwinError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Per-feature attribution of one prediction, in log-odds
///
/// `baseline + sum(values) == margin`, and `probability == sigmoid(margin)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Explanation {
    pub baseline: f64,
    pub values: Vec<f64>,
    pub margin: f64,
    pub probability: f64,
}

impl Explanation {
    /// Features ordered by absolute contribution, largest first
    pub fn ranked<'a>(&self, names: &'a [String]) -> Vec<(&'a str, f64)> {
        let mut ranked: Vec<(&str, f64)> = names
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().copied())
            .collect();
        ranked.sort_by(|a, b| b.1.abs().total_cmp(&a.1.abs()));
        ranked
    }
}

#[derive(Debug, Clone)]
pub struct FailurePredictor {
    params: BoostingParams,
    threshold: f64,
    seed: u64,
    model: Option<GradientBoostedTrees>,
}

impl FailurePredictor {
    pub fn new(params: BoostingParams, threshold: f64, seed: u64) -> Self {
        Self {
            params,
            threshold,
            seed,
            model: None,
        }
    }

    pub fn from_config(config: &ModelConfig) -> Self {
        Self::new(
            BoostingParams::from_config(config),
            config.failure_threshold,
            config.random_seed,
        )
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Fit on labels in {0, 1}, holding out 20% for evaluation
    pub fn train(&mut self, x: &[Vec<f64>], y: &[f64]) -> Result<TrainingReport> {
        if x.len() != y.len() {
            return Err(TwinError::InvalidTrainingData(format!(
                "{} rows but {} labels",
                x.len(),
                y.len()
            )));
        }
        let (train_idx, test_idx) = holdout_split(x.len(), 0.2, self.seed);
        let x_train: Vec<Vec<f64>> = train_idx.iter().map(|&i| x[i].clone()).collect();
        let y_train: Vec<f64> = train_idx.iter().map(|&i| y[i]).collect();

        let model = GradientBoostedTrees::fit(Objective::Logistic, &x_train, &y_train, &self.params)?;

        let mut report = TrainingReport::new(Self::NAME, train_idx.len(), test_idx.len());
        report
            .metrics
            .insert("positive_rate".into(), y.iter().sum::<f64>() / y.len() as f64);
        if !test_idx.is_empty() {
            let mut correct = 0usize;
            let mut log_loss = 0.0;
            for &i in &test_idx {
                let p = model.predict(&x[i])?.clamp(1e-15, 1.0 - 1e-15);
                if (p >= self.threshold) == (y[i] >= 0.5) {
                    correct += 1;
                }
                log_loss -= y[i] * p.ln() + (1.0 - y[i]) * (1.0 - p).ln();
            }
            let n = test_idx.len() as f64;
            report.metrics.insert("accuracy".into(), correct as f64 / n);
            report.metrics.insert("log_loss".into(), log_loss / n);
        }
        report.log();

        self.model = Some(model);
        Ok(report)
    }

    fn model(&self) -> Result<&GradientBoostedTrees> {
        self.model.as_ref().ok_or(TwinError::NotTrained(Self::NAME))
    }

    /// Failure probability in [0, 1]
    pub fn predict_proba(&self, x: &[f64]) -> Result<f64> {
        self.model()?.predict(x)
    }

    /// Gate the probability; `None` uses the configured threshold
    pub fn predict(&self, x: &[f64], threshold: Option<f64>) -> Result<bool> {
        let threshold = threshold.unwrap_or(self.threshold);
        Ok(self.predict_proba(x)? >= threshold)
    }

    /// Exact tree attributions in margin space
    pub fn explain(&self, x: &[f64]) -> Result<Explanation> {
        let model = self.model()?;
        let values = model.shap_values(x)?;
        let margin = model.margin(x)?;
        Ok(Explanation {
            baseline: model.expected_margin(),
            values,
            margin,
            probability: sigmoid(margin),
        })
    }
}

impl Estimator for FailurePredictor {
    const NAME: &'static str = "failure_predictor";
    const ARTIFACT: &'static str = FAILURE_ARTIFACT;

    fn is_trained(&self) -> bool {
        self.model.is_some()
    }

    fn save(&self, path: &Path) -> Result<()> {
        write_artifact(path, self.model()?)
    }

    fn load(&mut self, path: &Path) -> Result<()> {
        let model: GradientBoostedTrees = read_artifact(path)?;
        model.validate()?;
        if model.objective() != Objective::Logistic {
            return Err(TwinError::InvalidTrainingData(format!(
                "{} is not a classifier",
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
    use approx::assert_abs_diff_eq;
    use tempfile::TempDir;

    fn dataset() -> (Vec<Vec<f64>>, Vec<f64>) {
        let x: Vec<Vec<f64>> = (0..200)
            .map(|i| {
                let wear = i as f64 / 199.0;
                vec![wear, (i % 7) as f64 / 6.0]
            })
            .collect();
        let y = x.iter().map(|r| if r[0] > 0.7 { 1.0 } else { 0.0 }).collect();
        (x, y)
    }

    fn predictor() -> FailurePredictor {
        let params = BoostingParams {
            n_estimators: 30,
            max_depth: 3,
            ..BoostingParams::default()
        };
        FailurePredictor::new(params, 0.7, 42)
    }

    #[test]
    fn test_untrained() {
        let model = predictor();
        assert!(matches!(model.predict_proba(&[0.0, 0.0]), Err(TwinError::NotTrained(_))));
        assert!(matches!(model.explain(&[0.0, 0.0]), Err(TwinError::NotTrained(_))));
        assert!(!model.is_trained());
    }

    #[test]
    fn test_train_and_gate() {
        let (x, y) = dataset();
        let mut model = predictor();
        let report = model.train(&x, &y).unwrap();
        assert_eq!(report.train_samples, 160);
        assert_eq!(report.holdout_samples, 40);
        assert!(report.metric("accuracy").unwrap() > 0.9);

        assert!(model.predict(&[0.95, 0.5], None).unwrap());
        assert!(!model.predict(&[0.1, 0.5], None).unwrap());
        // explicit threshold overrides the configured one
        assert!(model.predict(&[0.1, 0.5], Some(0.0)).unwrap());
    }

    #[test]
    fn test_explanation_is_additive() {
        let (x, y) = dataset();
        let mut model = predictor();
        model.train(&x, &y).unwrap();
        let explanation = model.explain(&[0.9, 0.2]).unwrap();
        let total: f64 = explanation.values.iter().sum();
        assert_abs_diff_eq!(total, explanation.margin - explanation.baseline, epsilon = 1e-6);
        assert_abs_diff_eq!(
            explanation.probability,
            model.predict_proba(&[0.9, 0.2]).unwrap(),
            epsilon = 1e-12
        );

        let names = vec!["wear".to_string(), "phase".to_string()];
        assert_eq!(explanation.ranked(&names)[0].0, "wear");
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(FailurePredictor::ARTIFACT);
        let (x, y) = dataset();
        let mut model = predictor();
        model.train(&x, &y).unwrap();
        model.save(&path).unwrap();

        let mut restored = predictor();
        restored.load(&path).unwrap();
        assert_abs_diff_eq!(
            restored.predict_proba(&[0.8, 0.1]).unwrap(),
            model.predict_proba(&[0.8, 0.1]).unwrap(),
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_save_untrained_fails() {
        let dir = TempDir::new().unwrap();
        let err = predictor().save(&dir.path().join("f.json")).unwrap_err();
        assert!(matches!(err, TwinError::NotTrained(_)));
    }
}
