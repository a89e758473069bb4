//! Second-order gradient-boosted tree ensembles

use super::tree::{FeatureBins, GrowContext, RegressionTree, TreeParams};
use super::{check_input, check_matrix};
use crate::config::ModelConfig;
use crate::error::{Result, TwinError};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Loss being minimized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Objective {
    /// Binary labels, output is a probability
    Logistic,
    /// Continuous targets
    SquaredError,
}

impl Objective {
    fn base_margin(&self, y: &[f64]) -> f64 {
        let mean = y.iter().sum::<f64>() / y.len() as f64;
        match self {
            Objective::Logistic => {
                let p = mean.clamp(1e-6, 1.0 - 1e-6);
                (p / (1.0 - p)).ln()
            }
            Objective::SquaredError => mean,
        }
    }

    /// Gradient and hessian of the loss at `margin`
    fn gradients(&self, margin: f64, target: f64) -> (f64, f64) {
        match self {
            Objective::Logistic => {
                let p = sigmoid(margin);
                (p - target, (p * (1.0 - p)).max(1e-16))
            }
            Objective::SquaredError => (margin - target, 1.0),
        }
    }

    /// Map a raw margin to the output space
    pub fn transform(&self, margin: f64) -> f64 {
        match self {
            Objective::Logistic => sigmoid(margin),
            Objective::SquaredError => margin,
        }
    }
}

pub(crate) fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoostingParams {
    pub n_estimators: usize,
    pub max_depth: usize,
    pub learning_rate: f64,
    pub lambda: f64,
    pub min_child_weight: f64,
    pub max_bins: usize,
}

impl Default for BoostingParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_depth: 6,
            learning_rate: 0.1,
            lambda: 1.0,
            min_child_weight: 1.0,
            max_bins: 64,
        }
    }
}

impl BoostingParams {
    pub fn from_config(config: &ModelConfig) -> Self {
        Self {
            n_estimators: config.n_estimators,
            max_depth: config.max_depth,
            learning_rate: config.learning_rate,
            ..Self::default()
        }
    }

    fn tree_params(&self) -> TreeParams {
        TreeParams {
            max_depth: self.max_depth,
            learning_rate: self.learning_rate,
            lambda: self.lambda,
            min_child_weight: self.min_child_weight,
        }
    }
}

/// Fitted additive tree ensemble
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBoostedTrees {
    objective: Objective,
    num_features: usize,
    base_margin: f64,
    trees: Vec<RegressionTree>,
}

impl GradientBoostedTrees {
    pub fn fit(objective: Objective, x: &[Vec<f64>], y: &[f64], params: &BoostingParams) -> Result<Self> {
        let num_features = check_matrix(x, Some(y))?;
        if objective == Objective::Logistic && y.iter().any(|v| *v != 0.0 && *v != 1.0) {
            return Err(TwinError::InvalidTrainingData(
                "logistic labels must be 0 or 1".into(),
            ));
        }

        let bins = FeatureBins::fit(x, params.max_bins);
        let codes = bins.encode(x);
        let rows: Vec<usize> = (0..x.len()).collect();
        let base_margin = objective.base_margin(y);
        let mut margins = vec![base_margin; x.len()];
        let mut grad = vec![0.0; x.len()];
        let mut hess = vec![0.0; x.len()];
        let mut trees = Vec::with_capacity(params.n_estimators);

        for round in 0..params.n_estimators {
            for i in 0..x.len() {
                let (g, h) = objective.gradients(margins[i], y[i]);
                grad[i] = g;
                hess[i] = h;
            }
            let ctx = GrowContext {
                bins: &bins,
                codes: &codes,
                grad: &grad,
                hess: &hess,
                params: params.tree_params(),
            };
            let tree = RegressionTree::grow(&ctx, &rows);
            for (margin, row) in margins.iter_mut().zip(x) {
                *margin += tree.predict(row);
            }
            trees.push(tree);

            if round % 25 == 0 {
                debug!("Boosting round {} of {}", round + 1, params.n_estimators);
            }
        }

        Ok(Self {
            objective,
            num_features,
            base_margin,
            trees,
        })
    }

    pub fn objective(&self) -> Objective {
        self.objective
    }

    pub fn num_features(&self) -> usize {
        self.num_features
    }

    pub fn num_trees(&self) -> usize {
        self.trees.len()
    }

    /// Raw additive score before the objective's transform
    pub fn margin(&self, x: &[f64]) -> Result<f64> {
        check_input(self.num_features, x)?;
        Ok(self.base_margin + self.trees.iter().map(|t| t.predict(x)).sum::<f64>())
    }

    pub fn predict(&self, x: &[f64]) -> Result<f64> {
        Ok(self.objective.transform(self.margin(x)?))
    }

    /// Expected margin over the training distribution
    pub fn expected_margin(&self) -> f64 {
        self.base_margin + self.trees.iter().map(RegressionTree::expected_value).sum::<f64>()
    }

    /// Per-feature margin attributions; they sum to `margin(x) - expected_margin()`
    pub fn shap_values(&self, x: &[f64]) -> Result<Vec<f64>> {
        check_input(self.num_features, x)?;
        let mut phi = vec![0.0; self.num_features];
        for tree in &self.trees {
            tree.shap_into(x, &mut phi);
        }
        Ok(phi)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if !self.base_margin.is_finite() || self.num_features == 0 {
            return Err(TwinError::InvalidTrainingData("malformed ensemble header".into()));
        }
        self.trees.iter().try_for_each(|t| t.validate(self.num_features))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn params(n: usize) -> BoostingParams {
        BoostingParams {
            n_estimators: n,
            max_depth: 3,
            ..BoostingParams::default()
        }
    }

    fn grid() -> (Vec<Vec<f64>>, Vec<f64>) {
        let mut x = Vec::new();
        let mut y = Vec::new();
        for i in 0..10 {
            for j in 0..10 {
                let (a, b) = (i as f64 / 9.0, j as f64 / 9.0);
                x.push(vec![a, b, 0.5]);
                y.push(if a + b > 1.0 { 1.0 } else { 0.0 });
            }
        }
        (x, y)
    }

    #[test]
    fn test_regression_reduces_error() {
        let x: Vec<Vec<f64>> = (0..50).map(|i| vec![i as f64 / 49.0]).collect();
        let y: Vec<f64> = x.iter().map(|r| 100.0 * r[0]).collect();
        let model = GradientBoostedTrees::fit(Objective::SquaredError, &x, &y, &params(50)).unwrap();

        let mse: f64 = x
            .iter()
            .zip(&y)
            .map(|(r, t)| (model.predict(r).unwrap() - t).powi(2))
            .sum::<f64>()
            / 50.0;
        assert!(mse < 50.0, "mse {}", mse);
    }

    #[test]
    fn test_logistic_separates_classes() {
        let (x, y) = grid();
        let model = GradientBoostedTrees::fit(Objective::Logistic, &x, &y, &params(30)).unwrap();
        assert!(model.predict(&[1.0, 1.0, 0.5]).unwrap() > 0.8);
        assert!(model.predict(&[0.0, 0.0, 0.5]).unwrap() < 0.2);
    }

    #[test]
    fn test_shap_additivity() {
        let (x, y) = grid();
        let model = GradientBoostedTrees::fit(Objective::Logistic, &x, &y, &params(20)).unwrap();
        for row in x.iter().step_by(7) {
            let phi = model.shap_values(row).unwrap();
            let gap = model.margin(row).unwrap() - model.expected_margin();
            assert_abs_diff_eq!(phi.iter().sum::<f64>(), gap, epsilon = 1e-6);
            // the constant feature never carries attribution
            assert_eq!(phi[2], 0.0);
        }
    }

    #[test]
    fn test_rejects_bad_labels() {
        let x = vec![vec![0.0], vec![1.0]];
        let err = GradientBoostedTrees::fit(Objective::Logistic, &x, &[0.0, 2.0], &params(1)).unwrap_err();
        assert!(matches!(err, TwinError::InvalidTrainingData(_)));
    }

    #[test]
    fn test_single_class_is_stable() {
        let x: Vec<Vec<f64>> = (0..20).map(|i| vec![i as f64]).collect();
        let y = vec![0.0; 20];
        let model = GradientBoostedTrees::fit(Objective::Logistic, &x, &y, &params(5)).unwrap();
        let p = model.predict(&[3.0]).unwrap();
        assert!(p.is_finite() && p < 0.01);
    }

    #[test]
    fn test_width_checked() {
        let x = vec![vec![0.0, 1.0], vec![1.0, 0.0]];
        let model = GradientBoostedTrees::fit(Objective::SquaredError, &x, &[0.0, 1.0], &params(1)).unwrap();
        assert!(matches!(
            model.predict(&[0.0]),
            Err(TwinError::SchemaMismatch { .. })
        ));
    }
}
