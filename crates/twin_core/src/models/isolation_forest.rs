//! Isolation-forest anomaly detector
//!
//! Anomalies are isolated by fewer random splits. The separation score
//! `s = 2^(-E[h(x)] / c(psi))` lies in (0, 1]; the detector centres it on
//! the training quantile at `1 - contamination` and squashes it through a
//! logistic so scores read as 0 (nominal) to 1 (anomalous).

use super::{check_input, check_matrix, read_artifact, write_artifact, Estimator, ANOMALY_ARTIFACT};
use crate::config::ModelConfig;
use crate::error::{Result, TwinError};
use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

const MAX_SAMPLES: usize = 256;
const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;
/// Logistic slope applied to `s - offset`
const STEEPNESS: f64 = 20.0;

/// Average path length of an unsuccessful BST search over `n` points
fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum IsolationNode {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        size: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct IsolationTree {
    nodes: Vec<IsolationNode>,
}

impl IsolationTree {
    fn build(x: &[Vec<f64>], rows: Vec<usize>, height_limit: usize, rng: &mut StdRng) -> Self {
        let mut tree = Self { nodes: Vec::new() };
        tree.build_node(x, rows, 0, height_limit, rng);
        tree
    }

    fn build_node(
        &mut self,
        x: &[Vec<f64>],
        rows: Vec<usize>,
        depth: usize,
        height_limit: usize,
        rng: &mut StdRng,
    ) -> usize {
        let index = self.nodes.len();
        if depth >= height_limit || rows.len() <= 1 {
            self.nodes.push(IsolationNode::Leaf { size: rows.len() });
            return index;
        }

        // features that still vary within this node
        let width = x[rows[0]].len();
        let spans: Vec<(usize, f64, f64)> = (0..width)
            .filter_map(|f| {
                let (lo, hi) = rows.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &r| {
                    (lo.min(x[r][f]), hi.max(x[r][f]))
                });
                (hi > lo).then_some((f, lo, hi))
            })
            .collect();
        if spans.is_empty() {
            self.nodes.push(IsolationNode::Leaf { size: rows.len() });
            return index;
        }

        let (feature, lo, hi) = spans[rng.gen_range(0..spans.len())];
        let threshold = rng.gen_range(lo..hi);
        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) =
            rows.iter().partition(|&&r| x[r][feature] < threshold);

        self.nodes.push(IsolationNode::Leaf { size: rows.len() });
        let left = self.build_node(x, left_rows, depth + 1, height_limit, rng);
        let right = self.build_node(x, right_rows, depth + 1, height_limit, rng);
        self.nodes[index] = IsolationNode::Split {
            feature,
            threshold,
            left,
            right,
        };
        index
    }

    fn path_length(&self, x: &[f64]) -> f64 {
        let mut index = 0;
        let mut depth = 0.0;
        loop {
            match &self.nodes[index] {
                IsolationNode::Leaf { size } => return depth + average_path_length(*size),
                IsolationNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    index = if x[*feature] < *threshold { *left } else { *right };
                    depth += 1.0;
                }
            }
        }
    }

    fn is_well_formed(&self, num_features: usize) -> bool {
        !self.nodes.is_empty()
            && self.nodes.iter().enumerate().all(|(i, node)| match node {
                IsolationNode::Leaf { .. } => true,
                IsolationNode::Split {
                    feature,
                    left,
                    right,
                    ..
                } => {
                    *feature < num_features
                        && *left > i
                        && *right > i
                        && *left < self.nodes.len()
                        && *right < self.nodes.len()
                }
            })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct IsolationForest {
    num_features: usize,
    sample_size: usize,
    /// Separation score at the contamination quantile of the training data
    offset: f64,
    trees: Vec<IsolationTree>,
}

impl IsolationForest {
    fn separation(&self, x: &[f64]) -> f64 {
        let mean_path =
            self.trees.iter().map(|t| t.path_length(x)).sum::<f64>() / self.trees.len() as f64;
        let c = average_path_length(self.sample_size).max(f64::MIN_POSITIVE);
        2f64.powf(-mean_path / c)
    }
}

#[derive(Debug, Clone)]
pub struct AnomalyDetector {
    contamination: f64,
    n_trees: usize,
    seed: u64,
    forest: Option<IsolationForest>,
}

impl AnomalyDetector {
    pub fn new(contamination: f64, n_trees: usize, seed: u64) -> Self {
        Self {
            contamination: contamination.clamp(0.0, 0.5),
            n_trees: n_trees.max(1),
            seed,
            forest: None,
        }
    }

    pub fn from_config(config: &ModelConfig) -> Self {
        Self::new(
            config.anomaly_contamination,
            config.isolation_trees,
            config.random_seed,
        )
    }

    /// Fit on nominal feature vectors only
    pub fn train(&mut self, x: &[Vec<f64>]) -> Result<()> {
        let num_features = check_matrix(x, None)?;
        let mut rng = StdRng::seed_from_u64(self.seed);
        let sample_size = x.len().min(MAX_SAMPLES);
        let height_limit = (sample_size.max(2) as f64).log2().ceil() as usize;

        let trees = (0..self.n_trees)
            .map(|_| {
                let rows = sample(&mut rng, x.len(), sample_size).into_vec();
                IsolationTree::build(x, rows, height_limit, &mut rng)
            })
            .collect();

        let mut forest = IsolationForest {
            num_features,
            sample_size,
            offset: 0.0,
            trees,
        };
        let mut scores: Vec<f64> = x.iter().map(|row| forest.separation(row)).collect();
        scores.sort_by(|a, b| a.total_cmp(b));
        forest.offset = quantile(&scores, 1.0 - self.contamination);

        info!(
            "Trained anomaly detector: {} trees over {} nominal samples, offset {:.4}",
            self.n_trees,
            x.len(),
            forest.offset
        );
        self.forest = Some(forest);
        Ok(())
    }

    /// Anomaly score in [0, 1]
    pub fn predict(&self, x: &[f64]) -> Result<f64> {
        let forest = self.forest.as_ref().ok_or(TwinError::NotTrained(Self::NAME))?;
        check_input(forest.num_features, x)?;
        let s = forest.separation(x);
        let score = 1.0 / (1.0 + (-STEEPNESS * (s - forest.offset)).exp());
        Ok(score.clamp(0.0, 1.0))
    }

    /// Raw separation score `s`, before centring
    pub fn separation_score(&self, x: &[f64]) -> Result<f64> {
        let forest = self.forest.as_ref().ok_or(TwinError::NotTrained(Self::NAME))?;
        check_input(forest.num_features, x)?;
        Ok(forest.separation(x))
    }
}

/// Linear-interpolated quantile of sorted values
fn quantile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let position = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let frac = position - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * frac
}

impl Estimator for AnomalyDetector {
    const NAME: &'static str = "anomaly_detector";
    const ARTIFACT: &'static str = ANOMALY_ARTIFACT;

    fn is_trained(&self) -> bool {
        self.forest.is_some()
    }

    fn save(&self, path: &Path) -> Result<()> {
        let forest = self.forest.as_ref().ok_or(TwinError::NotTrained(Self::NAME))?;
        write_artifact(path, forest)
    }

    fn load(&mut self, path: &Path) -> Result<()> {
        let forest: IsolationForest = read_artifact(path)?;
        if forest.trees.is_empty()
            || !forest.offset.is_finite()
            || !forest.trees.iter().all(|t| t.is_well_formed(forest.num_features))
        {
            return Err(TwinError::InvalidTrainingData(format!(
                "{} holds a malformed isolation forest",
                path.display()
            )));
        }
        self.forest = Some(forest);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_distr::{Distribution, Normal};
    use tempfile::TempDir;

    fn nominal(n: usize) -> Vec<Vec<f64>> {
        let mut rng = StdRng::seed_from_u64(1);
        let noise = Normal::new(0.5, 0.05).unwrap();
        (0..n)
            .map(|_| (0..4).map(|_| noise.sample(&mut rng)).collect())
            .collect()
    }

    #[test]
    fn test_average_path_length() {
        assert_eq!(average_path_length(1), 0.0);
        assert_eq!(average_path_length(2), 1.0);
        assert!((average_path_length(256) - 10.24).abs() < 0.05);
    }

    #[test]
    fn test_predict_before_train() {
        let detector = AnomalyDetector::new(0.05, 10, 42);
        assert!(matches!(
            detector.predict(&[0.0; 4]),
            Err(TwinError::NotTrained("anomaly_detector"))
        ));
        assert!(!detector.is_trained());
    }

    #[test]
    fn test_outlier_scores_higher() {
        let mut detector = AnomalyDetector::new(0.05, 50, 42);
        detector.train(&nominal(500)).unwrap();

        let inlier = detector.predict(&[0.5, 0.5, 0.5, 0.5]).unwrap();
        let outlier = detector.predict(&[3.0, -2.0, 3.0, -2.0]).unwrap();
        assert!((0.0..=1.0).contains(&inlier));
        assert!(outlier > inlier);
        assert!(outlier > 0.7, "outlier score {}", outlier);
        assert!(inlier < 0.5, "inlier score {}", inlier);
    }

    #[test]
    fn test_training_is_seeded() {
        let data = nominal(300);
        let mut a = AnomalyDetector::new(0.05, 20, 7);
        let mut b = AnomalyDetector::new(0.05, 20, 7);
        a.train(&data).unwrap();
        b.train(&data).unwrap();
        assert_eq!(a.predict(&data[0]).unwrap(), b.predict(&data[0]).unwrap());
    }

    #[test]
    fn test_save_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(AnomalyDetector::ARTIFACT);
        let mut detector = AnomalyDetector::new(0.05, 10, 42);
        detector.train(&nominal(100)).unwrap();
        detector.save(&path).unwrap();

        let mut restored = AnomalyDetector::new(0.05, 10, 42);
        restored.load(&path).unwrap();
        let x = [0.4, 0.6, 0.5, 0.5];
        let delta = (restored.predict(&x).unwrap() - detector.predict(&x).unwrap()).abs();
        assert!(delta < 1e-9);
    }

    #[test]
    fn test_load_missing_keeps_model() {
        let mut detector = AnomalyDetector::new(0.05, 10, 42);
        detector.train(&nominal(50)).unwrap();
        let err = detector.load(Path::new("/nonexistent/anomaly_detector.json")).unwrap_err();
        assert!(matches!(err, TwinError::ModelNotFound(_)));
        assert!(detector.is_trained());
    }
}
