//! Regression trees for the boosted ensembles
//!
//! Trees are grown on histogram bins with second-order gradient statistics
//! and stored as a flat node array. Each node keeps its cover (training rows
//! that reached it), which is what the path-dependent attribution below
//! needs to weigh the branches a feature did not take.

use crate::error::{Result, TwinError};
use serde::{Deserialize, Serialize};

/// Candidate split thresholds per feature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureBins {
    edges: Vec<Vec<f64>>,
}

impl FeatureBins {
    /// Thresholds at midpoints between distinct values, thinned to quantiles
    /// when a feature has more than `max_bins` distinct values
    pub fn fit(x: &[Vec<f64>], max_bins: usize) -> Self {
        let width = x.first().map_or(0, Vec::len);
        let max_bins = max_bins.max(2);
        let edges = (0..width)
            .map(|f| {
                let mut values: Vec<f64> = x.iter().map(|row| row[f]).collect();
                values.sort_by(|a, b| a.total_cmp(b));
                values.dedup();
                if values.len() <= max_bins {
                    values.windows(2).map(|w| (w[0] + w[1]) / 2.0).collect()
                } else {
                    let mut edges: Vec<f64> = (1..max_bins)
                        .map(|k| {
                            let i = k * values.len() / max_bins;
                            (values[i - 1] + values[i]) / 2.0
                        })
                        .collect();
                    edges.dedup();
                    edges
                }
            })
            .collect();
        Self { edges }
    }

    pub fn num_features(&self) -> usize {
        self.edges.len()
    }

    /// Bins for `feature` (one more than its thresholds)
    pub fn num_bins(&self, feature: usize) -> usize {
        self.edges[feature].len() + 1
    }

    /// Bin index: number of thresholds strictly below `value`
    pub fn code(&self, feature: usize, value: f64) -> usize {
        self.edges[feature].partition_point(|e| *e < value)
    }

    /// Splitting after `bin` sends `value <= threshold(bin)` left
    pub fn threshold(&self, feature: usize, bin: usize) -> f64 {
        self.edges[feature][bin]
    }

    /// Column-major bin codes for a matrix
    pub fn encode(&self, x: &[Vec<f64>]) -> Vec<Vec<u16>> {
        (0..self.num_features())
            .map(|f| x.iter().map(|row| self.code(f, row[f]) as u16).collect())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
        cover: f64,
    },
    Leaf {
        value: f64,
        cover: f64,
    },
}

impl Node {
    pub fn cover(&self) -> f64 {
        match self {
            Node::Split { cover, .. } | Node::Leaf { cover, .. } => *cover,
        }
    }
}

/// Growth limits shared by every tree of an ensemble
#[derive(Debug, Clone, Copy)]
pub struct TreeParams {
    pub max_depth: usize,
    pub learning_rate: f64,
    /// L2 penalty on leaf weights
    pub lambda: f64,
    /// Minimum hessian sum on each side of a split
    pub min_child_weight: f64,
}

/// Per-round training inputs
pub struct GrowContext<'a> {
    pub bins: &'a FeatureBins,
    pub codes: &'a [Vec<u16>],
    pub grad: &'a [f64],
    pub hess: &'a [f64],
    pub params: TreeParams,
}

struct SplitCandidate {
    feature: usize,
    bin: usize,
    gain: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    nodes: Vec<Node>,
}

impl RegressionTree {
    /// Grow one tree over `rows` from gradient statistics
    pub fn grow(ctx: &GrowContext<'_>, rows: &[usize]) -> Self {
        let mut tree = Self { nodes: Vec::new() };
        tree.grow_node(ctx, rows.to_vec(), 0);
        tree
    }

    fn grow_node(&mut self, ctx: &GrowContext<'_>, rows: Vec<usize>, depth: usize) -> usize {
        let params = ctx.params;
        let g: f64 = rows.iter().map(|&r| ctx.grad[r]).sum();
        let h: f64 = rows.iter().map(|&r| ctx.hess[r]).sum();
        let cover = rows.len() as f64;
        let index = self.nodes.len();

        let split = if depth < params.max_depth && rows.len() >= 2 {
            best_split(ctx, &rows, g, h)
        } else {
            None
        };

        let Some(split) = split else {
            let value = -g / (h + params.lambda) * params.learning_rate;
            self.nodes.push(Node::Leaf { value, cover });
            return index;
        };

        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
            .iter()
            .partition(|&&r| (ctx.codes[split.feature][r] as usize) <= split.bin);

        self.nodes.push(Node::Leaf { value: 0.0, cover });
        let left = self.grow_node(ctx, left_rows, depth + 1);
        let right = self.grow_node(ctx, right_rows, depth + 1);
        self.nodes[index] = Node::Split {
            feature: split.feature,
            threshold: ctx.bins.threshold(split.feature, split.bin),
            left,
            right,
            cover,
        };
        index
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn predict(&self, x: &[f64]) -> f64 {
        let mut index = 0;
        loop {
            match &self.nodes[index] {
                Node::Leaf { value, .. } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                    ..
                } => {
                    index = if x[*feature] <= *threshold { *left } else { *right };
                }
            }
        }
    }

    /// Cover-weighted mean output over the training distribution
    pub fn expected_value(&self) -> f64 {
        self.expected_from(0)
    }

    fn expected_from(&self, index: usize) -> f64 {
        match &self.nodes[index] {
            Node::Leaf { value, .. } => *value,
            Node::Split {
                left, right, cover, ..
            } => {
                let l = &self.nodes[*left];
                let r = &self.nodes[*right];
                (l.cover() * self.expected_from(*left) + r.cover() * self.expected_from(*right))
                    / cover
            }
        }
    }

    /// Reject structures that would index out of bounds or loop
    pub fn validate(&self, num_features: usize) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(TwinError::InvalidTrainingData("tree without nodes".into()));
        }
        for (i, node) in self.nodes.iter().enumerate() {
            let ok = match node {
                Node::Leaf { value, cover } => value.is_finite() && *cover > 0.0,
                Node::Split {
                    feature,
                    left,
                    right,
                    cover,
                    ..
                } => {
                    *feature < num_features
                        && *left > i
                        && *right > i
                        && *left < self.nodes.len()
                        && *right < self.nodes.len()
                        && *cover > 0.0
                }
            };
            if !ok {
                return Err(TwinError::InvalidTrainingData(format!(
                    "malformed tree node {}",
                    i
                )));
            }
        }
        Ok(())
    }

    /// Add this tree's exact path-dependent attributions for `x` into `phi`
    pub fn shap_into(&self, x: &[f64], phi: &mut [f64]) {
        let path = Vec::with_capacity(self.depth() + 2);
        self.shap_recurse(x, phi, 0, path, 1.0, 1.0, None);
    }

    fn depth(&self) -> usize {
        fn walk(nodes: &[Node], index: usize) -> usize {
            match &nodes[index] {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => 1 + walk(nodes, *left).max(walk(nodes, *right)),
            }
        }
        walk(&self.nodes, 0)
    }

    #[allow(clippy::too_many_arguments)]
    fn shap_recurse(
        &self,
        x: &[f64],
        phi: &mut [f64],
        index: usize,
        mut path: Vec<PathElement>,
        zero_fraction: f64,
        one_fraction: f64,
        feature: Option<usize>,
    ) {
        extend_path(&mut path, zero_fraction, one_fraction, feature);

        match &self.nodes[index] {
            Node::Leaf { value, .. } => {
                for i in 1..path.len() {
                    let weight = unwound_path_sum(&path, i);
                    let element = &path[i];
                    if let Some(f) = element.feature {
                        phi[f] += weight * (element.one_fraction - element.zero_fraction) * value;
                    }
                }
            }
            Node::Split {
                feature: split_feature,
                threshold,
                left,
                right,
                cover,
            } => {
                let (hot, cold) = if x[*split_feature] <= *threshold {
                    (*left, *right)
                } else {
                    (*right, *left)
                };
                let hot_zero = self.nodes[hot].cover() / cover;
                let cold_zero = self.nodes[cold].cover() / cover;

                // a feature split on again earlier in the path is folded back in
                let mut incoming_zero = 1.0;
                let mut incoming_one = 1.0;
                if let Some(k) = path
                    .iter()
                    .skip(1)
                    .position(|e| e.feature == Some(*split_feature))
                    .map(|k| k + 1)
                {
                    incoming_zero = path[k].zero_fraction;
                    incoming_one = path[k].one_fraction;
                    unwind_path(&mut path, k);
                }

                self.shap_recurse(
                    x,
                    phi,
                    hot,
                    path.clone(),
                    hot_zero * incoming_zero,
                    incoming_one,
                    Some(*split_feature),
                );
                self.shap_recurse(
                    x,
                    phi,
                    cold,
                    path,
                    cold_zero * incoming_zero,
                    0.0,
                    Some(*split_feature),
                );
            }
        }
    }
}

fn best_split(ctx: &GrowContext<'_>, rows: &[usize], g: f64, h: f64) -> Option<SplitCandidate> {
    let params = ctx.params;
    let parent_score = g * g / (h + params.lambda);
    let mut best: Option<SplitCandidate> = None;

    for feature in 0..ctx.bins.num_features() {
        let num_bins = ctx.bins.num_bins(feature);
        if num_bins < 2 {
            continue;
        }
        let mut hist_g = vec![0.0; num_bins];
        let mut hist_h = vec![0.0; num_bins];
        let mut hist_n = vec![0usize; num_bins];
        let codes = &ctx.codes[feature];
        for &r in rows {
            let bin = codes[r] as usize;
            hist_g[bin] += ctx.grad[r];
            hist_h[bin] += ctx.hess[r];
            hist_n[bin] += 1;
        }

        let (mut gl, mut hl, mut nl) = (0.0, 0.0, 0usize);
        for bin in 0..num_bins - 1 {
            gl += hist_g[bin];
            hl += hist_h[bin];
            nl += hist_n[bin];
            let (gr, hr, nr) = (g - gl, h - hl, rows.len() - nl);
            if nl == 0 || nr == 0 || hl < params.min_child_weight || hr < params.min_child_weight {
                continue;
            }
            let gain = gl * gl / (hl + params.lambda) + gr * gr / (hr + params.lambda) - parent_score;
            if gain > 1e-12 && best.as_ref().map_or(true, |b| gain > b.gain) {
                best = Some(SplitCandidate { feature, bin, gain });
            }
        }
    }
    best
}

/// One feature's entry on the decision path being unwound
#[derive(Debug, Clone, Copy)]
struct PathElement {
    feature: Option<usize>,
    zero_fraction: f64,
    one_fraction: f64,
    weight: f64,
}

fn extend_path(path: &mut Vec<PathElement>, zero_fraction: f64, one_fraction: f64, feature: Option<usize>) {
    let depth = path.len();
    path.push(PathElement {
        feature,
        zero_fraction,
        one_fraction,
        weight: if depth == 0 { 1.0 } else { 0.0 },
    });
    let denom = (depth + 1) as f64;
    for i in (0..depth).rev() {
        path[i + 1].weight += one_fraction * path[i].weight * (i + 1) as f64 / denom;
        path[i].weight = zero_fraction * path[i].weight * (depth - i) as f64 / denom;
    }
}

fn unwind_path(path: &mut Vec<PathElement>, index: usize) {
    let depth = path.len() - 1;
    let one_fraction = path[index].one_fraction;
    let zero_fraction = path[index].zero_fraction;
    let denom = (depth + 1) as f64;
    let mut next_one_portion = path[depth].weight;

    for i in (0..depth).rev() {
        if one_fraction != 0.0 {
            let tmp = path[i].weight;
            path[i].weight = next_one_portion * denom / ((i + 1) as f64 * one_fraction);
            next_one_portion = tmp - path[i].weight * zero_fraction * (depth - i) as f64 / denom;
        } else {
            path[i].weight = path[i].weight * denom / (zero_fraction * (depth - i) as f64);
        }
    }

    for i in index..depth {
        path[i].feature = path[i + 1].feature;
        path[i].zero_fraction = path[i + 1].zero_fraction;
        path[i].one_fraction = path[i + 1].one_fraction;
    }
    path.pop();
}

fn unwound_path_sum(path: &[PathElement], index: usize) -> f64 {
    let depth = path.len() - 1;
    let one_fraction = path[index].one_fraction;
    let zero_fraction = path[index].zero_fraction;
    let denom = (depth + 1) as f64;
    let mut next_one_portion = path[depth].weight;
    let mut total = 0.0;

    for i in (0..depth).rev() {
        if one_fraction != 0.0 {
            let tmp = next_one_portion * denom / ((i + 1) as f64 * one_fraction);
            total += tmp;
            next_one_portion = path[i].weight - tmp * zero_fraction * (depth - i) as f64 / denom;
        } else if zero_fraction != 0.0 {
            total += path[i].weight / zero_fraction / ((depth - i) as f64 / denom);
        }
    }
    total
}
