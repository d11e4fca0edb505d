//! Isolation Forest outlier scoring.
//!
//! Outliers need fewer random splits to be isolated, so they sit at shallow
//! depths across the ensemble. Scores follow the decision-function convention:
//! `decision = -2^(-E[h(x)] / c(psi)) - offset`, where `offset` is fitted so
//! that roughly `contamination` of the training rows score below zero.
//! Negative means outlier; more negative means more anomalous.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

#[derive(Debug, Clone)]
pub struct ForestParams {
    pub n_estimators: usize,
    /// Sub-sample size per tree, capped at the training set size.
    pub max_samples: usize,
    pub contamination: f64,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_samples: 256,
            contamination: 0.1,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum IsolationNode {
    Split {
        feature: usize,
        threshold: f64,
        left: Box<IsolationNode>,
        right: Box<IsolationNode>,
    },
    Leaf {
        size: usize,
    },
}

impl IsolationNode {
    fn build(rows: &[&[f64]], depth: usize, max_depth: usize, rng: &mut StdRng) -> Self {
        if depth >= max_depth || rows.len() <= 1 {
            return IsolationNode::Leaf { size: rows.len() };
        }

        let width = rows[0].len();
        let ranges: Vec<(usize, f64, f64)> = (0..width)
            .filter_map(|f| {
                let (lo, hi) = rows.iter().fold((f64::MAX, f64::MIN), |(lo, hi), r| {
                    (lo.min(r[f]), hi.max(r[f]))
                });
                (hi > lo).then_some((f, lo, hi))
            })
            .collect();

        // every remaining row is identical
        if ranges.is_empty() {
            return IsolationNode::Leaf { size: rows.len() };
        }

        let (feature, lo, hi) = ranges[rng.gen_range(0..ranges.len())];
        let threshold = rng.gen_range(lo..hi);

        let (left, right): (Vec<&[f64]>, Vec<&[f64]>) =
            rows.iter().copied().partition(|r| r[feature] < threshold);
        if left.is_empty() || right.is_empty() {
            return IsolationNode::Leaf { size: rows.len() };
        }

        IsolationNode::Split {
            feature,
            threshold,
            left: Box::new(Self::build(&left, depth + 1, max_depth, rng)),
            right: Box::new(Self::build(&right, depth + 1, max_depth, rng)),
        }
    }

    fn path_length(&self, sample: &[f64]) -> f64 {
        let mut node = self;
        let mut depth = 0.0;
        loop {
            match node {
                IsolationNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if sample[*feature] < *threshold {
                        &**left
                    } else {
                        &**right
                    };
                    depth += 1.0;
                }
                IsolationNode::Leaf { size } => return depth + average_path_length(*size),
            }
        }
    }
}

/// Expected path length of an unsuccessful BST search over `n` points.
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

/// Linear-interpolated percentile, `q` in [0, 100]. `sorted` must be non-empty.
fn percentile(sorted: &[f64], q: f64) -> f64 {
    let rank = q / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsolationForest {
    trees: Vec<IsolationNode>,
    /// Effective sub-sample size, used to normalise path lengths.
    sample_size: usize,
    feature_count: usize,
    offset: f64,
    contamination: f64,
}

impl IsolationForest {
    pub fn fit(rows: &[Vec<f64>], params: &ForestParams) -> anyhow::Result<Self> {
        if rows.len() < 2 {
            anyhow::bail!("isolation forest needs at least 2 rows, got {}", rows.len());
        }
        if params.n_estimators == 0 {
            anyhow::bail!("isolation forest needs at least one tree");
        }
        if !(params.contamination > 0.0 && params.contamination <= 0.5) {
            anyhow::bail!("contamination must be in (0, 0.5], got {}", params.contamination);
        }
        let feature_count = rows[0].len();
        if rows.iter().any(|r| r.len() != feature_count) {
            anyhow::bail!("training rows have differing widths");
        }

        let sample_size = params.max_samples.min(rows.len()).max(2);
        let max_depth = (sample_size as f64).log2().ceil() as usize;
        let mut rng = StdRng::seed_from_u64(params.seed);

        let trees = (0..params.n_estimators)
            .map(|_| {
                let mut tree_rng = StdRng::seed_from_u64(rng.gen());
                let subsample: Vec<&[f64]> =
                    rand::seq::index::sample(&mut tree_rng, rows.len(), sample_size)
                        .into_iter()
                        .map(|i| rows[i].as_slice())
                        .collect();
                IsolationNode::build(&subsample, 0, max_depth, &mut tree_rng)
            })
            .collect();

        let mut forest = Self {
            trees,
            sample_size,
            feature_count,
            offset: 0.0,
            contamination: params.contamination,
        };

        let mut train_scores: Vec<f64> = rows.iter().map(|r| forest.score_sample(r)).collect();
        train_scores.sort_by(f64::total_cmp);
        forest.offset = percentile(&train_scores, params.contamination * 100.0);

        Ok(forest)
    }

    pub fn feature_count(&self) -> usize {
        self.feature_count
    }

    pub fn n_estimators(&self) -> usize {
        self.trees.len()
    }

    pub fn contamination(&self) -> f64 {
        self.contamination
    }

    /// Raw score in [-1, 0]; the opposite of the paper's anomaly score.
    pub fn score_sample(&self, sample: &[f64]) -> f64 {
        let mean_depth = self
            .trees
            .iter()
            .map(|t| t.path_length(sample))
            .sum::<f64>()
            / self.trees.len() as f64;
        -(2f64).powf(-mean_depth / average_path_length(self.sample_size))
    }

    /// Shifted score: below zero means outlier.
    pub fn decision_function(&self, sample: &[f64]) -> f64 {
        self.score_sample(sample) - self.offset
    }
}
