//! Tree-based regressors and the trained model bundle.
//!
//! Both ensemble members are built from the same CART regression tree:
//! - [`RandomForest`] (ModelA): bootstrap-bagged deep trees, averaged
//! - [`GradientBoosting`] (ModelB): shallow trees fit to residuals in sequence
//!
//! A [`ModelBundle`] holds one of each. It is produced by training, written to
//! disk as JSON, and only ever read during a forecast run.

use crate::artifact::replace_atomically;
use crate::config::{BoostingParams, ForestParams};
use crate::error::{ForecastError, Result};
use crate::features::{FEATURE_COUNT, FEATURE_NAMES};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use tracing::info;

/// One row of model input.
pub type Features = [f64; FEATURE_COUNT];

/// A fitted model mapping a feature row to an expected nightly nest count.
pub trait Regressor: Send + Sync + fmt::Debug {
    fn predict(&self, features: &Features) -> f64;
}

/// Nodes with fewer samples than this become leaves.
const MIN_SAMPLES_SPLIT: usize = 2;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// CART regression tree with squared-error splits.
///
/// Rows with `x[feature] <= threshold` go left. Nodes live in a flat vector
/// with the root at index 0.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    nodes: Vec<Node>,
}

struct SplitCandidate {
    feature: usize,
    threshold: f64,
    score: f64,
}

impl RegressionTree {
    /// Fit on the rows named by `indices` (repeats allowed, as in a bootstrap sample).
    pub fn fit(x: &[Features], y: &[f64], indices: &[usize], max_depth: usize) -> Self {
        let mut tree = RegressionTree { nodes: Vec::new() };
        let mut idx = indices.to_vec();
        tree.grow(x, y, &mut idx, 0, max_depth);
        tree
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], at: usize) -> usize {
            match nodes[at] {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => 1 + walk(nodes, left).max(walk(nodes, right)),
            }
        }
        if self.nodes.is_empty() {
            0
        } else {
            walk(&self.nodes, 0)
        }
    }

    fn grow(
        &mut self,
        x: &[Features],
        y: &[f64],
        idx: &mut [usize],
        depth: usize,
        max_depth: usize,
    ) -> usize {
        let slot = self.nodes.len();
        self.nodes.push(Node::Leaf {
            value: mean(idx.iter().map(|&i| y[i])),
        });

        if depth >= max_depth || idx.len() < MIN_SAMPLES_SPLIT {
            return slot;
        }
        let Some(split) = best_split(x, y, idx) else {
            return slot;
        };

        let mut mid = 0;
        for k in 0..idx.len() {
            if x[idx[k]][split.feature] <= split.threshold {
                idx.swap(mid, k);
                mid += 1;
            }
        }
        let (left_idx, right_idx) = idx.split_at_mut(mid);
        let left = self.grow(x, y, left_idx, depth + 1, max_depth);
        let right = self.grow(x, y, right_idx, depth + 1, max_depth);

        self.nodes[slot] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };
        slot
    }
}

impl Regressor for RegressionTree {
    fn predict(&self, features: &Features) -> f64 {
        let mut at = 0;
        loop {
            match self.nodes.get(at) {
                Some(Node::Leaf { value }) => return *value,
                Some(Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                }) => {
                    at = if features[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
                None => return 0.0,
            }
        }
    }
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        0.0
    } else {
        sum / n as f64
    }
}

/// Best squared-error split over all features, or `None` if nothing beats
/// leaving the node whole.
///
/// Maximizing `sum_l²/n_l + sum_r²/n_r` is equivalent to minimizing the
/// children's total squared error.
fn best_split(x: &[Features], y: &[f64], idx: &[usize]) -> Option<SplitCandidate> {
    let n = idx.len();
    let total: f64 = idx.iter().map(|&i| y[i]).sum();
    let parent_score = total * total / n as f64;
    let mut best: Option<SplitCandidate> = None;
    let mut column: Vec<(f64, f64)> = Vec::with_capacity(n);

    for feature in 0..FEATURE_COUNT {
        column.clear();
        column.extend(idx.iter().map(|&i| (x[i][feature], y[i])));
        column.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut left_sum = 0.0;
        for k in 1..n {
            left_sum += column[k - 1].1;
            let (lo, hi) = (column[k - 1].0, column[k].0);
            if lo == hi {
                continue;
            }
            let right_sum = total - left_sum;
            let score = left_sum * left_sum / k as f64 + right_sum * right_sum / (n - k) as f64;
            let beats_best = best.as_ref().map_or(true, |b| score > b.score + 1e-12);
            if score > parent_score + 1e-12 && beats_best {
                // Adjacent floats can have a midpoint equal to `hi`
                let midpoint = lo + (hi - lo) / 2.0;
                let threshold = if midpoint < hi { midpoint } else { lo };
                best = Some(SplitCandidate {
                    feature,
                    threshold,
                    score,
                });
            }
        }
    }
    best
}

/// SplitMix64: small, seedable and reproducible across platforms.
#[derive(Clone, Debug)]
struct SplitMix64(u64);

impl SplitMix64 {
    fn next_u64(&mut self) -> u64 {
        self.0 = self.0.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = self.0;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }

    fn below(&mut self, n: usize) -> usize {
        (self.next_u64() % n as u64) as usize
    }
}

/// Bagged regression trees; prediction is the mean over trees.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    trees: Vec<RegressionTree>,
}

impl RandomForest {
    pub fn fit(x: &[Features], y: &[f64], params: &ForestParams) -> Self {
        let n = x.len();
        let mut rng = SplitMix64(params.seed);
        let trees = (0..params.n_trees.max(1))
            .map(|_| {
                let sample: Vec<usize> = if n == 0 {
                    Vec::new()
                } else {
                    (0..n).map(|_| rng.below(n)).collect()
                };
                RegressionTree::fit(x, y, &sample, params.max_depth)
            })
            .collect();
        RandomForest { trees }
    }

    pub fn len(&self) -> usize {
        self.trees.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trees.is_empty()
    }
}

impl Regressor for RandomForest {
    fn predict(&self, features: &Features) -> f64 {
        mean(self.trees.iter().map(|t| t.predict(features)))
    }
}

/// Least-squares gradient boosting over shallow trees.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GradientBoosting {
    init: f64,
    learning_rate: f64,
    stages: Vec<RegressionTree>,
}

impl GradientBoosting {
    pub fn fit(x: &[Features], y: &[f64], params: &BoostingParams) -> Self {
        let init = mean(y.iter().copied());
        let all: Vec<usize> = (0..x.len()).collect();
        let mut current = vec![init; y.len()];
        let mut residuals = vec![0.0; y.len()];
        let mut stages = Vec::with_capacity(params.n_stages);

        for _ in 0..params.n_stages {
            for (r, (target, fitted)) in residuals.iter_mut().zip(y.iter().zip(&current)) {
                *r = target - fitted;
            }
            let tree = RegressionTree::fit(x, &residuals, &all, params.max_depth);
            for (fitted, row) in current.iter_mut().zip(x) {
                *fitted += params.learning_rate * tree.predict(row);
            }
            stages.push(tree);
        }

        GradientBoosting {
            init,
            learning_rate: params.learning_rate,
            stages,
        }
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

impl Regressor for GradientBoosting {
    fn predict(&self, features: &Features) -> f64 {
        self.init
            + self.learning_rate
                * self
                    .stages
                    .iter()
                    .map(|t| t.predict(features))
                    .sum::<f64>()
    }
}

/// Provenance of a trained bundle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BundleMetadata {
    pub trained_at: DateTime<Utc>,
    pub training_rows: usize,
    pub feature_names: Vec<String>,
}

/// Both trained ensemble members. Immutable once built.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelBundle {
    pub model_a: RandomForest,
    pub model_b: GradientBoosting,
    pub metadata: BundleMetadata,
}

impl ModelBundle {
    pub fn new(model_a: RandomForest, model_b: GradientBoosting, training_rows: usize) -> Self {
        ModelBundle {
            model_a,
            model_b,
            metadata: BundleMetadata {
                trained_at: Utc::now(),
                training_rows,
                feature_names: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
            },
        }
    }

    /// Write the bundle as JSON, replacing any previous bundle in one step.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        replace_atomically(path.as_ref(), |file| {
            let mut writer = BufWriter::new(file);
            serde_json::to_writer(&mut writer, self)?;
            writer.flush()?;
            Ok(())
        })?;
        info!(path = %path.as_ref().display(), rows = self.metadata.training_rows, "Model bundle saved");
        Ok(())
    }

    /// Load a bundle written by [`ModelBundle::save`].
    ///
    /// # Errors
    /// [`ForecastError::ModelNotTrained`] when no bundle exists at `path`;
    /// [`ForecastError::InvalidConfig`] when it was trained on other features.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = match std::fs::File::open(path.as_ref()) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ForecastError::ModelNotTrained)
            }
            Err(e) => return Err(e.into()),
        };
        let bundle: ModelBundle = serde_json::from_reader(BufReader::new(file))?;
        if bundle.metadata.feature_names != FEATURE_NAMES {
            return Err(ForecastError::InvalidConfig(format!(
                "model bundle features {:?} do not match {:?}",
                bundle.metadata.feature_names, FEATURE_NAMES
            )));
        }
        Ok(bundle)
    }
}
