use ndarray::{Array1, ArrayView1, ArrayView2};
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use super::features::FEATURE_COUNT;
use super::tree::{DecisionTree, TreeParams, TreeTask};

pub const N_CLASSES: usize = 3;
const SEED: u64 = 42;

/// Random-forest classifier over the three lead classes. Bootstrap
/// sampling per tree, sqrt-feature subsets per split, seeded for
/// reproducible training runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForestClassifier {
    pub n_estimators: usize,
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    trees: Vec<DecisionTree>,
}

impl Default for RandomForestClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl RandomForestClassifier {
    pub fn new() -> Self {
        Self {
            n_estimators: 100,
            max_depth: 10,
            min_samples_split: 5,
            min_samples_leaf: 2,
            trees: Vec::new(),
        }
    }

    pub fn is_trained(&self) -> bool {
        !self.trees.is_empty()
    }

    /// Fits the forest on class labels (0 = low, 1 = medium, 2 = high)
    /// with per-sample weights.
    pub fn fit(
        &mut self,
        x: ArrayView2<'_, f64>,
        y: ArrayView1<'_, f64>,
        weights: ArrayView1<'_, f64>,
    ) {
        let n_samples = x.nrows();
        let max_features = (x.ncols() as f64).sqrt().ceil() as usize;
        let mut rng = StdRng::seed_from_u64(SEED);
        self.trees.clear();

        for _ in 0..self.n_estimators {
            // Bootstrap: sample n rows with replacement, folding the draw
            // multiplicity into the sample weight.
            let mut bootstrap_weights = Array1::zeros(n_samples);
            for _ in 0..n_samples {
                let i = rng.random_range(0..n_samples);
                bootstrap_weights[i] += weights[i];
            }

            let params = TreeParams {
                task: TreeTask::Classification { n_classes: N_CLASSES },
                max_depth: self.max_depth,
                min_samples_split: self.min_samples_split,
                min_samples_leaf: self.min_samples_leaf,
                max_features: Some(max_features),
            };
            self.trees
                .push(DecisionTree::fit(x, y, bootstrap_weights.view(), params, &mut rng));
        }
    }

    /// Mean class distribution across trees.
    pub fn predict_proba(&self, row: ArrayView1<'_, f64>) -> [f64; N_CLASSES] {
        let mut probs = [0.0; N_CLASSES];
        if self.trees.is_empty() {
            return probs;
        }
        for tree in &self.trees {
            let leaf = tree.predict_row(row);
            for (p, v) in probs.iter_mut().zip(leaf.iter()) {
                *p += v;
            }
        }
        for p in &mut probs {
            *p /= self.trees.len() as f64;
        }
        probs
    }

    /// Mean impurity-decrease importances, normalized to sum to 1.
    pub fn feature_importances(&self) -> [f64; FEATURE_COUNT] {
        let mut importances = [0.0; FEATURE_COUNT];
        for tree in &self.trees {
            for (acc, imp) in importances.iter_mut().zip(tree.feature_importance.iter()) {
                *acc += imp;
            }
        }
        let total: f64 = importances.iter().sum();
        if total > 0.0 {
            for imp in &mut importances {
                *imp /= total;
            }
        }
        importances
    }
}

/// Maps a 0-100 training score to its class label, matching the rubric
/// used when scores come back from feedback (scaled from [0, 1]).
pub fn score_to_class(score: f64) -> f64 {
    if score >= 80.0 {
        2.0
    } else if score >= 50.0 {
        1.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn training_fixture() -> (Array2<f64>, Array1<f64>, Array1<f64>) {
        // Synthetic but separable: feature 0 tracks the class band.
        let n = 60;
        let x = Array2::from_shape_fn((n, FEATURE_COUNT), |(i, j)| match j {
            0 => (i / 20) as f64 * 10.0 + (i % 20) as f64 * 0.1,
            1 => (i % 5) as f64,
            _ => 0.0,
        });
        let y = Array1::from_shape_fn(n, |i| (i / 20) as f64);
        let w = Array1::ones(n);
        (x, y, w)
    }

    #[test]
    fn test_untrained_forest_reports_untrained() {
        assert!(!RandomForestClassifier::new().is_trained());
    }

    #[test]
    fn test_forest_learns_separable_classes() {
        let (x, y, w) = training_fixture();
        let mut forest = RandomForestClassifier::new();
        forest.fit(x.view(), y.view(), w.view());
        assert!(forest.is_trained());

        let mut low_row = [0.0; FEATURE_COUNT];
        low_row[0] = 1.0;
        let probs = forest.predict_proba(ArrayView1::from(&low_row));
        assert!(probs[0] > probs[2]);

        let mut high_row = [0.0; FEATURE_COUNT];
        high_row[0] = 21.0;
        let probs = forest.predict_proba(ArrayView1::from(&high_row));
        assert!(probs[2] > probs[0]);
    }

    #[test]
    fn test_probabilities_sum_to_one() {
        let (x, y, w) = training_fixture();
        let mut forest = RandomForestClassifier::new();
        forest.fit(x.view(), y.view(), w.view());

        let mut row = [0.0; FEATURE_COUNT];
        row[0] = 11.0;
        let probs = forest.predict_proba(ArrayView1::from(&row));
        assert!((probs.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_training_is_reproducible() {
        let (x, y, w) = training_fixture();
        let mut a = RandomForestClassifier::new();
        a.fit(x.view(), y.view(), w.view());
        let mut b = RandomForestClassifier::new();
        b.fit(x.view(), y.view(), w.view());

        let mut row = [0.0; FEATURE_COUNT];
        row[0] = 15.0;
        assert_eq!(
            a.predict_proba(ArrayView1::from(&row)),
            b.predict_proba(ArrayView1::from(&row))
        );
    }

    #[test]
    fn test_score_to_class_bands() {
        assert_eq!(score_to_class(85.0), 2.0);
        assert_eq!(score_to_class(65.0), 1.0);
        assert_eq!(score_to_class(20.0), 0.0);
    }
}
