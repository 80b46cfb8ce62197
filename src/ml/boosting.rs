use ndarray::{Array1, ArrayView1, ArrayView2};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use super::features::FEATURE_COUNT;
use super::tree::{DecisionTree, TreeParams, TreeTask};

const SEED: u64 = 42;

/// Least-squares gradient-boosting regressor: each stage fits a shallow
/// regression tree to the current residuals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradientBoostingRegressor {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    init: f64,
    trees: Vec<DecisionTree>,
}

impl Default for GradientBoostingRegressor {
    fn default() -> Self {
        Self::new()
    }
}

impl GradientBoostingRegressor {
    pub fn new() -> Self {
        Self {
            n_estimators: 100,
            learning_rate: 0.1,
            max_depth: 6,
            init: 0.0,
            trees: Vec::new(),
        }
    }

    pub fn is_trained(&self) -> bool {
        !self.trees.is_empty()
    }

    pub fn fit(
        &mut self,
        x: ArrayView2<'_, f64>,
        y: ArrayView1<'_, f64>,
        weights: ArrayView1<'_, f64>,
    ) {
        let n = x.nrows();
        let total_weight: f64 = weights.iter().sum();
        self.init = if total_weight > 0.0 {
            y.iter().zip(weights.iter()).map(|(y, w)| y * w).sum::<f64>() / total_weight
        } else {
            0.0
        };

        let mut rng = StdRng::seed_from_u64(SEED);
        let mut predictions = Array1::from_elem(n, self.init);
        self.trees.clear();

        for _ in 0..self.n_estimators {
            let residuals =
                Array1::from_shape_fn(n, |i| y[i] - predictions[i]);

            let params = TreeParams {
                task: TreeTask::Regression,
                max_depth: self.max_depth,
                min_samples_split: 2,
                min_samples_leaf: 1,
                max_features: None,
            };
            let tree = DecisionTree::fit(x, residuals.view(), weights, params, &mut rng);

            for i in 0..n {
                predictions[i] += self.learning_rate * tree.predict_row(x.row(i))[0];
            }
            self.trees.push(tree);
        }
    }

    pub fn predict(&self, row: ArrayView1<'_, f64>) -> f64 {
        let mut prediction = self.init;
        for tree in &self.trees {
            prediction += self.learning_rate * tree.predict_row(row)[0];
        }
        prediction
    }

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

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn test_boosting_fits_linear_target() {
        let n = 50;
        let x = Array2::from_shape_fn((n, FEATURE_COUNT), |(i, j)| {
            if j == 0 { i as f64 } else { 0.0 }
        });
        let y = Array1::from_shape_fn(n, |i| 2.0 * i as f64);
        let w = Array1::ones(n);

        let mut model = GradientBoostingRegressor::new();
        model.fit(x.view(), y.view(), w.view());
        assert!(model.is_trained());

        let mut row = [0.0; FEATURE_COUNT];
        row[0] = 25.0;
        let prediction = model.predict(ArrayView1::from(&row));
        assert!((prediction - 50.0).abs() < 5.0);
    }

    #[test]
    fn test_untrained_predicts_zero() {
        let model = GradientBoostingRegressor::new();
        let row = [0.0; FEATURE_COUNT];
        assert_eq!(model.predict(ArrayView1::from(&row)), 0.0);
        assert!(!model.is_trained());
    }

    #[test]
    fn test_weighted_samples_pull_the_mean() {
        let x = Array2::zeros((4, FEATURE_COUNT));
        let y = ndarray::array![0.0, 0.0, 100.0, 100.0];
        let w = ndarray::array![1.0, 1.0, 9.0, 9.0];

        let mut model = GradientBoostingRegressor::new();
        model.fit(x.view(), y.view(), w.view());

        let row = [0.0; FEATURE_COUNT];
        let prediction = model.predict(ArrayView1::from(&row));
        assert!(prediction > 80.0);
    }
}
