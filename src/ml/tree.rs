use ndarray::{ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};

/// Learning task of a tree: class-distribution leaves or scalar leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TreeTask {
    Classification { n_classes: usize },
    Regression,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeParams {
    pub task: TreeTask,
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Number of features examined per split; `None` means all.
    pub max_features: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Node {
    Leaf {
        /// Class distribution for classification, single-element mean for
        /// regression.
        value: Vec<f64>,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

/// CART decision tree with weighted samples. Gini impurity for
/// classification, variance for regression.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTree {
    pub params: TreeParams,
    root: Node,
    /// Impurity-decrease importance per feature, unnormalized.
    pub feature_importance: Vec<f64>,
}

struct SplitCandidate {
    feature: usize,
    threshold: f64,
    impurity_decrease: f64,
    left: Vec<usize>,
    right: Vec<usize>,
}

impl DecisionTree {
    pub fn fit(
        x: ArrayView2<'_, f64>,
        y: ArrayView1<'_, f64>,
        weights: ArrayView1<'_, f64>,
        params: TreeParams,
        rng: &mut impl rand::Rng,
    ) -> Self {
        let n_features = x.ncols();
        let mut feature_importance = vec![0.0; n_features];
        let indices: Vec<usize> = (0..x.nrows()).collect();
        let total_weight: f64 = indices.iter().map(|&i| weights[i]).sum();
        let root = grow(
            x,
            y,
            weights,
            &params,
            &indices,
            0,
            total_weight.max(f64::MIN_POSITIVE),
            &mut feature_importance,
            rng,
        );
        Self { params, root, feature_importance }
    }

    /// Leaf value for one sample: class distribution or `[mean]`.
    pub fn predict_row(&self, row: ArrayView1<'_, f64>) -> &[f64] {
        let mut node = &self.root;
        loop {
            match node {
                Node::Leaf { value } => return value,
                Node::Split { feature, threshold, left, right } => {
                    node = if row[*feature] <= *threshold { left } else { right };
                }
            }
        }
    }
}

fn leaf_value(
    y: ArrayView1<'_, f64>,
    weights: ArrayView1<'_, f64>,
    indices: &[usize],
    task: TreeTask,
) -> Vec<f64> {
    match task {
        TreeTask::Classification { n_classes } => {
            let mut counts = vec![0.0; n_classes];
            let mut total = 0.0;
            for &i in indices {
                let class = (y[i] as usize).min(n_classes - 1);
                counts[class] += weights[i];
                total += weights[i];
            }
            if total > 0.0 {
                for count in &mut counts {
                    *count /= total;
                }
            }
            counts
        }
        TreeTask::Regression => {
            let total: f64 = indices.iter().map(|&i| weights[i]).sum();
            if total == 0.0 {
                return vec![0.0];
            }
            let mean = indices.iter().map(|&i| y[i] * weights[i]).sum::<f64>() / total;
            vec![mean]
        }
    }
}

/// Weighted node impurity: gini for classification, variance for
/// regression.
fn impurity(
    y: ArrayView1<'_, f64>,
    weights: ArrayView1<'_, f64>,
    indices: &[usize],
    task: TreeTask,
) -> f64 {
    let total: f64 = indices.iter().map(|&i| weights[i]).sum();
    if total == 0.0 {
        return 0.0;
    }
    match task {
        TreeTask::Classification { n_classes } => {
            let mut counts = vec![0.0; n_classes];
            for &i in indices {
                counts[(y[i] as usize).min(n_classes - 1)] += weights[i];
            }
            1.0 - counts.iter().map(|c| (c / total).powi(2)).sum::<f64>()
        }
        TreeTask::Regression => {
            let mean = indices.iter().map(|&i| y[i] * weights[i]).sum::<f64>() / total;
            indices
                .iter()
                .map(|&i| weights[i] * (y[i] - mean).powi(2))
                .sum::<f64>()
                / total
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn grow(
    x: ArrayView2<'_, f64>,
    y: ArrayView1<'_, f64>,
    weights: ArrayView1<'_, f64>,
    params: &TreeParams,
    indices: &[usize],
    depth: usize,
    root_weight: f64,
    feature_importance: &mut [f64],
    rng: &mut impl rand::Rng,
) -> Node {
    let node_impurity = impurity(y, weights, indices, params.task);
    let should_stop = depth >= params.max_depth
        || indices.len() < params.min_samples_split
        || node_impurity <= 1e-12;
    if should_stop {
        return Node::Leaf { value: leaf_value(y, weights, indices, params.task) };
    }

    let Some(split) = best_split(x, y, weights, params, indices, node_impurity, rng) else {
        return Node::Leaf { value: leaf_value(y, weights, indices, params.task) };
    };

    let node_weight: f64 = indices.iter().map(|&i| weights[i]).sum();
    feature_importance[split.feature] +=
        split.impurity_decrease * node_weight / root_weight;

    let left = grow(
        x,
        y,
        weights,
        params,
        &split.left,
        depth + 1,
        root_weight,
        feature_importance,
        rng,
    );
    let right = grow(
        x,
        y,
        weights,
        params,
        &split.right,
        depth + 1,
        root_weight,
        feature_importance,
        rng,
    );

    Node::Split {
        feature: split.feature,
        threshold: split.threshold,
        left: Box::new(left),
        right: Box::new(right),
    }
}

fn best_split(
    x: ArrayView2<'_, f64>,
    y: ArrayView1<'_, f64>,
    weights: ArrayView1<'_, f64>,
    params: &TreeParams,
    indices: &[usize],
    node_impurity: f64,
    rng: &mut impl rand::Rng,
) -> Option<SplitCandidate> {
    let n_features = x.ncols();
    let mut candidate_features: Vec<usize> = (0..n_features).collect();
    if let Some(max_features) = params.max_features {
        // Fisher-Yates prefix shuffle to sample without replacement.
        let take = max_features.min(n_features);
        for i in 0..take {
            let j = rng.random_range(i..n_features);
            candidate_features.swap(i, j);
        }
        candidate_features.truncate(take);
    }

    let total_weight: f64 = indices.iter().map(|&i| weights[i]).sum();
    let mut best: Option<SplitCandidate> = None;

    for &feature in &candidate_features {
        let mut sorted: Vec<usize> = indices.to_vec();
        sorted.sort_by(|&a, &b| {
            x[(a, feature)]
                .partial_cmp(&x[(b, feature)])
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        for split_at in params.min_samples_leaf..=sorted.len().saturating_sub(params.min_samples_leaf)
        {
            if split_at == 0 || split_at == sorted.len() {
                continue;
            }
            let lo = x[(sorted[split_at - 1], feature)];
            let hi = x[(sorted[split_at], feature)];
            if hi <= lo {
                continue;
            }
            let threshold = (lo + hi) / 2.0;

            let (left, right) = sorted.split_at(split_at);
            let left_weight: f64 = left.iter().map(|&i| weights[i]).sum();
            let right_weight: f64 = right.iter().map(|&i| weights[i]).sum();
            if left_weight == 0.0 || right_weight == 0.0 {
                continue;
            }

            let left_impurity = impurity(y, weights, left, params.task);
            let right_impurity = impurity(y, weights, right, params.task);
            let weighted_child_impurity = (left_weight * left_impurity
                + right_weight * right_impurity)
                / total_weight;
            let decrease = node_impurity - weighted_child_impurity;

            if decrease > 1e-12
                && best
                    .as_ref()
                    .map(|b| decrease > b.impurity_decrease)
                    .unwrap_or(true)
            {
                best = Some(SplitCandidate {
                    feature,
                    threshold,
                    impurity_decrease: decrease,
                    left: left.to_vec(),
                    right: right.to_vec(),
                });
            }
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array1, Array2, array};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn classification_params() -> TreeParams {
        TreeParams {
            task: TreeTask::Classification { n_classes: 2 },
            max_depth: 5,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: None,
        }
    }

    #[test]
    fn test_tree_separates_trivial_classes() {
        let x = array![[0.0], [0.1], [0.2], [5.0], [5.1], [5.2]];
        let y = array![0.0, 0.0, 0.0, 1.0, 1.0, 1.0];
        let w = Array1::ones(6);
        let mut rng = StdRng::seed_from_u64(42);

        let tree = DecisionTree::fit(x.view(), y.view(), w.view(), classification_params(), &mut rng);

        let low = tree.predict_row(array![0.05].view());
        assert!(low[0] > 0.9);
        let high = tree.predict_row(array![5.05].view());
        assert!(high[1] > 0.9);
    }

    #[test]
    fn test_regression_tree_predicts_means() {
        let x = array![[1.0], [2.0], [3.0], [10.0], [11.0], [12.0]];
        let y = array![5.0, 5.0, 5.0, 50.0, 50.0, 50.0];
        let w = Array1::ones(6);
        let params = TreeParams {
            task: TreeTask::Regression,
            max_depth: 4,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: None,
        };
        let mut rng = StdRng::seed_from_u64(42);
        let tree = DecisionTree::fit(x.view(), y.view(), w.view(), params, &mut rng);

        assert!((tree.predict_row(array![2.0].view())[0] - 5.0).abs() < 1e-9);
        assert!((tree.predict_row(array![11.0].view())[0] - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_sample_weights_shift_leaf_distribution() {
        let x = array![[0.0], [0.0], [0.0]];
        let y = array![0.0, 1.0, 1.0];
        // Heavy weight on class 0 dominates the (pure-leaf) distribution.
        let w = array![10.0, 1.0, 1.0];
        let mut rng = StdRng::seed_from_u64(42);
        let tree = DecisionTree::fit(x.view(), y.view(), w.view(), classification_params(), &mut rng);

        let dist = tree.predict_row(array![0.0].view());
        assert!(dist[0] > dist[1]);
    }

    #[test]
    fn test_importance_credits_informative_feature() {
        // Feature 1 is pure noise; feature 0 fully determines the label.
        let x = Array2::from_shape_fn((40, 2), |(i, j)| {
            if j == 0 {
                if i < 20 { 0.0 } else { 1.0 }
            } else {
                (i % 7) as f64
            }
        });
        let y = Array1::from_shape_fn(40, |i| if i < 20 { 0.0 } else { 1.0 });
        let w = Array1::ones(40);
        let mut rng = StdRng::seed_from_u64(42);
        let tree = DecisionTree::fit(x.view(), y.view(), w.view(), classification_params(), &mut rng);

        assert!(tree.feature_importance[0] > tree.feature_importance[1]);
    }
}
