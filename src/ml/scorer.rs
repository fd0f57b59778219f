// ============================================================
// Layer 5 — Patch Scoring
// ============================================================
// Turns raw model output for a batch of patches into:
//
//   • a loss to optimise          (cross entropy / L2)
//   • per-batch metrics           (loss, accuracy, map_mse_range11)
//   • per-pixel anomaly scores    [N, 1, mask_h, mask_w]
//
// Anomaly scores are oriented so that larger means more
// anomalous:
//
//   absolute-distance   mean over channels of |prediction - target|
//   likelihood          -log p(target intensity), summed over channels

use std::collections::HashMap;

use burn::{
    nn::loss::{CrossEntropyLossConfig, MseLoss, Reduction},
    prelude::*,
    tensor::activation::log_softmax,
};

use crate::domain::settings::{AnomalyMeasure, Metric, Task};
use crate::ml::model::{class_logits, INTENSITY_CLASSES};

/// Per-pixel anomaly scores for a batch, [N, 1, h, w].
pub fn anomaly_scores<B: Backend>(
    measure:        AnomalyMeasure,
    output:         Tensor<B, 4>,
    targets:        Tensor<B, 4>,
    target_classes: Tensor<B, 4, Int>,
) -> Tensor<B, 4> {
    match measure {
        AnomalyMeasure::AbsoluteDistance => (output - targets).abs().mean_dim(1),
        AnomalyMeasure::Likelihood => {
            let [n, c, h, w] = target_classes.dims();
            let log_probs = log_softmax(class_logits(output, c), 1);
            let classes   = target_classes.reshape([n * c * h * w, 1]);
            log_probs
                .gather(1, classes)
                .neg()
                .reshape([n, c, h, w])
                .sum_dim(1)
        }
    }
}

/// Training loss for one batch.
pub fn batch_loss<B: Backend>(
    task:           Task,
    output:         Tensor<B, 4>,
    targets:        Tensor<B, 4>,
    target_classes: Tensor<B, 4, Int>,
) -> Tensor<B, 1> {
    match task {
        Task::Classification { .. } => {
            let [n, c, h, w] = target_classes.dims();
            let logits = class_logits(output, c);
            CrossEntropyLossConfig::new()
                .init(&logits.device())
                .forward(logits, target_classes.reshape([n * c * h * w]))
        }
        Task::Regression { .. } => MseLoss::new().forward(output, targets, Reduction::Mean),
    }
}

/// Every metric the task reports for one batch, given its loss value.
pub fn batch_metrics<B: Backend>(
    task:           Task,
    loss:           f64,
    output:         Tensor<B, 4>,
    target_classes: Tensor<B, 4, Int>,
) -> Vec<(Metric, f64)> {
    let mut values = vec![(Metric::Loss, loss)];
    if let Task::Classification { .. } = task {
        let [n, c, h, w] = target_classes.dims();
        let predicted = class_logits(output, c).argmax(1).reshape([n * c * h * w]);
        let expected  = target_classes.reshape([n * c * h * w]);

        let accuracy: f64 = predicted
            .clone()
            .equal(expected.clone())
            .float()
            .mean()
            .into_scalar()
            .elem::<f64>();

        let to_range11 = |t: Tensor<B, 1, Int>| {
            t.float().div_scalar((INTENSITY_CLASSES - 1) as f64).sub_scalar(0.5).div_scalar(0.5)
        };
        let mse: f64 = (to_range11(predicted) - to_range11(expected))
            .powf_scalar(2.0)
            .mean()
            .into_scalar()
            .elem::<f64>();

        values.push((Metric::Accuracy, accuracy));
        values.push((Metric::MapMseRange11, mse));
    }
    values
}

/// Running per-batch averages of metric values over one split.
#[derive(Debug, Default, Clone)]
pub struct MetricTotals {
    sums:    HashMap<Metric, f64>,
    batches: usize,
}

impl MetricTotals {
    pub fn add(&mut self, values: &[(Metric, f64)]) {
        for &(metric, value) in values {
            *self.sums.entry(metric).or_insert(0.0) += value;
        }
        self.batches += 1;
    }

    pub fn batches(&self) -> usize {
        self.batches
    }

    /// Mean of a metric over all batches seen, or None if nothing was added.
    pub fn mean(&self, metric: Metric) -> Option<f64> {
        if self.batches == 0 {
            return None;
        }
        self.sums.get(&metric).map(|sum| sum / self.batches as f64)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::settings::{ClassificationLoss, RegressionLoss};
    use burn::backend::NdArray;
    use burn::tensor::TensorData;

    type TestBackend = NdArray<f32>;

    const CLASSIFICATION: Task = Task::Classification { loss: ClassificationLoss::CrossEntropy };
    const REGRESSION: Task = Task::Regression { loss: RegressionLoss::L2 };

    fn tensor4(values: Vec<f32>, shape: [usize; 4]) -> Tensor<TestBackend, 4> {
        Tensor::from_data(TensorData::new(values, shape), &Default::default())
    }

    fn classes(values: Vec<i64>, shape: [usize; 4]) -> Tensor<TestBackend, 4, Int> {
        Tensor::from_data(TensorData::new(values, shape), &Default::default())
    }

    /// Logits for a single pixel of one channel, peaked at `hot`.
    fn peaked_logits(hot: usize) -> Vec<f32> {
        (0..INTENSITY_CLASSES).map(|k| if k == hot { 20.0 } else { 0.0 }).collect()
    }

    #[test]
    fn test_absolute_distance_is_channel_mean() {
        // 2 channels, 1x2 pixels
        let output  = tensor4(vec![0.5, 0.0, -0.5, 1.0], [1, 2, 1, 2]);
        let targets = tensor4(vec![0.0, 0.0,  0.5, 0.0], [1, 2, 1, 2]);
        let dummy   = classes(vec![0; 4], [1, 2, 1, 2]);

        let scores = anomaly_scores(AnomalyMeasure::AbsoluteDistance, output, targets, dummy);
        assert_eq!(scores.dims(), [1, 1, 1, 2]);
        let values = scores.into_data().to_vec::<f32>().unwrap();
        assert!((values[0] - 0.75).abs() < 1e-6);
        assert!((values[1] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_likelihood_prefers_expected_intensity() {
        // two pixels: one predicted correctly, one predicted wrong
        let mut logits = vec![0.0f32; 2 * INTENSITY_CLASSES];
        for (k, v) in peaked_logits(12).into_iter().enumerate() {
            logits[k * 2] = v;
        }
        for (k, v) in peaked_logits(200).into_iter().enumerate() {
            logits[k * 2 + 1] = v;
        }
        let output  = tensor4(logits, [1, INTENSITY_CLASSES, 1, 2]);
        let targets = tensor4(vec![0.0; 2], [1, 1, 1, 2]);
        let target  = classes(vec![12, 12], [1, 1, 1, 2]);

        let scores = anomaly_scores(AnomalyMeasure::Likelihood, output, targets, target);
        assert_eq!(scores.dims(), [1, 1, 1, 2]);
        let values = scores.into_data().to_vec::<f32>().unwrap();
        assert!(values[0] >= 0.0);
        assert!(values[0] < 0.01);
        assert!(values[1] > 5.0);
    }

    #[test]
    fn test_regression_loss_and_metrics() {
        let output  = tensor4(vec![1.0, 0.0], [1, 1, 1, 2]);
        let targets = tensor4(vec![0.0, 0.0], [1, 1, 1, 2]);
        let dummy   = classes(vec![0, 0], [1, 1, 1, 2]);

        let loss: f64 = batch_loss(REGRESSION, output.clone(), targets, dummy.clone())
            .into_scalar()
            .elem::<f64>();
        assert!((loss - 0.5).abs() < 1e-6);

        let metrics = batch_metrics(REGRESSION, loss, output, dummy);
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].0, Metric::Loss);
    }

    #[test]
    fn test_classification_metrics() {
        let output  = tensor4(peaked_logits(255), [1, INTENSITY_CLASSES, 1, 1]);
        let targets = tensor4(vec![0.0], [1, 1, 1, 1]);

        let hit  = classes(vec![255], [1, 1, 1, 1]);
        let loss: f64 = batch_loss(CLASSIFICATION, output.clone(), targets, hit.clone())
            .into_scalar()
            .elem::<f64>();
        assert!(loss < 0.01);
        let metrics: HashMap<Metric, f64> =
            batch_metrics(CLASSIFICATION, loss, output.clone(), hit).into_iter().collect();
        assert_eq!(metrics[&Metric::Accuracy], 1.0);
        assert!(metrics[&Metric::MapMseRange11].abs() < 1e-9);

        // predicted 255 (→ 1.0) vs. target 0 (→ -1.0): squared error 4
        let miss = classes(vec![0], [1, 1, 1, 1]);
        let metrics: HashMap<Metric, f64> =
            batch_metrics(CLASSIFICATION, 0.0, output, miss).into_iter().collect();
        assert_eq!(metrics[&Metric::Accuracy], 0.0);
        assert!((metrics[&Metric::MapMseRange11] - 4.0).abs() < 1e-6);
    }

    #[test]
    fn test_metric_totals_average_batches() {
        let mut totals = MetricTotals::default();
        assert_eq!(totals.mean(Metric::Loss), None);
        totals.add(&[(Metric::Loss, 1.0)]);
        totals.add(&[(Metric::Loss, 3.0)]);
        assert_eq!(totals.batches(), 2);
        assert_eq!(totals.mean(Metric::Loss), Some(2.0));
        assert_eq!(totals.mean(Metric::Accuracy), None);
    }
}
