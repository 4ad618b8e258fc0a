//! Metrics Module for Segmentation Evaluation
//!
//! Implements the salt-challenge precision: masks are binarized, each image is
//! scored against IoU thresholds 0.50..=0.95 (step 0.05) and the per-image
//! precisions are averaged over the whole validation set.

use serde::{Deserialize, Serialize};

use crate::utils::error::{Result, SaltError};

/// Binarization threshold for predicted probabilities and ground truth
pub const BINARY_THRESHOLD: f32 = 0.5;

const IOU_EPSILON: f64 = 1e-9;

/// IoU thresholds 0.50, 0.55, ..., 0.95
pub fn iou_thresholds() -> [f64; 10] {
    let mut thresholds = [0.0; 10];
    for (i, t) in thresholds.iter_mut().enumerate() {
        *t = 0.5 + 0.05 * i as f64;
    }
    thresholds
}

/// Intersection-over-union of two binarized masks
///
/// Returns `(iou, truth_empty, prediction_empty)`.
pub fn binary_iou(prediction: &[f32], truth: &[f32], threshold: f32) -> (f64, bool, bool) {
    let mut intersection = 0usize;
    let mut union = 0usize;
    let mut pred_count = 0usize;
    let mut truth_count = 0usize;

    for (&p, &t) in prediction.iter().zip(truth) {
        let p = p > threshold;
        let t = t > threshold;
        pred_count += p as usize;
        truth_count += t as usize;
        intersection += (p && t) as usize;
        union += (p || t) as usize;
    }

    let iou = intersection as f64 / (union as f64 + IOU_EPSILON);
    (iou, truth_count == 0, pred_count == 0)
}

/// Precision of a single image averaged over all IoU thresholds
pub fn image_precision(prediction: &[f32], truth: &[f32], threshold: f32) -> f64 {
    let (iou, truth_empty, pred_empty) = binary_iou(prediction, truth, threshold);

    // Both empty counts as a hit at every threshold
    if truth_empty && pred_empty {
        return 1.0;
    }
    if truth_empty || pred_empty {
        return 0.0;
    }

    let thresholds = iou_thresholds();
    let hits = thresholds.iter().filter(|&&t| iou > t).count();
    hits as f64 / thresholds.len() as f64
}

/// Aggregate segmentation metrics over a validation set
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SegmentationMetrics {
    /// Number of images scored
    pub num_images: usize,
    /// Mean per-image precision (the validation accuracy)
    pub mean_precision: f64,
    /// Mean IoU over images whose truth mask is non-empty
    pub mean_iou_nonempty: f64,
    /// Images whose ground truth has no positive pixel
    pub empty_truths: usize,
    /// Empty-truth images where the prediction was also empty
    pub empty_correct: usize,
}

impl SegmentationMetrics {
    /// Score concatenated predictions against concatenated truths
    ///
    /// Both slices hold `num_images * pixels_per_image` values in image order.
    pub fn compute(
        predictions: &[f32],
        truths: &[f32],
        pixels_per_image: usize,
        threshold: f32,
    ) -> Result<Self> {
        if predictions.len() != truths.len() {
            return Err(SaltError::shape_mismatch(
                format!("{} truth values", truths.len()),
                format!("{} predicted values", predictions.len()),
            ));
        }
        if pixels_per_image == 0 || predictions.len() % pixels_per_image != 0 {
            return Err(SaltError::shape_mismatch(
                format!("a multiple of {} pixels", pixels_per_image),
                predictions.len(),
            ));
        }

        let mut metrics = Self::default();
        let mut precision_sum = 0.0;
        let mut iou_sum = 0.0;
        let mut nonempty = 0usize;

        for (pred, truth) in predictions
            .chunks(pixels_per_image)
            .zip(truths.chunks(pixels_per_image))
        {
            metrics.num_images += 1;
            precision_sum += image_precision(pred, truth, threshold);

            let (iou, truth_empty, pred_empty) = binary_iou(pred, truth, threshold);
            if truth_empty {
                metrics.empty_truths += 1;
                metrics.empty_correct += pred_empty as usize;
            } else {
                nonempty += 1;
                iou_sum += iou;
            }
        }

        if metrics.num_images > 0 {
            metrics.mean_precision = precision_sum / metrics.num_images as f64;
        }
        if nonempty > 0 {
            metrics.mean_iou_nonempty = iou_sum / nonempty as f64;
        }

        Ok(metrics)
    }
}

/// Mean salt precision of concatenated predictions (the validation accuracy)
pub fn salt_precision(
    predictions: &[f32],
    truths: &[f32],
    pixels_per_image: usize,
) -> Result<f64> {
    SegmentationMetrics::compute(predictions, truths, pixels_per_image, BINARY_THRESHOLD)
        .map(|m| m.mean_precision)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thresholds() {
        let t = iou_thresholds();
        assert!((t[0] - 0.5).abs() < 1e-12);
        assert!((t[9] - 0.95).abs() < 1e-12);
    }

    #[test]
    fn test_perfect_prediction() {
        let truth = [1.0, 1.0, 0.0, 0.0];
        let pred = [0.9, 0.8, 0.1, 0.2];
        assert!((image_precision(&pred, &truth, 0.5) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_both_empty_scores_one() {
        let truth = [0.0; 4];
        let pred = [0.1, 0.2, 0.3, 0.4];
        assert_eq!(image_precision(&pred, &truth, 0.5), 1.0);
    }

    #[test]
    fn test_false_positive_on_empty_truth() {
        let truth = [0.0; 4];
        let pred = [0.9, 0.0, 0.0, 0.0];
        assert_eq!(image_precision(&pred, &truth, 0.5), 0.0);
    }

    #[test]
    fn test_missed_mask_scores_zero() {
        let truth = [1.0, 0.0, 0.0, 0.0];
        let pred = [0.0; 4];
        assert_eq!(image_precision(&pred, &truth, 0.5), 0.0);
    }

    #[test]
    fn test_partial_overlap() {
        // iou = 3/4 = 0.75: passes 0.50..=0.70 (5 thresholds)
        let truth = [1.0, 1.0, 1.0, 1.0, 0.0, 0.0];
        let pred = [1.0, 1.0, 1.0, 0.0, 0.0, 0.0];
        assert!((image_precision(&pred, &truth, 0.5) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_mean_over_images() {
        let truths = [1.0, 1.0, 0.0, 0.0, /* second image */ 1.0, 0.0, 0.0, 0.0];
        let preds = [1.0, 1.0, 0.0, 0.0, /* second image */ 0.0, 0.0, 0.0, 0.0];
        let metrics = SegmentationMetrics::compute(&preds, &truths, 4, 0.5).unwrap();
        assert_eq!(metrics.num_images, 2);
        assert!((metrics.mean_precision - 0.5).abs() < 1e-9);
        assert_eq!(metrics.empty_truths, 0);
    }

    #[test]
    fn test_empty_truth_counts() {
        let truths = [0.0; 8];
        let preds = [0.0, 0.0, 0.0, 0.0, 0.9, 0.0, 0.0, 0.0];
        let metrics = SegmentationMetrics::compute(&preds, &truths, 4, 0.5).unwrap();
        assert_eq!(metrics.empty_truths, 2);
        assert_eq!(metrics.empty_correct, 1);
    }

    #[test]
    fn test_length_mismatch_is_error() {
        let err = salt_precision(&[0.0; 4], &[0.0; 8], 4).unwrap_err();
        assert!(matches!(err, SaltError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_ragged_images_is_error() {
        assert!(salt_precision(&[0.0; 6], &[0.0; 6], 4).is_err());
    }
}
