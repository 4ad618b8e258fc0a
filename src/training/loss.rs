//! Segmentation losses
//!
//! The Lovász hinge is a convex surrogate of the Jaccard index. Errors are
//! sorted on the host (sorting does not need gradients), the permutation is
//! gathered back on the device so gradients still flow through the logits.
//!
//! Two training modes:
//! - `Single`: Lovász hinge on the main logit
//! - `Auxiliary`: Lovász on the main logit + BCE on the image logit +
//!   Lovász on the pixel logit restricted to images that contain salt

use std::cmp::Ordering;

use burn::nn::loss::BinaryCrossEntropyLossConfig;
use burn::prelude::*;
use burn::tensor::activation::relu;

use crate::dataset::augmentation::Padding;
use crate::model::SaltOutput;
use crate::utils::error::{Result, SaltError};

/// Loss composition used during training
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LossMode {
    Single,
    Auxiliary,
}

impl LossMode {
    /// Auxiliary losses go with pseudo-label training
    pub fn from_pseudo(pseudo: bool) -> Self {
        if pseudo {
            LossMode::Auxiliary
        } else {
            LossMode::Single
        }
    }
}

/// Gradient of the Lovász extension w.r.t. errors sorted in descending order
pub fn lovasz_grad(gt_sorted: &[f32]) -> Vec<f32> {
    let gts: f32 = gt_sorted.iter().sum();
    let mut cum_pos = 0.0f32;
    let mut cum_neg = 0.0f32;

    let mut jaccard: Vec<f32> = gt_sorted
        .iter()
        .map(|&g| {
            cum_pos += g;
            cum_neg += 1.0 - g;
            let intersection = gts - cum_pos;
            let union = gts + cum_neg;
            1.0 - intersection / union
        })
        .collect();

    for i in (1..jaccard.len()).rev() {
        jaccard[i] -= jaccard[i - 1];
    }
    jaccard
}

fn host_values<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<Vec<f32>> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| SaltError::Training(format!("failed to read tensor data: {e:?}")))
}

/// Lovász hinge per image
///
/// # Arguments
/// * `logits` - `[batch, 1, H, W]`
/// * `masks` - binary `[batch, 1, H, W]`
///
/// # Returns
/// Per-image losses `[batch]`
pub fn lovasz_hinge_per_image<B: Backend>(logits: Tensor<B, 4>, masks: Tensor<B, 4>) -> Result<Tensor<B, 1>> {
    let dims = logits.dims();
    if dims != masks.dims() {
        return Err(SaltError::shape_mismatch(
            format!("{:?}", dims),
            format!("{:?}", masks.dims()),
        ));
    }

    let [batch, channels, height, width] = dims;
    let pixels = channels * height * width;
    let device = logits.device();

    let logits = logits.reshape([batch, pixels]);
    let labels = masks.reshape([batch, pixels]);
    let signs = labels.clone().mul_scalar(2.0).sub_scalar(1.0);
    let errors = (logits * signs).neg().add_scalar(1.0);

    let errors_host = host_values(errors.clone())?;
    let labels_host = host_values(labels)?;

    let mut permutation = Vec::with_capacity(batch * pixels);
    let mut grads = Vec::with_capacity(batch * pixels);
    for image in 0..batch {
        let offset = image * pixels;
        let err = &errors_host[offset..offset + pixels];

        let mut order: Vec<usize> = (0..pixels).collect();
        order.sort_by(|&a, &b| err[b].partial_cmp(&err[a]).unwrap_or(Ordering::Equal));

        let gt_sorted: Vec<f32> = order.iter().map(|&j| labels_host[offset + j]).collect();
        grads.extend(lovasz_grad(&gt_sorted));
        permutation.extend(order.into_iter().map(|j| j as i64));
    }

    let permutation =
        Tensor::<B, 2, Int>::from_data(TensorData::new(permutation, [batch, pixels]), &device);
    let grads = Tensor::<B, 2>::from_floats(TensorData::new(grads, [batch, pixels]), &device);

    let errors_sorted = errors.gather(1, permutation);
    Ok((relu(errors_sorted) * grads).sum_dim(1).reshape([batch]))
}

/// Lovász hinge averaged over all images
pub fn lovasz_hinge<B: Backend>(logits: Tensor<B, 4>, masks: Tensor<B, 4>) -> Result<Tensor<B, 1>> {
    Ok(lovasz_hinge_per_image(logits, masks)?.mean())
}

/// Lovász hinge averaged over images whose mask has salt (0 when none do)
pub fn lovasz_hinge_nonempty<B: Backend>(logits: Tensor<B, 4>, masks: Tensor<B, 4>) -> Result<Tensor<B, 1>> {
    let [batch, channels, height, width] = masks.dims();
    let device = masks.device();

    let salted = masks
        .clone()
        .reshape([batch, channels * height * width])
        .max_dim(1)
        .reshape([batch]);
    let weights = host_values(salted)?
        .into_iter()
        .map(|m| if m > 0.5 { 1.0 } else { 0.0 })
        .collect::<Vec<f32>>();
    let count = weights.iter().filter(|&&w| w > 0.0).count();

    let weights = Tensor::<B, 1>::from_floats(TensorData::new(weights, [batch]), &device);
    let per_image = lovasz_hinge_per_image(logits, masks)?;
    Ok((per_image * weights).sum().div_scalar(count.max(1) as f32))
}

/// Crop `[batch, C, padded, padded]` to the unpadded region
pub fn crop_to_fine<B: Backend>(tensor: Tensor<B, 4>, padding: Padding) -> Tensor<B, 4> {
    let [batch, channels, _, _] = tensor.dims();
    let range = padding.crop_range();
    tensor.slice([0..batch, 0..channels, range.clone(), range])
}

/// Individual loss terms of one training batch
#[derive(Debug, Clone)]
pub struct LossTerms<B: Backend> {
    /// Sum of all terms; this is what gets back-propagated
    pub total: Tensor<B, 1>,
    pub segmentation: Tensor<B, 1>,
    pub image: Option<Tensor<B, 1>>,
    pub pixel: Option<Tensor<B, 1>>,
}

/// Training loss for the configured mode
#[derive(Debug, Clone, Copy)]
pub struct SegmentationLoss {
    mode: LossMode,
}

impl SegmentationLoss {
    pub fn new(mode: LossMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> LossMode {
        self.mode
    }

    /// Compute the loss of one batch
    ///
    /// `masks` are padded to the logit size; `labels` are the image-level labels.
    pub fn forward<B: Backend>(
        &self,
        output: SaltOutput<B>,
        masks: Tensor<B, 4>,
        labels: Tensor<B, 1, Int>,
    ) -> Result<LossTerms<B>> {
        let segmentation = lovasz_hinge(output.logit, masks.clone())?;

        match self.mode {
            LossMode::Single => Ok(LossTerms {
                total: segmentation.clone(),
                segmentation,
                image: None,
                pixel: None,
            }),
            LossMode::Auxiliary => {
                let (image_logit, pixel_logit) = match (output.image_logit, output.pixel_logit) {
                    (Some(image), Some(pixel)) => (image, pixel),
                    _ => {
                        return Err(SaltError::Training(
                            "auxiliary loss needs a model with pixel and image heads".to_string(),
                        ))
                    }
                };

                let device = image_logit.device();
                let [batch, _] = image_logit.dims();
                let image = BinaryCrossEntropyLossConfig::new()
                    .with_logits(true)
                    .init(&device)
                    .forward(image_logit.reshape([batch]), labels);
                let pixel = lovasz_hinge_nonempty(pixel_logit, masks)?;

                Ok(LossTerms {
                    total: segmentation.clone() + image.clone() + pixel.clone(),
                    segmentation,
                    image: Some(image),
                    pixel: Some(pixel),
                })
            }
        }
    }
}
