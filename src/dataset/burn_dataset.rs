//! Burn Dataset Integration for Salt Segmentation
//!
//! Implements Burn's `Dataset` trait over decoded samples and a `Batcher`
//! that stacks padded images, masks and image-level labels into tensors.
//!
//! - Training items: image and mask both padded to the network input side
//! - Validation items: image padded, mask kept at fine size (outputs are
//!   cropped before scoring)

use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::prelude::*;
use rand_chacha::ChaCha8Rng;

use crate::dataset::augmentation::{Augmenter, Padding};
use crate::dataset::loader::SaltSample;

/// How items are materialized
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetMode {
    Train,
    Validation,
}

/// A single item ready for batching
#[derive(Clone, Debug)]
pub struct SaltItem {
    /// Padded image `[image_side * image_side]`
    pub image: Vec<f32>,
    /// Mask `[mask_side * mask_side]`
    pub mask: Vec<f32>,
    pub image_side: usize,
    pub mask_side: usize,
    /// 1.0 when the mask has any salt pixel
    pub label: f32,
}

/// Segmentation dataset over in-memory samples
#[derive(Debug, Clone)]
pub struct SaltDataset {
    samples: Vec<SaltSample>,
    padding: Padding,
    mode: DatasetMode,
}

impl SaltDataset {
    pub fn new(samples: Vec<SaltSample>, padding: Padding, mode: DatasetMode) -> Self {
        Self {
            samples,
            padding,
            mode,
        }
    }

    /// Append more samples (pseudo-labels are merged this way)
    pub fn extend(&mut self, more: Vec<SaltSample>) {
        self.samples.extend(more);
    }

    pub fn samples(&self) -> &[SaltSample] {
        &self.samples
    }

    pub fn padding(&self) -> Padding {
        self.padding
    }

    pub fn mode(&self) -> DatasetMode {
        self.mode
    }

    /// Share of samples whose mask contains salt
    pub fn salt_fraction(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let salted = self.samples.iter().filter(|s| s.label() > 0.5).count();
        salted as f64 / self.samples.len() as f64
    }

    /// Ground-truth masks at fine size, concatenated in sample order
    pub fn fine_masks(&self) -> Vec<f32> {
        self.samples
            .iter()
            .flat_map(|s| s.mask.iter().copied())
            .collect()
    }

    /// Build an item, optionally augmenting it first
    pub fn item(&self, index: usize, augment: Option<(&Augmenter, &mut ChaCha8Rng)>) -> Option<SaltItem> {
        let sample = self.samples.get(index)?;
        let fine = self.padding.fine_size;

        let mut image = sample.image.clone();
        let mut mask = sample.mask.clone();
        if let Some((augmenter, rng)) = augment {
            augmenter.augment(&mut image, &mut mask, fine, rng);
        }

        let label = sample.label();
        let image = self.padding.apply(&image);
        let image_side = self.padding.padded_size();

        let (mask, mask_side) = match self.mode {
            DatasetMode::Train => (self.padding.apply(&mask), image_side),
            DatasetMode::Validation => (mask, fine),
        };

        Some(SaltItem {
            image,
            mask,
            image_side,
            mask_side,
            label,
        })
    }
}

impl Dataset<SaltItem> for SaltDataset {
    fn get(&self, index: usize) -> Option<SaltItem> {
        self.item(index, None)
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

/// A batch of segmentation items
#[derive(Clone, Debug)]
pub struct SaltBatch<B: Backend> {
    /// Images with shape [batch_size, 1, side, side]
    pub images: Tensor<B, 4>,
    /// Masks with shape [batch_size, 1, mask_side, mask_side]
    pub masks: Tensor<B, 4>,
    /// Image-level labels with shape [batch_size]
    pub labels: Tensor<B, 1, Int>,
}

/// Batcher for segmentation items
#[derive(Clone, Debug, Default)]
pub struct SaltBatcher;

impl SaltBatcher {
    pub fn new() -> Self {
        Self
    }
}

impl<B: Backend> Batcher<B, SaltItem, SaltBatch<B>> for SaltBatcher {
    fn batch(&self, items: Vec<SaltItem>, device: &B::Device) -> SaltBatch<B> {
        let batch_size = items.len();
        let image_side = items.first().map(|item| item.image_side).unwrap_or(0);
        let mask_side = items.first().map(|item| item.mask_side).unwrap_or(0);

        let mut images_data = Vec::with_capacity(batch_size * image_side * image_side);
        let mut masks_data = Vec::with_capacity(batch_size * mask_side * mask_side);
        let mut labels_data = Vec::with_capacity(batch_size);

        for item in items {
            images_data.extend(item.image);
            masks_data.extend(item.mask);
            labels_data.push(item.label as i64);
        }

        let images = Tensor::<B, 4>::from_floats(
            TensorData::new(images_data, [batch_size, 1, image_side, image_side]),
            device,
        );
        let masks = Tensor::<B, 4>::from_floats(
            TensorData::new(masks_data, [batch_size, 1, mask_side, mask_side]),
            device,
        );
        let labels = Tensor::<B, 1, Int>::from_data(TensorData::new(labels_data, [batch_size]), device);

        SaltBatch {
            images,
            masks,
            labels,
        }
    }
}
