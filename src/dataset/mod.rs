//! Dataset module for seismic salt images
//!
//! - Sample ids and the 5-fold assignment
//! - PNG image/mask loading (labeled and pseudo-labeled)
//! - Reflect padding and training augmentation
//! - Burn `Dataset` and `Batcher` integration

pub mod augmentation;
pub mod burn_dataset;
pub mod folds;
pub mod loader;

pub use augmentation::{AugmentationConfig, Augmenter, Padding};
pub use burn_dataset::{DatasetMode, SaltBatch, SaltBatcher, SaltDataset, SaltItem};
pub use folds::{FoldAssignment, FoldSplit, SampleId, NUM_FOLDS};
pub use loader::{load_labeled, load_pseudo, SaltSample};
