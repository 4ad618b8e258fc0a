//! # Salt CV
//!
//! Cross-validated snapshot-ensemble training for seismic salt segmentation,
//! built on the Burn framework.
//!
//! ## Features
//!
//! - **5-fold cross-validation** with a precomputed, immutable fold assignment
//! - **Snapshot ensembling**: cosine-annealing restarts, best model of every cycle saved
//! - **Lovász hinge loss** with optional auxiliary pixel/image heads for pseudo-labeled data
//! - **Burn framework** with an NdArray CPU backend and an optional CUDA backend
//!
//! ## Modules
//!
//! - `dataset`: fold splits, PNG loading, padding/augmentation, burn dataset and batcher
//! - `model`: U-Net variants
//! - `training`: losses, schedule, snapshot tracking, checkpoints and the fold driver
//! - `inference`: snapshot-ensemble evaluation
//! - `utils`: logging, metrics, and error handling
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use salt_cv::backend::{cpu_device, CpuTrainingBackend};
//! use salt_cv::config::TrainingConfig;
//! use salt_cv::training::run_cross_validation;
//!
//! let config = TrainingConfig::from_toml_file("salt.toml".as_ref())?;
//! let report = run_cross_validation::<CpuTrainingBackend>(&config, &cpu_device())?;
//! ```

pub mod backend;
pub mod config;
pub mod dataset;
pub mod inference;
pub mod model;
pub mod training;
pub mod utils;

// Re-export commonly used items for convenience
pub use config::{DataConfig, TrainingConfig};
pub use dataset::folds::{FoldAssignment, FoldSplit, SampleId, NUM_FOLDS};
pub use dataset::{SaltBatch, SaltBatcher, SaltDataset, SaltItem, SaltSample};
pub use inference::{evaluate_fold, EnsembleReport};
pub use model::{ModelVariant, SaltNet, SaltNetConfig};
pub use training::{run_cross_validation, CrossValidationReport, FoldReport};
pub use utils::error::{Result, SaltError};
pub use utils::metrics::{salt_precision, SegmentationMetrics};
