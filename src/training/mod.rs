//! Training module for cross-validated snapshot ensembles
//!
//! This module provides:
//! - Cosine-restart learning rate schedule
//! - Lovász hinge and auxiliary losses
//! - Per-cycle best-model tracking
//! - Snapshot checkpoints and per-epoch history
//! - The 5-fold training driver

pub mod checkpoint;
pub mod cross_validation;
pub mod history;
pub mod loss;
pub mod scheduler;
pub mod snapshot;
pub mod trainer;

pub use checkpoint::{load_model, save_model, SnapshotMetadata, SnapshotNaming};
pub use cross_validation::{run_cross_validation, CrossValidationReport, FoldReport, SnapshotRecord};
pub use history::{EpochRecord, FoldHistory};
pub use loss::{LossMode, SegmentationLoss};
pub use scheduler::SnapshotSchedule;
pub use snapshot::{CycleSnapshot, FoldPhase, SnapshotTracker};
pub use trainer::{predict, validate_model, Predictions, Trainer, ValidationOutcome};
