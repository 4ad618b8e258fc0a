//! Inference module for snapshot-ensemble evaluation
//!
//! Reloads the snapshots of a trained fold and measures how much the
//! ensemble improves over its members.

pub mod ensemble;

pub use ensemble::{average_probabilities, evaluate_fold, EnsembleReport, SnapshotScore};
