//! Learning Rate Scheduler Module
//!
//! Cosine annealing restarted every cycle. Within a cycle of `cycle_len`
//! epochs the rate decays from `max_lr` towards `min_lr`; the first epoch of
//! the next cycle jumps back to `max_lr`.

use serde::{Deserialize, Serialize};

use crate::config::TrainingConfig;
use crate::utils::error::{Result, SaltError};

/// Per-cycle cosine annealing schedule
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SnapshotSchedule {
    pub max_lr: f64,
    pub min_lr: f64,
    /// Epochs per cycle (> 0)
    pub cycle_len: usize,
}

impl SnapshotSchedule {
    pub fn new(max_lr: f64, min_lr: f64, cycle_len: usize) -> Result<Self> {
        if cycle_len == 0 {
            return Err(SaltError::Config(
                "cycle length is zero: epochs must be >= snapshots".to_string(),
            ));
        }
        Ok(Self {
            max_lr,
            min_lr,
            cycle_len,
        })
    }

    /// `cycle_len = epochs / snapshots`
    pub fn from_config(config: &TrainingConfig) -> Result<Self> {
        Self::new(config.max_lr, config.min_lr, config.cycle_len())
    }

    /// Get the learning rate for a given (fold-global) epoch
    pub fn lr_at(&self, epoch: usize) -> f64 {
        let progress = (epoch % self.cycle_len) as f64 / self.cycle_len as f64;
        let cosine_factor = (1.0 + (std::f64::consts::PI * progress).cos()) / 2.0;
        self.min_lr + (self.max_lr - self.min_lr) * cosine_factor
    }

    /// Cycle the epoch belongs to
    pub fn cycle_of(&self, epoch: usize) -> usize {
        epoch / self.cycle_len
    }

    /// Whether a snapshot is taken after this epoch
    pub fn is_cycle_end(&self, epoch: usize) -> bool {
        (epoch + 1) % self.cycle_len == 0
    }

    /// Number of complete cycles in `total_epochs`
    pub fn num_snapshots(&self, total_epochs: usize) -> usize {
        total_epochs / self.cycle_len
    }

    /// Epochs after which snapshots are taken
    pub fn snapshot_epochs(&self, total_epochs: usize) -> Vec<usize> {
        (0..total_epochs).filter(|&e| self.is_cycle_end(e)).collect()
    }

    pub fn description(&self) -> String {
        format!(
            "Cosine restarts: max={:.6}, min={:.6}, cycle={} epochs",
            self.max_lr, self.min_lr, self.cycle_len
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_cycle_rejected() {
        assert!(SnapshotSchedule::new(0.01, 0.001, 0).is_err());
    }

    #[test]
    fn test_cosine_within_cycle() {
        let schedule = SnapshotSchedule::new(0.01, 0.001, 4).unwrap();

        assert!((schedule.lr_at(0) - 0.01).abs() < 1e-12);
        // Halfway through the cycle sits at the midpoint
        assert!((schedule.lr_at(2) - 0.0055).abs() < 1e-12);
        assert!(schedule.lr_at(3) < schedule.lr_at(2));
        assert!(schedule.lr_at(3) > 0.001);
    }

    #[test]
    fn test_restart_each_cycle() {
        let schedule = SnapshotSchedule::new(0.01, 0.001, 3).unwrap();
        for cycle in 0..4 {
            let start = cycle * 3;
            assert!((schedule.lr_at(start) - 0.01).abs() < 1e-12);
            assert_eq!(schedule.lr_at(start + 1), schedule.lr_at(1));
            assert_eq!(schedule.cycle_of(start + 2), cycle);
        }
    }

    #[test]
    fn test_ten_epochs_five_snapshots() {
        let config = TrainingConfig {
            epochs: 10,
            snapshots: 5,
            ..Default::default()
        };
        let schedule = SnapshotSchedule::from_config(&config).unwrap();
        assert_eq!(schedule.cycle_len, 2);
        // Zero-based epochs 1, 3, 5, 7, 9 are the 2nd, 4th, ... 10th epochs
        assert_eq!(schedule.snapshot_epochs(10), vec![1, 3, 5, 7, 9]);
        assert_eq!(schedule.num_snapshots(10), 5);
    }

    #[test]
    fn test_trailing_epochs_do_not_snapshot() {
        let schedule = SnapshotSchedule::new(0.01, 0.001, 11 / 5).unwrap();
        assert_eq!(schedule.snapshot_epochs(11), vec![1, 3, 5, 7, 9]);
        assert_eq!(schedule.num_snapshots(11), 5);

        // 13 epochs with 4 snapshots: cycle 3, trailing epoch 12 never snapshots
        let schedule = SnapshotSchedule::new(0.01, 0.001, 13 / 4).unwrap();
        assert_eq!(schedule.num_snapshots(13), 4);
        assert!(!schedule.is_cycle_end(12));
    }
}
