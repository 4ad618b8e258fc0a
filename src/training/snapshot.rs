//! Per-fold snapshot state machine
//!
//! Tracks the phase of one fold's training loop and the best model seen in
//! the current cosine cycle. The tracker is generic over the captured state,
//! so the control flow runs the same for a burn module or a plain value.
//!
//! Phase transitions:
//!
//! ```text
//! CycleStart -> EpochTraining -> EpochValidation -+-> EpochTraining (mid-cycle)
//!                                                 +-> CycleEnd -> CycleStart
//!                                                 +-> FoldComplete (last epoch)
//! ```

use serde::{Deserialize, Serialize};

use crate::utils::error::{Result, SaltError};

/// Where the fold loop currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FoldPhase {
    CycleStart,
    EpochTraining,
    EpochValidation,
    CycleEnd,
    FoldComplete,
}

/// Best state captured at the end of a cycle
#[derive(Debug, Clone)]
pub struct CycleSnapshot<M> {
    /// Snapshot index within the fold (0-based)
    pub index: usize,
    /// Epoch the state comes from
    pub epoch: usize,
    /// Validation accuracy at that epoch (0 when no epoch beat 0)
    pub accuracy: f64,
    pub state: M,
}

/// Best-of-cycle tracker and phase machine for one fold
#[derive(Debug)]
pub struct SnapshotTracker<M> {
    cycle_len: usize,
    total_epochs: usize,
    phase: FoldPhase,
    best_accuracy: f64,
    best: Option<(usize, M)>,
    snapshots_taken: usize,
}

impl<M: Clone> SnapshotTracker<M> {
    pub fn new(total_epochs: usize, cycle_len: usize) -> Result<Self> {
        if cycle_len == 0 {
            return Err(SaltError::Config("cycle length must be > 0".to_string()));
        }
        Ok(Self {
            cycle_len,
            total_epochs,
            phase: FoldPhase::CycleStart,
            best_accuracy: 0.0,
            best: None,
            snapshots_taken: 0,
        })
    }

    pub fn phase(&self) -> FoldPhase {
        self.phase
    }

    /// Best accuracy in the current cycle (0 right after a restart)
    pub fn best_accuracy(&self) -> f64 {
        self.best_accuracy
    }

    /// Snapshots handed out so far; also the index of the next one
    pub fn snapshots_taken(&self) -> usize {
        self.snapshots_taken
    }

    fn expect_phase(&self, allowed: &[FoldPhase], action: &str) -> Result<()> {
        if allowed.contains(&self.phase) {
            Ok(())
        } else {
            Err(SaltError::Training(format!(
                "cannot {} while in phase {:?}",
                action, self.phase
            )))
        }
    }

    /// Enter the training pass of `epoch`
    pub fn begin_epoch(&mut self, epoch: usize) -> Result<()> {
        self.expect_phase(&[FoldPhase::CycleStart, FoldPhase::EpochValidation], "begin an epoch")?;
        if epoch >= self.total_epochs {
            return Err(SaltError::Training(format!(
                "epoch {} is past the last epoch {}",
                epoch,
                self.total_epochs.saturating_sub(1)
            )));
        }
        self.phase = FoldPhase::EpochTraining;
        Ok(())
    }

    /// Training pass finished, validation starts
    pub fn begin_validation(&mut self) -> Result<()> {
        self.expect_phase(&[FoldPhase::EpochTraining], "validate")?;
        self.phase = FoldPhase::EpochValidation;
        Ok(())
    }

    /// Record a validation result; returns true when `state` becomes the cycle best
    ///
    /// Only a strictly greater accuracy replaces the current best.
    pub fn observe(&mut self, epoch: usize, accuracy: f64, state: &M) -> Result<bool> {
        self.expect_phase(&[FoldPhase::EpochValidation], "record validation")?;
        if accuracy > self.best_accuracy {
            self.best_accuracy = accuracy;
            self.best = Some((epoch, state.clone()));
            return Ok(true);
        }
        Ok(false)
    }

    /// Close `epoch`; at a cycle end returns the cycle's snapshot
    ///
    /// `last_state` is captured when no epoch of the cycle beat 0, so every
    /// cycle yields a snapshot. After a cycle end the best accuracy is back at
    /// 0 and the phase is `CycleStart` (or `FoldComplete` after the last epoch).
    pub fn end_epoch(&mut self, epoch: usize, last_state: &M) -> Result<Option<CycleSnapshot<M>>> {
        self.expect_phase(&[FoldPhase::EpochValidation], "end an epoch")?;

        let is_last = epoch + 1 >= self.total_epochs;
        if (epoch + 1) % self.cycle_len != 0 {
            if is_last {
                self.phase = FoldPhase::FoldComplete;
            }
            return Ok(None);
        }

        self.phase = FoldPhase::CycleEnd;
        let (best_epoch, state) = self
            .best
            .take()
            .unwrap_or_else(|| (epoch, last_state.clone()));

        let snapshot = CycleSnapshot {
            index: self.snapshots_taken,
            epoch: best_epoch,
            accuracy: self.best_accuracy,
            state,
        };

        self.snapshots_taken += 1;
        self.best_accuracy = 0.0;
        self.phase = if is_last {
            FoldPhase::FoldComplete
        } else {
            FoldPhase::CycleStart
        };

        Ok(Some(snapshot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Drive a tracker with a fixed accuracy sequence; the state is the epoch
    fn run(total: usize, cycle: usize, accuracies: &[f64]) -> (Vec<CycleSnapshot<usize>>, Vec<f64>) {
        let mut tracker = SnapshotTracker::new(total, cycle).unwrap();
        let mut snapshots = Vec::new();
        let mut best_at_start = Vec::new();

        for epoch in 0..total {
            if tracker.phase() == FoldPhase::CycleStart {
                best_at_start.push(tracker.best_accuracy());
            }
            tracker.begin_epoch(epoch).unwrap();
            tracker.begin_validation().unwrap();
            tracker.observe(epoch, accuracies[epoch], &epoch).unwrap();
            if let Some(snapshot) = tracker.end_epoch(epoch, &epoch).unwrap() {
                snapshots.push(snapshot);
            }
        }

        assert_eq!(tracker.phase(), FoldPhase::FoldComplete);
        (snapshots, best_at_start)
    }

    #[test]
    fn test_ten_epochs_five_cycles() {
        let accuracies = [0.1, 0.2, 0.5, 0.4, 0.3, 0.3, 0.6, 0.7, 0.9, 0.8];
        let (snapshots, best_at_start) = run(10, 2, &accuracies);

        assert_eq!(snapshots.len(), 5);
        let epochs: Vec<_> = snapshots.iter().map(|s| s.epoch).collect();
        assert_eq!(epochs, vec![1, 2, 4, 7, 8]);
        let indices: Vec<_> = snapshots.iter().map(|s| s.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
        assert!(best_at_start.iter().all(|&b| b == 0.0));
    }

    #[test]
    fn test_best_resets_every_cycle() {
        // A strong first cycle must not block a weaker second cycle from saving
        let accuracies = [0.9, 0.8, 0.2, 0.3];
        let (snapshots, _) = run(4, 2, &accuracies);
        assert_eq!(snapshots[0].epoch, 0);
        assert_eq!(snapshots[1].epoch, 3);
        assert!((snapshots[1].accuracy - 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_ties_keep_earlier_epoch() {
        let accuracies = [0.5, 0.5, 0.5];
        let (snapshots, _) = run(3, 3, &accuracies);
        assert_eq!(snapshots[0].epoch, 0);
    }

    #[test]
    fn test_zero_accuracy_cycle_saves_last_state() {
        let accuracies = [0.0, 0.0, 0.0];
        let (snapshots, _) = run(3, 3, &accuracies);
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].epoch, 2);
        assert_eq!(snapshots[0].state, 2);
        assert_eq!(snapshots[0].accuracy, 0.0);
    }

    #[test]
    fn test_trailing_epoch_completes_without_snapshot() {
        let accuracies = [0.1, 0.2, 0.3, 0.4, 0.5];
        let (snapshots, _) = run(5, 2, &accuracies);
        assert_eq!(snapshots.len(), 2);
    }

    #[test]
    fn test_captured_state_is_a_copy() {
        let mut tracker = SnapshotTracker::new(2, 2).unwrap();
        let mut weights = vec![1.0, 2.0];

        tracker.begin_epoch(0).unwrap();
        tracker.begin_validation().unwrap();
        tracker.observe(0, 0.8, &weights).unwrap();
        tracker.end_epoch(0, &weights).unwrap();

        weights[0] = 99.0;
        tracker.begin_epoch(1).unwrap();
        tracker.begin_validation().unwrap();
        tracker.observe(1, 0.1, &weights).unwrap();
        let snapshot = tracker.end_epoch(1, &weights).unwrap().unwrap();

        assert_eq!(snapshot.state, vec![1.0, 2.0]);
    }

    #[test]
    fn test_out_of_order_transitions_rejected() {
        let mut tracker: SnapshotTracker<u8> = SnapshotTracker::new(4, 2).unwrap();
        assert!(tracker.begin_validation().is_err());
        assert!(tracker.observe(0, 0.5, &0).is_err());
        tracker.begin_epoch(0).unwrap();
        assert!(tracker.begin_epoch(0).is_err());
        assert!(SnapshotTracker::<u8>::new(4, 0).is_err());
    }
}
