//! Per-epoch training history and CSV export

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::utils::error::Result;

/// One epoch of one fold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    pub fold: usize,
    /// 1-based epoch, as printed on the console
    pub epoch: usize,
    pub cycle: usize,
    pub lr: f64,
    pub train_loss: f64,
    pub val_loss: f64,
    pub val_accuracy: f64,
    /// Whether this epoch became the best of its cycle
    pub cycle_best: bool,
}

impl EpochRecord {
    /// Console line for this epoch
    pub fn summary_line(&self) -> String {
        format!(
            "epoch: {} train_loss: {:.3} val_loss: {:.3} val_accuracy: {:.3}",
            self.epoch, self.train_loss, self.val_loss, self.val_accuracy
        )
    }
}

/// All epochs of one fold
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FoldHistory {
    pub records: Vec<EpochRecord>,
}

impl FoldHistory {
    pub fn push(&mut self, record: EpochRecord) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Highest validation accuracy seen in the fold
    pub fn best_accuracy(&self) -> Option<f64> {
        self.records
            .iter()
            .map(|r| r.val_accuracy)
            .fold(None, |best, acc| Some(best.map_or(acc, |b: f64| b.max(acc))))
    }

    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        for record in &self.records {
            writer.serialize(record)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn read_csv(path: &Path) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path)?;
        let records = reader
            .deserialize::<EpochRecord>()
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Self { records })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(epoch: usize, acc: f64) -> EpochRecord {
        EpochRecord {
            fold: 0,
            epoch,
            cycle: 0,
            lr: 0.01,
            train_loss: 1.23456,
            val_loss: 0.98765,
            val_accuracy: acc,
            cycle_best: false,
        }
    }

    #[test]
    fn test_summary_line_format() {
        assert_eq!(
            record(3, 0.7126).summary_line(),
            "epoch: 3 train_loss: 1.235 val_loss: 0.988 val_accuracy: 0.713"
        );
    }

    #[test]
    fn test_best_accuracy() {
        let mut history = FoldHistory::default();
        assert_eq!(history.best_accuracy(), None);
        history.push(record(1, 0.4));
        history.push(record(2, 0.6));
        history.push(record(3, 0.5));
        assert_eq!(history.best_accuracy(), Some(0.6));
    }

    #[test]
    fn test_csv_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history_fold0.csv");
        let mut history = FoldHistory::default();
        history.push(record(1, 0.25));
        history.push(EpochRecord {
            cycle_best: true,
            ..record(2, 0.5)
        });
        history.write_csv(&path).unwrap();

        let header = std::fs::read_to_string(&path).unwrap();
        assert!(header.starts_with("fold,epoch,cycle,lr,train_loss,val_loss,val_accuracy,cycle_best"));

        let loaded = FoldHistory::read_csv(&path).unwrap();
        assert_eq!(loaded.records, history.records);
    }
}
