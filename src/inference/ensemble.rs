//! Snapshot ensemble evaluation
//!
//! Loads the snapshots one fold produced, predicts the fold's validation set
//! with each of them and scores both the individual snapshots and the mean of
//! their sigmoid probabilities.

use burn::prelude::Backend;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::TrainingConfig;
use crate::dataset::augmentation::Padding;
use crate::dataset::burn_dataset::{DatasetMode, SaltDataset};
use crate::dataset::folds::FoldAssignment;
use crate::dataset::loader::load_labeled;
use crate::training::checkpoint::{load_model, SnapshotNaming};
use crate::training::trainer::predict;
use crate::utils::error::{Result, SaltError};
use crate::utils::metrics::salt_precision;

/// Precision of one snapshot on its fold
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotScore {
    pub snapshot: usize,
    pub precision: f64,
    pub loss: f64,
}

/// Ensemble result for one fold
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleReport {
    pub fold: usize,
    pub num_images: usize,
    pub snapshot_scores: Vec<SnapshotScore>,
    /// Precision of the averaged probabilities
    pub ensemble_precision: f64,
}

impl EnsembleReport {
    pub fn best_single(&self) -> Option<&SnapshotScore> {
        self.snapshot_scores
            .iter()
            .max_by(|a, b| a.precision.total_cmp(&b.precision))
    }
}

/// Element-wise mean of equally sized probability maps
pub fn average_probabilities(maps: &[Vec<f32>]) -> Result<Vec<f32>> {
    let first = maps
        .first()
        .ok_or_else(|| SaltError::Model("nothing to average".to_string()))?;

    let mut sum = vec![0.0f32; first.len()];
    for map in maps {
        if map.len() != sum.len() {
            return Err(SaltError::shape_mismatch(sum.len(), map.len()));
        }
        for (s, p) in sum.iter_mut().zip(map) {
            *s += p;
        }
    }

    let n = maps.len() as f32;
    sum.iter_mut().for_each(|s| *s /= n);
    Ok(sum)
}

/// Score every saved snapshot of `fold` and their ensemble
pub fn evaluate_fold<B: Backend>(
    config: &TrainingConfig,
    fold: usize,
    device: &B::Device,
) -> Result<EnsembleReport> {
    config.validate()?;

    let assignment = FoldAssignment::from_csv(&config.data.ids_path(), &config.data.folds_path())?;
    let split = assignment.split(fold)?;
    let samples = load_labeled(&config.data, &split.val_ids, config.fine_size)?;
    let padding = Padding::new(config.fine_size, config.pad_left, config.pad_right);
    let dataset = SaltDataset::new(samples, padding, DatasetMode::Validation);

    let truths = dataset.fine_masks();
    let pixels = config.fine_size * config.fine_size;
    let naming = SnapshotNaming::from_config(config);

    let mut scores = Vec::new();
    let mut maps = Vec::new();

    for snapshot in 0..config.snapshots {
        let path = naming.model_file(fold, snapshot);
        if !path.exists() {
            warn!("Snapshot {} of fold {} not found at {:?}, skipping", snapshot, fold, path);
            continue;
        }

        let model = load_model::<B>(config.model, &path, device)?;
        let predictions = predict(&model, &dataset, config.batch_size, device)?;
        let precision = salt_precision(&predictions.probabilities, &truths, pixels)?;
        info!("Fold {} snapshot {}: precision {:.4}", fold, snapshot, precision);

        scores.push(SnapshotScore {
            snapshot,
            precision,
            loss: predictions.loss,
        });
        maps.push(predictions.probabilities);
    }

    if maps.is_empty() {
        return Err(SaltError::Checkpoint(
            naming.save_dir().to_path_buf(),
            format!("no snapshots found for fold {fold}"),
        ));
    }

    let ensemble = average_probabilities(&maps)?;
    let ensemble_precision = salt_precision(&ensemble, &truths, pixels)?;

    Ok(EnsembleReport {
        fold,
        num_images: dataset.samples().len(),
        snapshot_scores: scores,
        ensemble_precision,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DataConfig;
    use crate::model::ModelVariant;
    use crate::training::checkpoint::save_model;
    use burn_ndarray::NdArray;
    use image::{GrayImage, Luma};
    use std::fs;
    use std::path::Path;

    type TestBackend = NdArray;

    fn config_with_data(root: &Path) -> TrainingConfig {
        let data = DataConfig {
            data_dir: root.to_path_buf(),
            ..Default::default()
        };
        let mut ids = String::from("id\n");
        let mut folds = String::from("id,fold\n");
        for i in 0..5u32 {
            let id = format!("img{i}");
            ids.push_str(&format!("{id}\n"));
            folds.push_str(&format!("{id},{i}\n"));
            for path in [data.image_path(&id), data.mask_path(&id)] {
                fs::create_dir_all(path.parent().unwrap()).unwrap();
            }
            GrayImage::from_fn(16, 16, |x, y| Luma([((x + y + i) * 7) as u8]))
                .save(data.image_path(&id))
                .unwrap();
            GrayImage::from_fn(16, 16, |x, _| Luma([if x < 8 { 255 } else { 0 }]))
                .save(data.mask_path(&id))
                .unwrap();
        }
        fs::write(data.ids_path(), ids).unwrap();
        fs::write(data.folds_path(), folds).unwrap();

        TrainingConfig {
            model: ModelVariant::Unet,
            fine_size: 16,
            pad_left: 0,
            pad_right: 0,
            batch_size: 2,
            epochs: 3,
            snapshots: 3,
            save_dir: root.join("weights"),
            data,
            ..Default::default()
        }
    }

    #[test]
    fn test_average_probabilities() {
        let avg = average_probabilities(&[vec![0.0, 1.0], vec![1.0, 1.0]]).unwrap();
        assert_eq!(avg, vec![0.5, 1.0]);

        assert!(average_probabilities(&[]).is_err());
        assert!(average_probabilities(&[vec![0.0], vec![0.0, 1.0]]).is_err());
    }

    #[test]
    fn test_evaluate_skips_missing_snapshots() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_with_data(dir.path());
        let device = Default::default();
        let naming = SnapshotNaming::from_config(&config);

        // Snapshots 0 and 2 exist, 1 is missing
        for snapshot in [0, 2] {
            let model = config.model.net_config().init::<TestBackend>(&device);
            save_model(&model, &naming.stem(3, snapshot)).unwrap();
        }

        let report = evaluate_fold::<TestBackend>(&config, 3, &device).unwrap();
        assert_eq!(report.fold, 3);
        assert_eq!(report.num_images, 1);
        let evaluated: Vec<usize> = report.snapshot_scores.iter().map(|s| s.snapshot).collect();
        assert_eq!(evaluated, vec![0, 2]);
        assert!((0.0..=1.0).contains(&report.ensemble_precision));
        assert!(report.best_single().is_some());
    }

    #[test]
    fn test_evaluate_without_snapshots_fails() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_with_data(dir.path());
        let err = evaluate_fold::<TestBackend>(&config, 0, &Default::default()).unwrap_err();
        assert!(matches!(err, SaltError::Checkpoint(..)));
    }
}
