//! Snapshot checkpointing
//!
//! This module provides:
//! - Deterministic snapshot naming `{weight_name}{fold}{snapshot}`
//! - Model save/load through burn's `CompactRecorder` (which appends `.mpk`)
//! - JSON metadata sidecars next to every snapshot

use std::fs;
use std::path::{Path, PathBuf};

use burn::module::Module;
use burn::prelude::Backend;
use burn::record::CompactRecorder;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::TrainingConfig;
use crate::model::{ModelVariant, SaltNet};
use crate::utils::error::{Result, SaltError};

/// Extension `CompactRecorder` adds to every file it writes
pub const RECORDER_EXTENSION: &str = "mpk";

/// File layout of one run's output directory
#[derive(Debug, Clone)]
pub struct SnapshotNaming {
    save_dir: PathBuf,
    weight_name: String,
}

impl SnapshotNaming {
    pub fn new(save_dir: impl Into<PathBuf>, weight_name: impl Into<String>) -> Self {
        Self {
            save_dir: save_dir.into(),
            weight_name: weight_name.into(),
        }
    }

    pub fn from_config(config: &TrainingConfig) -> Self {
        Self::new(&config.save_dir, config.weight_name())
    }

    pub fn save_dir(&self) -> &Path {
        &self.save_dir
    }

    /// Path handed to the recorder (no extension)
    pub fn stem(&self, fold: usize, snapshot: usize) -> PathBuf {
        self.save_dir
            .join(format!("{}{}{}", self.weight_name, fold, snapshot))
    }

    /// Path of the model file as it lands on disk
    pub fn model_file(&self, fold: usize, snapshot: usize) -> PathBuf {
        self.stem(fold, snapshot).with_extension(RECORDER_EXTENSION)
    }

    pub fn metadata_file(&self, fold: usize, snapshot: usize) -> PathBuf {
        self.stem(fold, snapshot).with_extension("json")
    }

    pub fn history_file(&self, fold: usize) -> PathBuf {
        self.save_dir.join(format!("history_fold{fold}.csv"))
    }

    pub fn config_file(&self) -> PathBuf {
        self.save_dir.join("config.json")
    }
}

/// Sidecar describing one saved snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub fold: usize,
    pub snapshot: usize,
    /// 1-based epoch the weights come from
    pub epoch: usize,
    pub val_accuracy: f64,
    pub model: ModelVariant,
    pub padded_size: usize,
    pub num_parameters: usize,
    pub timestamp: String,
}

impl SnapshotMetadata {
    pub fn new(
        config: &TrainingConfig,
        fold: usize,
        snapshot: usize,
        epoch: usize,
        val_accuracy: f64,
        num_parameters: usize,
    ) -> Self {
        Self {
            fold,
            snapshot,
            epoch: epoch + 1,
            val_accuracy,
            model: config.model,
            padded_size: config.padded_size(),
            num_parameters,
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}

/// Save a model to `stem` (+ `.mpk`)
pub fn save_model<B: Backend>(model: &SaltNet<B>, stem: &Path) -> Result<()> {
    if let Some(parent) = stem.parent() {
        fs::create_dir_all(parent)?;
    }

    model
        .clone()
        .save_file(stem, &CompactRecorder::new())
        .map_err(|e| SaltError::Checkpoint(stem.to_path_buf(), format!("{e:?}")))?;

    info!("Snapshot saved to {:?}", stem.with_extension(RECORDER_EXTENSION));
    Ok(())
}

/// Accept a checkpoint path with or without the recorder extension
///
/// Returns the extension-less stem the recorder expects.
pub fn resolve_checkpoint(path: &Path) -> Result<PathBuf> {
    let stem = if path.extension().is_some_and(|ext| ext == RECORDER_EXTENSION) {
        path.with_extension("")
    } else {
        path.to_path_buf()
    };

    if stem.with_extension(RECORDER_EXTENSION).exists() {
        Ok(stem)
    } else {
        Err(SaltError::Checkpoint(
            path.to_path_buf(),
            "checkpoint file not found".to_string(),
        ))
    }
}

/// Build a `variant` network and load weights from `path`
pub fn load_model<B: Backend>(variant: ModelVariant, path: &Path, device: &B::Device) -> Result<SaltNet<B>> {
    let stem = resolve_checkpoint(path)?;
    let model = variant.net_config().init::<B>(device);

    model
        .load_file(&stem, &CompactRecorder::new(), device)
        .map_err(|e| SaltError::Checkpoint(stem.clone(), format!("{e:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::{Tensor, TensorData};
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_snapshot_names() {
        let config = TrainingConfig {
            save_dir: PathBuf::from("weights"),
            ..Default::default()
        };
        let naming = SnapshotNaming::from_config(&config);

        assert_eq!(naming.stem(0, 3), PathBuf::from("weights/model_128_unet03"));
        assert_eq!(
            naming.model_file(4, 1),
            PathBuf::from("weights/model_128_unet41.mpk")
        );
        assert_eq!(
            naming.metadata_file(2, 0),
            PathBuf::from("weights/model_128_unet20.json")
        );
        assert_eq!(
            naming.history_file(2),
            PathBuf::from("weights/history_fold2.csv")
        );
    }

    #[test]
    fn test_names_follow_variant() {
        let config = TrainingConfig {
            model: ModelVariant::UnetAux,
            save_dir: PathBuf::from("out"),
            ..Default::default()
        };
        let naming = SnapshotNaming::from_config(&config);
        assert_eq!(naming.stem(1, 2), PathBuf::from("out/model_128_unet-aux12"));
    }

    #[test]
    fn test_metadata_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meta/snap.json");
        let metadata = SnapshotMetadata::new(&TrainingConfig::default(), 1, 2, 59, 0.81, 1234);
        assert_eq!(metadata.epoch, 60);

        metadata.save(&path).unwrap();
        assert_eq!(SnapshotMetadata::load(&path).unwrap(), metadata);
    }

    #[test]
    fn test_resolve_missing_checkpoint() {
        let err = resolve_checkpoint(Path::new("/nonexistent/model")).unwrap_err();
        assert!(matches!(err, SaltError::Checkpoint(..)));
    }

    #[test]
    fn test_save_and_load_model() {
        let device = Default::default();
        let dir = tempfile::tempdir().unwrap();
        let stem = dir.path().join("model_128_unet00");

        // Full-size variant so load_model can rebuild it from the name alone
        let model = ModelVariant::Unet.net_config().init::<TestBackend>(&device);
        save_model(&model, &stem).unwrap();
        assert!(stem.with_extension("mpk").exists());

        let loaded = load_model::<TestBackend>(ModelVariant::Unet, &stem.with_extension("mpk"), &device).unwrap();
        assert_eq!(loaded.num_params(), model.num_params());

        let input = Tensor::<TestBackend, 4>::from_floats(
            TensorData::new(vec![0.5f32; 16 * 16], [1, 1, 16, 16]),
            &device,
        );
        let a = model.forward(input.clone()).logit.into_data().convert::<f32>().to_vec::<f32>().unwrap();
        let b = loaded.forward(input).logit.into_data().convert::<f32>().to_vec::<f32>().unwrap();
        for (x, y) in a.iter().zip(&b) {
            assert!((x - y).abs() < 1e-5);
        }
    }
}
