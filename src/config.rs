//! Run Configuration
//!
//! `TrainingConfig` is loaded from TOML (every field optional, defaults fill
//! the rest), overridden by CLI flags, validated once, and then passed by
//! reference to every stage of the run.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::dataset::folds::NUM_FOLDS;
use crate::model::ModelVariant;
use crate::utils::error::{Result, SaltError};

/// Placeholder substituted with the fold index in `pseudo_ids_pattern`
pub const FOLD_PLACEHOLDER: &str = "{fold}";

/// Locations of ids, folds, images and pseudo-labels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Root directory every other path is relative to
    pub data_dir: PathBuf,
    /// CSV with an `id` column listing every labeled sample
    pub ids_csv: PathBuf,
    /// CSV with `id,fold` columns
    pub folds_csv: PathBuf,
    pub images_dir: PathBuf,
    pub masks_dir: PathBuf,
    /// Directory holding pseudo-labeled `images/` and `masks/`
    pub pseudo_dir: PathBuf,
    /// Pseudo-label id list per fold, relative to `data_dir`
    pub pseudo_ids_pattern: String,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            ids_csv: PathBuf::from("train_ids.csv"),
            folds_csv: PathBuf::from("folds.csv"),
            images_dir: PathBuf::from("train/images"),
            masks_dir: PathBuf::from("train/masks"),
            pseudo_dir: PathBuf::from("pseudolabels"),
            pseudo_ids_pattern: "stage2_fold{fold}.csv".to_string(),
        }
    }
}

impl DataConfig {
    pub fn ids_path(&self) -> PathBuf {
        self.data_dir.join(&self.ids_csv)
    }

    pub fn folds_path(&self) -> PathBuf {
        self.data_dir.join(&self.folds_csv)
    }

    pub fn image_path(&self, id: &str) -> PathBuf {
        self.data_dir.join(&self.images_dir).join(format!("{id}.png"))
    }

    pub fn mask_path(&self, id: &str) -> PathBuf {
        self.data_dir.join(&self.masks_dir).join(format!("{id}.png"))
    }

    /// Pseudo-label id list for one fold
    pub fn pseudo_ids_path(&self, fold: usize) -> PathBuf {
        let file = self
            .pseudo_ids_pattern
            .replace(FOLD_PLACEHOLDER, &fold.to_string());
        self.data_dir.join(file)
    }

    pub fn pseudo_image_path(&self, id: &str) -> PathBuf {
        self.data_dir
            .join(&self.pseudo_dir)
            .join("images")
            .join(format!("{id}.png"))
    }

    pub fn pseudo_mask_path(&self, id: &str) -> PathBuf {
        self.data_dir
            .join(&self.pseudo_dir)
            .join("masks")
            .join(format!("{id}.png"))
    }
}

/// Cross-validated snapshot training configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Network architecture
    pub model: ModelVariant,
    /// Side of the unpadded images
    pub fine_size: usize,
    /// Padding added on the top and left
    pub pad_left: usize,
    /// Padding added on the bottom and right
    pub pad_right: usize,
    pub batch_size: usize,
    /// Epochs per fold
    pub epochs: usize,
    /// Cosine cycles (and so snapshots) per fold
    pub snapshots: usize,
    /// Train on the CUDA backend
    pub cuda: bool,
    /// Checkpoint directory
    pub save_dir: PathBuf,
    pub max_lr: f64,
    pub min_lr: f64,
    pub momentum: f64,
    pub weight_decay: f64,
    /// Merge pseudo-labeled data and train with auxiliary losses
    pub pseudo: bool,
    /// Checkpoint every fold starts from instead of random weights
    pub pretrained: Option<PathBuf>,
    /// Seed for shuffling and augmentation
    pub seed: u64,
    /// Horizontal flip and brightness jitter on training items
    pub augment: bool,
    /// Restrict the run to these fold indices
    pub folds: Option<Vec<usize>>,
    pub data: DataConfig,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            model: ModelVariant::Unet,
            fine_size: 101,
            pad_left: 13,
            pad_right: 14,
            batch_size: 64,
            epochs: 300,
            snapshots: 5,
            cuda: false,
            save_dir: PathBuf::from("weights"),
            max_lr: 0.01,
            min_lr: 0.001,
            momentum: 0.9,
            weight_decay: 1e-4,
            pseudo: false,
            pretrained: None,
            seed: 42,
            augment: true,
            folds: None,
            data: DataConfig::default(),
        }
    }
}

impl TrainingConfig {
    /// Load a configuration from a TOML file; missing keys take defaults
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            SaltError::Config(format!("Failed to read config {}: {e}", path.display()))
        })?;

        toml::from_str(&content).map_err(|e| {
            SaltError::Config(format!("Failed to parse config {}: {e}", path.display()))
        })
    }

    /// Render the configuration as TOML
    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Write the effective configuration as pretty JSON
    pub fn save_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Side of the network input after padding
    pub fn padded_size(&self) -> usize {
        self.fine_size + self.pad_left + self.pad_right
    }

    /// Epochs per cosine cycle
    pub fn cycle_len(&self) -> usize {
        if self.snapshots == 0 {
            0
        } else {
            self.epochs / self.snapshots
        }
    }

    /// Checkpoint base name, e.g. `model_128_unet`
    pub fn weight_name(&self) -> String {
        format!("model_{}_{}", self.padded_size(), self.model)
    }

    /// Fold indices this run trains, in ascending order
    pub fn fold_indices(&self) -> Vec<usize> {
        match &self.folds {
            Some(folds) => {
                let mut folds = folds.clone();
                folds.sort_unstable();
                folds.dedup();
                folds
            }
            None => (0..NUM_FOLDS).collect(),
        }
    }

    /// Check every invariant the training loop relies on
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(SaltError::Config(msg));

        if self.batch_size == 0 {
            return fail("batch_size must be > 0".into());
        }
        if self.epochs == 0 {
            return fail("epochs must be > 0".into());
        }
        if self.snapshots == 0 {
            return fail("snapshots must be > 0".into());
        }
        if self.epochs < self.snapshots {
            return fail(format!(
                "epochs ({}) must be >= snapshots ({}) so every cycle has at least one epoch",
                self.epochs, self.snapshots
            ));
        }
        if self.fine_size == 0 {
            return fail("fine_size must be > 0".into());
        }
        if self.pad_left >= self.fine_size || self.pad_right >= self.fine_size {
            return fail(format!(
                "padding ({}, {}) must be smaller than fine_size ({})",
                self.pad_left, self.pad_right, self.fine_size
            ));
        }

        let divisor = self.model.net_config().size_divisor();
        if self.padded_size() % divisor != 0 {
            return fail(format!(
                "padded size {} (fine {} + {} + {}) must be divisible by {}",
                self.padded_size(),
                self.fine_size,
                self.pad_left,
                self.pad_right,
                divisor
            ));
        }

        if self.min_lr < 0.0 || self.max_lr <= 0.0 {
            return fail(format!(
                "learning rates must be positive (max {}, min {})",
                self.max_lr, self.min_lr
            ));
        }
        if self.min_lr > self.max_lr {
            return fail(format!(
                "min_lr ({}) must not exceed max_lr ({})",
                self.min_lr, self.max_lr
            ));
        }
        if self.momentum < 0.0 || self.weight_decay < 0.0 {
            return fail("momentum and weight_decay must be non-negative".into());
        }

        if let Some(folds) = &self.folds {
            if folds.is_empty() {
                return fail("fold filter is empty".into());
            }
            if let Some(bad) = folds.iter().find(|&&f| f >= NUM_FOLDS) {
                return fail(format!("fold {} is outside [0, {})", bad, NUM_FOLDS));
            }
        }

        if self.pseudo && !self.model.has_aux_heads() {
            return fail(format!(
                "pseudo-label training needs a model with auxiliary heads; '{}' has none",
                self.model
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = TrainingConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.padded_size(), 128);
        assert_eq!(config.cycle_len(), 60);
        assert_eq!(config.weight_name(), "model_128_unet");
        assert_eq!(config.fold_indices(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_cycle_len_integer_division() {
        let config = TrainingConfig {
            epochs: 10,
            snapshots: 5,
            ..Default::default()
        };
        assert_eq!(config.cycle_len(), 2);

        let config = TrainingConfig {
            epochs: 11,
            snapshots: 5,
            ..Default::default()
        };
        assert_eq!(config.cycle_len(), 2);
    }

    #[test]
    fn test_zero_snapshots_rejected() {
        let config = TrainingConfig {
            snapshots: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        assert_eq!(config.cycle_len(), 0);
    }

    #[test]
    fn test_fewer_epochs_than_snapshots_rejected() {
        let config = TrainingConfig {
            epochs: 3,
            snapshots: 5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_padded_size_must_divide() {
        let config = TrainingConfig {
            pad_right: 13,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("divisible by 16"));
    }

    #[test]
    fn test_lr_order() {
        let config = TrainingConfig {
            min_lr: 0.1,
            max_lr: 0.01,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_fold_filter() {
        let config = TrainingConfig {
            folds: Some(vec![3, 1, 3]),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
        assert_eq!(config.fold_indices(), vec![1, 3]);

        let config = TrainingConfig {
            folds: Some(vec![5]),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_pseudo_requires_aux_variant() {
        let config = TrainingConfig {
            pseudo: true,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = TrainingConfig {
            pseudo: true,
            model: ModelVariant::UnetAux,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
        assert_eq!(config.weight_name(), "model_128_unet-aux");
    }

    #[test]
    fn test_partial_toml() {
        let config: TrainingConfig = toml::from_str(
            r#"
            model = "unet-wide"
            epochs = 20
            snapshots = 4

            [data]
            data_dir = "/mnt/salt"
            "#,
        )
        .unwrap();

        assert_eq!(config.model, ModelVariant::UnetWide);
        assert_eq!(config.cycle_len(), 5);
        assert_eq!(config.batch_size, 64);
        assert_eq!(config.data.data_dir, PathBuf::from("/mnt/salt"));
        assert_eq!(config.data.folds_csv, PathBuf::from("folds.csv"));
    }

    #[test]
    fn test_toml_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.toml");
        let config = TrainingConfig {
            folds: Some(vec![0, 2]),
            pretrained: Some(PathBuf::from("weights/base")),
            ..Default::default()
        };
        fs::write(&path, config.to_toml_string().unwrap()).unwrap();

        let loaded = TrainingConfig::from_toml_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_data_paths() {
        let data = DataConfig::default();
        assert_eq!(
            data.image_path("abc"),
            PathBuf::from("data/train/images/abc.png")
        );
        assert_eq!(
            data.pseudo_ids_path(3),
            PathBuf::from("data/stage2_fold3.csv")
        );
        assert_eq!(
            data.pseudo_mask_path("t1"),
            PathBuf::from("data/pseudolabels/masks/t1.png")
        );
    }
}
