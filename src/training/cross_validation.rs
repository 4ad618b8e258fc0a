//! Cross-validated snapshot-ensemble training
//!
//! For every selected fold: build the train/validation split, merge the
//! fold's pseudo-labels when enabled, start from fresh (or pretrained)
//! weights and run `epochs` epochs of cosine-restart SGD. The best model of
//! every cycle is written as one snapshot.
//!
//! Nothing but the configuration crosses fold boundaries.

use std::fs;
use std::path::PathBuf;

use burn::module::Module;
use burn::optim::decay::WeightDecayConfig;
use burn::optim::adaptor::OptimizerAdaptor;
use burn::optim::momentum::MomentumConfig;
use burn::optim::{Sgd, SgdConfig};
use burn::prelude::Backend;
use burn::tensor::backend::AutodiffBackend;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use tracing::info;

use crate::config::TrainingConfig;
use crate::dataset::augmentation::Padding;
use crate::dataset::burn_dataset::{DatasetMode, SaltDataset};
use crate::dataset::folds::{FoldAssignment, FoldSplit};
use crate::dataset::loader::{load_labeled, load_pseudo};
use crate::model::SaltNet;
use crate::training::checkpoint::{load_model, save_model, SnapshotMetadata, SnapshotNaming};
use crate::training::history::{EpochRecord, FoldHistory};
use crate::training::scheduler::SnapshotSchedule;
use crate::training::snapshot::{CycleSnapshot, SnapshotTracker};
use crate::training::trainer::Trainer;
use crate::utils::error::Result;
use crate::utils::logging::TrainingLogger;

/// One snapshot written during a fold
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotRecord {
    pub index: usize,
    /// 1-based epoch the weights come from
    pub epoch: usize,
    pub val_accuracy: f64,
    /// Model file on disk
    pub path: PathBuf,
}

/// Outcome of one fold
#[derive(Debug, Clone, Serialize)]
pub struct FoldReport {
    pub fold: usize,
    pub train_size: usize,
    /// Pseudo-labeled samples included in `train_size`
    pub pseudo_size: usize,
    pub val_size: usize,
    pub snapshots: Vec<SnapshotRecord>,
    pub history: FoldHistory,
}

impl FoldReport {
    /// Best per-cycle accuracy among the saved snapshots
    pub fn best_snapshot_accuracy(&self) -> Option<f64> {
        self.snapshots
            .iter()
            .map(|s| s.val_accuracy)
            .fold(None, |best, acc| Some(best.map_or(acc, |b: f64| b.max(acc))))
    }
}

/// Outcome of a full run
#[derive(Debug, Clone, Default, Serialize)]
pub struct CrossValidationReport {
    pub folds: Vec<FoldReport>,
}

impl CrossValidationReport {
    /// Mean over folds of each fold's best snapshot accuracy
    pub fn mean_best_accuracy(&self) -> Option<f64> {
        let bests: Vec<f64> = self
            .folds
            .iter()
            .filter_map(FoldReport::best_snapshot_accuracy)
            .collect();
        if bests.is_empty() {
            None
        } else {
            Some(bests.iter().sum::<f64>() / bests.len() as f64)
        }
    }

    pub fn total_snapshots(&self) -> usize {
        self.folds.iter().map(|f| f.snapshots.len()).sum()
    }
}

/// Optimizer driving every cycle
pub type SaltOptimizer<B> =
    OptimizerAdaptor<Sgd<<B as AutodiffBackend>::InnerBackend>, SaltNet<B>, B>;

/// SGD with momentum (no dampening) and weight decay, with empty state
pub fn build_optimizer<B: AutodiffBackend>(config: &TrainingConfig) -> SaltOptimizer<B> {
    SgdConfig::new()
        .with_momentum(Some(
            MomentumConfig::new()
                .with_momentum(config.momentum)
                .with_dampening(0.0),
        ))
        .with_weight_decay(Some(WeightDecayConfig::new(config.weight_decay as f32)))
        .init::<B, SaltNet<B>>()
}

/// Weights a fold starts from
pub fn initial_model<B: Backend>(config: &TrainingConfig, device: &B::Device) -> Result<SaltNet<B>> {
    match &config.pretrained {
        Some(path) => {
            info!("Loading pretrained weights from {:?}", path);
            load_model::<B>(config.model, path, device)
        }
        None => Ok(config.model.net_config().init::<B>(device)),
    }
}

/// Datasets of one fold
pub struct FoldData {
    pub train: SaltDataset,
    pub val: SaltDataset,
    pub pseudo_size: usize,
}

/// Load images for a split and merge pseudo-labels when enabled
pub fn prepare_fold_data(config: &TrainingConfig, split: &FoldSplit) -> Result<FoldData> {
    let padding = Padding::new(config.fine_size, config.pad_left, config.pad_right);

    info!(
        "Fold {}: loading {} training and {} validation samples",
        split.fold,
        split.train_ids.len(),
        split.val_ids.len()
    );
    let train_samples = load_labeled(&config.data, &split.train_ids, config.fine_size)?;
    let val_samples = load_labeled(&config.data, &split.val_ids, config.fine_size)?;

    let mut train = SaltDataset::new(train_samples, padding, DatasetMode::Train);
    let val = SaltDataset::new(val_samples, padding, DatasetMode::Validation);

    let mut pseudo_size = 0;
    if config.pseudo {
        let pseudo = load_pseudo(&config.data, split.fold, config.fine_size)?;
        pseudo_size = pseudo.len();
        train.extend(pseudo);
    }

    Ok(FoldData {
        train,
        val,
        pseudo_size,
    })
}

fn epoch_seed(seed: u64, fold: usize, epoch: usize) -> u64 {
    seed.wrapping_add((fold as u64) << 32)
        .wrapping_add(epoch as u64)
}

/// Result of one epoch
pub struct EpochStep<B: AutodiffBackend> {
    pub model: SaltNet<B>,
    pub record: EpochRecord,
    /// Present when the epoch closed a cycle
    pub snapshot: Option<CycleSnapshot<SaltNet<B>>>,
}

/// Epoch loop state of one fold
///
/// Owns the schedule, the cycle tracker and the optimizer. The optimizer is
/// rebuilt whenever a cycle closes so each cycle starts with empty momentum.
pub struct FoldRunner<'a, B: AutodiffBackend> {
    config: &'a TrainingConfig,
    fold: usize,
    schedule: SnapshotSchedule,
    tracker: SnapshotTracker<SaltNet<B>>,
    trainer: Trainer<B>,
    optimizer: SaltOptimizer<B>,
}

impl<'a, B: AutodiffBackend> FoldRunner<'a, B> {
    pub fn new(config: &'a TrainingConfig, fold: usize, device: &B::Device) -> Result<Self> {
        let schedule = SnapshotSchedule::from_config(config)?;
        let tracker = SnapshotTracker::new(config.epochs, schedule.cycle_len)?;

        Ok(Self {
            config,
            fold,
            schedule,
            tracker,
            trainer: Trainer::new(config, device.clone()),
            optimizer: build_optimizer::<B>(config),
        })
    }

    pub fn schedule(&self) -> &SnapshotSchedule {
        &self.schedule
    }

    pub fn trainer(&self) -> &Trainer<B> {
        &self.trainer
    }

    pub fn optimizer(&self) -> &SaltOptimizer<B> {
        &self.optimizer
    }

    /// Train, validate and close out one epoch
    pub fn run_epoch(&mut self, model: SaltNet<B>, epoch: usize, data: &FoldData) -> Result<EpochStep<B>> {
        let lr = self.schedule.lr_at(epoch);
        self.tracker.begin_epoch(epoch)?;

        let mut rng = ChaCha8Rng::seed_from_u64(epoch_seed(self.config.seed, self.fold, epoch));
        let (model, train_loss) =
            self.trainer
                .train_epoch(model, &mut self.optimizer, lr, &data.train, &mut rng)?;

        self.tracker.begin_validation()?;
        let outcome = self.trainer.validate(&model, &data.val)?;
        let cycle_best = self.tracker.observe(epoch, outcome.accuracy, &model)?;

        let record = EpochRecord {
            fold: self.fold,
            epoch: epoch + 1,
            cycle: self.schedule.cycle_of(epoch),
            lr,
            train_loss,
            val_loss: outcome.loss,
            val_accuracy: outcome.accuracy,
            cycle_best,
        };

        let snapshot = self.tracker.end_epoch(epoch, &model)?;
        if snapshot.is_some() {
            self.optimizer = build_optimizer::<B>(self.config);
        }

        Ok(EpochStep {
            model,
            record,
            snapshot,
        })
    }
}

/// Train one fold and write its snapshots, sidecars and history
pub fn run_fold<B: AutodiffBackend>(
    config: &TrainingConfig,
    fold: usize,
    model: SaltNet<B>,
    data: &FoldData,
    naming: &SnapshotNaming,
    device: &B::Device,
) -> Result<FoldReport> {
    let mut runner = FoldRunner::<B>::new(config, fold, device)?;
    let mut logger = TrainingLogger::new(fold, config.epochs);

    info!(
        "Fold {}: {} | {} snapshots of {} epochs | loss {:?}",
        fold,
        runner.schedule().description(),
        runner.schedule().num_snapshots(config.epochs),
        runner.schedule().cycle_len,
        runner.trainer().loss_mode()
    );

    let mut model = model;
    let mut history = FoldHistory::default();
    let mut snapshots = Vec::new();

    for epoch in 0..config.epochs {
        logger.start_epoch(epoch, runner.schedule().lr_at(epoch));

        let step = runner.run_epoch(model, epoch, data)?;
        model = step.model;

        println!("{}", step.record.summary_line());
        logger.end_epoch(step.record.val_accuracy);
        history.push(step.record);

        if let Some(snapshot) = step.snapshot {
            save_model(&snapshot.state, &naming.stem(fold, snapshot.index))?;
            SnapshotMetadata::new(
                config,
                fold,
                snapshot.index,
                snapshot.epoch,
                snapshot.accuracy,
                snapshot.state.num_params(),
            )
            .save(&naming.metadata_file(fold, snapshot.index))?;

            logger.log_snapshot(snapshot.index, snapshot.epoch, snapshot.accuracy);
            snapshots.push(SnapshotRecord {
                index: snapshot.index,
                epoch: snapshot.epoch + 1,
                val_accuracy: snapshot.accuracy,
                path: naming.model_file(fold, snapshot.index),
            });
        }
    }

    history.write_csv(&naming.history_file(fold))?;
    logger.log_complete(snapshots.len());

    Ok(FoldReport {
        fold,
        train_size: data.train.samples().len(),
        pseudo_size: data.pseudo_size,
        val_size: data.val.samples().len(),
        snapshots,
        history,
    })
}

/// Run every selected fold
pub fn run_cross_validation<B: AutodiffBackend>(
    config: &TrainingConfig,
    device: &B::Device,
) -> Result<CrossValidationReport> {
    config.validate()?;

    let naming = SnapshotNaming::from_config(config);
    fs::create_dir_all(naming.save_dir())?;
    config.save_json(&naming.config_file())?;

    let assignment = FoldAssignment::from_csv(&config.data.ids_path(), &config.data.folds_path())?;
    let mut report = CrossValidationReport::default();

    for fold in config.fold_indices() {
        let split = assignment.split(fold)?;
        let data = prepare_fold_data(config, &split)?;
        info!(
            "Fold {}: {} train ({} pseudo), {} validation, {:.1}% salt in train",
            fold,
            data.train.samples().len(),
            data.pseudo_size,
            data.val.samples().len(),
            data.train.salt_fraction() * 100.0
        );

        let model = initial_model::<B>(config, device)?;
        report
            .folds
            .push(run_fold::<B>(config, fold, model, &data, &naming, device)?);
    }

    Ok(report)
}
