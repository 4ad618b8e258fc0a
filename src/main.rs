//! Salt CV command line
//!
//! Entry point for cross-validated snapshot-ensemble training of the salt
//! segmentation network with the Burn framework.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::info;

use salt_cv::backend::{backend_name, cpu_device, CpuBackend, CpuTrainingBackend};
use salt_cv::config::TrainingConfig;
use salt_cv::dataset::folds::{FoldAssignment, NUM_FOLDS};
use salt_cv::inference::{evaluate_fold, EnsembleReport};
use salt_cv::model::ModelVariant;
use salt_cv::training::{run_cross_validation, CrossValidationReport};
use salt_cv::utils::format_duration;
use salt_cv::utils::logging::{init_logging, LogConfig, LogLevel};

/// Cross-validated snapshot-ensemble training for salt segmentation
#[derive(Parser, Debug)]
#[command(name = "salt_cv")]
#[command(version = "0.1.0")]
#[command(about = "5-fold snapshot-ensemble salt segmentation with Burn", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true, default_value = "false")]
    verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true, default_value = "false", conflicts_with = "verbose")]
    quiet: bool,

    /// Log level (trace, debug, info, warn, error); overrides --verbose/--quiet
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// TOML configuration file; flags override its values
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    fn log_config(&self) -> LogConfig {
        let mut log_config = if self.verbose {
            LogConfig::verbose()
        } else if self.quiet {
            LogConfig::quiet()
        } else {
            LogConfig::default()
        };
        if let Some(level) = &self.log_level {
            log_config.level = LogLevel::parse(level);
        }
        log_config
    }
}

/// Flags that override the configuration file
#[derive(clap::Args, Debug)]
struct Overrides {
    /// Data directory holding ids, folds, images and masks
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Output directory for snapshots
    #[arg(short, long)]
    save_dir: Option<PathBuf>,

    /// Network variant (unet, unet-wide, unet-aux)
    #[arg(short, long)]
    model: Option<ModelVariant>,

    /// Number of epochs per fold
    #[arg(short, long)]
    epochs: Option<usize>,

    /// Number of snapshots (cosine cycles) per fold
    #[arg(long)]
    snapshots: Option<usize>,

    /// Batch size
    #[arg(short, long)]
    batch_size: Option<usize>,

    /// Learning rate at the start of every cycle
    #[arg(long)]
    max_lr: Option<f64>,

    /// Learning rate floor of the cosine schedule
    #[arg(long)]
    min_lr: Option<f64>,

    /// Side of the labeled images and masks
    #[arg(long)]
    fine_size: Option<usize>,

    /// Padding added on the top/left edge
    #[arg(long)]
    pad_left: Option<usize>,

    /// Padding added on the bottom/right edge
    #[arg(long)]
    pad_right: Option<usize>,

    /// SGD momentum
    #[arg(long)]
    momentum: Option<f64>,

    /// SGD weight decay
    #[arg(long)]
    weight_decay: Option<f64>,

    /// Merge pseudo-labels and train with auxiliary losses (`--pseudo false` turns it off)
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    pseudo: Option<bool>,

    /// Checkpoint every fold starts from
    #[arg(long)]
    pretrained: Option<PathBuf>,

    /// Use CUDA backend
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    cuda: Option<bool>,

    /// Random seed for shuffling and augmentation
    #[arg(long)]
    seed: Option<u64>,

    /// Flip and brightness augmentation (`--augment false` disables it)
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    augment: Option<bool>,

    /// Only run these folds (comma separated)
    #[arg(long, value_delimiter = ',')]
    folds: Option<Vec<usize>>,
}

impl Overrides {
    fn apply(self, config: &mut TrainingConfig) {
        if let Some(data_dir) = self.data_dir {
            config.data.data_dir = data_dir;
        }
        if let Some(save_dir) = self.save_dir {
            config.save_dir = save_dir;
        }
        if let Some(model) = self.model {
            config.model = model;
        }
        if let Some(epochs) = self.epochs {
            config.epochs = epochs;
        }
        if let Some(snapshots) = self.snapshots {
            config.snapshots = snapshots;
        }
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        if let Some(max_lr) = self.max_lr {
            config.max_lr = max_lr;
        }
        if let Some(min_lr) = self.min_lr {
            config.min_lr = min_lr;
        }
        if let Some(fine_size) = self.fine_size {
            config.fine_size = fine_size;
        }
        if let Some(pad_left) = self.pad_left {
            config.pad_left = pad_left;
        }
        if let Some(pad_right) = self.pad_right {
            config.pad_right = pad_right;
        }
        if let Some(momentum) = self.momentum {
            config.momentum = momentum;
        }
        if let Some(weight_decay) = self.weight_decay {
            config.weight_decay = weight_decay;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if self.pretrained.is_some() {
            config.pretrained = self.pretrained;
        }
        if self.folds.is_some() {
            config.folds = self.folds;
        }
        if let Some(pseudo) = self.pseudo {
            config.pseudo = pseudo;
        }
        if let Some(cuda) = self.cuda {
            config.cuda = cuda;
        }
        if let Some(augment) = self.augment {
            config.augment = augment;
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Train every fold with snapshot ensembling
    Train {
        #[command(flatten)]
        overrides: Overrides,
    },

    /// Show fold sizes and check the split invariants
    Folds {
        #[command(flatten)]
        overrides: Overrides,
    },

    /// Evaluate the snapshot ensemble of one fold
    Evaluate {
        /// Fold index (0-4)
        #[arg(short, long)]
        fold: usize,

        #[command(flatten)]
        overrides: Overrides,
    },

    /// Print the effective configuration as TOML
    Config {
        #[command(flatten)]
        overrides: Overrides,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let _ = init_logging(&cli.log_config());

    let mut config = match &cli.config {
        Some(path) => TrainingConfig::from_toml_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => TrainingConfig::default(),
    };

    match cli.command {
        Commands::Train { overrides } => {
            overrides.apply(&mut config);
            print_banner();
            cmd_train(&config)?;
        }
        Commands::Folds { overrides } => {
            overrides.apply(&mut config);
            cmd_folds(&config)?;
        }
        Commands::Evaluate { fold, overrides } => {
            overrides.apply(&mut config);
            print_banner();
            cmd_evaluate(&config, fold)?;
        }
        Commands::Config { overrides } => {
            overrides.apply(&mut config);
            print!("{}", config.to_toml_string()?);
        }
    }

    Ok(())
}

fn print_banner() {
    println!(
        "{}",
        r#"
 ╔══════════════════════════════════════════════════════════════╗
 ║   Salt CV                                                    ║
 ║   5-fold snapshot-ensemble salt segmentation with Burn       ║
 ╚══════════════════════════════════════════════════════════════╝
  "#
        .green()
    );
}

fn print_config(config: &TrainingConfig) {
    println!("{}", "Configuration".cyan().bold());
    println!("  Backend:      {}", backend_name(config.cuda));
    println!("  Model:        {}", config.model);
    println!(
        "  Input:        {} (fine {} + pad {}/{})",
        config.padded_size(),
        config.fine_size,
        config.pad_left,
        config.pad_right
    );
    println!(
        "  Schedule:     {} epochs, {} snapshots of {} epochs",
        config.epochs,
        config.snapshots,
        config.cycle_len()
    );
    println!(
        "  SGD:          lr {} -> {}, momentum {}, weight decay {}",
        config.max_lr, config.min_lr, config.momentum, config.weight_decay
    );
    println!("  Batch size:   {}", config.batch_size);
    println!("  Pseudo:       {}", config.pseudo);
    println!("  Folds:        {:?}", config.fold_indices());
    println!("  Save dir:     {}", config.save_dir.display());
    println!();
}

fn cmd_train(config: &TrainingConfig) -> Result<()> {
    config.validate().context("invalid configuration")?;
    print_config(config);

    let start = std::time::Instant::now();
    let report = if config.cuda {
        train_on_gpu(config)?
    } else {
        run_cross_validation::<CpuTrainingBackend>(config, &cpu_device())?
    };

    print_training_summary(&report);
    println!(
        "{} {}",
        "Total time:".green().bold(),
        format_duration(start.elapsed().as_secs_f64())
    );
    Ok(())
}

#[cfg(feature = "cuda")]
fn train_on_gpu(config: &TrainingConfig) -> Result<CrossValidationReport> {
    use salt_cv::backend::{gpu_device, GpuTrainingBackend};
    Ok(run_cross_validation::<GpuTrainingBackend>(config, &gpu_device())?)
}

#[cfg(not(feature = "cuda"))]
fn train_on_gpu(_config: &TrainingConfig) -> Result<CrossValidationReport> {
    bail!("cuda = true but this binary was built without the `cuda` feature")
}

fn print_training_summary(report: &CrossValidationReport) {
    println!();
    println!("{}", "Training summary".cyan().bold());
    for fold in &report.folds {
        println!(
            "  Fold {}: {} train ({} pseudo) / {} val, {} snapshots",
            fold.fold,
            fold.train_size,
            fold.pseudo_size,
            fold.val_size,
            fold.snapshots.len()
        );
        for snapshot in &fold.snapshots {
            println!(
                "    snapshot {} <- epoch {:>4}  val_accuracy {:.4}  {}",
                snapshot.index,
                snapshot.epoch,
                snapshot.val_accuracy,
                snapshot.path.display()
            );
        }
    }
    if let Some(mean) = report.mean_best_accuracy() {
        println!(
            "  {} {:.4}",
            "Mean best snapshot accuracy:".green().bold(),
            mean
        );
    }
}

fn cmd_folds(config: &TrainingConfig) -> Result<()> {
    let assignment = FoldAssignment::from_csv(&config.data.ids_path(), &config.data.folds_path())
        .context("loading fold assignment")?;
    info!("Loaded {} ids", assignment.all_ids().len());

    println!("{}", "Fold assignment".cyan().bold());
    println!("  Total ids: {}", assignment.all_ids().len());

    let mut all_ok = true;
    for fold in 0..NUM_FOLDS {
        let split = assignment.split(fold)?;
        let ok = split.is_disjoint() && split.covers(assignment.all_ids());
        all_ok &= ok;

        let status = if ok { "ok".green() } else { "OVERLAP".red() };
        println!(
            "  Fold {}: {:>6} train / {:>6} val  [{}]",
            fold,
            split.train_ids.len(),
            split.val_ids.len(),
            status
        );
    }

    if !all_ok {
        bail!("fold splits violate disjointness or coverage");
    }
    Ok(())
}

fn cmd_evaluate(config: &TrainingConfig, fold: usize) -> Result<()> {
    if fold >= NUM_FOLDS {
        bail!("fold {} is outside [0, {})", fold, NUM_FOLDS);
    }
    info!("Evaluating fold {} on {}", fold, backend_name(config.cuda));

    let report = if config.cuda {
        evaluate_on_gpu(config, fold)?
    } else {
        evaluate_fold::<CpuBackend>(config, fold, &cpu_device())?
    };

    println!("{}", format!("Fold {} ensemble", report.fold).cyan().bold());
    println!("  Validation images: {}", report.num_images);
    for score in &report.snapshot_scores {
        println!(
            "  snapshot {}: precision {:.4}  loss {:.4}",
            score.snapshot, score.precision, score.loss
        );
    }
    println!(
        "  {} {:.4}",
        "Ensemble precision:".green().bold(),
        report.ensemble_precision
    );
    Ok(())
}

#[cfg(feature = "cuda")]
fn evaluate_on_gpu(config: &TrainingConfig, fold: usize) -> Result<EnsembleReport> {
    use salt_cv::backend::{gpu_device, GpuBackend};
    Ok(evaluate_fold::<GpuBackend>(config, fold, &gpu_device())?)
}

#[cfg(not(feature = "cuda"))]
fn evaluate_on_gpu(_config: &TrainingConfig, _fold: usize) -> Result<EnsembleReport> {
    bail!("cuda = true but this binary was built without the `cuda` feature")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("salt_cv").chain(args.iter().copied())).unwrap()
    }

    fn applied(args: &[&str], mut config: TrainingConfig) -> TrainingConfig {
        match parse(args).command {
            Commands::Train { overrides } => overrides.apply(&mut config),
            other => panic!("expected train, got {:?}", other),
        }
        config
    }

    #[test]
    fn test_geometry_and_optimizer_flags() {
        let config = applied(
            &[
                "train",
                "--fine-size",
                "1",
                "--pad-left",
                "2",
                "--pad-right",
                "3",
                "--momentum",
                "0.5",
                "--weight-decay",
                "0.001",
            ],
            TrainingConfig::default(),
        );
        assert_eq!(config.fine_size, 1);
        assert_eq!(config.pad_left, 2);
        assert_eq!(config.pad_right, 3);
        assert_eq!(config.momentum, 0.5);
        assert_eq!(config.weight_decay, 0.001);
    }

    #[test]
    fn test_absent_flags_keep_file_values() {
        let from_file = TrainingConfig {
            pseudo: true,
            cuda: true,
            augment: false,
            momentum: 0.8,
            ..Default::default()
        };
        let config = applied(&["train"], from_file);
        assert!(config.pseudo);
        assert!(config.cuda);
        assert!(!config.augment);
        assert_eq!(config.momentum, 0.8);
    }

    #[test]
    fn test_boolean_flags_turn_file_values_off() {
        let from_file = TrainingConfig {
            pseudo: true,
            cuda: true,
            augment: true,
            ..Default::default()
        };
        let config = applied(
            &["train", "--pseudo", "false", "--cuda=false", "--augment", "false"],
            from_file,
        );
        assert!(!config.pseudo);
        assert!(!config.cuda);
        assert!(!config.augment);
    }

    #[test]
    fn test_bare_boolean_flag_enables() {
        let config = applied(&["train", "--augment", "--pseudo"], TrainingConfig {
            augment: false,
            ..Default::default()
        });
        assert!(config.pseudo);
        assert!(config.augment);
    }

    #[test]
    fn test_log_flags() {
        assert_eq!(parse(&["train"]).log_config().level, LogLevel::Info);
        assert_eq!(parse(&["-v", "train"]).log_config().level, LogLevel::Debug);
        assert_eq!(parse(&["--quiet", "train"]).log_config().level, LogLevel::Error);
        assert_eq!(
            parse(&["train", "--log-level", "warn"]).log_config().level,
            LogLevel::Warn
        );
        assert!(Cli::try_parse_from(["salt_cv", "-v", "-q", "train"]).is_err());
    }
}
