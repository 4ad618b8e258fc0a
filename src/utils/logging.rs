//! Logging Module
//!
//! Structured logging with the `tracing` crate, plus a small fold/epoch
//! progress logger used by the cross-validation loop.

use std::time::Instant;

use tracing::Level;
use tracing_subscriber::{filter::LevelFilter, fmt, prelude::*, EnvFilter};

use crate::utils::error::{Result, SaltError};

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum log level to display
    pub level: LogLevel,
    /// Whether to include target (module path)
    pub include_target: bool,
    /// Whether to include thread IDs
    pub include_thread_ids: bool,
    /// Whether to use ANSI colors
    pub ansi_colors: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            include_target: false,
            include_thread_ids: false,
            ansi_colors: true,
        }
    }
}

impl LogConfig {
    /// Create a verbose logging config for debugging
    pub fn verbose() -> Self {
        Self {
            level: LogLevel::Debug,
            include_target: true,
            include_thread_ids: true,
            ansi_colors: true,
        }
    }

    /// Create a quiet logging config (errors only)
    pub fn quiet() -> Self {
        Self {
            level: LogLevel::Error,
            include_target: false,
            include_thread_ids: false,
            ansi_colors: true,
        }
    }
}

/// Log level enum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Convert to tracing Level
    pub fn to_tracing_level(&self) -> Level {
        match self {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }

    /// Parse a level name, falling back to `Info`
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "trace" => LogLevel::Trace,
            "debug" => LogLevel::Debug,
            "info" => LogLevel::Info,
            "warn" | "warning" => LogLevel::Warn,
            "error" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "trace"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

/// Initialize logging with the given configuration
///
/// `RUST_LOG` takes precedence over `config.level` when it is set.
pub fn init_logging(config: &LogConfig) -> Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(config.level.to_tracing_level()).into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .compact()
                .with_ansi(config.ansi_colors)
                .with_target(config.include_target)
                .with_thread_ids(config.include_thread_ids),
        )
        .with(filter)
        .try_init()
        .map_err(|e| SaltError::Config(format!("Failed to initialize logging: {e}")))?;

    Ok(())
}

/// Fold/epoch progress logger for cross-validated training
pub struct TrainingLogger {
    fold: usize,
    epoch: usize,
    total_epochs: usize,
    epoch_start: Instant,
    fold_start: Instant,
}

impl TrainingLogger {
    /// Create a new training logger for one fold
    pub fn new(fold: usize, total_epochs: usize) -> Self {
        Self {
            fold,
            epoch: 0,
            total_epochs,
            epoch_start: Instant::now(),
            fold_start: Instant::now(),
        }
    }

    /// Log start of an epoch
    pub fn start_epoch(&mut self, epoch: usize, learning_rate: f64) {
        self.epoch = epoch;
        self.epoch_start = Instant::now();

        tracing::debug!(
            "Fold {} epoch {}/{} started (lr {:.6})",
            self.fold,
            epoch + 1,
            self.total_epochs,
            learning_rate
        );
    }

    /// Log end of an epoch with timing and ETA for the fold
    pub fn end_epoch(&self, val_accuracy: f64) {
        let epoch_time = self.epoch_start.elapsed();
        let total_time = self.fold_start.elapsed();

        let epochs_remaining = self.total_epochs.saturating_sub(self.epoch + 1);
        let avg_epoch_time = total_time.as_secs_f64() / (self.epoch + 1) as f64;
        let eta_secs = epochs_remaining as f64 * avg_epoch_time;

        tracing::debug!(
            "Fold {} epoch {}/{} took {:.1}s | val accuracy {:.4} | fold ETA {:.0}s",
            self.fold,
            self.epoch + 1,
            self.total_epochs,
            epoch_time.as_secs_f64(),
            val_accuracy,
            eta_secs
        );
    }

    /// Log a saved snapshot
    pub fn log_snapshot(&self, snapshot: usize, epoch: usize, accuracy: f64) {
        tracing::info!(
            "Fold {} snapshot {} saved from epoch {} (val accuracy {:.4})",
            self.fold,
            snapshot,
            epoch + 1,
            accuracy
        );
    }

    /// Log fold completion
    pub fn log_complete(&self, snapshots: usize) {
        tracing::info!(
            "Fold {} complete: {} epochs, {} snapshots in {:.1}s",
            self.fold,
            self.total_epochs,
            snapshots,
            self.fold_start.elapsed().as_secs_f64()
        );
    }
}
