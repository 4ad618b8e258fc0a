//! Model Configuration Module
//!
//! Named U-Net variants and the burn configuration they expand to.

use std::fmt;
use std::str::FromStr;

use burn::config::Config;
use serde::{Deserialize, Serialize};

use crate::utils::error::SaltError;

/// Number of pooling stages in every variant
pub const UNET_DEPTH: usize = 4;

/// Model architecture selectable from the CLI and config file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelVariant {
    /// Base 16 filters, main head only
    #[default]
    Unet,
    /// Base 32 filters, main head only
    UnetWide,
    /// Base 32 filters plus pixel and image auxiliary heads
    UnetAux,
}

impl ModelVariant {
    /// All known variants
    pub const ALL: [ModelVariant; 3] = [
        ModelVariant::Unet,
        ModelVariant::UnetWide,
        ModelVariant::UnetAux,
    ];

    /// Name used in checkpoint file names and on the command line
    pub fn name(&self) -> &'static str {
        match self {
            ModelVariant::Unet => "unet",
            ModelVariant::UnetWide => "unet-wide",
            ModelVariant::UnetAux => "unet-aux",
        }
    }

    /// Whether the variant produces pixel and image auxiliary logits
    pub fn has_aux_heads(&self) -> bool {
        matches!(self, ModelVariant::UnetAux)
    }

    /// Filters in the first encoder stage
    pub fn base_filters(&self) -> usize {
        match self {
            ModelVariant::Unet => 16,
            ModelVariant::UnetWide | ModelVariant::UnetAux => 32,
        }
    }

    /// Network configuration for this variant
    pub fn net_config(&self) -> SaltNetConfig {
        SaltNetConfig::new()
            .with_base_filters(self.base_filters())
            .with_aux_heads(self.has_aux_heads())
    }
}

impl fmt::Display for ModelVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ModelVariant {
    type Err = SaltError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ModelVariant::ALL
            .into_iter()
            .find(|v| v.name() == s.to_lowercase())
            .ok_or_else(|| {
                let known: Vec<_> = ModelVariant::ALL.iter().map(|v| v.name()).collect();
                SaltError::Config(format!(
                    "unknown model variant '{}' (expected one of: {})",
                    s,
                    known.join(", ")
                ))
            })
    }
}

/// Configuration for the SaltNet U-Net
#[derive(Config, Debug)]
pub struct SaltNetConfig {
    /// Number of input channels (grayscale seismic images)
    #[config(default = "1")]
    pub in_channels: usize,

    /// Filters in the first encoder stage; doubled at every pooling stage
    #[config(default = "16")]
    pub base_filters: usize,

    /// Number of pooling stages
    #[config(default = "4")]
    pub depth: usize,

    /// Whether to build the pixel and image auxiliary heads
    #[config(default = "false")]
    pub aux_heads: bool,
}

impl SaltNetConfig {
    /// Input side must be divisible by this so every skip connection lines up
    pub fn size_divisor(&self) -> usize {
        1 << self.depth
    }
}
