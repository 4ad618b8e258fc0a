//! Model module for salt segmentation networks using the Burn framework
//!
//! - U-Net architecture with optional auxiliary heads
//! - Named variants and their configuration

pub mod config;
pub mod unet;

pub use config::{ModelVariant, SaltNetConfig, UNET_DEPTH};
pub use unet::{SaltNet, SaltOutput};
