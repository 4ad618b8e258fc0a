//! Image/mask loading for labeled and pseudo-labeled samples
//!
//! Every sample is a pair of 8-bit grayscale PNGs with the same id: the
//! seismic image and its salt mask. Images are scaled to [0, 1]; masks are
//! binarized at 0.5. Decoding runs in parallel with rayon.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;

use crate::config::DataConfig;
use crate::dataset::folds::{read_ids, SampleId};
use crate::utils::error::{Result, SaltError};

/// One decoded sample at fine (unpadded) resolution
#[derive(Debug, Clone)]
pub struct SaltSample {
    pub id: SampleId,
    /// Row-major `fine_size x fine_size` intensities in [0, 1]
    pub image: Vec<f32>,
    /// Row-major `fine_size x fine_size` values in {0, 1}
    pub mask: Vec<f32>,
}

impl SaltSample {
    /// Image-level label: 1.0 when the mask has any salt pixel
    pub fn label(&self) -> f32 {
        if self.mask.iter().any(|&m| m > 0.5) {
            1.0
        } else {
            0.0
        }
    }

    /// Load an image/mask pair, checking both are `fine_size` square
    pub fn load(id: SampleId, image_path: &Path, mask_path: &Path, fine_size: usize) -> Result<Self> {
        let image = read_grayscale(image_path, fine_size)?;
        let mask = read_grayscale(mask_path, fine_size)?
            .into_iter()
            .map(|v| if v > 0.5 { 1.0 } else { 0.0 })
            .collect();

        Ok(Self { id, image, mask })
    }
}

/// Decode a PNG as grayscale scaled to [0, 1]
pub fn read_grayscale(path: &Path, fine_size: usize) -> Result<Vec<f32>> {
    let img = image::open(path)
        .map_err(|e| SaltError::Image(path.to_path_buf(), e.to_string()))?
        .to_luma8();

    let (width, height) = img.dimensions();
    if width as usize != fine_size || height as usize != fine_size {
        return Err(SaltError::shape_mismatch(
            format!("{fine_size}x{fine_size} image"),
            format!("{width}x{height} at {}", path.display()),
        ));
    }

    Ok(img.into_raw().into_iter().map(|p| p as f32 / 255.0).collect())
}

fn progress_bar(total: usize) -> ProgressBar {
    let pb = ProgressBar::new(total as u64);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("  {spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})")
    {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb
}

/// Load many samples in parallel, keeping the order of `ids`
///
/// Any unreadable or mis-sized file fails the whole load.
pub fn load_samples<F>(ids: &[SampleId], paths: F, fine_size: usize) -> Result<Vec<SaltSample>>
where
    F: Fn(&SampleId) -> (PathBuf, PathBuf) + Sync,
{
    let pb = progress_bar(ids.len());
    let loaded = AtomicUsize::new(0);

    let samples = ids
        .par_iter()
        .map(|id| {
            let (image_path, mask_path) = paths(id);
            let sample = SaltSample::load(id.clone(), &image_path, &mask_path, fine_size);
            let count = loaded.fetch_add(1, Ordering::Relaxed) + 1;
            if count % 100 == 0 {
                pb.set_position(count as u64);
            }
            sample
        })
        .collect::<Result<Vec<_>>>();

    pb.finish_and_clear();
    let samples = samples?;
    tracing::debug!("Loaded {} samples", samples.len());
    Ok(samples)
}

/// Load labeled training/validation samples
pub fn load_labeled(data: &DataConfig, ids: &[SampleId], fine_size: usize) -> Result<Vec<SaltSample>> {
    load_samples(
        ids,
        |id| (data.image_path(id.as_str()), data.mask_path(id.as_str())),
        fine_size,
    )
}

/// Load the pseudo-labeled set attached to one fold
pub fn load_pseudo(data: &DataConfig, fold: usize, fine_size: usize) -> Result<Vec<SaltSample>> {
    let ids_path = data.pseudo_ids_path(fold);
    if !ids_path.exists() {
        return Err(SaltError::Dataset(format!(
            "pseudo-label id list for fold {} not found at {}",
            fold,
            ids_path.display()
        )));
    }

    let ids = read_ids(&ids_path)?;
    tracing::info!("Fold {}: {} pseudo-labeled samples", fold, ids.len());

    load_samples(
        &ids,
        |id| {
            (
                data.pseudo_image_path(id.as_str()),
                data.pseudo_mask_path(id.as_str()),
            )
        },
        fine_size,
    )
}
