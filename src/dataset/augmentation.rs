//! Padding and Augmentation for Seismic Images
//!
//! Images are single-channel `side x side` buffers in row-major order.
//! Padding mirrors the image without repeating the border pixel
//! (reflect-101), so the network input side becomes
//! `fine_size + left + right`.
//!
//! # Augmentation Strategy
//!
//! - **Training**: horizontal flip (image and mask together) and brightness shift
//! - **Validation/Ensemble**: no augmentation

use rand::Rng;
use rand_chacha::ChaCha8Rng;

/// Reflect-101 padding geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Padding {
    /// Side of the unpadded image
    pub fine_size: usize,
    /// Rows/columns added on the top and left
    pub left: usize,
    /// Rows/columns added on the bottom and right
    pub right: usize,
}

impl Padding {
    pub fn new(fine_size: usize, left: usize, right: usize) -> Self {
        Self {
            fine_size,
            left,
            right,
        }
    }

    /// Side of the padded image
    pub fn padded_size(&self) -> usize {
        self.fine_size + self.left + self.right
    }

    /// Range of padded coordinates that map back onto the original image
    pub fn crop_range(&self) -> std::ops::Range<usize> {
        self.left..self.left + self.fine_size
    }

    /// Source coordinate of padded coordinate `p`
    fn source_index(&self, p: usize) -> usize {
        let n = self.fine_size as isize;
        let mut src = p as isize - self.left as isize;
        if src < 0 {
            src = -src;
        }
        if src >= n {
            src = 2 * (n - 1) - src;
        }
        src.clamp(0, n - 1) as usize
    }

    /// Pad a `fine_size x fine_size` buffer
    pub fn apply(&self, pixels: &[f32]) -> Vec<f32> {
        let side = self.padded_size();
        let sources: Vec<usize> = (0..side).map(|p| self.source_index(p)).collect();

        let mut out = Vec::with_capacity(side * side);
        for &sy in &sources {
            let row = &pixels[sy * self.fine_size..(sy + 1) * self.fine_size];
            out.extend(sources.iter().map(|&sx| row[sx]));
        }
        out
    }
}

/// Configuration for training augmentation
#[derive(Clone, Debug)]
pub struct AugmentationConfig {
    /// Probability of applying horizontal flip (0.0 - 1.0)
    pub horizontal_flip_prob: f32,
    /// Brightness adjustment range (±brightness_delta)
    pub brightness_delta: f32,
    /// Probability of applying brightness adjustment
    pub brightness_prob: f32,
}

impl Default for AugmentationConfig {
    fn default() -> Self {
        Self {
            horizontal_flip_prob: 0.5,
            brightness_delta: 0.1,
            brightness_prob: 0.5,
        }
    }
}

impl AugmentationConfig {
    /// Disable all augmentations
    pub fn none() -> Self {
        Self {
            horizontal_flip_prob: 0.0,
            brightness_delta: 0.0,
            brightness_prob: 0.0,
        }
    }
}

/// Applies random flips and brightness shifts to image/mask pairs
#[derive(Clone, Debug)]
pub struct Augmenter {
    config: AugmentationConfig,
}

impl Augmenter {
    pub fn new(config: AugmentationConfig) -> Self {
        Self { config }
    }

    /// Augment an image and its mask in place
    ///
    /// Both buffers are `side x side`. Geometric transforms touch both;
    /// photometric ones only the image.
    pub fn augment(&self, image: &mut [f32], mask: &mut [f32], side: usize, rng: &mut ChaCha8Rng) {
        if rng.gen::<f32>() < self.config.horizontal_flip_prob {
            flip_horizontal(image, side);
            flip_horizontal(mask, side);
        }

        if self.config.brightness_prob > 0.0 && rng.gen::<f32>() < self.config.brightness_prob {
            let delta = rng.gen_range(-self.config.brightness_delta..=self.config.brightness_delta);
            adjust_brightness(image, delta);
        }
    }
}

/// Mirror every row of a square buffer
pub fn flip_horizontal(pixels: &mut [f32], side: usize) {
    for row in pixels.chunks_mut(side) {
        row.reverse();
    }
}

/// Shift intensities by `delta`, clamped to [0, 1]
pub fn adjust_brightness(pixels: &mut [f32], delta: f32) {
    for p in pixels.iter_mut() {
        *p = (*p + delta).clamp(0.0, 1.0);
    }
}
