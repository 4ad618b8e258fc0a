//! Epoch-level training and validation passes
//!
//! A manual loop over burn's autodiff: items are gathered lazily per batch
//! from shuffled indices, so only one batch lives on the device at a time.
//! Validation runs on the inner (non-autodiff) model and scores the
//! concatenated predictions of the whole validation set at once.

use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::module::AutodiffModule;
use burn::optim::{GradientsParams, Optimizer};
use burn::prelude::*;
use burn::tensor::activation::sigmoid;
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::ElementConversion;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;

use crate::config::TrainingConfig;
use crate::dataset::augmentation::{AugmentationConfig, Augmenter};
use crate::dataset::burn_dataset::{DatasetMode, SaltBatch, SaltBatcher, SaltDataset};
use crate::model::SaltNet;
use crate::training::loss::{crop_to_fine, lovasz_hinge, LossMode, SegmentationLoss};
use crate::utils::error::{Result, SaltError};
use crate::utils::metrics::{SegmentationMetrics, BINARY_THRESHOLD};

/// Sigmoid probabilities of a validation set plus its size-weighted loss
#[derive(Debug, Clone)]
pub struct Predictions {
    /// Cropped `fine_size x fine_size` probabilities, concatenated in sample order
    pub probabilities: Vec<f32>,
    /// Size-weighted average Lovász loss
    pub loss: f64,
    pub num_images: usize,
}

/// Result of one validation pass
#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    pub loss: f64,
    /// Mean salt precision over the whole validation set
    pub accuracy: f64,
    pub metrics: SegmentationMetrics,
}

fn scalar<B: Backend>(tensor: Tensor<B, 1>) -> f64 {
    tensor.into_scalar().elem::<f64>()
}

/// Forward a validation dataset and collect cropped probabilities
pub fn predict<B: Backend>(
    model: &SaltNet<B>,
    dataset: &SaltDataset,
    batch_size: usize,
    device: &B::Device,
) -> Result<Predictions> {
    if dataset.mode() != DatasetMode::Validation {
        return Err(SaltError::Training(
            "predictions need a validation-mode dataset (fine-size masks)".to_string(),
        ));
    }

    let padding = dataset.padding();
    let batcher = SaltBatcher::new();
    let indices: Vec<usize> = (0..dataset.len()).collect();

    let mut probabilities = Vec::with_capacity(dataset.len() * padding.fine_size * padding.fine_size);
    let mut loss_sum = 0.0;

    for chunk in indices.chunks(batch_size.max(1)) {
        let items: Vec<_> = chunk.iter().filter_map(|&i| dataset.get(i)).collect();
        let batch: SaltBatch<B> = batcher.batch(items, device);
        let [n, _, _, _] = batch.images.dims();

        let logit = crop_to_fine(model.forward(batch.images).logit, padding);
        loss_sum += scalar(lovasz_hinge(logit.clone(), batch.masks)?) * n as f64;

        let probs = sigmoid(logit)
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|e| SaltError::Training(format!("failed to read predictions: {e:?}")))?;
        probabilities.extend(probs);
    }

    let num_images = dataset.len();
    Ok(Predictions {
        probabilities,
        loss: loss_sum / num_images.max(1) as f64,
        num_images,
    })
}

/// Predict and score a validation set
pub fn validate_model<B: Backend>(
    model: &SaltNet<B>,
    dataset: &SaltDataset,
    batch_size: usize,
    device: &B::Device,
) -> Result<ValidationOutcome> {
    if dataset.is_empty() {
        return Err(SaltError::Dataset("validation set is empty".to_string()));
    }

    let predictions = predict(model, dataset, batch_size, device)?;
    let fine = dataset.padding().fine_size;
    let metrics = SegmentationMetrics::compute(
        &predictions.probabilities,
        &dataset.fine_masks(),
        fine * fine,
        BINARY_THRESHOLD,
    )?;

    Ok(ValidationOutcome {
        loss: predictions.loss,
        accuracy: metrics.mean_precision,
        metrics,
    })
}

/// Runs training and validation passes for one fold
pub struct Trainer<B: AutodiffBackend> {
    device: B::Device,
    batch_size: usize,
    loss: SegmentationLoss,
    augmenter: Option<Augmenter>,
}

impl<B: AutodiffBackend> Trainer<B> {
    pub fn new(config: &TrainingConfig, device: B::Device) -> Self {
        let augmenter = config
            .augment
            .then(|| Augmenter::new(AugmentationConfig::default()));

        Self {
            device,
            batch_size: config.batch_size,
            loss: SegmentationLoss::new(LossMode::from_pseudo(config.pseudo)),
            augmenter,
        }
    }

    pub fn loss_mode(&self) -> LossMode {
        self.loss.mode()
    }

    /// One pass over the training set in shuffled order
    ///
    /// Returns the updated model and the size-weighted average loss.
    pub fn train_epoch<O>(
        &self,
        mut model: SaltNet<B>,
        optimizer: &mut O,
        learning_rate: f64,
        dataset: &SaltDataset,
        rng: &mut ChaCha8Rng,
    ) -> Result<(SaltNet<B>, f64)>
    where
        O: Optimizer<SaltNet<B>, B>,
    {
        if dataset.is_empty() {
            return Err(SaltError::Dataset("training set is empty".to_string()));
        }
        if dataset.mode() != DatasetMode::Train {
            return Err(SaltError::Training(
                "training pass needs a train-mode dataset (padded masks)".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(SaltError::Config("batch_size must be greater than 0".to_string()));
        }
        if self.loss.mode() == LossMode::Auxiliary && !model.has_aux_heads() {
            return Err(SaltError::Training(
                "auxiliary loss needs a model with pixel and image heads".to_string(),
            ));
        }

        let batcher = SaltBatcher::new();
        let mut indices: Vec<usize> = (0..dataset.len()).collect();
        indices.shuffle(rng);

        let num_batches = indices.len().div_ceil(self.batch_size);
        let mut loss_sum = 0.0;

        for (batch_idx, chunk) in indices.chunks(self.batch_size).enumerate() {
            let items: Vec<_> = chunk
                .iter()
                .filter_map(|&i| match &self.augmenter {
                    Some(augmenter) => dataset.item(i, Some((augmenter, &mut *rng))),
                    None => dataset.item(i, None),
                })
                .collect();
            let n = items.len();

            let batch: SaltBatch<B> = batcher.batch(items, &self.device);
            let output = model.forward(batch.images);
            let terms = self.loss.forward(output, batch.masks, batch.labels)?;

            let loss_value = scalar(terms.total.clone());
            if !loss_value.is_finite() {
                return Err(SaltError::Training(format!(
                    "loss became {} at batch {}",
                    loss_value,
                    batch_idx + 1
                )));
            }
            loss_sum += loss_value * n as f64;

            let grads = terms.total.backward();
            let grads = GradientsParams::from_grads(grads, &model);
            model = optimizer.step(learning_rate, model, grads);

            if (batch_idx + 1) % 20 == 0 || batch_idx + 1 == num_batches {
                tracing::debug!(
                    "  batch {:>4}/{}: loss = {:.4}",
                    batch_idx + 1,
                    num_batches,
                    loss_value
                );
            }
        }

        Ok((model, loss_sum / dataset.len() as f64))
    }

    /// Validation pass on the inner model
    pub fn validate(&self, model: &SaltNet<B>, dataset: &SaltDataset) -> Result<ValidationOutcome> {
        validate_model::<B::InnerBackend>(&model.valid(), dataset, self.batch_size, &self.device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::augmentation::Padding;
    use crate::dataset::loader::SaltSample;
    use crate::model::SaltNetConfig;
    use burn::backend::Autodiff;
    use burn::optim::SgdConfig;
    use burn_ndarray::NdArray;
    use rand::SeedableRng;

    type TestBackend = NdArray;
    type TestAutodiff = Autodiff<NdArray>;

    fn samples(count: usize, fine: usize) -> Vec<SaltSample> {
        (0..count)
            .map(|i| {
                let mut mask = vec![0.0; fine * fine];
                if i % 2 == 0 {
                    for m in mask.iter_mut().take(fine * fine / 2) {
                        *m = 1.0;
                    }
                }
                SaltSample {
                    id: format!("s{i}").as_str().into(),
                    image: (0..fine * fine).map(|p| (p % 7) as f32 / 7.0).collect(),
                    mask,
                }
            })
            .collect()
    }

    fn small_model<B: Backend>(device: &B::Device) -> SaltNet<B> {
        SaltNetConfig::new()
            .with_base_filters(2)
            .with_depth(2)
            .init::<B>(device)
    }

    #[test]
    fn test_predict_crops_to_fine_size() {
        let device = Default::default();
        let padding = Padding::new(6, 1, 1);
        let dataset = SaltDataset::new(samples(3, 6), padding, DatasetMode::Validation);
        let model = small_model::<TestBackend>(&device);

        let predictions = predict(&model, &dataset, 2, &device).unwrap();
        assert_eq!(predictions.num_images, 3);
        assert_eq!(predictions.probabilities.len(), 3 * 36);
        assert!(predictions
            .probabilities
            .iter()
            .all(|p| (0.0..=1.0).contains(p)));
        assert!(predictions.loss.is_finite());
    }

    #[test]
    fn test_predict_rejects_train_mode() {
        let device = Default::default();
        let dataset = SaltDataset::new(samples(1, 4), Padding::new(4, 0, 0), DatasetMode::Train);
        let model = small_model::<TestBackend>(&device);
        assert!(predict(&model, &dataset, 1, &device).is_err());
    }

    #[test]
    fn test_validation_accuracy_is_over_whole_set() {
        let device = Default::default();
        let padding = Padding::new(4, 0, 0);
        let dataset = SaltDataset::new(samples(5, 4), padding, DatasetMode::Validation);
        let model = small_model::<TestBackend>(&device);

        // Batch size must not change the metric
        let a = validate_model(&model, &dataset, 1, &device).unwrap();
        let b = validate_model(&model, &dataset, 5, &device).unwrap();
        assert_eq!(a.metrics.num_images, 5);
        assert!((a.accuracy - b.accuracy).abs() < 1e-9);
        assert!((a.loss - b.loss).abs() < 1e-4);
    }

    #[test]
    fn test_train_epoch_runs() {
        let device = Default::default();
        let config = TrainingConfig {
            batch_size: 2,
            augment: true,
            ..Default::default()
        };
        let padding = Padding::new(6, 1, 1);
        let train = SaltDataset::new(samples(5, 6), padding, DatasetMode::Train);
        let val = SaltDataset::new(samples(2, 6), padding, DatasetMode::Validation);

        let trainer = Trainer::<TestAutodiff>::new(&config, device);
        assert_eq!(trainer.loss_mode(), LossMode::Single);

        let model = small_model::<TestAutodiff>(&Default::default());
        let mut optimizer = SgdConfig::new().init::<TestAutodiff, SaltNet<TestAutodiff>>();
        let mut rng = ChaCha8Rng::seed_from_u64(0);

        let (model, loss) = trainer
            .train_epoch(model, &mut optimizer, 0.01, &train, &mut rng)
            .unwrap();
        assert!(loss.is_finite());
        assert!(loss >= 0.0);

        let outcome = trainer.validate(&model, &val).unwrap();
        assert!((0.0..=1.0).contains(&outcome.accuracy));
    }

    #[test]
    fn test_empty_training_set_is_error() {
        let config = TrainingConfig::default();
        let trainer = Trainer::<TestAutodiff>::new(&config, Default::default());
        let model = small_model::<TestAutodiff>(&Default::default());
        let mut optimizer = SgdConfig::new().init::<TestAutodiff, SaltNet<TestAutodiff>>();
        let empty = SaltDataset::new(Vec::new(), Padding::new(4, 0, 0), DatasetMode::Train);
        let mut rng = ChaCha8Rng::seed_from_u64(0);

        assert!(trainer
            .train_epoch(model, &mut optimizer, 0.01, &empty, &mut rng)
            .is_err());
    }

    #[test]
    fn test_zero_batch_size_is_error() {
        let config = TrainingConfig {
            batch_size: 0,
            ..Default::default()
        };
        let trainer = Trainer::<TestAutodiff>::new(&config, Default::default());
        let model = small_model::<TestAutodiff>(&Default::default());
        let mut optimizer = SgdConfig::new().init::<TestAutodiff, SaltNet<TestAutodiff>>();
        let train = SaltDataset::new(samples(3, 4), Padding::new(4, 0, 0), DatasetMode::Train);
        let mut rng = ChaCha8Rng::seed_from_u64(0);

        let result = trainer.train_epoch(model, &mut optimizer, 0.01, &train, &mut rng);
        assert!(matches!(result, Err(SaltError::Config(_))));
    }

    #[test]
    fn test_auxiliary_loss_requires_aux_heads() {
        let config = TrainingConfig {
            batch_size: 2,
            pseudo: true,
            ..Default::default()
        };
        let trainer = Trainer::<TestAutodiff>::new(&config, Default::default());
        assert_eq!(trainer.loss_mode(), LossMode::Auxiliary);

        let model = small_model::<TestAutodiff>(&Default::default());
        assert!(!model.has_aux_heads());
        let mut optimizer = SgdConfig::new().init::<TestAutodiff, SaltNet<TestAutodiff>>();
        let train = SaltDataset::new(samples(3, 4), Padding::new(4, 0, 0), DatasetMode::Train);
        let mut rng = ChaCha8Rng::seed_from_u64(0);

        let result = trainer.train_epoch(model, &mut optimizer, 0.01, &train, &mut rng);
        assert!(matches!(result, Err(SaltError::Training(_))));
    }
}
