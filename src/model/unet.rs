//! U-Net Architecture for Salt Segmentation
//!
//! Encoder/decoder network with skip connections. Every stage is a double
//! 3x3 conv + BatchNorm + ReLU block; downsampling is 2x2 max pooling and
//! upsampling is a stride-2 transposed convolution followed by concatenation
//! with the matching encoder features.
//!
//! The auxiliary variant adds two heads used during pseudo-label training:
//! - a pixel head (1x1 conv on the last decoder features)
//! - an image head (global average pool of the bottleneck -> linear -> 1 logit)

use burn::{
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, Linear, LinearConfig, PaddingConfig2d, Relu,
    },
    tensor::{backend::Backend, Tensor},
};

use super::config::SaltNetConfig;

/// Two 3x3 conv + BatchNorm + ReLU layers
#[derive(Module, Debug)]
pub struct DoubleConv<B: Backend> {
    pub conv1: Conv2d<B>,
    pub bn1: BatchNorm<B>,
    pub conv2: Conv2d<B>,
    pub bn2: BatchNorm<B>,
    pub relu: Relu,
}

impl<B: Backend> DoubleConv<B> {
    pub fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        let conv1 = Conv2dConfig::new([in_channels, out_channels], [3, 3])
            .with_padding(PaddingConfig2d::Same)
            .init(device);
        let conv2 = Conv2dConfig::new([out_channels, out_channels], [3, 3])
            .with_padding(PaddingConfig2d::Same)
            .init(device);

        Self {
            conv1,
            bn1: BatchNormConfig::new(out_channels).init(device),
            conv2,
            bn2: BatchNormConfig::new(out_channels).init(device),
            relu: Relu::new(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.relu.forward(self.bn1.forward(self.conv1.forward(x)));
        self.relu.forward(self.bn2.forward(self.conv2.forward(x)))
    }
}

/// Transposed-conv upsampling followed by a double conv over `[up, skip]`
#[derive(Module, Debug)]
pub struct UpBlock<B: Backend> {
    pub up: ConvTranspose2d<B>,
    pub conv: DoubleConv<B>,
}

impl<B: Backend> UpBlock<B> {
    pub fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        let up = ConvTranspose2dConfig::new([in_channels, out_channels], [2, 2])
            .with_stride([2, 2])
            .init(device);

        Self {
            up,
            conv: DoubleConv::new(out_channels * 2, out_channels, device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>, skip: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.up.forward(x);
        self.conv.forward(Tensor::cat(vec![x, skip], 1))
    }
}

/// Logits produced by one forward pass
#[derive(Debug, Clone)]
pub struct SaltOutput<B: Backend> {
    /// Main segmentation logit `[batch, 1, H, W]`
    pub logit: Tensor<B, 4>,
    /// Auxiliary pixel logit `[batch, 1, H, W]`
    pub pixel_logit: Option<Tensor<B, 4>>,
    /// Auxiliary image-level "contains salt" logit `[batch, 1]`
    pub image_logit: Option<Tensor<B, 2>>,
}

/// Salt segmentation U-Net
#[derive(Module, Debug)]
pub struct SaltNet<B: Backend> {
    pub encoders: Vec<DoubleConv<B>>,
    pub pool: MaxPool2d,
    pub bottleneck: DoubleConv<B>,
    pub decoders: Vec<UpBlock<B>>,
    pub head: Conv2d<B>,

    // Auxiliary heads
    pub pixel_head: Option<Conv2d<B>>,
    pub image_pool: Option<AdaptiveAvgPool2d>,
    pub image_head: Option<Linear<B>>,
}

impl SaltNetConfig {
    /// Initialize a new SaltNet with random weights
    pub fn init<B: Backend>(&self, device: &B::Device) -> SaltNet<B> {
        let widths: Vec<usize> = (0..self.depth)
            .map(|stage| self.base_filters << stage)
            .collect();
        let bottom_width = self.base_filters << self.depth;

        let mut encoders = Vec::with_capacity(self.depth);
        let mut in_channels = self.in_channels;
        for &width in &widths {
            encoders.push(DoubleConv::new(in_channels, width, device));
            in_channels = width;
        }

        let bottleneck = DoubleConv::new(in_channels, bottom_width, device);

        let mut decoders = Vec::with_capacity(self.depth);
        let mut in_channels = bottom_width;
        for &width in widths.iter().rev() {
            decoders.push(UpBlock::new(in_channels, width, device));
            in_channels = width;
        }

        let head = Conv2dConfig::new([self.base_filters, 1], [1, 1]).init(device);

        let (pixel_head, image_pool, image_head) = if self.aux_heads {
            (
                Some(Conv2dConfig::new([self.base_filters, 1], [1, 1]).init(device)),
                Some(AdaptiveAvgPool2dConfig::new([1, 1]).init()),
                Some(LinearConfig::new(bottom_width, 1).init(device)),
            )
        } else {
            (None, None, None)
        };

        SaltNet {
            encoders,
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            bottleneck,
            decoders,
            head,
            pixel_head,
            image_pool,
            image_head,
        }
    }
}

impl<B: Backend> SaltNet<B> {
    /// Forward pass
    ///
    /// # Arguments
    /// * `input` - Images with shape `[batch, 1, H, W]`; H and W divisible by 2^depth
    pub fn forward(&self, input: Tensor<B, 4>) -> SaltOutput<B> {
        let mut skips = Vec::with_capacity(self.encoders.len());
        let mut x = input;
        for encoder in &self.encoders {
            x = encoder.forward(x);
            skips.push(x.clone());
            x = self.pool.forward(x);
        }

        let bottom = self.bottleneck.forward(x);

        let mut x = bottom.clone();
        for (decoder, skip) in self.decoders.iter().zip(skips.into_iter().rev()) {
            x = decoder.forward(x, skip);
        }

        let pixel_logit = self.pixel_head.as_ref().map(|head| head.forward(x.clone()));
        let logit = self.head.forward(x);

        let image_logit = match (&self.image_pool, &self.image_head) {
            (Some(pool), Some(linear)) => {
                let [batch, channels, _, _] = bottom.dims();
                let pooled = pool.forward(bottom).reshape([batch, channels]);
                Some(linear.forward(pooled))
            }
            _ => None,
        };

        SaltOutput {
            logit,
            pixel_logit,
            image_logit,
        }
    }

    /// Whether this network carries the auxiliary heads
    pub fn has_aux_heads(&self) -> bool {
        self.pixel_head.is_some() && self.image_head.is_some()
    }
}
