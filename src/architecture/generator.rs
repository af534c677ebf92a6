//! Generator preset: latent vector to image.

use super::{require_positive_args, Activation, Architecture, FeatureShape, LayerSpec, Padding};
use crate::error::{GanError, Result};
use crate::model::Model;
use crate::nn::LeakyReLU;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Hyperparameters of the generator stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Channels of the seed feature map the dense projection is reshaped into.
    pub seed_channels: usize,
    pub filters: usize,
    pub conv_kernel: usize,
    pub upsample_kernel: usize,
    pub output_kernel: usize,
    /// Convolutions after the upsampling step.
    pub refine_layers: usize,
    pub negative_slope: f32,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            seed_channels: 128,
            filters: 256,
            conv_kernel: 5,
            upsample_kernel: 4,
            output_kernel: 7,
            refine_layers: 2,
            negative_slope: LeakyReLU::DEFAULT_NEGATIVE_SLOPE,
        }
    }
}

/// Builds generator models for a fixed configuration.
#[derive(Debug, Clone, Default)]
pub struct GeneratorBuilder {
    config: GeneratorConfig,
}

impl GeneratorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: GeneratorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    /// Layer records for a generator producing `height x width x channels`
    /// images from `latent_dim` inputs.
    ///
    /// The seed feature map is half the output resolution; the single stride-2
    /// transposed convolution doubles it back.
    pub fn architecture(
        &self,
        height: usize,
        width: usize,
        channels: usize,
        latent_dim: usize,
    ) -> Result<Architecture> {
        require_positive_args(&[
            ("height", height),
            ("width", width),
            ("channels", channels),
            ("latent_dim", latent_dim),
        ])?;
        let cfg = &self.config;
        require_positive_args(&[
            ("generator.seed_channels", cfg.seed_channels),
            ("generator.filters", cfg.filters),
            ("generator.conv_kernel", cfg.conv_kernel),
            ("generator.upsample_kernel", cfg.upsample_kernel),
            ("generator.output_kernel", cfg.output_kernel),
        ])?;
        for (name, value) in [("height", height), ("width", width)] {
            if value % 2 != 0 {
                return Err(GanError::invalid(
                    name,
                    format!("must be even so a stride-2 upsampling can reach it, got {}", value),
                ));
            }
        }

        let (seed_h, seed_w) = (height / 2, width / 2);
        let seed_units = cfg
            .seed_channels
            .checked_mul(seed_h)
            .and_then(|n| n.checked_mul(seed_w))
            .ok_or_else(|| {
                GanError::invalid(
                    "dense.units",
                    format!(
                        "seed map {}x{}x{} has more elements than fit in usize",
                        seed_h, seed_w, cfg.seed_channels
                    ),
                )
            })?;
        let act = Some(Activation::LeakyRelu {
            negative_slope: cfg.negative_slope,
        });
        let conv = |filters, kernel_size, activation| LayerSpec::Conv2d {
            filters,
            kernel_size,
            stride: 1,
            padding: Padding::Same,
            activation,
        };

        let mut arch = Architecture::new("generator", FeatureShape::Vector { features: latent_dim })
            .layer(LayerSpec::Dense {
                units: seed_units,
                activation: act,
            })
            .layer(LayerSpec::Reshape {
                channels: cfg.seed_channels,
                height: seed_h,
                width: seed_w,
            })
            .layer(conv(cfg.filters, cfg.conv_kernel, act))
            .layer(LayerSpec::ConvTranspose2d {
                filters: cfg.filters,
                kernel_size: cfg.upsample_kernel,
                stride: 2,
                padding: Padding::Same,
                activation: act,
            });
        for _ in 0..cfg.refine_layers {
            arch = arch.layer(conv(cfg.filters, cfg.conv_kernel, act));
        }
        Ok(arch.layer(conv(channels, cfg.output_kernel, Some(Activation::Tanh))))
    }

    pub fn build(&self, height: usize, width: usize, channels: usize, latent_dim: usize) -> Result<Model> {
        debug!(height, width, channels, latent_dim, "building generator");
        self.architecture(height, width, channels, latent_dim)?.build()
    }
}

/// Generator with the default hyperparameters.
pub fn build_generator(height: usize, width: usize, channels: usize, latent_dim: usize) -> Result<Model> {
    GeneratorBuilder::new().build(height, width, channels, latent_dim)
}
