//! Discriminator preset: image to probability.

use super::{require_positive_args, Activation, Architecture, FeatureShape, ImageShape, LayerSpec, Padding};
use crate::error::{GanError, Result};
use crate::model::Model;
use crate::nn::LeakyReLU;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscriminatorConfig {
    pub filters: usize,
    pub stem_kernel: usize,
    pub downsample_kernel: usize,
    /// Number of stride-2 valid convolutions after the stem.
    pub downsample_layers: usize,
    pub dropout_rate: f32,
    pub negative_slope: f32,
}

impl Default for DiscriminatorConfig {
    fn default() -> Self {
        Self {
            filters: 128,
            stem_kernel: 3,
            downsample_kernel: 4,
            downsample_layers: 3,
            dropout_rate: 0.4,
            negative_slope: LeakyReLU::DEFAULT_NEGATIVE_SLOPE,
        }
    }
}

impl DiscriminatorConfig {
    /// Smallest height/width for which every valid convolution still has
    /// at least one output position. 24 with the defaults.
    pub fn min_spatial_size(&self) -> usize {
        let mut required = 1;
        for _ in 0..self.downsample_layers {
            required = (required - 1) * 2 + self.downsample_kernel;
        }
        required + self.stem_kernel.saturating_sub(1)
    }
}

#[derive(Debug, Clone, Default)]
pub struct DiscriminatorBuilder {
    config: DiscriminatorConfig,
}

impl DiscriminatorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: DiscriminatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DiscriminatorConfig {
        &self.config
    }

    pub fn architecture(&self, height: usize, width: usize, channels: usize) -> Result<Architecture> {
        require_positive_args(&[("height", height), ("width", width), ("channels", channels)])?;
        let cfg = &self.config;
        require_positive_args(&[
            ("discriminator.filters", cfg.filters),
            ("discriminator.stem_kernel", cfg.stem_kernel),
            ("discriminator.downsample_kernel", cfg.downsample_kernel),
        ])?;
        if !(0.0..1.0).contains(&cfg.dropout_rate) {
            return Err(GanError::invalid(
                "discriminator.dropout_rate",
                format!("must be in [0, 1), got {}", cfg.dropout_rate),
            ));
        }

        let act = Some(Activation::LeakyRelu {
            negative_slope: cfg.negative_slope,
        });
        let input = FeatureShape::Image(ImageShape::new(height, width, channels));

        let mut arch = Architecture::new("discriminator", input).layer(LayerSpec::Conv2d {
            filters: cfg.filters,
            kernel_size: cfg.stem_kernel,
            stride: 1,
            padding: Padding::Valid,
            activation: act,
        });
        for _ in 0..cfg.downsample_layers {
            arch = arch.layer(LayerSpec::Conv2d {
                filters: cfg.filters,
                kernel_size: cfg.downsample_kernel,
                stride: 2,
                padding: Padding::Valid,
                activation: act,
            });
        }
        Ok(arch
            .layer(LayerSpec::Flatten)
            .layer(LayerSpec::Dropout {
                rate: cfg.dropout_rate,
            })
            .layer(LayerSpec::Dense {
                units: 1,
                activation: Some(Activation::Sigmoid),
            }))
    }

    /// Builds the discriminator.
    ///
    /// Inputs smaller than [`DiscriminatorConfig::min_spatial_size`] fail with
    /// `ShapeMismatch` naming the first convolution that would underflow.
    pub fn build(&self, height: usize, width: usize, channels: usize) -> Result<Model> {
        debug!(
            height,
            width,
            channels,
            min_spatial_size = self.config.min_spatial_size(),
            "building discriminator"
        );
        self.architecture(height, width, channels)?.build()
    }
}

/// Discriminator with the default hyperparameters.
pub fn build_discriminator(height: usize, width: usize, channels: usize) -> Result<Model> {
    DiscriminatorBuilder::new().build(height, width, channels)
}
