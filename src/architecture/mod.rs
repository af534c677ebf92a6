//! # Architectures
//!
//! Topologies are described as data ([`Architecture`] / [`LayerSpec`]) and
//! turned into executable [`Model`](crate::model::Model)s by one generic
//! builder. The generator and discriminator presets are just functions that
//! emit layer lists from their configs.
//!
//! Images travel through the graph channels-first, `[N, C, H, W]`.
//! [`ImageShape`] is the per-sample `(height, width, channels)` description.

pub mod builder;
pub mod discriminator;
pub mod generator;
pub mod layers;
pub mod summary;

pub use discriminator::{build_discriminator, DiscriminatorBuilder, DiscriminatorConfig};
pub use generator::{build_generator, GeneratorBuilder, GeneratorConfig};
pub use layers::{Activation, Architecture, LayerSpec, Padding, PlannedLayer};
pub use summary::{ModelSummary, SummaryRow};

use crate::asg::Shape;
use crate::error::{GanError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageShape {
    pub height: usize,
    pub width: usize,
    pub channels: usize,
}

impl ImageShape {
    pub fn new(height: usize, width: usize, channels: usize) -> Self {
        Self {
            height,
            width,
            channels,
        }
    }

    /// `None` when the product does not fit in `usize`.
    pub fn element_count(&self) -> Option<usize> {
        self.height
            .checked_mul(self.width)?
            .checked_mul(self.channels)
    }

    /// Per-sample graph shape, `[C, H, W]`.
    pub fn to_chw(&self) -> Shape {
        vec![self.channels, self.height, self.width]
    }
}

impl fmt::Display for ImageShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.height, self.width, self.channels)
    }
}

/// Shape of one sample flowing between layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeatureShape {
    Vector { features: usize },
    Image(ImageShape),
}

impl FeatureShape {
    pub fn element_count(&self) -> Option<usize> {
        match self {
            FeatureShape::Vector { features } => Some(*features),
            FeatureShape::Image(image) => image.element_count(),
        }
    }

    pub fn as_image(&self) -> Option<ImageShape> {
        match self {
            FeatureShape::Image(image) => Some(*image),
            FeatureShape::Vector { .. } => None,
        }
    }

    /// Per-sample graph shape, without the batch axis.
    pub fn to_shape(&self) -> Shape {
        match self {
            FeatureShape::Vector { features } => vec![*features],
            FeatureShape::Image(image) => image.to_chw(),
        }
    }

    /// Graph shape including a leading batch axis.
    pub fn with_batch(&self, batch: usize) -> Shape {
        let mut shape = vec![batch];
        shape.extend(self.to_shape());
        shape
    }

    /// Rejects zero-sized dimensions and shapes whose element count overflows.
    pub fn validate(&self, name: &str) -> Result<()> {
        let dims = match self {
            FeatureShape::Vector { features } => vec![("features", *features)],
            FeatureShape::Image(image) => vec![
                ("height", image.height),
                ("width", image.width),
                ("channels", image.channels),
            ],
        };
        for (dim, value) in dims {
            if value == 0 {
                return Err(GanError::invalid(
                    format!("{}.{}", name, dim),
                    "must be a positive integer",
                ));
            }
        }
        if self.element_count().is_none() {
            return Err(GanError::invalid(
                name,
                format!("{} has more elements than fit in usize", self),
            ));
        }
        Ok(())
    }
}

impl fmt::Display for FeatureShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureShape::Vector { features } => write!(f, "vector({})", features),
            FeatureShape::Image(image) => write!(f, "image({})", image),
        }
    }
}

/// Checks the builder arguments shared by both presets.
pub(crate) fn require_positive_args(args: &[(&str, usize)]) -> Result<()> {
    for (name, value) in args {
        if *value == 0 {
            return Err(GanError::invalid(*name, "must be a positive integer"));
        }
    }
    Ok(())
}
