//! Generator/discriminator pairs with an explicit interface check.

use crate::architecture::{DiscriminatorBuilder, FeatureShape, GeneratorBuilder, ImageShape};
use crate::config::{initialize_backend, GanConfig};
use crate::error::{GanError, Result};
use crate::model::{Model, ParameterStore};
use crate::runtime::backend::Backend;
use ndarray::{Array2, ArrayD};
use ndarray_rand::rand_distr::StandardNormal;
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info};

/// A generator and a discriminator whose tensor interfaces are known to match.
#[derive(Debug, Clone)]
pub struct GanPair {
    generator: Model,
    discriminator: Model,
    image: ImageShape,
    latent_dim: usize,
}

impl GanPair {
    /// Pairs two models after checking that the generator's output image is
    /// exactly what the discriminator consumes and that the discriminator
    /// emits a single score.
    pub fn compose(generator: Model, discriminator: Model) -> Result<Self> {
        let FeatureShape::Vector { features: latent_dim } = generator.input_shape() else {
            return Err(GanError::shape_mismatch(
                "generator.input",
                format!("expected a latent vector, got {}", generator.input_shape()),
            ));
        };

        let produced = generator.image_output_shape().ok_or_else(|| {
            GanError::shape_mismatch(
                "generator.output",
                format!("expected an image, got {}", generator.output_shape()),
            )
        })?;
        let consumed = discriminator.image_input_shape().ok_or_else(|| {
            GanError::shape_mismatch(
                "discriminator.input",
                format!("expected an image, got {}", discriminator.input_shape()),
            )
        })?;
        if produced != consumed {
            return Err(GanError::shape_mismatch(
                "generator.output -> discriminator.input",
                format!("generator produces {} but discriminator expects {}", produced, consumed),
            ));
        }

        if discriminator.output_shape() != (FeatureShape::Vector { features: 1 }) {
            return Err(GanError::shape_mismatch(
                "discriminator.output",
                format!("expected a single score, got {}", discriminator.output_shape()),
            ));
        }

        debug!(image = %produced, "generator and discriminator interfaces match");
        Ok(Self {
            generator,
            discriminator,
            image: produced,
            latent_dim,
        })
    }

    /// Builds both networks with default hyperparameters and composes them.
    ///
    /// Installs the default backend configuration; see [`GanPair::from_config`].
    pub fn build(height: usize, width: usize, channels: usize, latent_dim: usize) -> Result<Self> {
        Self::from_config(&GanConfig {
            height,
            width,
            channels,
            latent_dim,
            ..GanConfig::default()
        })
    }

    /// Applies `config.backend` process-wide, then builds and composes both
    /// networks.
    ///
    /// Fails with `BackendConfiguration` if a different backend configuration
    /// was already installed.
    pub fn from_config(config: &GanConfig) -> Result<Self> {
        initialize_backend(&config.backend)?;

        let generator = GeneratorBuilder::with_config(config.generator.clone()).build(
            config.height,
            config.width,
            config.channels,
            config.latent_dim,
        )?;
        let discriminator = DiscriminatorBuilder::with_config(config.discriminator.clone())
            .build(config.height, config.width, config.channels)?;

        let pair = Self::compose(generator, discriminator)?;
        info!(
            image = %pair.image_shape(),
            latent_dim = pair.latent_dim(),
            generator_params = pair.generator.parameter_count(),
            discriminator_params = pair.discriminator.parameter_count(),
            "built GAN pair"
        );
        Ok(pair)
    }

    pub fn generator(&self) -> &Model {
        &self.generator
    }

    pub fn discriminator(&self) -> &Model {
        &self.discriminator
    }

    pub fn latent_dim(&self) -> usize {
        self.latent_dim
    }

    /// Shared image interface.
    pub fn image_shape(&self) -> ImageShape {
        self.image
    }

    /// Runs the generator on `latent` (`[N, latent_dim]`) and scores the
    /// produced images. Returns `([N, C, H, W] images, [N, 1] scores)`.
    pub fn generate_and_score<B: Backend>(
        &self,
        backend: &B,
        generator_params: &ParameterStore,
        discriminator_params: &ParameterStore,
        latent: &ArrayD<f32>,
    ) -> Result<(ArrayD<f32>, ArrayD<f32>)> {
        let images = self.generator.forward(backend, generator_params, latent)?;
        let scores = self.discriminator.forward(backend, discriminator_params, &images)?;
        Ok((images, scores))
    }
}

/// Standard-normal latent batch `[batch, latent_dim]`.
pub fn sample_latent(batch: usize, latent_dim: usize, seed: u64) -> ArrayD<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    Array2::<f32>::random_using((batch, latent_dim), StandardNormal, &mut rng).into_dyn()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::architecture::{build_discriminator, build_generator};

    #[test]
    fn test_mismatched_resolutions_are_rejected() {
        let generator = build_generator(32, 32, 3, 8).unwrap();
        let discriminator = build_discriminator(40, 40, 3).unwrap();
        let err = GanPair::compose(generator, discriminator).unwrap_err();
        assert!(matches!(err, GanError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_mismatched_channels_are_rejected() {
        let generator = build_generator(32, 32, 1, 8).unwrap();
        let discriminator = build_discriminator(32, 32, 3).unwrap();
        assert!(GanPair::compose(generator, discriminator).is_err());
    }

    #[test]
    fn test_latent_dim_comes_from_the_generator_input() {
        let generator = build_generator(32, 32, 3, 8).unwrap();
        let discriminator = build_discriminator(32, 32, 3).unwrap();
        let pair = GanPair::compose(generator, discriminator).unwrap();
        assert_eq!(pair.latent_dim(), 8);
        assert_eq!(pair.image_shape(), ImageShape::new(32, 32, 3));
    }

    #[test]
    fn test_latent_samples_are_seeded() {
        let a = sample_latent(2, 5, 11);
        assert_eq!(a.shape(), &[2, 5]);
        assert_eq!(a, sample_latent(2, 5, 11));
        assert_ne!(a, sample_latent(2, 5, 12));
    }
}
