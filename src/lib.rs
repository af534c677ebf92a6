//! # gan-asg: GAN topologies on an Abstract Semantic Graph
//!
//! A generator (latent vector to image) and a discriminator (image to
//! probability) described as data, built into graph-backed models and
//! executed on an `ndarray` CPU backend.
//!
//! ## Usage Example
//!
//! ```no_run
//! use gan_asg::config::{initialize_backend, BackendConfig};
//! use gan_asg::gan::{sample_latent, GanPair};
//! use gan_asg::runtime::backend::ExecutionMode;
//! use gan_asg::runtime::cpu_backend::CpuBackend;
//!
//! // 1. Configure the backend once per process
//! initialize_backend(&BackendConfig::default())?;
//!
//! // 2. Build both networks; their interfaces are checked on composition
//! let pair = GanPair::build(128, 128, 3, 100)?;
//! println!("{}", pair.generator().summary());
//!
//! // 3. Initialize weights and run generator -> discriminator
//! let g_params = pair.generator().init_parameters(0);
//! let d_params = pair.discriminator().init_parameters(1);
//! let backend = CpuBackend::from_global(ExecutionMode::Inference);
//! let latent = sample_latent(1, pair.latent_dim(), 42);
//! let (images, scores) = pair.generate_and_score(&backend, &g_params, &d_params, &latent)?;
//! # Ok::<(), gan_asg::error::GanError>(())
//! ```

pub mod analysis;
pub mod architecture;
pub mod asg;
pub mod config;
pub mod error;
pub mod gan;
pub mod model;
pub mod nn;
pub mod runtime;
pub mod tensor;

pub use architecture::{build_discriminator, build_generator, Architecture, ImageShape, LayerSpec};
pub use error::{GanError, Result};
pub use gan::GanPair;
pub use model::{Model, ParameterStore};
