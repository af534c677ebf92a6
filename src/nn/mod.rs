//! # Neural Network Layers Module
//!
//! Building blocks the GAN topologies are assembled from.
//!
//! In the graph-based architecture each "layer" is a constructor that adds
//! a specific pattern of nodes (operations and parameters) to the ASG.
//!
//! ## Available Layers
//!
//! - [`Linear`]: Fully connected / dense layer
//! - [`Conv2d`]: 2D convolution with configurable stride and explicit padding
//! - [`ConvTranspose2d`]: Transposed 2D convolution (learned upsampling)
//! - [`LeakyReLU`], [`Tanh`], [`Sigmoid`]: Activations
//! - [`Dropout`]: Standard dropout, active only in training mode
//! - [`Reshape`], [`Flatten`]: Per-sample shape changes
//!
//! ## Example
//!
//! ```ignore
//! use gan_asg::nn::{Linear, LeakyReLU, Module};
//! use gan_asg::tensor::{GraphContext, Tensor};
//!
//! let ctx = Rc::new(RefCell::new(GraphContext::new()));
//! let linear = Linear::new(&ctx, "fc1", 100, 128);
//!
//! let x = Tensor::new_input(&ctx, "latent");
//! let h = LeakyReLU::default().forward(&linear.forward(&x));
//! ```

pub mod activations;
pub mod conv;
pub mod dropout;
pub mod linear;
pub mod module;
pub mod reshape;

pub use activations::{LeakyReLU, Sigmoid, Tanh};
pub use conv::{Conv2d, Conv2dConfig, ConvTranspose2d};
pub use dropout::Dropout;
pub use linear::Linear;
pub use module::Module;
pub use reshape::{Flatten, Reshape};
