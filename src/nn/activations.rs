//! Activation layers. None of them own trainable parameters.

use crate::nn::module::Module;
use crate::tensor::Tensor;

/// Leaky rectifier: `x` for positive inputs, `negative_slope * x` otherwise.
pub struct LeakyReLU {
    pub negative_slope: f32,
}

impl LeakyReLU {
    /// Slope used when none is given, matching the common framework default.
    pub const DEFAULT_NEGATIVE_SLOPE: f32 = 0.3;

    pub fn new(negative_slope: f32) -> Self {
        Self { negative_slope }
    }
}

impl Default for LeakyReLU {
    fn default() -> Self {
        Self::new(Self::DEFAULT_NEGATIVE_SLOPE)
    }
}

impl Module for LeakyReLU {
    fn forward(&self, inputs: &Tensor) -> Tensor {
        inputs.leaky_relu(self.negative_slope)
    }

    fn parameters(&self) -> Vec<Tensor> {
        Vec::new()
    }
}

/// Hyperbolic tangent, saturating to [-1, 1].
#[derive(Default)]
pub struct Tanh;

impl Module for Tanh {
    fn forward(&self, inputs: &Tensor) -> Tensor {
        inputs.tanh()
    }

    fn parameters(&self) -> Vec<Tensor> {
        Vec::new()
    }
}

/// Logistic sigmoid, saturating to [0, 1].
#[derive(Default)]
pub struct Sigmoid;

impl Module for Sigmoid {
    fn forward(&self, inputs: &Tensor) -> Tensor {
        inputs.sigmoid()
    }

    fn parameters(&self) -> Vec<Tensor> {
        Vec::new()
    }
}
