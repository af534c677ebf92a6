//! Shape-only layers. Both keep the leading batch axis.

use crate::asg::Shape;
use crate::nn::Module;
use crate::tensor::Tensor;

/// Reshapes every sample to a fixed per-sample shape.
pub struct Reshape {
    pub target: Shape,
}

impl Reshape {
    pub fn new(target: Shape) -> Self {
        Self { target }
    }
}

impl Module for Reshape {
    fn forward(&self, inputs: &Tensor) -> Tensor {
        inputs.reshape(self.target.clone())
    }

    fn parameters(&self) -> Vec<Tensor> {
        Vec::new()
    }
}

/// Flattens every sample to a vector.
#[derive(Default)]
pub struct Flatten;

impl Module for Flatten {
    fn forward(&self, inputs: &Tensor) -> Tensor {
        inputs.flatten()
    }

    fn parameters(&self) -> Vec<Tensor> {
        Vec::new()
    }
}
