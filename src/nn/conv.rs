//! Convolutional layers over `[N, C, H, W]` tensors.

use crate::asg::Padding2d;
use crate::nn::module::Module;
use crate::tensor::{GraphContext, Tensor};
use std::cell::RefCell;
use std::rc::Rc;

/// Configuration shared by [`Conv2d`] and [`ConvTranspose2d`].
#[derive(Debug, Clone, PartialEq)]
pub struct Conv2dConfig {
    /// Number of input channels.
    pub in_channels: usize,
    /// Number of output channels (filters).
    pub out_channels: usize,
    /// Kernel size (kH, kW).
    pub kernel_size: (usize, usize),
    /// Stride (sH, sW).
    pub stride: (usize, usize),
    /// Explicit padding `((top, bottom), (left, right))`.
    pub padding: Padding2d,
}

impl Conv2dConfig {
    pub fn new(in_channels: usize, out_channels: usize, kernel_size: (usize, usize)) -> Self {
        Self {
            in_channels,
            out_channels,
            kernel_size,
            stride: (1, 1),
            padding: ((0, 0), (0, 0)),
        }
    }

    pub fn with_stride(mut self, stride: (usize, usize)) -> Self {
        self.stride = stride;
        self
    }

    pub fn with_padding(mut self, padding: Padding2d) -> Self {
        self.padding = padding;
        self
    }
}

fn register_bias(context: &Rc<RefCell<GraphContext>>, name: &str, config: &Conv2dConfig) -> Tensor {
    Tensor::new_parameter(context, &format!("{}.bias", name), vec![config.out_channels])
}

/// 2D convolution with a per-filter bias.
///
/// Input `[N, C_in, H, W]`, weight `[C_out, C_in, kH, kW]`, output
/// `[N, C_out, H_out, W_out]`.
///
/// # Example
///
/// ```rust,ignore
/// let conv = Conv2d::from_config(&context, "conv1", Conv2dConfig::new(3, 64, (3, 3)));
/// let output = conv.forward(&input);
/// ```
pub struct Conv2d {
    pub weight: Tensor,
    pub bias: Tensor,
    pub config: Conv2dConfig,
}

impl Conv2d {
    pub fn from_config(
        context: &Rc<RefCell<GraphContext>>,
        name: &str,
        config: Conv2dConfig,
    ) -> Self {
        let (kh, kw) = config.kernel_size;
        let weight = Tensor::new_parameter(
            context,
            &format!("{}.weight", name),
            vec![config.out_channels, config.in_channels, kh, kw],
        );
        let bias = register_bias(context, name, &config);

        Self { weight, bias, config }
    }
}

impl Module for Conv2d {
    fn forward(&self, inputs: &Tensor) -> Tensor {
        inputs.conv2d(&self.weight, Some(&self.bias), self.config.stride, self.config.padding)
    }

    fn parameters(&self) -> Vec<Tensor> {
        vec![self.weight.clone(), self.bias.clone()]
    }
}

/// Transposed 2D convolution, used for learned upsampling.
///
/// Weight layout is `[C_in, C_out, kH, kW]`. `padding` crops the full
/// transposed output, so `H_out = (H - 1) * sH + kH - top - bottom`.
pub struct ConvTranspose2d {
    pub weight: Tensor,
    pub bias: Tensor,
    pub config: Conv2dConfig,
}

impl ConvTranspose2d {
    pub fn from_config(
        context: &Rc<RefCell<GraphContext>>,
        name: &str,
        config: Conv2dConfig,
    ) -> Self {
        let (kh, kw) = config.kernel_size;
        let weight = Tensor::new_parameter(
            context,
            &format!("{}.weight", name),
            vec![config.in_channels, config.out_channels, kh, kw],
        );
        let bias = register_bias(context, name, &config);

        Self { weight, bias, config }
    }
}

impl Module for ConvTranspose2d {
    fn forward(&self, inputs: &Tensor) -> Tensor {
        inputs.conv_transpose2d(&self.weight, Some(&self.bias), self.config.stride, self.config.padding)
    }

    fn parameters(&self) -> Vec<Tensor> {
        vec![self.weight.clone(), self.bias.clone()]
    }
}
