//! Declarative layer records and the static shape planner.
//!
//! An [`Architecture`] is plain data: an input shape and an ordered list of
//! [`LayerSpec`] records. [`Architecture::plan`] walks the records once,
//! resolving `same`/`valid` padding against the incoming spatial size and
//! computing every layer's output shape and parameter shapes. Any layer that
//! cannot be applied to its input fails the plan with an error naming it.

use super::{FeatureShape, ImageShape};
use crate::asg::{Padding2d, Shape};
use crate::error::{GanError, Result};
use crate::nn::LeakyReLU;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Element-wise non-linearity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Activation {
    LeakyRelu { negative_slope: f32 },
    Tanh,
    Sigmoid,
}

impl Activation {
    /// Leaky rectifier with the default negative slope.
    pub fn leaky_relu() -> Self {
        Activation::LeakyRelu {
            negative_slope: LeakyReLU::DEFAULT_NEGATIVE_SLOPE,
        }
    }

    fn validate(&self, layer: &str) -> Result<()> {
        if let Activation::LeakyRelu { negative_slope } = self {
            if !negative_slope.is_finite() {
                return Err(GanError::invalid(
                    format!("{}.negative_slope", layer),
                    format!("must be finite, got {}", negative_slope),
                ));
            }
        }
        Ok(())
    }
}

impl fmt::Display for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Activation::LeakyRelu { negative_slope } => write!(f, "leaky_relu({})", negative_slope),
            Activation::Tanh => write!(f, "tanh"),
            Activation::Sigmoid => write!(f, "sigmoid"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Padding {
    /// Output is `ceil(input / stride)`; transposed: `input * stride`.
    Same,
    /// No padding; the kernel must fit inside the input.
    Valid,
}

fn default_stride() -> usize {
    1
}

/// One layer of an architecture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LayerSpec {
    Dense {
        units: usize,
        #[serde(default)]
        activation: Option<Activation>,
    },
    Activation {
        activation: Activation,
    },
    Reshape {
        channels: usize,
        height: usize,
        width: usize,
    },
    Conv2d {
        filters: usize,
        kernel_size: usize,
        #[serde(default = "default_stride")]
        stride: usize,
        padding: Padding,
        #[serde(default)]
        activation: Option<Activation>,
    },
    ConvTranspose2d {
        filters: usize,
        kernel_size: usize,
        #[serde(default = "default_stride")]
        stride: usize,
        padding: Padding,
        #[serde(default)]
        activation: Option<Activation>,
    },
    Flatten,
    Dropout {
        rate: f32,
    },
}

impl LayerSpec {
    /// Base used to derive unique layer names.
    pub fn kind(&self) -> &'static str {
        match self {
            LayerSpec::Dense { .. } => "dense",
            LayerSpec::Activation { .. } => "activation",
            LayerSpec::Reshape { .. } => "reshape",
            LayerSpec::Conv2d { .. } => "conv2d",
            LayerSpec::ConvTranspose2d { .. } => "conv2d_transpose",
            LayerSpec::Flatten => "flatten",
            LayerSpec::Dropout { .. } => "dropout",
        }
    }

    /// Display name of the layer type in summaries.
    pub fn type_name(&self) -> &'static str {
        match self {
            LayerSpec::Dense { .. } => "Dense",
            LayerSpec::Activation { activation } => match activation {
                Activation::LeakyRelu { .. } => "LeakyReLU",
                Activation::Tanh => "Tanh",
                Activation::Sigmoid => "Sigmoid",
            },
            LayerSpec::Reshape { .. } => "Reshape",
            LayerSpec::Conv2d { .. } => "Conv2D",
            LayerSpec::ConvTranspose2d { .. } => "Conv2DTranspose",
            LayerSpec::Flatten => "Flatten",
            LayerSpec::Dropout { .. } => "Dropout",
        }
    }

    /// Activation fused into the layer's output, if any.
    pub fn activation(&self) -> Option<Activation> {
        match self {
            LayerSpec::Dense { activation, .. }
            | LayerSpec::Conv2d { activation, .. }
            | LayerSpec::ConvTranspose2d { activation, .. } => *activation,
            LayerSpec::Activation { activation } => Some(*activation),
            _ => None,
        }
    }
}

/// A layer resolved against its concrete input shape.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedLayer {
    pub name: String,
    pub spec: LayerSpec,
    pub input: FeatureShape,
    pub output: FeatureShape,
    /// Explicit padding for convolutions; crop amounts for transposed convolutions.
    pub padding: Option<Padding2d>,
    /// `(parameter name, shape)` in registration order.
    pub parameters: Vec<(String, Shape)>,
    parameter_count: usize,
}

impl PlannedLayer {
    /// Total number of scalar parameters, checked against overflow when planned.
    pub fn parameter_count(&self) -> usize {
        self.parameter_count
    }
}

/// A named input shape plus an ordered list of layers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Architecture {
    pub name: String,
    pub input: FeatureShape,
    pub layers: Vec<LayerSpec>,
}

impl Architecture {
    pub fn new(name: impl Into<String>, input: FeatureShape) -> Self {
        Self {
            name: name.into(),
            input,
            layers: Vec::new(),
        }
    }

    /// Appends a layer (builder style).
    pub fn layer(mut self, spec: LayerSpec) -> Self {
        self.layers.push(spec);
        self
    }

    /// Resolves every layer against its input and checks that each one applies.
    pub fn plan(&self) -> Result<Vec<PlannedLayer>> {
        if self.layers.is_empty() {
            return Err(GanError::invalid(
                format!("{}.layers", self.name),
                "an architecture needs at least one layer",
            ));
        }
        self.input.validate(&format!("{}.input", self.name))?;

        let mut counters: HashMap<&'static str, usize> = HashMap::new();
        let mut current = self.input;
        let mut planned = Vec::with_capacity(self.layers.len());
        let mut total_parameters: usize = 0;

        for spec in &self.layers {
            let seen = counters.entry(spec.kind()).or_insert(0);
            let name = if *seen == 0 {
                spec.kind().to_string()
            } else {
                format!("{}_{}", spec.kind(), seen)
            };
            *seen += 1;

            let layer = plan_layer(&name, spec, current)?;
            total_parameters = total_parameters
                .checked_add(layer.parameter_count())
                .ok_or_else(|| {
                    GanError::shape_mismatch(
                        &name,
                        format!("{} parameter total overflows usize", self.name),
                    )
                })?;
            current = layer.output;
            planned.push(layer);
        }

        Ok(planned)
    }

    /// Per-sample output shape of the whole stack.
    pub fn output_shape(&self) -> Result<FeatureShape> {
        let plan = self.plan()?;
        Ok(plan.last().map(|layer| layer.output).unwrap_or(self.input))
    }
}

fn require_positive(layer: &str, field: &str, value: usize) -> Result<()> {
    if value == 0 {
        return Err(GanError::invalid(
            format!("{}.{}", layer, field),
            "must be a positive integer",
        ));
    }
    Ok(())
}

fn overflow(layer: &str, what: impl fmt::Display) -> GanError {
    GanError::shape_mismatch(layer, format!("{} overflows usize", what))
}

fn element_count(layer: &str, shape: FeatureShape) -> Result<usize> {
    shape
        .element_count()
        .ok_or_else(|| overflow(layer, format_args!("element count of {}", shape)))
}

fn shape_size(layer: &str, parameter: &str, shape: &Shape) -> Result<usize> {
    shape
        .iter()
        .try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
        .ok_or_else(|| overflow(layer, format_args!("size of {} {:?}", parameter, shape)))
}

fn require_image(layer: &str, spec: &LayerSpec, input: FeatureShape) -> Result<ImageShape> {
    input.as_image().ok_or_else(|| {
        GanError::shape_mismatch(
            layer,
            format!("{} expects an image input, got {}", spec.type_name(), input),
        )
    })
}

/// `(output, (begin, end))` along one axis of a convolution.
fn conv_axis(layer: &str, axis: &str, input: usize, kernel: usize, stride: usize, padding: Padding) -> Result<(usize, (usize, usize))> {
    match padding {
        Padding::Valid => {
            let span = input.checked_sub(kernel).ok_or_else(|| {
                GanError::shape_mismatch(
                    layer,
                    format!(
                        "{} of {} is smaller than the kernel size {} (valid padding)",
                        axis, input, kernel
                    ),
                )
            })?;
            Ok((span / stride + 1, (0, 0)))
        }
        Padding::Same => {
            let output = input.div_ceil(stride);
            let covered = (output - 1)
                .checked_mul(stride)
                .and_then(|n| n.checked_add(kernel))
                .ok_or_else(|| overflow(layer, format_args!("padded {}", axis)))?;
            let total = covered.saturating_sub(input);
            let begin = total / 2;
            Ok((output, (begin, total - begin)))
        }
    }
}

/// `(output, (crop_begin, crop_end))` along one axis of a transposed convolution.
fn conv_transpose_axis(layer: &str, input: usize, kernel: usize, stride: usize, padding: Padding) -> Result<(usize, (usize, usize))> {
    let upsampled = |n: usize| {
        n.checked_mul(stride)
            .ok_or_else(|| overflow(layer, format_args!("upsampled size of {}", input)))
    };
    match padding {
        Padding::Valid => {
            let full = upsampled(input - 1)?
                .checked_add(kernel)
                .ok_or_else(|| overflow(layer, format_args!("upsampled size of {}", input)))?;
            Ok((full, (0, 0)))
        }
        Padding::Same => {
            if kernel < stride {
                return Err(GanError::invalid(
                    format!("{}.kernel_size", layer),
                    format!(
                        "same padding needs kernel_size ({}) >= stride ({})",
                        kernel, stride
                    ),
                ));
            }
            let total = kernel - stride;
            let begin = total / 2;
            Ok((upsampled(input)?, (begin, total - begin)))
        }
    }
}

fn plan_layer(name: &str, spec: &LayerSpec, input: FeatureShape) -> Result<PlannedLayer> {
    if let Some(activation) = spec.activation() {
        activation.validate(name)?;
    }

    let mut padding = None;
    let mut parameters = Vec::new();

    let output = match spec {
        LayerSpec::Dense { units, .. } => {
            require_positive(name, "units", *units)?;
            let FeatureShape::Vector { features } = input else {
                return Err(GanError::shape_mismatch(
                    name,
                    format!("Dense expects a flat input, got {}; add a flatten layer", input),
                ));
            };
            parameters.push((format!("{}.weight", name), vec![features, *units]));
            parameters.push((format!("{}.bias", name), vec![*units]));
            FeatureShape::Vector { features: *units }
        }

        LayerSpec::Activation { .. } => input,

        LayerSpec::Reshape { channels, height, width } => {
            let target = FeatureShape::Image(ImageShape::new(*height, *width, *channels));
            target.validate(name)?;
            let (have, want) = (element_count(name, input)?, element_count(name, target)?);
            if have != want {
                return Err(GanError::shape_mismatch(
                    name,
                    format!(
                        "cannot reshape {} ({} values) into {} ({} values)",
                        input, have, target, want
                    ),
                ));
            }
            target
        }

        LayerSpec::Conv2d { filters, kernel_size, stride, padding: mode, .. } => {
            require_positive(name, "filters", *filters)?;
            require_positive(name, "kernel_size", *kernel_size)?;
            require_positive(name, "stride", *stride)?;
            let image = require_image(name, spec, input)?;

            let (out_h, pad_h) = conv_axis(name, "height", image.height, *kernel_size, *stride, *mode)?;
            let (out_w, pad_w) = conv_axis(name, "width", image.width, *kernel_size, *stride, *mode)?;
            padding = Some((pad_h, pad_w));

            parameters.push((
                format!("{}.weight", name),
                vec![*filters, image.channels, *kernel_size, *kernel_size],
            ));
            parameters.push((format!("{}.bias", name), vec![*filters]));
            FeatureShape::Image(ImageShape::new(out_h, out_w, *filters))
        }

        LayerSpec::ConvTranspose2d { filters, kernel_size, stride, padding: mode, .. } => {
            require_positive(name, "filters", *filters)?;
            require_positive(name, "kernel_size", *kernel_size)?;
            require_positive(name, "stride", *stride)?;
            let image = require_image(name, spec, input)?;

            let (out_h, crop_h) = conv_transpose_axis(name, image.height, *kernel_size, *stride, *mode)?;
            let (out_w, crop_w) = conv_transpose_axis(name, image.width, *kernel_size, *stride, *mode)?;
            padding = Some((crop_h, crop_w));

            parameters.push((
                format!("{}.weight", name),
                vec![image.channels, *filters, *kernel_size, *kernel_size],
            ));
            parameters.push((format!("{}.bias", name), vec![*filters]));
            FeatureShape::Image(ImageShape::new(out_h, out_w, *filters))
        }

        LayerSpec::Flatten => FeatureShape::Vector {
            features: element_count(name, input)?,
        },

        LayerSpec::Dropout { rate } => {
            if !(0.0..1.0).contains(rate) {
                return Err(GanError::invalid(
                    format!("{}.rate", name),
                    format!("must be in [0, 1), got {}", rate),
                ));
            }
            input
        }
    };

    element_count(name, output)?;
    let parameter_count = parameters.iter().try_fold(0usize, |total, (parameter, shape)| {
        total
            .checked_add(shape_size(name, parameter, shape)?)
            .ok_or_else(|| overflow(name, "parameter count"))
    })?;

    Ok(PlannedLayer {
        name: name.to_string(),
        spec: spec.clone(),
        input,
        output,
        padding,
        parameters,
        parameter_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(h: usize, w: usize, c: usize) -> FeatureShape {
        FeatureShape::Image(ImageShape::new(h, w, c))
    }

    #[test]
    fn test_same_padding_matches_ceil_division() {
        assert_eq!(conv_axis("c", "height", 64, 5, 1, Padding::Same).unwrap(), (64, (2, 2)));
        assert_eq!(conv_axis("c", "height", 7, 4, 2, Padding::Same).unwrap(), (4, (1, 2)));
        assert_eq!(conv_axis("c", "height", 128, 7, 1, Padding::Same).unwrap(), (128, (3, 3)));
    }

    #[test]
    fn test_transposed_same_doubles_with_symmetric_crop() {
        assert_eq!(conv_transpose_axis("t", 64, 4, 2, Padding::Same).unwrap(), (128, (1, 1)));
        assert_eq!(conv_transpose_axis("t", 5, 3, 2, Padding::Valid).unwrap(), (11, (0, 0)));
        assert!(matches!(
            conv_transpose_axis("t", 5, 1, 2, Padding::Same),
            Err(GanError::InvalidHyperparameter { .. })
        ));
    }

    #[test]
    fn test_layers_get_unique_names() {
        let arch = Architecture::new("net", image(8, 8, 1))
            .layer(LayerSpec::Conv2d {
                filters: 2,
                kernel_size: 3,
                stride: 1,
                padding: Padding::Same,
                activation: None,
            })
            .layer(LayerSpec::Conv2d {
                filters: 2,
                kernel_size: 3,
                stride: 1,
                padding: Padding::Same,
                activation: None,
            })
            .layer(LayerSpec::Flatten);

        let names: Vec<_> = arch.plan().unwrap().into_iter().map(|l| l.name).collect();
        assert_eq!(names, vec!["conv2d", "conv2d_1", "flatten"]);
    }

    #[test]
    fn test_dense_on_image_needs_flatten() {
        let arch = Architecture::new("net", image(4, 4, 1)).layer(LayerSpec::Dense {
            units: 1,
            activation: None,
        });
        let err = arch.plan().unwrap_err();
        assert!(matches!(err, GanError::ShapeMismatch { ref location, .. } if location == "dense"));
    }

    #[test]
    fn test_reshape_must_preserve_element_count() {
        let arch = Architecture::new("net", FeatureShape::Vector { features: 10 }).layer(
            LayerSpec::Reshape {
                channels: 3,
                height: 2,
                width: 2,
            },
        );
        assert!(matches!(arch.plan(), Err(GanError::ShapeMismatch { .. })));
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_oversized_outputs_fail_at_the_offending_layer() {
        let arch = Architecture::new("net", image(1 << 20, 1 << 20, 1)).layer(LayerSpec::Conv2d {
            filters: usize::MAX / 2,
            kernel_size: 1,
            stride: 1,
            padding: Padding::Valid,
            activation: None,
        });
        let err = arch.plan().unwrap_err();
        assert!(matches!(err, GanError::ShapeMismatch { ref location, .. } if location == "conv2d"));

        assert!(matches!(
            conv_transpose_axis("t", usize::MAX / 2, 4, 4, Padding::Same),
            Err(GanError::ShapeMismatch { .. })
        ));
        assert!(matches!(
            conv_transpose_axis("t", usize::MAX, 1, 2, Padding::Valid),
            Err(GanError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_oversized_dense_weight_is_rejected() {
        let arch = Architecture::new("net", FeatureShape::Vector { features: usize::MAX / 2 })
            .layer(LayerSpec::Dense {
                units: 4,
                activation: None,
            });
        let err = arch.plan().unwrap_err();
        assert!(matches!(err, GanError::ShapeMismatch { ref location, .. } if location == "dense"));
    }

    #[test]
    fn test_dropout_rate_is_validated() {
        let arch = Architecture::new("net", FeatureShape::Vector { features: 3 })
            .layer(LayerSpec::Dropout { rate: 1.0 });
        assert!(matches!(arch.plan(), Err(GanError::InvalidHyperparameter { .. })));
    }

    #[test]
    fn test_records_round_trip_through_json() {
        let json = r#"{
            "name": "tiny",
            "input": { "kind": "vector", "features": 4 },
            "layers": [
                { "type": "dense", "units": 8, "activation": { "kind": "leaky_relu", "negative_slope": 0.2 } },
                { "type": "reshape", "channels": 2, "height": 2, "width": 2 },
                { "type": "conv2d", "filters": 1, "kernel_size": 3, "padding": "same", "activation": { "kind": "tanh" } }
            ]
        }"#;
        let arch: Architecture = serde_json::from_str(json).unwrap();
        let plan = arch.plan().unwrap();

        assert_eq!(plan.len(), 3);
        assert_eq!(plan[2].output, image(2, 2, 1));
        assert_eq!(plan[2].padding, Some(((1, 1), (1, 1))));
        assert_eq!(plan[0].parameter_count(), 4 * 8 + 8);
    }
}
