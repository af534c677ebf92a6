//! Human-readable structural summary of a model.
//!
//! Rows follow the Keras layout: a leaky rectifier fused into a dense or
//! convolution layer is listed as its own `LeakyReLU` row, and image shapes
//! are printed channels-last. Tanh and sigmoid outputs stay fused.

use super::{Activation, FeatureShape, LayerSpec, PlannedLayer};
use std::fmt;

const LEAKY_RELU_NAME: &str = "leaky_re_lu";

const RULE_WIDTH: usize = 65;

#[derive(Debug, Clone, PartialEq)]
pub struct SummaryRow {
    pub name: String,
    pub type_name: &'static str,
    pub output: FeatureShape,
    pub parameters: usize,
}

/// Per-layer table of output shapes and parameter counts.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSummary {
    pub name: String,
    pub input: FeatureShape,
    pub rows: Vec<SummaryRow>,
}

impl ModelSummary {
    pub fn new(name: &str, input: FeatureShape, layers: &[PlannedLayer]) -> Self {
        let mut rows = Vec::with_capacity(layers.len() * 2);
        let mut leaky_rows = 0;
        for layer in layers {
            rows.push(SummaryRow {
                name: layer.name.clone(),
                type_name: layer.spec.type_name(),
                output: layer.output,
                parameters: layer.parameter_count(),
            });

            let fused_leaky = !matches!(layer.spec, LayerSpec::Activation { .. })
                && matches!(layer.spec.activation(), Some(Activation::LeakyRelu { .. }));
            if fused_leaky {
                let name = match leaky_rows {
                    0 => LEAKY_RELU_NAME.to_string(),
                    n => format!("{}_{}", LEAKY_RELU_NAME, n),
                };
                leaky_rows += 1;
                rows.push(SummaryRow {
                    name,
                    type_name: "LeakyReLU",
                    output: layer.output,
                    parameters: 0,
                });
            }
        }
        Self {
            name: name.to_string(),
            input,
            rows,
        }
    }

    pub fn total_parameters(&self) -> usize {
        self.rows.iter().map(|row| row.parameters).sum()
    }
}

/// `(None, H, W, C)` style shape with a symbolic batch axis.
fn batch_shape(shape: &FeatureShape) -> String {
    match shape {
        FeatureShape::Vector { features } => format!("(None, {})", features),
        FeatureShape::Image(image) => format!(
            "(None, {}, {}, {})",
            image.height, image.width, image.channels
        ),
    }
}

/// Formats `1234567` as `1,234,567`.
fn group_digits(value: usize) -> String {
    let digits = value.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    grouped
}

impl fmt::Display for ModelSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Model: \"{}\"", self.name)?;
        writeln!(f, "{}", "_".repeat(RULE_WIDTH))?;
        writeln!(f, " {:<29}{:<26}{}", "Layer (type)", "Output Shape", "Param #")?;
        writeln!(f, "{}", "=".repeat(RULE_WIDTH))?;
        writeln!(f, " {:<29}{:<26}{}", "input (Input)", batch_shape(&self.input), 0)?;
        for row in &self.rows {
            let label = format!("{} ({})", row.name, row.type_name);
            writeln!(f, " {:<29}{:<26}{}", label, batch_shape(&row.output), row.parameters)?;
        }
        writeln!(f, "{}", "=".repeat(RULE_WIDTH))?;
        writeln!(f, "Total params: {}", group_digits(self.total_parameters()))?;
        writeln!(f, "Trainable params: {}", group_digits(self.total_parameters()))?;
        write!(f, "{}", "_".repeat(RULE_WIDTH))
    }
}
