//! Generic builder: turns a planned [`Architecture`] into a graph-backed [`Model`].

use super::{Activation, Architecture, LayerSpec, PlannedLayer};
use crate::asg::Asg;
use crate::error::{GanError, Result};
use crate::model::{Model, INPUT_NAME};
use crate::nn::{
    Conv2d, Conv2dConfig, ConvTranspose2d, Dropout, Flatten, LeakyReLU, Linear, Module, Reshape,
    Sigmoid, Tanh,
};
use crate::tensor::{GraphContext, Tensor};
use std::cell::RefCell;
use std::rc::Rc;
use tracing::{debug, trace};

impl Architecture {
    /// Builds the model graph from the layer records.
    ///
    /// The static plan is computed first so that a bad record fails before any
    /// node is created. Parameter nodes must declare exactly the planned
    /// shapes, and the finished graph is run through shape inference for a
    /// batch of one as an independent cross-check.
    pub fn build(&self) -> Result<Model> {
        let plan = self.plan()?;

        let context = Rc::new(RefCell::new(GraphContext::named(&self.name)));
        let input = Tensor::new_input(&context, INPUT_NAME);

        let mut x = input.clone();
        for layer in &plan {
            x = apply_layer(&context, layer, &x)?;
            trace!(layer = %layer.name, output = %layer.output, "added layer to graph");
        }

        let mut graph = context.borrow().main_graph().clone();
        graph.set_output(x.node_id);
        check_declared_parameters(&graph, &plan)?;

        let model = Model::new(self.clone(), plan, graph, input.node_id, x.node_id);
        model.graph_for_batch(1)?;

        debug!("\n{}", model.summary());
        Ok(model)
    }
}

fn activate(x: &Tensor, activation: Activation) -> Tensor {
    match activation {
        Activation::LeakyRelu { negative_slope } => LeakyReLU::new(negative_slope).forward(x),
        Activation::Tanh => Tanh.forward(x),
        Activation::Sigmoid => Sigmoid.forward(x),
    }
}

fn apply_layer(
    context: &Rc<RefCell<GraphContext>>,
    layer: &PlannedLayer,
    x: &Tensor,
) -> Result<Tensor> {
    let output = match &layer.spec {
        LayerSpec::Dense { units, .. } => {
            let in_features = layer.input.element_count().ok_or_else(|| {
                GanError::shape_mismatch(&layer.name, format!("{} is too large to flatten", layer.input))
            })?;
            let linear = Linear::new(context, &layer.name, in_features, *units);
            linear.forward(x)
        }
        LayerSpec::Activation { activation } => return Ok(activate(x, *activation)),
        LayerSpec::Reshape { .. } => Reshape::new(layer.output.to_shape()).forward(x),
        LayerSpec::Conv2d { filters, kernel_size, stride, .. } => {
            let config = conv_config(layer, *filters, *kernel_size, *stride)?;
            Conv2d::from_config(context, &layer.name, config).forward(x)
        }
        LayerSpec::ConvTranspose2d { filters, kernel_size, stride, .. } => {
            let config = conv_config(layer, *filters, *kernel_size, *stride)?;
            ConvTranspose2d::from_config(context, &layer.name, config).forward(x)
        }
        LayerSpec::Flatten => Flatten.forward(x),
        LayerSpec::Dropout { rate } => Dropout::new(*rate).forward(x),
    };

    Ok(match layer.spec.activation() {
        Some(activation) => activate(&output, activation),
        None => output,
    })
}

fn check_declared_parameters(graph: &Asg, plan: &[PlannedLayer]) -> Result<()> {
    for layer in plan {
        for (name, planned) in &layer.parameters {
            let node = graph
                .find_data_node(name)
                .and_then(|id| graph.get_node(id))
                .map_err(|e| GanError::shape_mismatch(&layer.name, e.to_string()))?;
            if node.shape.as_ref() != Some(planned) {
                return Err(GanError::shape_mismatch(
                    &layer.name,
                    format!(
                        "{} declared as {:?}, planned as {:?}",
                        name, node.shape, planned
                    ),
                ));
            }
        }
    }
    Ok(())
}

fn conv_config(
    layer: &PlannedLayer,
    filters: usize,
    kernel_size: usize,
    stride: usize,
) -> Result<Conv2dConfig> {
    let image = layer.input.as_image().ok_or_else(|| {
        GanError::shape_mismatch(&layer.name, format!("expected an image input, got {}", layer.input))
    })?;
    let padding = layer.padding.unwrap_or(((0, 0), (0, 0)));

    Ok(Conv2dConfig::new(image.channels, filters, (kernel_size, kernel_size))
        .with_stride((stride, stride))
        .with_padding(padding))
}
