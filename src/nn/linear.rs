//! Fully connected (dense) layer.

use crate::nn::module::Module;
use crate::tensor::{GraphContext, Tensor};
use std::cell::RefCell;
use std::rc::Rc;

/// Fully connected layer computing `y = xW + b`.
///
/// The layer holds no data. It owns symbolic handles for its weight
/// `[in_features, out_features]` and bias `[out_features]`, registered as
/// `Parameter` nodes with declared shapes.
pub struct Linear {
    pub weights: Tensor,
    pub bias: Tensor,
    pub in_features: usize,
    pub out_features: usize,
}

impl Linear {
    /// Creates a new layer, registering `{name}.weight` and `{name}.bias`.
    pub fn new(
        context: &Rc<RefCell<GraphContext>>,
        name: &str,
        in_features: usize,
        out_features: usize,
    ) -> Self {
        let weights = Tensor::new_parameter(
            context,
            &format!("{}.weight", name),
            vec![in_features, out_features],
        );
        let bias = Tensor::new_parameter(context, &format!("{}.bias", name), vec![out_features]);

        Self {
            weights,
            bias,
            in_features,
            out_features,
        }
    }
}

impl Module for Linear {
    fn forward(&self, inputs: &Tensor) -> Tensor {
        let dot_product = inputs.dot(&self.weights);
        &dot_product + &self.bias
    }

    fn parameters(&self) -> Vec<Tensor> {
        vec![self.weights.clone(), self.bias.clone()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registers_parameter_shapes() {
        let context = Rc::new(RefCell::new(GraphContext::new()));
        let linear = Linear::new(&context, "fc", 8, 3);
        let ctx = context.borrow();
        let shape_of = |t: &Tensor| ctx.main_graph().get_node(t.node_id).unwrap().shape.clone();

        assert_eq!(shape_of(&linear.weights), Some(vec![8, 3]));
        assert_eq!(shape_of(&linear.bias), Some(vec![3]));
        assert_eq!(linear.parameters().len(), 2);
    }
}
