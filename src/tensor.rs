//! Defines `Tensor` and `GraphContext`.
//!
//! A `Tensor` is not a data container. It is a lightweight handle to a node of
//! the Abstract Semantic Graph; every operation on it appends a node instead of
//! computing anything. `GraphContext` owns the graph being built.

use crate::asg::{Asg, NodeId, NodeType, Padding2d, Shape, Value};
use ndarray::ArrayD;
use std::cell::RefCell;
use std::rc::Rc;

/// Owns the graph under construction.
///
/// Wrapped in `Rc<RefCell<_>>` so that many `Tensor` handles can share it.
#[derive(Debug, Clone)]
pub struct GraphContext {
    main_graph: Asg,
}

impl GraphContext {
    pub fn new() -> Self {
        Self::named("main")
    }

    /// Creates a context whose graph carries the given name.
    pub fn named(name: &str) -> Self {
        Self {
            main_graph: Asg::new(0, Some(name.to_string())),
        }
    }

    pub fn main_graph_mut(&mut self) -> &mut Asg {
        &mut self.main_graph
    }

    pub fn main_graph(&self) -> &Asg {
        &self.main_graph
    }
}

impl Default for GraphContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Symbolic handle to a node of the graph.
#[derive(Debug, Clone)]
pub struct Tensor {
    pub node_id: NodeId,
    pub context: Rc<RefCell<GraphContext>>,
}

impl Tensor {
    /// Creates an input node and registers it as a graph input.
    pub fn new_input(context: &Rc<RefCell<GraphContext>>, name: &str) -> Self {
        let mut ctx = context.borrow_mut();
        let graph = ctx.main_graph_mut();

        let node_id = graph.add_node(
            Some(name.to_string()),
            NodeType::Input {
                name: name.to_string(),
            },
        );
        graph.inputs.push(node_id);

        Self {
            node_id,
            context: Rc::clone(context),
        }
    }

    /// Creates a trainable parameter node. The shape is recorded on the node.
    pub fn new_parameter(context: &Rc<RefCell<GraphContext>>, name: &str, shape: Shape) -> Self {
        let node_id = context.borrow_mut().main_graph_mut().add_parameter(name, shape);
        Self {
            node_id,
            context: Rc::clone(context),
        }
    }

    /// Creates a constant node with data embedded into the graph.
    pub fn new_literal(context: &Rc<RefCell<GraphContext>>, data: ArrayD<f32>, name: &str) -> Self {
        let node_id = context.borrow_mut().main_graph_mut().add_node(
            Some(name.to_string()),
            NodeType::Literal(Value::Tensor(data)),
        );
        Self {
            node_id,
            context: Rc::clone(context),
        }
    }

    fn push(&self, node_type: NodeType) -> Self {
        let node_id = self
            .context
            .borrow_mut()
            .main_graph_mut()
            .add_node(None, node_type);
        Self {
            node_id,
            context: Rc::clone(&self.context),
        }
    }

    // --- Math ---

    pub fn dot(&self, other: &Tensor) -> Self {
        self.push(NodeType::MatrixMultiply(self.node_id, other.node_id))
    }

    // --- Activations ---

    pub fn leaky_relu(&self, negative_slope: f32) -> Self {
        self.push(NodeType::LeakyReLU(self.node_id, negative_slope))
    }

    pub fn tanh(&self) -> Self {
        self.push(NodeType::Tanh(self.node_id))
    }

    pub fn sigmoid(&self) -> Self {
        self.push(NodeType::Sigmoid(self.node_id))
    }

    // --- Transformations ---

    /// Reshapes every sample to `shape`, keeping the batch axis.
    pub fn reshape(&self, shape: Shape) -> Self {
        self.push(NodeType::Reshape(self.node_id, shape))
    }

    /// Collapses every axis after the batch axis into one.
    pub fn flatten(&self) -> Self {
        self.push(NodeType::Flatten(self.node_id))
    }

    // --- Convolutions ---

    pub fn conv2d(
        &self,
        weight: &Tensor,
        bias: Option<&Tensor>,
        stride: (usize, usize),
        padding: Padding2d,
    ) -> Self {
        self.push(NodeType::Conv2d {
            input: self.node_id,
            weight: weight.node_id,
            bias: bias.map(|b| b.node_id),
            stride,
            padding,
        })
    }

    pub fn conv_transpose2d(
        &self,
        weight: &Tensor,
        bias: Option<&Tensor>,
        stride: (usize, usize),
        padding: Padding2d,
    ) -> Self {
        self.push(NodeType::ConvTranspose2d {
            input: self.node_id,
            weight: weight.node_id,
            bias: bias.map(|b| b.node_id),
            stride,
            padding,
        })
    }

    // --- Regularization ---

    pub fn dropout(&self, p: f32) -> Self {
        self.push(NodeType::Dropout(self.node_id, p))
    }
}

impl std::ops::Add<&Tensor> for &Tensor {
    type Output = Tensor;
    fn add(self, rhs: &Tensor) -> Self::Output {
        self.push(NodeType::Add(self.node_id, rhs.node_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operations_append_nodes() {
        let context = Rc::new(RefCell::new(GraphContext::named("g")));
        let x = Tensor::new_input(&context, "x");
        let w = Tensor::new_parameter(&context, "fc.weight", vec![4, 2]);
        let y = x.dot(&w).tanh();

        let ctx = context.borrow();
        let graph = ctx.main_graph();
        assert_eq!(graph.nodes.len(), 4);
        assert_eq!(graph.inputs, vec![x.node_id]);
        assert!(matches!(graph.get_node(y.node_id).unwrap().node_type, NodeType::Tanh(_)));
        assert_eq!(graph.get_node(w.node_id).unwrap().shape, Some(vec![4, 2]));
    }
}
