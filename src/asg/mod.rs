//! ASG: Abstract Semantic Graph.
//!
//! The intermediate representation both networks are built into. Nodes are
//! appended by [`crate::tensor::Tensor`] operations; analysis passes fill in
//! `shape`/`dtype`; backends evaluate the graph.

use ndarray::ArrayD;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Node identifier.
pub type NodeId = usize;
/// Graph identifier.
pub type AsgId = usize;
/// Tensor shape.
pub type Shape = Vec<usize>;
/// Explicit 2D padding: `((top, bottom), (left, right))`.
pub type Padding2d = ((usize, usize), (usize, usize));

pub type AsgResult<T> = std::result::Result<T, AsgError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AsgError {
    #[error("Node with ID {0} not found")]
    NodeNotFound(NodeId),
    #[error("No node named '{0}' in the graph")]
    NamedNodeNotFound(String),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DType {
    F32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Duplicates the HashMap key for convenience.
    pub id: NodeId,
    pub name: Option<String>,
    pub node_type: NodeType,
    pub shape: Option<Shape>,
    pub dtype: Option<DType>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeType {
    // Data
    Input { name: String },
    Parameter { name: String },
    Literal(Value),

    // Binary
    Add(NodeId, NodeId),
    MatrixMultiply(NodeId, NodeId),

    // Element-wise
    LeakyReLU(NodeId, f32),
    Tanh(NodeId),
    Sigmoid(NodeId),

    // Transformations. The batch axis is always kept.
    Reshape(NodeId, Shape),
    Flatten(NodeId),

    // Convolutions over [N, C, H, W]
    Conv2d {
        input: NodeId,
        weight: NodeId,
        bias: Option<NodeId>,
        stride: (usize, usize),
        padding: Padding2d,
    },
    ConvTranspose2d {
        input: NodeId,
        weight: NodeId,
        bias: Option<NodeId>,
        stride: (usize, usize),
        /// Rows/columns cropped from the full transposed output.
        padding: Padding2d,
    },

    // Regularization
    Dropout(NodeId, f32),
}

impl NodeType {
    /// Ids of the nodes this node reads from.
    pub fn dependencies(&self) -> Vec<NodeId> {
        match self {
            NodeType::Input { .. } | NodeType::Parameter { .. } | NodeType::Literal(_) => vec![],
            NodeType::Add(a, b) | NodeType::MatrixMultiply(a, b) => vec![*a, *b],
            NodeType::LeakyReLU(a, _)
            | NodeType::Tanh(a)
            | NodeType::Sigmoid(a)
            | NodeType::Reshape(a, _)
            | NodeType::Flatten(a)
            | NodeType::Dropout(a, _) => vec![*a],
            NodeType::Conv2d { input, weight, bias, .. }
            | NodeType::ConvTranspose2d { input, weight, bias, .. } => {
                let mut deps = vec![*input, *weight];
                if let Some(b) = bias {
                    deps.push(*b);
                }
                deps
            }
        }
    }

    /// Short operation name used in error messages and summaries.
    pub fn op_name(&self) -> &'static str {
        match self {
            NodeType::Input { .. } => "Input",
            NodeType::Parameter { .. } => "Parameter",
            NodeType::Literal(_) => "Literal",
            NodeType::Add(..) => "Add",
            NodeType::MatrixMultiply(..) => "MatrixMultiply",
            NodeType::LeakyReLU(..) => "LeakyReLU",
            NodeType::Tanh(_) => "Tanh",
            NodeType::Sigmoid(_) => "Sigmoid",
            NodeType::Reshape(..) => "Reshape",
            NodeType::Flatten(_) => "Flatten",
            NodeType::Conv2d { .. } => "Conv2d",
            NodeType::ConvTranspose2d { .. } => "ConvTranspose2d",
            NodeType::Dropout(..) => "Dropout",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Tensor(ArrayD<f32>),
    ScalarF32(f32),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asg {
    pub id: AsgId,
    pub name: Option<String>,
    pub nodes: HashMap<NodeId, Node>,
    pub inputs: Vec<NodeId>,
    pub outputs: Vec<NodeId>,
}

impl Asg {
    pub fn new(id: AsgId, name: Option<String>) -> Self {
        Self { id, name, nodes: HashMap::new(), inputs: vec![], outputs: vec![] }
    }

    pub fn add_node(&mut self, name: Option<String>, node_type: NodeType) -> NodeId {
        let new_id = self.nodes.len();
        let mut node = Node { id: new_id, name, node_type, shape: None, dtype: None };

        // Literals know their shape up front so inference never misses them.
        match &node.node_type {
            NodeType::Literal(Value::Tensor(arr)) => {
                node.shape = Some(arr.shape().to_vec());
                node.dtype = Some(DType::F32);
            }
            NodeType::Literal(Value::ScalarF32(_)) => {
                node.shape = Some(vec![]);
                node.dtype = Some(DType::F32);
            }
            _ => {}
        }

        self.nodes.insert(new_id, node);
        new_id
    }

    /// Adds a `Parameter` node whose shape is declared up front.
    pub fn add_parameter(&mut self, name: &str, shape: Shape) -> NodeId {
        let id = self.add_node(
            Some(name.to_string()),
            NodeType::Parameter {
                name: name.to_string(),
            },
        );
        if let Some(node) = self.nodes.get_mut(&id) {
            node.shape = Some(shape);
            node.dtype = Some(DType::F32);
        }
        id
    }

    pub fn set_inputs(&mut self, inputs: Vec<NodeId>) {
        self.inputs = inputs;
    }

    pub fn set_outputs(&mut self, outputs: Vec<NodeId>) {
        self.outputs = outputs;
    }

    pub fn set_output(&mut self, output: NodeId) {
        self.set_outputs(vec![output]);
    }

    pub fn get_node(&self, id: NodeId) -> AsgResult<&Node> {
        self.nodes.get(&id).ok_or(AsgError::NodeNotFound(id))
    }

    pub fn get_node_mut(&mut self, id: NodeId) -> AsgResult<&mut Node> {
        self.nodes.get_mut(&id).ok_or(AsgError::NodeNotFound(id))
    }

    /// Looks up an `Input` or `Parameter` node by its data name.
    pub fn find_data_node(&self, data_name: &str) -> AsgResult<NodeId> {
        self.nodes
            .values()
            .find(|node| match &node.node_type {
                NodeType::Input { name } | NodeType::Parameter { name } => name == data_name,
                _ => false,
            })
            .map(|node| node.id)
            .ok_or_else(|| AsgError::NamedNodeNotFound(data_name.to_string()))
    }

    /// Total number of f32 elements across all nodes with a known shape.
    pub fn activation_elements(&self) -> usize {
        self.nodes
            .values()
            .filter_map(|node| node.shape.as_ref())
            .map(|shape| shape.iter().fold(1usize, |acc, &dim| acc.saturating_mul(dim)))
            .fold(0, usize::saturating_add)
    }
}
