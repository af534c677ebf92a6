//! Module for shape and data type inference (Shape Inference).
//!
//! Traverses the computation graph and determines the shape and data type of
//! the output tensor for each node based on its input shapes and operation type.

use crate::asg::{Asg, AsgError, DType, Node, NodeId, NodeType, Shape, Value};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ShapeInferenceError {
    #[error("Graph error: {0}")]
    AsgError(#[from] AsgError),

    #[error("Incompatible shapes for operation '{op}': left operand {shape1:?}, right operand {shape2:?}.")]
    IncompatibleShapes {
        op: String,
        shape1: Shape,
        shape2: Shape,
    },

    #[error("Shape information missing for node {0}. \
             The graph may contain a cyclic dependency.")]
    MissingShapeInfo(NodeId),

    #[error("Initial shape not specified for '{0}'. \
             Add the shape to the initial_shapes HashMap when calling ShapeInference::run().")]
    MissingInitialShape(String),

    #[error("Invalid tensor rank for node {node_id}: expected {expected}D, got {actual}D.")]
    InvalidRank {
        node_id: NodeId,
        expected: usize,
        actual: usize,
    },

    #[error("Reshape at node {node_id} cannot turn {from:?} into {to:?}: element counts differ.")]
    ReshapeElementCount {
        node_id: NodeId,
        from: Shape,
        to: Shape,
    },

    #[error("Spatial underflow at node {node_id} ({op}): padded input {input:?} is smaller than kernel {kernel:?}.")]
    SpatialUnderflow {
        node_id: NodeId,
        op: &'static str,
        input: (usize, usize),
        kernel: (usize, usize),
    },

    #[error("Crop at node {node_id} removes the whole transposed output of {full:?}.")]
    CropUnderflow {
        node_id: NodeId,
        full: (usize, usize),
    },

    #[error("Broadcast error: cannot broadcast shapes {0:?} and {1:?} to a common shape.")]
    BroadcastError(Shape, Shape),
}

type Result<T> = std::result::Result<T, ShapeInferenceError>;

/// Performs shape inference over an ASG.
pub struct ShapeInference;

impl ShapeInference {
    /// Runs shape inference for the graph.
    ///
    /// Modifies the graph in-place, filling in the `shape` and `dtype` fields
    /// of every node reachable from the outputs.
    ///
    /// # Arguments
    /// * `asg` - Graph to analyze.
    /// * `initial_shapes` - Shapes and types for `Input` and `Parameter`
    ///   nodes, keyed by node name. Parameters created with a declared shape
    ///   may be omitted.
    pub fn run(asg: &mut Asg, initial_shapes: &HashMap<String, (Shape, DType)>) -> Result<()> {
        let sorted_nodes = Self::topological_sort(asg)?;

        for node_id in sorted_nodes {
            let mut node = asg.get_node(node_id)?.clone();

            let (shape, dtype) = Self::infer_node_shape(asg, &node, initial_shapes)?;

            node.shape = Some(shape);
            node.dtype = Some(dtype);
            asg.nodes.insert(node_id, node);
        }

        Ok(())
    }

    /// Shape inference for a single node.
    fn infer_node_shape(
        asg: &Asg,
        node: &Node,
        initial_shapes: &HashMap<String, (Shape, DType)>,
    ) -> Result<(Shape, DType)> {
        match &node.node_type {
            NodeType::Input { name } | NodeType::Parameter { name } => initial_shapes
                .get(name)
                .cloned()
                .or_else(|| node.shape.clone().zip(node.dtype))
                .ok_or_else(|| ShapeInferenceError::MissingInitialShape(name.clone())),

            NodeType::Literal(value) => match value {
                Value::Tensor(arr) => Ok((arr.shape().to_vec(), DType::F32)),
                Value::ScalarF32(_) => Ok((vec![], DType::F32)),
            },

            NodeType::Add(l, r) => {
                let (ls, ld) = Self::get_shape_dtype(asg, *l)?;
                let (rs, _) = Self::get_shape_dtype(asg, *r)?;
                Ok((broadcast_shapes(&ls, &rs)?, ld))
            }

            NodeType::MatrixMultiply(l, r) => {
                let (ls, ld) = Self::get_shape_dtype(asg, *l)?;
                let (rs, _) = Self::get_shape_dtype(asg, *r)?;

                if ls.len() != 2 || rs.len() != 2 {
                    return Err(ShapeInferenceError::InvalidRank {
                        node_id: node.id,
                        expected: 2,
                        actual: if ls.len() != 2 { ls.len() } else { rs.len() },
                    });
                }
                if ls[1] != rs[0] {
                    return Err(ShapeInferenceError::IncompatibleShapes {
                        op: "MatrixMultiply".to_string(),
                        shape1: ls,
                        shape2: rs,
                    });
                }

                Ok((vec![ls[0], rs[1]], ld))
            }

            // Element-wise operations - shape unchanged
            NodeType::LeakyReLU(id, _)
            | NodeType::Tanh(id)
            | NodeType::Sigmoid(id)
            | NodeType::Dropout(id, _) => Self::get_shape_dtype(asg, *id),

            NodeType::Reshape(id, target) => {
                let (shape, dtype) = Self::get_shape_dtype(asg, *id)?;
                let batch = leading_batch(node.id, &shape)?;
                let per_sample: usize = shape[1..].iter().product();
                if per_sample != target.iter().product::<usize>() {
                    return Err(ShapeInferenceError::ReshapeElementCount {
                        node_id: node.id,
                        from: shape,
                        to: target.clone(),
                    });
                }
                let mut out = vec![batch];
                out.extend_from_slice(target);
                Ok((out, dtype))
            }

            NodeType::Flatten(id) => {
                let (shape, dtype) = Self::get_shape_dtype(asg, *id)?;
                let batch = leading_batch(node.id, &shape)?;
                Ok((vec![batch, shape[1..].iter().product()], dtype))
            }

            // Conv2d: [N, C_in, H, W] x [C_out, C_in, kH, kW] -> [N, C_out, H_out, W_out]
            NodeType::Conv2d { input, weight, bias, stride, padding } => {
                let (input_shape, dtype) = Self::get_shape_dtype(asg, *input)?;
                let (weight_shape, _) = Self::get_shape_dtype(asg, *weight)?;
                expect_rank(node.id, &input_shape, 4)?;
                expect_rank(node.id, &weight_shape, 4)?;

                if input_shape[1] != weight_shape[1] {
                    return Err(ShapeInferenceError::IncompatibleShapes {
                        op: "Conv2d".to_string(),
                        shape1: input_shape,
                        shape2: weight_shape,
                    });
                }
                Self::check_bias(asg, *bias, weight_shape[0])?;

                let padded_h = input_shape[2] + padding.0 .0 + padding.0 .1;
                let padded_w = input_shape[3] + padding.1 .0 + padding.1 .1;
                let (kernel_h, kernel_w) = (weight_shape[2], weight_shape[3]);

                let (Some(span_h), Some(span_w)) =
                    (padded_h.checked_sub(kernel_h), padded_w.checked_sub(kernel_w))
                else {
                    return Err(ShapeInferenceError::SpatialUnderflow {
                        node_id: node.id,
                        op: "Conv2d",
                        input: (padded_h, padded_w),
                        kernel: (kernel_h, kernel_w),
                    });
                };

                let out_h = span_h / stride.0 + 1;
                let out_w = span_w / stride.1 + 1;
                Ok((vec![input_shape[0], weight_shape[0], out_h, out_w], dtype))
            }

            // ConvTranspose2d: [N, C_in, H, W] x [C_in, C_out, kH, kW] -> [N, C_out, H_out, W_out]
            NodeType::ConvTranspose2d { input, weight, bias, stride, padding } => {
                let (input_shape, dtype) = Self::get_shape_dtype(asg, *input)?;
                let (weight_shape, _) = Self::get_shape_dtype(asg, *weight)?;
                expect_rank(node.id, &input_shape, 4)?;
                expect_rank(node.id, &weight_shape, 4)?;

                if input_shape[1] != weight_shape[0] {
                    return Err(ShapeInferenceError::IncompatibleShapes {
                        op: "ConvTranspose2d".to_string(),
                        shape1: input_shape,
                        shape2: weight_shape,
                    });
                }
                Self::check_bias(asg, *bias, weight_shape[1])?;

                let full_h = input_shape[2].saturating_sub(1) * stride.0 + weight_shape[2];
                let full_w = input_shape[3].saturating_sub(1) * stride.1 + weight_shape[3];
                let crop_h = padding.0 .0 + padding.0 .1;
                let crop_w = padding.1 .0 + padding.1 .1;

                if crop_h >= full_h || crop_w >= full_w {
                    return Err(ShapeInferenceError::CropUnderflow {
                        node_id: node.id,
                        full: (full_h, full_w),
                    });
                }

                Ok((
                    vec![input_shape[0], weight_shape[1], full_h - crop_h, full_w - crop_w],
                    dtype,
                ))
            }
        }
    }

    fn check_bias(asg: &Asg, bias: Option<NodeId>, channels: usize) -> Result<()> {
        if let Some(bias_id) = bias {
            let (bias_shape, _) = Self::get_shape_dtype(asg, bias_id)?;
            if bias_shape != [channels] {
                return Err(ShapeInferenceError::IncompatibleShapes {
                    op: "Bias".to_string(),
                    shape1: bias_shape,
                    shape2: vec![channels],
                });
            }
        }
        Ok(())
    }

    /// Returns the already computed shape and type of a node.
    fn get_shape_dtype(asg: &Asg, node_id: NodeId) -> Result<(Shape, DType)> {
        let node = asg.get_node(node_id)?;
        match (&node.shape, &node.dtype) {
            (Some(s), Some(d)) => Ok((s.clone(), *d)),
            _ => Err(ShapeInferenceError::MissingShapeInfo(node_id)),
        }
    }

    /// Performs a topological sort of the graph.
    /// Returns node IDs in an order suitable for computation.
    pub fn topological_sort(asg: &Asg) -> Result<Vec<NodeId>> {
        let mut sorted = Vec::new();
        let mut visited = HashSet::new();
        for output_id in &asg.outputs {
            Self::build_sorted_graph(*output_id, asg, &mut visited, &mut sorted)?;
        }
        Ok(sorted)
    }

    fn build_sorted_graph(
        node_id: NodeId,
        asg: &Asg,
        visited: &mut HashSet<NodeId>,
        sorted: &mut Vec<NodeId>,
    ) -> Result<()> {
        if visited.contains(&node_id) {
            return Ok(());
        }

        let node = asg.get_node(node_id)?;
        for input_id in node.node_type.dependencies() {
            Self::build_sorted_graph(input_id, asg, visited, sorted)?;
        }

        if visited.insert(node_id) {
            sorted.push(node_id);
        }
        Ok(())
    }
}

fn expect_rank(node_id: NodeId, shape: &Shape, expected: usize) -> Result<()> {
    if shape.len() != expected {
        return Err(ShapeInferenceError::InvalidRank {
            node_id,
            expected,
            actual: shape.len(),
        });
    }
    Ok(())
}

fn leading_batch(node_id: NodeId, shape: &Shape) -> Result<usize> {
    shape.first().copied().ok_or(ShapeInferenceError::InvalidRank {
        node_id,
        expected: 1,
        actual: 0,
    })
}

/// NumPy-style broadcasting of two shapes.
pub fn broadcast_shapes(a: &Shape, b: &Shape) -> Result<Shape> {
    let rank = a.len().max(b.len());
    let mut out = vec![0; rank];
    for i in 0..rank {
        let da = if i < rank - a.len() { 1 } else { a[i - (rank - a.len())] };
        let db = if i < rank - b.len() { 1 } else { b[i - (rank - b.len())] };
        out[i] = match (da, db) {
            (x, y) if x == y => x,
            (1, y) => y,
            (x, 1) => x,
            _ => return Err(ShapeInferenceError::BroadcastError(a.clone(), b.clone())),
        };
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::{GraphContext, Tensor};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn shapes(entries: &[(&str, Shape)]) -> HashMap<String, (Shape, DType)> {
        entries
            .iter()
            .map(|(name, shape)| (name.to_string(), (shape.clone(), DType::F32)))
            .collect()
    }

    #[test]
    fn test_broadcasting_rules() {
        assert_eq!(broadcast_shapes(&vec![4, 3], &vec![3]), Ok(vec![4, 3]));
        assert_eq!(broadcast_shapes(&vec![4, 1], &vec![1, 5]), Ok(vec![4, 5]));
        assert!(broadcast_shapes(&vec![4, 3], &vec![2]).is_err());
    }

    #[test]
    fn test_conv_and_transpose_shapes() {
        let context = Rc::new(RefCell::new(GraphContext::new()));
        let x = Tensor::new_input(&context, "x");
        let w1 = Tensor::new_parameter(&context, "w1", vec![8, 3, 5, 5]);
        let w2 = Tensor::new_parameter(&context, "w2", vec![8, 4, 4, 4]);
        let y = x
            .conv2d(&w1, None, (1, 1), ((2, 2), (2, 2)))
            .conv_transpose2d(&w2, None, (2, 2), ((1, 1), (1, 1)));

        let mut graph = context.borrow().main_graph().clone();
        graph.set_output(y.node_id);
        // Parameter shapes come from their declarations.
        let initial = shapes(&[("x", vec![2, 3, 16, 16])]);
        ShapeInference::run(&mut graph, &initial).unwrap();

        assert_eq!(graph.get_node(y.node_id).unwrap().shape, Some(vec![2, 4, 32, 32]));
    }

    #[test]
    fn test_kernel_larger_than_input_is_underflow() {
        let context = Rc::new(RefCell::new(GraphContext::new()));
        let x = Tensor::new_input(&context, "x");
        let w = Tensor::new_parameter(&context, "w", vec![1, 1, 4, 4]);
        let y = x.conv2d(&w, None, (2, 2), ((0, 0), (0, 0)));

        let mut graph = context.borrow().main_graph().clone();
        graph.set_output(y.node_id);
        let initial = shapes(&[("x", vec![1, 1, 2, 2]), ("w", vec![1, 1, 4, 4])]);

        let err = ShapeInference::run(&mut graph, &initial).unwrap_err();
        assert!(matches!(err, ShapeInferenceError::SpatialUnderflow { op: "Conv2d", .. }));
    }

    #[test]
    fn test_reshape_checks_element_count() {
        let context = Rc::new(RefCell::new(GraphContext::new()));
        let x = Tensor::new_input(&context, "x");
        let good = x.reshape(vec![2, 3, 4]);
        let bad = x.reshape(vec![5, 5]);

        let mut graph = context.borrow().main_graph().clone();
        graph.set_output(good.node_id);
        let initial = shapes(&[("x", vec![7, 24])]);
        ShapeInference::run(&mut graph, &initial).unwrap();
        assert_eq!(graph.get_node(good.node_id).unwrap().shape, Some(vec![7, 2, 3, 4]));

        graph.set_output(bad.node_id);
        assert!(matches!(
            ShapeInference::run(&mut graph, &initial),
            Err(ShapeInferenceError::ReshapeElementCount { .. })
        ));
    }

    #[test]
    fn test_missing_initial_shape_is_reported() {
        let context = Rc::new(RefCell::new(GraphContext::new()));
        let x = Tensor::new_input(&context, "x");
        let y = x.flatten();
        let mut graph = context.borrow().main_graph().clone();
        graph.set_output(y.node_id);

        assert_eq!(
            ShapeInference::run(&mut graph, &HashMap::new()),
            Err(ShapeInferenceError::MissingInitialShape("x".to_string()))
        );
    }
}
