//! CPU backend for executing an ASG.
//!
//! Walks the graph in topological order and evaluates every node with
//! `ndarray`. Convolutions are lowered to matrix products (im2col / col2im).

use super::backend::{Backend, ExecutionMode, Memo, RuntimeError};
use crate::analysis::shape_inference::{broadcast_shapes, ShapeInference};
use crate::asg::{Asg, AsgId, NodeId, NodeType, Padding2d, Value};
use crate::config::{global_backend_config, BackendConfig, MemoryPolicy};
use ndarray::{s, Array2, Array4, ArrayD, Axis, Ix2, IxDyn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::cell::RefCell;
use std::collections::HashMap;
use tracing::{debug, trace};

/// Execution context for one graph on the CPU.
struct ExecutionContext<'a> {
    asg: &'a Asg,
    mode: ExecutionMode,
    rng: &'a RefCell<StdRng>,
    /// Cache of computed values, keyed by (AsgId, NodeId).
    memo: Memo<Value>,
}

impl<'a> ExecutionContext<'a> {
    fn value(&self, node_id: NodeId) -> Result<Value, RuntimeError> {
        self.memo
            .get(&(self.asg.id, node_id))
            .cloned()
            .ok_or(RuntimeError::NodeNotFound(node_id, self.asg.id))
    }

    /// Evaluates one node; its dependencies must already be in the memo.
    fn evaluate_node(&mut self, node_id: NodeId) -> Result<(), RuntimeError> {
        let asg_id: AsgId = self.asg.id;
        if self.memo.contains_key(&(asg_id, node_id)) {
            return Ok(());
        }

        let node = self
            .asg
            .nodes
            .get(&node_id)
            .ok_or(RuntimeError::NodeNotFound(node_id, asg_id))?;

        let result = match &node.node_type {
            NodeType::Input { name } => {
                return Err(RuntimeError::MissingInput(name.clone(), node.id));
            }
            NodeType::Parameter { name } => {
                return Err(RuntimeError::MissingParameter(name.clone(), node.id));
            }
            NodeType::Literal(value) => Ok(value.clone()),

            NodeType::Add(l, r) => op_add(self.value(*l)?, self.value(*r)?),
            NodeType::MatrixMultiply(l, r) => op_matmul(self.value(*l)?, self.value(*r)?),

            NodeType::LeakyReLU(op, slope) => op_leaky_relu(self.value(*op)?, *slope),
            NodeType::Tanh(op) => op_tanh(self.value(*op)?),
            NodeType::Sigmoid(op) => op_sigmoid(self.value(*op)?),

            NodeType::Reshape(op, target) => op_reshape(self.value(*op)?, target),
            NodeType::Flatten(op) => op_flatten(self.value(*op)?),

            NodeType::Conv2d { input, weight, bias, stride, padding } => {
                let bias_val = bias.map(|b| self.value(b)).transpose()?;
                op_conv2d(self.value(*input)?, self.value(*weight)?, bias_val, *stride, *padding)
            }

            NodeType::ConvTranspose2d { input, weight, bias, stride, padding } => {
                let bias_val = bias.map(|b| self.value(b)).transpose()?;
                op_conv_transpose2d(
                    self.value(*input)?,
                    self.value(*weight)?,
                    bias_val,
                    *stride,
                    *padding,
                )
            }

            NodeType::Dropout(op, p) => {
                let operand = self.value(*op)?;
                match self.mode {
                    ExecutionMode::Inference => Ok(operand),
                    ExecutionMode::Training => {
                        op_dropout(operand, *p, &mut self.rng.borrow_mut())
                    }
                }
            }
        }?;

        trace!(node_id, op = node.node_type.op_name(), "evaluated node");
        self.memo.insert((asg_id, node_id), result);
        Ok(())
    }
}

/// Reference CPU backend.
pub struct CpuBackend {
    mode: ExecutionMode,
    memory_policy: MemoryPolicy,
    rng: RefCell<StdRng>,
}

impl CpuBackend {
    /// Inference-mode backend with the default configuration.
    pub fn new() -> Self {
        Self::with_config(ExecutionMode::Inference, &BackendConfig::default())
    }

    pub fn with_config(mode: ExecutionMode, config: &BackendConfig) -> Self {
        Self {
            mode,
            memory_policy: config.memory_policy.clone(),
            rng: RefCell::new(StdRng::seed_from_u64(config.seed)),
        }
    }

    /// Uses the process-wide configuration if one was installed, the default otherwise.
    pub fn from_global(mode: ExecutionMode) -> Self {
        match global_backend_config() {
            Some(config) => Self::with_config(mode, config),
            None => Self::with_config(mode, &BackendConfig::default()),
        }
    }

    /// Rejects the run up front when the graph's activations exceed a preallocated budget.
    fn check_memory_budget(&self, asg: &Asg) -> Result<(), RuntimeError> {
        if let MemoryPolicy::Preallocate { limit_bytes } = self.memory_policy {
            let required = asg
                .activation_elements()
                .saturating_mul(std::mem::size_of::<f32>());
            debug!(required, limit_bytes, "checking preallocated memory budget");
            if required > limit_bytes {
                return Err(RuntimeError::MemoryError(format!(
                    "graph needs {} bytes but the preallocated budget is {} bytes",
                    required, limit_bytes
                )));
            }
        }
        Ok(())
    }
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for CpuBackend {
    type DeviceData = Value;

    fn load_data(
        &self,
        data: &HashMap<String, Value>,
    ) -> Result<HashMap<String, Self::DeviceData>, RuntimeError> {
        Ok(data.clone())
    }

    fn run(
        &self,
        main_asg: &Asg,
        initial_memo: Memo<Self::DeviceData>,
    ) -> Result<(Vec<Self::DeviceData>, Memo<Self::DeviceData>), RuntimeError> {
        self.check_memory_budget(main_asg)?;

        let sorted_nodes = ShapeInference::topological_sort(main_asg)
            .map_err(|e| RuntimeError::ShapeError(format!("Topological sort failed: {}", e)))?;

        let mut context = ExecutionContext {
            asg: main_asg,
            mode: self.mode,
            rng: &self.rng,
            memo: initial_memo,
        };

        for node_id in sorted_nodes {
            context.evaluate_node(node_id)?;
        }

        let results = main_asg
            .outputs
            .iter()
            .map(|output| context.value(*output))
            .collect::<Result<Vec<_>, _>>()?;
        Ok((results, context.memo))
    }

    fn retrieve_data(&self, device_data: &[Self::DeviceData]) -> Result<Vec<Value>, RuntimeError> {
        Ok(device_data.to_vec())
    }
}

fn expect_tensor(value: Value) -> Result<ArrayD<f32>, RuntimeError> {
    match value {
        Value::Tensor(a) => Ok(a),
        Value::ScalarF32(_) => Err(RuntimeError::TypeError {
            expected: "Tensor".to_string(),
            actual: "ScalarF32".to_string(),
        }),
    }
}

fn expect_rank4(value: Value, what: &str) -> Result<Array4<f32>, RuntimeError> {
    expect_tensor(value)?
        .into_dimensionality()
        .map_err(|e| RuntimeError::ShapeError(format!("{}: {}", what, e)))
}

fn op_add(lhs: Value, rhs: Value) -> Result<Value, RuntimeError> {
    match (lhs, rhs) {
        (Value::Tensor(a), Value::Tensor(b)) => {
            broadcast_shapes(&a.shape().to_vec(), &b.shape().to_vec())
                .map_err(|e| RuntimeError::ShapeError(e.to_string()))?;
            Ok(Value::Tensor(&a + &b))
        }
        (Value::Tensor(a), Value::ScalarF32(b)) | (Value::ScalarF32(b), Value::Tensor(a)) => {
            Ok(Value::Tensor(a + b))
        }
        (Value::ScalarF32(a), Value::ScalarF32(b)) => Ok(Value::ScalarF32(a + b)),
    }
}

fn op_matmul(lhs: Value, rhs: Value) -> Result<Value, RuntimeError> {
    let a = expect_tensor(lhs)?;
    let b = expect_tensor(rhs)?;
    let a_mat = a
        .view()
        .into_dimensionality::<Ix2>()
        .map_err(|e| RuntimeError::ShapeError(format!("Matmul lhs {:?}: {}", a.shape(), e)))?;
    let b_mat = b
        .view()
        .into_dimensionality::<Ix2>()
        .map_err(|e| RuntimeError::ShapeError(format!("Matmul rhs {:?}: {}", b.shape(), e)))?;
    if a_mat.ncols() != b_mat.nrows() {
        return Err(RuntimeError::ShapeError(format!(
            "Incompatible matmul shapes: {:?} and {:?}",
            a.shape(),
            b.shape()
        )));
    }
    Ok(Value::Tensor(a_mat.dot(&b_mat).into_dyn()))
}

fn op_leaky_relu(operand: Value, negative_slope: f32) -> Result<Value, RuntimeError> {
    let a = expect_tensor(operand)?;
    Ok(Value::Tensor(a.mapv(|x| if x > 0.0 { x } else { negative_slope * x })))
}

fn op_tanh(operand: Value) -> Result<Value, RuntimeError> {
    Ok(Value::Tensor(expect_tensor(operand)?.mapv(f32::tanh)))
}

fn op_sigmoid(operand: Value) -> Result<Value, RuntimeError> {
    Ok(Value::Tensor(expect_tensor(operand)?.mapv(|x| 1.0 / (1.0 + (-x).exp()))))
}

fn op_reshape(operand: Value, target: &[usize]) -> Result<Value, RuntimeError> {
    let a = expect_tensor(operand)?;
    let batch = a.shape().first().copied().unwrap_or(1);
    let mut shape = vec![batch];
    shape.extend_from_slice(target);
    let reshaped = a
        .to_shape(IxDyn(&shape))
        .map_err(|e| RuntimeError::ShapeError(format!("Reshape {:?} -> {:?}: {}", a.shape(), shape, e)))?;
    Ok(Value::Tensor(reshaped.to_owned()))
}

fn op_flatten(operand: Value) -> Result<Value, RuntimeError> {
    let a = expect_tensor(operand)?;
    let batch = a.shape().first().copied().unwrap_or(1);
    let features: usize = a.shape().iter().skip(1).product();
    let flat = a
        .to_shape(IxDyn(&[batch, features]))
        .map_err(|e| RuntimeError::ShapeError(format!("Flatten {:?}: {}", a.shape(), e)))?;
    Ok(Value::Tensor(flat.to_owned()))
}

fn op_dropout(operand: Value, p: f32, rng: &mut StdRng) -> Result<Value, RuntimeError> {
    let a = expect_tensor(operand)?;
    if p == 0.0 {
        return Ok(Value::Tensor(a));
    }
    let scale = 1.0 / (1.0 - p);
    Ok(Value::Tensor(a.mapv(|x| if rng.gen::<f32>() < p { 0.0 } else { x * scale })))
}

fn add_channel_bias(output: &mut Array4<f32>, bias: Option<Value>) -> Result<(), RuntimeError> {
    if let Some(bias_val) = bias {
        let bias_arr = expect_tensor(bias_val)?;
        let channels = output.dim().1;
        if bias_arr.len() != channels {
            return Err(RuntimeError::ShapeError(format!(
                "Bias of length {} for {} channels",
                bias_arr.len(),
                channels
            )));
        }
        for (c, b) in bias_arr.iter().enumerate() {
            output.slice_mut(s![.., c, .., ..]).mapv_inplace(|v| v + b);
        }
    }
    Ok(())
}

/// 2D convolution via im2col.
/// Input: [N, C_in, H, W], Weight: [C_out, C_in, kH, kW], Bias: [C_out]
fn op_conv2d(
    input: Value,
    weight: Value,
    bias: Option<Value>,
    stride: (usize, usize),
    padding: Padding2d,
) -> Result<Value, RuntimeError> {
    let input_arr = expect_rank4(input, "Conv2d input")?;
    let weight_arr = expect_rank4(weight, "Conv2d weight")?;

    let (batch_size, in_channels, in_h, in_w) = input_arr.dim();
    let (out_channels, weight_in_channels, kernel_h, kernel_w) = weight_arr.dim();

    if in_channels != weight_in_channels {
        return Err(RuntimeError::ShapeError(format!(
            "Conv2d: input channels {} != weight input channels {}",
            in_channels, weight_in_channels
        )));
    }

    let ((pad_top, pad_bottom), (pad_left, pad_right)) = padding;
    let padded_h = in_h + pad_top + pad_bottom;
    let padded_w = in_w + pad_left + pad_right;
    if padded_h < kernel_h || padded_w < kernel_w {
        return Err(RuntimeError::ShapeError(format!(
            "Conv2d: kernel {}x{} larger than padded input {}x{}",
            kernel_h, kernel_w, padded_h, padded_w
        )));
    }
    let (stride_h, stride_w) = stride;
    let out_h = (padded_h - kernel_h) / stride_h + 1;
    let out_w = (padded_w - kernel_w) / stride_w + 1;

    let patch = in_channels * kernel_h * kernel_w;
    let kernel_mat = weight_arr
        .to_shape((out_channels, patch))
        .map_err(|e| RuntimeError::ShapeError(e.to_string()))?;

    let mut output = Array4::<f32>::zeros((batch_size, out_channels, out_h, out_w));
    let mut cols = Array2::<f32>::zeros((patch, out_h * out_w));

    for n in 0..batch_size {
        cols.fill(0.0);
        for ic in 0..in_channels {
            for kh in 0..kernel_h {
                for kw in 0..kernel_w {
                    let row = (ic * kernel_h + kh) * kernel_w + kw;
                    for oh in 0..out_h {
                        let ih = (oh * stride_h + kh) as isize - pad_top as isize;
                        if ih < 0 || ih >= in_h as isize {
                            continue;
                        }
                        for ow in 0..out_w {
                            let iw = (ow * stride_w + kw) as isize - pad_left as isize;
                            if iw >= 0 && iw < in_w as isize {
                                cols[[row, oh * out_w + ow]] =
                                    input_arr[[n, ic, ih as usize, iw as usize]];
                            }
                        }
                    }
                }
            }
        }

        let result = kernel_mat.dot(&cols);
        let result = result
            .to_shape((out_channels, out_h, out_w))
            .map_err(|e| RuntimeError::ShapeError(e.to_string()))?;
        output.index_axis_mut(Axis(0), n).assign(&result);
    }

    add_channel_bias(&mut output, bias)?;
    Ok(Value::Tensor(output.into_dyn()))
}

/// Transposed 2D convolution via col2im.
/// Input: [N, C_in, H, W], Weight: [C_in, C_out, kH, kW], Bias: [C_out]
fn op_conv_transpose2d(
    input: Value,
    weight: Value,
    bias: Option<Value>,
    stride: (usize, usize),
    padding: Padding2d,
) -> Result<Value, RuntimeError> {
    let input_arr = expect_rank4(input, "ConvTranspose2d input")?;
    let weight_arr = expect_rank4(weight, "ConvTranspose2d weight")?;

    let (batch_size, in_channels, in_h, in_w) = input_arr.dim();
    let (weight_in_channels, out_channels, kernel_h, kernel_w) = weight_arr.dim();

    if in_channels != weight_in_channels {
        return Err(RuntimeError::ShapeError(format!(
            "ConvTranspose2d: input channels {} != weight input channels {}",
            in_channels, weight_in_channels
        )));
    }

    let (stride_h, stride_w) = stride;
    let ((crop_top, crop_bottom), (crop_left, crop_right)) = padding;
    let full_h = in_h.saturating_sub(1) * stride_h + kernel_h;
    let full_w = in_w.saturating_sub(1) * stride_w + kernel_w;
    if crop_top + crop_bottom >= full_h || crop_left + crop_right >= full_w {
        return Err(RuntimeError::ShapeError(format!(
            "ConvTranspose2d: crop {:?} removes the whole {}x{} output",
            padding, full_h, full_w
        )));
    }
    let out_h = full_h - crop_top - crop_bottom;
    let out_w = full_w - crop_left - crop_right;

    let patch = out_channels * kernel_h * kernel_w;
    let kernel_mat = weight_arr
        .to_shape((in_channels, patch))
        .map_err(|e| RuntimeError::ShapeError(e.to_string()))?;
    let kernel_t = kernel_mat.t();

    let mut output = Array4::<f32>::zeros((batch_size, out_channels, out_h, out_w));

    for n in 0..batch_size {
        let sample = input_arr.index_axis(Axis(0), n);
        let sample_mat = sample
            .to_shape((in_channels, in_h * in_w))
            .map_err(|e| RuntimeError::ShapeError(e.to_string()))?;
        // [C_out * kH * kW, H * W]
        let cols = kernel_t.dot(&sample_mat);

        for oc in 0..out_channels {
            for kh in 0..kernel_h {
                for kw in 0..kernel_w {
                    let row = (oc * kernel_h + kh) * kernel_w + kw;
                    for ih in 0..in_h {
                        let fh = ih * stride_h + kh;
                        if fh < crop_top || fh - crop_top >= out_h {
                            continue;
                        }
                        for iw in 0..in_w {
                            let fw = iw * stride_w + kw;
                            if fw < crop_left || fw - crop_left >= out_w {
                                continue;
                            }
                            output[[n, oc, fh - crop_top, fw - crop_left]] +=
                                cols[[row, ih * in_w + iw]];
                        }
                    }
                }
            }
        }
    }

    add_channel_bias(&mut output, bias)?;
    Ok(Value::Tensor(output.into_dyn()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::{GraphContext, Tensor};
    use ndarray::{array, Array};
    use std::rc::Rc;

    fn run_literal_graph(backend: &CpuBackend, build: impl Fn(&Rc<RefCell<GraphContext>>) -> Tensor) -> ArrayD<f32> {
        let context = Rc::new(RefCell::new(GraphContext::new()));
        let out = build(&context);
        let mut graph = context.borrow().main_graph().clone();
        graph.set_output(out.node_id);
        let (outputs, _) = backend.run(&graph, HashMap::new()).unwrap();
        expect_tensor(outputs[0].clone()).unwrap()
    }

    /// Direct-loop convolution used as a reference for the im2col path.
    fn naive_conv2d(input: &Array4<f32>, weight: &Array4<f32>, stride: usize, pad: usize) -> Array4<f32> {
        let (n, c_in, h, w) = input.dim();
        let (c_out, _, kh, kw) = weight.dim();
        let out_h = (h + 2 * pad - kh) / stride + 1;
        let out_w = (w + 2 * pad - kw) / stride + 1;
        let mut out = Array4::zeros((n, c_out, out_h, out_w));
        for b in 0..n {
            for oc in 0..c_out {
                for oh in 0..out_h {
                    for ow in 0..out_w {
                        let mut sum = 0.0;
                        for ic in 0..c_in {
                            for i in 0..kh {
                                for j in 0..kw {
                                    let ih = (oh * stride + i) as isize - pad as isize;
                                    let iw = (ow * stride + j) as isize - pad as isize;
                                    if ih >= 0 && iw >= 0 && (ih as usize) < h && (iw as usize) < w {
                                        sum += input[[b, ic, ih as usize, iw as usize]] * weight[[oc, ic, i, j]];
                                    }
                                }
                            }
                        }
                        out[[b, oc, oh, ow]] = sum;
                    }
                }
            }
        }
        out
    }

    #[test]
    fn test_conv2d_matches_direct_loops() {
        let input = Array::from_shape_fn((2, 3, 6, 5), |(n, c, h, w)| {
            ((n * 7 + c * 5 + h * 3 + w) % 11) as f32 / 10.0 - 0.5
        });
        let weight = Array::from_shape_fn((4, 3, 3, 3), |(o, c, h, w)| {
            ((o * 3 + c * 2 + h + w * 5) % 7) as f32 / 7.0 - 0.4
        });
        let expected = naive_conv2d(&input, &weight, 2, 1);

        let got = op_conv2d(
            Value::Tensor(input.into_dyn()),
            Value::Tensor(weight.into_dyn()),
            None,
            (2, 2),
            ((1, 1), (1, 1)),
        )
        .unwrap();
        let got = expect_rank4(got, "out").unwrap();

        assert_eq!(got.dim(), expected.dim());
        for (a, b) in got.iter().zip(expected.iter()) {
            assert!((a - b).abs() < 1e-5, "{} vs {}", a, b);
        }
    }

    #[test]
    fn test_conv_transpose2d_scatters_kernel() {
        // A single input pixel of value 2 stamps the kernel scaled by 2.
        let input = Array4::from_elem((1, 1, 1, 1), 2.0f32);
        let weight = array![[[[1.0f32, 2.0], [3.0, 4.0]]]];
        let got = op_conv_transpose2d(
            Value::Tensor(input.into_dyn()),
            Value::Tensor(weight.into_dyn()),
            Some(Value::Tensor(array![0.5f32].into_dyn())),
            (2, 2),
            ((0, 0), (0, 0)),
        )
        .unwrap();
        let got = expect_rank4(got, "out").unwrap();
        assert_eq!(got, array![[[[2.5f32, 4.5], [6.5, 8.5]]]]);
    }

    #[test]
    fn test_conv_transpose2d_same_crop_doubles_resolution() {
        let input = Array4::from_elem((1, 2, 3, 3), 1.0f32);
        let weight = Array4::from_elem((2, 5, 4, 4), 0.1f32);
        let got = op_conv_transpose2d(
            Value::Tensor(input.into_dyn()),
            Value::Tensor(weight.into_dyn()),
            None,
            (2, 2),
            ((1, 1), (1, 1)),
        )
        .unwrap();
        assert_eq!(expect_tensor(got).unwrap().shape(), &[1, 5, 6, 6]);
    }

    #[test]
    fn test_dropout_is_identity_in_inference_and_drops_in_training() {
        let build = |ctx: &Rc<RefCell<GraphContext>>| {
            Tensor::new_literal(ctx, ArrayD::from_elem(IxDyn(&[4, 256]), 1.0), "x").dropout(0.5)
        };

        let inference = CpuBackend::new();
        let first = run_literal_graph(&inference, build);
        let second = run_literal_graph(&inference, build);
        assert!(first.iter().all(|&v| v == 1.0));
        assert_eq!(first, second);

        let training = CpuBackend::with_config(ExecutionMode::Training, &BackendConfig::default());
        let dropped = run_literal_graph(&training, build);
        let zeros = dropped.iter().filter(|&&v| v == 0.0).count();
        assert!(zeros > 0 && zeros < dropped.len());
        assert!(dropped.iter().all(|&v| v == 0.0 || (v - 2.0).abs() < 1e-6));
    }

    #[test]
    fn test_reshape_and_flatten_keep_batch_axis() {
        let backend = CpuBackend::new();
        let out = run_literal_graph(&backend, |ctx| {
            Tensor::new_literal(ctx, ArrayD::zeros(IxDyn(&[3, 12])), "x")
                .reshape(vec![3, 2, 2])
                .flatten()
        });
        assert_eq!(out.shape(), &[3, 12]);
    }

    #[test]
    fn test_preallocated_budget_rejects_large_graphs() {
        let config = BackendConfig {
            memory_policy: MemoryPolicy::Preallocate { limit_bytes: 64 },
            ..BackendConfig::default()
        };
        let backend = CpuBackend::with_config(ExecutionMode::Inference, &config);

        let context = Rc::new(RefCell::new(GraphContext::new()));
        let x = Tensor::new_literal(&context, ArrayD::zeros(IxDyn(&[8, 8])), "x");
        let y = x.tanh();
        let mut graph = context.borrow().main_graph().clone();
        graph.set_output(y.node_id);
        graph.get_node_mut(y.node_id).unwrap().shape = Some(vec![8, 8]);

        let err = backend.run(&graph, HashMap::new()).unwrap_err();
        assert!(matches!(err, RuntimeError::MemoryError(_)));
    }

    #[test]
    fn test_missing_parameter_is_reported() {
        let backend = CpuBackend::new();
        let context = Rc::new(RefCell::new(GraphContext::new()));
        let x = Tensor::new_literal(&context, ArrayD::zeros(IxDyn(&[1, 2])), "x");
        let w = Tensor::new_parameter(&context, "fc.weight", vec![2, 2]);
        let y = x.dot(&w);
        let mut graph = context.borrow().main_graph().clone();
        graph.set_output(y.node_id);

        let err = backend.run(&graph, HashMap::new()).unwrap_err();
        assert_eq!(err, RuntimeError::MissingParameter("fc.weight".to_string(), w.node_id));
    }
}
