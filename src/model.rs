//! Built models and their parameters.
//!
//! A [`Model`] is the graph produced by the generic builder plus the planned
//! layer table it came from. Weights live outside the model, in a
//! [`ParameterStore`], so the same topology can be run with different
//! parameter sets.

use crate::analysis::shape_inference::{ShapeInference, ShapeInferenceError};
use crate::architecture::{Architecture, FeatureShape, ImageShape, ModelSummary, PlannedLayer};
use crate::asg::{Asg, DType, NodeId, Shape, Value};
use crate::error::{GanError, Result};
use crate::runtime::backend::{Backend, Memo, RuntimeError};
use ndarray::{ArrayD, IxDyn};
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashMap;
use tracing::debug;

/// Name of the single data input of every model graph.
pub const INPUT_NAME: &str = "input";

/// Named parameter tensors.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterStore {
    values: HashMap<String, ArrayD<f32>>,
}

impl ParameterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: ArrayD<f32>) -> Option<ArrayD<f32>> {
        self.values.insert(name.into(), value)
    }

    pub fn get(&self, name: &str) -> Option<&ArrayD<f32>> {
        self.values.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut ArrayD<f32>> {
        self.values.get_mut(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ArrayD<f32>)> {
        self.values.iter()
    }

    /// Total number of scalars across all tensors.
    pub fn element_count(&self) -> usize {
        self.values.values().map(|v| v.len()).sum()
    }
}

/// Glorot-uniform bound for a dense `[in, out]` or conv `[a, b, kh, kw]` kernel.
fn glorot_limit(shape: &[usize]) -> f32 {
    let (fan_in, fan_out) = match shape {
        [fan_in, fan_out] => (*fan_in, *fan_out),
        [a, b, rest @ ..] => {
            let receptive: usize = rest.iter().product();
            (a * receptive, b * receptive)
        }
        [n] => (*n, *n),
        [] => (1, 1),
    };
    (6.0 / (fan_in + fan_out).max(1) as f32).sqrt()
}

/// A graph-backed feed-forward model.
#[derive(Debug, Clone)]
pub struct Model {
    architecture: Architecture,
    layers: Vec<PlannedLayer>,
    graph: Asg,
    input_node: NodeId,
    output_node: NodeId,
}

impl Model {
    pub(crate) fn new(
        architecture: Architecture,
        layers: Vec<PlannedLayer>,
        graph: Asg,
        input_node: NodeId,
        output_node: NodeId,
    ) -> Self {
        Self {
            architecture,
            layers,
            graph,
            input_node,
            output_node,
        }
    }

    pub fn name(&self) -> &str {
        &self.architecture.name
    }

    pub fn architecture(&self) -> &Architecture {
        &self.architecture
    }

    pub fn layers(&self) -> &[PlannedLayer] {
        &self.layers
    }

    /// The graph with per-sample shapes unresolved.
    pub fn graph(&self) -> &Asg {
        &self.graph
    }

    pub fn input_node(&self) -> NodeId {
        self.input_node
    }

    pub fn output_node(&self) -> NodeId {
        self.output_node
    }

    /// Per-sample input shape.
    pub fn input_shape(&self) -> FeatureShape {
        self.architecture.input
    }

    /// Per-sample output shape.
    pub fn output_shape(&self) -> FeatureShape {
        self.layers
            .last()
            .map(|layer| layer.output)
            .unwrap_or(self.architecture.input)
    }

    /// Output as an image, if the model produces one.
    pub fn image_output_shape(&self) -> Option<ImageShape> {
        self.output_shape().as_image()
    }

    /// Input as an image, if the model consumes one.
    pub fn image_input_shape(&self) -> Option<ImageShape> {
        self.input_shape().as_image()
    }

    /// Parameter names and shapes in registration order.
    pub fn parameter_shapes(&self) -> impl Iterator<Item = &(String, Shape)> {
        self.layers.iter().flat_map(|layer| layer.parameters.iter())
    }

    pub fn parameter_count(&self) -> usize {
        self.layers.iter().map(PlannedLayer::parameter_count).sum()
    }

    pub fn summary(&self) -> ModelSummary {
        ModelSummary::new(self.name(), self.input_shape(), &self.layers)
    }

    /// Fresh parameters: Glorot-uniform kernels and zero biases.
    ///
    /// The same seed always yields the same store.
    pub fn init_parameters(&self, seed: u64) -> ParameterStore {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut store = ParameterStore::new();

        for (name, shape) in self.parameter_shapes() {
            let value = if name.ends_with(".bias") {
                ArrayD::zeros(IxDyn(shape))
            } else {
                let limit = glorot_limit(shape);
                ArrayD::random_using(IxDyn(shape), Uniform::new(-limit, limit), &mut rng)
            };
            store.insert(name.clone(), value);
        }

        debug!(model = self.name(), tensors = store.len(), seed, "initialized parameters");
        store
    }

    /// A copy of the graph with every node shape resolved for `batch` samples.
    ///
    /// Fails with `ShapeMismatch` if inference disagrees with the planned
    /// output shape.
    pub fn graph_for_batch(&self, batch: usize) -> Result<Asg> {
        // Parameter nodes carry their declared shapes; only the input varies.
        let initial_shapes: HashMap<String, (Shape, DType)> = HashMap::from([(
            INPUT_NAME.to_string(),
            (self.input_shape().with_batch(batch), DType::F32),
        )]);

        let mut graph = self.graph.clone();
        ShapeInference::run(&mut graph, &initial_shapes)
            .map_err(|e| GanError::shape_mismatch(self.name(), e.to_string()))?;

        let expected = self.output_shape().with_batch(batch);
        let inferred = graph
            .get_node(self.output_node)
            .map_err(ShapeInferenceError::from)?
            .shape
            .clone();
        if inferred.as_ref() != Some(&expected) {
            return Err(GanError::shape_mismatch(
                self.name(),
                format!(
                    "graph output shape {:?} disagrees with planned {:?}",
                    inferred, expected
                ),
            ));
        }
        Ok(graph)
    }

    /// Runs the model on a batch.
    ///
    /// `input` must be `[N, ...]` with the per-sample input shape after the
    /// batch axis. Returns `[N, ...]` with the per-sample output shape.
    pub fn forward<B: Backend>(
        &self,
        backend: &B,
        params: &ParameterStore,
        input: &ArrayD<f32>,
    ) -> Result<ArrayD<f32>> {
        let expected = self.input_shape().to_shape();
        let location = format!("{}.input", self.name());
        let Some((&batch, sample)) = input.shape().split_first() else {
            return Err(GanError::shape_mismatch(location, "input has no batch axis"));
        };
        if batch == 0 || sample != expected.as_slice() {
            return Err(GanError::shape_mismatch(
                location,
                format!(
                    "expected [N >= 1, {}], got {:?}",
                    expected
                        .iter()
                        .map(|d| d.to_string())
                        .collect::<Vec<_>>()
                        .join(", "),
                    input.shape()
                ),
            ));
        }

        let mut data = HashMap::new();
        data.insert(INPUT_NAME.to_string(), Value::Tensor(input.clone()));
        for (name, shape) in self.parameter_shapes() {
            let Some(value) = params.get(name) else {
                let node = self
                    .graph
                    .find_data_node(name)
                    .map_err(ShapeInferenceError::from)?;
                return Err(RuntimeError::MissingParameter(name.clone(), node).into());
            };
            if value.shape() != shape.as_slice() {
                return Err(GanError::shape_mismatch(
                    name.as_str(),
                    format!("expected parameter shape {:?}, got {:?}", shape, value.shape()),
                ));
            }
            data.insert(name.clone(), Value::Tensor(value.clone()));
        }

        let graph = self.graph_for_batch(batch)?;

        let device_data = backend.load_data(&data)?;
        let mut memo: Memo<B::DeviceData> = HashMap::new();
        for (name, value) in device_data {
            let node = graph.find_data_node(&name).map_err(ShapeInferenceError::from)?;
            memo.insert((graph.id, node), value);
        }

        let (outputs, _) = backend.run(&graph, memo)?;
        let mut values = backend.retrieve_data(&outputs)?;
        match values.pop() {
            Some(Value::Tensor(array)) => Ok(array),
            Some(Value::ScalarF32(_)) => Err(RuntimeError::TypeError {
                expected: "Tensor".to_string(),
                actual: "ScalarF32".to_string(),
            }
            .into()),
            None => Err(RuntimeError::NodeNotFound(self.output_node, graph.id).into()),
        }
    }
}
