//! Abstract interface (trait) for execution backends.

use crate::asg::{Asg, AsgId, NodeId, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Errors raised while executing a graph. Shared by all backends.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuntimeError {
    #[error("Node with ID {0} not found in graph {1}.")]
    NodeNotFound(NodeId, AsgId),

    #[error("Type mismatch: operation expected {expected}, got {actual}.")]
    TypeError { expected: String, actual: String },

    #[error("Tensor shape error: {0}")]
    ShapeError(String),

    #[error("Missing value for input '{0}' (node ID: {1}). Seed it in the initial memo.")]
    MissingInput(String, NodeId),

    #[error("Missing value for parameter '{0}' (node ID: {1}). Initialize parameters before running the graph.")]
    MissingParameter(String, NodeId),

    #[error("Memory error: {0}")]
    MemoryError(String),
}

/// Cache of already computed node values, keyed by `(AsgId, NodeId)`.
pub type Memo<T> = HashMap<(AsgId, NodeId), T>;

/// Whether stochastic layers are active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Dropout drops units.
    Training,
    /// Dropout is the identity; repeated runs are deterministic.
    #[default]
    Inference,
}

/// Common interface for an execution backend.
///
/// Any implementor can take an ASG and data, run the computation and hand the
/// results back.
pub trait Backend {
    /// Device-specific representation of a tensor.
    type DeviceData: std::fmt::Debug;

    /// Moves host data to the device.
    fn load_data(
        &self,
        data: &HashMap<String, Value>,
    ) -> Result<HashMap<String, Self::DeviceData>, RuntimeError>;

    /// Executes the graph using and extending the memo.
    ///
    /// # Arguments
    /// * `main_asg` - Graph to execute.
    /// * `initial_memo` - Values of inputs and parameters.
    ///
    /// # Returns
    /// The graph outputs and the final memo with every intermediate result.
    fn run(
        &self,
        main_asg: &Asg,
        initial_memo: Memo<Self::DeviceData>,
    ) -> Result<(Vec<Self::DeviceData>, Memo<Self::DeviceData>), RuntimeError>;

    /// Copies results back to the host.
    fn retrieve_data(&self, device_data: &[Self::DeviceData]) -> Result<Vec<Value>, RuntimeError>;
}
