//! # Graph Analysis Module
//!
//! Analysis passes that process the ASG before execution.
//!
//! - [`ShapeInference`](shape_inference::ShapeInference): propagates tensor
//!   shapes through the graph, detecting shape mismatches before runtime.
//!
//! ```text
//! ASG (untyped) -> Shape Inference -> ASG (with shapes/dtypes)
//! ```
//!
//! Knowing every node's shape up front is what lets the builders fail at
//! construction time and lets the CPU backend check a memory budget before
//! running.

pub mod shape_inference;
