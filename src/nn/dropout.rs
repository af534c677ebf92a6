//! Dropout layer for regularization.

use crate::nn::Module;
use crate::tensor::Tensor;

/// Dropout layer.
///
/// Adds a `Dropout` node to the graph. Whether units are actually dropped is
/// decided by the backend's execution mode: in training each element is zeroed
/// with probability `p` and the survivors are scaled by `1 / (1 - p)`; in
/// inference the node is the identity.
///
/// # Example
/// ```ignore
/// let dropout = Dropout::new(0.4);
/// let y = dropout.forward(&x);
/// ```
pub struct Dropout {
    /// Drop probability in [0, 1).
    pub p: f32,
}

impl Dropout {
    /// # Panics
    /// Panics if `p` is not in [0, 1).
    pub fn new(p: f32) -> Self {
        assert!(
            (0.0..1.0).contains(&p),
            "Dropout probability must be in [0, 1), got {}",
            p
        );
        Self { p }
    }
}

impl Module for Dropout {
    fn forward(&self, x: &Tensor) -> Tensor {
        x.dropout(self.p)
    }

    fn parameters(&self) -> Vec<Tensor> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dropout_creation() {
        let dropout = Dropout::new(0.4);
        assert_eq!(dropout.p, 0.4);
        assert!(dropout.parameters().is_empty());
    }

    #[test]
    #[should_panic(expected = "Dropout probability must be in [0, 1)")]
    fn test_dropout_invalid_p() {
        Dropout::new(1.5);
    }
}
