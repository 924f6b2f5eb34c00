//! Loss functors comparing network output with labels
//!
//! A loss functor returns the scalar loss averaged over the batch and the
//! gradient of the per-sample loss with respect to each output element. The
//! batch averaging of the gradient happens in the parameter updates.

use crate::error::{ensure_shape, CnnResult};
use crate::tensor::Tensor;

/// Probabilities are clamped to this value before taking a logarithm or dividing.
pub const PROBABILITY_FLOOR: f32 = 1e-10;

/// Scores network output against labels.
pub trait LossFunctor {
    /// Name used by architecture files and logs.
    fn name(&self) -> &'static str;

    /// Scalar loss, averaged over the batch count `N`.
    fn loss(&self, output: &Tensor, labels: &Tensor) -> CnnResult<f32>;

    /// Gradient of the loss with respect to `output`, shaped like `output`.
    fn gradient(&self, output: &Tensor, labels: &Tensor) -> CnnResult<Tensor>;
}

fn check_shapes(name: &str, output: &Tensor, labels: &Tensor) -> CnnResult<()> {
    ensure_shape!(
        output.shape() == labels.shape(),
        "{} loss: output {} and labels {} differ",
        name,
        output.shape(),
        labels.shape()
    );
    Ok(())
}

/// Cross entropy for probability outputs (usually after a softmax layer).
///
/// loss = -sum(label * ln(max(out, 1e-10))) / N
#[derive(Debug, Default, Clone, Copy)]
pub struct CrossEntropy;

impl LossFunctor for CrossEntropy {
    fn name(&self) -> &'static str {
        "cross_entropy"
    }

    fn loss(&self, output: &Tensor, labels: &Tensor) -> CnnResult<f32> {
        check_shapes(self.name(), output, labels)?;
        let total: f32 = output
            .data()
            .iter()
            .zip(labels.data())
            .map(|(&y, &t)| -t * y.max(PROBABILITY_FLOOR).ln())
            .sum();
        Ok(total / output.shape().number as f32)
    }

    fn gradient(&self, output: &Tensor, labels: &Tensor) -> CnnResult<Tensor> {
        check_shapes(self.name(), output, labels)?;
        let mut grad = Tensor::new(output.shape())?;
        for ((g, &y), &t) in grad
            .data_mut()
            .iter_mut()
            .zip(output.data())
            .zip(labels.data())
        {
            *g = -t / y.max(PROBABILITY_FLOOR);
        }
        Ok(grad)
    }
}

/// Mean squared error: loss = sum((out - label)^2) / (2N).
#[derive(Debug, Default, Clone, Copy)]
pub struct MeanSquaredError;

impl LossFunctor for MeanSquaredError {
    fn name(&self) -> &'static str {
        "mse"
    }

    fn loss(&self, output: &Tensor, labels: &Tensor) -> CnnResult<f32> {
        check_shapes(self.name(), output, labels)?;
        let total: f32 = output
            .data()
            .iter()
            .zip(labels.data())
            .map(|(&y, &t)| (y - t) * (y - t))
            .sum();
        Ok(total / (2.0 * output.shape().number as f32))
    }

    fn gradient(&self, output: &Tensor, labels: &Tensor) -> CnnResult<Tensor> {
        check_shapes(self.name(), output, labels)?;
        let mut grad = Tensor::new(output.shape())?;
        for ((g, &y), &t) in grad
            .data_mut()
            .iter_mut()
            .zip(output.data())
            .zip(labels.data())
        {
            *g = y - t;
        }
        Ok(grad)
    }
}

/// Look up a loss functor by the name used in architecture files.
pub fn loss_by_name(name: &str) -> Option<Box<dyn LossFunctor>> {
    match name {
        "cross_entropy" => Some(Box::new(CrossEntropy)),
        "mse" => Some(Box::new(MeanSquaredError)),
        _ => None,
    }
}
