//! Softmax layer over each sample's flattened `(C, H, W)` values.

use crate::error::CnnResult;
use crate::layers::{Layer, LayerState};
use crate::tensor::{Shape, Tensor};
use crate::utils::activations::softmax_inplace;

#[derive(Default)]
pub struct SoftmaxLayer {
    state: LayerState,
}

impl SoftmaxLayer {
    pub const TYPE: &'static str = "SoftmaxLayer";

    pub fn new() -> Self {
        Self::default()
    }
}

impl Layer for SoftmaxLayer {
    fn layer_type(&self) -> &'static str {
        Self::TYPE
    }

    fn state(&self) -> &LayerState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut LayerState {
        &mut self.state
    }

    fn resolve_shape(&mut self, input_shape: Shape) -> CnnResult<Shape> {
        input_shape.ensure_valid("softmax input")?;
        self.state.set_shapes(input_shape, input_shape);
        Ok(input_shape)
    }

    fn forward(&mut self, input: &Tensor, output: &mut Tensor) -> CnnResult<()> {
        self.state.check_forward(Self::TYPE, input, output)?;
        output.copy_from(input)?;
        for n in 0..output.shape().number {
            softmax_inplace(output.sample_mut(n));
        }
        Ok(())
    }

    /// Applies the softmax Jacobian: `dx_i = y_i * (g_i - sum_j g_j * y_j)`.
    fn backward(
        &mut self,
        input: &Tensor,
        output: &Tensor,
        mut grad_output: Tensor,
    ) -> CnnResult<Tensor> {
        self.state.check_backward(Self::TYPE, input, output, &grad_output)?;
        for n in 0..output.shape().number {
            let y = output.sample(n);
            let g = grad_output.sample_mut(n);
            let dot: f32 = g.iter().zip(y).map(|(g, y)| g * y).sum();
            for (gi, &yi) in g.iter_mut().zip(y) {
                *gi = yi * (*gi - dot);
            }
        }
        Ok(grad_output)
    }
}
