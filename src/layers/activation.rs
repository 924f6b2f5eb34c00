//! Elementwise activation layers (ReLU, sigmoid, tanh)

use crate::error::CnnResult;
use crate::layers::{Layer, LayerState};
use crate::tensor::{Shape, Tensor};
use crate::utils::activations::{relu, relu_derivative, sigmoid, sigmoid_derivative, tanh_derivative};

/// Which nonlinearity an [`ActivationLayer`] applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationKind {
    Relu,
    Sigmoid,
    Tanh,
}

/// Applies one activation function to every element; output shape equals input shape.
///
/// # Example
///
/// ```
/// use rust_convnet::layers::{ActivationLayer, Layer};
/// use rust_convnet::tensor::{Shape, Tensor};
///
/// let mut relu = ActivationLayer::relu();
/// let shape = relu.resolve_shape(Shape::new(1, 1, 1, 2)).unwrap();
/// let input = Tensor::from_vec(shape, vec![-1.0, 2.0]).unwrap();
/// let mut output = Tensor::new(shape).unwrap();
/// relu.forward(&input, &mut output).unwrap();
/// assert_eq!(output.data(), &[0.0, 2.0]);
/// ```
pub struct ActivationLayer {
    state: LayerState,
    kind: ActivationKind,
}

impl ActivationLayer {
    pub const RELU: &'static str = "ReluLayer";
    pub const SIGMOID: &'static str = "SigmoidLayer";
    pub const TANH: &'static str = "TanhLayer";

    pub fn new(kind: ActivationKind) -> Self {
        Self {
            state: LayerState::default(),
            kind,
        }
    }

    pub fn relu() -> Self {
        Self::new(ActivationKind::Relu)
    }

    pub fn sigmoid() -> Self {
        Self::new(ActivationKind::Sigmoid)
    }

    pub fn tanh() -> Self {
        Self::new(ActivationKind::Tanh)
    }

    pub fn kind(&self) -> ActivationKind {
        self.kind
    }
}

impl Layer for ActivationLayer {
    fn layer_type(&self) -> &'static str {
        match self.kind {
            ActivationKind::Relu => Self::RELU,
            ActivationKind::Sigmoid => Self::SIGMOID,
            ActivationKind::Tanh => Self::TANH,
        }
    }

    fn state(&self) -> &LayerState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut LayerState {
        &mut self.state
    }

    fn resolve_shape(&mut self, input_shape: Shape) -> CnnResult<Shape> {
        input_shape.ensure_valid(self.layer_type())?;
        self.state.set_shapes(input_shape, input_shape);
        Ok(input_shape)
    }

    fn forward(&mut self, input: &Tensor, output: &mut Tensor) -> CnnResult<()> {
        self.state.check_forward(self.layer_type(), input, output)?;
        let f: fn(f32) -> f32 = match self.kind {
            ActivationKind::Relu => relu,
            ActivationKind::Sigmoid => sigmoid,
            ActivationKind::Tanh => f32::tanh,
        };
        for (y, &x) in output.data_mut().iter_mut().zip(input.data()) {
            *y = f(x);
        }
        Ok(())
    }

    fn backward(
        &mut self,
        input: &Tensor,
        output: &Tensor,
        mut grad_output: Tensor,
    ) -> CnnResult<Tensor> {
        self.state
            .check_backward(self.layer_type(), input, output, &grad_output)?;
        let grads = grad_output.data_mut();
        match self.kind {
            // ReLU's derivative is taken on the pre-activation input.
            ActivationKind::Relu => {
                for (g, &x) in grads.iter_mut().zip(input.data()) {
                    *g *= relu_derivative(x);
                }
            }
            ActivationKind::Sigmoid => {
                for (g, &y) in grads.iter_mut().zip(output.data()) {
                    *g *= sigmoid_derivative(y);
                }
            }
            ActivationKind::Tanh => {
                for (g, &y) in grads.iter_mut().zip(output.data()) {
                    *g *= tanh_derivative(y);
                }
            }
        }
        Ok(grad_output)
    }
}
