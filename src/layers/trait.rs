//! Layer trait definition
//!
//! Every layer resolves its output shape from its input shape, runs forward and
//! backward over whole [`Tensor`]s, and writes/reads its persisted record.
//! Phase, learning rate and resolved shapes live in a [`LayerState`] whose
//! setters are crate-private: only the network orchestrator changes them.

use crate::error::{ensure_shape, ensure_state, CnnResult};
use crate::serialize::{RecordReader, RecordWriter};
use crate::tensor::{Shape, Tensor};

/// Train: backward permitted, parameters mutable. Test: inference only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Train,
    Test,
}

/// Orchestration-owned scalars shared by every layer.
#[derive(Debug, Clone)]
pub struct LayerState {
    phase: Phase,
    learning_rate: f32,
    input_shape: Shape,
    output_shape: Shape,
}

impl Default for LayerState {
    fn default() -> Self {
        Self {
            phase: Phase::Train,
            learning_rate: 0.1,
            input_shape: Shape::default(),
            output_shape: Shape::default(),
        }
    }
}

impl LayerState {
    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn learning_rate(&self) -> f32 {
        self.learning_rate
    }

    pub fn input_shape(&self) -> Shape {
        self.input_shape
    }

    pub fn output_shape(&self) -> Shape {
        self.output_shape
    }

    /// Both shapes are resolved.
    pub fn is_resolved(&self) -> bool {
        self.input_shape.is_valid() && self.output_shape.is_valid()
    }

    pub(crate) fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
    }

    pub(crate) fn set_learning_rate(&mut self, learning_rate: f32) {
        self.learning_rate = learning_rate;
    }

    pub(crate) fn set_input_shape(&mut self, shape: Shape) {
        self.input_shape = shape;
    }

    pub(crate) fn set_shapes(&mut self, input: Shape, output: Shape) {
        self.input_shape = input;
        self.output_shape = output;
    }

    /// Forward precondition: the layer is resolved and both tensors carry the
    /// resolved shapes. Checked before any output element is written.
    pub(crate) fn check_forward(&self, layer: &str, input: &Tensor, output: &Tensor) -> CnnResult<()> {
        ensure_state!(self.is_resolved(), "{} used before shape resolution", layer);
        ensure_shape!(
            input.shape() == self.input_shape,
            "{} expects input {}, got {}",
            layer,
            self.input_shape,
            input.shape()
        );
        ensure_shape!(
            output.shape() == self.output_shape,
            "{} expects output {}, got {}",
            layer,
            self.output_shape,
            output.shape()
        );
        Ok(())
    }

    /// Backward precondition: Train phase plus the forward shape checks on the
    /// input, output and output gradient.
    pub(crate) fn check_backward(
        &self,
        layer: &str,
        input: &Tensor,
        output: &Tensor,
        grad_output: &Tensor,
    ) -> CnnResult<()> {
        ensure_state!(
            self.phase == Phase::Train,
            "{} backward is only allowed in the train phase",
            layer
        );
        self.check_forward(layer, input, output)?;
        ensure_shape!(
            grad_output.shape() == self.output_shape,
            "{} expects output gradient {}, got {}",
            layer,
            self.output_shape,
            grad_output.shape()
        );
        Ok(())
    }
}

/// Core trait for network layers.
///
/// # Example
///
/// ```
/// use rust_convnet::layers::{ConvolutionLayer, Layer};
/// use rust_convnet::tensor::{Shape, Tensor};
///
/// let mut conv = ConvolutionLayer::new(Shape::new(4, 1, 3, 3), 1, 1, true).unwrap();
/// let out_shape = conv.resolve_shape(Shape::new(2, 1, 8, 8)).unwrap();
/// assert_eq!(out_shape, Shape::new(2, 4, 6, 6));
///
/// let input = Tensor::filled(Shape::new(2, 1, 8, 8), 1.0).unwrap();
/// let mut output = Tensor::new(out_shape).unwrap();
/// conv.forward(&input, &mut output).unwrap();
/// ```
pub trait Layer {
    /// Type tag written at the head of the layer's persisted record.
    fn layer_type(&self) -> &'static str;

    fn state(&self) -> &LayerState;

    fn state_mut(&mut self) -> &mut LayerState;

    /// Compute the output shape for `input_shape`, (re)allocating parameter
    /// buffers on first resolution, and record both shapes in the layer state.
    fn resolve_shape(&mut self, input_shape: Shape) -> CnnResult<Shape>;

    /// Read `input` and write every element of `output`.
    fn forward(&mut self, input: &Tensor, output: &mut Tensor) -> CnnResult<()>;

    /// Consume the gradient with respect to the output and return the gradient
    /// with respect to the input, updating this layer's parameters in place.
    fn backward(&mut self, input: &Tensor, output: &Tensor, grad_output: Tensor)
        -> CnnResult<Tensor>;

    /// Append this layer's record: type tag, configuration, parameter values.
    fn serialize(&self, writer: &mut RecordWriter) {
        writer.write_tag(self.layer_type());
    }

    /// Read this layer's record and re-resolve against the current input shape.
    fn deserialize(&mut self, reader: &mut RecordReader<'_>) -> CnnResult<()> {
        reader.expect_tag(self.layer_type())?;
        let input_shape = self.state().input_shape();
        self.resolve_shape(input_shape)?;
        Ok(())
    }

    /// Number of trainable scalars.
    fn parameter_count(&self) -> usize {
        0
    }
}
