//! Input layer: identity entry point that records the declared input shape.

use crate::error::{ensure_format, CnnResult};
use crate::layers::{Layer, LayerState};
use crate::serialize::{RecordReader, RecordWriter};
use crate::tensor::{Shape, Tensor};
use tracing::debug;

/// Passes its input through unchanged.
///
/// Its record carries the input shape so a model file fully describes the
/// data it expects, e.g. `InputLayer 16 1 28 28`.
#[derive(Default)]
pub struct InputLayer {
    state: LayerState,
}

impl InputLayer {
    pub const TYPE: &'static str = "InputLayer";

    pub fn new() -> Self {
        Self::default()
    }
}

impl Layer for InputLayer {
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
        input_shape.ensure_valid("input layer")?;
        self.state.set_shapes(input_shape, input_shape);
        debug!(shape = %input_shape, "resolved input layer");
        Ok(input_shape)
    }

    fn forward(&mut self, input: &Tensor, output: &mut Tensor) -> CnnResult<()> {
        self.state.check_forward(Self::TYPE, input, output)?;
        output.copy_from(input)
    }

    fn backward(
        &mut self,
        input: &Tensor,
        output: &Tensor,
        grad_output: Tensor,
    ) -> CnnResult<Tensor> {
        self.state.check_backward(Self::TYPE, input, output, &grad_output)?;
        Ok(grad_output)
    }

    fn serialize(&self, writer: &mut RecordWriter) {
        let shape = self.state.input_shape();
        writer.write_tag(Self::TYPE);
        writer.write_usize(shape.number);
        writer.write_usize(shape.channels);
        writer.write_usize(shape.height);
        writer.write_usize(shape.width);
    }

    fn deserialize(&mut self, reader: &mut RecordReader<'_>) -> CnnResult<()> {
        reader.expect_tag(Self::TYPE)?;
        let number = reader.read_usize("input number")?;
        let channels = reader.read_usize("input channels")?;
        let height = reader.read_usize("input height")?;
        let width = reader.read_usize("input width")?;
        let shape = Shape::new(number, channels, height, width);
        ensure_format!(
            shape.is_valid() && shape.checked_size_4d().is_some(),
            "input record has invalid shape {}",
            shape
        );

        // A network that already declared its input keeps its batch size.
        let current = self.state.input_shape();
        let resolved = if current.is_valid() {
            ensure_format!(
                current.with_number(number) == shape,
                "input record shape {} does not match the network input {}",
                shape,
                current
            );
            current
        } else {
            shape
        };
        self.resolve_shape(resolved)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_forward_and_backward() {
        let shape = Shape::new(2, 1, 1, 3);
        let mut layer = InputLayer::new();
        assert_eq!(layer.resolve_shape(shape).unwrap(), shape);

        let input = Tensor::from_vec(shape, vec![1.0, -2.0, 3.0, 4.0, 5.0, -6.0]).unwrap();
        let mut output = Tensor::new(shape).unwrap();
        layer.forward(&input, &mut output).unwrap();
        assert_eq!(output, input);

        let grad = Tensor::filled(shape, 0.5).unwrap();
        let grad_input = layer.backward(&input, &output, grad.clone()).unwrap();
        assert_eq!(grad_input, grad);
    }

    #[test]
    fn test_record_round_trip() {
        let mut layer = InputLayer::new();
        layer.resolve_shape(Shape::new(4, 3, 8, 6)).unwrap();
        let mut writer = RecordWriter::new();
        layer.serialize(&mut writer);
        let text = writer.finish();
        assert_eq!(text.trim(), "InputLayer 4 3 8 6");

        let mut restored = InputLayer::new();
        restored.deserialize(&mut RecordReader::new(&text)).unwrap();
        assert_eq!(restored.state().output_shape(), Shape::new(4, 3, 8, 6));
    }

    #[test]
    fn test_record_must_match_declared_input() {
        let mut layer = InputLayer::new();
        layer.state_mut().set_input_shape(Shape::new(2, 1, 5, 5));
        let err = layer
            .deserialize(&mut RecordReader::new("InputLayer 2 3 5 5"))
            .unwrap_err();
        assert_eq!(err.kind(), "FormatError");
    }
}
