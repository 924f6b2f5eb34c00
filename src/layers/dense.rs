//! Fully connected layer implementation
//!
//! Every output unit sees the whole flattened `(C, H, W)` sample:
//! `y[n, o] = sum_k W[o, k] * x[n, k] + b[o]`. The output is shaped
//! `(N, outputs, 1, 1)` so convolutional stacks can feed straight into it.

use crate::error::{ensure_format, ensure_shape, CnnError, CnnResult};
use crate::layers::{Layer, LayerState};
use crate::serialize::{RecordReader, RecordWriter};
use crate::tensor::{Shape, Tensor};
use crate::utils::SimpleRng;
use tracing::debug;

const INIT_MEAN: f32 = 0.0;
const INIT_STD: f32 = 0.1;
const DEFAULT_SEED: u64 = 0xfc_5eed;

/// Fully connected layer with optional bias.
///
/// # Fields
///
/// * `outputs` - Number of output units
/// * `enabled_bias` - Whether a per-unit bias is added
/// * `weights` - Weights shaped `(outputs, in_channels, in_height, in_width)`
/// * `bias` - Bias shaped `(outputs, 1, 1, 1)`
///
/// # Example
///
/// ```
/// use rust_convnet::layers::{FullyConnectedLayer, Layer};
/// use rust_convnet::tensor::Shape;
///
/// let mut layer = FullyConnectedLayer::new(10, true).unwrap();
/// let out = layer.resolve_shape(Shape::new(8, 6, 4, 4)).unwrap();
/// assert_eq!(out, Shape::new(8, 10, 1, 1));
/// assert_eq!(layer.parameter_count(), 10 * 6 * 4 * 4 + 10);
/// ```
pub struct FullyConnectedLayer {
    state: LayerState,
    outputs: usize,
    enabled_bias: bool,
    weights: Option<Tensor>,
    bias: Option<Tensor>,
    rng: SimpleRng,
}

impl FullyConnectedLayer {
    pub const TYPE: &'static str = "FullconnectLayer";

    pub fn new(outputs: usize, enabled_bias: bool) -> CnnResult<Self> {
        ensure_shape!(outputs > 0, "fully connected layer needs at least one output");
        Ok(Self {
            state: LayerState::default(),
            outputs,
            enabled_bias,
            weights: None,
            bias: None,
            rng: SimpleRng::new(DEFAULT_SEED),
        })
    }

    /// Use `seed` for the weight initialization performed at first resolution.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = SimpleRng::new(seed);
        self
    }

    pub fn outputs(&self) -> usize {
        self.outputs
    }

    pub fn enabled_bias(&self) -> bool {
        self.enabled_bias
    }

    pub fn weights(&self) -> Option<&Tensor> {
        self.weights.as_ref()
    }

    pub fn bias(&self) -> Option<&Tensor> {
        self.bias.as_ref()
    }

    /// Overwrite the weights. The layer must be resolved.
    pub fn set_weights(&mut self, values: &[f32]) -> CnnResult<()> {
        let weights = self
            .weights
            .as_mut()
            .ok_or_else(|| CnnError::state("weights are not allocated before resolution"))?;
        ensure_shape!(
            values.len() == weights.len(),
            "weights {} need {} values, got {}",
            weights.shape(),
            weights.len(),
            values.len()
        );
        weights.data_mut().copy_from_slice(values);
        Ok(())
    }

    pub fn set_bias(&mut self, values: &[f32]) -> CnnResult<()> {
        let bias = self
            .bias
            .as_mut()
            .ok_or_else(|| CnnError::state("bias is disabled or not yet allocated"))?;
        ensure_shape!(
            values.len() == bias.len(),
            "bias needs {} values, got {}",
            bias.len(),
            values.len()
        );
        bias.data_mut().copy_from_slice(values);
        Ok(())
    }

    fn allocate_parameters(&mut self, input_shape: Shape) -> CnnResult<()> {
        let weight_shape = Shape::new(
            self.outputs,
            input_shape.channels,
            input_shape.height,
            input_shape.width,
        );
        if self.weights.as_ref().map_or(true, |w| w.shape() != weight_shape) {
            let mut weights = Tensor::new(weight_shape)?;
            self.rng.fill_normal(weights.data_mut(), INIT_MEAN, INIT_STD);
            self.weights = Some(weights);
        }

        if self.enabled_bias {
            let bias_shape = Shape::new(self.outputs, 1, 1, 1);
            if self.bias.as_ref().map_or(true, |b| b.shape() != bias_shape) {
                self.bias = Some(Tensor::new(bias_shape)?);
            }
        } else {
            self.bias = None;
        }
        Ok(())
    }
}

impl Default for FullyConnectedLayer {
    fn default() -> Self {
        Self {
            state: LayerState::default(),
            outputs: 1,
            enabled_bias: false,
            weights: None,
            bias: None,
            rng: SimpleRng::new(DEFAULT_SEED),
        }
    }
}

impl Layer for FullyConnectedLayer {
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
        input_shape.ensure_valid("fully connected input")?;
        ensure_shape!(self.outputs > 0, "fully connected layer needs at least one output");
        let output_shape = Shape::new(input_shape.number, self.outputs, 1, 1);

        self.allocate_parameters(input_shape)?;
        self.state.set_shapes(input_shape, output_shape);
        debug!(input = %input_shape, output = %output_shape, "resolved fully connected");
        Ok(output_shape)
    }

    fn forward(&mut self, input: &Tensor, output: &mut Tensor) -> CnnResult<()> {
        self.state.check_forward(Self::TYPE, input, output)?;
        let weights = self
            .weights
            .as_ref()
            .ok_or_else(|| CnnError::state("fully connected weights not allocated"))?;
        let fan_in = input.shape().size_3d();
        let w_data = weights.data();
        let bias = if self.enabled_bias {
            self.bias.as_ref().map(|b| b.data())
        } else {
            None
        };

        for n in 0..input.shape().number {
            let x = input.sample(n);
            let y = output.sample_mut(n);
            for (o, y_o) in y.iter_mut().enumerate() {
                let row = &w_data[o * fan_in..(o + 1) * fan_in];
                let sum: f32 = row.iter().zip(x).map(|(w, x)| w * x).sum();
                *y_o = sum + bias.map_or(0.0, |b| b[o]);
            }
        }
        Ok(())
    }

    fn backward(
        &mut self,
        input: &Tensor,
        output: &Tensor,
        grad_output: Tensor,
    ) -> CnnResult<Tensor> {
        self.state.check_backward(Self::TYPE, input, output, &grad_output)?;
        let in_shape = input.shape();
        let fan_in = in_shape.size_3d();
        let batch = in_shape.number;

        let mut grad_input = Tensor::new(in_shape)?;
        let mut grad_weights = vec![0.0f32; self.outputs * fan_in];
        let mut grad_bias = vec![0.0f32; self.outputs];

        {
            let weights = self
                .weights
                .as_ref()
                .ok_or_else(|| CnnError::state("fully connected weights not allocated"))?;
            let w_data = weights.data();

            for n in 0..batch {
                let x = input.sample(n);
                let g = grad_output.sample(n);
                let gx = grad_input.sample_mut(n);
                for (o, &g_o) in g.iter().enumerate() {
                    grad_bias[o] += g_o;
                    let row = o * fan_in..(o + 1) * fan_in;
                    for ((gx_k, gw_k), (&w_k, &x_k)) in gx
                        .iter_mut()
                        .zip(&mut grad_weights[row.clone()])
                        .zip(w_data[row].iter().zip(x))
                    {
                        *gx_k += g_o * w_k;
                        *gw_k += g_o * x_k;
                    }
                }
            }
        }

        let step = self.state.learning_rate() / batch as f32;
        if let Some(weights) = self.weights.as_mut() {
            for (w, g) in weights.data_mut().iter_mut().zip(grad_weights.iter()) {
                *w -= step * g;
            }
        }
        if self.enabled_bias {
            if let Some(bias) = self.bias.as_mut() {
                for (b, g) in bias.data_mut().iter_mut().zip(grad_bias.iter()) {
                    *b -= step * g;
                }
            }
        }

        Ok(grad_input)
    }

    fn serialize(&self, writer: &mut RecordWriter) {
        writer.write_tag(Self::TYPE);
        writer.write_usize(self.outputs);
        writer.write_bool(self.enabled_bias);
        if let Some(weights) = &self.weights {
            writer.write_f32s(weights.data());
        }
        if self.enabled_bias {
            if let Some(bias) = &self.bias {
                writer.write_f32s(bias.data());
            }
        }
    }

    fn deserialize(&mut self, reader: &mut RecordReader<'_>) -> CnnResult<()> {
        reader.expect_tag(Self::TYPE)?;
        let outputs = reader.read_usize("output count")?;
        let enabled_bias = reader.read_bool("bias flag")?;
        ensure_format!(outputs > 0, "fully connected record has zero outputs");
        let input_shape = self.state.input_shape();
        let bias_count = if enabled_bias { outputs } else { 0 };
        reader.ensure_available(
            "fully connected parameter",
            Shape::new(outputs, input_shape.channels, input_shape.height, input_shape.width)
                .checked_size_4d()
                .and_then(|weights| weights.checked_add(bias_count)),
        )?;
        self.outputs = outputs;
        self.enabled_bias = enabled_bias;

        self.resolve_shape(input_shape)?;
        if let Some(weights) = self.weights.as_mut() {
            reader.read_f32_into("weights", weights.data_mut())?;
        }
        if self.enabled_bias {
            if let Some(bias) = self.bias.as_mut() {
                reader.read_f32_into("bias", bias.data_mut())?;
            }
        }
        Ok(())
    }

    fn parameter_count(&self) -> usize {
        self.weights.as_ref().map_or(0, Tensor::len) + self.bias.as_ref().map_or(0, Tensor::len)
    }
}
