//! 2D convolution layer
//!
//! Valid (unpadded) convolution with independent vertical and horizontal
//! strides. Weights are initialized from N(0, 0.1) on first shape resolution;
//! the optional bias starts at zero.

use crate::error::{ensure_format, ensure_shape, ensure_state, CnnError, CnnResult};
use crate::layers::{Layer, LayerState};
use crate::serialize::{RecordReader, RecordWriter};
use crate::tensor::{Shape, Tensor};
use crate::utils::SimpleRng;
use tracing::debug;

const INIT_MEAN: f32 = 0.0;
const INIT_STD: f32 = 0.1;
const DEFAULT_SEED: u64 = 0x5eed_c0de;

/// 2D convolution layer with learnable kernels.
///
/// # Fields
///
/// * `kernel_shape` - `(out_channels, in_channels, kernel_h, kernel_w)`; `in_channels`
///   is overwritten with the input channel count at resolution time
/// * `stride_h` / `stride_w` - Vertical and horizontal stride
/// * `enabled_bias` - Whether a per-output-channel bias is added
/// * `kernel` - Kernel weights, shaped by `kernel_shape`
/// * `bias` - Bias, shaped `(out_channels, 1, 1, 1)`
///
/// # Example
///
/// ```
/// use rust_convnet::layers::{ConvolutionLayer, Layer};
/// use rust_convnet::tensor::Shape;
///
/// // 6 filters of 5x5 over a 1x28x28 input
/// let mut layer = ConvolutionLayer::new(Shape::new(6, 1, 5, 5), 1, 1, true).unwrap();
/// let out = layer.resolve_shape(Shape::new(16, 1, 28, 28)).unwrap();
/// assert_eq!(out, Shape::new(16, 6, 24, 24));
/// assert_eq!(layer.parameter_count(), 6 * 5 * 5 + 6);
/// ```
pub struct ConvolutionLayer {
    state: LayerState,
    kernel_shape: Shape,
    stride_h: usize,
    stride_w: usize,
    enabled_bias: bool,
    kernel: Option<Tensor>,
    bias: Option<Tensor>,
    rng: SimpleRng,
}

impl ConvolutionLayer {
    pub const TYPE: &'static str = "ConvolutionLayer";

    /// Create an unresolved convolution layer.
    ///
    /// Fails with a shape error if any kernel extent or stride is zero.
    pub fn new(
        kernel_shape: Shape,
        stride_h: usize,
        stride_w: usize,
        enabled_bias: bool,
    ) -> CnnResult<Self> {
        validate_config(kernel_shape, stride_h, stride_w)?;
        Ok(Self {
            state: LayerState::default(),
            kernel_shape,
            stride_h,
            stride_w,
            enabled_bias,
            kernel: None,
            bias: None,
            rng: SimpleRng::new(DEFAULT_SEED),
        })
    }

    /// Use `seed` for the weight initialization performed at first resolution.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = SimpleRng::new(seed);
        self
    }

    pub fn kernel_shape(&self) -> Shape {
        self.kernel_shape
    }

    pub fn stride_h(&self) -> usize {
        self.stride_h
    }

    pub fn stride_w(&self) -> usize {
        self.stride_w
    }

    pub fn enabled_bias(&self) -> bool {
        self.enabled_bias
    }

    /// Kernel weights, available after resolution.
    pub fn kernel(&self) -> Option<&Tensor> {
        self.kernel.as_ref()
    }

    pub fn bias(&self) -> Option<&Tensor> {
        self.bias.as_ref()
    }

    /// Overwrite the kernel weights. The layer must be resolved.
    pub fn set_kernel(&mut self, values: &[f32]) -> CnnResult<()> {
        let kernel = self
            .kernel
            .as_mut()
            .ok_or_else(|| CnnError::state("kernel is not allocated before resolution"))?;
        ensure_shape!(
            values.len() == kernel.len(),
            "kernel {} needs {} values, got {}",
            kernel.shape(),
            kernel.len(),
            values.len()
        );
        kernel.data_mut().copy_from_slice(values);
        Ok(())
    }

    /// Overwrite the bias. The layer must be resolved with bias enabled.
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

    fn allocate_parameters(&mut self) -> CnnResult<()> {
        let kernel_stale = self
            .kernel
            .as_ref()
            .map_or(true, |k| k.shape() != self.kernel_shape);
        if kernel_stale {
            let mut kernel = Tensor::new(self.kernel_shape)?;
            self.rng.fill_normal(kernel.data_mut(), INIT_MEAN, INIT_STD);
            self.kernel = Some(kernel);
        }

        if self.enabled_bias {
            let bias_shape = Shape::new(self.kernel_shape.number, 1, 1, 1);
            if self.bias.as_ref().map_or(true, |b| b.shape() != bias_shape) {
                self.bias = Some(Tensor::new(bias_shape)?);
            }
        } else {
            self.bias = None;
        }
        Ok(())
    }
}

impl Default for ConvolutionLayer {
    fn default() -> Self {
        Self {
            state: LayerState::default(),
            kernel_shape: Shape::new(1, 1, 1, 1),
            stride_h: 1,
            stride_w: 1,
            enabled_bias: false,
            kernel: None,
            bias: None,
            rng: SimpleRng::new(DEFAULT_SEED),
        }
    }
}

fn validate_config(kernel_shape: Shape, stride_h: usize, stride_w: usize) -> CnnResult<()> {
    ensure_shape!(
        kernel_shape.is_valid() && stride_h > 0 && stride_w > 0,
        "convolution kernel {} or stride ({}, {}) is invalid",
        kernel_shape,
        stride_h,
        stride_w
    );
    Ok(())
}

/// Output extent of a valid sliding window: `(input - kernel) / stride + 1`.
///
/// Returns `None` when the window does not fit at least once.
pub fn window_output_size(input: usize, kernel: usize, stride: usize) -> Option<usize> {
    if stride == 0 || kernel == 0 || input < kernel {
        None
    } else {
        Some((input - kernel) / stride + 1)
    }
}

impl Layer for ConvolutionLayer {
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
        input_shape.ensure_valid("convolution input")?;
        self.kernel_shape.channels = input_shape.channels;
        validate_config(self.kernel_shape, self.stride_h, self.stride_w)?;

        let out_h = window_output_size(input_shape.height, self.kernel_shape.height, self.stride_h);
        let out_w = window_output_size(input_shape.width, self.kernel_shape.width, self.stride_w);
        let (out_h, out_w) = match (out_h, out_w) {
            (Some(h), Some(w)) => (h, w),
            _ => {
                return Err(CnnError::shape(format!(
                    "convolution kernel {} does not fit input {}",
                    self.kernel_shape, input_shape
                )))
            }
        };

        let output_shape = Shape::new(input_shape.number, self.kernel_shape.number, out_h, out_w);
        output_shape.ensure_valid("convolution output")?;

        self.allocate_parameters()?;
        self.state.set_shapes(input_shape, output_shape);
        debug!(input = %input_shape, output = %output_shape, kernel = %self.kernel_shape, "resolved convolution");
        Ok(output_shape)
    }

    fn forward(&mut self, input: &Tensor, output: &mut Tensor) -> CnnResult<()> {
        self.state.check_forward(Self::TYPE, input, output)?;
        let kernel = self
            .kernel
            .as_ref()
            .ok_or_else(|| CnnError::state("convolution kernel not allocated"))?;
        let kernel_shape = self.kernel_shape;
        let in_shape = input.shape();
        let out_shape = output.shape();
        let in_data = input.data();
        let k_data = kernel.data();
        let bias = if self.enabled_bias {
            self.bias.as_ref().map(|b| b.data())
        } else {
            None
        };
        let out_data = output.data_mut();

        for n in 0..out_shape.number {
            for oc in 0..out_shape.channels {
                let b = bias.map_or(0.0, |b| b[oc]);
                for oh in 0..out_shape.height {
                    let ih0 = oh * self.stride_h;
                    for ow in 0..out_shape.width {
                        let iw0 = ow * self.stride_w;
                        let mut sum = 0.0f32;

                        for ic in 0..kernel_shape.channels {
                            for kh in 0..kernel_shape.height {
                                let in_row = in_shape.index(n, ic, ih0 + kh, iw0);
                                let k_row = kernel_shape.index(oc, ic, kh, 0);
                                for kw in 0..kernel_shape.width {
                                    sum += in_data[in_row + kw] * k_data[k_row + kw];
                                }
                            }
                        }

                        out_data[out_shape.index(n, oc, oh, ow)] = sum + b;
                    }
                }
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
        let kernel_shape = self.kernel_shape;
        let in_shape = input.shape();
        let out_shape = grad_output.shape();
        let in_data = input.data();
        let g_data = grad_output.data();

        let mut grad_input = Tensor::new(in_shape)?;
        let mut grad_kernel = vec![0.0f32; kernel_shape.size_4d()];
        let mut grad_bias = vec![0.0f32; kernel_shape.number];

        {
            let kernel = self
                .kernel
                .as_ref()
                .ok_or_else(|| CnnError::state("convolution kernel not allocated"))?;
            let k_data = kernel.data();
            let gi_data = grad_input.data_mut();

            for n in 0..out_shape.number {
                for oc in 0..out_shape.channels {
                    for oh in 0..out_shape.height {
                        let ih0 = oh * self.stride_h;
                        for ow in 0..out_shape.width {
                            let iw0 = ow * self.stride_w;
                            let g = g_data[out_shape.index(n, oc, oh, ow)];
                            grad_bias[oc] += g;

                            for ic in 0..kernel_shape.channels {
                                for kh in 0..kernel_shape.height {
                                    let in_row = in_shape.index(n, ic, ih0 + kh, iw0);
                                    let k_row = kernel_shape.index(oc, ic, kh, 0);
                                    for kw in 0..kernel_shape.width {
                                        // Overlapping windows accumulate.
                                        gi_data[in_row + kw] += g * k_data[k_row + kw];
                                        grad_kernel[k_row + kw] += g * in_data[in_row + kw];
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }

        // Mean over the batch, not the sum.
        let step = self.state.learning_rate() / out_shape.number as f32;
        if let Some(kernel) = self.kernel.as_mut() {
            for (w, g) in kernel.data_mut().iter_mut().zip(grad_kernel.iter()) {
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
        writer.write_usize(self.kernel_shape.number);
        writer.write_usize(self.kernel_shape.channels);
        writer.write_usize(self.kernel_shape.width);
        writer.write_usize(self.kernel_shape.height);
        writer.write_usize(self.stride_w);
        writer.write_usize(self.stride_h);
        writer.write_bool(self.enabled_bias);
        if let Some(kernel) = &self.kernel {
            writer.write_f32s(kernel.data());
        }
        if self.enabled_bias {
            if let Some(bias) = &self.bias {
                writer.write_f32s(bias.data());
            }
        }
    }

    fn deserialize(&mut self, reader: &mut RecordReader<'_>) -> CnnResult<()> {
        reader.expect_tag(Self::TYPE)?;
        let number = reader.read_usize("kernel number")?;
        let channels = reader.read_usize("kernel channels")?;
        let width = reader.read_usize("kernel width")?;
        let height = reader.read_usize("kernel height")?;
        let stride_w = reader.read_usize("width step")?;
        let stride_h = reader.read_usize("height step")?;
        let enabled_bias = reader.read_bool("bias flag")?;

        let kernel_shape = Shape::new(number, channels, height, width);
        ensure_format!(
            kernel_shape.is_valid() && stride_h > 0 && stride_w > 0,
            "convolution record has invalid kernel {} or stride ({}, {})",
            kernel_shape,
            stride_h,
            stride_w
        );
        let bias_count = if enabled_bias { number } else { 0 };
        reader.ensure_available(
            "convolution parameter",
            kernel_shape
                .checked_size_4d()
                .and_then(|weights| weights.checked_add(bias_count)),
        )?;
        self.kernel_shape = kernel_shape;
        self.stride_h = stride_h;
        self.stride_w = stride_w;
        self.enabled_bias = enabled_bias;

        let input_shape = self.state.input_shape();
        self.resolve_shape(input_shape)?;
        ensure_format!(
            self.kernel_shape.channels == channels,
            "convolution record has {} kernel channels but the input has {}",
            channels,
            self.kernel_shape.channels
        );

        if let Some(kernel) = self.kernel.as_mut() {
            reader.read_f32_into("kernel weight", kernel.data_mut())?;
        }
        if self.enabled_bias {
            if let Some(bias) = self.bias.as_mut() {
                reader.read_f32_into("bias", bias.data_mut())?;
            }
        }
        ensure_state!(self.kernel.is_some(), "convolution kernel missing after load");
        Ok(())
    }

    fn parameter_count(&self) -> usize {
        let bias = if self.enabled_bias {
            self.kernel_shape.number
        } else {
            0
        };
        self.kernel_shape.size_4d() + bias
    }
}
