//! 2D pooling layer (max or mean)
//!
//! Pooling windows slide over each channel independently, so the output keeps
//! the input's channel count. Max pooling records the arg-max offset of every
//! output cell during training so backward can route each gradient to the
//! single input position that produced the maximum.

use crate::error::{ensure_format, ensure_shape, ensure_state, CnnError, CnnResult};
use crate::layers::conv2d::window_output_size;
use crate::layers::{Layer, LayerState, Phase};
use crate::serialize::{RecordReader, RecordWriter};
use crate::tensor::{Shape, Tensor};
use tracing::debug;

/// Reduction applied over each window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolingType {
    Max,
    Mean,
}

impl PoolingType {
    fn code(self) -> usize {
        match self {
            PoolingType::Max => 0,
            PoolingType::Mean => 1,
        }
    }

    fn from_code(code: usize) -> Option<Self> {
        match code {
            0 => Some(PoolingType::Max),
            1 => Some(PoolingType::Mean),
            _ => None,
        }
    }
}

/// Within-window arg-max offsets (`kh * kernel_w + kw`) for every output cell
/// of the last training forward pass.
#[derive(Debug, Clone)]
struct ArgMaxCache {
    shape: Shape,
    offsets: Vec<usize>,
}

impl ArgMaxCache {
    fn new(shape: Shape) -> Self {
        Self {
            shape,
            offsets: vec![0; shape.size_4d()],
        }
    }
}

/// Max or mean pooling over `(kernel_h, kernel_w)` windows.
///
/// The kernel shape is `(1, channels, kernel_h, kernel_w)`; `channels` is forced
/// to the input channel count at resolution and both spatial extents must be
/// greater than 1.
pub struct PoolingLayer {
    state: LayerState,
    pooling_type: PoolingType,
    kernel_shape: Shape,
    stride_h: usize,
    stride_w: usize,
    arg_max: Option<ArgMaxCache>,
}

impl PoolingLayer {
    pub const TYPE: &'static str = "PoolingLayer";

    pub fn new(
        pooling_type: PoolingType,
        kernel_shape: Shape,
        stride_h: usize,
        stride_w: usize,
    ) -> CnnResult<Self> {
        validate_config(kernel_shape, stride_h, stride_w)?;
        Ok(Self {
            state: LayerState::default(),
            pooling_type,
            kernel_shape,
            stride_h,
            stride_w,
            arg_max: None,
        })
    }

    /// Max pooling with a square `size` window and stride `size`.
    pub fn max(size: usize) -> CnnResult<Self> {
        Self::new(PoolingType::Max, Shape::new(1, 1, size, size), size, size)
    }

    /// Mean pooling with a square `size` window and stride `size`.
    pub fn mean(size: usize) -> CnnResult<Self> {
        Self::new(PoolingType::Mean, Shape::new(1, 1, size, size), size, size)
    }

    pub fn pooling_type(&self) -> PoolingType {
        self.pooling_type
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

    /// Shape of the arg-max cache, if one is allocated.
    pub fn arg_max_shape(&self) -> Option<Shape> {
        self.arg_max.as_ref().map(|cache| cache.shape)
    }

    fn needs_cache(&self) -> bool {
        self.state.phase() == Phase::Train && self.pooling_type == PoolingType::Max
    }

    fn forward_max(&mut self, input: &Tensor, output: &mut Tensor) {
        let out_shape = output.shape();
        if self.needs_cache() && self.arg_max.as_ref().map(|c| c.shape) != Some(out_shape) {
            self.arg_max = Some(ArgMaxCache::new(out_shape));
        }
        let mut cache = if self.needs_cache() {
            self.arg_max.as_mut()
        } else {
            None
        };

        let in_shape = input.shape();
        let in_data = input.data();
        let (kernel_h, kernel_w) = (self.kernel_shape.height, self.kernel_shape.width);
        let out_data = output.data_mut();

        for n in 0..out_shape.number {
            for c in 0..out_shape.channels {
                for oh in 0..out_shape.height {
                    let ih0 = oh * self.stride_h;
                    for ow in 0..out_shape.width {
                        let iw0 = ow * self.stride_w;
                        let mut best = in_data[in_shape.index(n, c, ih0, iw0)];
                        let mut best_offset = 0usize;

                        for kh in 0..kernel_h {
                            let row = in_shape.index(n, c, ih0 + kh, iw0);
                            for kw in 0..kernel_w {
                                // Strict comparison keeps the first maximum in scan order.
                                let v = in_data[row + kw];
                                if best < v {
                                    best = v;
                                    best_offset = kh * kernel_w + kw;
                                }
                            }
                        }

                        let out_idx = out_shape.index(n, c, oh, ow);
                        out_data[out_idx] = best;
                        if let Some(cache) = cache.as_deref_mut() {
                            cache.offsets[out_idx] = best_offset;
                        }
                    }
                }
            }
        }
    }

    fn forward_mean(&self, input: &Tensor, output: &mut Tensor) {
        let out_shape = output.shape();
        let in_shape = input.shape();
        let in_data = input.data();
        let (kernel_h, kernel_w) = (self.kernel_shape.height, self.kernel_shape.width);
        let window = (kernel_h * kernel_w) as f32;
        let out_data = output.data_mut();

        for n in 0..out_shape.number {
            for c in 0..out_shape.channels {
                for oh in 0..out_shape.height {
                    let ih0 = oh * self.stride_h;
                    for ow in 0..out_shape.width {
                        let iw0 = ow * self.stride_w;
                        let mut sum = 0.0f32;
                        for kh in 0..kernel_h {
                            let row = in_shape.index(n, c, ih0 + kh, iw0);
                            sum += in_data[row..row + kernel_w].iter().sum::<f32>();
                        }
                        out_data[out_shape.index(n, c, oh, ow)] = sum / window;
                    }
                }
            }
        }
    }
}

impl Default for PoolingLayer {
    fn default() -> Self {
        Self {
            state: LayerState::default(),
            pooling_type: PoolingType::Max,
            kernel_shape: Shape::new(1, 1, 2, 2),
            stride_h: 2,
            stride_w: 2,
            arg_max: None,
        }
    }
}

fn validate_config(kernel_shape: Shape, stride_h: usize, stride_w: usize) -> CnnResult<()> {
    ensure_shape!(
        kernel_shape.number == 1
            && kernel_shape.channels > 0
            && kernel_shape.height > 1
            && kernel_shape.width > 1
            && stride_h > 0
            && stride_w > 0,
        "pooling kernel {} or stride ({}, {}) is invalid",
        kernel_shape,
        stride_h,
        stride_w
    );
    Ok(())
}

impl Layer for PoolingLayer {
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
        input_shape.ensure_valid("pooling input")?;
        self.kernel_shape.number = 1;
        self.kernel_shape.channels = input_shape.channels;
        validate_config(self.kernel_shape, self.stride_h, self.stride_w)?;

        let out_h = window_output_size(input_shape.height, self.kernel_shape.height, self.stride_h);
        let out_w = window_output_size(input_shape.width, self.kernel_shape.width, self.stride_w);
        let (out_h, out_w) = match (out_h, out_w) {
            (Some(h), Some(w)) => (h, w),
            _ => {
                return Err(CnnError::shape(format!(
                    "pooling window {} does not fit input {}",
                    self.kernel_shape, input_shape
                )))
            }
        };

        let output_shape = Shape::new(input_shape.number, input_shape.channels, out_h, out_w);
        output_shape.ensure_valid("pooling output")?;

        self.arg_max = if self.needs_cache() {
            Some(ArgMaxCache::new(output_shape))
        } else {
            None
        };
        self.state.set_shapes(input_shape, output_shape);
        debug!(input = %input_shape, output = %output_shape, kind = ?self.pooling_type, "resolved pooling");
        Ok(output_shape)
    }

    fn forward(&mut self, input: &Tensor, output: &mut Tensor) -> CnnResult<()> {
        self.state.check_forward(Self::TYPE, input, output)?;
        match self.pooling_type {
            PoolingType::Max => self.forward_max(input, output),
            PoolingType::Mean => self.forward_mean(input, output),
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
        let out_shape = grad_output.shape();
        let (kernel_h, kernel_w) = (self.kernel_shape.height, self.kernel_shape.width);
        let g_data = grad_output.data();

        let mut grad_input = Tensor::new(in_shape)?;
        let gi_data = grad_input.data_mut();

        match self.pooling_type {
            PoolingType::Max => {
                let cache = self.arg_max.as_ref().ok_or_else(|| {
                    CnnError::state("max pooling backward without a recorded forward pass")
                })?;
                ensure_state!(
                    cache.shape == out_shape,
                    "arg-max cache {} is stale for output {}",
                    cache.shape,
                    out_shape
                );

                for n in 0..out_shape.number {
                    for c in 0..out_shape.channels {
                        for oh in 0..out_shape.height {
                            for ow in 0..out_shape.width {
                                let out_idx = out_shape.index(n, c, oh, ow);
                                let offset = cache.offsets[out_idx];
                                let ih = oh * self.stride_h + offset / kernel_w;
                                let iw = ow * self.stride_w + offset % kernel_w;
                                gi_data[in_shape.index(n, c, ih, iw)] += g_data[out_idx];
                            }
                        }
                    }
                }
            }
            PoolingType::Mean => {
                let window = (kernel_h * kernel_w) as f32;
                for n in 0..out_shape.number {
                    for c in 0..out_shape.channels {
                        for oh in 0..out_shape.height {
                            let ih0 = oh * self.stride_h;
                            for ow in 0..out_shape.width {
                                let iw0 = ow * self.stride_w;
                                let share = g_data[out_shape.index(n, c, oh, ow)] / window;
                                for kh in 0..kernel_h {
                                    let row = in_shape.index(n, c, ih0 + kh, iw0);
                                    for v in &mut gi_data[row..row + kernel_w] {
                                        *v += share;
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }

        Ok(grad_input)
    }

    fn serialize(&self, writer: &mut RecordWriter) {
        writer.write_tag(Self::TYPE);
        writer.write_usize(self.pooling_type.code());
        writer.write_usize(self.kernel_shape.number);
        writer.write_usize(self.kernel_shape.channels);
        writer.write_usize(self.kernel_shape.width);
        writer.write_usize(self.kernel_shape.height);
        writer.write_usize(self.stride_w);
        writer.write_usize(self.stride_h);
    }

    fn deserialize(&mut self, reader: &mut RecordReader<'_>) -> CnnResult<()> {
        reader.expect_tag(Self::TYPE)?;
        let code = reader.read_usize("pooling type")?;
        let pooling_type = PoolingType::from_code(code)
            .ok_or_else(|| CnnError::format(format!("unknown pooling type {}", code)))?;
        let number = reader.read_usize("kernel number")?;
        let channels = reader.read_usize("kernel channels")?;
        let width = reader.read_usize("kernel width")?;
        let height = reader.read_usize("kernel height")?;
        let stride_w = reader.read_usize("width step")?;
        let stride_h = reader.read_usize("height step")?;

        let kernel_shape = Shape::new(number, channels, height, width);
        ensure_format!(
            validate_config(kernel_shape, stride_h, stride_w).is_ok(),
            "pooling record has invalid kernel {} or stride ({}, {})",
            kernel_shape,
            stride_h,
            stride_w
        );
        self.pooling_type = pooling_type;
        self.kernel_shape = kernel_shape;
        self.stride_h = stride_h;
        self.stride_w = stride_w;

        let input_shape = self.state.input_shape();
        self.resolve_shape(input_shape)?;
        Ok(())
    }
}
