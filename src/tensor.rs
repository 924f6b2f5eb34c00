//! 4-dimensional shapes and the flat f32 buffers they describe
//!
//! Every buffer in the engine, activation or parameter, is a [`Tensor`]: a
//! [`Shape`] plus an exclusively owned row-major `Vec<f32>`. Element
//! `(n, c, h, w)` lives at `((n * C + c) * H + h) * W + w`.

use crate::error::{ensure_shape, CnnResult};
use std::fmt;

/// Extents of a tensor: `(number, channels, height, width)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Shape {
    pub number: usize,
    pub channels: usize,
    pub height: usize,
    pub width: usize,
}

impl Shape {
    pub const fn new(number: usize, channels: usize, height: usize, width: usize) -> Self {
        Self {
            number,
            channels,
            height,
            width,
        }
    }

    /// Linear index of `(n, c, h, w)`.
    #[inline(always)]
    pub fn index(&self, n: usize, c: usize, h: usize, w: usize) -> usize {
        ((n * self.channels + c) * self.height + h) * self.width + w
    }

    /// Index of `(c, h, w)` within a single sample.
    #[inline(always)]
    pub fn index_in_sample(&self, c: usize, h: usize, w: usize) -> usize {
        (c * self.height + h) * self.width + w
    }

    /// Index of `(h, w)` within a single channel plane.
    #[inline(always)]
    pub fn index_in_plane(&self, h: usize, w: usize) -> usize {
        h * self.width + w
    }

    /// `height * width`
    pub fn size_2d(&self) -> usize {
        self.height * self.width
    }

    /// `channels * height * width`, the element count of one sample.
    pub fn size_3d(&self) -> usize {
        self.channels * self.size_2d()
    }

    /// Total element count.
    pub fn size_4d(&self) -> usize {
        self.number * self.size_3d()
    }

    /// Total element count, or `None` if it does not fit in `usize`.
    pub fn checked_size_4d(&self) -> Option<usize> {
        self.number
            .checked_mul(self.channels)?
            .checked_mul(self.height)?
            .checked_mul(self.width)
    }

    /// All four extents are positive.
    pub fn is_valid(&self) -> bool {
        self.number > 0 && self.channels > 0 && self.height > 0 && self.width > 0
    }

    /// Same shape with a different batch count.
    pub fn with_number(&self, number: usize) -> Self {
        Self { number, ..*self }
    }

    /// Fail with a shape error naming `what` unless every extent is positive.
    pub(crate) fn ensure_valid(&self, what: &str) -> CnnResult<()> {
        ensure_shape!(self.is_valid(), "{} {} has a non-positive dimension", what, self);
        ensure_shape!(
            self.checked_size_4d().is_some(),
            "{} {} has more elements than fit in memory",
            what,
            self
        );
        Ok(())
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}, {}, {})",
            self.number, self.channels, self.height, self.width
        )
    }
}

/// Contiguous f32 buffer sized by a [`Shape`].
///
/// Activation tensors flow between layers and are rebuilt every step;
/// parameter tensors (weights, bias, caches) are owned by one layer for the
/// lifetime of the network. Tensors never alias: anything that needs to keep
/// data clones it.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    shape: Shape,
    data: Vec<f32>,
}

impl Tensor {
    /// Zero-filled tensor. The shape must be valid.
    pub fn new(shape: Shape) -> CnnResult<Self> {
        shape.ensure_valid("tensor shape")?;
        Ok(Self {
            shape,
            data: vec![0.0f32; shape.size_4d()],
        })
    }

    /// Tensor with every element set to `value`.
    pub fn filled(shape: Shape, value: f32) -> CnnResult<Self> {
        shape.ensure_valid("tensor shape")?;
        Ok(Self {
            shape,
            data: vec![value; shape.size_4d()],
        })
    }

    /// Wrap existing data. `data.len()` must equal the shape's 4D size.
    pub fn from_vec(shape: Shape, data: Vec<f32>) -> CnnResult<Self> {
        shape.ensure_valid("tensor shape")?;
        ensure_shape!(
            data.len() == shape.size_4d(),
            "tensor shape {} needs {} values, got {}",
            shape,
            shape.size_4d(),
            data.len()
        );
        Ok(Self { shape, data })
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline(always)]
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    #[inline(always)]
    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }

    #[inline(always)]
    pub fn get(&self, n: usize, c: usize, h: usize, w: usize) -> f32 {
        self.data[self.shape.index(n, c, h, w)]
    }

    #[inline(always)]
    pub fn set(&mut self, n: usize, c: usize, h: usize, w: usize, value: f32) {
        let idx = self.shape.index(n, c, h, w);
        self.data[idx] = value;
    }

    pub fn fill(&mut self, value: f32) {
        for v in self.data.iter_mut() {
            *v = value;
        }
    }

    /// Copy `other`'s contents into this tensor. Shapes must match exactly.
    pub fn copy_from(&mut self, other: &Tensor) -> CnnResult<()> {
        ensure_shape!(
            self.shape == other.shape,
            "cannot copy {} into {}",
            other.shape,
            self.shape
        );
        self.data.copy_from_slice(&other.data);
        Ok(())
    }

    /// The `n`-th sample as a flat slice of `size_3d` values.
    pub fn sample(&self, n: usize) -> &[f32] {
        let len = self.shape.size_3d();
        &self.data[n * len..(n + 1) * len]
    }

    pub fn sample_mut(&mut self, n: usize) -> &mut [f32] {
        let len = self.shape.size_3d();
        &mut self.data[n * len..(n + 1) * len]
    }
}
