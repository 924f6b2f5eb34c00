//! Model record encoding
//!
//! A model is a single text blob of whitespace-separated tokens: each layer's
//! record (type tag first, then configuration scalars, then flattened
//! parameter tensors) followed by the next. Field counts come from each
//! layer's fixed schema and its parameter shapes; there are no length
//! prefixes. Integers are base-10 counts, booleans `0`/`1`, floats use the
//! shortest representation that round-trips.
//!
//! [`LayerRegistry`] maps type tags to constructors for loading.

use crate::error::{ensure_format, CnnError, CnnResult};
use crate::layers::{
    ActivationLayer, ConvolutionLayer, FullyConnectedLayer, InputLayer, Layer, PoolingLayer,
    SoftmaxLayer,
};
use std::collections::HashMap;
use std::fmt::Write;
use std::iter::Peekable;
use std::str::{FromStr, SplitWhitespace};

/// Builds the token stream for one or more layer records.
#[derive(Debug, Default)]
pub struct RecordWriter {
    buffer: String,
}

impl RecordWriter {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, token: impl std::fmt::Display) {
        if !self.buffer.is_empty() && !self.buffer.ends_with('\n') {
            self.buffer.push(' ');
        }
        // Writing into a String cannot fail.
        let _ = write!(self.buffer, "{}", token);
    }

    /// Start a new record. Records after the first begin on a new line.
    pub fn write_tag(&mut self, tag: &str) {
        if !self.buffer.is_empty() {
            self.buffer.push('\n');
        }
        self.push(tag);
    }

    pub fn write_usize(&mut self, value: usize) {
        self.push(value);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.push(u8::from(value));
    }

    pub fn write_f32s(&mut self, values: &[f32]) {
        for &v in values {
            self.push(v);
        }
    }

    pub fn finish(mut self) -> String {
        if !self.buffer.is_empty() {
            self.buffer.push('\n');
        }
        self.buffer
    }
}

/// Schema-driven reader over a whitespace-separated token stream.
pub struct RecordReader<'a> {
    tokens: Peekable<SplitWhitespace<'a>>,
    consumed: usize,
}

impl<'a> RecordReader<'a> {
    pub fn new(content: &'a str) -> Self {
        Self {
            tokens: content.split_whitespace().peekable(),
            consumed: 0,
        }
    }

    /// Tokens left in the record.
    pub fn remaining(&self) -> usize {
        self.tokens.clone().count()
    }

    /// Fail unless `count` values of `field` can still be read. `None` means
    /// the declared count overflowed while being computed.
    pub fn ensure_available(&self, field: &str, count: Option<usize>) -> CnnResult<()> {
        let count = count.ok_or_else(|| CnnError::format(format!("{} count overflows", field)))?;
        let remaining = self.remaining();
        ensure_format!(
            count <= remaining,
            "record declares {} {} values but only {} tokens remain",
            count,
            field,
            remaining
        );
        Ok(())
    }

    /// Next token without consuming it.
    pub fn peek(&mut self) -> Option<&'a str> {
        self.tokens.peek().copied()
    }

    pub fn is_finished(&mut self) -> bool {
        self.tokens.peek().is_none()
    }

    fn next_token(&mut self, field: &str) -> CnnResult<&'a str> {
        let token = self.tokens.next().ok_or_else(|| {
            CnnError::format(format!(
                "record truncated: expected {} after {} tokens",
                field, self.consumed
            ))
        })?;
        self.consumed += 1;
        Ok(token)
    }

    fn parse<T: FromStr>(&mut self, field: &str) -> CnnResult<T> {
        let token = self.next_token(field)?;
        token.parse::<T>().map_err(|_| {
            CnnError::format(format!(
                "token {} ('{}') is not a valid {}",
                self.consumed, token, field
            ))
        })
    }

    /// Consume the type tag and fail unless it equals `expected`.
    pub fn expect_tag(&mut self, expected: &str) -> CnnResult<()> {
        let tag = self.next_token("layer type")?;
        ensure_format!(
            tag == expected,
            "layer type mismatch: expected {}, found {}",
            expected,
            tag
        );
        Ok(())
    }

    pub fn read_usize(&mut self, field: &str) -> CnnResult<usize> {
        self.parse(field)
    }

    pub fn read_bool(&mut self, field: &str) -> CnnResult<bool> {
        match self.parse::<u8>(field)? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(CnnError::format(format!(
                "{} must be 0 or 1, found {}",
                field, other
            ))),
        }
    }

    /// Fill `out` with exactly `out.len()` floats.
    pub fn read_f32_into(&mut self, field: &str, out: &mut [f32]) -> CnnResult<()> {
        for value in out.iter_mut() {
            *value = self.parse(field)?;
        }
        Ok(())
    }
}

pub type LayerConstructor = fn() -> Box<dyn Layer>;

fn blank<L: Layer + Default + 'static>() -> Box<dyn Layer> {
    Box::new(L::default())
}

fn relu() -> Box<dyn Layer> {
    Box::new(ActivationLayer::relu())
}

fn sigmoid() -> Box<dyn Layer> {
    Box::new(ActivationLayer::sigmoid())
}

fn tanh() -> Box<dyn Layer> {
    Box::new(ActivationLayer::tanh())
}

/// Tag -> constructor table used to rebuild layers from a model record.
#[derive(Clone)]
pub struct LayerRegistry {
    constructors: HashMap<&'static str, LayerConstructor>,
}

impl LayerRegistry {
    /// Empty registry.
    pub fn empty() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// Registry of every layer type shipped with the crate.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(InputLayer::TYPE, blank::<InputLayer>);
        registry.register(ConvolutionLayer::TYPE, blank::<ConvolutionLayer>);
        registry.register(PoolingLayer::TYPE, blank::<PoolingLayer>);
        registry.register(ActivationLayer::RELU, relu);
        registry.register(ActivationLayer::SIGMOID, sigmoid);
        registry.register(ActivationLayer::TANH, tanh);
        registry.register(FullyConnectedLayer::TYPE, blank::<FullyConnectedLayer>);
        registry.register(SoftmaxLayer::TYPE, blank::<SoftmaxLayer>);
        registry
    }

    /// Add or replace a constructor.
    pub fn register(&mut self, tag: &'static str, constructor: LayerConstructor) {
        self.constructors.insert(tag, constructor);
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.constructors.contains_key(tag)
    }

    /// Construct a blank layer for `tag`.
    pub fn create(&self, tag: &str) -> CnnResult<Box<dyn Layer>> {
        self.constructors
            .get(tag)
            .map(|constructor| constructor())
            .ok_or_else(|| CnnError::format(format!("unknown layer type '{}'", tag)))
    }
}

impl Default for LayerRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl std::fmt::Debug for LayerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut tags: Vec<_> = self.constructors.keys().collect();
        tags.sort();
        f.debug_struct("LayerRegistry").field("tags", &tags).finish()
    }
}
