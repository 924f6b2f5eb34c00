//! Architecture configuration structures
//!
//! This module defines convolutional network architectures in JSON so layer
//! stacks can be changed without touching code. A configuration names the
//! input shape, the loss functor and the ordered list of layers;
//! [`build_network`] turns it into a [`Network`] through the same `add_layer`
//! path a hand-built network uses.

use crate::error::{CnnError, CnnResult};
use crate::fatal::FatalContext;
use crate::layers::{
    ActivationLayer, ConvolutionLayer, FullyConnectedLayer, InputLayer, Layer, PoolingLayer,
    PoolingType, SoftmaxLayer,
};
use crate::loss::loss_by_name;
use crate::network::Network;
use crate::tensor::Shape;
use serde::Deserialize;
use std::fs;

/// Configuration for a single layer.
///
/// Different layer types read different fields:
///
/// - **input**, **relu**, **sigmoid**, **tanh**, **softmax**: no parameters
/// - **convolution**: requires `out_channels` and `kernel_size`; optional
///   `stride` (default 1) and `bias` (default true)
/// - **pooling**: requires `pooling_type` ("max" or "mean") and `kernel_size`;
///   optional `stride` (default `kernel_size`)
/// - **fully_connected**: requires `outputs`; optional `bias` (default true)
///
/// `kernel_height`/`kernel_width` and `stride_h`/`stride_w` override the square
/// `kernel_size` and `stride` when present.
///
/// # Example
///
/// ```json
/// {
///   "layer_type": "convolution",
///   "out_channels": 6,
///   "kernel_size": 5,
///   "stride": 1,
///   "bias": true
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct LayerConfig {
    pub layer_type: String,

    /// Number of kernels for a convolution layer
    pub out_channels: Option<usize>,
    /// Square kernel extent for convolution and pooling
    pub kernel_size: Option<usize>,
    pub kernel_height: Option<usize>,
    pub kernel_width: Option<usize>,
    /// Square stride for convolution and pooling
    pub stride: Option<usize>,
    pub stride_h: Option<usize>,
    pub stride_w: Option<usize>,
    /// Whether convolution and fully connected layers add a bias
    pub bias: Option<bool>,

    /// "max" or "mean"
    pub pooling_type: Option<String>,

    /// Output units of a fully connected layer
    pub outputs: Option<usize>,
}

impl LayerConfig {
    fn kernel_extent(&self) -> (Option<usize>, Option<usize>) {
        (
            self.kernel_height.or(self.kernel_size),
            self.kernel_width.or(self.kernel_size),
        )
    }

    fn strides(&self, default: usize) -> (usize, usize) {
        let square = self.stride.unwrap_or(default);
        (self.stride_h.unwrap_or(square), self.stride_w.unwrap_or(square))
    }
}

/// Configuration for a whole network.
///
/// # Example
///
/// ```json
/// {
///   "input": [16, 1, 28, 28],
///   "loss": "cross_entropy",
///   "seed": 7,
///   "layers": [
///     { "layer_type": "input" },
///     { "layer_type": "convolution", "out_channels": 6, "kernel_size": 5 },
///     { "layer_type": "relu" },
///     { "layer_type": "pooling", "pooling_type": "max", "kernel_size": 2 },
///     { "layer_type": "fully_connected", "outputs": 10 },
///     { "layer_type": "softmax" }
///   ]
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    /// Input shape `[number, channels, height, width]`
    pub input: [usize; 4],

    /// "cross_entropy" or "mse"
    pub loss: String,

    /// Seed for parameter initialization; each layer derives its own from it
    pub seed: Option<u64>,

    pub layers: Vec<LayerConfig>,
}

impl NetworkConfig {
    pub fn input_shape(&self) -> Shape {
        let [n, c, h, w] = self.input;
        Shape::new(n, c, h, w)
    }
}

/// Loads an architecture configuration from a JSON file.
///
/// Besides per-layer field checks, validation resolves every layer's shape
/// in order so a stack whose shapes do not chain is rejected here as a
/// configuration error.
///
/// # Examples
///
/// ```no_run
/// use rust_convnet::architecture::{build_network, load_architecture};
///
/// let arch = load_architecture("config/architectures/lenet_small.json").unwrap();
/// let network = build_network(&arch).unwrap();
/// assert_eq!(network.layer_count(), arch.layers.len());
/// ```
pub fn load_architecture(path: &str) -> CnnResult<NetworkConfig> {
    let contents = fs::read_to_string(path)?;
    parse_architecture(&contents)
}

/// Parse and validate an architecture from JSON text.
pub fn parse_architecture(contents: &str) -> CnnResult<NetworkConfig> {
    let config: NetworkConfig = serde_json::from_str(contents)
        .map_err(|e| CnnError::Config(format!("invalid architecture: {}", e)))?;
    validate_architecture(&config)?;
    Ok(config)
}

fn config_error(index: usize, message: impl std::fmt::Display) -> CnnError {
    CnnError::Config(format!("Layer {}: {}", index, message))
}

fn require(value: Option<usize>, index: usize, layer_type: &str, field: &str) -> CnnResult<usize> {
    match value {
        Some(0) => Err(config_error(index, format!("{} must be greater than 0", field))),
        Some(v) => Ok(v),
        None => Err(config_error(index, format!("{} layer requires '{}'", layer_type, field))),
    }
}

/// Build the layer described by `layer`. `seed` drives weight initialization.
pub fn build_layer(layer: &LayerConfig, index: usize, seed: u64) -> CnnResult<Box<dyn Layer>> {
    let layer_type = layer.layer_type.to_lowercase();
    let built: Box<dyn Layer> = match layer_type.as_str() {
        "input" => Box::new(InputLayer::new()),
        "relu" => Box::new(ActivationLayer::relu()),
        "sigmoid" => Box::new(ActivationLayer::sigmoid()),
        "tanh" => Box::new(ActivationLayer::tanh()),
        "softmax" => Box::new(SoftmaxLayer::new()),
        "convolution" => {
            let out_channels = require(layer.out_channels, index, "Convolution", "out_channels")?;
            let (kh, kw) = layer.kernel_extent();
            let kh = require(kh, index, "Convolution", "kernel_size")?;
            let kw = require(kw, index, "Convolution", "kernel_size")?;
            let (sh, sw) = layer.strides(1);
            let conv = ConvolutionLayer::new(
                Shape::new(out_channels, 1, kh, kw),
                sh,
                sw,
                layer.bias.unwrap_or(true),
            )
            .map_err(|e| config_error(index, e))?;
            Box::new(conv.with_seed(seed))
        }
        "pooling" => {
            let pooling_type = match layer.pooling_type.as_deref().map(str::to_lowercase) {
                Some(ref kind) if kind == "max" => PoolingType::Max,
                Some(ref kind) if kind == "mean" => PoolingType::Mean,
                Some(kind) => {
                    return Err(config_error(
                        index,
                        format!("unknown pooling_type '{}', expected max or mean", kind),
                    ))
                }
                None => return Err(config_error(index, "Pooling layer requires 'pooling_type'")),
            };
            let (kh, kw) = layer.kernel_extent();
            let kh = require(kh, index, "Pooling", "kernel_size")?;
            let kw = require(kw, index, "Pooling", "kernel_size")?;
            let sh = layer.stride_h.or(layer.stride).unwrap_or(kh);
            let sw = layer.stride_w.or(layer.stride).unwrap_or(kw);
            let pool = PoolingLayer::new(pooling_type, Shape::new(1, 1, kh, kw), sh, sw)
                .map_err(|e| config_error(index, e))?;
            Box::new(pool)
        }
        "fully_connected" => {
            let outputs = require(layer.outputs, index, "FullyConnected", "outputs")?;
            let fc = FullyConnectedLayer::new(outputs, layer.bias.unwrap_or(true))
                .map_err(|e| config_error(index, e))?;
            Box::new(fc.with_seed(seed))
        }
        _ => {
            return Err(config_error(
                index,
                format!("Unknown layer type: {}", layer.layer_type),
            ))
        }
    };
    Ok(built)
}

fn layer_seed(base: Option<u64>, index: usize) -> u64 {
    // Distinct per layer; the rng maps a zero seed to its fallback.
    base.unwrap_or(42).wrapping_add(index as u64 * 7919)
}

/// Validates an architecture configuration.
///
/// Checks that:
/// - The input shape is non-zero
/// - The loss name is known
/// - There is at least one layer and each layer has the fields its type needs
/// - The layer shapes chain from the input to the last layer
fn validate_architecture(config: &NetworkConfig) -> CnnResult<()> {
    build_layers(config).map(|_| ())
}

/// Build every layer of `config` and resolve it against the output of the one
/// before, returning the layers ready to be added to a network.
pub fn build_layers(config: &NetworkConfig) -> CnnResult<Vec<Box<dyn Layer>>> {
    let mut shape = config.input_shape();
    if !shape.is_valid() || shape.checked_size_4d().is_none() {
        return Err(CnnError::Config(format!("input shape {} must be non-zero", shape)));
    }
    if loss_by_name(&config.loss).is_none() {
        return Err(CnnError::Config(format!(
            "unknown loss '{}', expected cross_entropy or mse",
            config.loss
        )));
    }
    if config.layers.is_empty() {
        return Err(CnnError::Config("Architecture must have at least one layer".into()));
    }

    let mut layers = Vec::with_capacity(config.layers.len());
    for (i, layer_config) in config.layers.iter().enumerate() {
        let mut layer = build_layer(layer_config, i, layer_seed(config.seed, i))?;
        shape = layer.resolve_shape(shape).map_err(|e| {
            config_error(i, format!("{} does not fit its input: {}", layer_config.layer_type, e))
        })?;
        layers.push(layer);
    }
    Ok(layers)
}

/// Build a network from `config` with the default (aborting) fatal context.
pub fn build_network(config: &NetworkConfig) -> CnnResult<Network> {
    build_network_with_context(config, FatalContext::aborting())
}

/// Build a network from `config`, reporting invariant violations to `fatal`.
///
/// Layers are built and resolved once; `add_layer` keeps their parameters
/// because the shapes they were resolved against do not change.
pub fn build_network_with_context(config: &NetworkConfig, fatal: FatalContext) -> CnnResult<Network> {
    let layers = build_layers(config)?;
    let loss = loss_by_name(&config.loss)
        .ok_or_else(|| CnnError::Config(format!("unknown loss '{}'", config.loss)))?;

    let mut network = Network::with_fatal_context(fatal);
    network.set_input_size(config.input_shape())?;
    network.set_loss_functor(loss);
    for layer in layers {
        network.add_layer(layer)?;
    }
    Ok(network)
}
