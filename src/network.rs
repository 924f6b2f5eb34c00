//! Network orchestration
//!
//! A [`Network`] owns an ordered list of layers, one activation tensor per
//! layer boundary and a loss functor. Shapes resolve as layers are added:
//! each layer takes the previous layer's output shape, or the declared input
//! shape for the first layer. A training step runs every layer forward, asks
//! the loss functor for the output gradient, then runs every layer backward
//! in reverse order, each one updating its own parameters.
//!
//! Shape, state and format errors raised by any public operation are passed
//! to the network's [`FatalContext`] before they are returned.
//!
//! # Example
//!
//! ```
//! use rust_convnet::layers::{ActivationLayer, ConvolutionLayer, FullyConnectedLayer, PoolingLayer, SoftmaxLayer};
//! use rust_convnet::loss::CrossEntropy;
//! use rust_convnet::network::Network;
//! use rust_convnet::tensor::{Shape, Tensor};
//!
//! let mut net = Network::new();
//! net.set_input_size(Shape::new(4, 1, 8, 8)).unwrap();
//! net.set_loss_functor(Box::new(CrossEntropy));
//! net.add_layer(Box::new(ConvolutionLayer::new(Shape::new(3, 1, 3, 3), 1, 1, true).unwrap())).unwrap();
//! net.add_layer(Box::new(ActivationLayer::relu())).unwrap();
//! net.add_layer(Box::new(PoolingLayer::max(2).unwrap())).unwrap();
//! net.add_layer(Box::new(FullyConnectedLayer::new(2, true).unwrap())).unwrap();
//! net.add_layer(Box::new(SoftmaxLayer::new())).unwrap();
//! assert_eq!(net.output_shape(), Some(Shape::new(4, 2, 1, 1)));
//!
//! let input = Tensor::filled(Shape::new(4, 1, 8, 8), 0.5).unwrap();
//! let labels = Tensor::from_vec(Shape::new(4, 2, 1, 1), vec![1.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0]).unwrap();
//! let loss = net.train_batch(&input, &labels, 0.05).unwrap();
//! assert!(loss.is_finite());
//! ```

use crate::error::{ensure_format, ensure_shape, ensure_state, CnnError, CnnResult};
use crate::fatal::FatalContext;
use crate::layers::{Layer, Phase};
use crate::loss::LossFunctor;
use crate::serialize::{LayerRegistry, RecordReader, RecordWriter};
use crate::tensor::{Shape, Tensor};
use std::fs;
use std::path::Path;
use tracing::{debug, info, trace};

/// Ordered stack of layers trained by gradient descent.
pub struct Network {
    layers: Vec<Box<dyn Layer>>,
    activations: Vec<Tensor>,
    input_shape: Option<Shape>,
    loss: Option<Box<dyn LossFunctor>>,
    phase: Phase,
    fatal: FatalContext,
    registry: LayerRegistry,
}

impl Default for Network {
    fn default() -> Self {
        Self::new()
    }
}

impl Network {
    /// Empty network whose invariant violations abort the process.
    pub fn new() -> Self {
        Self::with_fatal_context(FatalContext::aborting())
    }

    pub fn with_fatal_context(fatal: FatalContext) -> Self {
        Self {
            layers: Vec::new(),
            activations: Vec::new(),
            input_shape: None,
            loss: None,
            phase: Phase::Train,
            fatal,
            registry: LayerRegistry::builtin(),
        }
    }

    /// Replace the tag registry used by [`Network::load_model`].
    pub fn with_registry(mut self, registry: LayerRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Declare the input shape. Layers already added are re-resolved against it.
    pub fn set_input_size(&mut self, shape: Shape) -> CnnResult<()> {
        let result = self.declare_input(shape);
        self.fatal.check(result)
    }

    fn declare_input(&mut self, shape: Shape) -> CnnResult<()> {
        shape.ensure_valid("network input")?;
        self.input_shape = Some(shape);
        if !self.layers.is_empty() {
            self.resolve_all(shape)?;
        }
        Ok(())
    }

    pub fn input_shape(&self) -> Option<Shape> {
        self.input_shape
    }

    pub fn set_loss_functor(&mut self, loss: Box<dyn LossFunctor>) {
        self.loss = Some(loss);
    }

    pub fn loss_functor(&self) -> Option<&dyn LossFunctor> {
        self.loss.as_deref()
    }

    /// Append a layer and resolve its shape from the current end of the network.
    pub fn add_layer(&mut self, layer: Box<dyn Layer>) -> CnnResult<()> {
        let result = self.push_layer(layer);
        self.fatal.check(result)
    }

    fn push_layer(&mut self, mut layer: Box<dyn Layer>) -> CnnResult<()> {
        let input_shape = match self.output_shape().or(self.input_shape) {
            Some(shape) => shape,
            None => {
                return Err(CnnError::shape(format!(
                    "cannot add {} before the network input size is set",
                    layer.layer_type()
                )))
            }
        };

        layer.state_mut().set_phase(self.phase);
        let output_shape = layer.resolve_shape(input_shape)?;
        debug!(
            index = self.layers.len(),
            layer = layer.layer_type(),
            input = %input_shape,
            output = %output_shape,
            "added layer"
        );
        self.activations.push(Tensor::new(output_shape)?);
        self.layers.push(layer);
        Ok(())
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    pub fn layer(&self, index: usize) -> Option<&dyn Layer> {
        self.layers.get(index).map(|layer| layer.as_ref())
    }

    /// Output shape of the last layer, if any.
    pub fn output_shape(&self) -> Option<Shape> {
        self.layers.last().map(|layer| layer.state().output_shape())
    }

    /// Total number of trainable scalars over all layers.
    pub fn parameter_count(&self) -> usize {
        self.layers.iter().map(|layer| layer.parameter_count()).sum()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
        for layer in &mut self.layers {
            layer.state_mut().set_phase(phase);
        }
    }

    /// Re-run shape resolution for every layer starting from `input_shape`.
    fn resolve_all(&mut self, input_shape: Shape) -> CnnResult<()> {
        let mut shape = input_shape;
        let mut activations = Vec::with_capacity(self.layers.len());
        for layer in &mut self.layers {
            shape = layer.resolve_shape(shape)?;
            activations.push(Tensor::new(shape)?);
        }
        self.activations = activations;
        Ok(())
    }

    /// Accept `shape` as the next input, re-resolving when only the batch count changed.
    fn prepare_input(&mut self, shape: Shape) -> CnnResult<()> {
        let expected = match self.layers.first() {
            Some(layer) => layer.state().input_shape(),
            None => return Err(CnnError::state("network has no layers")),
        };
        if shape == expected {
            return Ok(());
        }
        ensure_shape!(
            shape.is_valid() && shape.with_number(expected.number) == expected,
            "network expects input {} (any batch count), got {}",
            expected,
            shape
        );
        debug!(from = expected.number, to = shape.number, "batch size changed, re-resolving");
        self.input_shape = Some(shape);
        self.resolve_all(shape)
    }

    fn run_forward(&mut self, input: &Tensor) -> CnnResult<()> {
        self.prepare_input(input.shape())?;
        for (i, layer) in self.layers.iter_mut().enumerate() {
            let (before, rest) = self.activations.split_at_mut(i);
            let layer_input = if i == 0 { input } else { &before[i - 1] };
            trace!(index = i, layer = layer.layer_type(), "forward");
            layer.forward(layer_input, &mut rest[0])?;
        }
        Ok(())
    }

    fn last_activation(&self) -> CnnResult<&Tensor> {
        self.activations
            .last()
            .ok_or_else(|| CnnError::state("network has no layers"))
    }

    /// Run `input` through every layer and return the final activation.
    pub fn forward(&mut self, input: &Tensor) -> CnnResult<&Tensor> {
        let result = self.run_forward(input);
        self.fatal.check(result)?;
        self.last_activation()
    }

    /// Inference in the test phase. No parameter is modified.
    pub fn test_batch(&mut self, input: &Tensor) -> CnnResult<Tensor> {
        self.set_phase(Phase::Test);
        let result = self
            .run_forward(input)
            .and_then(|()| self.last_activation().cloned());
        self.fatal.check(result)
    }

    /// One gradient-descent step on a batch. Returns the batch loss.
    ///
    /// `labels` must have the same shape as the network output.
    pub fn train_batch(
        &mut self,
        input: &Tensor,
        labels: &Tensor,
        learning_rate: f32,
    ) -> CnnResult<f32> {
        let result = self.run_train_step(input, labels, learning_rate);
        self.fatal.check(result)
    }

    fn run_train_step(
        &mut self,
        input: &Tensor,
        labels: &Tensor,
        learning_rate: f32,
    ) -> CnnResult<f32> {
        ensure_shape!(
            input.shape().number == labels.shape().number,
            "input batch {} and label batch {} differ",
            input.shape().number,
            labels.shape().number
        );
        ensure_state!(self.loss.is_some(), "no loss functor set");

        self.set_phase(Phase::Train);
        for layer in &mut self.layers {
            layer.state_mut().set_learning_rate(learning_rate);
        }
        self.run_forward(input)?;

        let (loss_value, mut grad) = {
            let output = self.last_activation()?;
            let loss = self
                .loss
                .as_deref()
                .ok_or_else(|| CnnError::state("no loss functor set"))?;
            (loss.loss(output, labels)?, loss.gradient(output, labels)?)
        };

        for i in (0..self.layers.len()).rev() {
            let layer_input = if i == 0 { input } else { &self.activations[i - 1] };
            let layer_output = &self.activations[i];
            let layer = &mut self.layers[i];
            trace!(index = i, layer = layer.layer_type(), "backward");
            grad = layer.backward(layer_input, layer_output, grad)?;
        }

        Ok(loss_value)
    }

    /// Text form of every layer record, in order.
    pub fn serialize_to_string(&self) -> String {
        let mut writer = RecordWriter::new();
        for layer in &self.layers {
            layer.serialize(&mut writer);
        }
        writer.finish()
    }

    /// Replace the layer list with the layers recorded in `content`.
    ///
    /// Layers are rebuilt through the registry; the first layer takes the
    /// declared input shape, or the shape in a leading `InputLayer` record.
    pub fn deserialize_from_string(&mut self, content: &str) -> CnnResult<()> {
        let result = self.read_layers(content);
        self.fatal.check(result)
    }

    fn read_layers(&mut self, content: &str) -> CnnResult<()> {
        let mut reader = RecordReader::new(content);
        let mut layers: Vec<Box<dyn Layer>> = Vec::new();
        let mut activations = Vec::new();
        let mut next_input = self.input_shape;

        while let Some(tag) = reader.peek() {
            let mut layer = self.registry.create(tag)?;
            layer.state_mut().set_phase(self.phase);
            if let Some(shape) = next_input {
                layer.state_mut().set_input_shape(shape);
            }
            layer.deserialize(&mut reader)?;

            let output_shape = layer.state().output_shape();
            debug!(index = layers.len(), layer = tag, output = %output_shape, "loaded layer");
            activations.push(Tensor::new(output_shape)?);
            next_input = Some(output_shape);
            layers.push(layer);
        }

        ensure_format!(!layers.is_empty(), "model contains no layers");
        self.input_shape = layers.first().map(|layer| layer.state().input_shape());
        self.layers = layers;
        self.activations = activations;
        Ok(())
    }

    /// Write the model to `path`.
    pub fn save_model<P: AsRef<Path>>(&self, path: P) -> CnnResult<()> {
        let path = path.as_ref();
        fs::write(path, self.serialize_to_string())?;
        info!(path = %path.display(), layers = self.layers.len(), "saved model");
        Ok(())
    }

    /// Load a model written by [`Network::save_model`].
    ///
    /// A missing or unreadable file is an ordinary I/O error; a malformed
    /// record is a format error and goes through the fatal context.
    pub fn load_model<P: AsRef<Path>>(&mut self, path: P) -> CnnResult<()> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        self.deserialize_from_string(&content)?;
        info!(path = %path.display(), layers = self.layers.len(), "loaded model");
        Ok(())
    }
}

impl std::fmt::Debug for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let layers: Vec<_> = self.layers.iter().map(|layer| layer.layer_type()).collect();
        f.debug_struct("Network")
            .field("layers", &layers)
            .field("input_shape", &self.input_shape)
            .field("phase", &self.phase)
            .finish()
    }
}
