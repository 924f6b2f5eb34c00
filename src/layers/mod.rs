//! Layer abstractions for convolutional networks
//!
//! This module provides the [`Layer`] trait and the built-in layer types a
//! [`Network`](crate::network::Network) can stack: input, convolution, pooling,
//! elementwise activations, fully connected and softmax.

mod r#trait;
pub mod activation;
pub mod conv2d;
pub mod dense;
pub mod input;
pub mod pooling;
pub mod softmax;

pub use activation::{ActivationKind, ActivationLayer};
pub use conv2d::ConvolutionLayer;
pub use dense::FullyConnectedLayer;
pub use input::InputLayer;
pub use pooling::{PoolingLayer, PoolingType};
pub use r#trait::{Layer, LayerState, Phase};
pub use softmax::SoftmaxLayer;
