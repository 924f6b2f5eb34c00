//! Rust Convolutional Network Library
//!
//! A small feed-forward/back-propagation engine for convolutional networks:
//! layers are chained into a [`network::Network`] and trained by plain
//! gradient descent with hand-derived gradients per layer type.
//!
//! # Modules
//!
//! - `tensor`: 4D shapes and flat f32 buffers
//! - `layers`: Layer trait and implementations (Input, Convolution, Pooling, activations, FullyConnected, Softmax)
//! - `loss`: Loss functors (cross entropy, mean squared error)
//! - `network`: Layer orchestration, training steps and model persistence
//! - `serialize`: Text record encoder/decoder and the layer type registry
//! - `error` / `fatal`: Error types and the fatal-condition reporting context
//! - `utils`: Shared utilities (RNG, activation functions, learning rate schedules)
//! - `config`: Training configuration structures
//! - `architecture`: Architecture configuration and network building

pub mod architecture;
pub mod config;
pub mod error;
pub mod fatal;
pub mod layers;
pub mod loss;
pub mod network;
pub mod serialize;
pub mod tensor;
pub mod utils;

pub use error::{CnnError, CnnResult};
pub use network::Network;
pub use tensor::{Shape, Tensor};
