//! Shared utilities for the network engine
//!
//! Random number generation for weight initialization, scalar activation
//! helpers used by the elementwise layers, and learning-rate schedules.

pub mod activations;
pub mod lr_scheduler;
pub mod rng;

pub use rng::SimpleRng;
