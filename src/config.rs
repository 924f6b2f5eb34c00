//! Configuration structures for training
//!
//! This module provides the JSON training configuration: batch size, epochs,
//! base learning rate and the learning rate schedule applied on top of it.

use crate::error::{CnnError, CnnResult};
use crate::utils::lr_scheduler::{ConstantLR, ExponentialDecay, LRScheduler, LinearDecay, StepDecay};
use serde::Deserialize;
use std::fs;

/// Scheduler names accepted in `scheduler_type`.
pub const SCHEDULER_TYPES: [&str; 4] = ["constant", "step_decay", "exponential", "linear_decay"];

/// Configuration for a training run.
///
/// Different scheduler types read different optional fields:
///
/// - **constant**: no extra fields
/// - **step_decay**: requires `step_size` and `gamma`
/// - **exponential**: requires `decay_rate` (per-step multiplier)
/// - **linear_decay**: requires `decay_rate` (subtracted per step) and optional `min_lr` (default 0)
///
/// # Example
///
/// ```json
/// {
///   "learning_rate": 0.1,
///   "batch_size": 16,
///   "epochs": 5,
///   "seed": 42,
///   "scheduler_type": "linear_decay",
///   "decay_rate": 0.01,
///   "min_lr": 0.001,
///   "test_after_batches": 50
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct TrainingConfig {
    /// Initial learning rate
    pub learning_rate: f32,

    /// Samples per training batch
    pub batch_size: usize,

    /// Passes over the training set
    pub epochs: usize,

    /// Seed for weight initialization and shuffling
    pub seed: Option<u64>,

    /// "constant", "step_decay", "exponential" or "linear_decay"
    #[serde(default = "default_scheduler_type")]
    pub scheduler_type: String,

    /// Steps between reductions for StepDecay
    pub step_size: Option<usize>,

    /// Multiplicative factor for StepDecay
    pub gamma: Option<f32>,

    /// Per-step multiplier for ExponentialDecay, or per-step decrement for LinearDecay
    pub decay_rate: Option<f32>,

    /// Floor for LinearDecay
    pub min_lr: Option<f32>,

    /// Evaluate on the test split after this many batches (and step the scheduler)
    pub test_after_batches: Option<usize>,
}

fn default_scheduler_type() -> String {
    "constant".to_string()
}

impl TrainingConfig {
    /// Build the learning rate schedule described by this configuration.
    pub fn build_scheduler(&self) -> CnnResult<Box<dyn LRScheduler>> {
        let lr = self.learning_rate;
        let scheduler: Box<dyn LRScheduler> = match self.scheduler_type.as_str() {
            "constant" => Box::new(ConstantLR::new(lr)),
            "step_decay" => {
                let step_size = require(self.step_size, "step_size", "step_decay")?;
                let gamma = require(self.gamma, "gamma", "step_decay")?;
                Box::new(StepDecay::new(lr, step_size, gamma))
            }
            "exponential" => {
                let decay_rate = require(self.decay_rate, "decay_rate", "exponential")?;
                Box::new(ExponentialDecay::new(lr, decay_rate))
            }
            "linear_decay" => {
                let decay_rate = require(self.decay_rate, "decay_rate", "linear_decay")?;
                Box::new(LinearDecay::new(lr, decay_rate, self.min_lr.unwrap_or(0.0)))
            }
            other => {
                return Err(CnnError::Config(format!(
                    "unknown scheduler type '{}'. Must be one of: {}",
                    other,
                    SCHEDULER_TYPES.join(", ")
                )))
            }
        };
        Ok(scheduler)
    }
}

fn require<T>(value: Option<T>, field: &str, scheduler: &str) -> CnnResult<T> {
    value.ok_or_else(|| CnnError::Config(format!("{} requires '{}'", scheduler, field)))
}

/// Loads a training configuration from a JSON file.
///
/// # Returns
///
/// `Ok(TrainingConfig)` on success, an I/O error if the file cannot be read, or
/// a config error if the JSON is invalid or fails validation.
///
/// # Examples
///
/// ```no_run
/// use rust_convnet::config::load_config;
///
/// let cfg = load_config("config/training.json").unwrap();
/// assert!(cfg.batch_size > 0);
/// ```
pub fn load_config(path: &str) -> CnnResult<TrainingConfig> {
    let contents = fs::read_to_string(path)?;
    parse_config(&contents)
}

/// Parse and validate a training configuration from JSON text.
pub fn parse_config(contents: &str) -> CnnResult<TrainingConfig> {
    let config: TrainingConfig = serde_json::from_str(contents)
        .map_err(|e| CnnError::Config(format!("invalid training config: {}", e)))?;
    validate_config(&config)?;
    Ok(config)
}

fn validate_config(config: &TrainingConfig) -> CnnResult<()> {
    if config.learning_rate.is_nan() || config.learning_rate <= 0.0 {
        return Err(CnnError::Config("learning_rate must be positive".into()));
    }
    if config.batch_size == 0 {
        return Err(CnnError::Config("batch_size must be positive".into()));
    }
    if config.epochs == 0 {
        return Err(CnnError::Config("epochs must be positive".into()));
    }

    if let Some(gamma) = config.gamma {
        if gamma < 0.0 {
            return Err(CnnError::Config("gamma must be non-negative".into()));
        }
    }

    if let Some(decay_rate) = config.decay_rate {
        if decay_rate < 0.0 {
            return Err(CnnError::Config("decay_rate must be non-negative".into()));
        }
    }

    if let Some(min_lr) = config.min_lr {
        if min_lr < 0.0 {
            return Err(CnnError::Config("min_lr must be non-negative".into()));
        }
    }

    if config.test_after_batches == Some(0) {
        return Err(CnnError::Config("test_after_batches must be positive".into()));
    }

    if !SCHEDULER_TYPES.contains(&config.scheduler_type.as_str()) {
        return Err(CnnError::Config(format!(
            "Invalid scheduler type '{}'. Must be one of: {}",
            config.scheduler_type,
            SCHEDULER_TYPES.join(", ")
        )));
    }

    Ok(())
}
