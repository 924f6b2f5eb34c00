//! Learning rate schedules
//!
//! The network takes a learning rate per training step; a scheduler decides
//! what that rate is. `step()` is called by the training loop at whatever
//! granularity the schedule is defined for (epochs for the decay schedules,
//! evaluation intervals for [`LinearDecay`]).

/// Core trait for learning rate schedulers.
///
/// # Example
///
/// ```
/// use rust_convnet::utils::lr_scheduler::{LRScheduler, StepDecay};
///
/// let mut scheduler = StepDecay::new(0.1, 2, 0.5);
/// scheduler.step();
/// scheduler.step();
/// assert!((scheduler.get_lr() - 0.05).abs() < 1e-7);
/// ```
pub trait LRScheduler {
    /// Learning rate for the current step.
    fn get_lr(&self) -> f32;

    /// Advance the schedule by one step.
    fn step(&mut self);

    /// Return to the initial learning rate.
    fn reset(&mut self);
}

/// Fixed learning rate.
pub struct ConstantLR {
    lr: f32,
}

impl ConstantLR {
    pub fn new(lr: f32) -> Self {
        Self { lr }
    }
}

impl LRScheduler for ConstantLR {
    fn get_lr(&self) -> f32 {
        self.lr
    }

    fn step(&mut self) {}

    fn reset(&mut self) {}
}

/// Multiply the rate by `gamma` every `step_size` steps.
///
/// Formula: lr = initial_lr * gamma^(step / step_size)
pub struct StepDecay {
    initial_lr: f32,
    step_size: usize,
    gamma: f32,
    current_step: usize,
    current_lr: f32,
}

impl StepDecay {
    /// `step_size` of 0 is treated as 1.
    pub fn new(initial_lr: f32, step_size: usize, gamma: f32) -> Self {
        Self {
            initial_lr,
            step_size: step_size.max(1),
            gamma,
            current_step: 0,
            current_lr: initial_lr,
        }
    }
}

impl LRScheduler for StepDecay {
    fn get_lr(&self) -> f32 {
        self.current_lr
    }

    fn step(&mut self) {
        self.current_step += 1;
        let num_decays = self.current_step / self.step_size;
        self.current_lr = self.initial_lr * self.gamma.powi(num_decays as i32);
    }

    fn reset(&mut self) {
        self.current_step = 0;
        self.current_lr = self.initial_lr;
    }
}

/// Multiply the rate by `gamma` every step.
///
/// Formula: lr = initial_lr * gamma^step
pub struct ExponentialDecay {
    initial_lr: f32,
    gamma: f32,
    current_step: usize,
    current_lr: f32,
}

impl ExponentialDecay {
    pub fn new(initial_lr: f32, gamma: f32) -> Self {
        Self {
            initial_lr,
            gamma,
            current_step: 0,
            current_lr: initial_lr,
        }
    }
}

impl LRScheduler for ExponentialDecay {
    fn get_lr(&self) -> f32 {
        self.current_lr
    }

    fn step(&mut self) {
        self.current_step += 1;
        self.current_lr = self.initial_lr * self.gamma.powi(self.current_step as i32);
    }

    fn reset(&mut self) {
        self.current_step = 0;
        self.current_lr = self.initial_lr;
    }
}

/// Subtract `decay` every step, never going below `min_lr`.
pub struct LinearDecay {
    initial_lr: f32,
    decay: f32,
    min_lr: f32,
    current_lr: f32,
}

impl LinearDecay {
    pub fn new(initial_lr: f32, decay: f32, min_lr: f32) -> Self {
        Self {
            initial_lr,
            decay,
            min_lr,
            current_lr: initial_lr,
        }
    }
}

impl LRScheduler for LinearDecay {
    fn get_lr(&self) -> f32 {
        self.current_lr
    }

    fn step(&mut self) {
        self.current_lr = (self.current_lr - self.decay).max(self.min_lr);
    }

    fn reset(&mut self) {
        self.current_lr = self.initial_lr;
    }
}
