//! Scalar activation functions and their derivatives
//!
//! Derivatives of sigmoid and tanh are expressed in terms of the activation's
//! output `y`, which is what the layers keep from the forward pass.

/// max(0, x)
#[inline]
pub fn relu(x: f32) -> f32 {
    if x > 0.0 {
        x
    } else {
        0.0
    }
}

/// Derivative of ReLU at input `x` (0 at the kink).
#[inline]
pub fn relu_derivative(x: f32) -> f32 {
    if x > 0.0 {
        1.0
    } else {
        0.0
    }
}

#[inline]
pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Sigmoid derivative assuming y = sigmoid(x).
#[inline]
pub fn sigmoid_derivative(y: f32) -> f32 {
    y * (1.0 - y)
}

/// Tanh derivative assuming y = tanh(x).
#[inline]
pub fn tanh_derivative(y: f32) -> f32 {
    1.0 - y * y
}

/// Softmax over one row, in place, using max-subtraction for stability.
pub fn softmax_inplace(row: &mut [f32]) {
    if row.is_empty() {
        return;
    }
    let max_value = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);

    let mut sum = 0.0f32;
    for value in row.iter_mut() {
        *value = (*value - max_value).exp();
        sum += *value;
    }

    let inv_sum = 1.0f32 / sum;
    for value in row.iter_mut() {
        *value *= inv_sum;
    }
}
