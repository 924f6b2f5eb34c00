// Integration tests for the convolution layer.
// Shape algebra, the concrete 3x3 scenario and parameter updates.

use approx::assert_relative_eq;
use rust_convnet::layers::conv2d::window_output_size;
use rust_convnet::layers::{ConvolutionLayer, Layer};
use rust_convnet::tensor::{Shape, Tensor};

fn one_to_nine() -> Tensor {
    let values: Vec<f32> = (1..=9).map(|v| v as f32).collect();
    Tensor::from_vec(Shape::new(1, 1, 3, 3), values).unwrap()
}

fn run_forward(layer: &mut ConvolutionLayer, input: &Tensor) -> Tensor {
    let out_shape = layer.resolve_shape(input.shape()).unwrap();
    let mut output = Tensor::new(out_shape).unwrap();
    layer.forward(input, &mut output).unwrap();
    output
}

// ============================================================================
// Shape Algebra
// ============================================================================

mod shape_tests {
    use super::*;

    #[test]
    fn test_output_size_formula() {
        for input in 1..12 {
            for kernel in 1..=input {
                for stride in 1..4 {
                    let expected = (input - kernel) / stride + 1;
                    assert_eq!(window_output_size(input, kernel, stride), Some(expected));
                }
            }
        }
        assert_eq!(window_output_size(2, 3, 1), None);
        assert_eq!(window_output_size(5, 3, 0), None);
    }

    #[test]
    fn test_resolve_shape_uses_kernel_count() {
        let mut layer = ConvolutionLayer::new(Shape::new(7, 1, 3, 2), 2, 1, false).unwrap();
        let out = layer.resolve_shape(Shape::new(5, 3, 9, 6)).unwrap();
        assert_eq!(out, Shape::new(5, 7, 4, 5));
        // Kernel channels always follow the input.
        assert_eq!(layer.kernel_shape(), Shape::new(7, 3, 3, 2));
        assert_eq!(layer.kernel().unwrap().shape(), Shape::new(7, 3, 3, 2));
    }

    #[test]
    fn test_kernel_larger_than_input_rejected() {
        let mut layer = ConvolutionLayer::new(Shape::new(1, 1, 4, 4), 1, 1, false).unwrap();
        let err = layer.resolve_shape(Shape::new(1, 1, 3, 3)).unwrap_err();
        assert_eq!(err.kind(), "ShapeError");
    }

    #[test]
    fn test_zero_input_dimension_rejected() {
        let mut layer = ConvolutionLayer::new(Shape::new(1, 1, 1, 1), 1, 1, false).unwrap();
        assert!(layer.resolve_shape(Shape::new(1, 0, 3, 3)).is_err());
        assert!(layer.resolve_shape(Shape::new(0, 1, 3, 3)).is_err());
    }
}

// ============================================================================
// Forward Pass
// ============================================================================

mod forward_tests {
    use super::*;

    #[test]
    fn test_ones_kernel_on_one_to_nine() {
        let mut layer = ConvolutionLayer::new(Shape::new(1, 1, 2, 2), 1, 1, false).unwrap();
        layer.resolve_shape(Shape::new(1, 1, 3, 3)).unwrap();
        layer.set_kernel(&[1.0; 4]).unwrap();

        let output = run_forward(&mut layer, &one_to_nine());
        assert_eq!(output.shape(), Shape::new(1, 1, 2, 2));
        assert_eq!(output.data(), &[12.0, 16.0, 24.0, 28.0]);
    }

    #[test]
    fn test_stride_two_truncates() {
        let mut layer = ConvolutionLayer::new(Shape::new(1, 1, 2, 2), 2, 2, false).unwrap();
        layer.resolve_shape(Shape::new(1, 1, 3, 3)).unwrap();
        layer.set_kernel(&[1.0; 4]).unwrap();

        let output = run_forward(&mut layer, &one_to_nine());
        assert_eq!(output.shape(), Shape::new(1, 1, 1, 1));
        assert_eq!(output.data(), &[12.0]);
    }

    #[test]
    fn test_channels_are_summed() {
        let shape = Shape::new(1, 2, 2, 2);
        let input = Tensor::from_vec(shape, vec![1.0, 2.0, 3.0, 4.0, 10.0, 20.0, 30.0, 40.0]).unwrap();
        let mut layer = ConvolutionLayer::new(Shape::new(2, 1, 2, 2), 1, 1, true).unwrap();
        layer.resolve_shape(shape).unwrap();
        // Kernel 0 reads only channel 0, kernel 1 only channel 1.
        layer
            .set_kernel(&[1.0, 1.0, 1.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0])
            .unwrap();
        layer.set_bias(&[0.5, -0.5]).unwrap();

        let output = run_forward(&mut layer, &input);
        assert_eq!(output.shape(), Shape::new(1, 2, 1, 1));
        assert_relative_eq!(output.data()[0], 10.5);
        assert_relative_eq!(output.data()[1], 9.5);
    }

    #[test]
    fn test_batch_samples_independent() {
        let shape = Shape::new(2, 1, 3, 3);
        let mut values: Vec<f32> = (1..=9).map(|v| v as f32).collect();
        values.extend(std::iter::repeat(0.0).take(9));
        let input = Tensor::from_vec(shape, values).unwrap();

        let mut layer = ConvolutionLayer::new(Shape::new(1, 1, 2, 2), 1, 1, false).unwrap();
        layer.resolve_shape(shape).unwrap();
        layer.set_kernel(&[1.0; 4]).unwrap();
        let output = run_forward(&mut layer, &input);
        assert_eq!(output.data(), &[12.0, 16.0, 24.0, 28.0, 0.0, 0.0, 0.0, 0.0]);
    }
}

// ============================================================================
// Backward Pass and Updates
// ============================================================================

mod backward_tests {
    use super::*;

    #[test]
    fn test_input_gradient_accumulates_overlaps() {
        let mut layer = ConvolutionLayer::new(Shape::new(1, 1, 2, 2), 1, 1, false).unwrap();
        layer.resolve_shape(Shape::new(1, 1, 3, 3)).unwrap();
        layer.set_kernel(&[1.0; 4]).unwrap();
        let input = one_to_nine();
        let output = run_forward(&mut layer, &input);

        let grad = Tensor::filled(output.shape(), 1.0).unwrap();
        let grad_input = layer.backward(&input, &output, grad).unwrap();
        // Each input cell counts how many 2x2 windows cover it.
        assert_eq!(
            grad_input.data(),
            &[1.0, 2.0, 1.0, 2.0, 4.0, 2.0, 1.0, 2.0, 1.0]
        );
    }

    #[test]
    fn test_kernel_update_uses_learning_rate() {
        let mut layer = ConvolutionLayer::new(Shape::new(1, 1, 2, 2), 1, 1, true).unwrap();
        layer.resolve_shape(Shape::new(1, 1, 3, 3)).unwrap();
        layer.set_kernel(&[0.0; 4]).unwrap();
        let input = one_to_nine();
        let output = run_forward(&mut layer, &input);

        let grad = Tensor::filled(output.shape(), 1.0).unwrap();
        layer.backward(&input, &output, grad).unwrap();

        // dK[kh, kw] = sum of the inputs under that kernel tap over all windows.
        let expected_grad = [12.0f32, 16.0, 24.0, 28.0];
        let lr = layer.state().learning_rate();
        for (w, g) in layer.kernel().unwrap().data().iter().zip(expected_grad.iter()) {
            assert_relative_eq!(*w, -lr * g, epsilon = 1e-5);
        }
        assert_relative_eq!(layer.bias().unwrap().data()[0], -lr * 4.0, epsilon = 1e-6);
    }

    #[test]
    fn test_gradient_shape_mismatch_rejected() {
        let mut layer = ConvolutionLayer::new(Shape::new(1, 1, 2, 2), 1, 1, false).unwrap();
        let input = one_to_nine();
        let output = run_forward(&mut layer, &input);
        let wrong = Tensor::new(Shape::new(1, 1, 3, 3)).unwrap();
        let err = layer.backward(&input, &output, wrong).unwrap_err();
        assert_eq!(err.kind(), "ShapeError");
    }
}
