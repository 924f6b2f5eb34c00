//! Tests for architecture parsing and network building
//!
//! This file tests the architecture module including:
//! - Loading the shipped JSON architectures
//! - Building networks from configs and checking their shapes
//! - Rejecting unknown layer types, missing fields and stacks that do not chain
//! - Handling invalid JSON and missing files

use rust_convnet::architecture::{
    build_layer, build_layers, build_network, build_network_with_context, load_architecture,
    parse_architecture, LayerConfig,
};
use rust_convnet::fatal::{CapturingHandler, FatalContext};
use rust_convnet::layers::PoolingLayer;
use rust_convnet::serialize::RecordWriter;
use rust_convnet::tensor::{Shape, Tensor};
use std::io::Write;
use std::sync::Arc;
use tempfile::NamedTempFile;

fn write_temp_config(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("failed to create temp file");
    file.write_all(contents.as_bytes())
        .expect("failed to write temp config");
    file
}

fn config_error(json: &str) -> String {
    let err = parse_architecture(json).unwrap_err();
    assert_eq!(err.kind(), "ConfigError");
    err.to_string()
}

fn single_layer(json: &str) -> LayerConfig {
    serde_json::from_str(json).unwrap()
}

// ============================================================================
// Shipped Architecture Tests
// ============================================================================

mod shipped_architecture_tests {
    use super::*;

    #[test]
    fn test_lenet_small_shapes() {
        let arch = load_architecture("config/architectures/lenet_small.json").unwrap();
        assert_eq!(arch.input_shape(), Shape::new(16, 1, 12, 12));
        assert_eq!(arch.loss, "cross_entropy");

        let network = build_network(&arch).unwrap();
        assert_eq!(network.layer_count(), 6);
        let types: Vec<&str> = (0..6)
            .map(|i| network.layer(i).unwrap().layer_type())
            .collect();
        assert_eq!(
            types,
            [
                "InputLayer",
                "ConvolutionLayer",
                "ReluLayer",
                "PoolingLayer",
                "FullconnectLayer",
                "SoftmaxLayer"
            ]
        );
        assert_eq!(
            network.layer(3).unwrap().state().output_shape(),
            Shape::new(16, 4, 5, 5)
        );
        assert_eq!(network.output_shape(), Some(Shape::new(16, 3, 1, 1)));
        assert_eq!(network.parameter_count(), 4 * 9 + 4 + 3 * 100 + 3);
        assert_eq!(network.loss_functor().unwrap().name(), "cross_entropy");
    }

    #[test]
    fn test_mean_pool_tanh_shapes() {
        let arch = load_architecture("config/architectures/mean_pool_tanh.json").unwrap();
        let mut network = build_network(&arch).unwrap();
        assert_eq!(
            network.layer(0).unwrap().state().output_shape(),
            Shape::new(8, 3, 10, 8)
        );
        assert_eq!(
            network.layer(2).unwrap().state().output_shape(),
            Shape::new(8, 3, 5, 4)
        );
        assert_eq!(network.loss_functor().unwrap().name(), "mse");

        let input = Tensor::filled(arch.input_shape(), 0.5).unwrap();
        let output = network.test_batch(&input).unwrap();
        assert_eq!(output.shape(), Shape::new(8, 3, 1, 1));
        assert!(output.data().iter().all(|&v| v > 0.0 && v < 1.0));
    }

    #[test]
    fn test_seeded_builds_are_identical() {
        let arch = load_architecture("config/architectures/lenet_small.json").unwrap();
        let first = build_network(&arch).unwrap();
        let second = build_network(&arch).unwrap();
        assert_eq!(first.serialize_to_string(), second.serialize_to_string());
    }

    #[test]
    fn test_network_adopts_prebuilt_layers() {
        let arch = load_architecture("config/architectures/lenet_small.json").unwrap();
        let layers = build_layers(&arch).unwrap();
        assert_eq!(layers.len(), arch.layers.len());
        assert_eq!(
            layers.last().unwrap().state().output_shape(),
            Shape::new(16, 3, 1, 1)
        );

        let mut expected = RecordWriter::new();
        for layer in &layers {
            layer.serialize(&mut expected);
        }
        let network = build_network(&arch).unwrap();
        assert_eq!(network.serialize_to_string(), expected.finish());
    }

    #[test]
    fn test_load_from_temp_file() {
        let file = write_temp_config(
            r#"{
  "input": [2, 3, 4, 4],
  "loss": "mse",
  "layers": [ { "layer_type": "fully_connected", "outputs": 5, "bias": false } ]
}"#,
        );
        let arch = load_architecture(file.path().to_str().unwrap()).unwrap();
        let network = build_network(&arch).unwrap();
        assert_eq!(network.parameter_count(), 5 * 48);
    }
}

// ============================================================================
// Layer Construction Tests
// ============================================================================

mod layer_tests {
    use super::*;

    #[test]
    fn test_pooling_stride_defaults_to_kernel() {
        let config = single_layer(
            r#"{ "layer_type": "pooling", "pooling_type": "mean", "kernel_size": 3 }"#,
        );
        let mut layer = build_layer(&config, 0, 1).unwrap();
        assert_eq!(layer.layer_type(), PoolingLayer::TYPE);
        let out = layer.resolve_shape(Shape::new(1, 2, 9, 9)).unwrap();
        assert_eq!(out, Shape::new(1, 2, 3, 3));
    }

    #[test]
    fn test_pooling_type_case_insensitive() {
        let config = single_layer(
            r#"{ "layer_type": "Pooling", "pooling_type": "MAX", "kernel_size": 2, "stride": 1 }"#,
        );
        let mut layer = build_layer(&config, 0, 1).unwrap();
        let out = layer.resolve_shape(Shape::new(1, 1, 4, 4)).unwrap();
        assert_eq!(out, Shape::new(1, 1, 3, 3));
    }

    #[test]
    fn test_convolution_rectangular_kernel() {
        let config = single_layer(
            r#"{ "layer_type": "convolution", "out_channels": 2,
                 "kernel_height": 2, "kernel_width": 4, "stride_w": 2, "bias": false }"#,
        );
        let mut layer = build_layer(&config, 0, 1).unwrap();
        let out = layer.resolve_shape(Shape::new(1, 3, 6, 10)).unwrap();
        assert_eq!(out, Shape::new(1, 2, 5, 4));
        assert_eq!(layer.parameter_count(), 2 * 3 * 2 * 4);
    }

    #[test]
    fn test_layer_errors_name_the_index() {
        let config = single_layer(r#"{ "layer_type": "convolution", "kernel_size": 3 }"#);
        let err = build_layer(&config, 4, 1).err().unwrap();
        assert_eq!(err.kind(), "ConfigError");
        assert!(err.to_string().contains("Layer 4"));
        assert!(err.to_string().contains("out_channels"));
    }
}

// ============================================================================
// Invalid Architecture Tests
// ============================================================================

mod invalid_architecture_tests {
    use super::*;

    #[test]
    fn test_missing_file() {
        let err = load_architecture("config/architectures/missing.json").unwrap_err();
        assert_eq!(err.kind(), "IoError");
    }

    #[test]
    fn test_invalid_json() {
        config_error(r#"{ "input": [1, 1, 2, 2], "loss": "mse", "layers": [ "#);
        config_error(r#"{ "input": [1, 1, 2], "loss": "mse", "layers": [] }"#);
    }

    #[test]
    fn test_unknown_layer_type() {
        let message = config_error(
            r#"{ "input": [1, 1, 4, 4], "loss": "mse",
                 "layers": [ { "layer_type": "dropout" } ] }"#,
        );
        assert!(message.contains("Unknown layer type: dropout"));
    }

    #[test]
    fn test_unknown_loss() {
        let message = config_error(
            r#"{ "input": [1, 1, 4, 4], "loss": "hinge",
                 "layers": [ { "layer_type": "relu" } ] }"#,
        );
        assert!(message.contains("hinge"));
    }

    #[test]
    fn test_empty_layers() {
        config_error(r#"{ "input": [1, 1, 4, 4], "loss": "mse", "layers": [] }"#);
    }

    #[test]
    fn test_zero_input_dimension() {
        config_error(
            r#"{ "input": [1, 0, 4, 4], "loss": "mse", "layers": [ { "layer_type": "relu" } ] }"#,
        );
    }

    #[test]
    fn test_unknown_pooling_type() {
        let message = config_error(
            r#"{ "input": [1, 1, 4, 4], "loss": "mse",
                 "layers": [ { "layer_type": "pooling", "pooling_type": "median", "kernel_size": 2 } ] }"#,
        );
        assert!(message.contains("median"));
    }

    #[test]
    fn test_shapes_that_do_not_chain() {
        let message = config_error(
            r#"{ "input": [1, 1, 6, 6], "loss": "mse",
                 "layers": [
                   { "layer_type": "pooling", "pooling_type": "max", "kernel_size": 2 },
                   { "layer_type": "convolution", "out_channels": 2, "kernel_size": 5 }
                 ] }"#,
        );
        assert!(message.contains("Layer 1"));
    }

    #[test]
    fn test_invalid_config_never_reaches_fatal_handler() {
        let arch = load_architecture("config/architectures/lenet_small.json").unwrap();
        let mut broken = arch.clone();
        broken.layers[1].kernel_size = Some(20);

        let handler = Arc::new(CapturingHandler::new());
        let err = build_network_with_context(&broken, FatalContext::new(handler.clone()))
            .err()
            .unwrap();
        assert_eq!(err.kind(), "ConfigError");
        assert!(handler.reports().is_empty());
    }
}
