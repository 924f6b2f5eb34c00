// synthetic_cnn.rs
// Trains a small convolutional network on generated bar images.
//
// Usage:
//   synthetic_cnn [training_config.json] [architecture.json]
//
// Defaults:
//   config/training.json
//   config/architectures/lenet_small.json
//
// Each image is 1xHxW noise with one bright stroke: a horizontal bar (class 0),
// a vertical bar (class 1) or a diagonal (class 2).
//
// Output:
//   - logs/training_loss_synthetic.txt (epoch,loss,lr,time)
//   - logs/synthetic_cnn.model (text model records)
//   - test accuracy before and after reloading the saved model

use rust_convnet::architecture::{build_network, load_architecture};
use rust_convnet::config::load_config;
use rust_convnet::error::{CnnError, CnnResult};
use rust_convnet::network::Network;
use rust_convnet::tensor::{Shape, Tensor};
use rust_convnet::utils::SimpleRng;
use std::env;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::process;
use std::time::Instant;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const TRAIN_SAMPLES: usize = 960;
const TEST_SAMPLES: usize = 240;
const NOISE: f32 = 0.2;
const MODEL_PATH: &str = "./logs/synthetic_cnn.model";
const LOG_PATH: &str = "./logs/training_loss_synthetic.txt";

struct Dataset {
    images: Vec<f32>,
    labels: Vec<usize>,
    sample_shape: Shape,
}

impl Dataset {
    fn generate(count: usize, channels: usize, height: usize, width: usize, classes: usize, rng: &mut SimpleRng) -> Self {
        let sample_shape = Shape::new(1, channels, height, width);
        let sample_len = sample_shape.size_3d();
        let mut images = vec![0.0f32; count * sample_len];
        let mut labels = Vec::with_capacity(count);

        for (i, image) in images.chunks_mut(sample_len).enumerate() {
            let label = i % classes;
            for value in image.iter_mut() {
                *value = rng.gen_range_f32(0.0, NOISE);
            }
            let row = rng.gen_usize(height);
            let col = rng.gen_usize(width);
            for c in 0..channels {
                match label % 3 {
                    0 => (0..width).for_each(|w| image[sample_shape.index_in_sample(c, row, w)] = 1.0),
                    1 => (0..height).for_each(|h| image[sample_shape.index_in_sample(c, h, col)] = 1.0),
                    _ => (0..height.min(width))
                        .for_each(|d| image[sample_shape.index_in_sample(c, d, d)] = 1.0),
                }
            }
            labels.push(label);
        }

        Self {
            images,
            labels,
            sample_shape,
        }
    }

    fn len(&self) -> usize {
        self.labels.len()
    }

    /// Copy the samples at `indices` into an input tensor and a one-hot label tensor.
    fn gather(&self, indices: &[usize], classes: usize) -> CnnResult<(Tensor, Tensor)> {
        let sample_len = self.sample_shape.size_3d();
        let mut input = Tensor::new(self.sample_shape.with_number(indices.len()))?;
        let mut labels = Tensor::new(Shape::new(indices.len(), classes, 1, 1))?;
        for (n, &idx) in indices.iter().enumerate() {
            input
                .sample_mut(n)
                .copy_from_slice(&self.images[idx * sample_len..(idx + 1) * sample_len]);
            labels.sample_mut(n)[self.labels[idx]] = 1.0;
        }
        Ok((input, labels))
    }
}

fn argmax(values: &[f32]) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate() {
        if v > values[best] {
            best = i;
        }
    }
    best
}

fn test_accuracy(network: &mut Network, data: &Dataset, batch_size: usize, classes: usize) -> CnnResult<f32> {
    let indices: Vec<usize> = (0..data.len()).collect();
    let mut correct = 0usize;
    for chunk in indices.chunks(batch_size) {
        let (input, _) = data.gather(chunk, classes)?;
        let output = network.test_batch(&input)?;
        for (n, &idx) in chunk.iter().enumerate() {
            if argmax(output.sample(n)) == data.labels[idx] {
                correct += 1;
            }
        }
    }
    Ok(100.0 * correct as f32 / data.len() as f32)
}

fn run(training_path: &str, architecture_path: &str) -> CnnResult<()> {
    let training = load_config(training_path)?;
    let architecture = load_architecture(architecture_path)?;
    let mut network = build_network(&architecture)?;
    let mut scheduler = training.build_scheduler()?;

    let input = architecture.input_shape();
    let classes = network.output_shape().map_or(0, |shape| shape.size_3d());
    if classes == 0 {
        return Err(CnnError::Config("architecture produces no outputs".into()));
    }
    info!(
        layers = network.layer_count(),
        parameters = network.parameter_count(),
        classes,
        "built network from {}",
        architecture_path
    );

    let mut rng = SimpleRng::new(training.seed.unwrap_or(1));
    if training.seed.is_none() {
        rng.reseed_from_time();
    }
    let train = Dataset::generate(TRAIN_SAMPLES, input.channels, input.height, input.width, classes, &mut rng);
    let test = Dataset::generate(TEST_SAMPLES, input.channels, input.height, input.width, classes, &mut rng);
    info!(train = train.len(), test = test.len(), "generated synthetic data");

    fs::create_dir_all("./logs")?;
    let mut log = BufWriter::new(File::create(LOG_PATH)?);

    let mut indices: Vec<usize> = (0..train.len()).collect();
    let mut batches_seen = 0usize;

    for epoch in 0..training.epochs {
        let start_time = Instant::now();
        rng.shuffle_usize(&mut indices);
        let mut total_loss = 0.0f32;
        let mut batches = 0usize;

        for chunk in indices.chunks(training.batch_size) {
            let (batch_input, batch_labels) = train.gather(chunk, classes)?;
            total_loss += network.train_batch(&batch_input, &batch_labels, scheduler.get_lr())?;
            batches += 1;
            batches_seen += 1;

            if let Some(every) = training.test_after_batches {
                if batches_seen % every == 0 {
                    let acc = test_accuracy(&mut network, &test, training.batch_size, classes)?;
                    info!(batch = batches_seen, accuracy = acc, lr = scheduler.get_lr(), "evaluation");
                    scheduler.step();
                }
            }
        }

        let secs = start_time.elapsed().as_secs_f32();
        let avg_loss = total_loss / batches.max(1) as f32;
        info!(epoch = epoch + 1, loss = avg_loss, lr = scheduler.get_lr(), secs, "epoch finished");
        writeln!(log, "{},{},{},{}", epoch + 1, avg_loss, scheduler.get_lr(), secs)?;

        if training.test_after_batches.is_none() {
            scheduler.step();
        }
    }
    log.flush()?;

    let accuracy = test_accuracy(&mut network, &test, training.batch_size, classes)?;
    info!(accuracy, "test accuracy");

    network.save_model(MODEL_PATH)?;
    let mut restored = Network::new();
    restored.set_input_size(input)?;
    restored.load_model(MODEL_PATH)?;
    let restored_accuracy = test_accuracy(&mut restored, &test, training.batch_size, classes)?;
    info!(accuracy = restored_accuracy, "reloaded model accuracy");
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = env::args().collect();
    let training_path = args.get(1).map_or("config/training.json", String::as_str);
    let architecture_path = args
        .get(2)
        .map_or("config/architectures/lenet_small.json", String::as_str);

    if let Err(err) = run(training_path, architecture_path) {
        error!("{}", err);
        process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_argmax_first_wins() {
        assert_eq!(argmax(&[0.1, 0.7, 0.7]), 1);
        assert_eq!(argmax(&[3.0]), 0);
    }

    #[test]
    fn test_generated_classes_are_balanced() {
        let mut rng = SimpleRng::new(5);
        let data = Dataset::generate(30, 1, 6, 6, 3, &mut rng);
        for class in 0..3 {
            assert_eq!(data.labels.iter().filter(|&&l| l == class).count(), 10);
        }
    }

    #[test]
    fn test_gather_one_hot() {
        let mut rng = SimpleRng::new(9);
        let data = Dataset::generate(6, 1, 4, 4, 3, &mut rng);
        let (input, labels) = data.gather(&[4, 2], 3).unwrap();
        assert_eq!(input.shape(), Shape::new(2, 1, 4, 4));
        assert_eq!(labels.sample(0), &[0.0, 1.0, 0.0]);
        assert_eq!(labels.sample(1), &[0.0, 0.0, 1.0]);
    }
}
