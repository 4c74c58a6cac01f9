//! Gaussian noise for latent initialization and stochastic steps

use burn::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

/// Source of standard-normal noise
///
/// A seeded source is reproducible across runs and backends. The backend
/// source defers to `Tensor::random` and the backend's global RNG.
#[derive(Debug, Clone)]
pub enum NoiseSource {
    Seeded(StdRng),
    Backend,
}

impl NoiseSource {
    /// Seeded when `seed` is given, backend RNG otherwise
    pub fn new(seed: Option<u64>) -> Self {
        match seed {
            Some(seed) => Self::Seeded(StdRng::seed_from_u64(seed)),
            None => Self::Backend,
        }
    }

    /// Draw a `[batch, channels, height, width]` tensor of N(0, 1) samples
    pub fn sample<B: Backend>(&mut self, shape: [usize; 4], device: &B::Device) -> Tensor<B, 4> {
        match self {
            Self::Seeded(rng) => {
                let len = shape.iter().product();
                let values = standard_normal(rng, len);
                Tensor::from_data(TensorData::new(values, shape), device)
            }
            Self::Backend => Tensor::random(
                shape,
                burn::tensor::Distribution::Normal(0.0, 1.0),
                device,
            ),
        }
    }
}

/// `len` draws from N(0, 1)
fn standard_normal(rng: &mut StdRng, len: usize) -> Vec<f32> {
    (&mut *rng).sample_iter(StandardNormal).take(len).collect()
}
