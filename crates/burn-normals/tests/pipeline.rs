//! End-to-end tests of the normals pipeline with small deterministic models
//!
//! Run with: `cargo test -p burn-normals --test pipeline`

use std::sync::atomic::{AtomicUsize, Ordering};

use burn::prelude::*;
use burn_ndarray::NdArray;
use burn_normals::{
    EnsembleReduction, MarigoldConfig, MarigoldNormalsPipeline, NormalsError, OutputData,
    OutputFormat, PredictConfig, ResampleMethod,
};

type TestBackend = NdArray<f32>;

/// Stand-ins for the networks
mod models {
    use super::*;
    use burn_normals::{Denoiser, LatentAutoencoder, TextEncoder};

    /// Latent is the 8x8 average of the image plus the channel mean;
    /// decoding upsamples the first three channels
    pub struct PoolAutoencoder;

    impl LatentAutoencoder<TestBackend> for PoolAutoencoder {
        fn latent_channels(&self) -> usize {
            4
        }

        fn encode_moments(&self, image: Tensor<TestBackend, 4>) -> Tensor<TestBackend, 4> {
            let [n, c, h, w] = image.dims();
            let pooled = image
                .reshape([n, c, h / 8, 8, w / 8, 8])
                .mean_dim(5)
                .mean_dim(3)
                .reshape([n, c, h / 8, w / 8]);
            let mean = pooled.clone().mean_dim(1);
            let latent = Tensor::cat(vec![pooled, mean], 1);
            let logvar = latent.zeros_like();
            Tensor::cat(vec![latent, logvar], 1)
        }

        fn decode_raw(&self, latent: Tensor<TestBackend, 4>) -> Tensor<TestBackend, 4> {
            let [n, _, h, w] = latent.dims();
            latent
                .slice([0..n, 0..3, 0..h, 0..w])
                .reshape([n, 3, h, 1, w, 1])
                .repeat_dim(3, 8)
                .repeat_dim(5, 8)
                .reshape([n, 3, h * 8, w * 8])
        }
    }

    /// Predicts half of the prediction latent, counting calls
    #[derive(Default)]
    pub struct HalfDenoiser {
        pub calls: AtomicUsize,
    }

    impl Denoiser<TestBackend> for HalfDenoiser {
        fn forward(
            &self,
            latent_pair: Tensor<TestBackend, 4>,
            _timestep: Tensor<TestBackend, 1>,
            _context: Tensor<TestBackend, 3>,
        ) -> Tensor<TestBackend, 4> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let [b, c, h, w] = latent_pair.dims();
            latent_pair.slice([0..b, c / 2..c, 0..h, 0..w]) * 0.5
        }
    }

    #[derive(Default)]
    pub struct EmptyText {
        pub calls: AtomicUsize,
    }

    impl TextEncoder<TestBackend> for EmptyText {
        fn encode_text(&self, _prompt: &str) -> Tensor<TestBackend, 3> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Tensor::zeros([1, 2, 8], &Default::default())
        }
    }
}

use models::{EmptyText, HalfDenoiser, PoolAutoencoder};

type TestPipeline = MarigoldNormalsPipeline<TestBackend, PoolAutoencoder, HalfDenoiser, EmptyText>;

fn pipeline(config: MarigoldConfig) -> TestPipeline {
    MarigoldNormalsPipeline::new(
        PoolAutoencoder,
        HalfDenoiser::default(),
        EmptyText::default(),
        config,
        &Default::default(),
    )
}

/// Model defaults small enough for tests: 2 steps at 64 px
fn small_model() -> MarigoldConfig {
    MarigoldConfig {
        default_denoising_steps: Some(2),
        default_processing_resolution: Some(64),
        ..MarigoldConfig::normals_v0_1()
    }
}

/// 8-bit HWC gradient image
fn gradient_image(h: usize, w: usize) -> TensorData {
    let values: Vec<u8> = (0..h * w * 3).map(|i| (i % 251) as u8).collect();
    TensorData::new(values, [h, w, 3])
}

/// Same latent vector at every position
fn constant_latent(n: usize, h: usize, w: usize) -> Tensor<TestBackend, 4> {
    let device = Default::default();
    Tensor::<TestBackend, 1>::from_floats([0.1, -0.05, 0.3, 0.02], &device)
        .reshape([1, 4, 1, 1])
        .repeat_dim(0, n)
        .repeat_dim(2, h)
        .repeat_dim(3, w)
}

fn values(data: TensorData) -> Vec<f32> {
    data.iter::<f32>().collect()
}

/// Per-pixel norms of a `[N, 3, H, W]` output
fn norms(output: OutputData<TestBackend>) -> Vec<f32> {
    let tensor = output.into_tensor(&Default::default());
    values(tensor.powi_scalar(2).sum_dim(1).sqrt().into_data())
}

#[test]
fn test_predict_unit_normals_at_input_size() {
    let pipe = pipeline(small_model());
    // 64x96 -> 42x64, padded to 48x64, latent 6x8
    let output = pipe
        .predict(gradient_image(64, 96), &PredictConfig::default(), Some(constant_latent(1, 6, 8)))
        .unwrap();

    assert_eq!(output.prediction.shape(), vec![1, 3, 64, 96]);
    assert!(matches!(output.prediction, OutputData::Array(_)));
    assert!(output.uncertainty.is_none());
    assert!(output.latent.is_none());

    for n in norms(output.prediction) {
        assert!((n - 1.0).abs() < 1e-4, "norm {n}");
    }

    let visualization = output.visualization.unwrap();
    assert_eq!(visualization.len(), 1);
    assert_eq!(visualization[0].dimensions(), (96, 64));
    assert_eq!(pipe.unet.calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_processing_size_output() {
    let pipe = pipeline(small_model());
    let config = PredictConfig {
        match_input_resolution: false,
        output_visualization: false,
        output_latent: true,
        ..Default::default()
    };
    let output = pipe.predict(gradient_image(64, 96), &config, None).unwrap();

    assert_eq!(output.prediction.shape(), vec![1, 3, 42, 64]);
    assert!(output.visualization.is_none());
    assert_eq!(output.latent.unwrap().dims(), [1, 4, 6, 8]);
}

#[test]
fn test_seed_reproducibility() {
    let pipe = pipeline(small_model());
    let run = |seed| {
        let config = PredictConfig {
            seed: Some(seed),
            output_visualization: false,
            ..Default::default()
        };
        values(pipe.predict(gradient_image(32, 48), &config, None).unwrap().prediction.into_data())
    };

    assert_eq!(run(11), run(11));
    assert_ne!(run(11), run(12));
}

#[test]
fn test_input_latent_reproducibility() {
    let pipe = pipeline(small_model());
    let latent = Tensor::<TestBackend, 4>::random(
        [1, 4, 6, 8],
        burn::tensor::Distribution::Normal(0.0, 1.0),
        &Default::default(),
    );
    let run = || {
        values(
            pipe.predict(gradient_image(48, 64), &PredictConfig::default(), Some(latent.clone()))
                .unwrap()
                .prediction
                .into_data(),
        )
    };

    assert_eq!(run(), run());
}

#[test]
fn test_rerun_from_output_latent() {
    let pipe = pipeline(small_model());
    let seeded = PredictConfig {
        seed: Some(7),
        output_latent: true,
        output_visualization: false,
        ..Default::default()
    };
    let first = pipe.predict(gradient_image(64, 96), &seeded, None).unwrap();
    assert_eq!(first.prediction.shape(), vec![1, 3, 64, 96]);
    for n in norms(first.prediction) {
        assert!((n - 1.0).abs() < 1e-4, "norm {n}");
    }

    let latent = first.latent.unwrap();
    let unseeded = PredictConfig {
        seed: None,
        ..seeded
    };
    let run = || {
        values(
            pipe.predict(gradient_image(64, 96), &unseeded, Some(latent.clone()))
                .unwrap()
                .prediction
                .into_data(),
        )
    };
    assert_eq!(run(), run());
}

#[test]
fn test_ensemble_uncertainty() {
    let pipe = pipeline(small_model());
    let config = PredictConfig {
        ensemble_size: 3,
        seed: Some(3),
        batch_size: 2,
        output_format: OutputFormat::Tensor,
        output_latent: true,
        ..Default::default()
    };
    let output = pipe.predict(gradient_image(48, 64), &config, None).unwrap();

    assert!(matches!(output.prediction, OutputData::Tensor(_)));
    assert_eq!(output.prediction.shape(), vec![1, 3, 48, 64]);
    assert_eq!(output.latent.unwrap().dims(), [3, 4, 6, 8]);

    let uncertainty = output.uncertainty.unwrap();
    assert_eq!(uncertainty.shape(), vec![1, 1, 48, 64]);
    assert!(values(uncertainty.into_data())
        .iter()
        .all(|u| (-1e-6..=1.0 + 1e-6).contains(u)));

    // 2 sub-batches (members 0-1, member 2) x 2 steps
    assert_eq!(pipe.unet.calls.load(Ordering::SeqCst), 4);
}

#[test]
fn test_ensemble_without_uncertainty() {
    let pipe = pipeline(small_model());
    let config = PredictConfig {
        ensemble_size: 3,
        ensemble: EnsembleReduction::Mean,
        output_uncertainty: false,
        output_visualization: false,
        ..Default::default()
    };
    let output = pipe
        .predict(gradient_image(48, 64), &config, Some(constant_latent(3, 6, 8)))
        .unwrap();

    assert!(output.uncertainty.is_none());
    for n in norms(output.prediction) {
        assert!((n - 1.0).abs() < 1e-4);
    }
}

#[test]
fn test_float_batch_at_native_resolution() {
    let pipe = pipeline(small_model());
    let device = Default::default();
    let images = Tensor::<TestBackend, 4>::random(
        [2, 3, 20, 28],
        burn::tensor::Distribution::Uniform(-1.0, 1.0),
        &device,
    );
    let config = PredictConfig {
        processing_resolution: Some(0),
        resample_method_output: ResampleMethod::NearestExact,
        seed: Some(0),
        ..Default::default()
    };

    let output = pipe.predict(images.clone(), &config, None).unwrap();
    assert_eq!(output.prediction.shape(), vec![2, 3, 20, 28]);
    assert_eq!(output.visualization.unwrap().len(), 2);

    pipe.predict(images, &config, None).unwrap();
    assert_eq!(pipe.text_encoder.calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_lcm_preset() {
    let pipe = pipeline(MarigoldConfig::normals_lcm_v0_1());
    let config = PredictConfig {
        processing_resolution: Some(32),
        seed: Some(5),
        ..Default::default()
    };
    let output = pipe.predict(gradient_image(16, 32), &config, None).unwrap();

    assert_eq!(output.prediction.shape(), vec![1, 3, 16, 32]);
    assert_eq!(pipe.unet.calls.load(Ordering::SeqCst), 4);
}

#[test]
fn test_float_range_checked() {
    let pipe = pipeline(small_model());
    let device = Default::default();
    let image = Tensor::<TestBackend, 4>::ones([1, 3, 16, 16], &device) * 2.0;

    let result = pipe.predict(image.clone(), &PredictConfig::default(), None);
    assert!(matches!(result, Err(NormalsError::InvalidInputKind(_))));

    let unchecked = PredictConfig {
        check_input: false,
        ..Default::default()
    };
    assert!(pipe.predict(image, &unchecked, None).is_ok());
}

#[test]
fn test_invalid_calls_do_not_run_models() {
    let pipe = pipeline(small_model());
    let device = Default::default();

    let odd = PredictConfig {
        processing_resolution: Some(97),
        ..Default::default()
    };
    assert!(matches!(
        pipe.predict(gradient_image(64, 96), &odd, None),
        Err(NormalsError::InvalidArgumentValue {
            name: "processing_resolution",
            ..
        })
    ));

    let seeded = PredictConfig {
        seed: Some(1),
        ..Default::default()
    };
    assert!(matches!(
        pipe.predict(gradient_image(64, 96), &seeded, Some(constant_latent(1, 6, 8))),
        Err(NormalsError::InvalidArgumentCombination(_))
    ));

    let wrong = Tensor::<TestBackend, 4>::zeros([1, 4, 8, 8], &device);
    assert!(matches!(
        pipe.predict(gradient_image(64, 96), &PredictConfig::default(), Some(wrong)),
        Err(NormalsError::InvalidArgumentCombination(_))
    ));

    assert!(matches!(
        pipe.predict(gradient_image(1, 200), &PredictConfig::default(), None),
        Err(NormalsError::DegenerateGeometry { .. })
    ));

    let bare = pipeline(MarigoldConfig::default());
    assert_eq!(
        bare.predict(gradient_image(8, 8), &PredictConfig::default(), None).err(),
        Some(NormalsError::UnresolvedStepCount)
    );

    assert_eq!(pipe.unet.calls.load(Ordering::SeqCst), 0);
    assert_eq!(pipe.text_encoder.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_encode_prediction() {
    let pipe = pipeline(small_model());
    let device = Default::default();

    let normals = pipe.decode_prediction(constant_latent(2, 3, 4), 1);
    assert_eq!(normals.dims(), [2, 3, 24, 32]);

    let latent = pipe.encode_prediction(normals, true).unwrap();
    assert_eq!(latent.dims(), [2, 4, 3, 4]);

    let not_unit = Tensor::<TestBackend, 4>::ones([1, 3, 8, 8], &device);
    assert!(matches!(
        pipe.encode_prediction(not_unit.clone(), true),
        Err(NormalsError::InvalidNormals(_))
    ));
    assert!(pipe.encode_prediction(not_unit, false).is_ok());
}
