//! Marigold surface normal estimation
//!
//! Canonicalize → resize → pad → encode → denoise → decode → unpad →
//! ensemble → resize back → visualize.

use burn::prelude::*;
use burn_normals_samplers::NoiseSource;
use image::RgbImage;
use log::{debug, warn};
use once_cell::sync::OnceCell;

use super::{MarigoldConfig, NormalsOutput, OutputData, PredictConfig};
use crate::batch::slice_batch;
use crate::canonical::{load_image_canonical, normalize_image_range, ImageInput};
use crate::denoise::denoise_latents;
use crate::ensemble::ensemble_normals;
use crate::error::{NormalsError, Result};
use crate::latent::{Denoiser, LatentAutoencoder, TextEncoder};
use crate::normals::{decode_normals, normalize_normals, prepare_normals_for_encoding, NORMALIZE_EPS};
use crate::resize::{max_edge_dims, pad_image, resize_antialias, resize_to_max_edge, unpad_image};
use crate::visualize::{NormalsColorizer, NormalsVisualizer};

/// Mixed into the call seed for the scheduler noise streams, so they differ
/// from the initial-noise stream
const SCHEDULER_SEED_MIX: u64 = 0x9E37_79B9_7F4A_7C15;

/// Values resolved and validated before any model is invoked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ResolvedCall {
    num_images: usize,
    num_inference_steps: usize,
    processing_resolution: usize,
}

/// Marigold normals pipeline
///
/// Generic over the autoencoder `A`, denoiser `U` and text encoder `T`.
pub struct MarigoldNormalsPipeline<B: Backend, A, U, T> {
    pub vae: A,
    pub unet: U,
    pub text_encoder: T,
    config: MarigoldConfig,
    visualizer: Box<dyn NormalsVisualizer<B> + Send + Sync>,
    empty_text_embedding: OnceCell<Tensor<B, 3>>,
    device: B::Device,
}

impl<B, A, U, T> MarigoldNormalsPipeline<B, A, U, T>
where
    B: Backend,
    A: LatentAutoencoder<B>,
    U: Denoiser<B>,
    T: TextEncoder<B>,
{
    pub fn new(vae: A, unet: U, text_encoder: T, config: MarigoldConfig, device: &B::Device) -> Self {
        Self {
            vae,
            unet,
            text_encoder,
            config,
            visualizer: Box::new(NormalsColorizer),
            empty_text_embedding: OnceCell::new(),
            device: device.clone(),
        }
    }

    /// Replace the default colorizer
    pub fn with_visualizer(mut self, visualizer: impl NormalsVisualizer<B> + Send + Sync + 'static) -> Self {
        self.visualizer = Box::new(visualizer);
        self
    }

    pub fn config(&self) -> &MarigoldConfig {
        &self.config
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    /// Embedding of the empty prompt, `[1, tokens, dim]`
    ///
    /// Computed on first use and cached for the lifetime of the pipeline.
    pub fn encode_empty_text(&self) -> Tensor<B, 3> {
        self.empty_text_embedding
            .get_or_init(|| {
                debug!("encoding empty text prompt");
                self.text_encoder.encode_text("").to_device(&self.device)
            })
            .clone()
    }

    /// Validate a call and resolve its defaults
    fn check_inputs(
        &self,
        image: &ImageInput<B>,
        config: &PredictConfig,
        input_latent: Option<&Tensor<B, 4>>,
    ) -> Result<ResolvedCall> {
        let num_inference_steps = config
            .num_inference_steps
            .or(self.config.default_denoising_steps)
            .ok_or(NormalsError::UnresolvedStepCount)?;
        if num_inference_steps < 1 {
            return Err(NormalsError::invalid_value("num_inference_steps", "must be positive"));
        }

        if config.ensemble_size < 1 {
            return Err(NormalsError::invalid_value("ensemble_size", "must be positive"));
        }
        if config.ensemble_size == 2 {
            warn!(
                "`ensemble_size` == 2 results are similar to no ensembling (1); \
                 consider increasing the value to at least 3."
            );
        }

        let processing_resolution = config
            .processing_resolution
            .or(self.config.default_processing_resolution)
            .ok_or(NormalsError::UnresolvedResolution)?;
        let scale = self.vae.spatial_scale();
        if processing_resolution % scale != 0 {
            return Err(NormalsError::invalid_value(
                "processing_resolution",
                format!("{processing_resolution} is not a multiple of {scale}"),
            ));
        }

        if config.batch_size < 1 {
            return Err(NormalsError::invalid_value("batch_size", "must be positive"));
        }

        if input_latent.is_some() && config.seed.is_some() {
            return Err(NormalsError::InvalidArgumentCombination(
                "`input_latent` and `seed` cannot be used together".to_string(),
            ));
        }

        let (num_images, h, w) = image.dims()?;
        if num_images == 0 || h == 0 || w == 0 {
            return Err(NormalsError::InvalidInputKind(format!(
                "image is empty: {num_images} images of {h}x{w}"
            )));
        }
        let (h, w) = if processing_resolution > 0 {
            max_edge_dims(h, w, processing_resolution)?
        } else {
            (h, w)
        };

        if let Some(latent) = input_latent {
            let expected = [
                num_images * config.ensemble_size,
                self.vae.latent_channels(),
                h.div_ceil(scale),
                w.div_ceil(scale),
            ];
            if latent.dims() != expected {
                return Err(NormalsError::InvalidArgumentCombination(format!(
                    "`input_latent` has unexpected shape={:?} expected={:?}",
                    latent.dims(),
                    expected
                )));
            }
        }

        Ok(ResolvedCall {
            num_images,
            num_inference_steps,
            processing_resolution,
        })
    }

    /// Predict surface normals for one image or a stack of images
    ///
    /// `input_latent` replaces the random initial latent; it must be
    /// `[N*E, C, h, w]` for the processed resolution and cannot be combined
    /// with `config.seed`.
    pub fn predict(
        &self,
        image: impl Into<ImageInput<B>>,
        config: &PredictConfig,
        input_latent: Option<Tensor<B, 4>>,
    ) -> Result<NormalsOutput<B>> {
        let image = image.into();

        // 1. Checking inputs
        let resolved = self.check_inputs(&image, config, input_latent.as_ref())?;
        let ResolvedCall {
            num_images,
            num_inference_steps,
            processing_resolution,
        } = resolved;
        let ensemble_size = config.ensemble_size;
        debug!(
            "predict: {} image(s), ensemble {}, {} steps, processing resolution {}",
            num_images, ensemble_size, num_inference_steps, processing_resolution
        );

        // 2. Preprocessing input image
        let (image, source_max) = load_image_canonical(image, &self.device)?; // [N,3,H,W]
        let image = normalize_image_range(image, source_max, config.check_input)?;
        let [_, _, orig_h, orig_w] = image.dims();

        let image = if processing_resolution > 0 {
            resize_to_max_edge(image, processing_resolution, config.resample_method_input)? // [N,3,PH,PW]
        } else {
            image
        };
        let (image, padding) = pad_image(image, self.vae.spatial_scale()); // [N,3,PPH,PPW]

        // 3. Prepare empty text conditioning
        let text_embedding = self.encode_empty_text();

        // 4. Encode input image into latent space
        let (image_latent, pred_latent) =
            self.prepare_latent(image, input_latent, config.seed, ensemble_size, config.batch_size); // [N*E,4,h,w]

        // 5. Denoising loop
        let pred_latent = denoise_latents(
            &self.unet,
            &self.config.scheduler,
            image_latent,
            pred_latent,
            text_embedding,
            num_inference_steps,
            config.batch_size,
            config.seed.map(|seed| seed ^ SCHEDULER_SEED_MIX),
        ); // [N*E,4,h,w]

        // 6. Decode prediction from latent into pixel space
        let prediction = self.decode_prediction(pred_latent.clone(), config.batch_size); // [N*E,3,PPH,PPW]
        let latent = config.output_latent.then_some(pred_latent);

        // 7. Postprocess predictions
        let prediction = unpad_image(prediction, padding); // [N*E,3,PH,PW]

        let (prediction, uncertainty) = if ensemble_size > 1 {
            let (predictions, uncertainties): (Vec<_>, Vec<_>) = (0..num_images)
                .map(|i| {
                    let members =
                        slice_batch(&prediction, i * ensemble_size..(i + 1) * ensemble_size);
                    ensemble_normals(members, config.output_uncertainty, config.ensemble)
                })
                .unzip();
            let uncertainty = uncertainties
                .into_iter()
                .collect::<Option<Vec<_>>>()
                .map(|u| Tensor::cat(u, 0)); // [N,1,PH,PW]
            (Tensor::cat(predictions, 0), uncertainty) // [N,3,PH,PW]
        } else {
            (prediction, None)
        };

        let (prediction, uncertainty) = if config.match_input_resolution {
            let size = (orig_h, orig_w);
            let prediction =
                resize_antialias(prediction, size, config.resample_method_output, false);
            let prediction = normalize_normals(prediction, NORMALIZE_EPS); // [N,3,H,W]
            let uncertainty = uncertainty
                .map(|u| resize_antialias(u, size, config.resample_method_output, false)); // [N,1,H,W]
            (prediction, uncertainty)
        } else {
            (prediction, uncertainty)
        };

        let visualization: Option<Vec<RgbImage>> = config.output_visualization.then(|| {
            let [n, c, h, w] = prediction.dims();
            (0..n)
                .map(|i| {
                    let normals = slice_batch(&prediction, i..i + 1)
                        .reshape([c, h, w])
                        .permute([1, 2, 0]); // [H,W,3]
                    self.visualizer.visualize(normals, &config.visualization)
                })
                .collect()
        });

        Ok(NormalsOutput {
            prediction: OutputData::new(prediction, config.output_format),
            uncertainty: uncertainty.map(|u| OutputData::new(u, config.output_format)),
            visualization,
            latent,
        })
    }

    /// Encode images and create the initial prediction latent
    ///
    /// The image latent is repeated for every ensemble member:
    /// `[N, 3, H, W] -> ([N*E, C, h, w], [N*E, C, h, w])`.
    fn prepare_latent(
        &self,
        image: Tensor<B, 4>,
        input_latent: Option<Tensor<B, 4>>,
        seed: Option<u64>,
        ensemble_size: usize,
        batch_size: usize,
    ) -> (Tensor<B, 4>, Tensor<B, 4>) {
        let image_latent = self.vae.encode_batched(image, batch_size); // [N,4,h,w]
        let [n, c, h, w] = image_latent.dims();
        let image_latent = image_latent
            .unsqueeze_dim::<5>(1)
            .repeat_dim(1, ensemble_size)
            .reshape([n * ensemble_size, c, h, w]); // [N*E,4,h,w]

        let pred_latent = match input_latent {
            Some(latent) => latent.to_device(&self.device),
            None => NoiseSource::new(seed).sample(image_latent.dims(), &self.device),
        };

        (image_latent, pred_latent)
    }

    /// Decode clean latents into unit normals, in sub-batches of `batch_size`
    pub fn decode_prediction(&self, pred_latent: Tensor<B, 4>, batch_size: usize) -> Tensor<B, 4> {
        let decoded = self.vae.decode_batched(pred_latent, batch_size); // [B,3,H,W]
        decode_normals(decoded, self.config.use_full_z_range)
    }

    /// Encode a normal map into the model's latent space
    ///
    /// Inverse of [`decode_prediction`](Self::decode_prediction) up to the
    /// autoencoder's reconstruction error. With `check_input`, the map must
    /// hold finite unit vectors (and non-negative z in the half z-range
    /// convention).
    pub fn encode_prediction(&self, prediction: Tensor<B, 4>, check_input: bool) -> Result<Tensor<B, 4>> {
        let prediction =
            prepare_normals_for_encoding(prediction, self.config.use_full_z_range, check_input)?;
        Ok(self.vae.encode(prediction))
    }
}
