//! Denoising loop over batches of image latents

// step_idx indexes timestep_tensors AND is passed to scheduler.apply_step()
#![allow(clippy::needless_range_loop)]

use burn::prelude::*;
use burn_normals_samplers::SchedulerConfig;
use log::{debug, log_enabled, Level};

use crate::batch::{batch_seed, slice_batch, split_batch};
use crate::latent::Denoiser;
use crate::pipeline::tensor_stats;

/// Run the denoising loop for every row of `image_latent`
///
/// `image_latent` and `pred_latent` are `[N*E, C, h, w]`; rows are processed in
/// sub-batches of `batch_size`, each with a freshly built scheduler seeded
/// from `seed` and the sub-batch index. `text_embedding` is `[1, tokens, dim]`
/// and is repeated to the sub-batch size. Returns the clean latents in order.
#[allow(clippy::too_many_arguments)]
pub fn denoise_latents<B, U>(
    unet: &U,
    scheduler: &SchedulerConfig,
    image_latent: Tensor<B, 4>,
    pred_latent: Tensor<B, 4>,
    text_embedding: Tensor<B, 3>,
    num_inference_steps: usize,
    batch_size: usize,
    seed: Option<u64>,
) -> Tensor<B, 4>
where
    B: Backend,
    U: Denoiser<B> + ?Sized,
{
    assert_eq!(
        image_latent.dims(),
        pred_latent.dims(),
        "image and prediction latents must have the same shape"
    );
    let [total, ..] = image_latent.dims();
    let device = image_latent.device();

    let mut clean_latent = Vec::new();

    for (batch_idx, range) in split_batch(total, batch_size).into_iter().enumerate() {
        let batch_image_latent = slice_batch(&image_latent, range.clone()); // [B,4,h,w]
        let mut batch_pred_latent = slice_batch(&pred_latent, range.clone()); // [B,4,h,w]
        let batch_text_embedding = text_embedding.clone().repeat_dim(0, range.len()); // [B,2,1024]

        let mut sampler = scheduler.build::<B>(batch_seed(seed, batch_idx));
        sampler.set_steps(num_inference_steps);

        // Precompute all timestep tensors to avoid CPU->GPU transfer in hot loop
        let timestep_tensors: Vec<Tensor<B, 1>> = sampler
            .timesteps()
            .iter()
            .map(|&t| Tensor::<B, 1>::from_data(TensorData::new(vec![t as f32], [1]), &device))
            .collect();

        if log_enabled!(Level::Debug) {
            debug!(
                "batch {} (rows {:?}): timesteps {:?}, initial latent {}",
                batch_idx,
                range,
                sampler.timesteps(),
                tensor_stats(&batch_pred_latent)
            );
        }

        for step_idx in 0..timestep_tensors.len() {
            let t = timestep_tensors[step_idx].clone();

            let batch_latent =
                Tensor::cat(vec![batch_image_latent.clone(), batch_pred_latent.clone()], 1); // [B,8,h,w]
            let noise = unet.forward(batch_latent, t, batch_text_embedding.clone()); // [B,4,h,w]

            batch_pred_latent = sampler.apply_step(noise, step_idx, batch_pred_latent);
        }

        if log_enabled!(Level::Debug) {
            debug!("batch {}: clean latent {}", batch_idx, tensor_stats(&batch_pred_latent));
        }

        clean_latent.push(batch_pred_latent);
    }

    Tensor::cat(clean_latent, 0)
}
