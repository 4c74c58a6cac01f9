//! Model collaborators and the latent bridge
//!
//! The pipeline does not own network weights. It drives three capabilities:
//! an autoencoder mapping pixels to latents and back, a denoiser predicting
//! the next latent update, and a text encoder for the conditioning embedding.

use burn::prelude::*;

use crate::batch::map_batched;

/// Scaling factor of the SD 2.x autoencoder the Marigold checkpoints ship with
pub const SD_LATENT_SCALING: f32 = 0.18215;

/// Pixel ↔ latent autoencoder
///
/// Implementors provide the raw network passes; the bridge methods apply the
/// scaling factor and drop the variance half of the posterior.
pub trait LatentAutoencoder<B: Backend> {
    /// Channels of one latent (half of the encoder's moment channels)
    fn latent_channels(&self) -> usize;

    /// Multiplier applied after encoding and divided out before decoding
    fn scaling_factor(&self) -> f32 {
        SD_LATENT_SCALING
    }

    /// Spatial reduction between pixel and latent space
    fn spatial_scale(&self) -> usize {
        8
    }

    /// Posterior moments: `[N, 3, H, W] -> [N, 2 * latent_channels, H/s, W/s]`,
    /// mean first, then log-variance
    fn encode_moments(&self, image: Tensor<B, 4>) -> Tensor<B, 4>;

    /// Decoder pass on an unscaled latent: `[N, C, h, w] -> [N, 3, h*s, w*s]`
    fn decode_raw(&self, latent: Tensor<B, 4>) -> Tensor<B, 4>;

    /// Encode to the posterior mean times the scaling factor
    fn encode(&self, image: Tensor<B, 4>) -> Tensor<B, 4> {
        let [_, channels, _, _] = image.dims();
        assert_eq!(channels, 3, "encoder expects 3-channel images");

        let moments = self.encode_moments(image);
        let [n, c, h, w] = moments.dims();
        let latent_channels = self.latent_channels();
        assert_eq!(c, 2 * latent_channels, "encoder returned {c} moment channels");

        moments.slice([0..n, 0..latent_channels, 0..h, 0..w]) * self.scaling_factor()
    }

    /// Divide out the scaling factor and decode
    fn decode(&self, latent: Tensor<B, 4>) -> Tensor<B, 4> {
        let [_, channels, _, _] = latent.dims();
        assert_eq!(channels, self.latent_channels(), "unexpected latent channels");

        self.decode_raw(latent / self.scaling_factor())
    }

    /// [`encode`](Self::encode) in sub-batches of `batch_size`
    fn encode_batched(&self, image: Tensor<B, 4>, batch_size: usize) -> Tensor<B, 4> {
        map_batched(image, batch_size, |chunk| self.encode(chunk))
    }

    /// [`decode`](Self::decode) in sub-batches of `batch_size`
    fn decode_batched(&self, latent: Tensor<B, 4>, batch_size: usize) -> Tensor<B, 4> {
        map_batched(latent, batch_size, |chunk| self.decode(chunk))
    }
}

/// Conditional denoising network
pub trait Denoiser<B: Backend> {
    /// Predict the model output for a latent pair
    ///
    /// * `latent_pair` - image latent and prediction latent concatenated on
    ///   channels, `[B, 2C, h, w]`
    /// * `timestep` - current timestep, shape `[1]`
    /// * `context` - conditioning embedding `[B, tokens, dim]`
    fn forward(
        &self,
        latent_pair: Tensor<B, 4>,
        timestep: Tensor<B, 1>,
        context: Tensor<B, 3>,
    ) -> Tensor<B, 4>;
}

/// Prompt encoder producing `[1, tokens, dim]` embeddings
pub trait TextEncoder<B: Backend> {
    fn encode_text(&self, prompt: &str) -> Tensor<B, 3>;
}
