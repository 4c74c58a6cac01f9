//! burn-normals: Surface Normal Estimation in Pure Rust
//!
//! Marigold-style monocular surface normal estimation built on the Burn deep
//! learning framework. A latent diffusion model is conditioned on an image and
//! denoised into a per-pixel normal map, optionally ensembled over several
//! noise draws with an uncertainty estimate.
//!
//! The network weights are not part of this crate: plug in an autoencoder,
//! denoiser and text encoder through [`LatentAutoencoder`], [`Denoiser`] and
//! [`TextEncoder`].
//!
//! # Backend Selection
//!
//! Choose a backend via feature flags:
//! - `ndarray`: CPU backend (no GPU required, default)
//! - `tch`: PyTorch backend via libtorch (CUDA, MPS support)
//! - `wgpu`: WebGPU backend (cross-platform GPU)
//! - `cuda`: Native CUDA backend (NVIDIA only)
//!
//! # Example
//!
//! ```ignore
//! use burn_normals::{MarigoldConfig, MarigoldNormalsPipeline, PredictConfig};
//!
//! let device = burn_normals::backends::default_device();
//! let pipeline = MarigoldNormalsPipeline::new(vae, unet, text_encoder, MarigoldConfig::normals_v0_1(), &device);
//!
//! let image = image::open("room.jpg")?;
//! let output = pipeline.predict(image, &PredictConfig::default(), None)?;
//! output.visualization.unwrap()[0].save("room_normals.png")?;
//! ```

pub mod backends;
pub mod batch;
pub mod canonical;
pub mod denoise;
pub mod ensemble;
pub mod error;
pub mod latent;
pub mod normals;
pub mod pipeline;
pub mod resize;
pub mod visualize;

pub use burn_normals_samplers as samplers;

pub use canonical::{load_image_canonical, normalize_image_range, ImageInput};
pub use denoise::denoise_latents;
pub use ensemble::{ensemble_normals, EnsembleReduction};
pub use error::{NormalsError, Result};
pub use latent::{Denoiser, LatentAutoencoder, TextEncoder, SD_LATENT_SCALING};
pub use normals::{decode_normals, normalize_normals, prepare_normals_for_encoding};
pub use pipeline::{
    MarigoldConfig, MarigoldNormalsPipeline, NormalsOutput, OutputData, OutputFormat, PredictConfig,
};
pub use resize::{pad_image, resize_antialias, resize_to_max_edge, unpad_image, Padding, ResampleMethod};
pub use visualize::{NormalsColorizer, NormalsVisualizer, VisualizationConfig};
