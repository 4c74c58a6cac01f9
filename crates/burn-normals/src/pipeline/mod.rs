//! Normals pipeline configuration, outputs and implementation

mod marigold;

pub use marigold::MarigoldNormalsPipeline;

use burn::prelude::*;
use burn_normals_samplers::{DdimConfig, LcmConfig, PredictionType, SchedulerConfig};
use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::ensemble::EnsembleReduction;
use crate::resize::ResampleMethod;
use crate::visualize::VisualizationConfig;

/// Model-level configuration shipped with a checkpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarigoldConfig {
    /// Steps used when a call does not set `num_inference_steps`
    pub default_denoising_steps: Option<usize>,
    /// Resolution used when a call does not set `processing_resolution`
    pub default_processing_resolution: Option<usize>,
    /// Whether the model predicts z over `[-1, 1]` rather than `[0, 1]`
    pub use_full_z_range: bool,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

impl Default for MarigoldConfig {
    fn default() -> Self {
        Self {
            default_denoising_steps: None,
            default_processing_resolution: None,
            use_full_z_range: true,
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl MarigoldConfig {
    /// Marigold normals v0.1 (DDIM, 10 steps at 768 px)
    pub fn normals_v0_1() -> Self {
        Self {
            default_denoising_steps: Some(10),
            default_processing_resolution: Some(768),
            use_full_z_range: true,
            scheduler: SchedulerConfig::Ddim(DdimConfig::default()),
        }
    }

    /// Marigold normals LCM v0.1 (4 consistency steps at 768 px)
    pub fn normals_lcm_v0_1() -> Self {
        Self {
            default_denoising_steps: Some(4),
            default_processing_resolution: Some(768),
            use_full_z_range: true,
            scheduler: SchedulerConfig::Lcm(LcmConfig {
                prediction_type: PredictionType::VPrediction,
                ..Default::default()
            }),
        }
    }
}

/// Container type for `prediction` and `uncertainty`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// Host [`TensorData`]
    #[default]
    Array,
    /// Backend tensor on the pipeline device
    Tensor,
}

/// Call-level options of [`MarigoldNormalsPipeline::predict`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictConfig {
    /// Denoising steps; `None` uses the model default
    pub num_inference_steps: Option<usize>,
    /// Predictions per image; 1 disables ensembling
    pub ensemble_size: usize,
    /// Longer edge during processing; 0 keeps the native size, `None` uses the
    /// model default
    pub processing_resolution: Option<usize>,
    /// Resize the output back to the input size
    pub match_input_resolution: bool,
    pub resample_method_input: ResampleMethod,
    pub resample_method_output: ResampleMethod,
    pub batch_size: usize,
    /// Validate the input range of float images
    pub check_input: bool,
    pub ensemble: EnsembleReduction,
    /// Seed for the initial noise and scheduler noise. Incompatible with an
    /// input latent.
    pub seed: Option<u64>,
    pub output_format: OutputFormat,
    pub output_visualization: bool,
    pub visualization: VisualizationConfig,
    /// Return the ensemble uncertainty (only when `ensemble_size > 1`)
    pub output_uncertainty: bool,
    /// Return the clean latents, `[N*E, C, h, w]`
    pub output_latent: bool,
}

impl Default for PredictConfig {
    fn default() -> Self {
        Self {
            num_inference_steps: None,
            ensemble_size: 1,
            processing_resolution: None,
            match_input_resolution: true,
            resample_method_input: ResampleMethod::Bilinear,
            resample_method_output: ResampleMethod::Bilinear,
            batch_size: 1,
            check_input: true,
            ensemble: EnsembleReduction::Closest,
            seed: None,
            output_format: OutputFormat::Array,
            output_visualization: true,
            visualization: VisualizationConfig::default(),
            output_uncertainty: true,
            output_latent: false,
        }
    }
}

/// A `[N, C, H, W]` result in the requested [`OutputFormat`]
#[derive(Debug, Clone)]
pub enum OutputData<B: Backend> {
    Array(TensorData),
    Tensor(Tensor<B, 4>),
}

impl<B: Backend> OutputData<B> {
    pub(crate) fn new(tensor: Tensor<B, 4>, format: OutputFormat) -> Self {
        match format {
            OutputFormat::Array => Self::Array(tensor.into_data()),
            OutputFormat::Tensor => Self::Tensor(tensor),
        }
    }

    pub fn shape(&self) -> Vec<usize> {
        match self {
            Self::Array(data) => data.shape.clone(),
            Self::Tensor(tensor) => tensor.dims().to_vec(),
        }
    }

    /// Host copy of the values
    pub fn into_data(self) -> TensorData {
        match self {
            Self::Array(data) => data,
            Self::Tensor(tensor) => tensor.into_data(),
        }
    }

    pub fn into_tensor(self, device: &B::Device) -> Tensor<B, 4> {
        match self {
            Self::Array(data) => Tensor::from_data(data, device),
            Self::Tensor(tensor) => tensor,
        }
    }
}

/// Result of one prediction call
#[derive(Debug, Clone)]
pub struct NormalsOutput<B: Backend> {
    /// Unit normals, `[N, 3, H, W]`, components in `[-1, 1]`
    pub prediction: OutputData<B>,
    /// Ensemble disagreement in `[0, 1]`, `[N, 1, H, W]`
    pub uncertainty: Option<OutputData<B>>,
    pub visualization: Option<Vec<RgbImage>>,
    /// Clean latents of every ensemble member, `[N*E, C, h, w]`
    pub latent: Option<Tensor<B, 4>>,
}

/// Helper to compute tensor statistics for debugging
pub(crate) fn tensor_stats<B: Backend, const D: usize>(tensor: &Tensor<B, D>) -> String {
    let floats: Vec<f32> = tensor.clone().into_data().iter::<f32>().collect();

    if floats.is_empty() {
        return "empty".to_string();
    }

    let nan_count = floats.iter().filter(|x| x.is_nan()).count();
    let inf_count = floats.iter().filter(|x| x.is_infinite()).count();
    let min = floats.iter().cloned().fold(f32::INFINITY, f32::min);
    let max = floats.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let mean = floats.iter().sum::<f32>() / floats.len() as f32;
    let var = floats.iter().map(|x| (x - mean).powi(2)).sum::<f32>() / floats.len() as f32;

    if nan_count > 0 || inf_count > 0 {
        format!(
            "min={:.4}, max={:.4}, mean={:.4}, std={:.4} [NaN={}, Inf={}]",
            min,
            max,
            mean,
            var.sqrt(),
            nan_count,
            inf_count
        )
    } else {
        format!(
            "min={:.4}, max={:.4}, mean={:.4}, std={:.4}",
            min,
            max,
            mean,
            var.sqrt()
        )
    }
}
