//! DDIM (Denoising Diffusion Implicit Models) Scheduler
//!
//! Implements deterministic sampling for faster inference.

use burn::prelude::*;
use serde::{Deserialize, Serialize};

use crate::noise::NoiseSource;
use crate::scheduler::{
    inference_timesteps, split_prediction, NoiseSchedule, PredictionType, ScheduleConfig,
    Scheduler, TimestepSpacing,
};

/// DDIM scheduler configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DdimConfig {
    /// Eta parameter (0.0 = deterministic DDIM, 1.0 = DDPM)
    pub eta: f64,
    pub prediction_type: PredictionType,
    pub timestep_spacing: TimestepSpacing,
    /// Added to every timestep with leading spacing
    pub steps_offset: usize,
    /// Use ᾱ = 1 past the last step instead of ᾱ₀
    pub set_alpha_to_one: bool,
    /// Clamp the predicted x0 to [-1, 1]
    pub clip_sample: bool,
    pub schedule: ScheduleConfig,
}

impl Default for DdimConfig {
    fn default() -> Self {
        Self {
            eta: 0.0,
            prediction_type: PredictionType::VPrediction,
            timestep_spacing: TimestepSpacing::Trailing,
            steps_offset: 0,
            set_alpha_to_one: false,
            clip_sample: false,
            schedule: ScheduleConfig::default(),
        }
    }
}

/// DDIM Scheduler
///
/// Denoising Diffusion Implicit Models enable deterministic sampling
/// with fewer steps than DDPM.
pub struct DdimScheduler {
    /// Noise schedule
    schedule: NoiseSchedule,
    /// Scheduler configuration
    config: DdimConfig,
    /// Timestep indices for sampling
    timesteps: Vec<usize>,
    /// Training steps between two inference steps
    step_ratio: usize,
    noise: NoiseSource,
}

impl DdimScheduler {
    /// Create a new DDIM scheduler; call `set_steps` before stepping
    pub fn new(config: DdimConfig, seed: Option<u64>) -> Self {
        Self {
            schedule: NoiseSchedule::new(&config.schedule),
            config,
            timesteps: Vec::new(),
            step_ratio: 0,
            noise: NoiseSource::new(seed),
        }
    }

    /// ᾱ at the timestep one inference step below `t`
    fn alpha_prod_prev(&self, t: usize) -> f32 {
        match t.checked_sub(self.step_ratio) {
            Some(prev) => self.schedule.alpha_cumprod_at(prev),
            None => self
                .schedule
                .final_alpha_cumprod(self.config.set_alpha_to_one),
        }
    }
}

impl<B: Backend> Scheduler<B> for DdimScheduler {
    fn set_steps(&mut self, num_inference_steps: usize) {
        let num_train_steps = self.schedule.num_train_steps;
        self.step_ratio = num_train_steps / num_inference_steps;
        self.timesteps = inference_timesteps(
            num_inference_steps,
            num_train_steps,
            self.config.timestep_spacing,
            self.config.steps_offset,
        );
    }

    fn timesteps(&self) -> &[usize] {
        &self.timesteps
    }

    /// Perform one DDIM step
    ///
    /// # Arguments
    /// * `model_output` - Model prediction [batch, channels, height, width]
    /// * `step_index` - Current step index (0 = highest noise)
    /// * `sample` - Current noisy latent [batch, channels, height, width]
    fn apply_step(
        &mut self,
        model_output: Tensor<B, 4>,
        step_index: usize,
        sample: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let t = self.timesteps[step_index];

        let alpha_prod_t = self.schedule.alpha_cumprod_at(t);
        let alpha_prod_prev = self.alpha_prod_prev(t);

        let (pred_x0, pred_eps) =
            split_prediction(model_output, sample.clone(), alpha_prod_t, self.config.prediction_type);

        let pred_x0 = if self.config.clip_sample {
            pred_x0.clamp(-1.0, 1.0)
        } else {
            pred_x0
        };

        // σₜ = η · sqrt((1-ᾱₜ₋₁)/(1-ᾱₜ)) · sqrt(1 - ᾱₜ/ᾱₜ₋₁)
        let variance = (1.0 - alpha_prod_prev) / (1.0 - alpha_prod_t)
            * (1.0 - alpha_prod_t / alpha_prod_prev);
        let std_dev = self.config.eta as f32 * variance.max(0.0).sqrt();

        // Direction pointing to x_t
        let dir_coeff = (1.0 - alpha_prod_prev - std_dev * std_dev).max(0.0).sqrt();
        let prev_sample = pred_x0 * alpha_prod_prev.sqrt() + pred_eps * dir_coeff;

        if self.config.eta > 0.0 {
            let noise = self.noise.sample::<B>(sample.dims(), &sample.device());
            prev_sample + noise * std_dev
        } else {
            prev_sample
        }
    }
}
