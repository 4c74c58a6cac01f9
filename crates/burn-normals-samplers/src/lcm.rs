//! LCM (Latent Consistency Model) scheduler
//!
//! A distillation-based scheduler that produces usable predictions
//! in very few steps (1-8 steps typically).

use burn::prelude::*;
use serde::{Deserialize, Serialize};

use crate::noise::NoiseSource;
use crate::scheduler::{split_prediction, NoiseSchedule, PredictionType, ScheduleConfig, Scheduler};

/// σ_data of the consistency boundary condition
const SIGMA_DATA: f32 = 0.5;

/// Configuration for LCM scheduler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LcmConfig {
    /// Step count of the grid the model was distilled on
    pub original_inference_steps: usize,
    pub prediction_type: PredictionType,
    /// Multiplier applied to the timestep in the boundary scalings
    pub timestep_scaling: f32,
    pub schedule: ScheduleConfig,
}

impl Default for LcmConfig {
    fn default() -> Self {
        Self {
            original_inference_steps: 50,
            prediction_type: PredictionType::Epsilon,
            timestep_scaling: 10.0,
            schedule: ScheduleConfig::default(),
        }
    }
}

/// LCM Scheduler
///
/// Latent Consistency Models use a consistency distillation approach
/// to jump straight to a clean estimate, then re-noise to the next timestep.
pub struct LcmScheduler {
    schedule: NoiseSchedule,
    config: LcmConfig,
    /// Timestep indices for sampling
    timesteps: Vec<usize>,
    noise: NoiseSource,
}

impl LcmScheduler {
    /// Create a new LCM scheduler; call `set_steps` before stepping
    pub fn new(config: LcmConfig, seed: Option<u64>) -> Self {
        Self {
            schedule: NoiseSchedule::new(&config.schedule),
            config,
            timesteps: Vec::new(),
            noise: NoiseSource::new(seed),
        }
    }

    /// Computes timestep indices for LCM sampling
    ///
    /// Timesteps are taken from the distillation grid, highest first, at grid
    /// positions `floor(k * origin_steps / n)` for `k in 0..n`. Step counts
    /// above the grid size use the whole grid once.
    fn compute_timesteps(&self, num_inference_steps: usize) -> Vec<usize> {
        let num_train_steps = self.schedule.num_train_steps;
        let origin_steps = self.config.original_inference_steps.max(1);
        let c = num_train_steps / origin_steps;

        let grid: Vec<usize> = (1..=origin_steps)
            .rev()
            .map(|i| (i * c).saturating_sub(1).min(num_train_steps - 1))
            .collect();

        let n = num_inference_steps.clamp(1, origin_steps);
        (0..n).map(|k| grid[k * origin_steps / n]).collect()
    }

    /// `(c_skip, c_out)` of the consistency boundary condition
    fn boundary_scalings(&self, timestep: usize) -> (f32, f32) {
        let scaled = timestep as f32 * self.config.timestep_scaling;
        let denom = scaled * scaled + SIGMA_DATA * SIGMA_DATA;
        let c_skip = SIGMA_DATA * SIGMA_DATA / denom;
        let c_out = scaled / denom.sqrt();
        (c_skip, c_out)
    }
}

impl<B: Backend> Scheduler<B> for LcmScheduler {
    fn set_steps(&mut self, num_inference_steps: usize) {
        self.timesteps = self.compute_timesteps(num_inference_steps);
    }

    fn timesteps(&self) -> &[usize] {
        &self.timesteps
    }

    /// Perform one LCM step
    fn apply_step(
        &mut self,
        model_output: Tensor<B, 4>,
        step_index: usize,
        sample: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let timestep = self.timesteps[step_index];
        let alpha_prod_t = self.schedule.alpha_cumprod_at(timestep);

        let (pred_original, _) = split_prediction(
            model_output,
            sample.clone(),
            alpha_prod_t,
            self.config.prediction_type,
        );

        let (c_skip, c_out) = self.boundary_scalings(timestep);
        let denoised = pred_original * c_out + sample.clone() * c_skip;

        // If this is the last step, return the prediction
        let Some(&next_timestep) = self.timesteps.get(step_index + 1) else {
            return denoised;
        };

        // x_{t-1} = sqrt(ᾱ_{t-1}) * x_0 + sqrt(1 - ᾱ_{t-1}) * z
        let alpha_prod_next = self.schedule.alpha_cumprod_at(next_timestep);
        let noise = self.noise.sample::<B>(sample.dims(), &sample.device());
        denoised * alpha_prod_next.sqrt() + noise * (1.0 - alpha_prod_next).sqrt()
    }
}
