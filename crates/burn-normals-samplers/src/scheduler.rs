//! Noise schedules and the scheduler interface
//!
//! This module provides the schedule utilities shared by the DDIM and LCM
//! schedulers, plus the [`Scheduler`] trait the denoising loop drives.

use burn::prelude::*;
use serde::{Deserialize, Serialize};

use crate::ddim::{DdimConfig, DdimScheduler};
use crate::lcm::{LcmConfig, LcmScheduler};

// ============================================================================
// Prediction Type (epsilon vs v-prediction)
// ============================================================================

/// Model prediction type
///
/// Different diffusion models are trained to predict different quantities:
/// - Epsilon (noise): SD 1.x, LCM-distilled models
/// - V-prediction (velocity): SD 2.x and its fine-tunes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionType {
    /// Model predicts the noise (epsilon) added to the sample
    Epsilon,
    /// Model predicts the velocity v = alpha_t * epsilon - sigma_t * x0
    #[default]
    VPrediction,
    /// Model predicts the original sample x0
    Sample,
}

/// Recover `(x0, epsilon)` from a model output
///
/// `alpha_prod_t` is ᾱₜ at the current timestep.
pub fn split_prediction<B: Backend>(
    model_output: Tensor<B, 4>,
    sample: Tensor<B, 4>,
    alpha_prod_t: f32,
    prediction_type: PredictionType,
) -> (Tensor<B, 4>, Tensor<B, 4>) {
    let sqrt_alpha = alpha_prod_t.sqrt();
    let sqrt_beta = (1.0 - alpha_prod_t).sqrt();

    match prediction_type {
        PredictionType::Epsilon => {
            // x0 = (x - sqrt(1-ᾱ) * eps) / sqrt(ᾱ)
            let x0 = (sample - model_output.clone() * sqrt_beta) / sqrt_alpha;
            (x0, model_output)
        }
        PredictionType::Sample => {
            // eps = (x - sqrt(ᾱ) * x0) / sqrt(1-ᾱ)
            let eps = (sample - model_output.clone() * sqrt_alpha) / sqrt_beta;
            (model_output, eps)
        }
        PredictionType::VPrediction => {
            // x0 = sqrt(ᾱ) * x - sqrt(1-ᾱ) * v
            // eps = sqrt(ᾱ) * v + sqrt(1-ᾱ) * x
            let x0 = sample.clone() * sqrt_alpha - model_output.clone() * sqrt_beta;
            let eps = model_output * sqrt_alpha + sample * sqrt_beta;
            (x0, eps)
        }
    }
}

// ============================================================================
// Schedule Configuration
// ============================================================================

/// Beta spacing over the training timesteps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BetaSchedule {
    /// Betas evenly spaced between `beta_start` and `beta_end`
    Linear,
    /// Square roots of the betas evenly spaced (latent diffusion default)
    #[default]
    ScaledLinear,
}

/// How inference timesteps are picked from the training range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestepSpacing {
    /// `i * ratio + offset`, starting near zero
    Leading,
    /// Counted back from the last training step; always includes it
    #[default]
    Trailing,
}

/// Noise schedule configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Number of training timesteps
    pub num_train_steps: usize,
    pub beta_start: f64,
    pub beta_end: f64,
    pub beta_schedule: BetaSchedule,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            num_train_steps: 1000,
            beta_start: 0.00085,
            beta_end: 0.012,
            beta_schedule: BetaSchedule::ScaledLinear,
        }
    }
}

/// Precomputed noise schedule values
#[derive(Debug, Clone)]
pub struct NoiseSchedule {
    /// Cumulative product of alphas: ᾱₜ
    pub alphas_cumprod: Vec<f32>,
    /// Number of training steps
    pub num_train_steps: usize,
}

impl NoiseSchedule {
    /// Build the schedule described by `config`
    pub fn new(config: &ScheduleConfig) -> Self {
        match config.beta_schedule {
            BetaSchedule::Linear => {
                Self::linear(config.num_train_steps, config.beta_start, config.beta_end)
            }
            BetaSchedule::ScaledLinear => {
                Self::scaled_linear(config.num_train_steps, config.beta_start, config.beta_end)
            }
        }
    }

    /// Create a linear beta schedule
    pub fn linear(num_steps: usize, beta_start: f64, beta_end: f64) -> Self {
        let betas = linspace(beta_start, beta_end, num_steps);
        Self::from_betas(&betas)
    }

    /// Create a scaled-linear beta schedule
    pub fn scaled_linear(num_steps: usize, beta_start: f64, beta_end: f64) -> Self {
        let betas: Vec<f64> = linspace(beta_start.sqrt(), beta_end.sqrt(), num_steps)
            .into_iter()
            .map(|b| b * b)
            .collect();
        Self::from_betas(&betas)
    }

    fn from_betas(betas: &[f64]) -> Self {
        // Cumulative product
        let mut alphas_cumprod = Vec::with_capacity(betas.len());
        let mut cumprod = 1.0f64;
        for beta in betas {
            cumprod *= 1.0 - beta;
            alphas_cumprod.push(cumprod as f32);
        }

        Self {
            alphas_cumprod,
            num_train_steps: betas.len(),
        }
    }

    /// Get alpha_cumprod at a specific timestep
    pub fn alpha_cumprod_at(&self, t: usize) -> f32 {
        self.alphas_cumprod[t]
    }

    /// ᾱ used past the last timestep
    pub fn final_alpha_cumprod(&self, set_alpha_to_one: bool) -> f32 {
        if set_alpha_to_one {
            1.0
        } else {
            self.alphas_cumprod[0]
        }
    }
}

fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    if n == 1 {
        return vec![start];
    }
    (0..n)
        .map(|i| start + (end - start) * i as f64 / (n - 1) as f64)
        .collect()
}

/// Generate the inference timestep sequence, highest noise first
pub fn inference_timesteps(
    num_inference_steps: usize,
    num_train_steps: usize,
    spacing: TimestepSpacing,
    steps_offset: usize,
) -> Vec<usize> {
    match spacing {
        TimestepSpacing::Leading => {
            let step_ratio = num_train_steps / num_inference_steps;
            (0..num_inference_steps)
                .rev()
                .map(|i| (i * step_ratio + steps_offset).min(num_train_steps - 1))
                .collect()
        }
        TimestepSpacing::Trailing => {
            let step_ratio = num_train_steps as f64 / num_inference_steps as f64;
            (0..num_inference_steps)
                .map(|i| {
                    let t = (num_train_steps as f64 - i as f64 * step_ratio).round() as usize;
                    t.saturating_sub(1)
                })
                .collect()
        }
    }
}

// ============================================================================
// Scheduler interface
// ============================================================================

/// Step-update rule driven by the denoising loop
///
/// A scheduler owns a timestep cursor: `set_steps` resets it, and
/// `apply_step` must be called with step indices `0..timesteps().len()` in
/// order. Instances are not shared between independently running batches.
pub trait Scheduler<B: Backend> {
    /// Reset the timestep list for `num_inference_steps` steps
    fn set_steps(&mut self, num_inference_steps: usize);

    /// Timesteps of the current run, highest noise first
    fn timesteps(&self) -> &[usize];

    /// Advance `sample` by one step given the model output at `step_index`
    fn apply_step(
        &mut self,
        model_output: Tensor<B, 4>,
        step_index: usize,
        sample: Tensor<B, 4>,
    ) -> Tensor<B, 4>;
}

/// Scheduler variant, chosen when the pipeline is constructed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SchedulerConfig {
    Ddim(DdimConfig),
    Lcm(LcmConfig),
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::Ddim(DdimConfig::default())
    }
}

impl SchedulerConfig {
    /// Build a fresh scheduler instance
    ///
    /// `seed` feeds the scheduler's own noise stream (DDIM with eta > 0, LCM).
    pub fn build<B: Backend>(&self, seed: Option<u64>) -> Box<dyn Scheduler<B>> {
        match self {
            Self::Ddim(config) => Box::new(DdimScheduler::new(config.clone(), seed)),
            Self::Lcm(config) => Box::new(LcmScheduler::new(config.clone(), seed)),
        }
    }
}
