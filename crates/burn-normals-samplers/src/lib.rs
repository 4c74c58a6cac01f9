pub mod scheduler;
pub mod noise;
pub mod ddim;
pub mod lcm;

pub use scheduler::{
    NoiseSchedule, ScheduleConfig, BetaSchedule, PredictionType, TimestepSpacing,
    Scheduler, SchedulerConfig, inference_timesteps, split_prediction,
};
pub use noise::NoiseSource;
pub use ddim::{DdimScheduler, DdimConfig};
pub use lcm::{LcmScheduler, LcmConfig};
