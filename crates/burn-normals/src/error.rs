//! Error type for the normals pipeline

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum NormalsError {
    /// Unsupported element type or shape for an image or latent
    #[error("Invalid input: {0}")]
    InvalidInputKind(String),

    #[error("Invalid value for `{name}`: {reason}")]
    InvalidArgumentValue { name: &'static str, reason: String },

    #[error("Invalid argument combination: {0}")]
    InvalidArgumentCombination(String),

    #[error("Resizing {height}x{width} to max edge {max_edge} collapses an axis to zero")]
    DegenerateGeometry {
        height: usize,
        width: usize,
        max_edge: usize,
    },

    #[error("`num_inference_steps` is not given and the model has no default")]
    UnresolvedStepCount,

    #[error("`processing_resolution` is not given and the model has no default")]
    UnresolvedResolution,

    /// A normal map handed to `encode_prediction` failed validation
    #[error("Invalid normals: {0}")]
    InvalidNormals(String),
}

impl NormalsError {
    pub(crate) fn invalid_value(name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidArgumentValue {
            name,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, NormalsError>;
