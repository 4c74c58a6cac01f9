//! Ensembling of several normal predictions for one image

use std::f32::consts::PI;
use std::fmt;
use std::str::FromStr;

use burn::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{NormalsError, Result};
use crate::normals::{normalize_normals, NORMALIZE_EPS};

/// Per-pixel reduction over ensemble members
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnsembleReduction {
    /// Member whose vector is most aligned with the mean direction
    #[default]
    Closest,
    /// Renormalized mean vector
    Mean,
}

impl fmt::Display for EnsembleReduction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closest => f.write_str("closest"),
            Self::Mean => f.write_str("mean"),
        }
    }
}

impl FromStr for EnsembleReduction {
    type Err = NormalsError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "closest" => Ok(Self::Closest),
            "mean" => Ok(Self::Mean),
            other => Err(NormalsError::invalid_value(
                "reduction",
                format!("`{other}`; expected closest or mean"),
            )),
        }
    }
}

/// Fuse `[E, 3, H, W]` unit normals into one `[1, 3, H, W]` map
///
/// The uncertainty, when requested, is the mean angle between each member and
/// the mean direction, divided by π so it lies in `[0, 1]`. A single member is
/// returned unchanged, without uncertainty.
pub fn ensemble_normals<B: Backend>(
    normals: Tensor<B, 4>,
    output_uncertainty: bool,
    reduction: EnsembleReduction,
) -> (Tensor<B, 4>, Option<Tensor<B, 4>>) {
    let [ensemble_size, channels, _, _] = normals.dims();
    assert_eq!(channels, 3, "normals must have 3 channels");
    if ensemble_size == 1 {
        return (normals, None);
    }

    let mean_normals = normalize_normals(normals.clone().mean_dim(0), NORMALIZE_EPS); // [1,3,H,W]
    let sim_cos = (mean_normals.clone() * normals.clone()).sum_dim(1); // [E,1,H,W]

    let uncertainty = output_uncertainty
        .then(|| arccos(sim_cos.clone()).mean_dim(0) / PI); // [1,1,H,W]

    let fused = match reduction {
        EnsembleReduction::Mean => mean_normals,
        EnsembleReduction::Closest => {
            let closest = sim_cos.argmax(0).repeat_dim(1, 3); // [1,3,H,W]
            normals.gather(0, closest)
        }
    };

    (fused, uncertainty)
}

/// Elementwise arccos, with inputs clamped into the domain
fn arccos<B: Backend>(tensor: Tensor<B, 4>) -> Tensor<B, 4> {
    let shape = tensor.dims();
    let device = tensor.device();
    let angles: Vec<f32> = tensor
        .into_data()
        .iter::<f32>()
        .map(|c| c.clamp(-1.0, 1.0).acos())
        .collect();
    Tensor::from_data(TensorData::new(angles, shape), &device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    /// `[E, 3, 1, 1]` tensor from one vector per member
    fn members(vectors: &[[f32; 3]]) -> Tensor<TestBackend, 4> {
        let values = vectors.iter().flatten().copied().collect::<Vec<_>>();
        Tensor::from_data(
            TensorData::new(values, [vectors.len(), 3, 1, 1]),
            &Default::default(),
        )
    }

    fn values(t: Tensor<TestBackend, 4>) -> Vec<f32> {
        t.into_data().iter::<f32>().collect()
    }

    fn norms(t: Tensor<TestBackend, 4>) -> Vec<f32> {
        values(t.powi_scalar(2).sum_dim(1).sqrt())
    }

    #[test]
    fn test_single_member_passthrough() {
        let input = members(&[[0.6, 0.0, 0.8]]);
        let (fused, uncertainty) = ensemble_normals(input.clone(), true, EnsembleReduction::Closest);
        assert_eq!(values(fused), values(input));
        assert!(uncertainty.is_none());
    }

    #[test]
    fn test_antipodal_member() {
        let input = members(&[[0.0, 0.0, 1.0], [0.0, 0.0, 1.0], [0.0, 0.0, -1.0]]);

        let (closest, uncertainty) =
            ensemble_normals(input.clone(), true, EnsembleReduction::Closest);
        assert_eq!(values(closest), vec![0.0, 0.0, 1.0]);
        let uncertainty = values(uncertainty.unwrap());
        assert!((uncertainty[0] - 1.0 / 3.0).abs() < 1e-5);

        let (mean, _) = ensemble_normals(input, false, EnsembleReduction::Mean);
        let mean = values(mean);
        assert!((mean[2] - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_closest_picks_member() {
        let s = std::f32::consts::FRAC_1_SQRT_2;
        let input = members(&[[1.0, 0.0, 0.0], [s, 0.0, s], [0.0, 0.0, 1.0]]);
        let (closest, _) = ensemble_normals(input.clone(), false, EnsembleReduction::Closest);
        assert_eq!(values(closest), vec![s, 0.0, s]);

        let (mean, _) = ensemble_normals(input, false, EnsembleReduction::Mean);
        for n in norms(mean) {
            assert!((n - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn test_unit_length_and_uncertainty_range() {
        let device = Default::default();
        let input = normalize_normals(
            Tensor::<TestBackend, 4>::random(
                [5, 3, 6, 7],
                burn::tensor::Distribution::Uniform(-1.0, 1.0),
                &device,
            ),
            NORMALIZE_EPS,
        );

        for reduction in [EnsembleReduction::Closest, EnsembleReduction::Mean] {
            let (fused, uncertainty) = ensemble_normals(input.clone(), true, reduction);
            assert_eq!(fused.dims(), [1, 3, 6, 7]);
            for n in norms(fused) {
                assert!((n - 1.0).abs() < 1e-4, "{reduction}: {n}");
            }

            let uncertainty = uncertainty.unwrap();
            assert_eq!(uncertainty.dims(), [1, 1, 6, 7]);
            assert!(values(uncertainty).iter().all(|u| (0.0..=1.0).contains(u)));
        }
    }

    #[test]
    fn test_parse_reduction() {
        assert_eq!("mean".parse::<EnsembleReduction>().unwrap(), EnsembleReduction::Mean);
        assert!(matches!(
            "median".parse::<EnsembleReduction>(),
            Err(NormalsError::InvalidArgumentValue { .. })
        ));
    }
}
