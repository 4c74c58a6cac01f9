//! Normal map reconstruction and validation
//!
//! The model works with all three components in `[-1, 1]`. In the half
//! z-range convention the z component of a stored normal lives in `[0, 1]`
//! instead, facing the camera.

use burn::prelude::*;

use crate::error::{NormalsError, Result};

/// Norm floor used when rescaling vectors to unit length
pub const NORMALIZE_EPS: f32 = 1e-6;

/// Allowed deviation of `‖v‖²` from 1 when validating normals
pub const UNIT_NORM_TOLERANCE: f32 = 1e-3;

/// Rescale every pixel's 3-vector to unit length
///
/// Norms are floored at `eps`, so zero vectors stay zero.
pub fn normalize_normals<B: Backend>(normals: Tensor<B, 4>, eps: f32) -> Tensor<B, 4> {
    let norm = normals.clone().powi_scalar(2).sum_dim(1).sqrt().clamp_min(eps);
    normals / norm
}

/// Apply `f` to the z channel of a `[N, 3, H, W]` tensor
fn map_z<B: Backend>(normals: Tensor<B, 4>, f: impl FnOnce(Tensor<B, 4>) -> Tensor<B, 4>) -> Tensor<B, 4> {
    let [n, c, h, w] = normals.dims();
    let xy = normals.clone().slice([0..n, 0..2, 0..h, 0..w]);
    let z = normals.slice([0..n, 2..c, 0..h, 0..w]);
    Tensor::cat(vec![xy, f(z)], 1)
}

/// Turn a decoded `[N, 3, H, W]` tensor into unit normals
///
/// Clips to `[-1, 1]`, moves z into `[0, 1]` unless `use_full_z_range`, then
/// normalizes.
pub fn decode_normals<B: Backend>(decoded: Tensor<B, 4>, use_full_z_range: bool) -> Tensor<B, 4> {
    let [_, channels, _, _] = decoded.dims();
    assert_eq!(channels, 3, "decoder must return 3 channels");

    let normals = decoded.clamp(-1.0, 1.0);
    let normals = if use_full_z_range {
        normals
    } else {
        map_z(normals, |z| z * 0.5 + 0.5)
    };

    normalize_normals(normals, NORMALIZE_EPS)
}

/// Map stored normals back into the model's symmetric range for encoding
///
/// With `check_input`, rejects NaN, non-finite values, vectors that are not
/// unit length and (in the half z-range convention) negative z.
pub fn prepare_normals_for_encoding<B: Backend>(
    normals: Tensor<B, 4>,
    use_full_z_range: bool,
    check_input: bool,
) -> Result<Tensor<B, 4>> {
    let [_, channels, _, _] = normals.dims();
    if channels != 3 {
        return Err(NormalsError::InvalidInputKind(format!(
            "normals must have 3 channels, got {:?}",
            normals.dims()
        )));
    }

    if check_input {
        validate_normals(&normals, use_full_z_range)?;
    }

    if use_full_z_range {
        Ok(normals)
    } else {
        Ok(map_z(normals, |z| z * 2.0 - 1.0))
    }
}

fn validate_normals<B: Backend>(normals: &Tensor<B, 4>, use_full_z_range: bool) -> Result<()> {
    const HINT: &str = "ensure the normals vectors are unit length";

    let [n, _, h, w] = normals.dims();
    let values: Vec<f32> = normals.clone().into_data().iter::<f32>().collect();

    if values.iter().any(|v| v.is_nan()) {
        return Err(NormalsError::InvalidNormals(format!("NaN values detected, {HINT}")));
    }
    if values.iter().any(|v| !v.is_finite()) {
        return Err(NormalsError::InvalidNormals(format!(
            "Non-finite values detected, {HINT}"
        )));
    }

    let plane = h * w;
    let mut worst = 0.0f32;
    for b in 0..n {
        let base = b * 3 * plane;
        for p in 0..plane {
            let sq: f32 = (0..3).map(|c| values[base + c * plane + p].powi(2)).sum();
            worst = worst.max((sq - 1.0).abs());
        }
    }
    if worst > UNIT_NORM_TOLERANCE {
        return Err(NormalsError::InvalidNormals(format!(
            "Non-unit vectors detected (max |‖v‖² - 1| = {worst}), {HINT}"
        )));
    }

    if !use_full_z_range {
        let negative_z = (0..n)
            .flat_map(|b| values[(b * 3 + 2) * plane..(b * 3 + 3) * plane].iter())
            .any(|&z| z < 0.0);
        if negative_z {
            return Err(NormalsError::InvalidNormals(
                "Negative Z-component detected, ensure the normals vectors are represented in ray-space"
                    .to_string(),
            ));
        }
    }

    Ok(())
}
