//! Resolution normalization: resize, pad, unpad
//!
//! Resampling runs on host data with separable per-axis tap tables, matching
//! the interpolation modes of common tensor libraries (half-pixel centers,
//! no corner alignment). Antialiasing widens the bilinear/bicubic filter
//! support by the downscale factor.

use std::fmt;
use std::str::FromStr;

use burn::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{NormalsError, Result};

/// Interpolation mode for resizing images and predictions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResampleMethod {
    Nearest,
    NearestExact,
    #[default]
    Bilinear,
    Bicubic,
    /// Adaptive average pooling
    Area,
}

impl ResampleMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Nearest => "nearest",
            Self::NearestExact => "nearest-exact",
            Self::Bilinear => "bilinear",
            Self::Bicubic => "bicubic",
            Self::Area => "area",
        }
    }

    /// Only the filtering modes can be antialiased
    pub fn supports_antialias(&self) -> bool {
        matches!(self, Self::Bilinear | Self::Bicubic)
    }

    /// Tap table mapping `out_size` output samples onto `in_size` inputs
    fn taps(&self, in_size: usize, out_size: usize, antialias: bool) -> Vec<Taps> {
        let scale = in_size as f64 / out_size as f64;
        let last = in_size - 1;

        match self {
            Self::Nearest => (0..out_size)
                .map(|i| vec![(((i as f64 * scale).floor() as usize).min(last), 1.0)])
                .collect(),
            Self::NearestExact => (0..out_size)
                .map(|i| vec![((((i as f64 + 0.5) * scale).floor() as usize).min(last), 1.0)])
                .collect(),
            Self::Area => (0..out_size)
                .map(|i| {
                    let start = i * in_size / out_size;
                    let end = ((i + 1) * in_size).div_ceil(out_size);
                    let weight = 1.0 / (end - start) as f32;
                    (start..end).map(|j| (j, weight)).collect()
                })
                .collect(),
            Self::Bilinear if antialias => antialias_taps(in_size, out_size, 1.0, triangle),
            Self::Bicubic if antialias => antialias_taps(in_size, out_size, 2.0, keys_cubic),
            Self::Bilinear => (0..out_size)
                .map(|i| {
                    let src = (scale * (i as f64 + 0.5) - 0.5).max(0.0);
                    let i0 = (src.floor() as usize).min(last);
                    let i1 = (i0 + 1).min(last);
                    let t = (src - i0 as f64) as f32;
                    vec![(i0, 1.0 - t), (i1, t)]
                })
                .collect(),
            Self::Bicubic => (0..out_size)
                .map(|i| {
                    let src = scale * (i as f64 + 0.5) - 0.5;
                    let base = src.floor();
                    let t = (src - base) as f32;
                    let weights = cubic_weights(t);
                    (0..4)
                        .map(|k| {
                            let idx = (base as isize - 1 + k as isize).clamp(0, last as isize);
                            (idx as usize, weights[k])
                        })
                        .collect()
                })
                .collect(),
        }
    }
}

impl fmt::Display for ResampleMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResampleMethod {
    type Err = NormalsError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "nearest" => Ok(Self::Nearest),
            "nearest-exact" => Ok(Self::NearestExact),
            "bilinear" => Ok(Self::Bilinear),
            "bicubic" => Ok(Self::Bicubic),
            "area" => Ok(Self::Area),
            other => Err(NormalsError::invalid_value(
                "resample_method",
                format!("`{other}`; expected nearest, nearest-exact, bilinear, bicubic or area"),
            )),
        }
    }
}

/// `(input index, weight)` pairs contributing to one output sample
type Taps = Vec<(usize, f32)>;

fn triangle(x: f64) -> f64 {
    let x = x.abs();
    if x < 1.0 {
        1.0 - x
    } else {
        0.0
    }
}

/// Keys cubic kernel with a = -0.5
fn keys_cubic(x: f64) -> f64 {
    const A: f64 = -0.5;
    let x = x.abs();
    if x < 1.0 {
        ((A + 2.0) * x - (A + 3.0)) * x * x + 1.0
    } else if x < 2.0 {
        (((x - 5.0) * x + 8.0) * x - 4.0) * A
    } else {
        0.0
    }
}

/// Four cubic convolution weights (a = -0.75) at fractional offset `t`
fn cubic_weights(t: f32) -> [f32; 4] {
    const A: f32 = -0.75;
    let near = |x: f32| ((A + 2.0) * x - (A + 3.0)) * x * x + 1.0;
    let far = |x: f32| ((A * x - 5.0 * A) * x + 8.0 * A) * x - 4.0 * A;
    [far(t + 1.0), near(t), near(1.0 - t), far(2.0 - t)]
}

/// Normalized filter taps with support widened by the downscale factor
fn antialias_taps(
    in_size: usize,
    out_size: usize,
    half_width: f64,
    filter: fn(f64) -> f64,
) -> Vec<Taps> {
    let scale = in_size as f64 / out_size as f64;
    let (support, invscale) = if scale >= 1.0 {
        (half_width * scale, 1.0 / scale)
    } else {
        (half_width, 1.0)
    };

    (0..out_size)
        .map(|i| {
            let center = scale * (i as f64 + 0.5);
            let xmin = ((center - support + 0.5).trunc() as isize).max(0) as usize;
            let xmax = ((center + support + 0.5).trunc() as isize).min(in_size as isize) as usize;

            let weights: Vec<f64> = (xmin..xmax)
                .map(|j| filter((j as f64 - center + 0.5) * invscale))
                .collect();
            let total: f64 = weights.iter().sum();
            let norm = if total != 0.0 { 1.0 / total } else { 1.0 };

            (xmin..xmax)
                .zip(weights)
                .map(|(j, w)| (j, (w * norm) as f32))
                .collect()
        })
        .collect()
}

/// Resize `[N, C, H, W]` to `size = (height, width)`
///
/// `antialias` only has an effect for bilinear and bicubic resampling.
pub fn resize_antialias<B: Backend>(
    image: Tensor<B, 4>,
    size: (usize, usize),
    method: ResampleMethod,
    antialias: bool,
) -> Tensor<B, 4> {
    let [n, c, h, w] = image.dims();
    let (out_h, out_w) = size;
    if (h, w) == size {
        return image;
    }

    let antialias = antialias && method.supports_antialias();
    let row_taps = method.taps(h, out_h, antialias);
    let col_taps = method.taps(w, out_w, antialias);

    let device = image.device();
    let src: Vec<f32> = image.into_data().iter::<f32>().collect();
    let planes = n * c;

    // Horizontal pass: [planes, h, out_w]
    let mut horizontal = vec![0.0f32; planes * h * out_w];
    for (row_in, row_out) in src.chunks_exact(w).zip(horizontal.chunks_exact_mut(out_w)) {
        for (out, taps) in row_out.iter_mut().zip(&col_taps) {
            *out = taps.iter().map(|&(j, wt)| row_in[j] * wt).sum();
        }
    }

    // Vertical pass: [planes, out_h, out_w]
    let mut output = vec![0.0f32; planes * out_h * out_w];
    for (plane_in, plane_out) in horizontal
        .chunks_exact(h * out_w)
        .zip(output.chunks_exact_mut(out_h * out_w))
    {
        for (row_out, taps) in plane_out.chunks_exact_mut(out_w).zip(&row_taps) {
            for &(j, wt) in taps {
                let row_in = &plane_in[j * out_w..(j + 1) * out_w];
                for (o, v) in row_out.iter_mut().zip(row_in) {
                    *o += v * wt;
                }
            }
        }
    }

    Tensor::from_data(TensorData::new(output, [n, c, out_h, out_w]), &device)
}

/// Size after scaling `(height, width)` so the longer edge equals `max_edge`
pub fn max_edge_dims(height: usize, width: usize, max_edge: usize) -> Result<(usize, usize)> {
    let max_orig = height.max(width);
    let new_h = height * max_edge / max_orig;
    let new_w = width * max_edge / max_orig;

    if new_h == 0 || new_w == 0 {
        return Err(NormalsError::DegenerateGeometry {
            height,
            width,
            max_edge,
        });
    }
    Ok((new_h, new_w))
}

/// Antialiased resize so that the longer edge equals `max_edge`
pub fn resize_to_max_edge<B: Backend>(
    image: Tensor<B, 4>,
    max_edge: usize,
    method: ResampleMethod,
) -> Result<Tensor<B, 4>> {
    let [_, _, h, w] = image.dims();
    let size = max_edge_dims(h, w, max_edge)?;
    Ok(resize_antialias(image, size, method, true))
}

/// Replicate padding added at the bottom and right edges
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Padding {
    pub height: usize,
    pub width: usize,
}

/// Pad height and width up to multiples of `align` by edge replication
pub fn pad_image<B: Backend>(image: Tensor<B, 4>, align: usize) -> (Tensor<B, 4>, Padding) {
    let [_, _, h, w] = image.dims();
    let padding = Padding {
        height: (align - h % align) % align,
        width: (align - w % align) % align,
    };

    let image = if padding.height > 0 {
        let [n, c, h, w] = image.dims();
        let edge = image.clone().slice([0..n, 0..c, h - 1..h, 0..w]);
        Tensor::cat(vec![image, edge.repeat_dim(2, padding.height)], 2)
    } else {
        image
    };

    let image = if padding.width > 0 {
        let [n, c, h, w] = image.dims();
        let edge = image.clone().slice([0..n, 0..c, 0..h, w - 1..w]);
        Tensor::cat(vec![image, edge.repeat_dim(3, padding.width)], 3)
    } else {
        image
    };

    (image, padding)
}

/// Remove the padding added by [`pad_image`]
pub fn unpad_image<B: Backend>(image: Tensor<B, 4>, padding: Padding) -> Tensor<B, 4> {
    let [n, c, h, w] = image.dims();
    image.slice([0..n, 0..c, 0..h - padding.height, 0..w - padding.width])
}
