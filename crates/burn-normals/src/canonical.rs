//! Image canonicalization
//!
//! Turns the accepted input forms into a `[N, 3, H, W]` float tensor plus the
//! maximum value of the source numeric type, when there is one.

use burn::prelude::*;
use burn::tensor::{DType, ElementConversion};
use image::DynamicImage;
use log::warn;

use crate::error::{NormalsError, Result};

/// An input image in one of the accepted forms
///
/// `Array` takes host data shaped `[H, W]`, `[H, W, C]`, `[C, H, W]` or
/// `[N, C, H, W]` with a float or unsigned integer element type.
#[derive(Debug, Clone)]
pub enum ImageInput<B: Backend> {
    Image(DynamicImage),
    Array(TensorData),
    /// Float tensor already laid out as `[N, 3, H, W]`
    Tensor(Tensor<B, 4>),
}

impl<B: Backend> From<DynamicImage> for ImageInput<B> {
    fn from(image: DynamicImage) -> Self {
        Self::Image(image)
    }
}

impl<B: Backend> From<TensorData> for ImageInput<B> {
    fn from(data: TensorData) -> Self {
        Self::Array(data)
    }
}

impl<B: Backend> From<Tensor<B, 4>> for ImageInput<B> {
    fn from(tensor: Tensor<B, 4>) -> Self {
        Self::Tensor(tensor)
    }
}

impl<B: Backend> ImageInput<B> {
    /// `(num_images, height, width)` of the input, without converting it
    pub fn dims(&self) -> Result<(usize, usize, usize)> {
        match self {
            Self::Image(image) => Ok((1, image.height() as usize, image.width() as usize)),
            Self::Tensor(tensor) => {
                let [n, _, h, w] = tensor.dims();
                Ok((n, h, w))
            }
            Self::Array(data) => match data.shape.as_slice() {
                &[h, w] => Ok((1, h, w)),
                &[h, w, c] if c == 1 || c == 3 => Ok((1, h, w)),
                &[_, h, w] => Ok((1, h, w)),
                &[n, _, h, w] => Ok((n, h, w)),
                other => Err(NormalsError::InvalidInputKind(format!(
                    "image has unsupported dimension or shape: {other:?}"
                ))),
            },
        }
    }
}

/// Convert an input image to a `[N, 3, H, W]` float tensor
///
/// Returns the tensor together with the maximum value of the source element
/// type (255 for 8-bit data, the type maximum for other unsigned integers), or
/// `None` for float sources. Values are not rescaled here.
pub fn load_image_canonical<B: Backend>(
    input: ImageInput<B>,
    device: &B::Device,
) -> Result<(Tensor<B, 4>, Option<f32>)> {
    let (image, source_max) = match input {
        ImageInput::Image(image) => load_array(dynamic_image_data(image), device)?,
        ImageInput::Array(data) => load_array(data, device)?,
        ImageInput::Tensor(tensor) => (tensor.to_device(device), None),
    };

    let [_, channels, _, _] = image.dims();
    if channels != 3 {
        return Err(NormalsError::InvalidInputKind(format!(
            "image is not 3-channel: {:?}",
            image.dims()
        )));
    }

    Ok((image, source_max))
}

/// Map a canonical image into `[-1, 1]`
///
/// With a known source maximum the values are rescaled. Otherwise they must
/// already be in `[-1, 1]` when `check_input` is set; data lying entirely in
/// `[0, 1]` only triggers a warning.
pub fn normalize_image_range<B: Backend>(
    image: Tensor<B, 4>,
    source_max: Option<f32>,
    check_input: bool,
) -> Result<Tensor<B, 4>> {
    if let Some(max) = source_max {
        return Ok(image * (2.0 / max) - 1.0);
    }
    if check_input {
        check_image_values_range(&image)?;
    }
    Ok(image)
}

fn check_image_values_range<B: Backend>(image: &Tensor<B, 4>) -> Result<()> {
    let min: f32 = image.clone().min().into_scalar().elem();
    let max: f32 = image.clone().max().into_scalar().elem();

    if min < -1.0 || max > 1.0 {
        return Err(NormalsError::InvalidInputKind(format!(
            "image data is partially outside of the [-1,1] range (min={min}, max={max})"
        )));
    }
    if min >= 0.0 {
        warn!(
            "Input image data is entirely in the [0,1] range; expecting [-1,1]. \
             This could be an issue with normalization"
        );
    }
    Ok(())
}

/// Decoded image as interleaved `[H, W, 3]` host data, alpha dropped
fn dynamic_image_data(image: DynamicImage) -> TensorData {
    let (w, h) = (image.width() as usize, image.height() as usize);
    let color = image.color();
    let bytes_per_channel = color.bytes_per_pixel() / color.channel_count();

    match bytes_per_channel {
        1 => TensorData::new(image.into_rgb8().into_raw(), [h, w, 3]),
        2 => TensorData::new(image.into_rgb16().into_raw(), [h, w, 3]),
        _ => TensorData::new(image.into_rgb32f().into_raw(), [h, w, 3]),
    }
}

fn load_array<B: Backend>(
    data: TensorData,
    device: &B::Device,
) -> Result<(Tensor<B, 4>, Option<f32>)> {
    let source_max = match data.dtype {
        DType::U8 => Some(u8::MAX as f32),
        DType::U16 => Some(u16::MAX as f32),
        DType::U32 => Some(u32::MAX as f32),
        DType::U64 => Some(u64::MAX as f32),
        DType::I8 | DType::I16 | DType::I32 | DType::I64 => {
            return Err(NormalsError::InvalidInputKind(format!(
                "image dtype={:?} cannot be a signed integer",
                data.dtype
            )));
        }
        DType::Bool => {
            return Err(NormalsError::InvalidInputKind(
                "image dtype cannot be boolean".to_string(),
            ));
        }
        dtype if dtype.is_float() => None,
        dtype => {
            return Err(NormalsError::InvalidInputKind(format!(
                "image dtype={dtype:?} is not supported"
            )));
        }
    };

    let shape = data.shape.clone();
    let values: Vec<f32> = data.iter::<f32>().collect();

    let image = match shape.as_slice() {
        &[h, w] => Tensor::<B, 2>::from_data(TensorData::new(values, [h, w]), device)
            .reshape([1, 1, h, w])
            .repeat_dim(1, 3),
        &[a, b, c] => {
            let chw = Tensor::<B, 3>::from_data(TensorData::new(values, [a, b, c]), device);
            // Interleaved channels last
            let chw = if c == 1 || c == 3 {
                chw.permute([2, 0, 1])
            } else {
                chw
            };
            let chw = if chw.dims()[0] == 1 {
                chw.repeat_dim(0, 3)
            } else {
                chw
            };
            if chw.dims()[0] != 3 {
                return Err(NormalsError::InvalidInputKind(format!(
                    "image is not 1- or 3-channel: {shape:?}"
                )));
            }
            chw.unsqueeze_dim(0)
        }
        &[n, c, h, w] => Tensor::from_data(TensorData::new(values, [n, c, h, w]), device),
        other => {
            return Err(NormalsError::InvalidInputKind(format!(
                "image is not a 2-, 3-, or 4-dimensional array: {other:?}"
            )));
        }
    };

    Ok((image, source_max))
}
