//! Normal map visualization

use burn::prelude::*;
use image::{Rgb, RgbImage};
use serde::{Deserialize, Serialize};

/// Axis flips applied before coloring
///
/// The default frame has x pointing right, y up and z towards the viewer.
/// Flipping an axis changes the color scheme, not the prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VisualizationConfig {
    pub flip_x: bool,
    pub flip_y: bool,
    pub flip_z: bool,
}

impl VisualizationConfig {
    fn flip_signs(&self) -> [f32; 3] {
        let sign = |flip: bool| if flip { -1.0 } else { 1.0 };
        [sign(self.flip_x), sign(self.flip_y), sign(self.flip_z)]
    }
}

/// Maps a `[H, W, 3]` normal map in `[-1, 1]` to a displayable image
pub trait NormalsVisualizer<B: Backend> {
    fn visualize(&self, normals: Tensor<B, 3>, config: &VisualizationConfig) -> RgbImage;
}

/// Maps each component linearly from `[-1, 1]` to `[0, 255]`
#[derive(Debug, Clone, Copy, Default)]
pub struct NormalsColorizer;

impl<B: Backend> NormalsVisualizer<B> for NormalsColorizer {
    fn visualize(&self, normals: Tensor<B, 3>, config: &VisualizationConfig) -> RgbImage {
        let [h, w, channels] = normals.dims();
        assert_eq!(channels, 3, "normal map must be [H, W, 3]");

        let flip = Tensor::<B, 1>::from_floats(config.flip_signs(), &normals.device())
            .reshape([1, 1, 3]);
        let colors = ((normals * flip + 1.0) * 0.5 * 255.0).clamp(0.0, 255.0);
        let bytes: Vec<u8> = colors.into_data().iter::<f32>().map(|v| v as u8).collect();

        RgbImage::from_fn(w as u32, h as u32, |x, y| {
            let idx = (y as usize * w + x as usize) * 3;
            Rgb([bytes[idx], bytes[idx + 1], bytes[idx + 2]])
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    fn map(values: Vec<f32>, h: usize, w: usize) -> Tensor<TestBackend, 3> {
        Tensor::from_data(TensorData::new(values, [h, w, 3]), &Default::default())
    }

    #[test]
    fn test_colorize_axes() {
        // Pixel 0 faces the viewer, pixel 1 points right
        let normals = map(vec![0.0, 0.0, 1.0, 1.0, 0.0, 0.0], 1, 2);
        let image =
            NormalsVisualizer::<TestBackend>::visualize(&NormalsColorizer, normals, &Default::default());

        assert_eq!(image.dimensions(), (2, 1));
        assert_eq!(image.get_pixel(0, 0), &Rgb([127, 127, 255]));
        assert_eq!(image.get_pixel(1, 0), &Rgb([255, 127, 127]));
    }

    #[test]
    fn test_flip_changes_colors() {
        let normals = map(vec![1.0, -1.0, 1.0], 1, 1);
        let config = VisualizationConfig {
            flip_x: true,
            flip_y: true,
            flip_z: false,
        };
        let image = NormalsVisualizer::<TestBackend>::visualize(&NormalsColorizer, normals, &config);
        assert_eq!(image.get_pixel(0, 0), &Rgb([0, 255, 255]));
    }

    #[test]
    fn test_layout_is_row_major() {
        // 2x1 image, top pixel red-ish, bottom pixel green-ish
        let normals = map(vec![1.0, -1.0, -1.0, -1.0, 1.0, -1.0], 2, 1);
        let image =
            NormalsVisualizer::<TestBackend>::visualize(&NormalsColorizer, normals, &Default::default());
        assert_eq!(image.dimensions(), (1, 2));
        assert_eq!(image.get_pixel(0, 0), &Rgb([255, 0, 0]));
        assert_eq!(image.get_pixel(0, 1), &Rgb([0, 255, 0]));
    }

    #[test]
    fn test_config_json_defaults() {
        let config: VisualizationConfig = serde_json::from_str(r#"{"flip_y":true}"#).unwrap();
        assert!(config.flip_y);
        assert!(!config.flip_x && !config.flip_z);
    }
}
