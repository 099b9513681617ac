//! Reference edge detector over the marshalled luma run
//!
//! Blurs the luma plane, takes the absolute 4-neighbour Laplacian, and paints
//! pixels at or above the threshold white on an opaque black image.

use image::{imageops, GrayImage, Rgba, RgbaImage};
use tracing::warn;

use crate::pipeline::{FrameTransform, TransformInput};
use crate::TransformConfig;

const EDGE: Rgba<u8> = Rgba([255, 255, 255, 255]);
const BACKGROUND: Rgba<u8> = Rgba([0, 0, 0, 255]);

#[derive(Debug, Clone)]
pub struct EdgeTransform {
    blur_sigma: f32,
    threshold: u8,
}

impl EdgeTransform {
    pub fn new(config: &TransformConfig) -> Self {
        Self {
            blur_sigma: config.blur_sigma,
            threshold: config.threshold,
        }
    }

    fn luma(&self, input: &TransformInput<'_>) -> Option<GrayImage> {
        let len = input.width as usize * input.height as usize;
        let Some(run) = input.bytes.get(..len) else {
            warn!(
                "Luma run truncated: {} bytes for {}x{}",
                input.bytes.len(),
                input.width,
                input.height
            );
            return None;
        };
        let gray = GrayImage::from_raw(input.width, input.height, run.to_vec())?;
        if self.blur_sigma > 0.0 {
            Some(imageops::blur(&gray, self.blur_sigma))
        } else {
            Some(gray)
        }
    }
}

impl Default for EdgeTransform {
    fn default() -> Self {
        Self::new(&TransformConfig::default())
    }
}

impl FrameTransform for EdgeTransform {
    fn transform(&mut self, input: TransformInput<'_>) -> Option<RgbaImage> {
        if input.width == 0 || input.height == 0 {
            return None;
        }
        let gray = self.luma(&input)?;
        let (width, height) = gray.dimensions();
        let threshold = i32::from(self.threshold);

        let at = |x: u32, y: u32| i32::from(gray.get_pixel(x, y).0[0]);
        let mut out = RgbaImage::from_pixel(width, height, BACKGROUND);
        for y in 0..height {
            for x in 0..width {
                // Edges of the image replicate their border sample.
                let centre = at(x, y);
                let left = at(x.saturating_sub(1), y);
                let right = at((x + 1).min(width - 1), y);
                let up = at(x, y.saturating_sub(1));
                let down = at(x, (y + 1).min(height - 1));

                let laplacian = (4 * centre - left - right - up - down).abs();
                if laplacian >= threshold {
                    out.put_pixel(x, y, EDGE);
                }
            }
        }
        Some(out)
    }
}
