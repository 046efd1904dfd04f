//! Detector input preparation: letterbox a page image into the fixed canvas.
//!
//! The page is scaled uniformly (aspect ratio preserved) so its longer side
//! fits the canvas, then pasted at the **centre** of a zero-filled canvas.
//! The same anchor is used by [`PreprocessMeta::to_original`] when boxes come
//! back from the detector; the two must never disagree, otherwise every box
//! is shifted by the padding and nothing fails loudly.

use crate::config::PreprocessConfig;
use crate::error::LayoutError;
use crate::types::BBox;
use image::imageops::{self, FilterType};
use image::{DynamicImage, RgbImage};
use ndarray::Array4;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Geometry needed to map canvas coordinates back to the original page.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PreprocessMeta {
    pub original_width: u32,
    pub original_height: u32,
    /// Uniform scale applied to the page.
    pub scale: f32,
    /// Left padding in canvas pixels.
    pub pad_w: u32,
    /// Top padding in canvas pixels.
    pub pad_h: u32,
    pub target_width: u32,
    pub target_height: u32,
}

impl PreprocessMeta {
    /// Compute the letterbox geometry for a page of `width × height`.
    pub fn compute(width: u32, height: u32, config: &PreprocessConfig) -> Result<Self, LayoutError> {
        if width == 0 || height == 0 {
            return Err(LayoutError::InvalidImage { width, height });
        }
        let (tw, th) = (config.target_width, config.target_height);
        if tw == 0 || th == 0 {
            return Err(LayoutError::InvalidConfig(format!(
                "target size must be non-zero, got {tw}x{th}"
            )));
        }

        let scale = (th as f32 / height as f32).min(tw as f32 / width as f32);
        let (new_w, new_h) = scaled_size(width, height, scale, tw, th);

        Ok(Self {
            original_width: width,
            original_height: height,
            scale,
            pad_w: (tw - new_w) / 2,
            pad_h: (th - new_h) / 2,
            target_width: tw,
            target_height: th,
        })
    }

    /// Size of the page once scaled, before padding.
    pub fn scaled_size(&self) -> (u32, u32) {
        scaled_size(
            self.original_width,
            self.original_height,
            self.scale,
            self.target_width,
            self.target_height,
        )
    }

    /// Map a box from original-page space into canvas space.
    pub fn to_canvas(&self, b: &BBox) -> BBox {
        let (pw, ph) = (self.pad_w as f32, self.pad_h as f32);
        BBox::new(
            b.x_min * self.scale + pw,
            b.y_min * self.scale + ph,
            b.x_max * self.scale + pw,
            b.y_max * self.scale + ph,
        )
    }

    /// Map a box from canvas space back to original-page space, clipped to
    /// the page.
    pub fn to_original(&self, b: &BBox) -> BBox {
        let (pw, ph) = (self.pad_w as f32, self.pad_h as f32);
        BBox::new(
            (b.x_min - pw) / self.scale,
            (b.y_min - ph) / self.scale,
            (b.x_max - pw) / self.scale,
            (b.y_max - ph) / self.scale,
        )
        .clip(self.original_width as f32, self.original_height as f32)
    }
}

fn scaled_size(width: u32, height: u32, scale: f32, tw: u32, th: u32) -> (u32, u32) {
    let new_w = ((width as f32 * scale).round() as u32).clamp(1, tw);
    let new_h = ((height as f32 * scale).round() as u32).clamp(1, th);
    (new_w, new_h)
}

/// Detector-ready tensor plus the geometry used to produce it.
#[derive(Debug, Clone)]
pub struct PreprocessedImage {
    /// `[1, 3, target_height, target_width]`, normalised.
    pub tensor: Array4<f32>,
    pub meta: PreprocessMeta,
}

/// Letterbox and normalise a page image for the detector.
///
/// Every canvas pixel, padding included, goes through
/// `(v / 255 - mean[c]) / std[c]`.
pub fn preprocess(
    image: &DynamicImage,
    config: &PreprocessConfig,
) -> Result<PreprocessedImage, LayoutError> {
    let rgb = image.to_rgb8();
    let meta = PreprocessMeta::compute(rgb.width(), rgb.height(), config)?;
    let (new_w, new_h) = meta.scaled_size();

    let resized = imageops::resize(&rgb, new_w, new_h, FilterType::Triangle);
    let mut canvas = RgbImage::new(meta.target_width, meta.target_height);
    imageops::replace(&mut canvas, &resized, i64::from(meta.pad_w), i64::from(meta.pad_h));

    let tensor = to_normalised_tensor(&canvas, config);

    debug!(
        "Preprocessed {}x{} → {}x{} (scale {:.4}, pad {}x{})",
        meta.original_width,
        meta.original_height,
        meta.target_width,
        meta.target_height,
        meta.scale,
        meta.pad_w,
        meta.pad_h
    );

    Ok(PreprocessedImage { tensor, meta })
}

/// HWC u8 → NCHW f32 with per-channel normalisation.
fn to_normalised_tensor(canvas: &RgbImage, config: &PreprocessConfig) -> Array4<f32> {
    let (w, h) = canvas.dimensions();
    let mut tensor = Array4::<f32>::zeros((1, 3, h as usize, w as usize));

    for (x, y, pixel) in canvas.enumerate_pixels() {
        for c in 0..3 {
            let v = f32::from(pixel[c]) / 255.0;
            tensor[[0, c, y as usize, x as usize]] = (v - config.mean[c]) / config.std[c];
        }
    }

    tensor
}
