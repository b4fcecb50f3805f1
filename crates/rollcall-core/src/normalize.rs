//! Crop a located face region and normalize it to the canonical
//! template raster. Enrollment and recognition share this path, so a
//! probe cut from the same frame as an enrolled template reproduces it
//! byte for byte.

use crate::types::FaceRegion;
use image::imageops::{self, FilterType};
use image::GrayImage;

/// Default canonical template edge length (templates are square).
pub const DEFAULT_TEMPLATE_SIZE: u32 = 200;

/// Crop `region` out of `gray`, clamped to the frame bounds, and resize
/// to `size`×`size`.
pub fn crop_and_normalize(gray: &GrayImage, region: &FaceRegion, size: u32) -> GrayImage {
    let (fw, fh) = gray.dimensions();

    // Clamp the region to the frame; detectors report boxes that spill
    // over borders.
    let x0 = region.x.clamp(0, fw.saturating_sub(1) as i32) as u32;
    let y0 = region.y.clamp(0, fh.saturating_sub(1) as i32) as u32;
    let w = region.width.min(fw - x0).max(1);
    let h = region.height.min(fh - y0).max(1);

    let cropped = imageops::crop_imm(gray, x0, y0, w, h).to_image();
    imageops::resize(&cropped, size, size, FilterType::Triangle)
}
