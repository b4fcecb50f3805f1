//! Face location via the SeetaFace frontal detector (rustface).
//!
//! The pipeline treats detection as an external capability: zero or more
//! axis-aligned regions, no ordering guarantee. Callers that use a region
//! take the FIRST one — "an acceptable face", not the largest or most
//! confident. That first-face policy is deliberate and pinned by tests in
//! the engine; anything smarter (pick-largest, pick-highest-score) must be
//! added explicitly by the caller.

use crate::types::FaceRegion;
use image::GrayImage;
use rustface::ImageData;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LocatorError {
    #[error("detector model file not found: {0} — download seeta_fd_frontal_v1.0.bin and set ROLLCALL_DETECTOR_MODEL")]
    ModelNotFound(String),
    #[error("failed to load detector model: {0}")]
    ModelLoad(String),
}

/// Tuning knobs for the sliding-window detector. These are the
/// configuration surface the service exposes; defaults match the
/// detector's documented operating point.
#[derive(Debug, Clone)]
pub struct DetectorParams {
    pub min_face_size: u32,
    pub score_thresh: f64,
    pub pyramid_scale_factor: f32,
    pub slide_window_step: u32,
}

impl Default for DetectorParams {
    fn default() -> Self {
        Self {
            min_face_size: 20,
            score_thresh: 2.0,
            pyramid_scale_factor: 0.8,
            slide_window_step: 4,
        }
    }
}

/// Capability boundary: given a grayscale raster, return zero or more
/// face regions.
pub trait FaceLocator {
    fn locate(&mut self, gray: &GrayImage) -> Result<Vec<FaceRegion>, LocatorError>;
}

/// SeetaFace-backed locator.
pub struct SeetaFaceLocator {
    detector: Box<dyn rustface::Detector>,
}

impl SeetaFaceLocator {
    /// Load the frontal detection model from disk and apply tuning
    /// parameters. Fails fast if the model file is missing.
    pub fn load(model_path: &str, params: &DetectorParams) -> Result<Self, LocatorError> {
        if !Path::new(model_path).exists() {
            return Err(LocatorError::ModelNotFound(model_path.to_string()));
        }

        let mut detector = rustface::create_detector(model_path)
            .map_err(|e| LocatorError::ModelLoad(e.to_string()))?;

        detector.set_min_face_size(params.min_face_size);
        detector.set_score_thresh(params.score_thresh);
        detector.set_pyramid_scale_factor(params.pyramid_scale_factor);
        detector.set_slide_window_step(params.slide_window_step, params.slide_window_step);

        tracing::info!(path = model_path, ?params, "SeetaFace detector loaded");

        Ok(Self { detector })
    }
}

impl FaceLocator for SeetaFaceLocator {
    fn locate(&mut self, gray: &GrayImage) -> Result<Vec<FaceRegion>, LocatorError> {
        let image = ImageData::new(gray.as_raw(), gray.width(), gray.height());
        let faces = self.detector.detect(&image);

        tracing::debug!(
            width = gray.width(),
            height = gray.height(),
            found = faces.len(),
            "face detection pass"
        );

        Ok(faces
            .iter()
            .map(|f| {
                let b = f.bbox();
                FaceRegion {
                    x: b.x(),
                    y: b.y(),
                    width: b.width(),
                    height: b.height(),
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_missing_model_fails_fast() {
        let err = SeetaFaceLocator::load("/nonexistent/seeta.bin", &DetectorParams::default())
            .err()
            .unwrap();
        assert!(matches!(err, LocatorError::ModelNotFound(_)));
    }

    #[test]
    fn test_default_params_operating_point() {
        let p = DetectorParams::default();
        assert_eq!(p.min_face_size, 20);
        assert_eq!(p.slide_window_step, 4);
        assert!((p.pyramid_scale_factor - 0.8).abs() < f32::EPSILON);
    }
}
