use chrono::{DateTime, Utc};
use image::GrayImage;
use serde::{Deserialize, Serialize};

/// Axis-aligned face region in raster coordinates.
///
/// Coordinates may fall partially outside the frame (detectors report
/// boxes near borders that way); consumers clamp before cropping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceRegion {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// One canonical face template: a normalized grayscale raster bound to
/// exactly one identity. The gallery holds at most one of these per
/// identity; re-enrollment overwrites.
#[derive(Debug, Clone)]
pub struct FaceTemplate {
    pub identity: String,
    pub pixels: GrayImage,
    pub created_at: DateTime<Utc>,
}

/// Best-match result of classifying a probe against a trained gallery.
///
/// `distance` is the model-native dissimilarity (lower = more similar);
/// it is not normalized to [0, 1]. Thresholding is the caller's policy.
#[derive(Debug, Clone)]
pub struct Prediction {
    pub identity: String,
    pub distance: f32,
}

/// Per-request recognition outcome, handed to the attendance ledger on
/// accept. Never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct RecognitionOutcome {
    pub identity: Option<String>,
    pub distance: f32,
    pub accepted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_face_region_serde_round_trip() {
        let region = FaceRegion { x: -3, y: 10, width: 120, height: 118 };
        let json = serde_json::to_string(&region).unwrap();
        let back: FaceRegion = serde_json::from_str(&json).unwrap();
        assert_eq!(region, back);
    }

    #[test]
    fn test_outcome_rejected_has_no_identity() {
        let outcome = RecognitionOutcome { identity: None, distance: 142.7, accepted: false };
        let json = serde_json::to_string(&outcome).unwrap();
        assert!(json.contains("\"identity\":null"));
        assert!(json.contains("\"accepted\":false"));
    }
}
