//! rollcall-core — the enrollment-and-recognition pipeline.
//!
//! Decodes transport-encoded frames, locates faces with the SeetaFace
//! frontal detector, normalizes crops to the canonical template size and
//! classifies probes against the enrolled gallery with LBPH.

pub mod decode;
pub mod locator;
pub mod model;
pub mod normalize;
pub mod types;

pub use types::{FaceRegion, FaceTemplate, Prediction, RecognitionOutcome};
