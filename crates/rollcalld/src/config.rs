use rollcall_core::locator::DetectorParams;
use rollcall_core::model::LbphParams;
use rollcall_core::normalize::DEFAULT_TEMPLATE_SIZE;
use std::path::PathBuf;

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// Path to the SQLite database file (gallery + ledger).
    pub db_path: PathBuf,
    /// Path to the SeetaFace frontal detection model.
    pub detector_model: String,
    /// Canonical template edge length in pixels.
    pub template_size: u32,
    /// Maximum chi-square distance accepted as a positive match.
    /// Lower is stricter; the scale is LBPH-native, not [0, 1].
    pub distance_threshold: f32,
    /// Minimum detectable face size in pixels.
    pub min_face_size: u32,
    /// Detector score threshold.
    pub score_thresh: f64,
    /// Detector image pyramid scale factor.
    pub pyramid_scale_factor: f32,
    /// Sliding window step in pixels.
    pub slide_window_step: u32,
}

impl Config {
    /// Load configuration from `ROLLCALL_*` environment variables with
    /// defaults matching the service's documented operating point.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("rollcall");

        let db_path = std::env::var("ROLLCALL_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("attendance.db"));

        Self {
            db_path,
            detector_model: std::env::var("ROLLCALL_DETECTOR_MODEL")
                .unwrap_or_else(|_| "models/seeta_fd_frontal_v1.0.bin".to_string()),
            template_size: env_u32("ROLLCALL_TEMPLATE_SIZE", DEFAULT_TEMPLATE_SIZE),
            distance_threshold: env_f32("ROLLCALL_DISTANCE_THRESHOLD", 80.0),
            min_face_size: env_u32("ROLLCALL_MIN_FACE_SIZE", 20),
            score_thresh: env_f64("ROLLCALL_SCORE_THRESH", 2.0),
            pyramid_scale_factor: env_f32("ROLLCALL_PYRAMID_SCALE", 0.8),
            slide_window_step: env_u32("ROLLCALL_SLIDE_WINDOW_STEP", 4),
        }
    }

    pub fn detector_params(&self) -> DetectorParams {
        DetectorParams {
            min_face_size: self.min_face_size,
            score_thresh: self.score_thresh,
            pyramid_scale_factor: self.pyramid_scale_factor,
            slide_window_step: self.slide_window_step,
        }
    }

    pub fn lbph_params(&self) -> LbphParams {
        LbphParams::default()
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
