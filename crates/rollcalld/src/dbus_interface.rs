use crate::engine::{EngineHandle, PipelineError, RecognizeOutcome};
use chrono::Local;
use serde::Serialize;
use zbus::interface;

/// D-Bus interface for the Rollcall attendance daemon.
///
/// Bus name: org.rollcall.Attendance1
/// Object path: /org/rollcall/Attendance1
///
/// Every method returns a JSON envelope `{"status": "ok"|"error",
/// "message": ...}` — the documented failure kinds are structured
/// results, never an unhandled error surfaced to the bus.
pub struct AttendanceService {
    engine: EngineHandle,
    distance_threshold: f32,
}

impl AttendanceService {
    pub fn new(engine: EngineHandle, distance_threshold: f32) -> Self {
        Self { engine, distance_threshold }
    }
}

#[interface(name = "org.rollcall.Attendance1")]
impl AttendanceService {
    /// Enroll a face for the given identity. `class_id` may be empty.
    /// Re-enrollment overwrites the previous template.
    async fn enroll(&self, identity: &str, class_id: &str, image: &str) -> String {
        tracing::info!(identity, class_id, "enroll requested");
        let class_ref = (!class_id.is_empty()).then(|| class_id.to_string());
        match self.engine.enroll(identity.to_string(), class_ref, image.to_string()).await {
            Ok(outcome) => envelope_ok(format!("Face enrolled for {}.", outcome.identity)),
            Err(e) => envelope_err(describe(&e)),
        }
    }

    /// Recognize the face in the image and record attendance for the
    /// matched identity.
    async fn record_attendance(&self, image: &str) -> String {
        tracing::info!("attendance capture requested");
        match self.engine.recognize(image.to_string()).await {
            Ok(outcome) => attendance_envelope(outcome),
            Err(e) => envelope_err(describe(&e)),
        }
    }

    /// Daemon status: version, gallery size, acceptance threshold.
    async fn status(&self) -> String {
        let enrolled = match self.engine.status().await {
            Ok(status) => Some(status.enrolled),
            Err(e) => {
                tracing::warn!(error = %e, "status query failed");
                None
            }
        };
        serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "enrolled": enrolled,
            "distance_threshold": self.distance_threshold,
        })
        .to_string()
    }
}

#[derive(Serialize)]
struct Envelope {
    status: &'static str,
    message: String,
}

fn envelope(status: &'static str, message: String) -> String {
    serde_json::to_string(&Envelope { status, message }).unwrap_or_else(|_| {
        // Serializing two strings cannot realistically fail; keep the
        // boundary total anyway.
        r#"{"status":"error","message":"internal serialization failure"}"#.to_string()
    })
}

fn envelope_ok(message: String) -> String {
    envelope("ok", message)
}

fn envelope_err(message: String) -> String {
    envelope("error", message)
}

fn attendance_envelope(outcome: RecognizeOutcome) -> String {
    match (outcome.outcome.identity, outcome.receipt) {
        (Some(identity), Some(receipt)) => {
            let time = outcome.recorded_at.with_timezone(&Local).format("%H:%M:%S");
            if receipt.deduped {
                envelope_ok(format!("Attendance already recorded for {identity} today."))
            } else {
                envelope_ok(format!("Attendance recorded for {identity} at {time}."))
            }
        }
        _ => envelope_err("Face not recognized.".to_string()),
    }
}

/// Caller-facing message for each documented failure kind.
fn describe(error: &PipelineError) -> String {
    match error {
        PipelineError::Decode(e) => format!("Invalid image payload: {e}."),
        PipelineError::NoFaceDetected => "No face detected.".to_string(),
        PipelineError::NoEnrollments => "No faces enrolled yet.".to_string(),
        PipelineError::Roster(e) => {
            format!("Face template stored, but roster update failed: {e}.")
        }
        other => format!("Internal error: {other}."),
    }
}
