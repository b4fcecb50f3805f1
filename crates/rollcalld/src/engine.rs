use chrono::{DateTime, Utc};
use rollcall_core::decode::{decode_data_uri, DecodeError};
use rollcall_core::locator::{FaceLocator, LocatorError, SeetaFaceLocator};
use rollcall_core::model::{Lbph, RecognizerError};
use rollcall_core::normalize::crop_and_normalize;
use rollcall_core::RecognitionOutcome;
use rollcall_store::{
    AttendanceLedger, AttendanceReceipt, LedgerError, SqliteStore, StoreError, TemplateStore,
};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("image decode failed: {0}")]
    Decode(#[from] DecodeError),
    #[error("face locator error: {0}")]
    Locator(#[from] LocatorError),
    #[error("no face detected")]
    NoFaceDetected,
    #[error("no faces enrolled yet")]
    NoEnrollments,
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("template store error: {0}")]
    Store(#[from] StoreError),
    /// The template was already written when the roster update failed;
    /// it stays written. Enrollment is not transactional across the two.
    #[error("face template stored, but roster update failed: {0}")]
    Roster(LedgerError),
    #[error("attendance ledger error: {0}")]
    Ledger(#[from] LedgerError),
    #[error("engine thread exited")]
    ChannelClosed,
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Pipeline policy knobs, fixed at engine startup.
pub struct PipelineConfig {
    pub template_size: u32,
    pub distance_threshold: f32,
    pub lbph: Lbph,
}

/// Result of an enrollment request.
#[derive(Debug)]
pub struct EnrollOutcome {
    pub identity: String,
}

/// Result of a recognition request: the classification outcome plus the
/// ledger receipt when the match was accepted.
#[derive(Debug)]
pub struct RecognizeOutcome {
    pub outcome: RecognitionOutcome,
    pub receipt: Option<AttendanceReceipt>,
    pub recorded_at: DateTime<Utc>,
}

/// Daemon status snapshot.
pub struct EngineStatus {
    pub enrolled: u64,
}

/// Messages sent from D-Bus handlers to the engine thread.
enum EngineRequest {
    Enroll {
        identity: String,
        class_ref: Option<String>,
        payload: String,
        reply: oneshot::Sender<Result<EnrollOutcome, PipelineError>>,
    },
    Recognize {
        payload: String,
        reply: oneshot::Sender<Result<RecognizeOutcome, PipelineError>>,
    },
    Status {
        reply: oneshot::Sender<Result<EngineStatus, PipelineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Request enrollment: decode, locate, normalize, store the template,
    /// update the roster.
    pub async fn enroll(
        &self,
        identity: String,
        class_ref: Option<String>,
        payload: String,
    ) -> Result<EnrollOutcome, PipelineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Enroll { identity, class_ref, payload, reply: reply_tx })
            .await
            .map_err(|_| PipelineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| PipelineError::ChannelClosed)?
    }

    /// Request recognition: decode, locate, normalize, retrain from the
    /// full gallery, classify, threshold, record attendance on accept.
    pub async fn recognize(&self, payload: String) -> Result<RecognizeOutcome, PipelineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Recognize { payload, reply: reply_tx })
            .await
            .map_err(|_| PipelineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| PipelineError::ChannelClosed)?
    }

    pub async fn status(&self) -> Result<EngineStatus, PipelineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Status { reply: reply_tx })
            .await
            .map_err(|_| PipelineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| PipelineError::ChannelClosed)?
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// Opens the database, then constructs the detector inside the thread
/// (the detector is not `Send`) and acknowledges startup before the
/// handle is returned — missing model files fail here, not on the first
/// request.
pub fn spawn_engine(config: &crate::config::Config) -> Result<EngineHandle, PipelineError> {
    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let store = Arc::new(SqliteStore::open(&config.db_path)?);

    let pipeline = PipelineConfig {
        template_size: config.template_size,
        distance_threshold: config.distance_threshold,
        lbph: Lbph::new(config.lbph_params()),
    };
    let model_path = config.detector_model.clone();
    let detector_params = config.detector_params();

    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);
    let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<(), LocatorError>>();

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            let mut locator = match SeetaFaceLocator::load(&model_path, &detector_params) {
                Ok(locator) => {
                    let _ = ready_tx.send(Ok(()));
                    locator
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };

            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Enroll { identity, class_ref, payload, reply } => {
                        let result = run_enroll(
                            &mut locator,
                            store.as_ref(),
                            store.as_ref(),
                            &pipeline,
                            &identity,
                            class_ref.as_deref(),
                            &payload,
                        );
                        let _ = reply.send(result);
                    }
                    EngineRequest::Recognize { payload, reply } => {
                        let result = run_recognize(
                            &mut locator,
                            store.as_ref(),
                            store.as_ref(),
                            &pipeline,
                            &payload,
                        );
                        let _ = reply.send(result);
                    }
                    EngineRequest::Status { reply } => {
                        let result = store
                            .count()
                            .map(|enrolled| EngineStatus { enrolled })
                            .map_err(PipelineError::from);
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .expect("failed to spawn engine thread");

    ready_rx.recv().map_err(|_| PipelineError::ChannelClosed)??;

    Ok(EngineHandle { tx })
}

/// Enrollment: decode → locate → crop/normalize → store → roster.
///
/// Overwrite semantics: re-enrolling an identity replaces its template.
/// The roster write happens after the template write and is not rolled
/// back on failure; a roster error is reported as [`PipelineError::Roster`]
/// with the template left in place.
fn run_enroll(
    locator: &mut dyn FaceLocator,
    store: &dyn TemplateStore,
    ledger: &dyn AttendanceLedger,
    config: &PipelineConfig,
    identity: &str,
    class_ref: Option<&str>,
    payload: &str,
) -> Result<EnrollOutcome, PipelineError> {
    let frame = decode_data_uri(payload)?;
    let gray = frame.to_luma8();

    let regions = locator.locate(&gray)?;
    // First region wins: multi-face frames silently ignore all but one.
    let Some(region) = regions.first() else {
        return Err(PipelineError::NoFaceDetected);
    };

    let template = crop_and_normalize(&gray, region, config.template_size);
    store.put(identity, &template)?;

    tracing::info!(identity, region = ?region, "face template enrolled");

    ledger
        .record_enrollment(identity, class_ref, Utc::now())
        .map_err(PipelineError::Roster)?;

    Ok(EnrollOutcome { identity: identity.to_string() })
}

/// Recognition: decode → locate → crop/normalize → retrain from the
/// full gallery → classify → threshold → ledger on accept.
///
/// The model is retrained from the gallery on every request; the label
/// table is sealed inside the trained model, so a stale mapping can
/// never be paired with a fresh model (or vice versa).
fn run_recognize(
    locator: &mut dyn FaceLocator,
    store: &dyn TemplateStore,
    ledger: &dyn AttendanceLedger,
    config: &PipelineConfig,
    payload: &str,
) -> Result<RecognizeOutcome, PipelineError> {
    let frame = decode_data_uri(payload)?;
    let gray = frame.to_luma8();

    let regions = locator.locate(&gray)?;
    // First region wins, same policy as enrollment.
    let Some(region) = regions.first() else {
        return Err(PipelineError::NoFaceDetected);
    };

    let probe = crop_and_normalize(&gray, region, config.template_size);

    let gallery = store.list_all()?;
    if gallery.is_empty() {
        return Err(PipelineError::NoEnrollments);
    }

    let model = config.lbph.train(&gallery)?;
    let prediction = model.classify(&probe)?;
    let accepted = prediction.distance < config.distance_threshold;

    tracing::info!(
        identity = %prediction.identity,
        distance = prediction.distance,
        threshold = config.distance_threshold,
        accepted,
        gallery = gallery.len(),
        "probe classified"
    );

    let recorded_at = Utc::now();
    if accepted {
        let receipt = ledger.record_attendance(&prediction.identity, recorded_at)?;
        Ok(RecognizeOutcome {
            outcome: RecognitionOutcome {
                identity: Some(prediction.identity),
                distance: prediction.distance,
                accepted: true,
            },
            receipt: Some(receipt),
            recorded_at,
        })
    } else {
        Ok(RecognizeOutcome {
            outcome: RecognitionOutcome {
                identity: None,
                distance: prediction.distance,
                accepted: false,
            },
            receipt: None,
            recorded_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine as _;
    use image::{DynamicImage, GrayImage, ImageFormat};
    use rollcall_core::FaceRegion;
    use std::io::Cursor;

    /// Locator stub returning a fixed region list, in order.
    struct StubLocator {
        regions: Vec<FaceRegion>,
    }

    impl FaceLocator for StubLocator {
        fn locate(&mut self, _gray: &GrayImage) -> Result<Vec<FaceRegion>, LocatorError> {
            Ok(self.regions.clone())
        }
    }

    /// Ledger that always fails, for the non-transactional enrollment path.
    struct FailingLedger;

    impl AttendanceLedger for FailingLedger {
        fn record_enrollment(
            &self,
            _identity: &str,
            _class_ref: Option<&str>,
            _at: DateTime<Utc>,
        ) -> Result<(), LedgerError> {
            Err(LedgerError::Poisoned)
        }

        fn record_attendance(
            &self,
            _identity: &str,
            _at: DateTime<Utc>,
        ) -> Result<AttendanceReceipt, LedgerError> {
            Err(LedgerError::Poisoned)
        }

        fn lookup_identity(
            &self,
            _identity: &str,
        ) -> Result<Option<rollcall_store::PersonRef>, LedgerError> {
            Err(LedgerError::Poisoned)
        }
    }

    fn config(threshold: f32) -> PipelineConfig {
        PipelineConfig {
            template_size: 200,
            distance_threshold: threshold,
            lbph: Lbph::default(),
        }
    }

    fn data_uri(img: &GrayImage) -> String {
        let mut buf = Vec::new();
        DynamicImage::ImageLuma8(img.clone())
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        format!(
            "data:image/png;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(&buf)
        )
    }

    fn face_frame(seed: u32) -> GrayImage {
        GrayImage::from_fn(240, 240, |x, y| {
            image::Luma([((x * (seed + 1) + y * seed) % 251) as u8])
        })
    }

    fn full_region() -> FaceRegion {
        FaceRegion { x: 20, y: 20, width: 200, height: 200 }
    }

    fn horizontal_gradient_frame() -> GrayImage {
        GrayImage::from_fn(240, 240, |x, _| image::Luma([x as u8]))
    }

    fn vertical_gradient_frame() -> GrayImage {
        GrayImage::from_fn(240, 240, |_, y| image::Luma([y as u8]))
    }

    fn checkerboard_frame() -> GrayImage {
        GrayImage::from_fn(240, 240, |x, y| {
            image::Luma([if (x / 8 + y / 8) % 2 == 0 { 255 } else { 0 }])
        })
    }

    fn enroll(
        store: &SqliteStore,
        identity: &str,
        frame: &GrayImage,
        region: FaceRegion,
    ) -> Result<EnrollOutcome, PipelineError> {
        let mut locator = StubLocator { regions: vec![region] };
        run_enroll(
            &mut locator,
            store,
            store,
            &config(80.0),
            identity,
            None,
            &data_uri(frame),
        )
    }

    #[test]
    fn test_self_match_records_attendance() {
        let store = SqliteStore::open_in_memory().unwrap();
        let alice = face_frame(3);
        let bob = face_frame(7);
        enroll(&store, "alice", &alice, full_region()).unwrap();
        enroll(&store, "bob", &bob, full_region()).unwrap();

        let mut locator = StubLocator { regions: vec![full_region()] };
        let result =
            run_recognize(&mut locator, &store, &store, &config(80.0), &data_uri(&alice)).unwrap();

        assert!(result.outcome.accepted);
        assert_eq!(result.outcome.identity.as_deref(), Some("alice"));
        assert!(result.outcome.distance < 1e-6, "distance {}", result.outcome.distance);
        let receipt = result.receipt.unwrap();
        assert!(!receipt.deduped);
    }

    #[test]
    fn test_second_recognition_same_day_is_deduped() {
        let store = SqliteStore::open_in_memory().unwrap();
        let alice = face_frame(3);
        enroll(&store, "alice", &alice, full_region()).unwrap();

        let mut locator = StubLocator { regions: vec![full_region()] };
        let cfg = config(80.0);
        let first = run_recognize(&mut locator, &store, &store, &cfg, &data_uri(&alice)).unwrap();
        let second = run_recognize(&mut locator, &store, &store, &cfg, &data_uri(&alice)).unwrap();

        assert!(!first.receipt.unwrap().deduped);
        assert!(second.receipt.unwrap().deduped);
    }

    #[test]
    fn test_unenrolled_face_is_no_match_at_default_threshold() {
        // The alice/bob scenario at the shipped operating point
        // (threshold 80): a face sharing no texture with either enrolled
        // template must be rejected, not attributed to whichever enrolled
        // identity happens to be nearest.
        let store = SqliteStore::open_in_memory().unwrap();
        enroll(&store, "alice", &horizontal_gradient_frame(), full_region()).unwrap();
        enroll(&store, "bob", &vertical_gradient_frame(), full_region()).unwrap();

        let mut locator = StubLocator { regions: vec![full_region()] };
        let result = run_recognize(
            &mut locator,
            &store,
            &store,
            &config(80.0),
            &data_uri(&checkerboard_frame()),
        )
        .unwrap();

        assert!(!result.outcome.accepted);
        assert!(result.outcome.identity.is_none());
        assert!(
            result.outcome.distance > 80.0,
            "unenrolled probe landed at distance {}",
            result.outcome.distance
        );
        assert!(result.receipt.is_none());
    }

    #[test]
    fn test_unenrolled_face_is_no_match() {
        let store = SqliteStore::open_in_memory().unwrap();
        enroll(&store, "alice", &face_frame(3), full_region()).unwrap();
        enroll(&store, "bob", &face_frame(7), full_region()).unwrap();

        // Strict threshold: anything but an exact template reproduction
        // is rejected.
        let mut locator = StubLocator { regions: vec![full_region()] };
        let result =
            run_recognize(&mut locator, &store, &store, &config(1e-3), &data_uri(&face_frame(11)))
                .unwrap();

        assert!(!result.outcome.accepted);
        assert!(result.outcome.identity.is_none());
        assert!(result.outcome.distance > 0.0);
        assert!(result.receipt.is_none());
    }

    #[test]
    fn test_empty_gallery_is_no_enrollments_not_no_match() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut locator = StubLocator { regions: vec![full_region()] };
        let err =
            run_recognize(&mut locator, &store, &store, &config(80.0), &data_uri(&face_frame(3)))
                .unwrap_err();
        assert!(matches!(err, PipelineError::NoEnrollments));
    }

    #[test]
    fn test_no_face_detected_in_both_services() {
        let store = SqliteStore::open_in_memory().unwrap();
        enroll(&store, "alice", &face_frame(3), full_region()).unwrap();

        let frame = data_uri(&face_frame(5));
        let cfg = config(80.0);

        let mut empty = StubLocator { regions: vec![] };
        let err = run_recognize(&mut empty, &store, &store, &cfg, &frame).unwrap_err();
        assert!(matches!(err, PipelineError::NoFaceDetected));

        let mut empty = StubLocator { regions: vec![] };
        let err = run_enroll(&mut empty, &store, &store, &cfg, "carol", None, &frame).unwrap_err();
        assert!(matches!(err, PipelineError::NoFaceDetected));
        assert!(store.get("carol").unwrap().is_none());
    }

    #[test]
    fn test_enrollment_overwrites_previous_template() {
        let store = SqliteStore::open_in_memory().unwrap();
        let first = face_frame(3);
        let second = face_frame(9);
        enroll(&store, "alice", &first, full_region()).unwrap();
        enroll(&store, "alice", &second, full_region()).unwrap();

        assert_eq!(store.count().unwrap(), 1);
        let stored = store.get("alice").unwrap().unwrap();
        let expected = crop_and_normalize(&second, &full_region(), 200);
        assert_eq!(stored.pixels.as_raw(), expected.as_raw());
    }

    #[test]
    fn test_first_face_wins_over_later_regions() {
        let store = SqliteStore::open_in_memory().unwrap();
        let frame = face_frame(3);
        let first_region = FaceRegion { x: 0, y: 0, width: 120, height: 120 };
        let other_region = FaceRegion { x: 120, y: 120, width: 120, height: 120 };
        enroll(&store, "alice", &frame, first_region.clone()).unwrap();

        // Both regions reported; only a probe cut from the FIRST one
        // reproduces the enrolled template exactly.
        let mut locator = StubLocator { regions: vec![first_region, other_region] };
        let result =
            run_recognize(&mut locator, &store, &store, &config(1e-3), &data_uri(&frame)).unwrap();

        assert!(result.outcome.accepted);
        assert_eq!(result.outcome.identity.as_deref(), Some("alice"));
    }

    #[test]
    fn test_decode_failure_short_circuits() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut locator = StubLocator { regions: vec![full_region()] };
        let err = run_recognize(
            &mut locator,
            &store,
            &store,
            &config(80.0),
            "data:image/png;base64,@@@",
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::Decode(_)));
    }

    #[test]
    fn test_roster_failure_leaves_template_written() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut locator = StubLocator { regions: vec![full_region()] };
        let err = run_enroll(
            &mut locator,
            &store,
            &FailingLedger,
            &config(80.0),
            "alice",
            Some("math-101"),
            &data_uri(&face_frame(3)),
        )
        .unwrap_err();

        assert!(matches!(err, PipelineError::Roster(_)));
        // Look-aside behavior: the template write is not rolled back.
        assert!(store.get("alice").unwrap().is_some());
    }
}
