//! The attendance session engine.
//!
//! A dedicated OS thread owns the camera stream, the ONNX pipeline, the
//! gallery, the tracker, and the attendance store; async callers reach it
//! through a clone-safe [`SessionHandle`]. The thread runs the capture
//! loop at a fixed cadence and services control requests between ticks.

use crate::config::Config;
use crate::store::{AttendanceRecord, Store, StoreError};
use rollcall_core::pipeline::PipelineError;
use rollcall_core::{
    AttendanceMark, BoundingBox, Descriptor, EuclideanMatcher, FacePipeline, Gallery, MatchResult,
    Matcher, SessionTracker,
};
use rollcall_hw::{Camera, CameraError, CameraStream, Frame};
use serde::Serialize;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("session thread exited")]
    ChannelClosed,
}

/// Source of live frames. The camera stream in production; scripted
/// frames in tests.
pub trait FrameSource {
    fn frame(&mut self) -> Result<Frame, CameraError>;
}

impl FrameSource for CameraStream<'_> {
    fn frame(&mut self) -> Result<Frame, CameraError> {
        self.grab()
    }
}

/// Face detection and descriptor extraction over frames and stills.
pub trait Vision {
    fn detect(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<BoundingBox>, PipelineError>;

    fn descriptor(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
        face: &BoundingBox,
    ) -> Result<Descriptor, PipelineError>;

    fn descriptor_from_still(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Option<Descriptor>, PipelineError>;
}

impl Vision for FacePipeline {
    fn detect(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<BoundingBox>, PipelineError> {
        FacePipeline::detect(self, frame, width, height)
    }

    fn descriptor(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
        face: &BoundingBox,
    ) -> Result<Descriptor, PipelineError> {
        FacePipeline::descriptor(self, frame, width, height, face)
    }

    fn descriptor_from_still(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Option<Descriptor>, PipelineError> {
        FacePipeline::descriptor_from_still(self, frame, width, height)
    }
}

/// Downstream sink for first-sighting attendance marks.
pub trait AttendanceSink {
    fn append(&mut self, session_id: &str, mark: &AttendanceMark) -> Result<(), StoreError>;
    fn recent(&self, limit: usize) -> Result<Vec<AttendanceRecord>, StoreError>;
}

impl AttendanceSink for Store {
    fn append(&mut self, session_id: &str, mark: &AttendanceMark) -> Result<(), StoreError> {
        self.record_attendance(session_id, mark)
    }

    fn recent(&self, limit: usize) -> Result<Vec<AttendanceRecord>, StoreError> {
        self.recent_attendance(limit)
    }
}

/// One draw command on the display surface.
#[derive(Debug, Clone, Serialize)]
pub struct OverlayBox {
    #[serde(flatten)]
    pub region: BoundingBox,
    pub label: String,
}

/// The display surface: retains the most recent tick's draw commands
/// (box + label, in display coordinates) for status queries.
#[derive(Debug, Default)]
pub struct StatusOverlay {
    boxes: Vec<OverlayBox>,
}

impl StatusOverlay {
    fn clear(&mut self) {
        self.boxes.clear();
    }

    fn draw(&mut self, region: BoundingBox, label: &str) {
        self.boxes.push(OverlayBox {
            region,
            label: label.to_string(),
        });
    }

    pub fn boxes(&self) -> &[OverlayBox] {
        &self.boxes
    }
}

/// Point-in-time session state.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub session_id: String,
    pub gallery_size: usize,
    pub seen: Vec<String>,
    pub seen_count: usize,
    pub ticks: u64,
    pub overlay: Vec<OverlayBox>,
}

/// Control requests serviced by the session thread between ticks.
enum SessionRequest {
    Status {
        reply: oneshot::Sender<SessionStatus>,
    },
    Log {
        reply: oneshot::Sender<Vec<String>>,
    },
    History {
        limit: usize,
        reply: oneshot::Sender<Result<Vec<AttendanceRecord>, StoreError>>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
}

/// Clone-safe handle to the session thread.
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<SessionRequest>,
}

impl SessionHandle {
    pub async fn status(&self) -> Result<SessionStatus, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(SessionRequest::Status { reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    pub async fn log(&self) -> Result<Vec<String>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(SessionRequest::Log { reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    pub async fn history(&self, limit: usize) -> Result<Vec<AttendanceRecord>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(SessionRequest::History {
                limit,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        Ok(reply_rx.await.map_err(|_| EngineError::ChannelClosed)??)
    }

    /// End the session: the capture loop stops scheduling ticks and the
    /// camera is released before this returns.
    pub async fn stop(&self) -> Result<(), EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(SessionRequest::Stop { reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }
}

/// One live session: the gallery is read-only from here on, the tracker
/// and overlay are only touched by the session thread.
pub(crate) struct Session<F, V, S> {
    frames: F,
    vision: V,
    matcher: EuclideanMatcher,
    gallery: Gallery,
    tracker: SessionTracker,
    overlay: StatusOverlay,
    sink: S,
    session_id: String,
    match_threshold: f32,
    display: (u32, u32),
    ticks: u64,
}

impl<F: FrameSource, V: Vision, S: AttendanceSink> Session<F, V, S> {
    pub(crate) fn new(
        frames: F,
        vision: V,
        gallery: Gallery,
        sink: S,
        session_id: String,
        match_threshold: f32,
        display: (u32, u32),
    ) -> Self {
        Self {
            frames,
            vision,
            matcher: EuclideanMatcher,
            gallery,
            tracker: SessionTracker::new(),
            overlay: StatusOverlay::default(),
            sink,
            session_id,
            match_threshold,
            display,
            ticks: 0,
        }
    }

    /// One capture tick: grab the current frame, match every detected
    /// face, draw the overlay, and record first sightings. Every failure
    /// in here is logged and swallowed; the session keeps running.
    pub(crate) fn run_tick(&mut self) {
        self.ticks += 1;

        let frame = match self.frames.frame() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!(error = %e, "frame grab failed; tick skipped");
                return;
            }
        };

        if frame.is_dark {
            tracing::debug!(seq = frame.sequence, "dark frame; tick skipped");
            return;
        }

        let faces = match self.vision.detect(&frame.data, frame.width, frame.height) {
            Ok(faces) => faces,
            Err(e) => {
                tracing::debug!(error = %e, "face detection failed; tick skipped");
                return;
            }
        };

        let sx = self.display.0 as f32 / frame.width as f32;
        let sy = self.display.1 as f32 / frame.height as f32;
        self.overlay.clear();

        for face in &faces {
            let result = match self
                .vision
                .descriptor(&frame.data, frame.width, frame.height, face)
            {
                Ok(descriptor) => {
                    self.matcher
                        .closest(&self.gallery, &descriptor, self.match_threshold)
                }
                Err(e) => {
                    tracing::debug!(error = %e, "descriptor extraction failed for face");
                    MatchResult::Unknown { distance: None }
                }
            };

            self.overlay.draw(face.scaled(sx, sy), result.label());

            if let Some(mark) = self.tracker.record(&result) {
                tracing::info!(
                    person = %mark.person_id,
                    label = %mark.label,
                    "attendance recorded"
                );
                if let Err(e) = self.sink.append(&self.session_id, &mark) {
                    tracing::warn!(
                        error = %e,
                        person = %mark.person_id,
                        "failed to persist attendance record"
                    );
                }
            }
        }
    }

    fn status(&self) -> SessionStatus {
        let mut seen: Vec<String> = self.tracker.seen().iter().cloned().collect();
        seen.sort();
        SessionStatus {
            session_id: self.session_id.clone(),
            gallery_size: self.gallery.len(),
            seen_count: seen.len(),
            seen,
            ticks: self.ticks,
            overlay: self.overlay.boxes().to_vec(),
        }
    }

    /// Service one control request. Returns true when the session should
    /// stop.
    fn handle_request(&mut self, request: SessionRequest) -> bool {
        match request {
            SessionRequest::Status { reply } => {
                let _ = reply.send(self.status());
                false
            }
            SessionRequest::Log { reply } => {
                let _ = reply.send(self.tracker.entries().to_vec());
                false
            }
            SessionRequest::History { limit, reply } => {
                let _ = reply.send(self.sink.recent(limit));
                false
            }
            SessionRequest::Stop { reply } => {
                let _ = reply.send(());
                true
            }
        }
    }
}

/// The session thread body: deadline-paced ticks with control requests
/// drained in between. Returning drops the session, which releases the
/// capture stream and camera.
pub(crate) fn run_loop<F: FrameSource, V: Vision, S: AttendanceSink>(
    mut session: Session<F, V, S>,
    mut rx: mpsc::Receiver<SessionRequest>,
    tick: Duration,
) {
    let mut next_tick = Instant::now();

    loop {
        loop {
            match rx.try_recv() {
                Ok(request) => {
                    if session.handle_request(request) {
                        tracing::info!(session = %session.session_id, "session stopped");
                        return;
                    }
                }
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    tracing::info!(
                        session = %session.session_id,
                        "all session handles dropped; stopping"
                    );
                    return;
                }
            }
        }

        let now = Instant::now();
        if now < next_tick {
            std::thread::sleep(next_tick - now);
        }

        session.run_tick();

        next_tick += tick;
        // A tick that overran its slot re-bases the schedule: at most one
        // detection pass in flight, never a backlog of missed ticks.
        if next_tick < Instant::now() {
            next_tick = Instant::now();
        }
    }
}

/// Spawn the session on a dedicated OS thread.
///
/// The thread opens the capture stream and discards warmup frames before
/// success is reported, so a capture failure surfaces here and never
/// leaves a ticking loop behind.
pub fn spawn_session(
    camera: Camera,
    pipeline: FacePipeline,
    gallery: Gallery,
    store: Store,
    config: &Config,
) -> Result<SessionHandle, EngineError> {
    let session_id = Uuid::new_v4().to_string();
    let (tx, rx) = mpsc::channel::<SessionRequest>(8);
    let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<(), EngineError>>();

    let tick = Duration::from_millis(config.tick_ms);
    let warmup = config.warmup_frames;
    let match_threshold = config.match_threshold;
    let display = (config.display_width, config.display_height);
    let thread_session_id = session_id.clone();

    std::thread::Builder::new()
        .name("rollcall-session".into())
        .spawn(move || {
            let mut stream = match camera.stream() {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = ready_tx.send(Err(e.into()));
                    return;
                }
            };

            if warmup > 0 {
                tracing::debug!(count = warmup, "discarding warmup frames");
                for _ in 0..warmup {
                    let _ = stream.grab();
                }
            }
            let _ = ready_tx.send(Ok(()));

            let session = Session::new(
                stream,
                pipeline,
                gallery,
                store,
                thread_session_id,
                match_threshold,
                display,
            );
            run_loop(session, rx, tick);
        })
        .expect("failed to spawn session thread");

    ready_rx.recv().map_err(|_| EngineError::ChannelClosed)??;
    tracing::info!(session = %session_id, tick_ms = config.tick_ms, "session started");
    Ok(SessionHandle { tx })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::detector::DetectorError;
    use rollcall_core::types::LabeledDescriptors;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn desc(values: &[f32]) -> Descriptor {
        Descriptor::new(values.to_vec())
    }

    fn face_at(x: f32) -> BoundingBox {
        BoundingBox {
            x,
            y: 10.0,
            width: 20.0,
            height: 20.0,
            confidence: 0.9,
        }
    }

    fn bright_frame(sequence: u32) -> Frame {
        Frame {
            data: vec![128u8; 64],
            width: 8,
            height: 8,
            timestamp: Instant::now(),
            sequence,
            is_dark: false,
        }
    }

    fn ana_gallery() -> Gallery {
        let mut gallery = Gallery::new();
        gallery.insert(
            LabeledDescriptors::new("p1", "Ana", vec![desc(&[0.0, 0.0])]).unwrap(),
        );
        gallery
    }

    /// Endless bright frames; counts drops so teardown can be verified.
    struct ScriptedFrames {
        sequence: u32,
        released: Arc<AtomicUsize>,
    }

    impl ScriptedFrames {
        fn new(released: Arc<AtomicUsize>) -> Self {
            Self {
                sequence: 0,
                released,
            }
        }
    }

    impl FrameSource for ScriptedFrames {
        fn frame(&mut self) -> Result<Frame, CameraError> {
            self.sequence += 1;
            Ok(bright_frame(self.sequence))
        }
    }

    impl Drop for ScriptedFrames {
        fn drop(&mut self) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Returns the same scripted faces every tick.
    struct FakeVision {
        faces: Vec<(BoundingBox, Descriptor)>,
    }

    impl Vision for FakeVision {
        fn detect(
            &mut self,
            _frame: &[u8],
            _width: u32,
            _height: u32,
        ) -> Result<Vec<BoundingBox>, PipelineError> {
            Ok(self.faces.iter().map(|(b, _)| b.clone()).collect())
        }

        fn descriptor(
            &mut self,
            _frame: &[u8],
            _width: u32,
            _height: u32,
            face: &BoundingBox,
        ) -> Result<Descriptor, PipelineError> {
            self.faces
                .iter()
                .find(|(b, _)| b.x == face.x)
                .map(|(_, d)| Ok(d.clone()))
                .unwrap_or_else(|| {
                    Err(PipelineError::Detector(DetectorError::InferenceFailed(
                        "no scripted descriptor".into(),
                    )))
                })
        }

        fn descriptor_from_still(
            &mut self,
            _frame: &[u8],
            _width: u32,
            _height: u32,
        ) -> Result<Option<Descriptor>, PipelineError> {
            Ok(None)
        }
    }

    #[derive(Clone, Default)]
    struct SharedSink {
        records: Arc<Mutex<Vec<AttendanceMark>>>,
    }

    impl AttendanceSink for SharedSink {
        fn append(&mut self, _session_id: &str, mark: &AttendanceMark) -> Result<(), StoreError> {
            self.records.lock().unwrap().push(mark.clone());
            Ok(())
        }

        fn recent(&self, _limit: usize) -> Result<Vec<AttendanceRecord>, StoreError> {
            Ok(Vec::new())
        }
    }

    fn test_session(
        faces: Vec<(BoundingBox, Descriptor)>,
        gallery: Gallery,
        sink: SharedSink,
        released: Arc<AtomicUsize>,
    ) -> Session<ScriptedFrames, FakeVision, SharedSink> {
        Session::new(
            ScriptedFrames::new(released),
            FakeVision { faces },
            gallery,
            sink,
            "session-test".into(),
            0.5,
            (16, 16), // 2x the 8x8 test frame
        )
    }

    #[test]
    fn test_repeated_sightings_record_once() {
        // Three consecutive ticks of the same face: one entry, one record.
        let sink = SharedSink::default();
        let mut session = test_session(
            vec![(face_at(1.0), desc(&[0.0, 0.0]))],
            ana_gallery(),
            sink.clone(),
            Arc::new(AtomicUsize::new(0)),
        );

        for _ in 0..3 {
            session.run_tick();
        }

        assert_eq!(
            session.tracker.entries(),
            ["Attendance added successfully for Ana"]
        );
        assert_eq!(session.tracker.seen_count(), 1);
        assert!(session.tracker.is_seen("p1"));
        assert_eq!(sink.records.lock().unwrap().len(), 1);
        assert_eq!(session.ticks, 3);
    }

    #[test]
    fn test_multi_face_tick_records_known_renders_both() {
        let sink = SharedSink::default();
        let mut session = test_session(
            vec![
                (face_at(1.0), desc(&[0.0, 0.0])), // Ana
                (face_at(50.0), desc(&[9.0, 9.0])), // nobody enrolled
            ],
            ana_gallery(),
            sink.clone(),
            Arc::new(AtomicUsize::new(0)),
        );

        session.run_tick();

        assert_eq!(session.tracker.entries().len(), 1);
        assert_eq!(sink.records.lock().unwrap().len(), 1);

        let boxes = session.overlay.boxes();
        assert_eq!(boxes.len(), 2);
        assert_eq!(boxes[0].label, "Ana");
        assert_eq!(boxes[1].label, "unknown");
    }

    #[test]
    fn test_overlay_scaled_to_display_coordinates() {
        let mut session = test_session(
            vec![(face_at(2.0), desc(&[0.0, 0.0]))],
            ana_gallery(),
            SharedSink::default(),
            Arc::new(AtomicUsize::new(0)),
        );

        session.run_tick();

        // Display is 2x the frame on both axes.
        let drawn = &session.overlay.boxes()[0].region;
        assert_eq!(drawn.x, 4.0);
        assert_eq!(drawn.y, 20.0);
        assert_eq!(drawn.width, 40.0);
    }

    #[test]
    fn test_empty_gallery_everything_unknown() {
        let sink = SharedSink::default();
        let mut session = test_session(
            vec![(face_at(1.0), desc(&[0.0, 0.0]))],
            Gallery::new(),
            sink.clone(),
            Arc::new(AtomicUsize::new(0)),
        );

        session.run_tick();

        assert!(session.tracker.entries().is_empty());
        assert!(sink.records.lock().unwrap().is_empty());
        assert_eq!(session.overlay.boxes()[0].label, "unknown");
    }

    #[test]
    fn test_descriptor_failure_renders_unknown_and_continues() {
        // A vision whose descriptor extraction always fails.
        struct NoDescriptors;
        impl Vision for NoDescriptors {
            fn detect(
                &mut self,
                _f: &[u8],
                _w: u32,
                _h: u32,
            ) -> Result<Vec<BoundingBox>, PipelineError> {
                Ok(vec![BoundingBox {
                    x: 1.0,
                    y: 1.0,
                    width: 2.0,
                    height: 2.0,
                    confidence: 0.9,
                }])
            }
            fn descriptor(
                &mut self,
                _f: &[u8],
                _w: u32,
                _h: u32,
                _face: &BoundingBox,
            ) -> Result<Descriptor, PipelineError> {
                Err(PipelineError::Detector(DetectorError::InferenceFailed(
                    "scripted failure".into(),
                )))
            }
            fn descriptor_from_still(
                &mut self,
                _f: &[u8],
                _w: u32,
                _h: u32,
            ) -> Result<Option<Descriptor>, PipelineError> {
                Ok(None)
            }
        }

        let released = Arc::new(AtomicUsize::new(0));
        let mut session = Session::new(
            ScriptedFrames::new(released),
            NoDescriptors,
            ana_gallery(),
            SharedSink::default(),
            "session-test".into(),
            0.5,
            (8, 8),
        );

        session.run_tick();

        assert!(session.tracker.entries().is_empty());
        assert_eq!(session.overlay.boxes().len(), 1);
        assert_eq!(session.overlay.boxes()[0].label, "unknown");
        assert_eq!(session.ticks, 1);
    }

    #[tokio::test]
    async fn test_stop_halts_ticks_and_releases_device_once() {
        let released = Arc::new(AtomicUsize::new(0));
        let sink = SharedSink::default();
        let session = test_session(
            vec![(face_at(1.0), desc(&[0.0, 0.0]))],
            ana_gallery(),
            sink,
            released.clone(),
        );

        let (tx, rx) = mpsc::channel(8);
        let handle = SessionHandle { tx };
        let thread = std::thread::spawn(move || {
            run_loop(session, rx, Duration::from_millis(5));
        });

        tokio::time::sleep(Duration::from_millis(40)).await;
        let status = handle.status().await.unwrap();
        assert!(status.ticks >= 1);

        handle.stop().await.unwrap();
        thread.join().unwrap();

        // The frame source (and with it the capture device) was released
        // exactly once, and no further ticks can fire.
        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert!(handle.status().await.is_err());
    }

    #[tokio::test]
    async fn test_dropping_all_handles_ends_the_session() {
        let released = Arc::new(AtomicUsize::new(0));
        let session = test_session(
            Vec::new(),
            Gallery::new(),
            SharedSink::default(),
            released.clone(),
        );

        let (tx, rx) = mpsc::channel(8);
        let thread = std::thread::spawn(move || {
            run_loop(session, rx, Duration::from_millis(5));
        });

        drop(tx);
        thread.join().unwrap();
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }
}
