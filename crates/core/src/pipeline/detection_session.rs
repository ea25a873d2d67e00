use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};
use thiserror::Error;

use crate::annotation::domain::frame_annotator::FrameAnnotator;
use crate::capture::domain::frame_source::{CaptureError, FrameSource};
use crate::detection::domain::cadence::DetectionPass;
use crate::detection::domain::classifier_loader::{ClassifierLoader, LoadError};
use crate::detection::domain::ensemble::CascadeEnsemble;
use crate::pipeline::frame_pipeline::FramePipeline;
use crate::pipeline::pipeline_logger::PipelineLogger;
use crate::shared::constants::SESSION_EVENT_CAPACITY;
use crate::shared::face_box::FaceBox;
use crate::shared::frame::Frame;
use crate::shared::settings::{DetectionSettings, SettingsError};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("primary detector unavailable: {0}")]
    PrimaryDetector(#[from] LoadError),
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error("failed to spawn detection thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("detection thread panicked")]
    Panicked,
}

/// The most recent annotated frame of a session.
#[derive(Clone, Debug)]
pub struct PublishedFrame {
    pub index: u64,
    pub frame: Frame,
    pub faces: Vec<FaceBox>,
    pub pass: DetectionPass,
}

/// Single-entry mailbox between the producer and any number of readers.
/// Publishing replaces whatever was there; readers get a copy.
#[derive(Default)]
pub struct FrameSlot {
    latest: Mutex<Option<PublishedFrame>>,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, frame: PublishedFrame) {
        *self.latest.lock().unwrap_or_else(PoisonError::into_inner) = Some(frame);
    }

    pub fn latest(&self) -> Option<PublishedFrame> {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum EndReason {
    Stopped,
    CaptureFailed(String),
}

/// Progress notifications from the producer thread. Sent without
/// blocking; when nobody drains the channel, events are dropped.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    FrameProcessed {
        index: u64,
        faces: usize,
        pass: DetectionPass,
    },
    FrameSkipped {
        index: u64,
        reason: String,
    },
    Ended(EndReason),
}

type ProducerHandle = JoinHandle<(Box<dyn FrameSource>, Box<dyn PipelineLogger>)>;

/// A running camera stream: one producer thread feeding one pipeline and
/// publishing into one shared slot.
///
/// Stopping is cooperative. The producer checks the running flag before
/// each frame; [`DetectionSession::stop`] clears it, joins the thread and
/// only then releases the capture device. A failed read releases the
/// device from the producer before `Ended` is sent. Dropping a session
/// stops it.
pub struct DetectionSession {
    running: Arc<AtomicBool>,
    slot: Arc<FrameSlot>,
    events: Receiver<SessionEvent>,
    producer: Option<ProducerHandle>,
}

impl DetectionSession {
    /// Loads the ensemble, acquires the capture source and starts the
    /// producer. Classifiers load before the camera is touched, so a
    /// missing primary model never opens the device.
    pub fn open<F>(
        loader: &dyn ClassifierLoader,
        open_source: F,
        annotator: Box<dyn FrameAnnotator>,
        settings: &DetectionSettings,
        logger: Box<dyn PipelineLogger>,
    ) -> Result<Self, SessionError>
    where
        F: FnOnce() -> Result<Box<dyn FrameSource>, CaptureError>,
    {
        let ensemble = CascadeEnsemble::load(loader)?;
        let pipeline = FramePipeline::new(ensemble, annotator, settings)?;
        let source = open_source()?;
        Self::start(pipeline, source, logger)
    }

    pub fn start(
        pipeline: FramePipeline,
        source: Box<dyn FrameSource>,
        logger: Box<dyn PipelineLogger>,
    ) -> Result<Self, SessionError> {
        let running = Arc::new(AtomicBool::new(true));
        let slot = Arc::new(FrameSlot::new());
        let (event_tx, events) = crossbeam_channel::bounded(SESSION_EVENT_CAPACITY);

        let producer = Producer {
            pipeline,
            source,
            logger,
            running: running.clone(),
            slot: slot.clone(),
            events: event_tx,
        };
        let handle = std::thread::Builder::new()
            .name("facecascade-producer".into())
            .spawn(move || producer.run())
            .map_err(SessionError::Spawn)?;

        log::info!("Detection session started");
        Ok(Self {
            running,
            slot,
            events,
            producer: Some(handle),
        })
    }

    /// False once stop was requested or the capture source failed.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn latest(&self) -> Option<PublishedFrame> {
        self.slot.latest()
    }

    /// Shared handle for readers that outlive a borrow of the session.
    pub fn slot(&self) -> Arc<FrameSlot> {
        self.slot.clone()
    }

    pub fn events(&self) -> &Receiver<SessionEvent> {
        &self.events
    }

    pub fn stop(mut self) -> Result<(), SessionError> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<(), SessionError> {
        self.running.store(false, Ordering::Release);
        let Some(handle) = self.producer.take() else {
            return Ok(());
        };
        let (mut source, logger) = handle.join().map_err(|_| SessionError::Panicked)?;
        source.release();
        logger.summary();
        log::info!("Detection session stopped");
        Ok(())
    }
}

impl Drop for DetectionSession {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::warn!("Detection session did not shut down cleanly: {e}");
        }
    }
}

struct Producer {
    pipeline: FramePipeline,
    source: Box<dyn FrameSource>,
    logger: Box<dyn PipelineLogger>,
    running: Arc<AtomicBool>,
    slot: Arc<FrameSlot>,
    events: Sender<SessionEvent>,
}

impl Producer {
    fn run(mut self) -> (Box<dyn FrameSource>, Box<dyn PipelineLogger>) {
        let reason = loop {
            if !self.running.load(Ordering::Acquire) {
                break EndReason::Stopped;
            }
            let frame = match self.source.read_frame() {
                Ok(frame) => frame,
                Err(e) => {
                    log::warn!("Capture read failed, ending session: {e}");
                    self.running.store(false, Ordering::Release);
                    self.source.release();
                    break EndReason::CaptureFailed(e.to_string());
                }
            };
            self.process(&frame);
        };
        self.notify(SessionEvent::Ended(reason));
        (self.source, self.logger)
    }

    fn process(&mut self, frame: &Frame) {
        let result = self
            .pipeline
            .process_stream_frame(frame, self.logger.as_mut());
        let index = self.pipeline.cadence().frames_seen().saturating_sub(1);

        match result {
            Ok(outcome) => {
                let event = SessionEvent::FrameProcessed {
                    index,
                    faces: outcome.faces.len(),
                    pass: outcome.pass,
                };
                self.slot.publish(PublishedFrame {
                    index,
                    frame: outcome.frame,
                    faces: outcome.faces,
                    pass: outcome.pass,
                });
                self.notify(event);
            }
            Err(e) => {
                log::warn!("Skipping frame {index}: {e}");
                self.notify(SessionEvent::FrameSkipped {
                    index,
                    reason: e.to_string(),
                });
            }
        }
    }

    fn notify(&self, event: SessionEvent) {
        if self.events.try_send(event).is_err() {
            log::trace!("Session event dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::infrastructure::box_annotator::BoxAnnotator;
    use crate::detection::domain::cascade_classifier::{
        CascadeClassifier, DetectError, DetectionParams,
    };
    use crate::detection::domain::classifier_loader::CascadeModel;
    use crate::pipeline::pipeline_logger::NullPipelineLogger;
    use image::GrayImage;
    use std::path::PathBuf;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(10);

    #[derive(Default)]
    struct SourceState {
        reads: AtomicUsize,
        released: AtomicBool,
        read_after_release: AtomicBool,
    }

    /// Yields `limit` frames (unbounded when `None`), then a read error.
    struct FakeSource {
        limit: Option<usize>,
        state: Arc<SourceState>,
    }

    impl FrameSource for FakeSource {
        fn read_frame(&mut self) -> Result<Frame, CaptureError> {
            if self.state.released.load(Ordering::SeqCst) {
                self.state.read_after_release.store(true, Ordering::SeqCst);
                return Err(CaptureError::Closed);
            }
            let n = self.state.reads.fetch_add(1, Ordering::SeqCst);
            if self.limit.is_some_and(|limit| n >= limit) {
                return Err(CaptureError::Read("camera unplugged".into()));
            }
            std::thread::sleep(Duration::from_millis(1));
            let img = image::RgbImage::from_fn(32, 32, |x, y| image::Rgb([(x * 8) as u8, (y * 8) as u8, 90]));
            Ok(Frame::from_rgb_image(img, n as u64))
        }

        fn release(&mut self) {
            self.state.released.store(true, Ordering::SeqCst);
        }
    }

    struct OneFace;

    impl CascadeClassifier for OneFace {
        fn detect(&mut self, _: &GrayImage, _: &DetectionParams) -> Result<Vec<FaceBox>, DetectError> {
            Ok(vec![FaceBox::new(4, 4, 20, 20)])
        }
    }

    struct FakeLoader {
        primary_missing: bool,
    }

    impl ClassifierLoader for FakeLoader {
        fn backend_name(&self) -> &'static str {
            "fake"
        }

        fn load(&self, model: CascadeModel) -> Result<Box<dyn CascadeClassifier>, LoadError> {
            if self.primary_missing || model != CascadeModel::FrontalDefault {
                return Err(LoadError::Missing {
                    model,
                    path: PathBuf::from("/nowhere"),
                });
            }
            Ok(Box::new(OneFace))
        }
    }

    fn start_session(limit: Option<usize>) -> (DetectionSession, Arc<SourceState>) {
        let state = Arc::new(SourceState::default());
        let source = FakeSource {
            limit,
            state: state.clone(),
        };
        let session = DetectionSession::open(
            &FakeLoader {
                primary_missing: false,
            },
            || Ok(Box::new(source) as Box<dyn FrameSource>),
            Box::new(BoxAnnotator::new()),
            &DetectionSettings::default(),
            Box::new(NullPipelineLogger),
        )
        .unwrap();
        (session, state)
    }

    fn wait_for_end(session: &DetectionSession) -> EndReason {
        loop {
            match session.events().recv_timeout(WAIT).unwrap() {
                SessionEvent::Ended(reason) => return reason,
                _ => continue,
            }
        }
    }

    #[test]
    fn test_frame_slot_last_writer_wins() {
        let slot = FrameSlot::new();
        assert!(slot.latest().is_none());
        for index in 0..3 {
            slot.publish(PublishedFrame {
                index,
                frame: Frame::new(vec![0; 3], 1, 1, 3, index),
                faces: Vec::new(),
                pass: DetectionPass::Fast,
            });
        }
        assert_eq!(slot.latest().unwrap().index, 2);
    }

    #[test]
    fn test_capture_failure_ends_session() {
        let (session, state) = start_session(Some(3));

        assert_eq!(
            wait_for_end(&session),
            EndReason::CaptureFailed("failed to read frame: camera unplugged".into())
        );
        assert!(!session.is_running());

        let latest = session.latest().unwrap();
        assert_eq!(latest.index, 2);
        assert_eq!(latest.faces, vec![FaceBox::new(4, 4, 20, 20)]);

        session.stop().unwrap();
        assert!(state.released.load(Ordering::SeqCst));
        assert!(!state.read_after_release.load(Ordering::SeqCst));
    }

    #[test]
    fn test_capture_failure_releases_device_without_stop() {
        let (session, state) = start_session(Some(3));

        assert!(matches!(wait_for_end(&session), EndReason::CaptureFailed(_)));
        assert!(state.released.load(Ordering::SeqCst));
        assert!(!state.read_after_release.load(Ordering::SeqCst));

        // Stopping afterwards is still clean.
        session.stop().unwrap();
    }

    #[test]
    fn test_events_report_cadence() {
        let (session, _state) = start_session(Some(11));
        let mut processed = Vec::new();
        loop {
            match session.events().recv_timeout(WAIT).unwrap() {
                SessionEvent::FrameProcessed { index, pass, .. } => processed.push((index, pass)),
                SessionEvent::FrameSkipped { .. } => panic!("unexpected skip"),
                SessionEvent::Ended(_) => break,
            }
        }
        assert_eq!(processed.len(), 11);
        let accurate: Vec<u64> = processed
            .iter()
            .filter(|(_, pass)| *pass == DetectionPass::Accurate)
            .map(|(index, _)| *index)
            .collect();
        assert_eq!(accurate, vec![0, 10]);
    }

    #[test]
    fn test_stop_joins_before_release() {
        let (session, state) = start_session(None);
        loop {
            if let SessionEvent::FrameProcessed { .. } = session.events().recv_timeout(WAIT).unwrap() {
                break;
            }
        }
        assert!(session.is_running());

        session.stop().unwrap();

        assert!(state.released.load(Ordering::SeqCst));
        assert!(!state.read_after_release.load(Ordering::SeqCst));
    }

    #[test]
    fn test_drop_stops_and_releases() {
        let (session, state) = start_session(None);
        let slot = session.slot();
        drop(session);

        assert!(state.released.load(Ordering::SeqCst));
        let reads = state.reads.load(Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(state.reads.load(Ordering::SeqCst), reads);
        // Readers holding the slot keep the last frame.
        let _ = slot.latest();
    }

    #[test]
    fn test_missing_primary_never_opens_capture() {
        let opened = AtomicBool::new(false);
        let result = DetectionSession::open(
            &FakeLoader {
                primary_missing: true,
            },
            || {
                opened.store(true, Ordering::SeqCst);
                Err(CaptureError::Closed)
            },
            Box::new(BoxAnnotator::new()),
            &DetectionSettings::default(),
            Box::new(NullPipelineLogger),
        );

        assert!(matches!(result, Err(SessionError::PrimaryDetector(_))));
        assert!(!opened.load(Ordering::SeqCst));
    }

    #[test]
    fn test_unavailable_capture_is_setup_error() {
        let result = DetectionSession::open(
            &FakeLoader {
                primary_missing: false,
            },
            || {
                Err(CaptureError::Unavailable {
                    device: "/dev/video9".into(),
                    message: "no such device".into(),
                })
            },
            Box::new(BoxAnnotator::new()),
            &DetectionSettings::default(),
            Box::new(NullPipelineLogger),
        );
        assert!(matches!(
            result,
            Err(SessionError::Capture(CaptureError::Unavailable { .. }))
        ));
    }
}
