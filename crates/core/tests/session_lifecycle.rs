use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use image::GrayImage;

use facecascade_core::annotation::infrastructure::box_annotator::BoxAnnotator;
use facecascade_core::capture::domain::frame_source::{CaptureError, FrameSource};
use facecascade_core::detection::domain::cascade_classifier::{
    CascadeClassifier, DetectError, DetectionParams,
};
use facecascade_core::detection::domain::ensemble::CascadeEnsemble;
use facecascade_core::pipeline::detection_session::{DetectionSession, EndReason, SessionEvent};
use facecascade_core::pipeline::frame_pipeline::FramePipeline;
use facecascade_core::pipeline::pipeline_logger::StdoutPipelineLogger;
use facecascade_core::shared::face_box::FaceBox;
use facecascade_core::shared::frame::Frame;
use facecascade_core::shared::settings::DetectionSettings;

struct Camera {
    next: Arc<AtomicU64>,
    released: Arc<AtomicBool>,
}

impl FrameSource for Camera {
    fn read_frame(&mut self) -> Result<Frame, CaptureError> {
        if self.released.load(Ordering::SeqCst) {
            return Err(CaptureError::Closed);
        }
        let index = self.next.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(2));
        let img = image::RgbImage::from_pixel(48, 48, image::Rgb([90, 120, 150]));
        Ok(Frame::from_rgb_image(img, index))
    }

    fn release(&mut self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

struct Centered;

impl CascadeClassifier for Centered {
    fn detect(&mut self, gray: &GrayImage, _: &DetectionParams) -> Result<Vec<FaceBox>, DetectError> {
        let (w, h) = (gray.width() as i32, gray.height() as i32);
        Ok(vec![FaceBox::new(w / 4, h / 4, w / 2, h / 2)])
    }
}

#[test]
fn stream_publishes_frames_until_stopped() {
    let next = Arc::new(AtomicU64::new(0));
    let released = Arc::new(AtomicBool::new(false));
    let pipeline = FramePipeline::new(
        CascadeEnsemble::new(Box::new(Centered)),
        Box::new(BoxAnnotator::new()),
        &DetectionSettings {
            cadence_interval: 2,
            ..DetectionSettings::default()
        },
    )
    .unwrap();
    let session = DetectionSession::start(
        pipeline,
        Box::new(Camera {
            next: next.clone(),
            released: released.clone(),
        }),
        Box::new(StdoutPipelineLogger::new(5)),
    )
    .unwrap();

    let mut processed = 0;
    while processed < 4 {
        if let SessionEvent::FrameProcessed { faces, .. } =
            session.events().recv_timeout(Duration::from_secs(10)).unwrap()
        {
            assert_eq!(faces, 1);
            processed += 1;
        }
    }

    let latest = session.latest().unwrap();
    assert!(latest.index >= 3);
    assert_eq!(latest.faces, vec![FaceBox::new(12, 12, 24, 24)]);
    assert_eq!(latest.frame.width(), 48);

    let slot = session.slot();
    let events = session.events().clone();
    session.stop().unwrap();

    assert!(released.load(Ordering::SeqCst));
    let ended: Vec<SessionEvent> = events.try_iter().collect();
    assert_eq!(ended.last(), Some(&SessionEvent::Ended(EndReason::Stopped)));
    assert!(slot.latest().is_some());
}
