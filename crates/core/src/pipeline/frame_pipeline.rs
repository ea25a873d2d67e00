use std::time::Instant;

use image::GrayImage;
use thiserror::Error;

use crate::annotation::domain::frame_annotator::{AnnotateError, FrameAnnotator};
use crate::detection::domain::box_merger::BoxMerger;
use crate::detection::domain::cadence::{CadenceScheduler, DetectionPass};
use crate::detection::domain::detection_batch::{candidate_count, DetectionBatch};
use crate::detection::domain::ensemble::CascadeEnsemble;
use crate::detection::domain::tuning::{EnsembleTuning, PassTuning};
use crate::pipeline::pipeline_logger::PipelineLogger;
use crate::preprocessing::preprocessor::{PreprocessError, PreprocessMode, Preprocessor};
use crate::shared::face_box::FaceBox;
use crate::shared::frame::Frame;
use crate::shared::settings::{DetectionSettings, SettingsError};

#[derive(Error, Debug)]
pub enum FrameError {
    #[error(transparent)]
    Preprocess(#[from] PreprocessError),
    #[error(transparent)]
    Annotate(#[from] AnnotateError),
}

/// One rung of the single-image ladder. Each rung trades precision for
/// recall and runs only when the one before it found nothing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FallbackTier {
    Enhanced,
    Normalized,
    Plain,
}

impl FallbackTier {
    pub const LADDER: [FallbackTier; 3] = [
        FallbackTier::Enhanced,
        FallbackTier::Normalized,
        FallbackTier::Plain,
    ];

    pub fn mode(self) -> PreprocessMode {
        match self {
            FallbackTier::Enhanced => PreprocessMode::Enhanced,
            FallbackTier::Normalized => PreprocessMode::Normalized,
            FallbackTier::Plain => PreprocessMode::Plain,
        }
    }

    fn tuning(self, tuning: &EnsembleTuning) -> &PassTuning {
        match self {
            FallbackTier::Enhanced => &tuning.accurate,
            FallbackTier::Normalized => &tuning.relaxed,
            FallbackTier::Plain => &tuning.loosest,
        }
    }
}

/// Per-frame working state, dropped once the frame is annotated. Only the
/// cadence counter outlives it.
pub struct FrameContext {
    pub index: u64,
    pub pass: DetectionPass,
    pub gray: GrayImage,
    pub batches: Vec<DetectionBatch>,
}

impl FrameContext {
    pub fn new(index: u64, pass: DetectionPass, gray: GrayImage) -> Self {
        Self {
            index,
            pass,
            gray,
            batches: Vec::new(),
        }
    }

    pub fn candidates(&self) -> usize {
        candidate_count(&self.batches)
    }
}

/// Result of running one frame through the pipeline.
#[derive(Clone, Debug)]
pub struct DetectionOutcome {
    /// Copy of the input with boxes and the face-count label drawn on.
    pub frame: Frame,
    pub faces: Vec<FaceBox>,
    pub pass: DetectionPass,
    /// The ladder rung that produced `faces`; `None` for stream frames.
    pub tier: Option<FallbackTier>,
    /// Boxes across all batches before merging.
    pub candidates: usize,
}

/// Preprocess → ensemble → merge → annotate, for one frame at a time.
///
/// Owns the session's cadence counter, so a pipeline must not be shared
/// between streams.
pub struct FramePipeline {
    preprocessor: Preprocessor,
    ensemble: CascadeEnsemble,
    merger: BoxMerger,
    annotator: Box<dyn FrameAnnotator>,
    tuning: EnsembleTuning,
    cadence: CadenceScheduler,
}

impl FramePipeline {
    pub fn new(
        ensemble: CascadeEnsemble,
        annotator: Box<dyn FrameAnnotator>,
        settings: &DetectionSettings,
    ) -> Result<Self, SettingsError> {
        settings.validate()?;
        let cadence = CadenceScheduler::new(settings.cadence_interval)?;
        Ok(Self {
            preprocessor: Preprocessor::new(),
            ensemble,
            merger: BoxMerger::new(settings.overlap_threshold),
            annotator,
            tuning: settings.tuning,
            cadence,
        })
    }

    pub fn ensemble(&self) -> &CascadeEnsemble {
        &self.ensemble
    }

    pub fn cadence(&self) -> &CadenceScheduler {
        &self.cadence
    }

    /// Runs the next stream frame through whichever pass the cadence picks.
    ///
    /// The frame index is claimed before any work, so a frame that fails
    /// preprocessing still advances the cadence.
    pub fn process_stream_frame(
        &mut self,
        frame: &Frame,
        logger: &mut dyn PipelineLogger,
    ) -> Result<DetectionOutcome, FrameError> {
        let (index, pass) = self.cadence.advance();

        let mode = match pass {
            DetectionPass::Fast => PreprocessMode::Base,
            DetectionPass::Accurate => PreprocessMode::Enhanced,
        };
        let start = Instant::now();
        let gray = self.preprocessor.preprocess(frame, mode)?;
        let mut ctx = FrameContext::new(index, pass, gray);
        logger.timing("preprocess", elapsed_ms(start));

        let start = Instant::now();
        ctx.batches = match ctx.pass {
            DetectionPass::Fast => self.ensemble.run_fast(&ctx.gray, &self.tuning.fast),
            DetectionPass::Accurate => {
                self.ensemble.run_accurate(&ctx.gray, &self.tuning.accurate)
            }
        };
        logger.timing("detect", elapsed_ms(start));
        let candidates = ctx.candidates();

        let start = Instant::now();
        let faces = self.merger.merge(&ctx.batches);
        logger.timing("merge", elapsed_ms(start));

        let start = Instant::now();
        let mut annotated = frame.clone();
        self.annotator.annotate(&mut annotated, &faces)?;
        logger.timing("annotate", elapsed_ms(start));

        logger.metric("candidates", candidates as f64);
        logger.metric("faces", faces.len() as f64);
        logger.progress(ctx.index + 1, 0);
        log::debug!(
            "Frame {}: {pass:?} pass, {candidates} candidate(s), {} face(s)",
            ctx.index,
            faces.len()
        );

        Ok(DetectionOutcome {
            frame: annotated,
            faces,
            pass,
            tier: None,
            candidates,
        })
    }

    /// Single-image request: always accurate, walking down the fallback
    /// ladder until a rung yields candidates. Leaves the cadence untouched.
    pub fn detect_image(&mut self, frame: &Frame) -> Result<DetectionOutcome, FrameError> {
        let mut tier = FallbackTier::Enhanced;
        let mut batches = Vec::new();

        for rung in FallbackTier::LADDER {
            tier = rung;
            let gray = self.preprocessor.preprocess(frame, rung.mode())?;
            let mut ctx = FrameContext::new(frame.index(), DetectionPass::Accurate, gray);
            ctx.batches = self
                .ensemble
                .run_accurate(&ctx.gray, rung.tuning(&self.tuning));
            let found = ctx.candidates() > 0;
            batches = ctx.batches;
            if found {
                break;
            }
            log::debug!("No candidates on the {rung:?} rung");
        }

        let candidates = candidate_count(&batches);
        let faces = self.merger.merge(&batches);
        let mut annotated = frame.clone();
        self.annotator.annotate(&mut annotated, &faces)?;
        log::info!(
            "Detected {} face(s) from {candidates} candidate(s) ({tier:?})",
            faces.len()
        );

        Ok(DetectionOutcome {
            frame: annotated,
            faces,
            pass: DetectionPass::Accurate,
            tier: Some(tier),
            candidates,
        })
    }
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::infrastructure::box_annotator::BoxAnnotator;
    use crate::detection::domain::cascade_classifier::{
        CascadeClassifier, DetectError, DetectionParams,
    };
    use crate::detection::domain::classifier_loader::CascadeModel;
    use crate::pipeline::pipeline_logger::{NullPipelineLogger, StdoutPipelineLogger};
    use image::GrayImage;
    use rstest::rstest;
    use std::sync::{Arc, Mutex};

    type CallLog = Arc<Mutex<Vec<(CascadeModel, DetectionParams)>>>;

    /// Returns `boxes` only when called with `answer_scale`.
    struct ScriptedClassifier {
        model: CascadeModel,
        answer_scale: Option<f64>,
        boxes: Vec<FaceBox>,
        calls: CallLog,
    }

    impl CascadeClassifier for ScriptedClassifier {
        fn detect(
            &mut self,
            _gray: &GrayImage,
            params: &DetectionParams,
        ) -> Result<Vec<FaceBox>, DetectError> {
            self.calls.lock().unwrap().push((self.model, *params));
            match self.answer_scale {
                Some(scale) if (scale - params.scale_factor).abs() < 1e-9 => {
                    Ok(self.boxes.clone())
                }
                _ => Ok(Vec::new()),
            }
        }
    }

    fn scripted(
        model: CascadeModel,
        answer_scale: Option<f64>,
        boxes: &[FaceBox],
        calls: &CallLog,
    ) -> Box<dyn CascadeClassifier> {
        Box::new(ScriptedClassifier {
            model,
            answer_scale,
            boxes: boxes.to_vec(),
            calls: calls.clone(),
        })
    }

    fn full_ensemble(primary_scale: Option<f64>, boxes: &[FaceBox], calls: &CallLog) -> CascadeEnsemble {
        CascadeEnsemble::new(scripted(CascadeModel::FrontalDefault, primary_scale, boxes, calls))
            .with_classifier(
                CascadeModel::FrontalAlt,
                scripted(CascadeModel::FrontalAlt, None, &[], calls),
            )
            .with_classifier(
                CascadeModel::FrontalAlt2,
                scripted(CascadeModel::FrontalAlt2, None, &[], calls),
            )
            .with_classifier(
                CascadeModel::Profile,
                scripted(CascadeModel::Profile, None, &[], calls),
            )
    }

    fn pipeline(ensemble: CascadeEnsemble) -> FramePipeline {
        FramePipeline::new(ensemble, Box::new(BoxAnnotator::new()), &DetectionSettings::default())
            .unwrap()
    }

    fn test_frame() -> Frame {
        let img = image::RgbImage::from_fn(96, 96, |x, y| {
            image::Rgb([(x * 2) as u8, (y * 2) as u8, ((x + y) % 256) as u8])
        });
        Frame::from_rgb_image(img, 0)
    }

    fn scales_called(calls: &CallLog) -> Vec<f64> {
        calls
            .lock()
            .unwrap()
            .iter()
            .map(|(_, p)| p.scale_factor)
            .collect()
    }

    #[test]
    fn test_ladder_stops_at_first_rung_with_candidates() {
        let calls: CallLog = Arc::default();
        let face = FaceBox::new(20, 20, 30, 30);
        let mut pipeline = pipeline(full_ensemble(Some(1.05), &[face], &calls));

        let outcome = pipeline.detect_image(&test_frame()).unwrap();

        assert_eq!(outcome.faces, vec![face]);
        assert_eq!(outcome.tier, Some(FallbackTier::Normalized));
        assert_eq!(outcome.pass, DetectionPass::Accurate);
        assert_eq!(outcome.candidates, 1);
        assert!(!scales_called(&calls).contains(&1.03));
    }

    #[test]
    fn test_ladder_first_rung_hit_skips_the_rest() {
        let calls: CallLog = Arc::default();
        let face = FaceBox::new(10, 10, 40, 40);
        let mut pipeline = pipeline(full_ensemble(Some(1.08), &[face], &calls));

        let outcome = pipeline.detect_image(&test_frame()).unwrap();

        assert_eq!(outcome.tier, Some(FallbackTier::Enhanced));
        assert_eq!(outcome.faces.len(), 1);
        // Three frontal classifiers, no profile fallback.
        assert_eq!(calls.lock().unwrap().len(), 3);
    }

    #[test]
    fn test_ladder_exhausted_returns_no_faces() {
        let calls: CallLog = Arc::default();
        let mut pipeline = pipeline(full_ensemble(None, &[], &calls));

        let outcome = pipeline.detect_image(&test_frame()).unwrap();

        assert!(outcome.faces.is_empty());
        assert_eq!(outcome.tier, Some(FallbackTier::Plain));
        let scales = scales_called(&calls);
        assert!(scales.contains(&1.08));
        assert!(scales.contains(&1.05));
        assert!(scales.contains(&1.03));
        // Per rung: 3 frontal + profile plain + profile mirrored.
        assert_eq!(scales.len(), 15);
    }

    #[test]
    fn test_detect_image_leaves_cadence_untouched() {
        let calls: CallLog = Arc::default();
        let mut pipeline = pipeline(full_ensemble(None, &[], &calls));
        pipeline.detect_image(&test_frame()).unwrap();
        assert_eq!(pipeline.cadence().frames_seen(), 0);
    }

    #[test]
    fn test_cadence_ten_frames_one_accurate_pass() {
        let calls: CallLog = Arc::default();
        let mut pipeline = pipeline(full_ensemble(None, &[], &calls));
        let frame = test_frame();

        let passes: Vec<DetectionPass> = (0..10)
            .map(|_| {
                pipeline
                    .process_stream_frame(&frame, &mut NullPipelineLogger)
                    .unwrap()
                    .pass
            })
            .collect();

        assert_eq!(passes[0], DetectionPass::Accurate);
        assert_eq!(
            passes.iter().filter(|p| **p == DetectionPass::Accurate).count(),
            1
        );
        assert_eq!(
            passes.iter().filter(|p| **p == DetectionPass::Fast).count(),
            9
        );
    }

    #[test]
    fn test_fast_pass_runs_primary_only_with_fast_params() {
        let calls: CallLog = Arc::default();
        let mut pipeline = pipeline(full_ensemble(None, &[], &calls));
        let frame = test_frame();

        pipeline.process_stream_frame(&frame, &mut NullPipelineLogger).unwrap();
        calls.lock().unwrap().clear();
        pipeline.process_stream_frame(&frame, &mut NullPipelineLogger).unwrap();

        let recorded = calls.lock().unwrap().clone();
        assert_eq!(
            recorded,
            vec![(CascadeModel::FrontalDefault, DetectionParams::new(1.1, 5, 50))]
        );
    }

    #[rstest]
    #[case(1, 5)]
    #[case(3, 2)]
    #[case(10, 1)]
    fn test_accurate_passes_follow_interval(#[case] interval: u64, #[case] expected: usize) {
        let calls: CallLog = Arc::default();
        let settings = DetectionSettings {
            cadence_interval: interval,
            ..DetectionSettings::default()
        };
        let mut pipeline = FramePipeline::new(
            full_ensemble(None, &[], &calls),
            Box::new(BoxAnnotator::new()),
            &settings,
        )
        .unwrap();
        let frame = test_frame();

        let accurate = (0..5)
            .filter(|_| {
                pipeline
                    .process_stream_frame(&frame, &mut NullPipelineLogger)
                    .unwrap()
                    .pass
                    == DetectionPass::Accurate
            })
            .count();
        assert_eq!(accurate, expected);
    }

    #[test]
    fn test_stream_frame_is_annotated_copy() {
        let calls: CallLog = Arc::default();
        let face = FaceBox::new(20, 40, 30, 30);
        let mut pipeline = pipeline(full_ensemble(Some(1.08), &[face], &calls));
        let frame = test_frame();

        let outcome = pipeline
            .process_stream_frame(&frame, &mut NullPipelineLogger)
            .unwrap();

        assert_eq!(outcome.faces, vec![face]);
        assert_eq!(outcome.frame.to_rgb_image().unwrap().get_pixel(20, 50).0, [0, 255, 0]);
        assert_ne!(frame.data(), outcome.frame.data());
    }

    #[test]
    fn test_overlapping_candidates_are_merged() {
        let calls: CallLog = Arc::default();
        let boxes = [FaceBox::new(10, 10, 50, 50), FaceBox::new(12, 12, 48, 48)];
        let mut pipeline = pipeline(full_ensemble(Some(1.08), &boxes, &calls));

        let outcome = pipeline.detect_image(&test_frame()).unwrap();

        assert_eq!(outcome.candidates, 2);
        assert_eq!(outcome.faces, vec![FaceBox::new(10, 10, 50, 50)]);
    }

    #[test]
    fn test_stream_frame_records_stage_timings() {
        let calls: CallLog = Arc::default();
        let mut pipeline = pipeline(full_ensemble(None, &[], &calls));
        let mut logger = StdoutPipelineLogger::new(10);

        pipeline.process_stream_frame(&test_frame(), &mut logger).unwrap();

        for stage in ["preprocess", "detect", "merge", "annotate"] {
            assert_eq!(logger.timings_for(stage).map(|t| t.len()), Some(1), "{stage}");
        }
        assert_eq!(logger.metrics_for("faces"), Some(&[0.0][..]));
        assert_eq!(logger.frames(), 1);
    }

    #[test]
    fn test_empty_frame_is_preprocess_error_and_consumes_index() {
        let calls: CallLog = Arc::default();
        let mut pipeline = pipeline(full_ensemble(None, &[], &calls));
        let empty = Frame::new(Vec::new(), 0, 0, 3, 0);

        let result = pipeline.process_stream_frame(&empty, &mut NullPipelineLogger);

        assert!(matches!(result, Err(FrameError::Preprocess(_))));
        assert_eq!(pipeline.cadence().frames_seen(), 1);
        assert!(calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_invalid_settings_are_rejected() {
        let calls: CallLog = Arc::default();
        let settings = DetectionSettings {
            cadence_interval: 0,
            ..DetectionSettings::default()
        };
        let result = FramePipeline::new(
            full_ensemble(None, &[], &calls),
            Box::new(BoxAnnotator::new()),
            &settings,
        );
        assert!(matches!(result, Err(SettingsError::Cadence(_))));
    }
}
