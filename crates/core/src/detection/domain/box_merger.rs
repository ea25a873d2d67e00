use crate::detection::domain::detection_batch::DetectionBatch;
use crate::shared::face_box::{FaceBox, DEFAULT_OVERLAP_THRESHOLD};

/// Fuses the candidate boxes of every classifier into one deduplicated
/// set with greedy area-priority non-maximum suppression.
///
/// Larger boxes win: candidates are visited by area, descending, and one
/// is dropped when its IoU with any box already kept is strictly above
/// the threshold. The result order carries no meaning.
#[derive(Clone, Copy, Debug)]
pub struct BoxMerger {
    overlap_threshold: f64,
}

impl BoxMerger {
    pub fn new(overlap_threshold: f64) -> Self {
        Self { overlap_threshold }
    }

    pub fn overlap_threshold(&self) -> f64 {
        self.overlap_threshold
    }

    pub fn merge(&self, batches: &[DetectionBatch]) -> Vec<FaceBox> {
        let candidates: Vec<FaceBox> = batches
            .iter()
            .flat_map(|b| b.boxes.iter().copied())
            .collect();
        self.merge_boxes(candidates)
    }

    pub fn merge_boxes(&self, mut candidates: Vec<FaceBox>) -> Vec<FaceBox> {
        if candidates.len() <= 1 {
            return candidates;
        }
        // sort_by is stable: equal areas keep input order
        candidates.sort_by(|a, b| b.area().cmp(&a.area()));

        let mut kept: Vec<FaceBox> = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let dominated = kept
                .iter()
                .any(|k| candidate.iou(k) > self.overlap_threshold);
            if !dominated {
                kept.push(candidate);
            }
        }
        kept
    }
}

impl Default for BoxMerger {
    fn default() -> Self {
        Self::new(DEFAULT_OVERLAP_THRESHOLD)
    }
}
