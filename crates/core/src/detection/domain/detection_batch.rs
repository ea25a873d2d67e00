use crate::detection::domain::classifier_loader::CascadeModel;
use crate::shared::face_box::FaceBox;

/// Boxes from one classifier invocation on one image, already in the
/// coordinate frame of the unmirrored image.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectionBatch {
    pub model: CascadeModel,
    pub flipped: bool,
    pub boxes: Vec<FaceBox>,
}

impl DetectionBatch {
    pub fn new(model: CascadeModel, boxes: Vec<FaceBox>) -> Self {
        Self {
            model,
            flipped: false,
            boxes,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }
}

/// Total number of boxes across batches.
pub fn candidate_count(batches: &[DetectionBatch]) -> usize {
    batches.iter().map(|b| b.boxes.len()).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_count_sums_all_batches() {
        let batches = vec![
            DetectionBatch::new(CascadeModel::FrontalDefault, vec![FaceBox::new(0, 0, 10, 10)]),
            DetectionBatch::new(CascadeModel::FrontalAlt, vec![]),
            DetectionBatch::new(
                CascadeModel::FrontalAlt2,
                vec![FaceBox::new(0, 0, 10, 10), FaceBox::new(5, 5, 10, 10)],
            ),
        ];
        assert_eq!(candidate_count(&batches), 3);
        assert!(batches[1].is_empty());
    }

    #[test]
    fn test_candidate_count_empty() {
        assert_eq!(candidate_count(&[]), 0);
    }
}
