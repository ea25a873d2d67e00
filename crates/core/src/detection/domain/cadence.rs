use thiserror::Error;

use crate::shared::constants::DEFAULT_ACCURATE_INTERVAL;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CadenceError {
    #[error("cadence interval must be >= 1")]
    ZeroInterval,
}

/// Which ensemble pass a frame receives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DetectionPass {
    /// Primary classifier only, speed-tuned.
    Fast,
    /// Every loaded classifier, accuracy-tuned, with mirrored profile
    /// fallback.
    Accurate,
}

/// Per-session frame counter that picks the pass for each frame.
///
/// Indices start at 0, so the first frame of a session is accurate. The
/// counter never resets while the session lives.
#[derive(Debug)]
pub struct CadenceScheduler {
    interval: u64,
    frame_count: u64,
}

impl CadenceScheduler {
    pub fn new(interval: u64) -> Result<Self, CadenceError> {
        if interval < 1 {
            return Err(CadenceError::ZeroInterval);
        }
        Ok(Self {
            interval,
            frame_count: 0,
        })
    }

    pub fn interval(&self) -> u64 {
        self.interval
    }

    pub fn frames_seen(&self) -> u64 {
        self.frame_count
    }

    pub fn pass_for(&self, index: u64) -> DetectionPass {
        if index % self.interval == 0 {
            DetectionPass::Accurate
        } else {
            DetectionPass::Fast
        }
    }

    /// Claims the next frame index and its pass.
    pub fn advance(&mut self) -> (u64, DetectionPass) {
        let index = self.frame_count;
        self.frame_count += 1;
        (index, self.pass_for(index))
    }
}

impl Default for CadenceScheduler {
    fn default() -> Self {
        Self {
            interval: DEFAULT_ACCURATE_INTERVAL,
            frame_count: 0,
        }
    }
}
