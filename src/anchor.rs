use std::path::Path;

use crate::config::{DetectorConfig, DetectorKind};
use crate::detection::Detection;
use crate::error::Error;
use crate::sequence::SeqInfo;
use crate::track::LabeledBox;

/// Decides per frame whether feedback should be requested
pub trait AnchorDetector {
    fn initialize(&mut self, seq_info: &SeqInfo);

    /// Called exactly once per frame, in order
    fn detect(&mut self, img_path: &Path, dets: &[Detection], results: &[Vec<LabeledBox>]) -> bool;
}

/// Fires every `duration` frames regardless of content
#[derive(Debug, Clone)]
pub struct FixedDetector {
    duration: u32,
    frame_count: u32,
}

impl FixedDetector {
    pub fn new(duration: u32) -> Result<Self, Error> {
        if duration == 0 {
            return Err(Error::Config("fixed detector duration must be positive".into()));
        }

        Ok(Self {
            duration,
            frame_count: 0,
        })
    }

    #[inline]
    pub fn duration(&self) -> u32 {
        self.duration
    }
}

impl AnchorDetector for FixedDetector {
    fn initialize(&mut self, _seq_info: &SeqInfo) {
        self.frame_count = 0;
    }

    fn detect(&mut self, _img_path: &Path, _dets: &[Detection], _results: &[Vec<LabeledBox>]) -> bool {
        self.frame_count += 1;
        self.frame_count % self.duration == 0
    }
}

pub fn build_detector(config: &DetectorConfig) -> Result<Box<dyn AnchorDetector>, Error> {
    match config.kind {
        DetectorKind::Fixed => Ok(Box::new(FixedDetector::new(config.duration)?)),
    }
}
