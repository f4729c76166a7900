use std::path::Path;

use crate::detection::Detection;
use crate::error::Error;
use crate::sequence::SeqInfo;
use crate::track::LabeledBox;
use crate::trajectory::Trajectory;

/// One independent tracker whose per-frame output is aggregated
pub trait Expert {
    fn name(&self) -> &str;

    fn initialize(&mut self, seq_info: &SeqInfo);

    fn track(&mut self, img_path: &Path, dets: &[Detection]) -> Result<Vec<LabeledBox>, Error>;
}

/// Runs every expert on one frame, in order
pub fn track_all(
    experts: &mut [Box<dyn Expert>],
    img_path: &Path,
    dets: &[Detection],
) -> Result<Vec<Vec<LabeledBox>>, Error> {
    experts
        .iter_mut()
        .map(|e| e.track(img_path, dets))
        .collect()
}

/// Replays results an expert produced ahead of time
#[derive(Debug, Clone)]
pub struct ReplayExpert {
    name: String,
    results: Trajectory,
    frame_idx: u32,
}

impl ReplayExpert {
    pub fn new(name: impl Into<String>, results: Trajectory) -> Self {
        Self {
            name: name.into(),
            results,
            frame_idx: 0,
        }
    }

    #[inline]
    pub fn last_frame(&self) -> u32 {
        self.results.frames().map_or(0, |r| *r.end())
    }
}

impl Expert for ReplayExpert {
    fn name(&self) -> &str {
        &self.name
    }

    fn initialize(&mut self, _seq_info: &SeqInfo) {
        self.frame_idx = 0;
    }

    fn track(&mut self, _img_path: &Path, _dets: &[Detection]) -> Result<Vec<LabeledBox>, Error> {
        self.frame_idx += 1;

        let boxes = self
            .results
            .frame(self.frame_idx)
            .iter()
            .map(|r| r.labeled())
            .collect();

        Ok(boxes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mot::read_trajectory;

    #[test]
    fn test_replay_expert_steps_through_frames() {
        let src = "1,3,0,0,5,5\n1,4,9,0,5,5\n3,3,1,0,5,5\n";
        let mut expert = ReplayExpert::new("replay", read_trajectory(src.as_bytes()).unwrap());
        expert.initialize(&SeqInfo::default());
        let path = Path::new("img.jpg");

        assert_eq!(expert.track(path, &[]).unwrap().len(), 2);
        assert!(expert.track(path, &[]).unwrap().is_empty());
        assert_eq!(expert.track(path, &[]).unwrap()[0].track_id, 3);
        assert_eq!(expert.last_frame(), 3);
        assert_eq!(expert.name(), "replay");
    }
}
