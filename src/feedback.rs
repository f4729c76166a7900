use std::path::PathBuf;
use thiserror::Error;

use crate::detection::Detection;
use crate::sequence::SeqInfo;
use crate::trajectory::Trajectory;

#[derive(Debug, Error)]
pub enum FeedbackError {
    #[error("Feedback unavailable: {0}")]
    Unavailable(String),

    #[error("Solver Error: {0}")]
    Solver(String),
}

/// Offline re-tracking of the frames buffered since the last reset.
///
/// Returned frames are 1-based and relative to the first buffered frame.
pub trait OfflineTracker {
    fn initialize(&mut self, seq_info: &SeqInfo);

    fn track(
        &mut self,
        seq_info: &SeqInfo,
        img_paths: &[PathBuf],
        dets: &[Vec<Detection>],
    ) -> Result<Trajectory, FeedbackError>;

    /// Called after the caller drops its buffered frames
    fn reset(&mut self) {}
}

/// Serves feedback from a trajectory computed ahead of time, numbered by
/// global 1-based frame
#[derive(Debug, Clone)]
pub struct ReplayFeedback {
    trajectory: Trajectory,
    consumed: u32,
    last_len: u32,
}

impl ReplayFeedback {
    pub fn new(trajectory: Trajectory) -> Self {
        Self {
            trajectory,
            consumed: 0,
            last_len: 0,
        }
    }
}

impl OfflineTracker for ReplayFeedback {
    fn initialize(&mut self, _seq_info: &SeqInfo) {
        self.consumed = 0;
        self.last_len = 0;
    }

    fn track(
        &mut self,
        _seq_info: &SeqInfo,
        img_paths: &[PathBuf],
        _dets: &[Vec<Detection>],
    ) -> Result<Trajectory, FeedbackError> {
        let len = img_paths.len() as u32;
        self.last_len = len;

        let window: Trajectory = self
            .trajectory
            .truncate_to(self.consumed + len)
            .restrict_after(self.consumed);

        if window.is_empty() {
            return Err(FeedbackError::Unavailable(format!(
                "no stored feedback for frames {}..={}",
                self.consumed + 1,
                self.consumed + len
            )));
        }

        Ok(window)
    }

    fn reset(&mut self) {
        self.consumed += self.last_len;
        self.last_len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bbox::BBox;
    use crate::trajectory::TrajectoryRow;

    fn stored(frames: u32) -> Trajectory {
        (1..=frames)
            .map(|frame| TrajectoryRow {
                frame,
                track_id: 1,
                bbox: BBox::ltwh(frame as f32, 0.0, 5.0, 5.0),
            })
            .collect()
    }

    fn paths(n: usize) -> Vec<PathBuf> {
        (0..n).map(|i| PathBuf::from(format!("{:06}.jpg", i + 1))).collect()
    }

    #[test]
    fn test_replay_follows_buffer_resets() {
        let seq = SeqInfo::default();
        let mut fb = ReplayFeedback::new(stored(20));
        fb.initialize(&seq);

        let first = fb.track(&seq, &paths(5), &[]).unwrap();
        assert_eq!(first.frames(), Some(1..=5));

        fb.reset();
        let second = fb.track(&seq, &paths(5), &[]).unwrap();
        assert_eq!(second.frames(), Some(1..=5));
        assert_eq!(second.frame(1)[0].bbox.left(), 6.0);
    }

    #[test]
    fn test_replay_without_reset_grows_window() {
        let seq = SeqInfo::default();
        let mut fb = ReplayFeedback::new(stored(20));
        fb.initialize(&seq);

        fb.track(&seq, &paths(5), &[]).unwrap();
        let t = fb.track(&seq, &paths(10), &[]).unwrap();
        assert_eq!(t.frames(), Some(1..=10));
    }

    #[test]
    fn test_replay_past_end_is_unavailable() {
        let seq = SeqInfo::default();
        let mut fb = ReplayFeedback::new(stored(3));
        fb.initialize(&seq);

        fb.track(&seq, &paths(3), &[]).unwrap();
        fb.reset();
        assert!(matches!(
            fb.track(&seq, &paths(2), &[]),
            Err(FeedbackError::Unavailable(_))
        ));
    }
}
