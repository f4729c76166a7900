//! Per-frame orchestration of the expert aggregation.
//!
//! Every frame the experts' results are buffered, the anchor detector is
//! asked whether feedback should be requested, and on anchor frames each
//! expert is scored against the feedback and the learner is updated. An
//! expert is then sampled from the weights and its boxes are reconciled
//! into a stable id space.

use ndarray::{Array1, ArrayView1};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_derive::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::anchor::{build_detector, AnchorDetector};
use crate::config::Config;
use crate::detection::Detection;
use crate::error::Error;
use crate::feedback::OfflineTracker;
use crate::learner::WaaDelayed;
use crate::matcher::IdMatcher;
use crate::math::weighted_random_choice;
use crate::metrics::LossScorer;
use crate::sequence::SeqInfo;
use crate::track::{find_duplicate, LabeledBox};
use crate::trajectory::{Trajectory, TrajectoryRow};

/// Everything produced for one frame
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TrackOutput {
    pub boxes: Vec<LabeledBox>,
    pub weights: Array1<f64>,
    /// Per-expert losses, only on frames where the weights were updated
    pub losses: Option<Array1<f64>>,
    /// Feedback the experts were scored against, rebased to the window
    pub feedback: Option<Trajectory>,
    pub selected_expert: usize,
}

pub struct MetaTracker {
    name: String,
    config: Config,
    n_experts: usize,

    detector: Box<dyn AnchorDetector>,
    learner: WaaDelayed,
    matcher: IdMatcher,
    scorer: Box<dyn LossScorer>,
    offline: Option<Box<dyn OfflineTracker>>,
    rng: StdRng,

    seq_info: SeqInfo,
    frame_idx: usize,
    selected_expert: Option<usize>,

    // offline buffer, survives updates unless `offline.reset` is set
    img_paths: Vec<PathBuf>,
    dets: Vec<Vec<Detection>>,
    gts: Vec<Vec<LabeledBox>>,

    // cycle window
    timer: u32,
    experts_results: Vec<Trajectory>,
}

fn make_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

impl MetaTracker {
    pub fn new(
        config: Config,
        scorer: Box<dyn LossScorer>,
        offline: Option<Box<dyn OfflineTracker>>,
    ) -> Result<Self, Error> {
        config.validate()?;

        if !config.offline.use_gt && offline.is_none() {
            return Err(Error::Config(
                "an offline tracker is required unless offline.use_gt is set".into(),
            ));
        }

        let n_experts = config.n_experts();
        let mut tracker = Self {
            name: config.to_string(),
            detector: build_detector(&config.detector)?,
            learner: WaaDelayed::new(n_experts),
            matcher: IdMatcher::new(&config.matching),
            rng: make_rng(config.seed),
            scorer,
            offline,
            n_experts,
            config,
            seq_info: SeqInfo::default(),
            frame_idx: 0,
            selected_expert: None,
            img_paths: Vec::new(),
            dets: Vec::new(),
            gts: Vec::new(),
            timer: 0,
            experts_results: Vec::new(),
        };
        tracker.initialize(SeqInfo::default());

        Ok(tracker)
    }

    pub fn initialize(&mut self, seq_info: SeqInfo) {
        self.frame_idx = 0;
        self.selected_expert = None;
        self.rng = make_rng(self.config.seed);

        self.detector.initialize(&seq_info);
        self.learner.initialize(self.n_experts);
        self.matcher.initialize(self.n_experts);
        if let Some(offline) = self.offline.as_mut() {
            offline.initialize(&seq_info);
        }
        self.seq_info = seq_info;

        self.reset_offline();
        self.reset_history();
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn weights(&self) -> ArrayView1<'_, f64> {
        self.learner.weights()
    }

    #[inline]
    pub fn selected_expert(&self) -> Option<usize> {
        self.selected_expert
    }

    /// Number of frames tracked since `initialize`
    #[inline]
    pub fn frame_idx(&self) -> usize {
        self.frame_idx
    }

    /// Frames accumulated since the last weight update
    #[inline]
    pub fn window_len(&self) -> u32 {
        self.timer
    }

    fn reset_offline(&mut self) {
        self.img_paths.clear();
        self.dets.clear();
        self.gts.clear();
    }

    fn reset_history(&mut self) {
        self.timer = 0;
        self.experts_results = (0..self.n_experts).map(|_| Trajectory::new()).collect();
    }

    pub fn track(
        &mut self,
        img_path: &Path,
        dets: &[Detection],
        gts: &[LabeledBox],
        results: &[Vec<LabeledBox>],
    ) -> Result<TrackOutput, Error> {
        if results.len() != self.n_experts {
            return Err(Error::ExpertCount {
                expected: self.n_experts,
                got: results.len(),
            });
        }

        let frame = self.frame_idx;
        self.frame_idx += 1;
        self.timer += 1;

        self.img_paths.push(img_path.to_path_buf());
        self.dets.push(dets.to_vec());
        self.gts.push(gts.to_vec());

        for (history, result) in self.experts_results.iter_mut().zip(results) {
            history.push_frame(self.timer, result);
        }

        let is_anchor = self.detector.detect(img_path, dets, results);
        debug!(frame, is_anchor, window = self.timer, "frame buffered");

        let (losses, feedback) = if is_anchor {
            match self.update_weights(frame)? {
                Some((losses, feedback)) => (Some(losses), Some(feedback)),
                None => {
                    if self.config.offline.reset_on_miss {
                        self.reset_history();
                    }
                    (None, None)
                }
            }
        } else {
            (None, None)
        };

        let prev = self.selected_expert;
        let selected = match prev {
            Some(s) if !is_anchor && !self.config.loss.delayed => s,
            _ => weighted_random_choice(self.learner.weights(), &mut self.rng)?,
        };
        if prev.is_some() && prev != Some(selected) {
            info!(frame, from = ?prev, to = selected, "expert switched");
        }
        self.selected_expert = Some(selected);

        let boxes = self
            .matcher
            .match_frame(prev, selected, self.learner.weights(), results);

        if let Some(id) = find_duplicate(&boxes) {
            return Err(Error::DuplicateId { frame, id });
        }

        Ok(TrackOutput {
            boxes,
            weights: self.learner.weights().to_owned(),
            losses,
            feedback,
            selected_expert: selected,
        })
    }

    fn request_feedback(&mut self, frame: usize) -> Option<Trajectory> {
        if self.config.offline.use_gt {
            return Some(self.gt_feedback());
        }

        let offline = self.offline.as_mut()?;
        match offline.track(&self.seq_info, &self.img_paths, &self.dets) {
            Ok(feedback) => Some(feedback),
            Err(err) => {
                warn!(frame, %err, "offline feedback failed, skipping update");
                None
            }
        }
    }

    fn gt_feedback(&self) -> Trajectory {
        self.gts
            .iter()
            .enumerate()
            .flat_map(|(i, gt)| {
                gt.iter().map(move |t| TrajectoryRow {
                    frame: i as u32 + 1,
                    track_id: t.track_id,
                    bbox: t.bbox,
                })
            })
            .collect()
    }

    fn update_weights(&mut self, frame: usize) -> Result<Option<(Array1<f64>, Trajectory)>, Error> {
        let Some(feedback) = self.request_feedback(frame) else {
            return Ok(None);
        };

        // feedback is numbered from the start of the offline buffer, the
        // history from the start of the window
        let offset = self.img_paths.len() as u32 - self.timer;
        let feedback = feedback.restrict_after(offset);
        if feedback.is_empty() {
            warn!(frame, window = self.timer, "no feedback inside the window, skipping update");
            return Ok(None);
        }

        let kind = self.config.loss.kind;
        let losses: Array1<f64> = self
            .experts_results
            .iter()
            .map(|history| {
                self.scorer
                    .score(&feedback, history, &self.seq_info, kind)
            })
            .collect();

        if let Some((expert, &loss)) = losses.iter().enumerate().find(|(_, l)| !l.is_finite()) {
            return Err(Error::InvalidLoss { expert, loss });
        }

        let dt = if self.config.loss.delayed {
            self.timer as u64
        } else {
            1
        };
        self.learner.update(losses.view(), dt, self.config.loss.norm);

        info!(
            frame,
            dt,
            losses = ?losses.as_slice(),
            weights = ?self.learner.weights().as_slice(),
            "weights updated"
        );

        self.reset_history();
        if self.config.offline.reset {
            self.reset_offline();
            if let Some(offline) = self.offline.as_mut() {
                offline.reset();
            }
        }

        Ok(Some((losses, feedback)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        DetectorConfig, DetectorKind, LossConfig, MatchingConfig, MatchingMethod, OfflineConfig,
    };
    use crate::feedback::FeedbackError;
    use crate::metrics::{ClearMotScorer, LossKind};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn config(n: usize, duration: u32, use_gt: bool) -> Config {
        Config {
            detector: DetectorConfig {
                kind: DetectorKind::Fixed,
                duration,
            },
            matching: MatchingConfig::new(MatchingMethod::Anchor),
            offline: OfflineConfig {
                use_gt,
                ..Default::default()
            },
            loss: LossConfig {
                kind: LossKind::Mota,
                delayed: false,
                norm: false,
            },
            experts: (0..n).map(|i| format!("expert{}", i)).collect(),
            seed: Some(11),
        }
    }

    /// Records the windows it was asked to score
    struct Recorder {
        seen: Rc<RefCell<Vec<(Option<std::ops::RangeInclusive<u32>>, usize)>>>,
    }

    impl LossScorer for Recorder {
        fn score(&self, feedback: &Trajectory, expert: &Trajectory, _: &SeqInfo, _: LossKind) -> f64 {
            self.seen.borrow_mut().push((feedback.frames(), expert.len()));
            0.0
        }
    }

    struct Diverging;

    impl LossScorer for Diverging {
        fn score(&self, _: &Trajectory, _: &Trajectory, _: &SeqInfo, _: LossKind) -> f64 {
            f64::INFINITY
        }
    }

    struct Failing;

    impl OfflineTracker for Failing {
        fn initialize(&mut self, _seq_info: &SeqInfo) {}

        fn track(
            &mut self,
            _: &SeqInfo,
            _: &[PathBuf],
            _: &[Vec<Detection>],
        ) -> Result<Trajectory, FeedbackError> {
            Err(FeedbackError::Solver("model crashed".into()))
        }
    }

    fn gt_box(i: i32) -> LabeledBox {
        LabeledBox::new(i, 10.0 * i as f32, 0.0, 8.0, 8.0)
    }

    #[test]
    fn test_wrong_expert_count_is_rejected() {
        let mut t = MetaTracker::new(config(2, 5, true), Box::new(ClearMotScorer::default()), None)
            .unwrap();

        let err = t.track(Path::new("1.jpg"), &[], &[], &[vec![]]).unwrap_err();
        assert!(matches!(err, Error::ExpertCount { expected: 2, got: 1 }));
    }

    #[test]
    fn test_offline_required_without_gt() {
        let res = MetaTracker::new(config(2, 5, false), Box::new(ClearMotScorer::default()), None);
        assert!(matches!(res, Err(Error::Config(_))));
    }

    #[test]
    fn test_failed_feedback_leaves_weights() {
        let mut t = MetaTracker::new(
            config(3, 2, false),
            Box::new(ClearMotScorer::default()),
            Some(Box::new(Failing)),
        )
        .unwrap();
        t.initialize(SeqInfo::new("MOT17", "MOT17-02"));
        let results = vec![vec![gt_box(1)], vec![], vec![]];

        for i in 0..6 {
            let out = t.track(Path::new("f.jpg"), &[], &[], &results).unwrap();
            assert!(out.losses.is_none() && out.feedback.is_none());
            assert_eq!(out.weights, Array1::from_elem(3, 1.0 / 3.0));
            assert_eq!(t.window_len(), i + 1);
        }
    }

    #[test]
    fn test_non_finite_loss_is_an_error() {
        let mut t = MetaTracker::new(config(2, 2, true), Box::new(Diverging), None).unwrap();
        let gts = vec![gt_box(1)];
        let results = vec![gts.clone(), vec![]];

        let out = t.track(Path::new("a"), &[], &gts, &results).unwrap();
        assert_eq!(out.weights, Array1::from_elem(2, 0.5));

        let err = t.track(Path::new("b"), &[], &gts, &results).unwrap_err();
        assert!(matches!(err, Error::InvalidLoss { expert: 0, .. }));

        assert_eq!(t.weights(), Array1::from_elem(2, 0.5));
        assert!(t.weights().iter().all(|w| w.is_finite()));
    }

    #[test]
    fn test_reset_on_miss_clears_window() {
        let mut cfg = config(2, 2, false);
        cfg.offline.reset_on_miss = true;
        let mut t = MetaTracker::new(cfg, Box::new(ClearMotScorer::default()), Some(Box::new(Failing)))
            .unwrap();
        let results = vec![vec![], vec![]];

        t.track(Path::new("a"), &[], &[], &results).unwrap();
        assert_eq!(t.window_len(), 1);
        t.track(Path::new("b"), &[], &[], &results).unwrap();
        assert_eq!(t.window_len(), 0);
    }

    #[test]
    fn test_gt_update_on_anchor_only() {
        let mut t = MetaTracker::new(config(2, 3, true), Box::new(ClearMotScorer::default()), None)
            .unwrap();
        let gts = vec![gt_box(1), gt_box(2)];
        let results = vec![gts.clone(), vec![]];

        for frame in 1..=6 {
            let out = t.track(Path::new("f"), &[], &gts, &results).unwrap();
            let anchor = frame % 3 == 0;

            assert_eq!(out.losses.is_some(), anchor);
            if let Some(losses) = out.losses {
                assert_eq!(losses.as_slice(), Some(&[0.0, 1.0][..]));
                assert_eq!(out.feedback.as_ref().and_then(|f| f.frames()), Some(1..=3));
                assert_eq!(t.window_len(), 0);
            }
        }

        assert!(t.weights()[0] > t.weights()[1]);
    }

    #[test]
    fn test_scorer_sees_truncated_feedback() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut cfg = config(1, 10, true);
        cfg.offline.reset = false;
        let mut t = MetaTracker::new(cfg, Box::new(Recorder { seen: seen.clone() }), None).unwrap();

        let gts = vec![gt_box(1)];
        for _ in 0..20 {
            t.track(Path::new("f"), &[], &gts, &[gts.clone()]).unwrap();
        }

        let seen = seen.borrow();
        assert_eq!(seen.len(), 2);
        // second window covers global frames 11..=20 only
        assert_eq!(seen[1], (Some(1..=10), 10));
    }

    #[test]
    fn test_initialize_resets_state() {
        let mut t = MetaTracker::new(config(2, 1, true), Box::new(ClearMotScorer::default()), None)
            .unwrap();
        let gts = vec![gt_box(1)];

        t.track(Path::new("f"), &[], &gts, &[gts.clone(), vec![]]).unwrap();
        assert_ne!(t.weights()[0], 0.5);

        t.initialize(SeqInfo::new("MOT17", "MOT17-04"));
        assert_eq!(t.weights(), Array1::from_elem(2, 0.5));
        assert_eq!(t.frame_idx(), 0);
        assert_eq!(t.selected_expert(), None);
    }
}
