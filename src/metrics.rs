//! Loss scoring of an expert's trajectory against feedback.
//!
//! `ClearMotScorer` is a small CLEAR-MOT accumulator on IoU distance: per
//! frame it keeps still-valid correspondences, assigns the rest with the
//! Hungarian method and counts misses, false positives and ID switches.

use serde_derive::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use crate::assignment::assign_by;
use crate::sequence::SeqInfo;
use crate::trajectory::{Trajectory, TrajectoryRow};

#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum LossKind {
    /// `1 - MOTA`
    #[default]
    #[serde(rename = "mota")]
    Mota,
    /// Mean IoU distance over matches
    #[serde(rename = "motp")]
    Motp,
    #[serde(rename = "fp")]
    FalsePositive,
    #[serde(rename = "fn")]
    FalseNegative,
    #[serde(rename = "idsw")]
    IdSwitch,
}

/// Maps a (feedback, expert) trajectory pair to a scalar loss
pub trait LossScorer {
    fn score(
        &self,
        feedback: &Trajectory,
        expert: &Trajectory,
        seq_info: &SeqInfo,
        kind: LossKind,
    ) -> f64;
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq)]
pub struct MotSummary {
    pub num_frames: usize,
    pub num_objects: usize,
    pub num_predictions: usize,
    pub num_matches: usize,
    pub num_false_positives: usize,
    pub num_misses: usize,
    pub num_switches: usize,
    pub total_distance: f64,
}

impl MotSummary {
    pub fn mota(&self) -> f64 {
        if self.num_objects == 0 {
            return if self.num_predictions == 0 { 1.0 } else { 0.0 };
        }

        let errors = self.num_misses + self.num_false_positives + self.num_switches;
        1.0 - errors as f64 / self.num_objects as f64
    }

    pub fn motp(&self) -> Option<f64> {
        if self.num_matches == 0 {
            None
        } else {
            Some(self.total_distance / self.num_matches as f64)
        }
    }

    fn rate(&self, count: usize) -> f64 {
        if self.num_objects == 0 {
            if self.num_predictions == 0 {
                0.0
            } else {
                1.0
            }
        } else {
            count as f64 / self.num_objects as f64
        }
    }

    pub fn loss(&self, kind: LossKind) -> f64 {
        match kind {
            LossKind::Mota => 1.0 - self.mota(),
            LossKind::Motp => self.motp().unwrap_or(1.0),
            LossKind::FalsePositive => self.rate(self.num_false_positives),
            LossKind::FalseNegative => self.rate(self.num_misses),
            LossKind::IdSwitch => self.rate(self.num_switches),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MotAccumulator {
    max_distance: f64,
    last_match: HashMap<i32, i32>,
    summary: MotSummary,
}

impl MotAccumulator {
    pub fn new(max_distance: f64) -> Self {
        Self {
            max_distance,
            last_match: HashMap::new(),
            summary: MotSummary::default(),
        }
    }

    #[inline]
    pub fn summary(&self) -> &MotSummary {
        &self.summary
    }

    pub fn update(&mut self, objects: &[TrajectoryRow], predictions: &[TrajectoryRow]) {
        let s = &mut self.summary;
        s.num_frames += 1;
        s.num_objects += objects.len();
        s.num_predictions += predictions.len();

        let dist = |o: &TrajectoryRow, p: &TrajectoryRow| 1.0 - o.bbox.iou(&p.bbox) as f64;

        let mut obj_used = vec![false; objects.len()];
        let mut pred_used = vec![false; predictions.len()];
        let mut matches: Vec<(usize, usize, f64)> = Vec::new();

        // correspondences from the previous frame survive while still valid
        for (oi, o) in objects.iter().enumerate() {
            let Some(&hid) = self.last_match.get(&o.track_id) else {
                continue;
            };
            let found = predictions
                .iter()
                .enumerate()
                .find(|(pi, p)| !pred_used[*pi] && p.track_id == hid);

            if let Some((pi, p)) = found {
                let d = dist(o, p);
                if d <= self.max_distance {
                    obj_used[oi] = true;
                    pred_used[pi] = true;
                    matches.push((oi, pi, d));
                }
            }
        }

        let free_obj: Vec<usize> = (0..objects.len()).filter(|i| !obj_used[*i]).collect();
        let free_pred: Vec<usize> = (0..predictions.len()).filter(|i| !pred_used[*i]).collect();

        let threshold = 1.0 - self.max_distance;
        for (r, c, score) in assign_by(free_obj.len(), free_pred.len(), threshold, |r, c| {
            1.0 - dist(&objects[free_obj[r]], &predictions[free_pred[c]])
        }) {
            let (oi, pi) = (free_obj[r], free_pred[c]);
            let o = &objects[oi];
            let p = &predictions[pi];

            if let Some(&prev) = self.last_match.get(&o.track_id) {
                if prev != p.track_id {
                    s.num_switches += 1;
                }
            }

            obj_used[oi] = true;
            pred_used[pi] = true;
            matches.push((oi, pi, 1.0 - score));
        }

        for &(oi, pi, d) in &matches {
            self.last_match
                .insert(objects[oi].track_id, predictions[pi].track_id);
            s.total_distance += d;
        }

        s.num_matches += matches.len();
        s.num_misses += obj_used.iter().filter(|u| !**u).count();
        s.num_false_positives += pred_used.iter().filter(|u| !**u).count();
    }

    /// Accumulates every frame present in either trajectory
    pub fn accumulate(&mut self, feedback: &Trajectory, expert: &Trajectory) {
        let frames: BTreeSet<u32> = feedback
            .iter()
            .chain(expert.iter())
            .map(|r| r.frame)
            .collect();

        for f in frames {
            self.update(feedback.frame(f), expert.frame(f));
        }
    }
}

/// IoU based CLEAR-MOT scorer, `distth = 0.5` by default
#[derive(Debug, Clone)]
pub struct ClearMotScorer {
    max_distance: f64,
}

impl Default for ClearMotScorer {
    fn default() -> Self {
        Self { max_distance: 0.5 }
    }
}

impl ClearMotScorer {
    pub fn new(max_distance: f64) -> Self {
        Self { max_distance }
    }

    pub fn summarize(&self, feedback: &Trajectory, expert: &Trajectory) -> MotSummary {
        let mut acc = MotAccumulator::new(self.max_distance);
        acc.accumulate(feedback, expert);

        *acc.summary()
    }
}

impl LossScorer for ClearMotScorer {
    fn score(
        &self,
        feedback: &Trajectory,
        expert: &Trajectory,
        _seq_info: &SeqInfo,
        kind: LossKind,
    ) -> f64 {
        self.summarize(feedback, expert).loss(kind)
    }
}
