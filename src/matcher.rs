//! Identity reconciliation across expert switches.
//!
//! Expert track ids are local to each expert. `IdMatcher` turns the boxes of
//! the currently selected expert into one id space that stays stable when the
//! selection changes. Output ids are unique per frame as long as every expert
//! emits unique ids.

use nalgebra as na;
use ndarray::ArrayView1;
use std::collections::HashSet;

use crate::assignment::{assign_by, assign_iou};
use crate::bbox::{BBox, Ltwh};
use crate::config::{MatchingConfig, MatchingMethod};
use crate::track::LabeledBox;

// identity votes dominate, overlap only breaks ties
const IOU_TIE_BREAK: f64 = 1e-3;

#[derive(Debug, Clone)]
pub enum IdMatcher {
    Anchor(AnchorMatcher),
    KMeans(KMeansMatcher),
}

impl IdMatcher {
    pub fn new(config: &MatchingConfig) -> Self {
        match config.method {
            MatchingMethod::Anchor => IdMatcher::Anchor(AnchorMatcher::new(config.iou_threshold)),
            MatchingMethod::Kmeans => {
                IdMatcher::KMeans(KMeansMatcher::new(config.iou_threshold, config.max_iter))
            }
        }
    }

    pub fn initialize(&mut self, n_experts: usize) {
        match self {
            IdMatcher::Anchor(m) => m.initialize(n_experts),
            IdMatcher::KMeans(m) => m.initialize(n_experts),
        }
    }

    /// Reconciled boxes of `selected` for the current frame. `prev` is the
    /// expert displayed on the previous frame, `None` on the first one.
    pub fn match_frame(
        &mut self,
        prev: Option<usize>,
        selected: usize,
        weights: ArrayView1<'_, f64>,
        results: &[Vec<LabeledBox>],
    ) -> Vec<LabeledBox> {
        match self {
            IdMatcher::Anchor(m) => m.anchor_match(prev, selected, results),
            IdMatcher::KMeans(m) => m.kmeans_match(weights, selected, results),
        }
    }
}

/// Passes the selected expert through and relabels only on a switch, by
/// best overlap with what was displayed on the last frame.
///
/// The relabelling holds for the switch frame alone. On the following frames
/// the new expert is unchanged, so its raw ids pass through again.
#[derive(Debug, Clone)]
pub struct AnchorMatcher {
    iou_threshold: f32,
    displayed: Vec<LabeledBox>,
    max_id: i32,
}

impl AnchorMatcher {
    pub fn new(iou_threshold: f32) -> Self {
        Self {
            iou_threshold,
            displayed: Vec::new(),
            max_id: 0,
        }
    }

    pub fn initialize(&mut self, _n_experts: usize) {
        self.displayed.clear();
        self.max_id = 0;
    }

    pub fn anchor_match(
        &mut self,
        prev: Option<usize>,
        selected: usize,
        results: &[Vec<LabeledBox>],
    ) -> Vec<LabeledBox> {
        let current = &results[selected];
        self.observe(current);

        let out = match prev {
            Some(p) if p != selected => {
                let out = self.relabel(current);
                tracing::debug!(from = p, to = selected, boxes = out.len(), "relabeled on switch");
                out
            }
            _ => current.clone(),
        };

        self.observe(&out);
        self.displayed = out.clone();

        out
    }

    fn observe(&mut self, boxes: &[LabeledBox]) {
        if let Some(max) = boxes.iter().map(|b| b.track_id).max() {
            self.max_id = self.max_id.max(max);
        }
    }

    fn relabel(&mut self, current: &[LabeledBox]) -> Vec<LabeledBox> {
        let cur: Vec<BBox<Ltwh>> = current.iter().map(|b| b.bbox).collect();
        let shown: Vec<BBox<Ltwh>> = self.displayed.iter().map(|b| b.bbox).collect();

        let mut ids: Vec<Option<i32>> = vec![None; current.len()];
        let mut used = HashSet::with_capacity(current.len());
        for (ci, di, _) in assign_iou(&cur, &shown, self.iou_threshold) {
            let id = self.displayed[di].track_id;
            ids[ci] = Some(id);
            used.insert(id);
        }

        let reserved: HashSet<i32> = self.displayed.iter().map(|b| b.track_id).collect();
        current
            .iter()
            .zip(ids)
            .map(|(b, id)| {
                let id = id.unwrap_or_else(|| {
                    let raw = b.track_id;
                    let id = if used.contains(&raw) || reserved.contains(&raw) {
                        self.max_id += 1;
                        self.max_id
                    } else {
                        raw
                    };
                    used.insert(id);
                    id
                });

                b.with_id(id)
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
struct Cluster {
    centroid: na::Vector4<f32>,
    // index into the expert's boxes, per expert
    members: Vec<Option<usize>>,
}

impl Cluster {
    fn seed(bbox: &BBox<Ltwh>, n_experts: usize) -> Self {
        Self {
            centroid: na::Vector4::from(*bbox.as_slice()),
            members: vec![None; n_experts],
        }
    }

    #[inline]
    fn bbox(&self) -> BBox<Ltwh> {
        BBox::assigned(&self.centroid.into())
    }

    fn is_empty(&self) -> bool {
        self.members.iter().all(Option::is_none)
    }
}

#[derive(Debug, Clone)]
struct PersistentCluster {
    id: i32,
    bbox: BBox<Ltwh>,
    local_ids: Vec<Option<i32>>,
}

/// Clusters overlapping boxes of all experts weighted by trust and gives
/// each cluster a persistent id; the selected expert's box in a cluster is
/// emitted under that id
#[derive(Debug, Clone)]
pub struct KMeansMatcher {
    iou_threshold: f32,
    max_iter: usize,
    n_experts: usize,
    prev: Vec<PersistentCluster>,
    next_id: i32,
}

impl KMeansMatcher {
    pub fn new(iou_threshold: f32, max_iter: usize) -> Self {
        Self {
            iou_threshold,
            max_iter: max_iter.max(1),
            n_experts: 0,
            prev: Vec::new(),
            next_id: 1,
        }
    }

    pub fn initialize(&mut self, n_experts: usize) {
        self.n_experts = n_experts;
        self.prev.clear();
        self.next_id = 1;
    }

    pub fn kmeans_match(
        &mut self,
        weights: ArrayView1<'_, f64>,
        selected: usize,
        results: &[Vec<LabeledBox>],
    ) -> Vec<LabeledBox> {
        let n = results.len().max(self.n_experts);
        let weight = |e: usize| weights.get(e).copied().unwrap_or(0.0).max(0.0);

        let clusters = self.cluster(n, &weight, results);
        let ids = self.assign_ids(&clusters, &weight, results);

        let mut out: Vec<(usize, LabeledBox)> = clusters
            .iter()
            .zip(&ids)
            .filter_map(|(c, &id)| {
                let bi = c.members.get(selected).copied().flatten()?;
                Some((bi, results[selected][bi].with_id(id)))
            })
            .collect();
        out.sort_by_key(|(bi, _)| *bi);

        self.prev = clusters
            .iter()
            .zip(ids)
            .map(|(c, id)| PersistentCluster {
                id,
                bbox: c.bbox(),
                local_ids: local_ids(c, results),
            })
            .collect();

        out.into_iter().map(|(_, b)| b).collect()
    }

    fn cluster<W: Fn(usize) -> f64>(
        &self,
        n: usize,
        weight: &W,
        results: &[Vec<LabeledBox>],
    ) -> Vec<Cluster> {
        let mut order: Vec<usize> = (0..results.len()).collect();
        order.sort_by(|&a, &b| {
            weight(b)
                .partial_cmp(&weight(a))
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut clusters: Vec<Cluster> = match order.first() {
            Some(&top) => results[top].iter().map(|b| Cluster::seed(&b.bbox, n)).collect(),
            None => return Vec::new(),
        };
        let mut last_members: Option<Vec<Vec<Option<usize>>>> = None;

        for _ in 0..self.max_iter {
            for c in clusters.iter_mut() {
                c.members.iter_mut().for_each(|m| *m = None);
            }

            for &e in &order {
                let boxes: Vec<BBox<Ltwh>> = results[e].iter().map(|b| b.bbox).collect();
                let centers: Vec<BBox<Ltwh>> = clusters.iter().map(Cluster::bbox).collect();

                let mut matched = vec![false; boxes.len()];
                for (bi, ci, _) in assign_iou(&boxes, &centers, self.iou_threshold) {
                    clusters[ci].members[e] = Some(bi);
                    matched[bi] = true;
                }

                for (bi, b) in boxes.iter().enumerate().filter(|(bi, _)| !matched[*bi]) {
                    let mut c = Cluster::seed(b, n);
                    c.members[e] = Some(bi);
                    clusters.push(c);
                }
            }

            clusters.retain(|c| !c.is_empty());
            for c in clusters.iter_mut() {
                c.centroid = weighted_centroid(c, weight, results);
            }

            let members: Vec<_> = clusters.iter().map(|c| c.members.clone()).collect();
            if last_members.as_ref() == Some(&members) {
                break;
            }
            last_members = Some(members);
        }

        clusters
    }

    fn assign_ids<W: Fn(usize) -> f64>(
        &mut self,
        clusters: &[Cluster],
        weight: &W,
        results: &[Vec<LabeledBox>],
    ) -> Vec<i32> {
        let current: Vec<Vec<Option<i32>>> = clusters.iter().map(|c| local_ids(c, results)).collect();

        let votes = |ci: usize, pi: usize| -> f64 {
            current[ci]
                .iter()
                .zip(&self.prev[pi].local_ids)
                .enumerate()
                .filter(|(_, (a, b))| a.is_some() && a == b)
                .map(|(e, _)| weight(e))
                .sum()
        };
        let overlap = |ci: usize, pi: usize| clusters[ci].bbox().iou(&self.prev[pi].bbox);

        let pairs = assign_by(clusters.len(), self.prev.len(), f64::MIN, |ci, pi| {
            votes(ci, pi) + IOU_TIE_BREAK * overlap(ci, pi) as f64
        });

        let mut ids: Vec<Option<i32>> = vec![None; clusters.len()];
        for (ci, pi, _) in pairs {
            if votes(ci, pi) > 0.0 || overlap(ci, pi) >= self.iou_threshold {
                ids[ci] = Some(self.prev[pi].id);
            }
        }

        ids.into_iter()
            .map(|id| {
                id.unwrap_or_else(|| {
                    let id = self.next_id;
                    self.next_id += 1;
                    id
                })
            })
            .collect()
    }
}

fn local_ids(c: &Cluster, results: &[Vec<LabeledBox>]) -> Vec<Option<i32>> {
    c.members
        .iter()
        .enumerate()
        .map(|(e, m)| m.map(|bi| results[e][bi].track_id))
        .collect()
}

fn weighted_centroid<W: Fn(usize) -> f64>(
    c: &Cluster,
    weight: &W,
    results: &[Vec<LabeledBox>],
) -> na::Vector4<f32> {
    let mut sum = na::Vector4::zeros();
    let mut plain = na::Vector4::zeros();
    let mut total = 0.0f32;
    let mut count = 0.0f32;

    for (e, m) in c.members.iter().enumerate() {
        if let Some(bi) = *m {
            let v = na::Vector4::from(*results[e][bi].bbox.as_slice());
            let w = weight(e) as f32;
            sum += v * w;
            plain += v;
            total += w;
            count += 1.0;
        }
    }

    if total > f32::EPSILON {
        sum / total
    } else if count > 0.0 {
        plain / count
    } else {
        c.centroid
    }
}
