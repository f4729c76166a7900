use serde_derive::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::RangeInclusive;

use crate::bbox::{BBox, Ltwh};
use crate::track::LabeledBox;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct TrajectoryRow {
    pub frame: u32,
    pub track_id: i32,
    pub bbox: BBox<Ltwh>,
}

impl TrajectoryRow {
    #[inline]
    pub fn labeled(&self) -> LabeledBox {
        LabeledBox {
            track_id: self.track_id,
            bbox: self.bbox,
        }
    }
}

/// Ordered `(frame, track_id, box)` rows spanning a window of frames.
///
/// Rows are kept sorted by `(frame, track_id)`, so per-frame lookups are
/// binary searches.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Trajectory {
    rows: Vec<TrajectoryRow>,
}

impl Trajectory {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rows(mut rows: Vec<TrajectoryRow>) -> Self {
        rows.sort_by_key(|r| (r.frame, r.track_id));
        Self { rows }
    }

    /// Appends one frame worth of boxes. Frames must be pushed in
    /// non-decreasing order.
    pub fn push_frame(&mut self, frame: u32, boxes: &[LabeledBox]) {
        debug_assert!(self.rows.last().map_or(true, |r| r.frame <= frame));

        let start = self.rows.len();
        self.rows.extend(boxes.iter().map(|b| TrajectoryRow {
            frame,
            track_id: b.track_id,
            bbox: b.bbox,
        }));
        self.rows[start..].sort_by_key(|r| r.track_id);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    #[inline]
    pub fn rows(&self) -> &[TrajectoryRow] {
        &self.rows
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &TrajectoryRow> {
        self.rows.iter()
    }

    /// First and last frame with at least one row
    pub fn frames(&self) -> Option<RangeInclusive<u32>> {
        let first = self.rows.first()?.frame;
        let last = self.rows.last()?.frame;

        Some(first..=last)
    }

    pub fn frame(&self, frame: u32) -> &[TrajectoryRow] {
        let start = self.rows.partition_point(|r| r.frame < frame);
        let end = self.rows.partition_point(|r| r.frame <= frame);

        &self.rows[start..end]
    }

    /// Keeps rows of frames `> offset` and renumbers them to `frame - offset`
    pub fn restrict_after(&self, offset: u32) -> Trajectory {
        let start = self.rows.partition_point(|r| r.frame <= offset);

        Trajectory {
            rows: self.rows[start..]
                .iter()
                .map(|r| TrajectoryRow {
                    frame: r.frame - offset,
                    ..*r
                })
                .collect(),
        }
    }

    /// Keeps rows with `frame <= last`
    pub fn truncate_to(&self, last: u32) -> Trajectory {
        let end = self.rows.partition_point(|r| r.frame <= last);

        Trajectory {
            rows: self.rows[..end].to_vec(),
        }
    }

    pub fn by_frame(&self) -> BTreeMap<u32, Vec<LabeledBox>> {
        let mut map: BTreeMap<u32, Vec<LabeledBox>> = BTreeMap::new();
        for r in &self.rows {
            map.entry(r.frame).or_default().push(r.labeled());
        }

        map
    }
}

impl FromIterator<TrajectoryRow> for Trajectory {
    fn from_iter<I: IntoIterator<Item = TrajectoryRow>>(iter: I) -> Self {
        Self::from_rows(iter.into_iter().collect())
    }
}
