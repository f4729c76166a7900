use serde_derive::{Deserialize, Serialize};

use crate::bbox::{BBox, Ltwh};

/// One labeled box of one expert for one frame. The `track_id` is local to
/// the expert that produced it until it passes through an `IdMatcher`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct LabeledBox {
    pub track_id: i32,
    pub bbox: BBox<Ltwh>,
}

impl LabeledBox {
    #[inline]
    pub fn new(track_id: i32, x: f32, y: f32, w: f32, h: f32) -> Self {
        Self {
            track_id,
            bbox: BBox::ltwh(x, y, w, h),
        }
    }

    #[inline]
    pub fn with_id(&self, track_id: i32) -> Self {
        Self {
            track_id,
            bbox: self.bbox,
        }
    }
}

/// First duplicated track id in `boxes`, if any
pub fn find_duplicate(boxes: &[LabeledBox]) -> Option<i32> {
    let mut seen = std::collections::HashSet::with_capacity(boxes.len());

    boxes
        .iter()
        .map(|b| b.track_id)
        .find(|id| !seen.insert(*id))
}
