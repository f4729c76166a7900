use serde_derive::{Deserialize, Serialize};

/// Static description of one tracked sequence
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct SeqInfo {
    pub dataset_name: String,
    pub seq_name: String,
    #[serde(default)]
    pub seq_length: Option<usize>,
}

impl SeqInfo {
    pub fn new(dataset_name: &str, seq_name: &str) -> Self {
        Self {
            dataset_name: dataset_name.to_string(),
            seq_name: seq_name.to_string(),
            ..Default::default()
        }
    }

    /// MOT16 and MOT17 ground truth carries a consider flag and an object
    /// class, and only considered pedestrians are scored
    #[inline]
    pub fn is_mot_challenge(&self) -> bool {
        matches!(self.dataset_name.as_str(), "MOT16" | "MOT17")
    }
}
