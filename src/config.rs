use serde_derive::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::error::Error;
use crate::metrics::LossKind;

#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DetectorKind {
    Fixed,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DetectorConfig {
    #[serde(rename = "type")]
    pub kind: DetectorKind,
    pub duration: u32,
}

#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MatchingMethod {
    Anchor,
    Kmeans,
}

fn default_iou_threshold() -> f32 {
    0.3
}

fn default_max_iter() -> usize {
    10
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MatchingConfig {
    pub method: MatchingMethod,
    #[serde(default = "default_iou_threshold")]
    pub iou_threshold: f32,
    #[serde(default = "default_max_iter")]
    pub max_iter: usize,
}

impl MatchingConfig {
    pub fn new(method: MatchingMethod) -> Self {
        Self {
            method,
            iou_threshold: default_iou_threshold(),
            max_iter: default_max_iter(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct OfflineConfig {
    #[serde(default)]
    pub use_gt: bool,
    #[serde(default)]
    pub reset: bool,
    /// Drop the cycle window on anchors that got no feedback
    #[serde(default)]
    pub reset_on_miss: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct LossConfig {
    #[serde(rename = "type", default)]
    pub kind: LossKind,
    #[serde(default)]
    pub delayed: bool,
    #[serde(default)]
    pub norm: bool,
}

/// Top-level configuration of a `MetaTracker`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Config {
    pub detector: DetectorConfig,
    pub matching: MatchingConfig,
    #[serde(default)]
    pub offline: OfflineConfig,
    #[serde(default)]
    pub loss: LossConfig,
    pub experts: Vec<String>,
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Config {
    pub fn from_json_str(src: &str) -> Result<Self, Error> {
        let config: Config =
            serde_json::from_str(src).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;

        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let src = std::fs::read_to_string(path)?;

        Self::from_json_str(&src)
    }

    #[inline]
    pub fn n_experts(&self) -> usize {
        self.experts.len()
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.experts.is_empty() {
            return Err(Error::Config("at least one expert is required".into()));
        }

        if self.detector.kind == DetectorKind::Fixed && self.detector.duration == 0 {
            return Err(Error::Config("fixed detector duration must be positive".into()));
        }

        let thr = self.matching.iou_threshold;
        if !(thr > 0.0 && thr <= 1.0) {
            return Err(Error::Config(format!(
                "matching iou_threshold must be in (0, 1], got {}",
                thr
            )));
        }

        if self.matching.max_iter == 0 {
            return Err(Error::Config("matching max_iter must be positive".into()));
        }

        Ok(())
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?}, {:?}({}), gt={} reset={}, {:?} delayed={} norm={}",
            self.matching.method,
            self.detector.kind,
            self.detector.duration,
            self.offline.use_gt,
            self.offline.reset,
            self.loss.kind,
            self.loss.delayed,
            self.loss.norm,
        )
    }
}
