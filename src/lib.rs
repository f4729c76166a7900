pub mod anchor;
pub mod assignment;
pub mod bbox;
pub mod config;
pub mod detection;
pub mod error;
pub mod expert;
pub mod feedback;
pub mod learner;
pub mod matcher;
pub mod math;
pub mod meta;
pub mod metrics;
pub mod mot;
pub mod sequence;
pub mod trajectory;

mod track;

pub use anchor::{AnchorDetector, FixedDetector};
pub use config::Config;
pub use detection::Detection;
pub use error::Error;
pub use expert::{Expert, ReplayExpert};
pub use feedback::{FeedbackError, OfflineTracker, ReplayFeedback};
pub use learner::WaaDelayed;
pub use matcher::IdMatcher;
pub use meta::{MetaTracker, TrackOutput};
pub use metrics::{ClearMotScorer, LossKind, LossScorer};
pub use sequence::SeqInfo;
pub use track::{find_duplicate, LabeledBox};
pub use trajectory::{Trajectory, TrajectoryRow};
