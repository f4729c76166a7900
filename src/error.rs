use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Config Error: {0}")]
    Config(String),

    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse Error at line {line}: {reason}")]
    Parse { line: usize, reason: String },

    #[error("Expected results from {expected} experts, got {got}")]
    ExpertCount { expected: usize, got: usize },

    #[error("Duplicated ID {id} in frame {frame}")]
    DuplicateId { frame: usize, id: i32 },

    #[error("Loss of expert {expert} is not finite: {loss}")]
    InvalidLoss { expert: usize, loss: f64 },

    #[error("Sampling Error: {0}")]
    Sampling(#[from] rand::distributions::WeightedError),
}
