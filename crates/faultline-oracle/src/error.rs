//! Fault plan errors
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlanError {
    #[error("PLAN/io: {0}")]
    Io(#[from] std::io::Error),

    #[error("PLAN/yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("PLAN/rule {index}: {reason}")]
    InvalidRule { index: usize, reason: String },
}
