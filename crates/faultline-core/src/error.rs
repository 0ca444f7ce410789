//! Unified error model for decisions and causal metadata
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FaultError {
    #[error("ORACLE/{0}")]
    Oracle(String),

    #[error("DECODE/{0}")]
    Decode(String),

    #[error("SERIALIZE/{0}")]
    Serialize(#[from] serde_json::Error),

    #[error("STATE/{0}")]
    InvalidState(String),
}
