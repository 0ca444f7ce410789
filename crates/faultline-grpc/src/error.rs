//! Interceptor and configuration errors
use faultline_core::FaultError;
use thiserror::Error;
use tonic::Status;

#[derive(Error, Debug)]
pub enum InterceptError {
    #[error("STATUS/unknown status code `{0}`")]
    UnknownStatusCode(String),

    #[error("HEADER/value for `{0}` is not printable ASCII")]
    InvalidHeader(String),

    #[error("DECISION/{0}")]
    Decision(#[from] FaultError),

    #[error("CALL/{0}")]
    IllegalState(String),

    #[error("TRANSPORT/{:?}: {}", .0.code(), .0.message())]
    Transport(Status),
}

impl From<InterceptError> for Status {
    fn from(err: InterceptError) -> Self {
        match err {
            InterceptError::Transport(status) => status,
            other => Status::internal(other.to_string()),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("CONFIG/io: {0}")]
    Io(#[from] std::io::Error),

    #[error("CONFIG/yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
