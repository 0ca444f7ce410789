//! Data Model: oracle fault instructions and invocation outcomes
use serde::{Deserialize, Serialize};
use std::fmt;

/// Instruction to fail a call with a specific exception.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForcedException {
    /// Exception identity reported back to the oracle
    pub name: String,
    pub metadata: ForcedExceptionMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForcedExceptionMetadata {
    #[serde(default)]
    pub cause: String,
    /// Transport status code name (e.g. "UNAVAILABLE")
    pub code: String,
    /// Latency the callee should simulate, in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sleep: Option<u64>,
}

impl ForcedException {
    pub fn new(name: impl Into<String>, cause: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            metadata: ForcedExceptionMetadata {
                cause: cause.into(),
                code: code.into(),
                sleep: None,
            },
        }
    }

    pub fn with_sleep(mut self, millis: u64) -> Self {
        self.metadata.sleep = Some(millis);
        self
    }

    pub fn code(&self) -> &str {
        &self.metadata.code
    }

    pub fn cause(&self) -> &str {
        &self.metadata.cause
    }

    pub fn sleep(&self) -> Option<u64> {
        self.metadata.sleep
    }
}

/// Instruction to fail a call with a bare transport status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureMetadata {
    pub exception: FailureException,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureException {
    pub metadata: FailureExceptionMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureExceptionMetadata {
    pub code: String,
}

impl FailureMetadata {
    pub fn with_code(code: impl Into<String>) -> Self {
        Self {
            exception: FailureException {
                metadata: FailureExceptionMetadata { code: code.into() },
            },
        }
    }

    pub fn code(&self) -> &str {
        &self.exception.metadata.code
    }
}

/// Terminal tag of one instrumented call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationOutcome {
    /// The real call ran and returned a response
    ForwardedSuccess,
    /// The real call ran and failed at the transport
    ForwardedException,
    /// The oracle's forced exception was delivered instead of a result
    ForcedException,
    /// The oracle's failure metadata was delivered without a network call
    ForcedFailureMetadata,
}

impl InvocationOutcome {
    pub fn is_failure(self) -> bool {
        !matches!(self, InvocationOutcome::ForwardedSuccess)
    }

    pub fn is_injected(self) -> bool {
        matches!(
            self,
            InvocationOutcome::ForcedException | InvocationOutcome::ForcedFailureMetadata
        )
    }
}

impl fmt::Display for InvocationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            InvocationOutcome::ForwardedSuccess => write!(f, "forwarded-success"),
            InvocationOutcome::ForwardedException => write!(f, "forwarded-exception"),
            InvocationOutcome::ForcedException => write!(f, "forced-exception"),
            InvocationOutcome::ForcedFailureMetadata => write!(f, "forced-failure-metadata"),
        }
    }
}
