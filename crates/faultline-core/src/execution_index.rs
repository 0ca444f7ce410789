//! Execution index: the position of a call inside its causal chain.
//!
//! An index is the path of callsites from the root request down to the
//! current call. Each frame pairs a callsite signature with how many times
//! that signature has been invoked under the same parent, so that repeated
//! identical calls get distinct, reproducible positions across test runs.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::FaultError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionIndex {
    frames: Vec<(String, u32)>,
}

impl ExecutionIndex {
    /// The index of the root of a chain, before any outbound call.
    pub fn root() -> Self {
        Self::default()
    }

    /// A child index one level deeper than `self`.
    pub fn push(&self, signature: impl Into<String>, occurrence: u32) -> Self {
        let mut frames = self.frames.clone();
        frames.push((signature.into(), occurrence));
        Self { frames }
    }

    /// The index one level up, or `None` at the root.
    pub fn parent(&self) -> Option<Self> {
        if self.frames.is_empty() {
            return None;
        }
        let mut frames = self.frames.clone();
        frames.pop();
        Some(Self { frames })
    }

    pub fn last(&self) -> Option<(&str, u32)> {
        self.frames.last().map(|(sig, n)| (sig.as_str(), *n))
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn is_root(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn encode(&self) -> String {
        serde_json::to_string(&self.frames).unwrap_or_else(|_| "[]".to_string())
    }

    pub fn decode(encoded: &str) -> Result<Self, FaultError> {
        let trimmed = encoded.trim();
        if trimmed.is_empty() {
            return Ok(Self::root());
        }
        let frames = serde_json::from_str(trimmed)
            .map_err(|e| FaultError::Decode(format!("execution index `{}`: {}", trimmed, e)))?;
        Ok(Self { frames })
    }

    /// Absent or malformed input yields the root index.
    pub fn decode_or_default(encoded: Option<&str>) -> Self {
        match encoded {
            None => Self::root(),
            Some(raw) => Self::decode(raw).unwrap_or_else(|err| {
                tracing::warn!(error = %err, "discarding malformed execution index");
                Self::root()
            }),
        }
    }
}

impl fmt::Display for ExecutionIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for ExecutionIndex {
    type Err = FaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}
