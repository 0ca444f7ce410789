//! Oracle wire model and the backend seam.
//!
//! The instrumentor talks to the oracle through [`OracleBackend`]: one round
//! trip before the call with an [`InvocationRecord`], and one after it with a
//! [`CompletionReport`].

use chrono::{DateTime, Utc};
use faultline_core::{
    Callsite, ExecutionIndex, FailureMetadata, FaultError, ForcedException, VectorClock,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Sent to the oracle before a call is issued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationRecord {
    pub request_id: Option<String>,
    pub service_name: String,
    pub callsite: Callsite,
    pub signature: String,
    pub vector_clock: VectorClock,
    pub origin_vector_clock: VectorClock,
    pub execution_index: ExecutionIndex,
    pub timestamp: DateTime<Utc>,
}

const NO_GENERATED_ID: i64 = -1;

fn no_generated_id() -> i64 {
    NO_GENERATED_ID
}

fn default_abort() -> bool {
    true
}

/// The oracle's answer to an [`InvocationRecord`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleReply {
    /// `-1` when the oracle assigned no id.
    #[serde(default = "no_generated_id")]
    generated_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    forced_exception: Option<ForcedException>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    failure_metadata: Option<FailureMetadata>,
    #[serde(default = "default_abort")]
    should_abort: bool,
}

impl Default for OracleReply {
    fn default() -> Self {
        Self::proceed()
    }
}

impl OracleReply {
    /// No id, no fault.
    pub fn proceed() -> Self {
        Self {
            generated_id: NO_GENERATED_ID,
            forced_exception: None,
            failure_metadata: None,
            should_abort: true,
        }
    }

    pub fn with_generated_id(mut self, id: u64) -> Self {
        self.generated_id = i64::try_from(id).unwrap_or(i64::MAX);
        self
    }

    pub fn with_forced_exception(mut self, forced: ForcedException) -> Self {
        self.forced_exception = Some(forced);
        self
    }

    pub fn with_failure_metadata(mut self, failure: FailureMetadata) -> Self {
        self.failure_metadata = Some(failure);
        self
    }

    pub fn with_abort(mut self, should_abort: bool) -> Self {
        self.should_abort = should_abort;
        self
    }

    pub fn generated_id(&self) -> Option<u64> {
        u64::try_from(self.generated_id).ok()
    }

    pub fn forced_exception(&self) -> Option<&ForcedException> {
        self.forced_exception.as_ref()
    }

    pub fn failure_metadata(&self) -> Option<&FailureMetadata> {
        self.failure_metadata.as_ref()
    }

    pub fn should_abort(&self) -> bool {
        self.should_abort
    }

    pub fn has_fault(&self) -> bool {
        self.forced_exception.is_some() || self.failure_metadata.is_some()
    }
}

/// How a call ended, as reported to the oracle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Completion {
    Success {
        type_name: String,
        properties: BTreeMap<String, String>,
    },
    Exception {
        name: String,
        cause: Option<String>,
        metadata: BTreeMap<String, String>,
    },
}

/// Sent to the oracle once a call has an outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionReport {
    pub request_id: Option<String>,
    pub signature: String,
    pub execution_index: ExecutionIndex,
    pub generated_id: Option<u64>,
    pub completion: Completion,
    pub timestamp: DateTime<Utc>,
}

impl CompletionReport {
    pub fn is_success(&self) -> bool {
        matches!(self.completion, Completion::Success { .. })
    }
}

/// Round trips to the fault oracle.
///
/// Calls block the caller until the oracle answers; there is no timeout.
pub trait OracleBackend: Send + Sync {
    fn before_invocation(&self, record: &InvocationRecord) -> Result<OracleReply, FaultError>;

    fn after_invocation(&self, report: &CompletionReport) -> Result<(), FaultError>;
}
