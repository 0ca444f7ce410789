//! Fault plans: which calls fail, and how.
//!
//! A plan is an ordered list of rules loaded from YAML. The first rule that
//! matches an invocation decides the oracle's reply; an invocation no rule
//! matches proceeds normally.
//!
//! ```yaml
//! rules:
//!   - method: Hello/SayHello
//!     occurrence: 2
//!     forced_exception:
//!       name: io.grpc.StatusRuntimeException
//!       metadata:
//!         cause: injected
//!         code: UNAVAILABLE
//!         sleep: 100
//!     abort: true
//! ```

use std::path::Path;

use faultline_core::{FailureMetadata, ForcedException};
use faultline_grpc::parse_code;
use serde::{Deserialize, Serialize};

use crate::backend::{InvocationRecord, OracleReply};
use crate::error::PlanError;

/// Matches any method.
pub const ANY_METHOD: &str = "*";

fn default_abort() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultRule {
    /// Full method name, or `*`.
    pub method: String,
    /// Only calls made by this service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    /// Only the n-th (1-based) invocation of `method` seen by the oracle.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub occurrence: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forced_exception: Option<ForcedException>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_metadata: Option<FailureMetadata>,
    #[serde(default = "default_abort")]
    pub abort: bool,
}

impl FaultRule {
    pub fn matches(&self, record: &InvocationRecord, occurrence: u32) -> bool {
        let method = self.method == ANY_METHOD || self.method == record.callsite.full_method_name();
        let service = self
            .service
            .as_deref()
            .map_or(true, |service| service == record.service_name);
        let nth = self.occurrence.map_or(true, |n| n == occurrence);
        method && service && nth
    }

    pub fn reply(&self) -> OracleReply {
        let mut reply = OracleReply::proceed().with_abort(self.abort);
        if let Some(forced) = &self.forced_exception {
            reply = reply.with_forced_exception(forced.clone());
        }
        if let Some(failure) = &self.failure_metadata {
            reply = reply.with_failure_metadata(failure.clone());
        }
        reply
    }

    fn validate(&self, index: usize) -> Result<(), PlanError> {
        let invalid = |reason: String| PlanError::InvalidRule { index, reason };

        if self.method.is_empty() {
            return Err(invalid("method is empty".into()));
        }
        if self.occurrence == Some(0) {
            return Err(invalid("occurrence is 1-based".into()));
        }
        if self.forced_exception.is_none() && self.failure_metadata.is_none() {
            return Err(invalid("rule injects no fault".into()));
        }
        let codes = self
            .forced_exception
            .iter()
            .map(ForcedException::code)
            .chain(self.failure_metadata.iter().map(FailureMetadata::code));
        for code in codes {
            parse_code(code).map_err(|_| invalid(format!("unknown status code `{}`", code)))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultPlan {
    #[serde(default)]
    pub rules: Vec<FaultRule>,
}

impl FaultPlan {
    pub fn new(rules: Vec<FaultRule>) -> Result<Self, PlanError> {
        let plan = Self { rules };
        plan.validate()?;
        Ok(plan)
    }

    pub fn from_yaml_str(source: &str) -> Result<Self, PlanError> {
        let plan: FaultPlan = serde_yaml::from_str(source)?;
        plan.validate()?;
        Ok(plan)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, PlanError> {
        let source = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&source)
    }

    pub fn validate(&self) -> Result<(), PlanError> {
        self.rules
            .iter()
            .enumerate()
            .try_for_each(|(index, rule)| rule.validate(index))
    }

    /// First rule matching the invocation, with its index.
    pub fn find(&self, record: &InvocationRecord, occurrence: u32) -> Option<(usize, &FaultRule)> {
        self.rules
            .iter()
            .enumerate()
            .find(|(_, rule)| rule.matches(record, occurrence))
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
