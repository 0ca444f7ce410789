//! Fault Decision: the oracle-facing contract consulted once per call
use std::collections::HashMap;

use crate::callsite::Callsite;
use crate::context::ContextStorage;
use crate::data_model::{FailureMetadata, ForcedException};
use crate::error::FaultError;
use crate::execution_index::ExecutionIndex;
use crate::vector_clock::VectorClock;

/// Per-call decision handle.
///
/// Lifecycle: `prepare_for_invocation`, then `before_invocation`, then the
/// getters, then at most one `after_*` report. A handle belongs to a single
/// call and is never shared across calls.
pub trait FaultDecision: Send {
    /// Positions the call in its causal chain (clock, index, request id).
    fn prepare_for_invocation(&mut self) -> Result<(), FaultError>;

    /// Records the invocation with the oracle and fetches its decision.
    fn before_invocation(&mut self) -> Result<(), FaultError>;

    fn outgoing_request_id(&self) -> Option<String>;

    /// Oracle-assigned id for this invocation, if any.
    fn generated_id(&self) -> Option<u64>;

    fn vector_clock(&self) -> VectorClock;

    fn origin_vector_clock(&self) -> VectorClock;

    fn execution_index(&self) -> ExecutionIndex;

    fn forced_exception(&self) -> Option<&ForcedException>;

    fn failure_metadata(&self) -> Option<&FailureMetadata>;

    /// `true` unless the oracle asked for the real call to run and its
    /// result to be replaced by the forced exception afterwards.
    fn should_abort(&self) -> bool;

    fn after_invocation_complete(
        &mut self,
        type_name: &str,
        properties: &HashMap<String, String>,
    ) -> Result<(), FaultError>;

    fn after_invocation_with_exception(
        &mut self,
        name: &str,
        cause: Option<&str>,
        metadata: &HashMap<String, String>,
    ) -> Result<(), FaultError>;
}

/// Everything a factory needs to seed a fresh decision handle.
#[derive(Debug, Clone)]
pub struct DecisionSeed {
    pub service_name: String,
    /// When `false` the handle must behave as a successful no-op decision.
    pub communicate_with_oracle: bool,
    pub storage: ContextStorage,
    pub callsite: Callsite,
}

/// Creates one decision handle per instrumented call.
pub trait DecisionFactory: Send + Sync {
    fn create(&self, seed: DecisionSeed) -> Box<dyn FaultDecision>;
}
