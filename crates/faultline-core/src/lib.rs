//! Faultline Core: causal context, vector clocks and the fault decision contract
//!
//! Leaf types shared by the client interceptor and the oracle-facing
//! instrumentor. Nothing in this crate talks to a transport.

pub mod callsite;
pub mod context;
pub mod data_model;
pub mod decision;
pub mod error;
pub mod execution_index;
pub mod headers;
pub mod outcome;
pub mod vector_clock;

pub use callsite::Callsite;
pub use context::{ContextGuard, ContextKey, ContextSnapshot, ContextStorage, FutureExt, WithContext};
pub use data_model::{FailureMetadata, ForcedException, ForcedExceptionMetadata, InvocationOutcome};
pub use decision::{DecisionFactory, DecisionSeed, FaultDecision};
pub use error::FaultError;
pub use execution_index::ExecutionIndex;
pub use outcome::OutcomeRecorder;
pub use vector_clock::VectorClock;

/// Faultline protocol version
pub const FAULTLINE_VERSION: &str = "0.4.0";
