//! Faultline Oracle: the default fault decision and an in-memory oracle
//!
//! [`InstrumentorFactory`] plugs into the interceptor as its
//! [`DecisionFactory`](faultline_core::DecisionFactory). Each call gets a
//! [`ClientInstrumentor`] that advances the causal metadata and asks an
//! [`OracleBackend`] what to do. [`ScriptedOracle`] is a backend that answers
//! from a YAML [`FaultPlan`] and keeps a log of everything it saw.

pub mod backend;
pub mod error;
pub mod instrumentor;
pub mod plan;
pub mod scripted;

pub use backend::{Completion, CompletionReport, InvocationRecord, OracleBackend, OracleReply};
pub use error::PlanError;
pub use instrumentor::{ClientInstrumentor, InstrumentorFactory, OccurrenceCounter};
pub use plan::{FaultPlan, FaultRule, ANY_METHOD};
pub use scripted::{LoggedInvocation, OracleLog, ScriptedOracle};
