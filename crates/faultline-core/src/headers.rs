//! Outbound metadata header names.
//!
//! These headers are the wire encoding of the causal-context protocol: the
//! callee's own interceptor rebuilds its ambient context from them.

pub const REQUEST_ID: &str = "x-faultline-request-id";
pub const GENERATED_ID: &str = "x-faultline-generated-id";
pub const VECTOR_CLOCK: &str = "x-faultline-vclock";
pub const ORIGIN_VECTOR_CLOCK: &str = "x-faultline-origin-vclock";
pub const EXECUTION_INDEX: &str = "x-faultline-execution-index";
pub const FORCED_SLEEP: &str = "x-faultline-forced-sleep";

/// Set on the oracle's own traffic so it is never instrumented recursively.
pub const INSTRUMENTATION: &str = "x-faultline-instrumentation";

/// Interprets the instrumentation marker. Only a case-insensitive `true`
/// marks a request; anything else, including a missing header, does not.
pub fn is_instrumentation_request(value: Option<&str>) -> bool {
    value.map_or(false, |v| v.trim().eq_ignore_ascii_case("true"))
}
