//! Call tracer hook: the outer observer of every instrumented call.
//!
//! A tracer opens the call's context when the call is created and is told
//! when it ends, either with the terminal status or with the error that
//! aborted the interceptor before the call could be issued.

use faultline_core::ContextSnapshot;
use tonic::Status;

use crate::error::InterceptError;
use crate::transport::{code_name, MethodDescriptor};

pub trait CallTracer: Send + Sync {
    /// Returns the context the call runs under. Implementations that do not
    /// add anything return `parent` unchanged.
    fn start(&self, parent: &ContextSnapshot, method: &MethodDescriptor) -> ContextSnapshot;

    fn end(
        &self,
        context: &ContextSnapshot,
        method: &MethodDescriptor,
        status: Option<&Status>,
        error: Option<&InterceptError>,
    );
}

/// Emits call boundaries as `tracing` events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingCallTracer;

impl CallTracer for TracingCallTracer {
    fn start(&self, parent: &ContextSnapshot, method: &MethodDescriptor) -> ContextSnapshot {
        tracing::info!(
            target: "faultline.call",
            method = method.full_method_name(),
            request_id = parent.request_id().unwrap_or(""),
            "call started"
        );
        parent.clone()
    }

    fn end(
        &self,
        context: &ContextSnapshot,
        method: &MethodDescriptor,
        status: Option<&Status>,
        error: Option<&InterceptError>,
    ) {
        let request_id = context.request_id().unwrap_or("");
        match (status, error) {
            (_, Some(err)) => tracing::warn!(
                target: "faultline.call",
                method = method.full_method_name(),
                request_id,
                error = %err,
                "call aborted before issue"
            ),
            (Some(status), None) => tracing::info!(
                target: "faultline.call",
                method = method.full_method_name(),
                request_id,
                code = code_name(status.code()),
                message = status.message(),
                "call ended"
            ),
            (None, None) => tracing::info!(
                target: "faultline.call",
                method = method.full_method_name(),
                request_id,
                "call ended"
            ),
        }
    }
}
