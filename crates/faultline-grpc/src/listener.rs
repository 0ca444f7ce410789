//! Response listener wrapper for forwarded calls.
//!
//! Sits between the transport and the caller's listener. It reports the
//! call's outcome to the oracle exactly once, applies a fault the oracle
//! scheduled for after the real call, and runs every caller callback under
//! the right ambient context: the call context for messages and readiness,
//! the parent context for the close.

use std::collections::HashMap;
use std::sync::Arc;

use faultline_core::{ContextSnapshot, ForcedException, InvocationOutcome, OutcomeRecorder};
use tonic::metadata::MetadataMap;
use tonic::{Code, Status};

use crate::fault;
use crate::tracer::CallTracer;
use crate::transport::{code_name, Listener, MethodDescriptor};

pub(crate) struct FaultListener<Resp> {
    delegate: Box<dyn Listener<Resp>>,
    recorder: OutcomeRecorder,
    parent: ContextSnapshot,
    context: ContextSnapshot,
    method: MethodDescriptor,
    tracer: Option<Arc<dyn CallTracer>>,
    closed: bool,
}

impl<Resp> FaultListener<Resp> {
    pub(crate) fn new(
        delegate: Box<dyn Listener<Resp>>,
        recorder: OutcomeRecorder,
        parent: ContextSnapshot,
        context: ContextSnapshot,
        method: MethodDescriptor,
        tracer: Option<Arc<dyn CallTracer>>,
    ) -> Self {
        Self {
            delegate,
            recorder,
            parent,
            context,
            method,
            tracer,
            closed: false,
        }
    }

    /// The forced exception to apply after the real call, if the oracle
    /// asked for the call to run rather than abort.
    fn scheduled_fault(&self) -> Option<ForcedException> {
        let decision = self.recorder.decision();
        if decision.should_abort() {
            return None;
        }
        let forced = decision.forced_exception().cloned();
        if forced.is_none() {
            tracing::debug!(
                method = self.method.full_method_name(),
                "abort not requested but no forced exception present"
            );
        }
        forced
    }

    fn inject(&mut self, forced: &ForcedException) -> Status {
        match fault::report_forced_exception(&mut self.recorder, forced) {
            Ok(status) => status,
            Err(err) => {
                tracing::warn!(error = %err, name = %forced.name, "forced exception has bad code");
                let metadata = HashMap::from([("code".to_string(), code_name(Code::Unknown).to_string())]);
                self.recorder.report_exception(
                    InvocationOutcome::ForcedException,
                    &forced.name,
                    Some(forced.cause()),
                    metadata,
                );
                fault::injected_status(Code::Unknown)
            }
        }
    }
}

impl<Resp: Send + 'static> Listener<Resp> for FaultListener<Resp> {
    fn on_headers(&mut self, headers: &MetadataMap) {
        let _guard = self.context.activate();
        self.delegate.on_headers(headers);
    }

    fn on_message(&mut self, message: Resp) -> Result<(), Status> {
        if let Some(forced) = self.scheduled_fault() {
            // The call succeeded, but the oracle wants it to fail anyway.
            let status = self.inject(&forced);
            tracing::info!(
                method = self.method.full_method_name(),
                code = ?status.code(),
                "discarding response for scheduled fault"
            );
            return Err(status);
        }

        self.recorder.report_success(std::any::type_name::<Resp>());

        let _guard = self.context.activate();
        self.delegate.on_message(message)
    }

    fn on_close(&mut self, status: Status, trailers: MetadataMap) {
        if self.closed {
            tracing::warn!(
                method = self.method.full_method_name(),
                code = ?status.code(),
                "ignoring close after close"
            );
            return;
        }
        self.closed = true;

        if let Some(tracer) = &self.tracer {
            tracer.end(&self.context, &self.method, Some(&status), None);
        }
        tracing::debug!(
            method = self.method.full_method_name(),
            code = ?status.code(),
            "call closed"
        );

        let terminal = match self.scheduled_fault() {
            Some(forced) => {
                // Closed without a message: the fault has not been applied yet.
                if !self.recorder.is_resolved() {
                    self.inject(&forced);
                }
                fault::forced_exception_status(&forced)
            }
            None if self.recorder.is_resolved() => status,
            None if status.code() == Code::Ok => {
                tracing::warn!(
                    method = self.method.full_method_name(),
                    "closed cleanly without a response"
                );
                fault::report_missing_response(&mut self.recorder)
            }
            None => {
                fault::report_transport_failure(&mut self.recorder, &status);
                status
            }
        };

        let _guard = self.parent.activate();
        self.delegate.on_close(terminal, trailers);
    }

    fn on_ready(&mut self) {
        let _guard = self.context.activate();
        self.delegate.on_ready();
    }
}
