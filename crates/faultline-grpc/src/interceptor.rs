//! Call interceptor: the per-call fault-injection state machine.
//!
//! ```text
//! Idle ─start─▶ Deciding ─send_message─┬─▶ PassThrough
//!                                      └─▶ Instrumented ─┬─▶ Forwarding
//!                                                        └─▶ ShortCircuited
//! ```
//!
//! Only unary calls are intercepted; any other call shape is handed to the
//! next channel untouched. The route is chosen when the single request
//! message arrives, because the callsite includes the payload. Until then
//! the caller's listener, headers and delivery tokens are held back.

use std::fmt;
use std::sync::Arc;

use faultline_core::headers;
use faultline_core::{
    Callsite, ContextSnapshot, ContextStorage, DecisionFactory, DecisionSeed, FaultDecision,
    OutcomeRecorder,
};
use tonic::metadata::MetadataMap;
use tonic::Status;

use crate::config::InterceptorConfig;
use crate::error::InterceptError;
use crate::fault;
use crate::listener::FaultListener;
use crate::tracer::CallTracer;
use crate::transport::{
    header, set_header, CallOptions, Channel, ClientCall, Listener, MethodDescriptor, MethodType,
};

/// Decorates calls created through a channel.
pub trait ClientInterceptor: Send + Sync {
    fn intercept_call<Req, Resp, C>(
        &self,
        method: &MethodDescriptor,
        options: CallOptions,
        next: &C,
    ) -> Box<dyn ClientCall<Req, Resp>>
    where
        Req: fmt::Debug + Send + 'static,
        Resp: Send + 'static,
        C: Channel + Clone + 'static;
}

/// Fault-injecting client interceptor.
#[derive(Clone)]
pub struct FaultInterceptor {
    config: InterceptorConfig,
    decisions: Arc<dyn DecisionFactory>,
    tracer: Option<Arc<dyn CallTracer>>,
}

impl FaultInterceptor {
    pub fn new(config: InterceptorConfig, decisions: Arc<dyn DecisionFactory>) -> Self {
        Self {
            config,
            decisions,
            tracer: None,
        }
    }

    pub fn with_tracer(mut self, tracer: Arc<dyn CallTracer>) -> Self {
        self.tracer = Some(tracer);
        self
    }

    pub fn config(&self) -> &InterceptorConfig {
        &self.config
    }
}

impl ClientInterceptor for FaultInterceptor {
    fn intercept_call<Req, Resp, C>(
        &self,
        method: &MethodDescriptor,
        options: CallOptions,
        next: &C,
    ) -> Box<dyn ClientCall<Req, Resp>>
    where
        Req: fmt::Debug + Send + 'static,
        Resp: Send + 'static,
        C: Channel + Clone + 'static,
    {
        if method.method_type() != MethodType::Unary {
            tracing::debug!(
                method = method.full_method_name(),
                method_type = ?method.method_type(),
                "not unary, passing through"
            );
            return next.new_call(method, &options);
        }

        let parent = ContextSnapshot::current();
        let context = match &self.tracer {
            Some(tracer) => tracer.start(&parent, method),
            None => parent.clone(),
        };

        Box::new(InterceptedCall {
            method: method.clone(),
            options,
            next: next.clone(),
            config: self.config.clone(),
            decisions: self.decisions.clone(),
            tracer: self.tracer.clone(),
            parent,
            context,
            request_tokens: 0,
            state: CallState::Idle,
        })
    }
}

enum CallState<Req, Resp> {
    /// Not started yet.
    Idle,
    /// Started; waiting for the request message to pick a route.
    Deciding {
        listener: Box<dyn Listener<Resp>>,
        headers: MetadataMap,
    },
    /// Forwarded unmodified, without oracle interaction.
    PassThrough(Box<dyn ClientCall<Req, Resp>>),
    /// Forwarded with causal headers and a wrapped listener.
    Forwarding(Box<dyn ClientCall<Req, Resp>>),
    /// Terminal outcome already delivered; no network call was issued.
    ShortCircuited,
    /// Failed or cancelled before a route was chosen.
    Done,
}

struct InterceptedCall<Req, Resp, C> {
    method: MethodDescriptor,
    options: CallOptions,
    next: C,
    config: InterceptorConfig,
    decisions: Arc<dyn DecisionFactory>,
    tracer: Option<Arc<dyn CallTracer>>,
    parent: ContextSnapshot,
    context: ContextSnapshot,
    /// Tokens requested before a delegate existed.
    request_tokens: u32,
    state: CallState<Req, Resp>,
}

impl<Req, Resp, C> InterceptedCall<Req, Resp, C>
where
    Req: fmt::Debug + Send + 'static,
    Resp: Send + 'static,
    C: Channel + Clone + 'static,
{
    fn flush_request_tokens(&mut self, delegate: &mut dyn ClientCall<Req, Resp>) {
        if self.request_tokens > 0 {
            tracing::debug!(tokens = self.request_tokens, "flushing buffered request tokens");
            delegate.request(self.request_tokens);
            self.request_tokens = 0;
        }
    }

    /// Picks the route for the call and, for instrumented calls, consults
    /// the oracle and writes the causal headers into `headers`.
    fn route(&self, headers: &mut MetadataMap, message: &Req) -> Result<Route, InterceptError> {
        let marked = headers::is_instrumentation_request(header(headers, headers::INSTRUMENTATION));
        if !self.config.instrumentation_enabled || marked {
            tracing::debug!(
                method = self.method.full_method_name(),
                instrumentation_enabled = self.config.instrumentation_enabled,
                instrumentation_request = marked,
                "passing through"
            );
            return Ok(Route::PassThrough);
        }

        let callsite = Callsite::new(
            self.config.service_name.as_str(),
            self.method.service_name(),
            self.method.full_method_name(),
            format!("{:?}", message),
        );
        tracing::info!(
            service = callsite.service_name(),
            target = callsite.target_service(),
            method = callsite.full_method_name(),
            "instrumenting call"
        );

        let decision = self.decisions.create(DecisionSeed {
            service_name: self.config.service_name.clone(),
            communicate_with_oracle: self.config.oracle_communication_enabled,
            storage: ContextStorage::capture(),
            callsite,
        });
        let mut recorder = OutcomeRecorder::new(decision);
        recorder.decision_mut().prepare_for_invocation()?;
        recorder.decision_mut().before_invocation()?;

        inject_causal_headers(headers, recorder.decision())?;

        let forced = recorder.decision().forced_exception().cloned();
        let failure = recorder.decision().failure_metadata().cloned();
        let should_abort = recorder.decision().should_abort();
        tracing::info!(
            forced_exception = ?forced,
            failure_metadata = ?failure,
            should_abort,
            "fault decision"
        );

        if forced.is_some() || failure.is_some() {
            let sleep = forced.as_ref().and_then(|f| f.sleep()).unwrap_or(0);
            set_header(headers, headers::FORCED_SLEEP, &sleep.to_string())?;
        }

        if let Some(failure) = failure.filter(|_| should_abort) {
            return fault::report_failure_metadata(&mut recorder, &failure).map(Route::ShortCircuit);
        }
        if let Some(forced) = forced.filter(|_| should_abort) {
            return fault::report_forced_exception(&mut recorder, &forced).map(Route::ShortCircuit);
        }
        Ok(Route::Forward(recorder))
    }

    /// Creates the delegate call and hands it the request. The delegate is
    /// returned even when sending fails: it owns the listener from here on.
    fn issue(
        &mut self,
        listener: Box<dyn Listener<Resp>>,
        headers: MetadataMap,
        message: Req,
    ) -> (Box<dyn ClientCall<Req, Resp>>, Result<(), Status>) {
        let mut delegate = self.next.new_call(&self.method, &self.options);
        delegate.start(listener, headers);
        self.flush_request_tokens(delegate.as_mut());
        let sent = delegate.send_message(message);
        (delegate, sent)
    }

    fn short_circuit(&mut self, mut listener: Box<dyn Listener<Resp>>, status: Status) {
        tracing::info!(
            method = self.method.full_method_name(),
            code = ?status.code(),
            "short-circuiting call without network"
        );
        self.state = CallState::ShortCircuited;
        self.request_tokens = 0;
        if let Some(tracer) = &self.tracer {
            tracer.end(&self.context, &self.method, Some(&status), None);
        }
        let _guard = self.parent.activate();
        listener.on_close(status, MetadataMap::new());
    }

    /// Ends the call with `err`. The caller's listener, when still held
    /// here, is closed with the resulting status.
    fn fail(&mut self, listener: Option<Box<dyn Listener<Resp>>>, err: InterceptError) -> Status {
        if let Some(tracer) = &self.tracer {
            tracer.end(&self.context, &self.method, None, Some(&err));
        }
        tracing::warn!(
            method = self.method.full_method_name(),
            error = %err,
            "interception failed"
        );
        self.request_tokens = 0;
        let status = Status::from(err);
        if let Some(mut listener) = listener {
            let _guard = self.parent.activate();
            listener.on_close(status.clone(), MetadataMap::new());
        }
        status
    }
}

enum Route {
    PassThrough,
    ShortCircuit(Status),
    Forward(OutcomeRecorder),
}

fn inject_causal_headers(
    headers: &mut MetadataMap,
    decision: &dyn FaultDecision,
) -> Result<(), InterceptError> {
    if let Some(request_id) = decision.outgoing_request_id() {
        set_header(headers, headers::REQUEST_ID, &request_id)?;
    }
    if let Some(generated_id) = decision.generated_id() {
        set_header(headers, headers::GENERATED_ID, &generated_id.to_string())?;
    }
    set_header(headers, headers::VECTOR_CLOCK, &decision.vector_clock().encode())?;
    set_header(
        headers,
        headers::ORIGIN_VECTOR_CLOCK,
        &decision.origin_vector_clock().encode(),
    )?;
    set_header(
        headers,
        headers::EXECUTION_INDEX,
        &decision.execution_index().encode(),
    )
}

impl<Req, Resp, C> ClientCall<Req, Resp> for InterceptedCall<Req, Resp, C>
where
    Req: fmt::Debug + Send + 'static,
    Resp: Send + 'static,
    C: Channel + Clone + 'static,
{
    fn start(&mut self, mut listener: Box<dyn Listener<Resp>>, headers: MetadataMap) {
        if !matches!(self.state, CallState::Idle) {
            tracing::warn!(method = self.method.full_method_name(), "call started twice");
            listener.on_close(Status::internal("call already started"), MetadataMap::new());
            return;
        }
        self.state = CallState::Deciding { listener, headers };
    }

    fn request(&mut self, num_messages: u32) {
        match &mut self.state {
            CallState::Idle | CallState::Deciding { .. } => {
                self.request_tokens = self.request_tokens.saturating_add(num_messages);
            }
            CallState::PassThrough(delegate) | CallState::Forwarding(delegate) => {
                delegate.request(num_messages);
            }
            CallState::ShortCircuited | CallState::Done => {}
        }
    }

    fn send_message(&mut self, message: Req) -> Result<(), Status> {
        match &mut self.state {
            CallState::PassThrough(delegate) | CallState::Forwarding(delegate) => {
                return delegate.send_message(message);
            }
            CallState::ShortCircuited => return Ok(()),
            CallState::Idle | CallState::Done => {
                return Err(InterceptError::IllegalState("call not started".into()).into());
            }
            CallState::Deciding { .. } => {}
        }

        let CallState::Deciding {
            listener,
            mut headers,
        } = std::mem::replace(&mut self.state, CallState::Done)
        else {
            return Err(InterceptError::IllegalState("call not deciding".into()).into());
        };

        let context = self.context.clone();
        let _guard = context.activate();
        let route = match self.route(&mut headers, &message) {
            Ok(route) => route,
            Err(err) => return Err(self.fail(Some(listener), err)),
        };

        let sent = match route {
            Route::ShortCircuit(status) => {
                self.short_circuit(listener, status);
                return Ok(());
            }
            Route::PassThrough => {
                let (delegate, sent) = self.issue(listener, headers, message);
                self.state = CallState::PassThrough(delegate);
                sent
            }
            Route::Forward(recorder) => {
                let wrapped = FaultListener::new(
                    listener,
                    recorder,
                    self.parent.clone(),
                    self.context.clone(),
                    self.method.clone(),
                    self.tracer.clone(),
                );
                let (delegate, sent) = self.issue(Box::new(wrapped), headers, message);
                self.state = CallState::Forwarding(delegate);
                sent
            }
        };
        sent.map_err(|status| self.fail(None, InterceptError::Transport(status)))
    }

    fn half_close(&mut self) {
        match &mut self.state {
            CallState::PassThrough(delegate) | CallState::Forwarding(delegate) => {
                delegate.half_close()
            }
            CallState::Deciding { .. } => {
                tracing::warn!(
                    method = self.method.full_method_name(),
                    "half-close before any message"
                );
            }
            CallState::Idle | CallState::ShortCircuited | CallState::Done => {}
        }
    }

    fn cancel(&mut self, message: Option<&str>) {
        match std::mem::replace(&mut self.state, CallState::Done) {
            CallState::PassThrough(mut delegate) => {
                delegate.cancel(message);
                self.state = CallState::PassThrough(delegate);
            }
            CallState::Forwarding(mut delegate) => {
                delegate.cancel(message);
                self.state = CallState::Forwarding(delegate);
            }
            CallState::Deciding { mut listener, .. } => {
                let status = Status::cancelled(message.unwrap_or("cancelled before send"));
                if let Some(tracer) = &self.tracer {
                    tracer.end(&self.context, &self.method, Some(&status), None);
                }
                let _guard = self.parent.activate();
                listener.on_close(status, MetadataMap::new());
            }
            CallState::ShortCircuited => self.state = CallState::ShortCircuited,
            CallState::Idle | CallState::Done => {}
        }
    }
}
