//! Shared fixtures: a scripted decision handle, a recording tracer and a
//! capturing listener.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};

use faultline_core::{
    ContextKey, ContextSnapshot, ContextStorage, DecisionFactory, DecisionSeed, ExecutionIndex,
    FailureMetadata, FaultDecision, FaultError, ForcedException, VectorClock,
};
use faultline_grpc::{
    CallOptions, CallTracer, Channel, ClientCall, Code, InterceptError, Listener, LoopbackChannel,
    MetadataMap, MethodDescriptor, Status,
};

#[derive(Debug, Clone, PartialEq)]
pub struct HelloRequest {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HelloReply {
    pub message: String,
}

pub const SAY_HELLO: &str = "Hello/SayHello";
pub const FAIL: &str = "Hello/Fail";

/// Loopback server with a greeting method and an always-failing method.
pub fn greeter(channel: LoopbackChannel) -> LoopbackChannel {
    channel.register(SAY_HELLO, |_headers: &MetadataMap, request: HelloRequest| {
        Ok(HelloReply {
            message: format!("hello, {}", request.name),
        })
    });
    channel.register(FAIL, |_headers: &MetadataMap, _request: HelloRequest| {
        Err::<HelloReply, _>(Status::not_found("no such greeting"))
    });
    channel
}

/// Transport whose calls close with OK without ever answering.
#[derive(Clone, Default)]
pub struct SilentChannel {
    issued: Arc<Mutex<usize>>,
}

impl SilentChannel {
    pub fn calls_issued(&self) -> usize {
        *self.issued.lock().unwrap()
    }
}

impl Channel for SilentChannel {
    fn new_call<Req, Resp>(
        &self,
        _method: &MethodDescriptor,
        _options: &CallOptions,
    ) -> Box<dyn ClientCall<Req, Resp>>
    where
        Req: std::fmt::Debug + Send + 'static,
        Resp: Send + 'static,
    {
        Box::new(SilentCall::<Resp> {
            issued: self.issued.clone(),
            listener: None,
        })
    }
}

struct SilentCall<Resp> {
    issued: Arc<Mutex<usize>>,
    listener: Option<Box<dyn Listener<Resp>>>,
}

impl<Req, Resp: Send + 'static> ClientCall<Req, Resp> for SilentCall<Resp> {
    fn start(&mut self, listener: Box<dyn Listener<Resp>>, _headers: MetadataMap) {
        *self.issued.lock().unwrap() += 1;
        self.listener = Some(listener);
    }

    fn request(&mut self, _num_messages: u32) {}

    fn send_message(&mut self, _message: Req) -> Result<(), Status> {
        Ok(())
    }

    fn half_close(&mut self) {
        if let Some(mut listener) = self.listener.take() {
            listener.on_close(Status::ok(""), MetadataMap::new());
        }
    }

    fn cancel(&mut self, _message: Option<&str>) {}
}

#[derive(Debug, Clone, PartialEq)]
pub enum OracleEvent {
    Prepare,
    Before,
    Complete {
        type_name: String,
    },
    Exception {
        name: String,
        cause: Option<String>,
        code: Option<String>,
    },
}

/// What the scripted oracle answers for every call.
#[derive(Debug, Clone)]
pub struct Script {
    pub request_id: Option<String>,
    pub generated_id: Option<u64>,
    pub forced_exception: Option<ForcedException>,
    pub failure_metadata: Option<FailureMetadata>,
    pub should_abort: bool,
    pub fail_prepare: bool,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            request_id: None,
            generated_id: None,
            forced_exception: None,
            failure_metadata: None,
            should_abort: true,
            fail_prepare: false,
        }
    }
}

#[derive(Default)]
pub struct ScriptedFactory {
    script: Script,
    events: Arc<Mutex<Vec<OracleEvent>>>,
    seeds: Mutex<Vec<DecisionSeed>>,
}

impl ScriptedFactory {
    pub fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script,
            ..Self::default()
        })
    }

    pub fn events(&self) -> Vec<OracleEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn seeds(&self) -> Vec<DecisionSeed> {
        self.seeds.lock().unwrap().clone()
    }

    pub fn created(&self) -> usize {
        self.seeds.lock().unwrap().len()
    }

    /// Number of `after_*` notifications received.
    pub fn after_reports(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, OracleEvent::Complete { .. } | OracleEvent::Exception { .. }))
            .count()
    }

    pub fn exceptions(&self) -> Vec<OracleEvent> {
        self.events()
            .into_iter()
            .filter(|e| matches!(e, OracleEvent::Exception { .. }))
            .collect()
    }
}

impl DecisionFactory for ScriptedFactory {
    fn create(&self, seed: DecisionSeed) -> Box<dyn FaultDecision> {
        let storage = seed.storage.clone();
        self.seeds.lock().unwrap().push(seed);
        Box::new(ScriptedDecision {
            script: self.script.clone(),
            events: self.events.clone(),
            storage,
        })
    }
}

/// Mirrors the ambient context back without advancing anything.
struct ScriptedDecision {
    script: Script,
    events: Arc<Mutex<Vec<OracleEvent>>>,
    storage: ContextStorage,
}

impl FaultDecision for ScriptedDecision {
    fn prepare_for_invocation(&mut self) -> Result<(), FaultError> {
        self.events.lock().unwrap().push(OracleEvent::Prepare);
        if self.script.fail_prepare {
            return Err(FaultError::Oracle("oracle unreachable".into()));
        }
        Ok(())
    }

    fn before_invocation(&mut self) -> Result<(), FaultError> {
        self.events.lock().unwrap().push(OracleEvent::Before);
        Ok(())
    }

    fn outgoing_request_id(&self) -> Option<String> {
        self.script
            .request_id
            .clone()
            .or_else(|| self.storage.request_id().map(str::to_string))
    }

    fn generated_id(&self) -> Option<u64> {
        self.script.generated_id
    }

    fn vector_clock(&self) -> VectorClock {
        self.storage.vector_clock()
    }

    fn origin_vector_clock(&self) -> VectorClock {
        self.storage.origin_vector_clock()
    }

    fn execution_index(&self) -> ExecutionIndex {
        self.storage.execution_index()
    }

    fn forced_exception(&self) -> Option<&ForcedException> {
        self.script.forced_exception.as_ref()
    }

    fn failure_metadata(&self) -> Option<&FailureMetadata> {
        self.script.failure_metadata.as_ref()
    }

    fn should_abort(&self) -> bool {
        self.script.should_abort
    }

    fn after_invocation_complete(
        &mut self,
        type_name: &str,
        _properties: &HashMap<String, String>,
    ) -> Result<(), FaultError> {
        self.events.lock().unwrap().push(OracleEvent::Complete {
            type_name: type_name.to_string(),
        });
        Ok(())
    }

    fn after_invocation_with_exception(
        &mut self,
        name: &str,
        cause: Option<&str>,
        metadata: &HashMap<String, String>,
    ) -> Result<(), FaultError> {
        self.events.lock().unwrap().push(OracleEvent::Exception {
            name: name.to_string(),
            cause: cause.map(str::to_string),
            code: metadata.get("code").cloned(),
        });
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TraceEvent {
    Start { method: String },
    End { status: Option<Code>, failed: bool },
}

/// Tags the call context with request id `traced` so callbacks can tell it
/// apart from the parent context.
#[derive(Default)]
pub struct RecordingTracer {
    events: Mutex<Vec<TraceEvent>>,
}

impl RecordingTracer {
    pub fn events(&self) -> Vec<TraceEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl CallTracer for RecordingTracer {
    fn start(&self, parent: &ContextSnapshot, method: &MethodDescriptor) -> ContextSnapshot {
        self.events.lock().unwrap().push(TraceEvent::Start {
            method: method.full_method_name().to_string(),
        });
        parent.with_field(ContextKey::RequestId, "traced")
    }

    fn end(
        &self,
        _context: &ContextSnapshot,
        _method: &MethodDescriptor,
        status: Option<&Status>,
        error: Option<&InterceptError>,
    ) {
        self.events.lock().unwrap().push(TraceEvent::End {
            status: status.map(Status::code),
            failed: error.is_some(),
        });
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Seen {
    Ready(Option<String>),
    Message(String, Option<String>),
    Close(Code, Option<String>),
}

/// Records every callback with the request id of the active context, and
/// signals when the call closes.
pub struct CapturingListener {
    seen: Arc<Mutex<Vec<Seen>>>,
    done: mpsc::Sender<()>,
}

impl CapturingListener {
    pub fn new() -> (Self, Arc<Mutex<Vec<Seen>>>, mpsc::Receiver<()>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (done, rx) = mpsc::channel();
        (
            Self {
                seen: seen.clone(),
                done,
            },
            seen,
            rx,
        )
    }
}

fn active_request_id() -> Option<String> {
    ContextSnapshot::current().request_id().map(str::to_string)
}

impl Listener<HelloReply> for CapturingListener {
    fn on_message(&mut self, message: HelloReply) -> Result<(), Status> {
        self.seen
            .lock()
            .unwrap()
            .push(Seen::Message(message.message, active_request_id()));
        Ok(())
    }

    fn on_close(&mut self, status: Status, _trailers: MetadataMap) {
        self.seen
            .lock()
            .unwrap()
            .push(Seen::Close(status.code(), active_request_id()));
        let _ = self.done.send(());
    }

    fn on_ready(&mut self) {
        self.seen.lock().unwrap().push(Seen::Ready(active_request_id()));
    }
}
