//! In-process transport for tests and local runs.
//!
//! Routes unary calls to registered handler closures and records every call
//! that reaches it, so callers can check which calls hit the "network" and
//! with what headers. Responses are withheld until the caller has granted a
//! delivery token, like a real flow-controlled transport.

use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tonic::metadata::MetadataMap;
use tonic::Status;

use crate::transport::{CallOptions, Channel, ClientCall, Listener, MethodDescriptor};

type ErasedHandler = Arc<
    dyn Fn(&MetadataMap, Box<dyn Any + Send>) -> Result<Box<dyn Any + Send>, Status> + Send + Sync,
>;

/// Where response callbacks run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dispatch {
    /// On the thread that completed the call.
    #[default]
    Inline,
    /// On a freshly spawned thread.
    Thread,
}

/// A call as seen by the loopback "server".
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub method: String,
    pub headers: MetadataMap,
}

#[derive(Default)]
struct Shared {
    handlers: RwLock<HashMap<String, ErasedHandler>>,
    calls: Mutex<Vec<RecordedCall>>,
    dispatch: Dispatch,
}

#[derive(Clone, Default)]
pub struct LoopbackChannel {
    shared: Arc<Shared>,
}

impl LoopbackChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dispatch(dispatch: Dispatch) -> Self {
        Self {
            shared: Arc::new(Shared {
                dispatch,
                ..Shared::default()
            }),
        }
    }

    /// Serves `full_method_name` with `handler`.
    pub fn register<Req, Resp, F>(&self, full_method_name: impl Into<String>, handler: F)
    where
        Req: 'static,
        Resp: Send + 'static,
        F: Fn(&MetadataMap, Req) -> Result<Resp, Status> + Send + Sync + 'static,
    {
        let erased: ErasedHandler = Arc::new(move |headers, request| {
            let request = request
                .downcast::<Req>()
                .map_err(|_| Status::internal("request type mismatch"))?;
            let response = handler(headers, *request)?;
            Ok(Box::new(response) as Box<dyn Any + Send>)
        });
        self.shared
            .handlers
            .write()
            .insert(full_method_name.into(), erased);
    }

    /// Number of calls that reached the transport.
    pub fn calls_issued(&self) -> usize {
        self.shared.calls.lock().len()
    }

    pub fn recorded_calls(&self) -> Vec<RecordedCall> {
        self.shared.calls.lock().clone()
    }

    pub fn last_headers(&self) -> Option<MetadataMap> {
        self.shared.calls.lock().last().map(|call| call.headers.clone())
    }
}

impl fmt::Debug for LoopbackChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopbackChannel")
            .field("dispatch", &self.shared.dispatch)
            .field("calls_issued", &self.calls_issued())
            .finish()
    }
}

impl Channel for LoopbackChannel {
    fn new_call<Req, Resp>(
        &self,
        method: &MethodDescriptor,
        _options: &CallOptions,
    ) -> Box<dyn ClientCall<Req, Resp>>
    where
        Req: fmt::Debug + Send + 'static,
        Resp: Send + 'static,
    {
        Box::new(LoopbackCall::new(
            self.shared.clone(),
            method.full_method_name(),
        ))
    }
}

struct LoopbackCall<Req, Resp> {
    shared: Arc<Shared>,
    method: String,
    listener: Option<Box<dyn Listener<Resp>>>,
    headers: MetadataMap,
    request: Option<Req>,
    /// Delivery tokens granted and not yet spent.
    requested: u32,
    /// Response withheld until a delivery token arrives.
    pending: Option<Resp>,
}

impl<Req, Resp> LoopbackCall<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    fn new(shared: Arc<Shared>, method: &str) -> Self {
        Self {
            shared,
            method: method.to_string(),
            listener: None,
            headers: MetadataMap::new(),
            request: None,
            requested: 0,
            pending: None,
        }
    }

    fn handle(&self, request: Req) -> Result<Resp, Status> {
        let handler = self
            .shared
            .handlers
            .read()
            .get(&self.method)
            .cloned()
            .ok_or_else(|| Status::unimplemented(format!("no handler for {}", self.method)))?;
        let response = handler(&self.headers, Box::new(request))?;
        response
            .downcast::<Resp>()
            .map(|boxed| *boxed)
            .map_err(|_| Status::internal("response type mismatch"))
    }

    fn finish(&mut self, result: Result<Resp, Status>) {
        let Some(listener) = self.listener.take() else {
            return;
        };
        if result.is_ok() {
            self.requested = self.requested.saturating_sub(1);
        }
        match self.shared.dispatch {
            Dispatch::Inline => deliver(listener, result),
            Dispatch::Thread => {
                std::thread::spawn(move || deliver(listener, result));
            }
        }
    }
}

fn deliver<Resp>(mut listener: Box<dyn Listener<Resp>>, result: Result<Resp, Status>) {
    let status = match result {
        Ok(response) => {
            listener.on_headers(&MetadataMap::new());
            match listener.on_message(response) {
                Ok(()) => Status::ok(""),
                Err(status) => status,
            }
        }
        Err(status) => status,
    };
    listener.on_close(status, MetadataMap::new());
}

impl<Req, Resp> ClientCall<Req, Resp> for LoopbackCall<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    fn start(&mut self, mut listener: Box<dyn Listener<Resp>>, headers: MetadataMap) {
        self.shared.calls.lock().push(RecordedCall {
            method: self.method.clone(),
            headers: headers.clone(),
        });
        self.headers = headers;
        listener.on_ready();
        self.listener = Some(listener);
    }

    fn request(&mut self, num_messages: u32) {
        self.requested = self.requested.saturating_add(num_messages);
        if self.requested > 0 {
            if let Some(response) = self.pending.take() {
                self.finish(Ok(response));
            }
        }
    }

    fn send_message(&mut self, message: Req) -> Result<(), Status> {
        if self.listener.is_none() {
            return Err(Status::internal("call not started"));
        }
        if self.request.is_some() {
            return Err(Status::internal("unary call accepts a single message"));
        }
        self.request = Some(message);
        Ok(())
    }

    fn half_close(&mut self) {
        let Some(request) = self.request.take() else {
            self.finish(Err(Status::internal("half-close without a message")));
            return;
        };
        match self.handle(request) {
            Ok(response) if self.requested == 0 => self.pending = Some(response),
            result => self.finish(result),
        }
    }

    fn cancel(&mut self, message: Option<&str>) {
        self.pending = None;
        if let Some(mut listener) = self.listener.take() {
            listener.on_close(
                Status::cancelled(message.unwrap_or("cancelled by client")),
                MetadataMap::new(),
            );
        }
    }
}
