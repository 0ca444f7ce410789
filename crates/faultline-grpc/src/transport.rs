//! Transport seam: method descriptors and the call/listener traits.
//!
//! Statuses, codes and metadata are tonic's; this module adds the client
//! call shape tonic keeps internal to its generated stubs.
//!
//! The shapes mirror a unary RPC client: a [`Channel`] creates a
//! [`ClientCall`], the caller starts it with a [`Listener`] and headers,
//! requests delivery tokens, sends one message and half-closes. The
//! transport answers through the listener with at most one message and
//! exactly one close.

use std::fmt;
use std::time::Duration;

use tonic::metadata::{MetadataMap, MetadataValue};
use tonic::{Code, Status};

use crate::error::InterceptError;

/// Canonical names of the status codes, as the oracle spells them.
const CODE_NAMES: [(Code, &str); 17] = [
    (Code::Ok, "OK"),
    (Code::Cancelled, "CANCELLED"),
    (Code::Unknown, "UNKNOWN"),
    (Code::InvalidArgument, "INVALID_ARGUMENT"),
    (Code::DeadlineExceeded, "DEADLINE_EXCEEDED"),
    (Code::NotFound, "NOT_FOUND"),
    (Code::AlreadyExists, "ALREADY_EXISTS"),
    (Code::PermissionDenied, "PERMISSION_DENIED"),
    (Code::ResourceExhausted, "RESOURCE_EXHAUSTED"),
    (Code::FailedPrecondition, "FAILED_PRECONDITION"),
    (Code::Aborted, "ABORTED"),
    (Code::OutOfRange, "OUT_OF_RANGE"),
    (Code::Unimplemented, "UNIMPLEMENTED"),
    (Code::Internal, "INTERNAL"),
    (Code::Unavailable, "UNAVAILABLE"),
    (Code::DataLoss, "DATA_LOSS"),
    (Code::Unauthenticated, "UNAUTHENTICATED"),
];

/// `UNAVAILABLE` for [`Code::Unavailable`], and so on.
pub fn code_name(code: Code) -> &'static str {
    CODE_NAMES
        .iter()
        .find(|(known, _)| *known == code)
        .map_or("UNKNOWN", |(_, name)| *name)
}

/// Looks up a code by its canonical name.
pub fn parse_code(name: &str) -> Result<Code, InterceptError> {
    let wanted = name.trim();
    CODE_NAMES
        .iter()
        .find(|(_, known)| *known == wanted)
        .map(|(code, _)| *code)
        .ok_or_else(|| InterceptError::UnknownStatusCode(wanted.to_string()))
}

/// ASCII value of `key`, if present and printable.
pub fn header<'a>(headers: &'a MetadataMap, key: &str) -> Option<&'a str> {
    headers.get(key)?.to_str().ok()
}

/// Replaces `key` with `value`.
pub fn set_header(
    headers: &mut MetadataMap,
    key: &'static str,
    value: &str,
) -> Result<(), InterceptError> {
    let value = MetadataValue::try_from(value)
        .map_err(|_| InterceptError::InvalidHeader(key.to_string()))?;
    headers.insert(key, value);
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodType {
    Unary,
    ClientStreaming,
    ServerStreaming,
    BidiStreaming,
    Unknown,
}

/// Static description of a remote method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    full_method_name: String,
    method_type: MethodType,
}

impl MethodDescriptor {
    pub fn new(full_method_name: impl Into<String>, method_type: MethodType) -> Self {
        Self {
            full_method_name: full_method_name.into(),
            method_type,
        }
    }

    pub fn unary(full_method_name: impl Into<String>) -> Self {
        Self::new(full_method_name, MethodType::Unary)
    }

    /// `package.Service/Method`
    pub fn full_method_name(&self) -> &str {
        &self.full_method_name
    }

    pub fn method_type(&self) -> MethodType {
        self.method_type
    }

    /// Text before the first `/`, or the whole name when there is none.
    pub fn service_name(&self) -> &str {
        match self.full_method_name.split_once('/') {
            Some((service, _)) => service,
            None => &self.full_method_name,
        }
    }

    pub fn method_name(&self) -> &str {
        match self.full_method_name.split_once('/') {
            Some((_, method)) => method,
            None => "",
        }
    }
}

/// Per-call options, opaque to interceptors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallOptions {
    pub authority: Option<String>,
    pub deadline: Option<Duration>,
}

/// Receives the transport's answers for one call.
pub trait Listener<Resp>: Send {
    fn on_headers(&mut self, _headers: &MetadataMap) {}

    /// Returning `Err` fails the call: the transport closes it with that
    /// status instead of the one it would otherwise have delivered.
    fn on_message(&mut self, message: Resp) -> Result<(), Status>;

    /// Terminal notification; delivered exactly once per call.
    fn on_close(&mut self, status: Status, trailers: MetadataMap);

    fn on_ready(&mut self) {}
}

/// One outbound call.
pub trait ClientCall<Req, Resp>: Send {
    fn start(&mut self, listener: Box<dyn Listener<Resp>>, headers: MetadataMap);

    /// Grants `num_messages` more delivery tokens.
    fn request(&mut self, num_messages: u32);

    fn send_message(&mut self, message: Req) -> Result<(), Status>;

    fn half_close(&mut self);

    fn cancel(&mut self, message: Option<&str>);
}

/// Factory for outbound calls.
pub trait Channel: Send + Sync {
    fn new_call<Req, Resp>(
        &self,
        method: &MethodDescriptor,
        options: &CallOptions,
    ) -> Box<dyn ClientCall<Req, Resp>>
    where
        Req: fmt::Debug + Send + 'static,
        Resp: Send + 'static;
}
