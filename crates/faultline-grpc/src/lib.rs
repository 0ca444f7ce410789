//! Faultline gRPC: fault-injecting client interceptor
//!
//! Wraps every outbound unary call. Each call gets a causal identity, the
//! fault oracle is asked whether it should proceed, and the call is then
//! either forwarded with causal headers or answered locally with a
//! synthesized failure. The real or synthesized outcome is reported back to
//! the oracle exactly once.
//!
//! # Flow
//!
//! ```text
//! caller ─▶ FaultInterceptor ─▶ DecisionFactory ─▶ FaultDecision (oracle)
//!                │                                      │
//!                ├── pass-through ─────────────────────▶ transport
//!                ├── short circuit ─▶ caller.on_close   │
//!                └── forward ─▶ transport ─▶ FaultListener ─▶ caller
//! ```
//!
//! # Example
//!
//! ```ignore
//! use faultline_grpc::{intercept, unary_call, FaultInterceptor, InterceptorConfig};
//!
//! let interceptor = FaultInterceptor::new(InterceptorConfig::from_env(), decisions);
//! let channel = intercept(transport, interceptor);
//! let reply: HelloReply = unary_call(
//!     &channel,
//!     &MethodDescriptor::unary("Hello/SayHello"),
//!     CallOptions::default(),
//!     MetadataMap::new(),
//!     HelloRequest { name: "world".into() },
//! )
//! .await?;
//! ```

pub mod channel;
pub mod config;
pub mod error;
pub mod fault;
pub mod interceptor;
mod listener;
pub mod loopback;
pub mod tracer;
pub mod transport;
pub mod unary;

pub use channel::{intercept, InterceptedChannel};
pub use config::InterceptorConfig;
pub use error::{ConfigError, InterceptError};
pub use fault::TRANSPORT_EXCEPTION_NAME;
pub use interceptor::{ClientInterceptor, FaultInterceptor};
pub use loopback::{Dispatch, LoopbackChannel, RecordedCall};
pub use tracer::{CallTracer, TracingCallTracer};
pub use transport::{
    code_name, header, parse_code, set_header, CallOptions, Channel, ClientCall, Listener,
    MethodDescriptor, MethodType,
};
pub use unary::unary_call;

pub use tonic::metadata::MetadataMap;
pub use tonic::{Code, Status};
