//! Faultline harness: run a fault plan against an in-process echo service
//!
//! A harness plan is a fault plan plus a scenario of calls. Every call runs
//! as its own tokio task under a fresh root context, goes through the fault
//! interceptor and lands on a loopback echo server. The report pairs what
//! each caller saw with the oracle's log.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context as _;
use faultline_core::headers;
use faultline_core::{ContextSnapshot, FutureExt};
use faultline_grpc::{
    code_name, header, intercept, parse_code, unary_call, CallOptions, Code, FaultInterceptor,
    InterceptorConfig, LoopbackChannel, MetadataMap, MethodDescriptor, Status, TracingCallTracer,
};
use faultline_oracle::{FaultPlan, InstrumentorFactory, OracleLog, PlanError, ScriptedOracle};
use serde::{Deserialize, Serialize};

/// One call of the scenario.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioCall {
    /// Full method name, `Service/Method`.
    pub method: String,
    #[serde(default)]
    pub message: String,
    /// Status code the echo server answers with instead of echoing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fail_with: Option<String>,
    /// Times to issue this call.
    #[serde(default = "one")]
    pub repeat: u32,
}

fn one() -> u32 {
    1
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarnessPlan {
    /// Interceptor configuration; the process environment when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<InterceptorConfig>,
    #[serde(flatten)]
    pub faults: FaultPlan,
    #[serde(default)]
    pub calls: Vec<ScenarioCall>,
}

impl HarnessPlan {
    pub fn from_yaml_str(source: &str) -> Result<Self, PlanError> {
        let plan: HarnessPlan = serde_yaml::from_str(source)?;
        plan.faults.validate()?;
        Ok(plan)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, PlanError> {
        let source = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&source)
    }

    fn interceptor_config(&self) -> InterceptorConfig {
        self.config
            .clone()
            .unwrap_or_else(|| InterceptorConfig::process().clone())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EchoRequest {
    pub message: String,
    pub fail_with: Option<Code>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EchoReply {
    pub message: String,
    /// Vector clock header the server received.
    pub vector_clock: Option<String>,
}

/// What one caller saw.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallResult {
    pub index: usize,
    pub method: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector_clock: Option<String>,
}

impl CallResult {
    fn new(index: usize, method: &str, result: Result<EchoReply, Status>) -> Self {
        match result {
            Ok(reply) => Self {
                index,
                method: method.to_string(),
                status: code_name(Code::Ok).to_string(),
                reply: Some(reply.message),
                vector_clock: reply.vector_clock,
            },
            Err(status) => Self {
                index,
                method: method.to_string(),
                status: code_name(status.code()).to_string(),
                reply: None,
                vector_clock: None,
            },
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == code_name(Code::Ok)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarnessReport {
    pub service: String,
    /// Network calls that reached the echo server.
    pub calls_issued: usize,
    pub results: Vec<CallResult>,
    pub oracle: OracleLog,
}

/// Echo server answering every method the scenario uses.
pub fn echo_server(plan: &HarnessPlan) -> LoopbackChannel {
    let server = LoopbackChannel::new();
    let methods: BTreeSet<&str> = plan.calls.iter().map(|call| call.method.as_str()).collect();
    for method in methods {
        server.register(method, |received: &MetadataMap, request: EchoRequest| {
            if let Some(code) = request.fail_with {
                return Err(Status::new(code, "echo server asked to fail"));
            }
            Ok(EchoReply {
                message: request.message,
                vector_clock: header(received, headers::VECTOR_CLOCK).map(str::to_string),
            })
        });
    }
    server
}

pub async fn run(plan: HarnessPlan) -> anyhow::Result<HarnessReport> {
    let config = plan.interceptor_config();
    let service = config.service_name.clone();
    let server = echo_server(&plan);
    let oracle = Arc::new(ScriptedOracle::new(plan.faults.clone()));
    let interceptor = FaultInterceptor::new(
        config,
        Arc::new(InstrumentorFactory::new(oracle.clone())),
    )
    .with_tracer(Arc::new(TracingCallTracer));
    let channel = intercept(server.clone(), interceptor);

    let mut tasks = Vec::new();
    for call in &plan.calls {
        let fail_with = call
            .fail_with
            .as_deref()
            .map(parse_code)
            .transpose()
            .with_context(|| format!("scenario call to {}", call.method))?;

        for _ in 0..call.repeat {
            let index = tasks.len();
            let channel = channel.clone();
            let method = call.method.clone();
            let request = EchoRequest {
                message: call.message.clone(),
                fail_with,
            };
            tracing::debug!(index, method = %method, "scheduling call");
            tasks.push(tokio::spawn(
                async move {
                    let result = unary_call(
                        &channel,
                        &MethodDescriptor::unary(method.as_str()),
                        CallOptions::default(),
                        MetadataMap::new(),
                        request,
                    )
                    .await;
                    CallResult::new(index, &method, result)
                }
                .with_context(ContextSnapshot::root()),
            ));
        }
    }

    let mut results = Vec::with_capacity(tasks.len());
    for task in tasks {
        results.push(task.await.context("call task panicked")?);
    }

    let report = HarnessReport {
        service,
        calls_issued: server.calls_issued(),
        results,
        oracle: oracle.log(),
    };
    tracing::info!(
        calls = report.results.len(),
        calls_issued = report.calls_issued,
        injected = report.oracle.injected().count(),
        "scenario finished"
    );
    Ok(report)
}
