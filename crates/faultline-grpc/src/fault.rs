//! Converts oracle fault instructions into transport statuses.
//!
//! Synthesized failures use the same status conventions as genuine
//! transport failures; only the oracle's record tells them apart.

use std::collections::HashMap;

use faultline_core::{FailureMetadata, ForcedException, InvocationOutcome, OutcomeRecorder};
use tonic::{Code, Status};

use crate::error::InterceptError;
use crate::transport::{code_name, parse_code};

/// Exception identity reported for failures expressed as a bare status.
pub const TRANSPORT_EXCEPTION_NAME: &str = "io.grpc.StatusRuntimeException";

/// Like [`parse_code`], for callback paths that have no error channel.
pub(crate) fn parse_code_lenient(code: &str) -> Code {
    parse_code(code).unwrap_or_else(|err| {
        tracing::warn!(error = %err, "falling back to UNKNOWN");
        Code::Unknown
    })
}

/// Status of a failure the oracle injected rather than the transport.
pub(crate) fn injected_status(code: Code) -> Status {
    Status::new(code, "injected by fault oracle")
}

/// Status the caller sees for a forced exception, without reporting it.
pub(crate) fn forced_exception_status(forced: &ForcedException) -> Status {
    injected_status(parse_code_lenient(forced.code()))
}

/// Reports `forced` to the oracle and returns the status to deliver.
pub(crate) fn report_forced_exception(
    recorder: &mut OutcomeRecorder,
    forced: &ForcedException,
) -> Result<Status, InterceptError> {
    let code = parse_code(forced.code())?;
    let metadata = HashMap::from([("code".to_string(), code_name(code).to_string())]);
    recorder.report_exception(
        InvocationOutcome::ForcedException,
        &forced.name,
        Some(forced.cause()),
        metadata,
    );
    Ok(injected_status(code))
}

/// Reports failure metadata to the oracle and returns the status to deliver.
pub(crate) fn report_failure_metadata(
    recorder: &mut OutcomeRecorder,
    failure: &FailureMetadata,
) -> Result<Status, InterceptError> {
    let code = parse_code(failure.code())?;
    let metadata = HashMap::from([
        ("name".to_string(), TRANSPORT_EXCEPTION_NAME.to_string()),
        ("code".to_string(), code_name(code).to_string()),
    ]);
    recorder.report_exception(
        InvocationOutcome::ForcedFailureMetadata,
        TRANSPORT_EXCEPTION_NAME,
        None,
        metadata,
    );
    Ok(injected_status(code))
}

/// Reports a genuine transport failure. The cause is always empty: it does
/// not survive serialization across the oracle boundary.
pub(crate) fn report_transport_failure(recorder: &mut OutcomeRecorder, status: &Status) {
    let metadata = HashMap::from([("code".to_string(), code_name(status.code()).to_string())]);
    recorder.report_exception(
        InvocationOutcome::ForwardedException,
        TRANSPORT_EXCEPTION_NAME,
        None,
        metadata,
    );
}

/// Reports a unary call that closed cleanly without ever delivering its
/// response, and returns the status the caller gets instead.
pub(crate) fn report_missing_response(recorder: &mut OutcomeRecorder) -> Status {
    let status = Status::internal("unary call closed without a response");
    report_transport_failure(recorder, &status);
    status
}
