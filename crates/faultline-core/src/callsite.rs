//! Callsite: the static identity of one outbound call.
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Callsite {
    service_name: String,
    target_service: String,
    full_method_name: String,
    payload: String,
}

impl Callsite {
    pub fn new(
        service_name: impl Into<String>,
        target_service: impl Into<String>,
        full_method_name: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            target_service: target_service.into(),
            full_method_name: full_method_name.into(),
            payload: payload.into(),
        }
    }

    /// The calling service.
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn target_service(&self) -> &str {
        &self.target_service
    }

    pub fn full_method_name(&self) -> &str {
        &self.full_method_name
    }

    /// String summary of the outgoing payload.
    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// Stable digest of the callsite, used as an execution index frame.
    pub fn signature(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for part in [
            &self.service_name,
            &self.target_service,
            &self.full_method_name,
            &self.payload,
        ] {
            hasher.update(&(part.len() as u64).to_le_bytes());
            hasher.update(part.as_bytes());
        }
        let hex = hasher.finalize().to_hex();
        hex.as_str()[..32].to_string()
    }
}
