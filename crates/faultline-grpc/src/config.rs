//! Interceptor configuration.
//!
//! Capability flags are explicit fields threaded through construction, so a
//! call only ever sees the configuration its interceptor was built with.
//! Both flags default to enabled.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::ConfigError;

pub const ENV_SERVICE_NAME: &str = "SERVICE_NAME";
pub const ENV_DISABLE_INSTRUMENTATION: &str = "DISABLE_INSTRUMENTATION";
pub const ENV_DISABLE_SERVER_COMMUNICATION: &str = "DISABLE_SERVER_COMMUNICATION";

pub const DEFAULT_SERVICE_NAME: &str = "unknown";

static PROCESS_CONFIG: Lazy<InterceptorConfig> = Lazy::new(InterceptorConfig::from_env);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterceptorConfig {
    /// Name of the calling service, recorded on every callsite
    pub service_name: String,
    /// When `false` every call passes through untouched
    pub instrumentation_enabled: bool,
    /// When `false` decisions are local no-ops and the oracle is never contacted
    pub oracle_communication_enabled: bool,
}

impl Default for InterceptorConfig {
    fn default() -> Self {
        Self {
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            instrumentation_enabled: true,
            oracle_communication_enabled: true,
        }
    }
}

impl InterceptorConfig {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Self::default()
        }
    }

    pub fn with_instrumentation(mut self, enabled: bool) -> Self {
        self.instrumentation_enabled = enabled;
        self
    }

    pub fn with_oracle_communication(mut self, enabled: bool) -> Self {
        self.oracle_communication_enabled = enabled;
        self
    }

    /// Reads `SERVICE_NAME`, `DISABLE_INSTRUMENTATION` and
    /// `DISABLE_SERVER_COMMUNICATION`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let service_name = lookup(ENV_SERVICE_NAME)
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_SERVICE_NAME.to_string());
        let disabled = |key: &str| lookup(key).map_or(false, |v| is_truthy(&v));

        Self {
            service_name,
            instrumentation_enabled: !disabled(ENV_DISABLE_INSTRUMENTATION),
            oracle_communication_enabled: !disabled(ENV_DISABLE_SERVER_COMMUNICATION),
        }
    }

    pub fn from_yaml_str(source: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(source)?)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&source)
    }

    /// Configuration resolved from the environment once per process.
    pub fn process() -> &'static InterceptorConfig {
        &PROCESS_CONFIG
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
