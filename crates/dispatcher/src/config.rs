//! Dispatcher configuration loaded from environment variables.

use crate::{DispatcherError, Result};

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl LogFormat {
    fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Text
        }
    }
}

/// Per-service broker and logging configuration.
///
/// Reads from environment variables:
/// - `BROKER_URL`: broker address (default: `"memory://local"`)
/// - `BROKER_TOPIC`: shared saga topic (default: `"saga-events"`)
/// - `SERVICE_NAME`: service id stamped as `source` (required)
/// - `SUBSCRIPTION_NAME`: default `"<service>-subscription"`
/// - `PRODUCER_NAME`: default `"<service>-producer"`
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `"json"` or `"text"` (default: `"text"`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherConfig {
    pub broker_url: String,
    pub topic: String,
    pub service_name: String,
    pub subscription_name: String,
    pub producer_name: String,
    pub log_level: String,
    pub log_format: LogFormat,
}

impl DispatcherConfig {
    /// Default configuration for a named service.
    pub fn for_service(service_name: impl Into<String>) -> Self {
        let service_name = service_name.into();
        Self {
            broker_url: "memory://local".to_string(),
            topic: "saga-events".to_string(),
            subscription_name: format!("{service_name}-subscription"),
            producer_name: format!("{service_name}-producer"),
            service_name,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
        }
    }

    /// Same broker and logging settings for another service of the process.
    pub fn with_service(&self, service_name: impl Into<String>) -> Self {
        let named = Self::for_service(service_name);
        Self {
            service_name: named.service_name,
            subscription_name: named.subscription_name,
            producer_name: named.producer_name,
            ..self.clone()
        }
    }

    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let service_name = lookup("SERVICE_NAME")
            .filter(|name| !name.is_empty())
            .ok_or(DispatcherError::MissingConfig("SERVICE_NAME"))?;
        let defaults = Self::for_service(service_name);

        Ok(Self {
            broker_url: lookup("BROKER_URL").unwrap_or(defaults.broker_url),
            topic: lookup("BROKER_TOPIC").unwrap_or(defaults.topic),
            subscription_name: lookup("SUBSCRIPTION_NAME").unwrap_or(defaults.subscription_name),
            producer_name: lookup("PRODUCER_NAME").unwrap_or(defaults.producer_name),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: lookup("LOG_FORMAT")
                .map(|v| LogFormat::parse(&v))
                .unwrap_or_default(),
            service_name: defaults.service_name,
        })
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self::for_service("service")
    }
}
