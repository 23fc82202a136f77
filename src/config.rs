//! Operator configuration read from the environment

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::resolver::parse_gateway;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Clone, Debug)]
pub struct OperatorConfig {
    /// Directory of the registry chart
    pub chart_path: PathBuf,
    pub helm_bin: String,
    /// `<namespace>/<name>` of the gateway used when an instance names none
    pub default_gateway: String,
    /// Poll interval while workloads are rolling out
    pub verify_requeue: Duration,
    /// Poll interval while uninstall is in progress
    pub uninstall_requeue: Duration,
    /// Watch a single namespace instead of the whole cluster
    pub watch_namespace: Option<String>,
    pub log_format: LogFormat,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            chart_path: PathBuf::from("/module-chart"),
            helm_bin: "helm".to_string(),
            default_gateway: "istio-system/istio-ingressgateway".to_string(),
            verify_requeue: Duration::from_secs(3),
            uninstall_requeue: Duration::from_secs(1),
            watch_namespace: None,
            log_format: LogFormat::Text,
        }
    }
}

impl OperatorConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unset or empty keys keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(path) = get("CHART_PATH") {
            config.chart_path = PathBuf::from(path);
        }
        if let Some(bin) = get("HELM_BIN") {
            config.helm_bin = bin;
        }
        if let Some(gateway) = get("DEFAULT_GATEWAY") {
            if parse_gateway(&gateway).is_none() {
                return Err(ConfigError::Invalid {
                    key: "DEFAULT_GATEWAY",
                    value: gateway,
                    reason: "expected <namespace>/<name>".to_string(),
                });
            }
            config.default_gateway = gateway;
        }
        if let Some(secs) = get("VERIFY_REQUEUE_SECS") {
            config.verify_requeue = parse_secs("VERIFY_REQUEUE_SECS", secs)?;
        }
        if let Some(secs) = get("UNINSTALL_REQUEUE_SECS") {
            config.uninstall_requeue = parse_secs("UNINSTALL_REQUEUE_SECS", secs)?;
        }
        config.watch_namespace = get("WATCH_NAMESPACE");
        if let Some(format) = get("LOG_FORMAT") {
            config.log_format = match format.to_ascii_lowercase().as_str() {
                "json" => LogFormat::Json,
                "text" | "console" => LogFormat::Text,
                _ => {
                    return Err(ConfigError::Invalid {
                        key: "LOG_FORMAT",
                        value: format,
                        reason: "expected json or text".to_string(),
                    });
                }
            };
        }

        Ok(config)
    }
}

fn parse_secs(key: &'static str, value: String) -> Result<Duration, ConfigError> {
    match value.parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
        Ok(_) => Err(ConfigError::Invalid {
            key,
            value,
            reason: "must be greater than zero".to_string(),
        }),
        Err(e) => Err(ConfigError::Invalid {
            key,
            value,
            reason: e.to_string(),
        }),
    }
}
