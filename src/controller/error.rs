//! Error types for the DockerRegistry controller

use std::time::Duration;

use thiserror::Error;

use crate::controller::state_machine::StateId;
use crate::installer::InstallerError;
use crate::resolver::ResolveError;
use crate::values::ValuesError;

/// Error variants are named with the `Error` suffix where it reads naturally at call sites
/// (e.g., `KubeError`, `ValidationError`).
#[allow(clippy::enum_variant_names)]
#[derive(Error, Debug)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Missing object key: {0}")]
    MissingObjectKey(&'static str),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("secret {namespace}/{name} not found")]
    SecretNotFound { namespace: String, name: String },

    #[error("secret {secret} is missing key '{key}'")]
    MissingSecretKey { secret: String, key: String },

    #[error(transparent)]
    ResolveError(#[from] ResolveError),

    #[error("found orphaned resources: {0}")]
    OrphanResources(String),

    #[error("{0}")]
    VerificationFailed(String),

    #[error("status update conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    InstallerError(#[from] InstallerError),

    #[error(transparent)]
    ValuesError(#[from] ValuesError),

    #[error("invalid state transition {from} -> {to}")]
    InvalidTransition { from: StateId, to: StateId },

    #[error("reconciliation cancelled")]
    Cancelled,
}

impl Error {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::KubeError(e) => match e {
                kube::Error::Api(api_err) => {
                    // 4xx errors (except 409 Conflict, 429 TooManyRequests) are usually not retryable
                    let code = api_err.code;
                    if (400..500).contains(&code) {
                        return code == 409 || code == 429;
                    }
                    true
                }
                _ => true,
            },
            Error::Conflict(_) => true,
            Error::OrphanResources(_) => true,
            Error::InstallerError(e) => e.is_retryable(),
            // Secrets and gateways can show up later
            Error::SecretNotFound { .. } => true,
            Error::ResolveError(e) => e.is_retryable(),
            Error::Cancelled => true,
            Error::ValidationError(_) => false,
            Error::MissingSecretKey { .. } => false,
            Error::VerificationFailed(_) => false,
            Error::ValuesError(_) => false,
            Error::InvalidTransition { .. } => false,
            Error::SerializationError(_) => false,
            Error::MissingObjectKey(_) => false,
        }
    }

    /// HTTP 404 from the API server
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::KubeError(kube::Error::Api(resp)) if resp.code == 404)
    }

    /// Short label used for metrics and log fields
    pub fn kind(&self) -> &'static str {
        match self {
            Error::KubeError(_) => "kube",
            Error::SerializationError(_) => "serialization",
            Error::MissingObjectKey(_) => "missing_key",
            Error::ValidationError(_) => "validation",
            Error::SecretNotFound { .. } | Error::MissingSecretKey { .. } => "secret",
            Error::ResolveError(_) => "resolver",
            Error::OrphanResources(_) => "orphans",
            Error::VerificationFailed(_) => "verification",
            Error::Conflict(_) => "conflict",
            Error::InstallerError(_) => "installer",
            Error::ValuesError(_) => "values",
            Error::InvalidTransition { .. } => "transition",
            Error::Cancelled => "cancelled",
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Exponential backoff configuration
#[derive(Clone, Debug)]
pub struct BackoffConfig {
    /// Initial delay for first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for each subsequent retry
    pub multiplier: f64,
    /// Random jitter factor (0.0 to 1.0)
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(300),
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl BackoffConfig {
    /// Calculate the backoff delay for a given retry attempt
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let base_delay_secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);

        let jitter_range = base_delay_secs * self.jitter;
        let jitter = rand::random::<f64>() * jitter_range * 2.0 - jitter_range;
        let delay_with_jitter = (base_delay_secs + jitter).max(0.0);

        let capped_delay = delay_with_jitter.min(self.max_delay.as_secs_f64());

        Duration::from_secs_f64(capped_delay)
    }

    /// Get the delay for an error. Non-retryable errors wait the full `max_delay`
    /// so a spec fix gets picked up without hammering the API server.
    pub fn delay_for_error(&self, error: &Error, attempt: u32) -> Duration {
        if error.is_retryable() {
            self.delay_for_attempt(attempt)
        } else {
            self.max_delay
        }
    }
}
