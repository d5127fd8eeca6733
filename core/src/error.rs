use thiserror::Error;

#[derive(Error, Debug)]
pub enum TriageError {
    /// No case, or no account behind it. Terminal for the case only.
    #[error("Not found: {0}")]
    DataNotFound(String),

    #[error("Case source rejected credentials: {0}")]
    AuthError(String),

    /// Evidence store or classification service unreachable.
    #[error("Upstream '{service}' unavailable: {message}")]
    UpstreamUnavailable { service: String, message: String },

    /// The classification service answered, but not in the agreed shape.
    #[error("Malformed response from '{service}': {message}")]
    MalformedResponse { service: String, message: String },

    /// A post-processing rule found an invariant breach.
    #[error("Validation violation: {0}")]
    ValidationViolation(String),

    #[error("Call '{call}' timed out after {timeout_ms}ms")]
    Timeout { call: String, timeout_ms: u64 },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TriageError {
    pub fn upstream(service: &str, message: impl Into<String>) -> Self {
        Self::UpstreamUnavailable { service: service.to_string(), message: message.into() }
    }

    pub fn malformed(service: &str, message: impl Into<String>) -> Self {
        Self::MalformedResponse { service: service.to_string(), message: message.into() }
    }

    /// Stable label for logs, persisted records and batch reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DataNotFound(_)              => "data_not_found",
            Self::AuthError(_)                 => "auth_error",
            Self::UpstreamUnavailable { .. }   => "upstream_unavailable",
            Self::MalformedResponse { .. }     => "malformed_response",
            Self::ValidationViolation(_)       => "validation_violation",
            Self::Timeout { .. }               => "timeout",
            Self::Database(_)                  => "database",
            Self::Serialization(_)             => "serialization",
            Self::Other(_)                     => "other",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::UpstreamUnavailable { .. } | Self::Timeout { .. })
    }
}

pub type TriageResult<T> = Result<T, TriageError>;
