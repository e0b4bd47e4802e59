use thiserror::Error;

/// The broker's error taxonomy. Every fallible broker operation returns one
/// of these kinds; the OSBAPI surface maps each to an HTTP status, and the
/// housekeeping scheduler logs-and-swallows everything.
#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("bad config: {0}")]
    BadConfig(String),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("provider error (transient): {0}")]
    ProviderTransient(String),

    #[error("provider error (permanent): {0}")]
    ProviderPermanent(String),

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("sql failed: {0}")]
    SqlFailed(String),

    #[error("extensions unsupported on this engine: {0:?}")]
    ExtensionsUnsupported(Vec<String>),

    #[error("accepts_incomplete=true is required for this operation")]
    AsyncRequired,

    #[error("another operation is already in progress for this instance")]
    Conflict,
}

pub type Result<T, E = BrokerError> = std::result::Result<T, E>;

impl BrokerError {
    /// A short machine-stable label for metrics/log correlation, mirroring
    /// the `metric_label` convention the broker's `Error` type exposes.
    pub fn kind_label(&self) -> &'static str {
        match self {
            BrokerError::BadConfig(_) => "bad_config",
            BrokerError::ValidationError(_) => "validation_error",
            BrokerError::NotFound(_) => "not_found",
            BrokerError::AlreadyExists(_) => "already_exists",
            BrokerError::ProviderTransient(_) => "provider_transient",
            BrokerError::ProviderPermanent(_) => "provider_permanent",
            BrokerError::ConnectionFailed(_) => "connection_failed",
            BrokerError::AuthenticationFailed(_) => "authentication_failed",
            BrokerError::SqlFailed(_) => "sql_failed",
            BrokerError::ExtensionsUnsupported(_) => "extensions_unsupported",
            BrokerError::AsyncRequired => "async_required",
            BrokerError::Conflict => "conflict",
        }
    }

    /// True for kinds the SQL paths should retry locally with backoff up to
    /// the per-operation timeout, rather than surfacing immediately.
    pub fn is_locally_retryable(&self) -> bool {
        matches!(
            self,
            BrokerError::AuthenticationFailed(_) | BrokerError::ProviderTransient(_)
        )
    }
}
