/// Shared error type used across the key service and its clients.
#[derive(Debug, thiserror::Error)]
pub enum TaskVaultError {
    #[error("not found")]
    NotFound,

    #[error("unauthorized")]
    Unauthorized,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
}
