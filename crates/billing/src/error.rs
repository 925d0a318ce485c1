//! Billing error types

use thiserror::Error;

pub type BillingResult<T> = Result<T, BillingError>;

/// Errors produced by the entitlement and reconciliation engine
///
/// The taxonomy callers care about:
/// - `NotFound` is fatal and surfaced as-is, never retried.
/// - Transient errors ([`BillingError::is_transient`]) mean the gated action
///   must be denied (fail closed); the sweep logs them and moves on.
/// - `Conflict` means a conditional write lost its race; the caller re-reads
///   the now-current state instead of surfacing an error.
#[derive(Debug, Error)]
pub enum BillingError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("stripe api error: {0}")]
    StripeApi(String),

    #[error("stripe api timeout: {0}")]
    StripeTimeout(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("webhook signature invalid")]
    WebhookSignatureInvalid,

    #[error("unsupported webhook payload: {0}")]
    WebhookEventNotSupported(String),

    #[error("unknown price id: {0}")]
    UnknownPrice(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl BillingError {
    /// Whether a caller should treat this as a transient I/O failure
    /// (deny the gated action, possibly retry later) rather than a
    /// permanent condition.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BillingError::Database(_)
                | BillingError::StripeApi(_)
                | BillingError::StripeTimeout(_)
        )
    }
}

impl From<sqlx::Error> for BillingError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => BillingError::NotFound("row not found".to_string()),
            other => BillingError::Database(other.to_string()),
        }
    }
}

impl From<stripe::StripeError> for BillingError {
    fn from(e: stripe::StripeError) -> Self {
        BillingError::StripeApi(e.to_string())
    }
}
