//! Error types, one enum per §7 error kind.

use thiserror::Error;

/// Raised by the signing source resolver before any I/O happens. Fatal to construction.
#[derive(Debug, Error)]
pub enum ResolverError {
    #[error("signer mode {0:?} requires X402_PRIVATE_KEY, but it is missing or empty")]
    MissingPrivateKey(String),
    #[error("X402_PRIVATE_KEY is not a valid 32-byte hex private key")]
    InvalidPrivateKey,
    #[error("signer mode {0:?} requires X402_STATIC_PAYMENT_HEADER, but it is missing or empty")]
    MissingStaticHeader(String),
    #[error("unsupported signer mode {0:?}")]
    UnsupportedSignerMode(String),
}

/// Raised by a signing function (on-chain nonce read, or the EIP-712 signing primitive itself).
/// Propagated to the caller of `getHeader` and is never retried by the core.
#[derive(Debug, Error)]
pub enum SigningError {
    #[error("failed to read on-chain Permit nonce for {owner} on {asset}: {source}")]
    NonceRead {
        owner: String,
        asset: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("failed to read system clock")]
    ClockError(#[from] std::time::SystemTimeError),
    #[error("failed to sign EIP-712 Permit payload: {0}")]
    SignHash(#[source] alloy_signer::Error),
    #[error("asset address {0:?} is not a valid 20-byte hex address")]
    InvalidAssetAddress(String),
    #[error("facilitator signer address {0:?} is not a valid 20-byte hex address")]
    InvalidFacilitatorAddress(String),
    #[error("permit cap {0:?} is not a valid decimal integer")]
    InvalidCap(String),
}

/// Raised while the header factory assembles or encodes a [`crate::types::PaymentPayload`].
#[derive(Debug, Error)]
pub enum FactoryError {
    #[error(transparent)]
    Signing(#[from] SigningError),
    #[error("signing function returned a deadline that is not a valid integer: {0:?}")]
    InvalidDeadline(String),
    #[error("signing function returned a cap that is not a valid decimal integer: {0}")]
    InvalidCap(String),
    #[error("failed to encode payment payload to json: {0}")]
    JsonEncode(#[from] serde_json::Error),
}

/// Raised by the fetch interceptor itself, wrapping the above or reqwest-level failures.
#[derive(Debug, Error)]
pub enum InterceptorError {
    #[error(transparent)]
    Factory(#[from] FactoryError),
    #[error("request object is not cloneable; are you passing a streaming body?")]
    RequestNotCloneable,
    #[error("failed to encode payment header value: {0}")]
    HeaderValueEncode(#[from] http::header::InvalidHeaderValue),
    #[error("configured header name {0:?} is not a valid HTTP header name")]
    InvalidHeaderName(String),
    #[error("failed to read response body: {0}")]
    ResponseBody(#[source] reqwest::Error),
}

impl From<InterceptorError> for reqwest_middleware::Error {
    fn from(error: InterceptorError) -> Self {
        reqwest_middleware::Error::Middleware(error.into())
    }
}
