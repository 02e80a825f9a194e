//! Crate-wide error type.

/// Errors surfaced by the SDK.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Network or timeout failure on an outbound call.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Non-zero platform error envelope (other than the expiry sentinel,
    /// which is retried internally).
    #[error("weixin api error {code}: {message}")]
    Api { code: i64, message: String },

    /// The retry bound was exhausted without a successful attempt.
    #[error("too many attempts: {0}")]
    TooManyAttempts(String),

    /// Inbound or REST XML failed to decode.
    #[error("xml decode error: {0}")]
    Xml(#[from] serde_xml_rs::Error),

    /// REST JSON failed to decode.
    #[error("json decode error: {0}")]
    Json(#[from] serde_json::Error),

    /// Signature mismatch or malformed encrypted envelope.
    #[error("crypto error: {0}")]
    Crypto(String),

    /// A route pattern failed to compile.
    #[error("invalid route pattern: {0}")]
    Pattern(#[from] regex::Error),

    /// Missing or malformed configuration value.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Credential cache store failure (surfaced from `set` only; reads
    /// degrade to a miss).
    #[error("cache store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// The credential broker task is gone (client torn down mid-call).
    #[error("access token broker unavailable")]
    BrokerClosed,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;
