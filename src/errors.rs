use thiserror::Error;

/// Failure kinds of the decode, dispatch and sync pipeline.
///
/// Every stage returns one of these instead of panicking; the component that
/// produced the error logs it and drops the message.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Outer `ServiceEnvelope` bytes do not match the schema.
    #[error("malformed service envelope: {0}")]
    EnvelopeDecode(String),

    /// Wrong channel key or corrupted ciphertext. The two cannot be told apart.
    #[error("decrypt failed: {0}")]
    Decrypt(String),

    /// Port-specific payload failed to parse.
    #[error("malformed {port} payload: {source}")]
    PayloadDecode {
        port: &'static str,
        #[source]
        source: prost::DecodeError,
    },

    /// A decoded field is semantically unusable (e.g. missing coordinates).
    #[error("invalid field: {0}")]
    Validation(String),

    /// Tracking backend call failed.
    #[error("backend {operation} failed: {detail}")]
    Backend {
        operation: &'static str,
        detail: String,
    },
}

impl BridgeError {
    pub fn backend(operation: &'static str, detail: impl Into<String>) -> Self {
        BridgeError::Backend {
            operation,
            detail: detail.into(),
        }
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;
