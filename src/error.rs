//! Error taxonomy for the recognition core.
//!
//! Every error carries a stable machine-readable kind (for the renderer's
//! dispatch logic) and a short English message. User-facing wording is the
//! renderer's responsibility.

use thiserror::Error;

/// Errors raised by the credential store.
#[derive(Debug, Error)]
pub enum CredentialError {
    /// The key fails the format policy before any network call is made.
    #[error("invalid key format: {0}")]
    InvalidFormat(String),

    /// The recognition service rejected the key (401).
    #[error("the recognition service rejected this key")]
    InvalidKey,

    /// The key is valid but lacks the required scopes (403).
    #[error("this key does not have permission to use the service")]
    PermissionDenied,

    /// Verification was rate limited (429).
    #[error("verification rate limited, try again later")]
    RateLimited,

    /// The service returned a 5xx during verification.
    #[error("recognition service unavailable (status {status})")]
    ServiceUnavailable { status: u16 },

    /// Transport-level failure before a status was received.
    #[error("network failure during verification: {0}")]
    NetworkError(String),

    /// No key is stored.
    #[error("no API key is stored")]
    NotFound,

    /// The stored blob cannot be decrypted on this device. This is the
    /// normal signal for device-binding drift, not a corrupted store;
    /// callers should prompt for the key again.
    #[error("stored key cannot be decrypted on this device")]
    DecryptionFailed,

    /// The key/value surface failed.
    #[error("credential storage failure: {0}")]
    Storage(String),
}

impl CredentialError {
    pub fn kind(&self) -> &'static str {
        match self {
            CredentialError::InvalidFormat(_) => "InvalidFormat",
            CredentialError::InvalidKey => "InvalidKey",
            CredentialError::PermissionDenied => "PermissionDenied",
            CredentialError::RateLimited => "RateLimited",
            CredentialError::ServiceUnavailable { .. } => "ServiceUnavailable",
            CredentialError::NetworkError(_) => "NetworkError",
            CredentialError::NotFound => "NotFound",
            CredentialError::DecryptionFailed => "DecryptionFailed",
            CredentialError::Storage(_) => "Storage",
        }
    }

    /// Recoverable kinds feed the retry policy; the rest surface at once.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CredentialError::RateLimited
                | CredentialError::ServiceUnavailable { .. }
                | CredentialError::NetworkError(_)
        )
    }
}

/// Errors raised by the audio pipeline.
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("audio capture failed: {0}")]
    CaptureFailed(String),

    #[error("audio capture permission denied")]
    PermissionDenied,

    #[error("unsupported audio format: {0}")]
    FormatUnsupported(String),

    /// The frame queue was saturated and whole frames were discarded.
    #[error("dropped {dropped} audio frames under back-pressure")]
    BackpressureDrop { dropped: u64 },
}

impl AudioError {
    pub fn kind(&self) -> &'static str {
        match self {
            AudioError::CaptureFailed(_) => "CaptureFailed",
            AudioError::PermissionDenied => "PermissionDenied",
            AudioError::FormatUnsupported(_) => "FormatUnsupported",
            AudioError::BackpressureDrop { .. } => "BackpressureDrop",
        }
    }
}

/// Errors raised by the recognition session client.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to open recognition socket: {0}")]
    WebSocketOpenFailed(String),

    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("recognition service rejected the credential")]
    AuthFailed,

    #[error("recognition service rate limited the session")]
    RateLimited,

    #[error("recognition service error: {0}")]
    ServerError(String),

    #[error("unparseable message from the recognition service: {0}")]
    MessageParseFailed(String),

    #[error("session cancelled")]
    Cancelled,
}

impl SessionError {
    pub fn kind(&self) -> &'static str {
        match self {
            SessionError::WebSocketOpenFailed(_) => "WebSocketOpenFailed",
            SessionError::Timeout(_) => "Timeout",
            SessionError::AuthFailed => "AuthFailed",
            SessionError::RateLimited => "RateLimited",
            SessionError::ServerError(_) => "ServerError",
            SessionError::MessageParseFailed(_) => "MessageParseFailed",
            SessionError::Cancelled => "Cancelled",
        }
    }

    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SessionError::RateLimited
                | SessionError::ServerError(_)
                | SessionError::Timeout(_)
                | SessionError::WebSocketOpenFailed(_)
        )
    }
}

/// Errors raised by the overlap processor and alignment plumbing.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("internal pipeline error: {0}")]
    InternalError(String),
}

impl PipelineError {
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::InvalidInput(_) => "InvalidInput",
            PipelineError::InternalError(_) => "InternalError",
        }
    }
}

/// Top-level error for the session manager surface.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error(transparent)]
    Audio(#[from] AudioError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

impl CoreError {
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::Credential(e) => e.kind(),
            CoreError::Audio(e) => e.kind(),
            CoreError::Session(e) => e.kind(),
            CoreError::Pipeline(e) => e.kind(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_are_stable() {
        assert_eq!(CredentialError::DecryptionFailed.kind(), "DecryptionFailed");
        assert_eq!(SessionError::AuthFailed.kind(), "AuthFailed");
        assert_eq!(
            AudioError::BackpressureDrop { dropped: 3 }.kind(),
            "BackpressureDrop"
        );
        assert_eq!(
            PipelineError::InvalidInput("x".into()).kind(),
            "InvalidInput"
        );
    }

    #[test]
    fn test_recoverable_split() {
        assert!(CredentialError::RateLimited.is_recoverable());
        assert!(!CredentialError::DecryptionFailed.is_recoverable());
        assert!(SessionError::Timeout("open").is_recoverable());
        assert!(!SessionError::AuthFailed.is_recoverable());
    }
}
