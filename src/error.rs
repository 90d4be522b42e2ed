//! Crate-wide error type for conversation, codec and transport operations.

/// Error type for livecall operations
#[derive(Debug, thiserror::Error)]
pub enum LiveError {
    /// Microphone access was refused or no capture device is available.
    /// The conversation cannot start.
    #[error("microphone unavailable: {0}")]
    PermissionDenied(String),

    /// The session handshake or the mid-session transport failed. Triggers
    /// full teardown; the user must restart manually (no automatic retry).
    #[error("connection failed: {0}")]
    Connection(String),

    /// An inbound audio or text payload failed to decode. Recoverable for
    /// that one message, never fatal to the session.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// Required configuration is missing, e.g. the endpoint credential.
    /// Fatal before any connection attempt.
    #[error("setup error: {0}")]
    Setup(String),
}

pub type Result<T> = std::result::Result<T, LiveError>;

#[cfg(test)]
mod tests {
    use super::*;

    // Every public error case carries its category in the rendered message,
    // which is what ends up in logs and in `Conversation::error_message`.
    #[test]
    fn test_error_messages_name_their_category() {
        let cases: [(LiveError, &str); 4] = [
            (
                LiveError::PermissionDenied("no source".into()),
                "microphone unavailable: no source",
            ),
            (
                LiveError::Connection("handshake refused".into()),
                "connection failed: handshake refused",
            ),
            (
                LiveError::MalformedPayload("bad base64".into()),
                "malformed payload: bad base64",
            ),
            (
                LiveError::Setup("GEMINI_API_KEY not set".into()),
                "setup error: GEMINI_API_KEY not set",
            ),
        ];
        for (error, rendered) in cases {
            assert_eq!(error.to_string(), rendered);
        }
    }
}
