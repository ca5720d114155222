//! Error types for the notification channel.
//!
//! None of these ever escape the public `ChannelHandle` surface: the channel
//! logs them, and forwards transport-level ones to the `on_error` handler.

/// Failures raised while building or running a channel connection.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ChannelError {
    /// The connection URL could not be turned into a WebSocket request.
    #[error("invalid connection url: {0}")]
    InvalidUrl(String),

    /// The WebSocket handshake failed (refused, timed out, rejected).
    #[error("connect failed: {0}")]
    Connect(String),

    /// The established socket reported an error.
    #[error("transport error: {0}")]
    Transport(String),

    /// The channel was built outside of a tokio runtime.
    #[error("no tokio runtime available")]
    NoRuntime,
}

impl ChannelError {
    pub fn from_tungstenite(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error;
        match err {
            Error::Url(e) => Self::InvalidUrl(e.to_string()),
            Error::HttpFormat(e) => Self::InvalidUrl(e.to_string()),
            other => Self::Connect(other.to_string()),
        }
    }

    /// Short machine-readable code, handy for structured log fields.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidUrl(_) => "invalid_url",
            Self::Connect(_) => "connect_failed",
            Self::Transport(_) => "transport_error",
            Self::NoRuntime => "no_runtime",
        }
    }
}

/// Reasons an inbound frame was rejected as a message envelope.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("frame is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame has no string `type` field")]
    MissingType,
}
