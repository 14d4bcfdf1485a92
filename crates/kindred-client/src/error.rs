use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to connect: {0}")]
    Connect(String),

    #[error("gateway handshake failed: {0}")]
    Handshake(String),

    /// The gateway refused a command.
    #[error("gateway error: {0}")]
    Protocol(String),

    #[error("connection closed")]
    Closed,

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server returned {status}: {message}")]
    Server { status: u16, message: String },

    #[error("invalid payload: {0}")]
    Json(#[from] serde_json::Error),
}
