use thiserror::Error;

#[derive(Error, Debug)]
pub enum NetError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Backend returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Invalid backend URL: {0}")]
    InvalidUrl(String),

    #[error("Channel join rejected: {0}")]
    JoinRejected(String),

    #[error("Channel join timed out")]
    JoinTimeout,

    #[error("Realtime connection closed")]
    ChannelClosed,

    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, NetError>;
