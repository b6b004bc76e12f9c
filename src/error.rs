use thiserror::Error;

#[derive(Error, Debug)]
pub enum RealtimeError {
    #[error("WebSocket connection error: {0}")]
    WebSocketError(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON serialization/deserialization error: {0}")]
    SerdeError(#[from] serde_json::Error),

    #[error("URL parsing error: {0}")]
    UrlError(#[from] url::ParseError),

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Connection timeout")]
    Timeout,

    #[error("Connection closed: {reason}")]
    ConnectionClosed { reason: String },

    #[error("Not connected")]
    NotConnected,

    #[error("Outbound queue is full")]
    SendQueueFull,

    #[error("Client has been torn down")]
    TornDown,

    #[error("Maximum reconnection attempts exceeded")]
    MaxReconnectsExceeded,

    #[error("Metrics server error: {0}")]
    MetricsError(String),
}

/// A frame that could not be turned into an [`Event`](crate::events::Event).
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("frame of type '{frame_type}' is missing '{field}'")]
    MissingField {
        frame_type: String,
        field: &'static str,
    },
}

/// Failures talking to the notifications service.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("malformed notifications payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("notifications service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("URL parsing error: {0}")]
    Url(#[from] url::ParseError),
}

#[derive(Error, Debug)]
pub enum AggregatorError {
    /// The optimistic local change was reverted after the store kept failing.
    #[error("failed to persist read state after {attempts} attempt(s): {source}")]
    Persistence {
        attempts: u32,
        #[source]
        source: StoreError,
    },

    #[error("no notification store configured")]
    NoStore,

    #[error(transparent)]
    Store(#[from] StoreError),
}
