use thiserror::Error;

/// Construct-time failures. Everything after construction is best-effort:
/// transport errors are logged and recovered by reconnection, never raised.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid websocket url `{0}`: expected ws:// or wss:// scheme")]
    InvalidWsUrl(String),

    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("api error: {0}")]
    Api(String),
}
