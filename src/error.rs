//! Error types for the media-connection layer

/// Result type alias using the crate Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while probing paths or driving stream connections
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// WHEP handshake failed (request error, bad body, missing answer)
    #[error("Handshake error: {0}")]
    Handshake(String),

    /// WHEP endpoint answered with a non-success status
    #[error("Handshake rejected with HTTP status {0}")]
    HandshakeStatus(u16),

    /// SDP could not be generated or applied
    #[error("SDP error: {0}")]
    Sdp(String),

    /// ICE never reached a connected state, or failed outright
    #[error("ICE failure: {0}")]
    Ice(String),

    /// An operation exceeded its deadline
    #[error("Operation timeout: {0}")]
    Timeout(String),

    /// No stream with the given id is registered
    #[error("Stream not found: {0}")]
    StreamNotFound(String),

    /// No candidate path answered a probe and no prior path is known
    #[error("No reachable path: {0}")]
    NoReachablePath(String),

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// WebRTC library error
    #[error("WebRTC error: {0}")]
    WebRtc(#[from] webrtc::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error should feed the reconnect machinery
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Handshake(_)
                | Error::HandshakeStatus(_)
                | Error::Ice(_)
                | Error::Timeout(_)
                | Error::NoReachablePath(_)
                | Error::Http(_)
                | Error::Io(_)
        )
    }

    /// Check if this error is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::InvalidConfig(_))
    }
}
