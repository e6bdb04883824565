use thiserror::Error;

use crate::config::ConfigError;

/// The crate's single error type. Every fallible boundary -- HTTP framing,
/// the CGI pump, the fd transport, the supervisor's process management --
/// converges here so a worker can map any failure to a response or an exit
/// code in one place.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("malformed request: {0}")]
    BadRequestSyntax(String),

    #[error("request exceeds configured size limit")]
    RequestTooLarge,

    #[error("peer connection broken: {0}")]
    PeerBroken(#[source] std::io::Error),

    #[error("client closed connection before request was complete")]
    ClientClosed,

    #[error("control channel broken: {0}")]
    TransportBroken(#[source] std::io::Error),

    #[error("control channel delivered a message without the expected descriptor")]
    TransportTruncated,

    #[error("control channel not ready")]
    TransportWouldBlock,

    #[error("cgi script produced a malformed response: {0}")]
    CGIProtocolError(String),

    #[error("failed to spawn cgi script: {0}")]
    CGISpawnFailed(#[source] std::io::Error),

    #[error("fork() unavailable: {0}")]
    ForkUnavailable(#[source] nix::Error),

    #[error("worker pool exhausted, no worker accepted the connection")]
    ForkPoolExhausted,

    #[error("fatal accept() failure: {0}")]
    AcceptFatal(#[source] std::io::Error),

    #[error("shutdown requested by signal")]
    SignalShutdown,

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    /// HTTP status this error should be reported to the client as, per the
    /// propagation policy: framing and size errors are client faults, cgi
    /// failures are gateway faults, pool exhaustion is a capacity fault,
    /// everything else is an internal error.
    pub fn status_code(&self) -> u16 {
        match self {
            ServerError::BadRequestSyntax(_) | ServerError::RequestTooLarge => 400,
            ServerError::CGIProtocolError(_) | ServerError::CGISpawnFailed(_) => 502,
            ServerError::ForkPoolExhausted => 503,
            _ => 500,
        }
    }

    /// Errors for which the correct action is to drop the connection
    /// silently rather than attempt to write a response.
    pub fn is_silent(&self) -> bool {
        matches!(self, ServerError::ClientClosed | ServerError::PeerBroken(_))
    }
}

pub type Result<T> = std::result::Result<T, ServerError>;
