use std::io;
use std::string::FromUtf8Error;
use thiserror::Error;
use tokio::sync::mpsc::error::SendError;
use url::ParseError;

use crate::connection::Command;

/// The specific RFC 6455 violation a [`Error::Protocol`] variant carries.
///
/// Mirrors the three-way error domain split in the original delegate-based
/// client (`kWebSocketErrorHandshake` / `kWebSocketErrorTransport` /
/// `kWebSocketErrorProtocol`), narrowed to the protocol domain.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolErrorKind {
    #[error("reserved bit set without a negotiated extension")]
    ReservedBitsSet,

    #[error("invalid opcode")]
    InvalidOpcode,

    #[error("masked frame received from server")]
    MaskedServerFrame,

    #[error("control frame must not be fragmented")]
    ControlFrameFragmented,

    #[error("control frame payload exceeds 125 bytes")]
    ControlFramePayloadTooLarge,

    #[error("continuation frame with no fragmented message in progress")]
    UnexpectedContinuation,

    #[error("text or binary frame received while a fragmented message is in progress")]
    FragmentationInProgress,

    #[error("text message payload is not valid UTF-8")]
    InvalidUtf8Text,

    #[error("close reason is not valid UTF-8")]
    InvalidUtf8CloseReason,

    #[error("close frame carries an invalid status code: {0}")]
    InvalidCloseCode(u16),

    #[error("message exceeds the configured maximum size")]
    MessageTooBig,
}

impl ProtocolErrorKind {
    /// The close code this violation should be reported with, per RFC 6455 §7.4.
    pub fn close_code(&self) -> u16 {
        match self {
            ProtocolErrorKind::InvalidUtf8Text | ProtocolErrorKind::InvalidUtf8CloseReason => 1007,
            ProtocolErrorKind::MessageTooBig => 1009,
            _ => 1002,
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("transport error: {source}")]
    Transport {
        #[from]
        source: io::Error,
    },

    #[error("protocol error: {0}")]
    Protocol(ProtocolErrorKind),

    #[error("connection is not open")]
    NotOpen,

    #[error("{source}")]
    InvalidUtf8 {
        #[from]
        source: FromUtf8Error,
    },

    #[error("invalid WebSocket URL: {0}")]
    InvalidUrl(String),

    #[error("invalid WebSocket scheme: {0} (expected ws or wss)")]
    InvalidScheme(String),

    #[error("{source}")]
    UrlParse {
        #[from]
        source: ParseError,
    },

    #[error("connection task has already shut down")]
    ConnectionGone,
}

impl From<ProtocolErrorKind> for Error {
    fn from(kind: ProtocolErrorKind) -> Self {
        Error::Protocol(kind)
    }
}

impl From<SendError<Command>> for Error {
    fn from(_: SendError<Command>) -> Self {
        Error::ConnectionGone
    }
}

pub type Result<T> = std::result::Result<T, Error>;
