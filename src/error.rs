// MIT License - Copyright (c) 2026 rnet contributors

use std::fmt;

/// Logical protocol violations found after a frame passed its checksum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The body does not even hold the two device ids and the message type.
    BodyTooShort { len: usize },
    /// The message type byte is not one we understand.
    UnknownMessageType(u8),
    /// The payload ended before a field could be read.
    Truncated { field: &'static str },
    /// A path declared more segments than the protocol allows.
    PathTooDeep { depth: usize },
    /// The handshake type byte is not one we understand.
    UnknownHandshakeType(u8),
    /// The event priority byte is not one we understand.
    UnknownPriority(u8),
    /// SetData packet number is not below its packet count.
    BadPacketNumber { number: u16, count: u16 },
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BodyTooShort { len } => write!(f, "message body too short ({len} bytes)"),
            Self::UnknownMessageType(t) => write!(f, "unknown message type 0x{t:02X}"),
            Self::Truncated { field } => write!(f, "payload truncated while reading {field}"),
            Self::PathTooDeep { depth } => write!(f, "path depth {depth} exceeds 8"),
            Self::UnknownHandshakeType(t) => write!(f, "unknown handshake type 0x{t:02X}"),
            Self::UnknownPriority(p) => write!(f, "unknown event priority 0x{p:02X}"),
            Self::BadPacketNumber { number, count } => {
                write!(f, "packet number {number} out of range for count {count}")
            }
        }
    }
}

/// All errors that can occur in the rnet library.
#[derive(Debug, thiserror::Error)]
pub enum RnetError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(ProtocolError),

    #[error("Connection lost")]
    Disconnected,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Path depth out of range: {details}")]
    PathOutOfRange { details: String },

    #[error("Invalid path {input:?}: {reason}")]
    InvalidPath { input: String, reason: String },

    #[error("Invalid device id {input:?}: {reason}")]
    InvalidDeviceId { input: String, reason: String },

    #[error("SetData payload of {len} bytes exceeds the length field")]
    PayloadTooLarge { len: usize },

    #[error("Invalid URI {uri}: {reason}")]
    InvalidUri { uri: String, reason: String },

    #[error("Serial port error: {0}")]
    Serial(String),

    #[error("Reserved device id: {id}")]
    ReservedDeviceId { id: String },
}

impl RnetError {
    /// Whether this error is transient and the link should simply be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RnetError::Io(_) | RnetError::Disconnected | RnetError::Serial(_)
        )
    }

    pub(crate) fn invalid_state(details: impl Into<String>) -> Self {
        RnetError::InvalidState(details.into())
    }
}

impl From<ProtocolError> for RnetError {
    fn from(e: ProtocolError) -> Self {
        RnetError::Protocol(e)
    }
}

impl From<tokio_serial::Error> for RnetError {
    fn from(e: tokio_serial::Error) -> Self {
        RnetError::Serial(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RnetError>;
