use std::io;

use thiserror::Error;

use crate::protocol::Opcode;

/// Errors raised while encoding or decoding a gateway message.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Declared sizes and the bytes that actually follow disagree.
    #[error("framing error: {0}")]
    Framing(String),

    #[error("response opcode mismatch: expected {expected}, got {actual}")]
    OpcodeMismatch { expected: i32, actual: i32 },

    #[error("unknown opcode {0}")]
    UnknownOpcode(i32),

    /// Negative return code from the gateway.
    #[error("{op} failed: {message} (code {code})")]
    Remote {
        op: Opcode,
        code: i32,
        message: String,
    },

    #[error("{op} response carried {actual} fields, expected {expected}")]
    FieldCount {
        op: Opcode,
        expected: usize,
        actual: usize,
    },

    #[error("field is {actual} bytes wide, expected {expected}")]
    FieldWidth { expected: usize, actual: usize },

    #[error("invalid field: {0}")]
    InvalidField(String),

    /// Outgoing message refused before anything was written.
    #[error("message of {size} bytes exceeds limit of {limit}")]
    TooLarge { size: usize, limit: usize },
}

impl ProtocolError {
    /// True when the byte stream this error came from can no longer be trusted.
    pub fn is_framing(&self) -> bool {
        matches!(
            self,
            ProtocolError::Framing(_)
                | ProtocolError::OpcodeMismatch { .. }
                | ProtocolError::UnknownOpcode(_)
        )
    }

    /// Remote return code, if this is a remote operation error.
    pub fn remote_code(&self) -> Option<i32> {
        match self {
            ProtocolError::Remote { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Errors surfaced by gateway clients, the instance registry and the locality monitor.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("failed to connect to gateway {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("i/o error talking to gateway {addr}: {source}")]
    Io {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("gateway {addr}{}: {source}", path_suffix(.path))]
    Protocol {
        addr: String,
        path: Option<String>,
        #[source]
        source: ProtocolError,
    },

    #[error("connection to gateway {addr} is closed")]
    Closed { addr: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid gateway host {0:?}")]
    InvalidHost(String),

    #[error("no gateway hosts configured")]
    NoHosts,
}

impl GatewayError {
    /// Whether the client that produced this error must be discarded.
    ///
    /// Remote return codes leave the stream in sync and do not count.
    pub fn is_connection_fatal(&self) -> bool {
        match self {
            GatewayError::Connect { .. } | GatewayError::Io { .. } | GatewayError::Closed { .. } => {
                true
            }
            GatewayError::Protocol { source, .. } => source.is_framing(),
            _ => false,
        }
    }

    /// Remote return code carried by this error, if any.
    pub fn remote_code(&self) -> Option<i32> {
        match self {
            GatewayError::Protocol { source, .. } => source.remote_code(),
            _ => None,
        }
    }
}

fn path_suffix(path: &Option<String>) -> String {
    match path {
        Some(path) => format!(" ({})", path),
        None => String::new(),
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
