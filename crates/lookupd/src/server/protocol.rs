// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Lookup wire protocol.
//!
//! After a 4-byte magic selects the protocol version, producers send
//! newline-terminated ASCII commands. IDENTIFY is followed by a
//! length-prefixed JSON body. Every response, success or error, is framed
//! the same way:
//!
//! ```text
//! +----------------+-------------------------------+
//! | Length (4B BE) | "OK" | JSON | "<CODE> <desc>" |
//! +----------------+-------------------------------+
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Magic prefix selecting protocol V1.
pub const MAGIC_V1: [u8; 4] = *b"  V1";

/// Response to every successful command except IDENTIFY.
pub const OK: &[u8] = b"OK";

/// Error codes surfaced to peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Bad command, reused IDENTIFY, or command before IDENTIFY
    Invalid,
    /// Malformed IDENTIFY body or missing mandatory field
    BadBody,
    /// Topic name failed validation
    BadTopic,
    /// Channel name failed validation
    BadChannel,
    /// Unknown protocol magic
    BadProtocol,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Invalid => "E_INVALID",
            Self::BadBody => "E_BAD_BODY",
            Self::BadTopic => "E_BAD_TOPIC",
            Self::BadChannel => "E_BAD_CHANNEL",
            Self::BadProtocol => "E_BAD_PROTOCOL",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type Cause = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error reported to a peer: code, description and optional underlying cause.
#[derive(Debug, Error)]
#[error("{code} {desc}")]
pub struct ClientError {
    pub code: ErrorCode,
    pub desc: String,
    #[source]
    pub cause: Option<Cause>,
}

/// Command failure, classified by what happens to the connection next.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Reported to the peer; the connection keeps reading commands.
    #[error(transparent)]
    Recoverable(ClientError),

    /// Reported to the peer; the connection is then torn down.
    #[error(transparent)]
    Fatal(ClientError),
}

impl ProtocolError {
    pub fn recoverable(code: ErrorCode, desc: impl Into<String>) -> Self {
        Self::Recoverable(ClientError {
            code,
            desc: desc.into(),
            cause: None,
        })
    }

    pub fn fatal(code: ErrorCode, desc: impl Into<String>) -> Self {
        Self::Fatal(ClientError {
            code,
            desc: desc.into(),
            cause: None,
        })
    }

    /// Fatal error wrapping the failure that caused it.
    pub fn fatal_with(
        code: ErrorCode,
        desc: impl Into<String>,
        cause: impl Into<Cause>,
    ) -> Self {
        Self::Fatal(ClientError {
            code,
            desc: desc.into(),
            cause: Some(cause.into()),
        })
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }

    pub fn client_error(&self) -> &ClientError {
        match self {
            Self::Recoverable(e) | Self::Fatal(e) => e,
        }
    }

    pub fn code(&self) -> ErrorCode {
        self.client_error().code
    }

    /// Bytes sent to the peer: `"<CODE> <desc>"`.
    pub fn to_payload(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }
}

/// A parsed command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Ping,
    Identify,
    Register(Vec<String>),
    Unregister(Vec<String>),
    Unknown(String),
}

impl Command {
    /// Parse one command line (trailing whitespace and newline ignored).
    pub fn parse(line: &str) -> Self {
        let mut params = line.trim().split(' ').map(str::to_string);
        let name = params.next().unwrap_or_default();
        match name.as_str() {
            "PING" => Self::Ping,
            "IDENTIFY" => Self::Identify,
            "REGISTER" => Self::Register(params.collect()),
            "UNREGISTER" => Self::Unregister(params.collect()),
            _ => Self::Unknown(name),
        }
    }
}

/// IDENTIFY body sent by a producer.
///
/// Missing numeric fields decode as 0 and missing strings as empty so that
/// the "missing fields" check can report them uniformly.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentifyBody {
    #[serde(default)]
    pub broadcast_address: String,
    #[serde(default)]
    pub tcp_port: u16,
    #[serde(default)]
    pub http_port: u16,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub hostname: String,
}

impl IdentifyBody {
    /// All mandatory fields present and non-zero.
    pub fn is_complete(&self) -> bool {
        !self.broadcast_address.is_empty()
            && self.tcp_port != 0
            && self.http_port != 0
            && !self.version.is_empty()
    }
}

/// IDENTIFY response: this node's connectivity info.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifyResponse {
    pub tcp_port: u16,
    pub http_port: u16,
    pub version: String,
    pub broadcast_address: String,
    pub hostname: String,
}
