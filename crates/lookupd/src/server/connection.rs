// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Client connection handling for the lookup server.

use super::protocol::ProtocolError;
use std::borrow::Cow;
use std::net::SocketAddr;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use thiserror::Error;

/// A connected producer.
///
/// Generic over the byte stream so the protocol can be driven over TCP or an
/// in-memory pipe.
pub struct ClientConnection<S> {
    stream: BufReader<S>,
    peer_addr: SocketAddr,
    line_buffer: Vec<u8>,
    max_line_size: usize,
}

impl<S> ClientConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Create a new client connection.
    ///
    /// `max_line_size` bounds a command line, newline included.
    pub fn new(stream: S, peer_addr: SocketAddr, max_line_size: usize) -> Self {
        Self {
            stream: BufReader::new(stream),
            peer_addr,
            line_buffer: Vec::with_capacity(256),
            max_line_size,
        }
    }

    /// Get the peer address.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Read one newline-terminated command line.
    ///
    /// Returns `Ok(None)` if the peer closed the connection. A final line
    /// without a newline is treated as a close. Bytes that are not UTF-8 are
    /// replaced, so a garbled command still reaches the parser.
    pub async fn read_line(&mut self) -> Result<Option<Cow<'_, str>>, ConnectionError> {
        self.line_buffer.clear();
        let limit = self.max_line_size as u64;
        let n = (&mut self.stream)
            .take(limit)
            .read_until(b'\n', &mut self.line_buffer)
            .await?;

        if self.line_buffer.last() == Some(&b'\n') {
            return Ok(Some(String::from_utf8_lossy(&self.line_buffer)));
        }
        if n as u64 == limit {
            return Err(ConnectionError::LineTooLong(self.max_line_size));
        }
        Ok(None)
    }

    /// Read a 4-byte big-endian length.
    pub async fn read_size(&mut self) -> Result<u32, ConnectionError> {
        Ok(self.stream.read_u32().await?)
    }

    /// Read exactly `len` bytes.
    pub async fn read_body(&mut self, len: usize) -> Result<Vec<u8>, ConnectionError> {
        let mut body = vec![0u8; len];
        self.stream.read_exact(&mut body).await?;
        Ok(body)
    }

    /// Send a framed response: 4-byte big-endian length, then the payload.
    pub async fn send_response(&mut self, payload: &[u8]) -> Result<(), ConnectionError> {
        let len = u32::try_from(payload.len())
            .map_err(|_| ConnectionError::Protocol(format!("Response too large: {}", payload.len())))?;

        let stream = self.stream.get_mut();
        stream.write_all(&len.to_be_bytes()).await?;
        stream.write_all(payload).await?;
        stream.flush().await?;

        Ok(())
    }

    /// Shutdown the write side of the connection.
    pub async fn shutdown(&mut self) -> Result<(), ConnectionError> {
        Ok(self.stream.get_mut().shutdown().await?)
    }
}

/// Connection error types.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Command line exceeds {0} bytes")]
    LineTooLong(usize),

    #[error("Client error: {0}")]
    Client(#[from] ProtocolError),
}
