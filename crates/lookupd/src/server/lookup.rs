// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Lookup protocol V1 state machine.
//!
//! One instance drives one producer connection: it reads command lines,
//! applies them to the shared [`RegistrationDb`] and writes framed responses.
//! Whatever ends the connection (fatal error, peer close, I/O error,
//! shutdown), the producer is removed from every registration it joined.

use super::connection::{ClientConnection, ConnectionError};
use super::protocol::{Command, ErrorCode, IdentifyBody, IdentifyResponse, ProtocolError, OK};
use super::registry::{Category, PeerInfo, Producer, Registration, RegistrationDb, WILDCARD};
use crate::config::ServerConfig;
use crate::names;
use crate::version;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// State shared by every connection of one server.
#[derive(Debug)]
pub struct LookupContext {
    pub db: Arc<RegistrationDb>,
    pub config: Arc<ServerConfig>,
    /// Port the TCP listener is actually bound to
    pub tcp_port: u16,
}

/// Connection identity.
#[derive(Debug, Default)]
pub enum ConnectionState {
    /// No IDENTIFY yet.
    #[default]
    Unidentified,
    /// IDENTIFY accepted; the identity never changes afterwards.
    Identified(Arc<Producer>),
}

impl ConnectionState {
    pub fn producer(&self) -> Option<&Arc<Producer>> {
        match self {
            Self::Unidentified => None,
            Self::Identified(producer) => Some(producer),
        }
    }
}

/// Protocol V1 handler.
pub struct LookupProtocolV1 {
    ctx: Arc<LookupContext>,
}

impl LookupProtocolV1 {
    pub fn new(ctx: Arc<LookupContext>) -> Self {
        Self { ctx }
    }

    /// Run the read loop until the connection ends, then clean up.
    ///
    /// Returns `Ok(())` on peer close or shutdown, the fatal error otherwise.
    pub async fn io_loop<S>(
        &self,
        conn: &mut ClientConnection<S>,
        shutdown: &CancellationToken,
    ) -> Result<(), ConnectionError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut state = ConnectionState::Unidentified;
        let result = self.run(conn, &mut state, shutdown).await;

        info!(client = %conn.peer_addr(), "PROTOCOL(V1): exiting ioloop");
        self.cleanup(&state, conn.peer_addr());

        result
    }

    async fn run<S>(
        &self,
        conn: &mut ClientConnection<S>,
        state: &mut ConnectionState,
        shutdown: &CancellationToken,
    ) -> Result<(), ConnectionError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        loop {
            let command = tokio::select! {
                line = conn.read_line() => match line {
                    Ok(Some(line)) => Ok(Command::parse(&line)),
                    Ok(None) => return Ok(()),
                    Err(ConnectionError::LineTooLong(max)) => Err(ProtocolError::fatal(
                        ErrorCode::Invalid,
                        format!("command line exceeds {} bytes", max),
                    )),
                    Err(e) => return Err(e),
                },
                _ = shutdown.cancelled() => {
                    debug!(client = %conn.peer_addr(), "Connection handler shutting down");
                    return Ok(());
                }
            };

            // Only IDENTIFY awaits inside exec, and only before touching the db
            let response = match command {
                Ok(command) => tokio::select! {
                    response = self.exec(conn, state, command) => response,
                    _ = shutdown.cancelled() => return Ok(()),
                },
                Err(err) => Err(err),
            };

            match response {
                Ok(payload) => {
                    if !payload.is_empty() {
                        conn.send_response(&payload).await?;
                    }
                }
                Err(err) => {
                    match err.client_error().cause.as_ref() {
                        Some(cause) => {
                            error!(client = %conn.peer_addr(), error = %err, cause = %cause, "Protocol error")
                        }
                        None => error!(client = %conn.peer_addr(), error = %err, "Protocol error"),
                    }

                    conn.send_response(&err.to_payload()).await?;

                    if err.is_fatal() {
                        return Err(err.into());
                    }
                }
            }
        }
    }

    /// Dispatch one command.
    async fn exec<S>(
        &self,
        conn: &mut ClientConnection<S>,
        state: &mut ConnectionState,
        command: Command,
    ) -> Result<Vec<u8>, ProtocolError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        match command {
            Command::Ping => Ok(self.ping(state)),
            Command::Identify => self.identify(conn, state).await,
            Command::Register(params) => self.register(state, &params),
            Command::Unregister(params) => self.unregister(state, &params),
            Command::Unknown(name) => Err(ProtocolError::fatal(
                ErrorCode::Invalid,
                format!("invalid command {}", name),
            )),
        }
    }

    fn ping(&self, state: &ConnectionState) -> Vec<u8> {
        if let Some(producer) = state.producer() {
            let elapsed = producer.peer_info().touch();
            debug!(client = %producer.id(), last_ping = ?elapsed, "pinged");
        }
        OK.to_vec()
    }

    async fn identify<S>(
        &self,
        conn: &mut ClientConnection<S>,
        state: &mut ConnectionState,
    ) -> Result<Vec<u8>, ProtocolError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        if state.producer().is_some() {
            return Err(ProtocolError::fatal(
                ErrorCode::Invalid,
                "cannot IDENTIFY again",
            ));
        }

        let size = conn.read_size().await.map_err(|e| {
            ProtocolError::fatal_with(ErrorCode::BadBody, "IDENTIFY failed to read body size", e)
        })? as usize;

        if size > self.ctx.config.max_body_size {
            return Err(ProtocolError::fatal(
                ErrorCode::BadBody,
                format!(
                    "IDENTIFY body too big {} > {}",
                    size, self.ctx.config.max_body_size
                ),
            ));
        }

        let raw = conn.read_body(size).await.map_err(|e| {
            ProtocolError::fatal_with(ErrorCode::BadBody, "IDENTIFY failed to read body", e)
        })?;

        let body: IdentifyBody = serde_json::from_slice(&raw).map_err(|e| {
            ProtocolError::fatal_with(ErrorCode::BadBody, "IDENTIFY failed to decode JSON body", e)
        })?;

        if !body.is_complete() {
            return Err(ProtocolError::fatal(
                ErrorCode::BadBody,
                "IDENTIFY missing fields",
            ));
        }

        let remote_address = conn.peer_addr().to_string();
        let mut info = PeerInfo::new(remote_address.clone());
        info.remote_address = remote_address;
        info.hostname = body.hostname;
        info.broadcast_address = body.broadcast_address;
        info.tcp_port = body.tcp_port;
        info.http_port = body.http_port;
        info.version = body.version;

        info!(
            client = %conn.peer_addr(),
            address = %info.broadcast_address,
            tcp = info.tcp_port,
            http = info.http_port,
            version = %info.version,
            "IDENTIFY"
        );

        let producer = Arc::new(Producer::new(info));
        let key = Registration::client();
        if self.ctx.db.add_producer(&key, &producer) {
            info!(client = %conn.peer_addr(), registration = %key, "DB: REGISTER");
        }
        *state = ConnectionState::Identified(producer);

        let response = IdentifyResponse {
            tcp_port: self.ctx.tcp_port,
            http_port: self.ctx.config.http_port,
            version: version::BINARY.to_string(),
            broadcast_address: self.ctx.config.broadcast_address.clone(),
            hostname: self.ctx.config.hostname.clone(),
        };

        match serde_json::to_vec(&response) {
            Ok(payload) => Ok(payload),
            Err(e) => {
                error!(error = %e, "Failed to encode IDENTIFY response");
                Ok(OK.to_vec())
            }
        }
    }

    fn register(&self, state: &ConnectionState, params: &[String]) -> Result<Vec<u8>, ProtocolError> {
        let producer = require_identified(state)?;
        let (topic, channel) = topic_channel("REGISTER", params)?;

        if let Some(channel) = channel {
            let key = Registration::channel(topic, channel);
            if self.ctx.db.add_producer(&key, producer) {
                info!(client = %producer.id(), registration = %key, "DB: REGISTER");
            }
        }

        let key = Registration::topic(topic);
        if self.ctx.db.add_producer(&key, producer) {
            info!(client = %producer.id(), registration = %key, "DB: REGISTER");
        }

        Ok(OK.to_vec())
    }

    fn unregister(
        &self,
        state: &ConnectionState,
        params: &[String],
    ) -> Result<Vec<u8>, ProtocolError> {
        let producer = require_identified(state)?;
        let (topic, channel) = topic_channel("UNREGISTER", params)?;

        match channel {
            Some(channel) => {
                self.remove_producer(&Registration::channel(topic, channel), producer);
            }
            None => {
                // Leaving a topic means leaving all of its channels too
                for key in self.ctx.db.find_registrations(Category::Channel, topic, WILDCARD) {
                    let (removed, _) = self.ctx.db.remove_producer(&key, producer.id());
                    if removed {
                        info!(client = %producer.id(), registration = %key, "DB: UNREGISTER");
                    }
                }
                self.remove_producer(&Registration::topic(topic), producer);
            }
        }

        Ok(OK.to_vec())
    }

    /// Remove `producer` from `key`, dropping the registration if it was the
    /// last producer of an ephemeral name.
    fn remove_producer(&self, key: &Registration, producer: &Producer) {
        let (removed, left) = self.ctx.db.remove_producer_pruning(key, producer.id());
        if removed {
            info!(client = %producer.id(), registration = %key, "DB: UNREGISTER");
            if left == 0 && key.is_ephemeral() {
                debug!(registration = %key, "Removed ephemeral registration");
            }
        }
    }

    /// Remove the producer from every registration it still belongs to.
    fn cleanup(&self, state: &ConnectionState, peer_addr: SocketAddr) {
        let Some(producer) = state.producer() else {
            return;
        };

        for key in self.ctx.db.lookup_registrations(producer.id()) {
            self.remove_producer(&key, producer);
        }
        debug!(client = %peer_addr, "Registrations cleaned up");
    }
}

fn require_identified(state: &ConnectionState) -> Result<&Arc<Producer>, ProtocolError> {
    state
        .producer()
        .ok_or_else(|| ProtocolError::fatal(ErrorCode::Invalid, "client must IDENTIFY"))
}

/// Extract and validate `<topic> [channel]`.
fn topic_channel<'a>(
    command: &str,
    params: &'a [String],
) -> Result<(&'a str, Option<&'a str>), ProtocolError> {
    let Some(topic) = params.first() else {
        return Err(ProtocolError::fatal(
            ErrorCode::Invalid,
            format!("{} insufficient number of params", command),
        ));
    };
    let channel = params
        .get(1)
        .map(String::as_str)
        .filter(|c| !c.is_empty());

    if !names::is_valid_topic_name(topic) {
        return Err(ProtocolError::fatal(
            ErrorCode::BadTopic,
            format!("{} topic name '{}' is not valid", command, topic),
        ));
    }
    if let Some(channel) = channel {
        if !names::is_valid_channel_name(channel) {
            return Err(ProtocolError::fatal(
                ErrorCode::BadChannel,
                format!("{} channel name '{}' is not valid", command, channel),
            ));
        }
    }

    Ok((topic, channel))
}
