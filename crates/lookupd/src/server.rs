// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Lookup server core implementation.

use crate::config::ServerConfig;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

pub mod connection;
pub mod lookup;
pub mod protocol;
pub mod registry;

pub use connection::{ClientConnection, ConnectionError};
pub use lookup::{LookupContext, LookupProtocolV1};
use protocol::{ErrorCode, MAGIC_V1};
pub use registry::{Category, PeerInfo, Producer, Registration, RegistrationDb};

/// Pause after a failed accept (e.g. out of file descriptors).
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Lookup server: TCP listener plus the shared registration database.
#[derive(Clone)]
pub struct LookupServer {
    config: Arc<ServerConfig>,
    db: Arc<RegistrationDb>,
    listener: Arc<Mutex<Option<TcpListener>>>,
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    running: Arc<AtomicBool>,
}

impl LookupServer {
    /// Validate `config` and bind the TCP listener.
    ///
    /// A `tcp_port` of 0 binds an ephemeral port; see [`Self::local_addr`].
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        config
            .validate()
            .map_err(|e| ServerError::Config(e.to_string()))?;

        let listener = TcpListener::bind(config.listen_addr())
            .await
            .map_err(|e| ServerError::Bind(format!("{}: {}", config.listen_addr(), e)))?;
        let local_addr = listener.local_addr()?;

        info!("TCP: listening on {}", local_addr);

        Ok(Self {
            config: Arc::new(config),
            db: Arc::new(RegistrationDb::new()),
            listener: Arc::new(Mutex::new(Some(listener))),
            local_addr,
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
            running: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Accept connections until [`Self::shutdown`] is called, then wait for
    /// every connection handler to finish.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = self
            .listener
            .lock()
            .take()
            .ok_or(ServerError::AlreadyRunning)?;
        self.running.store(true, Ordering::SeqCst);

        let ctx = Arc::new(LookupContext {
            db: self.db.clone(),
            config: self.config.clone(),
            tcp_port: self.local_addr.port(),
        });

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            info!("TCP: new client({})", peer_addr);

                            let ctx = ctx.clone();
                            let shutdown = self.shutdown.clone();
                            self.tracker.spawn(async move {
                                if let Err(e) = Self::handle_connection(stream, peer_addr, ctx, shutdown).await {
                                    warn!("Connection error from {}: {}", peer_addr, e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                            tokio::time::sleep(ACCEPT_BACKOFF).await;
                        }
                    }
                }
                _ = self.shutdown.cancelled() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        drop(listener);
        info!("TCP: closing {}", self.local_addr);

        self.tracker.close();
        if !self.tracker.is_empty() {
            info!("Waiting for {} connection(s) to finish", self.tracker.len());
        }
        self.tracker.wait().await;

        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Handle a client connection: protocol magic, then the protocol loop.
    async fn handle_connection(
        stream: TcpStream,
        peer_addr: SocketAddr,
        ctx: Arc<LookupContext>,
        shutdown: CancellationToken,
    ) -> Result<(), ConnectionError> {
        let mut conn = ClientConnection::new(stream, peer_addr, ctx.config.max_line_size);

        let magic = tokio::select! {
            magic = conn.read_body(MAGIC_V1.len()) => magic?,
            _ = shutdown.cancelled() => {
                debug!("Connection handler shutting down: {}", peer_addr);
                return Ok(());
            }
        };

        debug!(
            "CLIENT({}): desired protocol magic '{}'",
            peer_addr,
            String::from_utf8_lossy(&magic)
        );

        if magic != MAGIC_V1 {
            warn!(
                "client({}) bad protocol magic '{}'",
                peer_addr,
                String::from_utf8_lossy(&magic)
            );
            conn.send_response(ErrorCode::BadProtocol.as_str().as_bytes())
                .await?;
            let _ = conn.shutdown().await;
            return Ok(());
        }

        let result = LookupProtocolV1::new(ctx).io_loop(&mut conn, &shutdown).await;
        let _ = conn.shutdown().await;

        info!("Connection closed: {}", peer_addr);
        result
    }

    /// Signal the server to shutdown.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Shared registration database.
    pub fn db(&self) -> &Arc<RegistrationDb> {
        &self.db
    }

    /// Producers matching a query that are neither stale nor tombstoned.
    pub fn active_producers(
        &self,
        category: Category,
        key: &str,
        sub_key: &str,
    ) -> Vec<Arc<Producer>> {
        registry::filter_active(
            &self.db.find_producers(category, key, sub_key),
            self.config.inactivity_timeout(),
            self.config.tombstone_lifetime(),
        )
    }

    /// Number of connection handlers still running.
    pub fn connection_count(&self) -> usize {
        self.tracker.len()
    }

    /// Check if server is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Server error types.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Bind error: {0}")]
    Bind(String),

    #[error("Server already running")]
    AlreadyRunning,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
