// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Lookup discovery node
//!
//! Producers of topics and channels connect over TCP, identify themselves
//! and announce what they serve. The node keeps an in-memory registration
//! database that consumers query to find producers.
//!
//! # Features
//!
//! - **Registration database**: `(category, topic, channel)` to producer sets,
//!   with `*` wildcard queries
//! - **Lookup protocol V1**: line-based commands with length-prefixed responses
//! - **Liveness**: heartbeat timestamps and tombstones filter stale producers
//! - **Ephemeral names**: `#ephemeral` registrations vanish with their last producer
//!
//! # Quick Start
//!
//! ```bash
//! # Listen on the default port (4160)
//! lookupd
//!
//! # Custom port and broadcast address
//! lookupd --port 4170 --broadcast-address lookup-1.internal
//!
//! # Using config file
//! lookupd --config lookupd.json
//! ```
//!
//! # Wire Protocol
//!
//! ```text
//! client: "  V1"                         (4-byte magic, once)
//! client: "IDENTIFY\n" <u32 BE len> <JSON body>
//! server: <u32 BE len> <JSON response>
//! client: "REGISTER <topic> [channel]\n"
//! server: <u32 BE len> "OK"
//! ```

pub mod config;
pub mod names;
pub mod server;
pub mod version;

pub use config::{ConfigError, ServerConfig};
pub use server::registry::RegistrationsExt;
pub use server::{
    Category, LookupServer, PeerInfo, Producer, Registration, RegistrationDb, ServerError,
};
