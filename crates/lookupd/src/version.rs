// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Version reporting.

/// Version advertised to producers in IDENTIFY responses.
pub const BINARY: &str = env!("CARGO_PKG_VERSION");

/// Startup banner version line, e.g. `lookupd v1.0.10 (built w/rustc)`.
pub fn string(app: &str) -> String {
    format!("{} v{} (built w/rustc)", app, BINARY)
}
