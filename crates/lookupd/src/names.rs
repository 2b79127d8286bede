// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Topic and channel name validation.
//!
//! Topics and channels share one naming rule: 1 to 64 characters drawn from
//! `[.a-zA-Z0-9_-]`, optionally followed by the literal `#ephemeral` suffix.
//! An ephemeral registration is dropped as soon as its last producer leaves.

use regex::Regex;
use std::sync::LazyLock;

/// Maximum length of a topic or channel name, suffix included.
pub const MAX_NAME_LEN: usize = 64;

/// Suffix marking a topic or channel as ephemeral.
pub const EPHEMERAL_SUFFIX: &str = "#ephemeral";

static VALID_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[.a-zA-Z0-9_-]+(#ephemeral)?$").unwrap()
});

/// Check whether `name` is a valid topic name.
pub fn is_valid_topic_name(name: &str) -> bool {
    is_valid_name(name)
}

/// Check whether `name` is a valid channel name.
pub fn is_valid_channel_name(name: &str) -> bool {
    is_valid_name(name)
}

/// Check whether `name` carries the ephemeral marker.
pub fn is_ephemeral(name: &str) -> bool {
    name.ends_with(EPHEMERAL_SUFFIX)
}

fn is_valid_name(name: &str) -> bool {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return false;
    }
    VALID_NAME.is_match(name)
}
