// /////////////////////////////////////////////////////////////////////////////
// Syncrypt RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Infrastructure Logging
//!
//! Structured logging for the sync engine, built on `tracing`. The core
//! never prints; it emits events (`debug!` for connection lifecycle, `info!`
//! for uploads, downloads and revisions, `warn!` for per-bundle errors the
//! engine skips over) and leaves the subscriber to the embedding
//! application.
//!
//! `RUST_LOG` overrides the default filter, so a debugging session can dial
//! a single module up (`RUST_LOG=syncrypt::infrastructure::backend=trace`)
//! without drowning in cipher-pipeline noise.

use tracing_subscriber::EnvFilter;

use syncrypt_domain::SyncError;

/// Installs the process-wide fmt subscriber.
///
/// `default_filter` applies when `RUST_LOG` is unset, e.g. `"info"` or
/// `"syncrypt=debug"`. Fails if a global subscriber is already installed.
pub fn init_logging(default_filter: &str) -> Result<(), SyncError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| SyncError::internal(format!("cannot install tracing subscriber: {}", e)))
}

/// Best-effort subscriber installation for tests; ignores "already set".
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_test_writer()
        .try_init();
}
