// /////////////////////////////////////////////////////////////////////////////
// Syncrypt RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Domain Error System
//!
//! This module provides the hierarchical error system for the vault
//! synchronization domain. It categorizes failures, provides actionable error
//! messages, and supports both automated recovery decisions and
//! human-readable diagnostics.
//!
//! ## Overview
//!
//! The error system is designed around a few principles:
//!
//! - **Domain-Specific**: Errors are tailored to sync and crypto concepts
//! - **Categorized**: Errors are grouped for systematic handling: the sync
//!   engine skips per-bundle failures but aborts on revision-chain failures
//! - **Actionable**: Each error carries enough context for debugging
//! - **Type-Safe**: Callers match on variants, never on message text
//!
//! ## Propagation Policy
//!
//! The pipe framework surfaces errors at the next `read` and again at
//! `finalize`. Bundle operations propagate to the sync engine. The engine
//! logs and continues on per-bundle errors (one bad file does not stop a
//! push) but aborts a pull on any `InvalidRevision` so the local log never
//! diverges. Connection-level `ProtocolError` closes and replaces that
//! connection; `InvalidAuth` bubbles to the user.

use thiserror::Error;

/// Domain-specific errors for the vault synchronization system.
///
/// Each variant includes a descriptive message and represents a specific
/// failure mode. Variants are chosen so the sync engine can decide, per
/// category, whether to retry, skip, replace a connection, or abort.
#[derive(Error, Debug, Clone)]
pub enum SyncError {
    #[error("Invalid authentication: {0}")]
    InvalidAuth(String),

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Corrupt data: {0}")]
    CorruptData(String),

    #[error("Invalid revision: {0}")]
    InvalidRevision(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Compression error: {0}")]
    CompressionError(String),

    #[error("Encryption error: {0}")]
    EncryptionError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl SyncError {
    /// Creates a new authentication error
    pub fn invalid_auth(msg: impl Into<String>) -> Self {
        Self::InvalidAuth(msg.into())
    }

    /// Creates a new protocol error
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::ProtocolError(msg.into())
    }

    /// Creates a new IO error
    pub fn io_error(msg: impl Into<String>) -> Self {
        Self::IoError(msg.into())
    }

    /// Creates a new corrupt-data error
    pub fn corrupt(msg: impl Into<String>) -> Self {
        Self::CorruptData(msg.into())
    }

    /// Creates a new revision-chain error
    pub fn invalid_revision(msg: impl Into<String>) -> Self {
        Self::InvalidRevision(msg.into())
    }

    /// Creates a new not-found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Creates a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Creates a new cancellation error
    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::Cancelled(msg.into())
    }

    /// Creates a new serialization error
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::SerializationError(msg.into())
    }

    /// Creates a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::InternalError(msg.into())
    }

    /// Checks if the error is recoverable by retrying the operation
    pub fn is_recoverable(&self) -> bool {
        matches!(self, SyncError::IoError(_) | SyncError::Cancelled(_))
    }

    /// Checks if the error is a security-related error
    pub fn is_security_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidAuth(_) | SyncError::InvalidRevision(_) | SyncError::CorruptData(_)
        )
    }

    /// Checks if the error represents a missing object rather than a failure
    pub fn is_not_found(&self) -> bool {
        matches!(self, SyncError::NotFound(_))
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            SyncError::NotFound(err.to_string())
        } else {
            SyncError::IoError(err.to_string())
        }
    }
}
