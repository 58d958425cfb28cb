// /////////////////////////////////////////////////////////////////////////////
// Syncrypt RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Hash Algorithm Value Object
//!
//! Selection of the digest algorithm used for store hashes and crypt hashes.
//! The algorithm name is persisted in the vault configuration, so parsing is
//! strict: an unknown name is a configuration error, never a silent default.
//!
//! The streaming [`ContentDigest`] wrapper erases the concrete hasher so the
//! pipe framework can update a digest without being generic over it.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use std::fmt;

use crate::error::SyncError;

/// Digest algorithm for store hashes and content hashes.
///
/// The configured algorithm must stay fixed for the lifetime of a vault:
/// store hashes derived from relative paths are the server-side identifiers,
/// and changing the algorithm would orphan every stored object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HashAlgorithm {
    #[serde(rename = "sha256")]
    Sha256,
    #[serde(rename = "sha512")]
    Sha512,
}

impl HashAlgorithm {
    /// Parses a configured algorithm name.
    pub fn parse(name: &str) -> Result<Self, SyncError> {
        match name.to_ascii_lowercase().as_str() {
            "sha256" | "sha-256" => Ok(HashAlgorithm::Sha256),
            "sha512" | "sha-512" => Ok(HashAlgorithm::Sha512),
            other => Err(SyncError::config(format!("unsupported hash algorithm: {}", other))),
        }
    }

    /// Canonical configuration name
    pub fn name(&self) -> &'static str {
        match self {
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Sha512 => "sha512",
        }
    }

    /// Digest length in bytes
    pub fn digest_len(&self) -> usize {
        match self {
            HashAlgorithm::Sha256 => 32,
            HashAlgorithm::Sha512 => 64,
        }
    }

    /// Creates a fresh streaming digest for this algorithm
    pub fn digest(&self) -> ContentDigest {
        match self {
            HashAlgorithm::Sha256 => ContentDigest(DigestInner::Sha256(Sha256::new())),
            HashAlgorithm::Sha512 => ContentDigest(DigestInner::Sha512(Sha512::new())),
        }
    }

    /// One-shot convenience: hex digest of a byte slice
    pub fn digest_hex(&self, data: &[u8]) -> String {
        let mut digest = self.digest();
        digest.update(data);
        digest.finalize_hex()
    }
}

impl Default for HashAlgorithm {
    fn default() -> Self {
        HashAlgorithm::Sha256
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Streaming digest with the concrete hasher erased.
#[derive(Debug, Clone)]
pub struct ContentDigest(DigestInner);

#[derive(Debug, Clone)]
enum DigestInner {
    Sha256(Sha256),
    Sha512(Sha512),
}

impl ContentDigest {
    /// Feeds bytes into the running digest
    pub fn update(&mut self, data: &[u8]) {
        match &mut self.0 {
            DigestInner::Sha256(h) => h.update(data),
            DigestInner::Sha512(h) => h.update(data),
        }
    }

    /// Consumes the digest and renders it as lowercase hex
    pub fn finalize_hex(self) -> String {
        match self.0 {
            DigestInner::Sha256(h) => hex::encode(h.finalize()),
            DigestInner::Sha512(h) => hex::encode(h.finalize()),
        }
    }
}
