// /////////////////////////////////////////////////////////////////////////////
// Syncrypt RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Store Hash Value Object
//!
//! The store hash is the deterministic, path-derived identifier a bundle is
//! known by on the server. It is the digest of the relative path bytes,
//! rendered as lowercase hex, and is independent of the file's content: the
//! server never learns path names, only their hashes.
//!
//! The first two hex characters shard the local fileinfo directory so a
//! large vault does not put every wrapped key into one directory.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::SyncError;
use crate::value_objects::hash_algorithm::HashAlgorithm;

/// Deterministic server-side identifier of a bundle, derived from its
/// relative path.
///
/// Equality and hashing are on the hex rendering, which is what crosses the
/// wire in `STAT`/`UPLOAD`/`DOWNLOAD` request lines.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoreHash(String);

impl StoreHash {
    /// Derives the store hash of a relative path.
    ///
    /// The path separator must already be normalized to `/`; the same file
    /// must hash identically on every platform that syncs the vault.
    pub fn derive(relpath: &str, algorithm: HashAlgorithm) -> Self {
        StoreHash(algorithm.digest_hex(relpath.as_bytes()))
    }

    /// Validates a hex string received from the wire or from disk layout.
    pub fn from_hex(hex: impl Into<String>) -> Result<Self, SyncError> {
        let hex = hex.into();
        if hex.is_empty() || !hex.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()) {
            return Err(SyncError::corrupt(format!("invalid store hash: {:?}", hex)));
        }
        Ok(StoreHash(hex))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First two hex characters, used as the fileinfo shard directory
    pub fn shard_prefix(&self) -> &str {
        &self.0[..2]
    }

    /// Remainder of the hash after the shard prefix
    pub fn shard_rest(&self) -> &str {
        &self.0[2..]
    }
}

impl fmt::Display for StoreHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_is_deterministic_and_content_free() {
        let a = StoreHash::derive("docs/hello.txt", HashAlgorithm::Sha256);
        let b = StoreHash::derive("docs/hello.txt", HashAlgorithm::Sha256);
        assert_eq!(a, b);

        let other = StoreHash::derive("docs/other.txt", HashAlgorithm::Sha256);
        assert_ne!(a, other);
    }

    #[test]
    fn test_shard_splits_hex() {
        let h = StoreHash::derive("hello.txt", HashAlgorithm::Sha256);
        assert_eq!(h.shard_prefix().len(), 2);
        assert_eq!(format!("{}{}", h.shard_prefix(), h.shard_rest()), h.as_str());
    }

    #[test]
    fn test_from_hex_rejects_non_hex() {
        assert!(StoreHash::from_hex("zz00").is_err());
        assert!(StoreHash::from_hex("").is_err());
        assert!(StoreHash::from_hex("ABCD").is_err());
        assert!(StoreHash::from_hex("abcd1234").is_ok());
    }
}
