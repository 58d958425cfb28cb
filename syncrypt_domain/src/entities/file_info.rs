// /////////////////////////////////////////////////////////////////////////////
// Syncrypt RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # FileInfo Entity
//!
//! The wrapped-key record of a bundle: the file's relative path, its
//! symmetric key, and the key size, serialized as a compact binary object
//! map. On disk and on the wire this record only ever appears compressed and
//! RSA-OAEP-encrypted under the vault public key; the plain form exists in
//! memory for the moment between unwrap and key extraction.
//!
//! The `hash` field is reserved in the record layout but always zeroed:
//! content hashes travel in revision records, and repeating them here would
//! only widen what a leaked fileinfo reveals.

use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::value_objects::FileKey;

/// Plain (decrypted) form of the per-bundle key record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileInfo {
    pub filename: String,
    #[serde(with = "serde_bytes")]
    pub key: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub hash: Vec<u8>,
    pub key_size: u32,
}

impl FileInfo {
    /// Builds the record for a bundle's relative path and key.
    pub fn new(filename: impl Into<String>, key: &FileKey) -> Self {
        Self {
            filename: filename.into(),
            key: key.as_bytes().to_vec(),
            hash: Vec::new(),
            key_size: key.len() as u32,
        }
    }

    /// Serializes to a string-keyed msgpack map.
    pub fn to_msgpack(&self) -> Result<Vec<u8>, SyncError> {
        rmp_serde::to_vec_named(self)
            .map_err(|e| SyncError::serialization(format!("cannot encode fileinfo: {}", e)))
    }

    /// Parses a decrypted fileinfo record.
    ///
    /// Returns `CorruptData`: a record that decrypted but does not parse
    /// means the stored object was damaged, not that it is missing.
    pub fn from_msgpack(bytes: &[u8]) -> Result<Self, SyncError> {
        rmp_serde::from_slice(bytes)
            .map_err(|e| SyncError::corrupt(format!("cannot decode fileinfo: {}", e)))
    }

    /// Extracts the file key, validating its length.
    pub fn file_key(&self, expected_len: usize) -> Result<FileKey, SyncError> {
        FileKey::from_bytes(self.key.clone(), expected_len)
    }
}
