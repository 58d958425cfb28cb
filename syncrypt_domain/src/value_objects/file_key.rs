// /////////////////////////////////////////////////////////////////////////////
// Syncrypt RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # File Key Value Object
//!
//! The symmetric key of a single bundle. Keys are drawn from the OS CSPRNG,
//! never leave the client unwrapped, and are zeroized when dropped. The key
//! length is fixed by the vault configuration (`aes_key_len / 8`), and a key
//! of the wrong length is rejected at construction so that a truncated or
//! corrupted fileinfo record can never silently produce a weak cipher.

use rand::RngCore;
use zeroize::Zeroize;

use crate::error::SyncError;

/// Per-file AES key material. Zeroized on drop; `Debug` never prints bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct FileKey(Vec<u8>);

impl FileKey {
    /// Generates a fresh key of `len` bytes from the OS CSPRNG.
    pub fn generate(len: usize) -> Self {
        let mut bytes = vec![0u8; len];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        FileKey(bytes)
    }

    /// Wraps key bytes recovered from a fileinfo record.
    ///
    /// Fails with `CorruptData` when the length does not match the vault's
    /// configured key size.
    pub fn from_bytes(bytes: Vec<u8>, expected_len: usize) -> Result<Self, SyncError> {
        if bytes.len() != expected_len {
            return Err(SyncError::corrupt(format!(
                "file key length {} does not match configured key size {}",
                bytes.len(),
                expected_len
            )));
        }
        Ok(FileKey(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Drop for FileKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl std::fmt::Debug for FileKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "FileKey({} bytes)", self.0.len())
    }
}
