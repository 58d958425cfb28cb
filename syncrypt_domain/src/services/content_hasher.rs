// /////////////////////////////////////////////////////////////////////////////
// Syncrypt RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Content Hasher Service
//!
//! Computes the *crypt hash* of a bundle: a running digest over the plaintext
//! content with the file key mixed in at finalization. The server stores this
//! value as an opaque equality token; because the key participates, two users
//! holding the same plaintext under different keys produce different tokens,
//! so the server cannot correlate equal files across vaults.
//!
//! The hasher is a plain domain service: synchronous, allocation-light, and
//! driven chunk-by-chunk by whatever transport feeds it (the pipe framework
//! in practice).

use crate::value_objects::{ContentDigest, FileKey, HashAlgorithm};

/// Running plaintext digest that yields a key-mixed crypt hash.
#[derive(Debug, Clone)]
pub struct ContentHasher {
    digest: ContentDigest,
}

impl ContentHasher {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        Self {
            digest: algorithm.digest(),
        }
    }

    /// Feeds a chunk of plaintext into the running digest
    pub fn update(&mut self, data: &[u8]) {
        self.digest.update(data);
    }

    /// Finalizes without key mixing; used for plain content digests
    pub fn finalize_hex(self) -> String {
        self.digest.finalize_hex()
    }

    /// Mixes the file key into the digest and renders the crypt hash.
    ///
    /// The key is appended after the content so the token commits to both;
    /// mixing must happen exactly once, which consuming `self` guarantees.
    pub fn finalize_with_key(mut self, key: &FileKey) -> String {
        self.digest.update(key.as_bytes());
        self.digest.finalize_hex()
    }
}
