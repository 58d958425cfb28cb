// /////////////////////////////////////////////////////////////////////////////
// Syncrypt RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Asymmetric Cipher Pipes
//!
//! RSA-OAEP (SHA-256) wrap and unwrap for small blobs: file keys and
//! metadata records. These pipes are *not* for file payloads; RSA is three
//! orders of magnitude slower than AES and every modulus-sized block carries
//! 66 bytes of OAEP overhead.
//!
//! Messages longer than one OAEP capacity are split across consecutive
//! modulus-sized blocks, so a metadata record of any reasonable size wraps
//! without a separate envelope format.

use async_trait::async_trait;
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;

use syncrypt_domain::SyncError;

use super::{BoxedPipe, Pipe};

/// OAEP-SHA256 overhead per modulus-sized block.
const OAEP_OVERHEAD: usize = 2 * 32 + 2;

/// Wraps the stream under an RSA public key, one OAEP block per read.
pub struct EncryptRsaOaep {
    input: BoxedPipe,
    public_key: RsaPublicKey,
    buf: Vec<u8>,
    upstream_done: bool,
    done: bool,
}

impl EncryptRsaOaep {
    pub fn new(input: BoxedPipe, public_key: RsaPublicKey) -> Self {
        Self {
            input,
            public_key,
            buf: Vec::new(),
            upstream_done: false,
            done: false,
        }
    }

    fn max_message_len(&self) -> usize {
        self.public_key.size() - OAEP_OVERHEAD
    }
}

#[async_trait]
impl Pipe for EncryptRsaOaep {
    async fn read(&mut self) -> Result<Vec<u8>, SyncError> {
        if self.done {
            return Ok(Vec::new());
        }
        let max_len = self.max_message_len();
        loop {
            if self.buf.len() >= max_len || (self.upstream_done && !self.buf.is_empty()) {
                let take = self.buf.len().min(max_len);
                let message: Vec<u8> = self.buf.drain(..take).collect();
                return self
                    .public_key
                    .encrypt(&mut rand::rngs::OsRng, Oaep::new::<Sha256>(), &message)
                    .map_err(|e| SyncError::EncryptionError(format!("RSA-OAEP encryption failed: {}", e)));
            }
            if self.upstream_done {
                self.done = true;
                return Ok(Vec::new());
            }
            let chunk = self.input.read().await?;
            if chunk.is_empty() {
                self.upstream_done = true;
            } else {
                self.buf.extend_from_slice(&chunk);
            }
        }
    }

    async fn finalize(&mut self) -> Result<(), SyncError> {
        self.input.finalize().await
    }
}

/// Unwraps a stream of modulus-sized OAEP blocks under an RSA private key.
pub struct DecryptRsaOaep {
    input: BoxedPipe,
    private_key: RsaPrivateKey,
    buf: Vec<u8>,
    upstream_done: bool,
    done: bool,
}

impl DecryptRsaOaep {
    pub fn new(input: BoxedPipe, private_key: RsaPrivateKey) -> Self {
        Self {
            input,
            private_key,
            buf: Vec::new(),
            upstream_done: false,
            done: false,
        }
    }
}

#[async_trait]
impl Pipe for DecryptRsaOaep {
    async fn read(&mut self) -> Result<Vec<u8>, SyncError> {
        if self.done {
            return Ok(Vec::new());
        }
        let block_len = self.private_key.size();
        loop {
            if self.buf.len() >= block_len {
                let block: Vec<u8> = self.buf.drain(..block_len).collect();
                return self
                    .private_key
                    .decrypt(Oaep::new::<Sha256>(), &block)
                    // Wrong key and damaged block are indistinguishable here;
                    // both mean this record cannot be trusted.
                    .map_err(|e| SyncError::corrupt(format!("RSA-OAEP decryption failed: {}", e)));
            }
            if self.upstream_done {
                if self.buf.is_empty() {
                    self.done = true;
                    return Ok(Vec::new());
                }
                return Err(SyncError::corrupt(format!(
                    "truncated RSA block: {} of {} bytes",
                    self.buf.len(),
                    block_len
                )));
            }
            let chunk = self.input.read().await?;
            if chunk.is_empty() {
                self.upstream_done = true;
            } else {
                self.buf.extend_from_slice(&chunk);
            }
        }
    }

    async fn finalize(&mut self) -> Result<(), SyncError> {
        self.input.finalize().await
    }
}
