// /////////////////////////////////////////////////////////////////////////////
// Syncrypt RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Observer Pipes
//!
//! Transparent tees: [`HashPipe`] feeds every passing chunk into a running
//! content digest, [`CountPipe`] counts bytes. Both hand out a shared handle
//! at construction so the caller can collect the observation after the
//! pipeline has been consumed and the pipe itself is gone.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use syncrypt_domain::{ContentHasher, FileKey, HashAlgorithm, SyncError};

use super::{BoxedPipe, Pipe};

/// Handle onto the digest accumulated by a [`HashPipe`].
///
/// Finalization consumes the digest; collecting a result twice is a logic
/// error and reports as such.
#[derive(Clone)]
pub struct SharedHasher {
    inner: Arc<Mutex<Option<ContentHasher>>>,
}

impl SharedHasher {
    fn update(&self, data: &[u8]) {
        if let Some(hasher) = self.inner.lock().expect("hasher lock poisoned").as_mut() {
            hasher.update(data);
        }
    }

    fn take(&self) -> Result<ContentHasher, SyncError> {
        self.inner
            .lock()
            .expect("hasher lock poisoned")
            .take()
            .ok_or_else(|| SyncError::internal("digest already finalized"))
    }

    /// Crypt hash: content digest with the file key mixed in
    pub fn finalize_with_key(&self, key: &FileKey) -> Result<String, SyncError> {
        Ok(self.take()?.finalize_with_key(key))
    }

    /// Plain content digest
    pub fn finalize_hex(&self) -> Result<String, SyncError> {
        Ok(self.take()?.finalize_hex())
    }
}

/// Transparent pipe updating a running digest on every pass-through.
pub struct HashPipe {
    input: BoxedPipe,
    hasher: SharedHasher,
}

impl HashPipe {
    pub fn new(input: BoxedPipe, algorithm: HashAlgorithm) -> (Self, SharedHasher) {
        let hasher = SharedHasher {
            inner: Arc::new(Mutex::new(Some(ContentHasher::new(algorithm)))),
        };
        (
            Self {
                input,
                hasher: hasher.clone(),
            },
            hasher,
        )
    }
}

#[async_trait]
impl Pipe for HashPipe {
    async fn read(&mut self) -> Result<Vec<u8>, SyncError> {
        let chunk = self.input.read().await?;
        if !chunk.is_empty() {
            self.hasher.update(&chunk);
        }
        Ok(chunk)
    }

    async fn finalize(&mut self) -> Result<(), SyncError> {
        self.input.finalize().await
    }
}

/// Handle onto the byte count accumulated by a [`CountPipe`].
#[derive(Clone)]
pub struct ByteCount {
    total: Arc<AtomicU64>,
}

impl ByteCount {
    pub fn get(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }
}

/// Transparent pipe counting every byte that passes through.
pub struct CountPipe {
    input: BoxedPipe,
    total: Arc<AtomicU64>,
}

impl CountPipe {
    pub fn new(input: BoxedPipe) -> (Self, ByteCount) {
        let total = Arc::new(AtomicU64::new(0));
        (
            Self {
                input,
                total: total.clone(),
            },
            ByteCount { total },
        )
    }
}

#[async_trait]
impl Pipe for CountPipe {
    async fn read(&mut self) -> Result<Vec<u8>, SyncError> {
        let chunk = self.input.read().await?;
        self.total.fetch_add(chunk.len() as u64, Ordering::Relaxed);
        Ok(chunk)
    }

    async fn finalize(&mut self) -> Result<(), SyncError> {
        self.input.finalize().await
    }
}
