// /////////////////////////////////////////////////////////////////////////////
// Syncrypt RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Resource Governance
//!
//! Two-level resource coordination for the sync engine:
//!
//! 1. **Global cipher tokens** (this module's [`RESOURCE_MANAGER`]) cap the
//!    CPU-bound crypto work in flight across *all* vaults. Without the cap,
//!    a burst of scheduled updates would run one compression+cipher pipeline
//!    per file simultaneously and thrash every core.
//! 2. **Per-vault operation semaphores** ([`OpSemaphores`]) bound each kind
//!    of bundle work (`update`, `stat`, `upload`, `download`) and track
//!    *which* bundles occupy a bucket. Acquiring the same bundle twice in
//!    one bucket is a programming error and reports as such rather than
//!    deadlocking or double-running.
//!
//! Permits are RAII: dropping a permit releases the slot and wakes waiters.
//! [`TrackedSemaphore::join`] waits until a bucket is completely drained,
//! which is how `push` waits for its fan-out to settle.

use once_cell::sync::Lazy;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};

use syncrypt_domain::SyncError;

/// Maximum concurrent encrypt/decrypt pipelines across the process.
pub const CIPHER_TOKENS: usize = 8;

/// Global resource manager bounding CPU-bound cipher work.
pub struct ResourceManager {
    cipher_tokens: Arc<Semaphore>,
}

impl ResourceManager {
    fn new() -> Self {
        Self {
            cipher_tokens: Arc::new(Semaphore::new(CIPHER_TOKENS)),
        }
    }

    /// Acquires a cipher token, waiting while the system is saturated.
    ///
    /// The permit is held for the lifetime of one streamed cipher pipeline
    /// and released on drop.
    pub async fn acquire_cipher(&self) -> Result<OwnedSemaphorePermit, SyncError> {
        self.cipher_tokens
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| SyncError::internal("cipher semaphore closed"))
    }

    /// Number of currently available cipher tokens (observability)
    pub fn available_cipher_tokens(&self) -> usize {
        self.cipher_tokens.available_permits()
    }
}

/// Process-wide resource manager instance.
pub static RESOURCE_MANAGER: Lazy<ResourceManager> = Lazy::new(ResourceManager::new);

/// Counting semaphore that also tracks the set of keys currently inside.
///
/// The key set makes double-acquisition detectable and gives observers an
/// answer to "which bundles are uploading right now".
#[derive(Debug)]
pub struct TrackedSemaphore {
    name: &'static str,
    limiter: Arc<Semaphore>,
    active: Mutex<HashSet<String>>,
    idle: Notify,
}

impl TrackedSemaphore {
    pub fn new(name: &'static str, capacity: usize) -> Self {
        Self {
            name,
            limiter: Arc::new(Semaphore::new(capacity)),
            active: Mutex::new(HashSet::new()),
            idle: Notify::new(),
        }
    }

    /// Acquires a slot for `key`.
    ///
    /// Fails with `InternalError` when the key is already inside the bucket:
    /// operations on the same bundle must be serialized by the caller, so a
    /// duplicate acquisition is always a bug, never contention.
    pub async fn acquire(&self, key: &str) -> Result<TrackedPermit<'_>, SyncError> {
        let permit = self
            .limiter
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| SyncError::internal(format!("{} semaphore closed", self.name)))?;
        {
            let mut active = self.active.lock().expect("semaphore set poisoned");
            if !active.insert(key.to_string()) {
                return Err(SyncError::internal(format!(
                    "bundle {} acquired twice in {} bucket",
                    key, self.name
                )));
            }
        }
        Ok(TrackedPermit {
            semaphore: self,
            key: key.to_string(),
            _permit: permit,
        })
    }

    /// Number of keys currently inside the bucket
    pub fn active_count(&self) -> usize {
        self.active.lock().expect("semaphore set poisoned").len()
    }

    /// Whether a key is currently inside the bucket
    pub fn contains(&self, key: &str) -> bool {
        self.active.lock().expect("semaphore set poisoned").contains(key)
    }

    /// Waits until the bucket is completely drained.
    pub async fn join(&self) {
        loop {
            let notified = self.idle.notified();
            if self.active.lock().expect("semaphore set poisoned").is_empty() {
                return;
            }
            notified.await;
        }
    }

    fn release(&self, key: &str) {
        let mut active = self.active.lock().expect("semaphore set poisoned");
        active.remove(key);
        if active.is_empty() {
            self.idle.notify_waiters();
        }
    }
}

/// RAII permit of a [`TrackedSemaphore`]; releases its key on drop.
#[derive(Debug)]
pub struct TrackedPermit<'a> {
    semaphore: &'a TrackedSemaphore,
    key: String,
    _permit: OwnedSemaphorePermit,
}

impl Drop for TrackedPermit<'_> {
    fn drop(&mut self) {
        self.semaphore.release(&self.key);
    }
}

/// The four per-vault operation buckets.
pub struct OpSemaphores {
    pub update: TrackedSemaphore,
    pub stat: TrackedSemaphore,
    pub upload: TrackedSemaphore,
    pub download: TrackedSemaphore,
}

impl OpSemaphores {
    /// Network buckets are bounded by the backend concurrency; the update
    /// bucket matches the global cipher token count since updates are
    /// cipher-bound.
    pub fn new(concurrency: usize) -> Self {
        Self {
            update: TrackedSemaphore::new("update", CIPHER_TOKENS),
            stat: TrackedSemaphore::new("stat", concurrency),
            upload: TrackedSemaphore::new("upload", concurrency),
            download: TrackedSemaphore::new("download", concurrency),
        }
    }

    /// Waits for every bucket to drain.
    pub async fn join_all(&self) {
        self.update.join().await;
        self.stat.join().await;
        self.upload.join().await;
        self.download.join().await;
    }
}
