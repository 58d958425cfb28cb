// /////////////////////////////////////////////////////////////////////////////
// Syncrypt RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Storage Backends
//!
//! The port every remote store implements, plus its two implementations:
//! the binary TCP backend ([`binary::BinaryBackend`]) speaking the framed
//! line+payload protocol through a bounded connection pool, and the local
//! directory backend ([`local::LocalBackend`]) mirroring the same semantics
//! on the filesystem for tests and offline use.
//!
//! The port speaks in terms of bundles and revisions rather than raw bytes:
//! a backend is responsible for moving a bundle's wrapped key and encrypted
//! body, never for seeing plaintext.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

use syncrypt_domain::{Revision, SyncError, VaultConfig};

use crate::application::services::bundle::Bundle;
use crate::infrastructure::runtime::OpSemaphores;

pub mod binary;
pub mod local;

pub use binary::BinaryBackend;
pub use local::LocalBackend;

/// Stat record the server returns for a stored object.
///
/// Serialized as a string-keyed msgpack map; unknown keys are ignored so the
/// server may grow the record without breaking older clients.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoteStat {
    #[serde(default)]
    pub content_hash: Option<String>,
    #[serde(default)]
    pub file_size_crypt: Option<u64>,
}

/// Remote store port.
///
/// `stat`/`upload`/`download` update the passed bundle's remote state in
/// place; the per-vault operation semaphores bound how many bundles occupy
/// each operation at once.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Verifies connectivity and authentication.
    async fn open(&self) -> Result<(), SyncError>;

    /// Refreshes `remote_crypt_hash` from the server's stat record.
    async fn stat(&self, bundle: &Bundle) -> Result<(), SyncError>;

    /// Streams the bundle's wrapped key and encrypted body to the server.
    async fn upload(&self, bundle: &Bundle) -> Result<(), SyncError>;

    /// Fetches the wrapped key and encrypted body, decrypting into place.
    async fn download(&self, bundle: &Bundle) -> Result<(), SyncError>;

    /// Submits a signed revision for appending to the server-side log.
    async fn push_revision(&self, revision: &Revision) -> Result<(), SyncError>;

    /// Fetches revisions after `since` (all of them when `None`), in order.
    async fn fetch_revisions(&self, since: Option<&str>) -> Result<Vec<Revision>, SyncError>;

    /// Deletes every stored object and the server-side log.
    async fn wipe(&self) -> Result<(), SyncError>;

    /// Auth token issued during login, for config write-back.
    fn auth_token(&self) -> Option<String> {
        None
    }
}

/// Builds the backend selected by `[remote] type`.
pub fn backend_for(
    config: &VaultConfig,
    vault_dir: &Path,
    ops: Arc<OpSemaphores>,
) -> Result<Arc<dyn StorageBackend>, SyncError> {
    match config.remote.kind.as_str() {
        "binary" => Ok(Arc::new(BinaryBackend::new(config, ops))),
        "local" => {
            let folder = config
                .remote
                .folder
                .as_ref()
                .map(Into::into)
                .unwrap_or_else(|| vault_dir.join("data"));
            Ok(Arc::new(LocalBackend::new(folder, ops)))
        }
        other => Err(SyncError::config(format!("unknown backend type: {}", other))),
    }
}
