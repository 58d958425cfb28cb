// /////////////////////////////////////////////////////////////////////////////
// Syncrypt RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Local Storage Backend
//!
//! Directory-store backend mirroring the binary backend's semantics on the
//! filesystem: objects keyed by store hash, a stat record per object, and an
//! append-only revision log with the same parent-linkage rules a server
//! enforces. Used for tests, offline vaults, and as the executable
//! specification of what the wire backend expects from a server.
//!
//! Layout under the configured folder:
//!
//! ```text
//! objects/<store_hash>    encrypted body
//! fileinfo/<store_hash>   wrapped key record
//! stat/<store_hash>       msgpack stat record (content hash, body size)
//! revisions               length-framed revision log
//! ```

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

use syncrypt_domain::{Revision, SyncError};

use crate::application::services::bundle::Bundle;
use crate::infrastructure::pipes::{FileReader, FileWriter, FileWriterOptions, Pipe, PipeExt};
use crate::infrastructure::revision_store::RevisionStore;
use crate::infrastructure::runtime::{OpSemaphores, RESOURCE_MANAGER};

use super::{RemoteStat, StorageBackend};

/// Filesystem-backed storage backend.
pub struct LocalBackend {
    folder: PathBuf,
    revisions: RevisionStore,
    ops: Arc<OpSemaphores>,
}

impl LocalBackend {
    pub fn new(folder: impl Into<PathBuf>, ops: Arc<OpSemaphores>) -> Self {
        let folder = folder.into();
        Self {
            revisions: RevisionStore::new(folder.join("revisions")),
            folder,
            ops,
        }
    }

    fn object_path(&self, store_hash: &str) -> PathBuf {
        self.folder.join("objects").join(store_hash)
    }

    fn fileinfo_path(&self, store_hash: &str) -> PathBuf {
        self.folder.join("fileinfo").join(store_hash)
    }

    fn stat_path(&self, store_hash: &str) -> PathBuf {
        self.folder.join("stat").join(store_hash)
    }

    async fn read_stat(&self, store_hash: &str) -> Result<Option<RemoteStat>, SyncError> {
        match tokio::fs::read(self.stat_path(store_hash)).await {
            Ok(bytes) => Ok(Some(rmp_serde::from_slice(&bytes).map_err(|e| {
                SyncError::corrupt(format!("cannot decode stat record: {}", e))
            })?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SyncError::from(e)),
        }
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    async fn open(&self) -> Result<(), SyncError> {
        tokio::fs::create_dir_all(&self.folder)
            .await
            .map_err(|e| SyncError::io_error(format!("cannot create {}: {}", self.folder.display(), e)))?;
        debug!(folder = %self.folder.display(), "local backend ready");
        Ok(())
    }

    async fn stat(&self, bundle: &Bundle) -> Result<(), SyncError> {
        let store_hash = bundle.store_hash().to_string();
        let _op = self.ops.stat.acquire(&store_hash).await?;
        let stat = self.read_stat(&store_hash).await?;
        bundle.set_remote_crypt_hash(stat.and_then(|s| s.content_hash));
        Ok(())
    }

    async fn upload(&self, bundle: &Bundle) -> Result<(), SyncError> {
        let store_hash = bundle.store_hash().to_string();
        let _op = self.ops.upload.acquire(&store_hash).await?;
        let (key_size_crypt, file_size_crypt, crypt_hash) = bundle.upload_header()?;
        let _cipher = RESOURCE_MANAGER.acquire_cipher().await?;
        info!(bundle = %bundle.relpath(), bytes = file_size_crypt, "uploading to local store");

        // Wrapped key record
        let key_bytes = tokio::fs::read(bundle.path_fileinfo()?).await.map_err(SyncError::from)?;
        if key_bytes.len() as u64 != key_size_crypt {
            return Err(SyncError::protocol(format!(
                "wrapped key is {} bytes, declared {}",
                key_bytes.len(),
                key_size_crypt
            )));
        }
        let options = FileWriterOptions {
            create_dirs: true,
            store_temporary: true,
            ..Default::default()
        };
        let mut key_sink = crate::infrastructure::pipes::Once::new(key_bytes)
            .chain(|src| FileWriter::new(src, self.fileinfo_path(&store_hash), options));
        key_sink.consume().await?;

        // Encrypted body
        let body = bundle.read_encrypted_stream()?;
        let mut body_sink = FileWriter::new(body, self.object_path(&store_hash), options);
        body_sink.consume().await?;
        let stored = tokio::fs::metadata(self.object_path(&store_hash))
            .await
            .map_err(SyncError::from)?
            .len();
        if stored != file_size_crypt {
            return Err(SyncError::protocol(format!(
                "encrypted body is {} bytes, declared {}",
                stored, file_size_crypt
            )));
        }

        // Stat record
        let stat = RemoteStat {
            content_hash: Some(crypt_hash.clone()),
            file_size_crypt: Some(file_size_crypt),
        };
        let stat_bytes = rmp_serde::to_vec_named(&stat)
            .map_err(|e| SyncError::serialization(format!("cannot encode stat record: {}", e)))?;
        if let Some(parent) = self.stat_path(&store_hash).parent() {
            tokio::fs::create_dir_all(parent).await.map_err(SyncError::from)?;
        }
        tokio::fs::write(self.stat_path(&store_hash), stat_bytes)
            .await
            .map_err(SyncError::from)?;

        bundle.set_remote_crypt_hash(Some(crypt_hash));
        Ok(())
    }

    async fn download(&self, bundle: &Bundle) -> Result<(), SyncError> {
        let store_hash = bundle.store_hash().to_string();
        let _op = self.ops.download.acquire(&store_hash).await?;
        info!(bundle = %bundle.relpath(), "downloading from local store");

        let key_bytes = match tokio::fs::read(self.fileinfo_path(&store_hash)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SyncError::not_found(format!("no stored object for {}", bundle.relpath())))
            }
            Err(e) => return Err(SyncError::from(e)),
        };
        bundle.install_fileinfo(&key_bytes).await?;
        bundle.load_key().await?;

        let assert_hash = bundle.remote_crypt_hash();
        let body = FileReader::new(self.object_path(&store_hash));
        let matched = bundle.write_encrypted_stream(Box::new(body), assert_hash).await?;
        if !matched {
            warn!(bundle = %bundle.relpath(), "stored content failed hash verification");
            return Err(SyncError::corrupt(format!(
                "stored content hash mismatch for {}",
                bundle.relpath()
            )));
        }
        Ok(())
    }

    async fn push_revision(&self, revision: &Revision) -> Result<(), SyncError> {
        // Same acceptance rules a server enforces: linear parent chain,
        // idempotent on revision id.
        if self.revisions.contains(&revision.revision_id).await? {
            return Ok(());
        }
        let latest = self.revisions.latest_id().await?;
        if latest.as_deref() != revision.parent_id.as_deref() {
            return Err(SyncError::protocol(format!(
                "revision parent {:?} does not match log head {:?}",
                revision.parent_id, latest
            )));
        }
        info!(revision = %revision.revision_id, op = revision.operation().tag(), "appending revision");
        self.revisions.append(revision).await
    }

    async fn fetch_revisions(&self, since: Option<&str>) -> Result<Vec<Revision>, SyncError> {
        let all = self.revisions.load().await?;
        match since {
            None => Ok(all),
            Some(id) => {
                let position = all.iter().position(|rev| rev.revision_id == id).ok_or_else(|| {
                    SyncError::protocol(format!("unknown revision id: {}", id))
                })?;
                Ok(all.into_iter().skip(position + 1).collect())
            }
        }
    }

    async fn wipe(&self) -> Result<(), SyncError> {
        for sub in ["objects", "fileinfo", "stat"] {
            let path = self.folder.join(sub);
            match tokio::fs::remove_dir_all(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(SyncError::from(e)),
            }
        }
        self.revisions.clear().await?;
        info!(folder = %self.folder.display(), "wiped local store");
        Ok(())
    }
}
