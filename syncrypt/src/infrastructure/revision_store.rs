// /////////////////////////////////////////////////////////////////////////////
// Syncrypt RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Revision Store
//!
//! Append-only persistence of the local revision log at
//! `<vault>/.vault/revisions`. Records are length-framed msgpack
//! (`[u32-le length][revision]`), the same encoding that crosses the wire,
//! so a stored log and a fetched log are byte-comparable.
//!
//! The store is deliberately dumb: framing and append order only. Chain
//! validation belongs to `ChainVerifier`, application effects to the sync
//! engine. A truncated or undecodable tail reports `CorruptData` rather than
//! silently dropping records, since a diverged local log must never look merely
//! shorter.

use std::path::PathBuf;
use tokio::io::AsyncWriteExt;

use syncrypt_domain::{Revision, SyncError};

/// Append-only, length-framed revision log on disk.
pub struct RevisionStore {
    path: PathBuf,
}

impl RevisionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Loads the full log; a missing file is an empty log.
    pub async fn load(&self) -> Result<Vec<Revision>, SyncError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(SyncError::io_error(format!(
                    "cannot read {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };
        let mut revisions = Vec::new();
        let mut offset = 0usize;
        while offset < bytes.len() {
            if bytes.len() - offset < 4 {
                return Err(SyncError::corrupt("truncated revision frame header"));
            }
            let len = u32::from_le_bytes([
                bytes[offset],
                bytes[offset + 1],
                bytes[offset + 2],
                bytes[offset + 3],
            ]) as usize;
            offset += 4;
            if bytes.len() - offset < len {
                return Err(SyncError::corrupt("truncated revision frame"));
            }
            revisions.push(Revision::from_msgpack(&bytes[offset..offset + len])?);
            offset += len;
        }
        Ok(revisions)
    }

    /// Appends one revision and flushes it to disk.
    pub async fn append(&self, revision: &Revision) -> Result<(), SyncError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SyncError::io_error(format!("cannot create {}: {}", parent.display(), e)))?;
        }
        let body = revision.to_msgpack()?;
        let mut frame = Vec::with_capacity(4 + body.len());
        frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
        frame.extend_from_slice(&body);

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| SyncError::io_error(format!("cannot open {}: {}", self.path.display(), e)))?;
        file.write_all(&frame).await.map_err(SyncError::from)?;
        file.flush().await.map_err(SyncError::from)?;
        Ok(())
    }

    /// Identifier of the newest stored revision
    pub async fn latest_id(&self) -> Result<Option<String>, SyncError> {
        Ok(self.load().await?.pop().map(|rev| rev.revision_id))
    }

    /// Whether a revision id is already stored (idempotent apply check)
    pub async fn contains(&self, revision_id: &str) -> Result<bool, SyncError> {
        Ok(self
            .load()
            .await?
            .iter()
            .any(|rev| rev.revision_id == revision_id))
    }

    /// Drops the whole log (vault wipe)
    pub async fn clear(&self) -> Result<(), SyncError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SyncError::from(e)),
        }
    }
}
