// /////////////////////////////////////////////////////////////////////////////
// Syncrypt RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # File Writer Sink
//!
//! Terminal pipe writing the stream to disk. In `store_temporary` mode the
//! bytes land in a sibling `.part` file that is only renamed over the target
//! at finalization, and only when the stream completed cleanly. A decrypt
//! pipeline that fails halfway, or whose hash verification rejects the
//! result, leaves the previous file exactly as it was.
//!
//! `create_backup` additionally moves an existing target aside to `.bak`
//! before the rename, so even a committed replacement is one step from
//! recoverable.

use async_trait::async_trait;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;

use syncrypt_domain::SyncError;

use super::{BoxedPipe, Pipe};

/// Behavior switches for [`FileWriter`].
#[derive(Debug, Clone, Copy, Default)]
pub struct FileWriterOptions {
    /// Create missing parent directories before opening
    pub create_dirs: bool,
    /// Move an existing target aside to `.bak` before committing
    pub create_backup: bool,
    /// Write to a sibling `.part` file, atomically renamed at finalize
    pub store_temporary: bool,
}

/// Terminal pipe that writes every upstream chunk to a file.
///
/// As a pipe it is transparent: chunks pass through to the caller, which
/// lets observers sit downstream of the writer when needed.
pub struct FileWriter {
    input: BoxedPipe,
    path: PathBuf,
    options: FileWriterOptions,
    file: Option<tokio::fs::File>,
    complete: bool,
    failed: bool,
    finalized: bool,
}

impl FileWriter {
    pub fn new(input: BoxedPipe, path: impl Into<PathBuf>, options: FileWriterOptions) -> Self {
        Self {
            input,
            path: path.into(),
            options,
            file: None,
            complete: false,
            failed: false,
            finalized: false,
        }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".part");
        self.path.with_file_name(name)
    }

    fn backup_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".bak");
        self.path.with_file_name(name)
    }

    fn write_path(&self) -> PathBuf {
        if self.options.store_temporary {
            self.temp_path()
        } else {
            self.path.clone()
        }
    }

    async fn open(&mut self) -> Result<(), SyncError> {
        if self.options.create_dirs {
            if let Some(parent) = self.path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| SyncError::io_error(format!("cannot create {}: {}", parent.display(), e)))?;
            }
        }
        let path = self.write_path();
        self.file = Some(
            tokio::fs::File::create(&path)
                .await
                .map_err(|e| SyncError::io_error(format!("cannot create {}: {}", path.display(), e)))?,
        );
        Ok(())
    }

    /// Marks the stream as failed so finalization discards instead of
    /// committing. Used by callers that validate the result (hash checks)
    /// after draining.
    pub fn mark_failed(&mut self) {
        self.failed = true;
    }

    async fn commit(&mut self) -> Result<(), SyncError> {
        if let Some(mut file) = self.file.take() {
            file.flush().await.map_err(SyncError::from)?;
            file.sync_all().await.map_err(SyncError::from)?;
        }
        if !self.options.store_temporary {
            return Ok(());
        }
        if self.options.create_backup && tokio::fs::try_exists(&self.path).await.unwrap_or(false) {
            let backup = self.backup_path();
            let _ = tokio::fs::remove_file(&backup).await;
            tokio::fs::rename(&self.path, &backup)
                .await
                .map_err(|e| SyncError::io_error(format!("cannot back up {}: {}", self.path.display(), e)))?;
        }
        tokio::fs::rename(self.temp_path(), &self.path)
            .await
            .map_err(|e| SyncError::io_error(format!("cannot move into {}: {}", self.path.display(), e)))?;
        Ok(())
    }

    async fn discard(&mut self) {
        self.file = None;
        if self.options.store_temporary {
            let _ = tokio::fs::remove_file(self.temp_path()).await;
        }
    }
}

#[async_trait]
impl Pipe for FileWriter {
    async fn read(&mut self) -> Result<Vec<u8>, SyncError> {
        if self.complete {
            return Ok(Vec::new());
        }
        let chunk = match self.input.read().await {
            Ok(chunk) => chunk,
            Err(e) => {
                self.failed = true;
                return Err(e);
            }
        };
        if chunk.is_empty() {
            self.complete = true;
            return Ok(Vec::new());
        }
        if self.file.is_none() {
            if let Err(e) = self.open().await {
                self.failed = true;
                return Err(e);
            }
        }
        if let Err(e) = self.file.as_mut().unwrap().write_all(&chunk).await {
            self.failed = true;
            return Err(SyncError::io_error(format!(
                "cannot write {}: {}",
                self.write_path().display(),
                e
            )));
        }
        Ok(chunk)
    }

    async fn finalize(&mut self) -> Result<(), SyncError> {
        let upstream = self.input.finalize().await;
        if self.finalized {
            return upstream;
        }
        self.finalized = true;
        // An empty stream still produces (or truncates to) an empty file.
        if self.complete && !self.failed && self.file.is_none() {
            if let Err(e) = self.open().await {
                self.failed = true;
                return upstream.and(Err(e));
            }
        }
        if self.complete && !self.failed {
            upstream.and(self.commit().await)
        } else {
            self.discard().await;
            upstream
        }
    }
}
