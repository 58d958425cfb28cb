// /////////////////////////////////////////////////////////////////////////////
// Syncrypt RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Source Pipes
//!
//! Heads of a pipe chain: [`Once`] yields a single in-memory buffer,
//! [`FileReader`] streams a file in fixed-size chunks. Files open lazily on
//! the first read so that constructing a pipeline never touches the
//! filesystem.

use async_trait::async_trait;
use std::path::PathBuf;
use tokio::io::AsyncReadExt;

use syncrypt_domain::SyncError;

use super::Pipe;

/// Chunk size for streamed file reads.
const FILE_READ_SIZE: usize = 64 * 1024;

/// Yields the given buffer once, then end-of-stream.
pub struct Once {
    data: Option<Vec<u8>>,
}

impl Once {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data: Some(data) }
    }
}

#[async_trait]
impl Pipe for Once {
    async fn read(&mut self) -> Result<Vec<u8>, SyncError> {
        Ok(self.data.take().unwrap_or_default())
    }

    async fn finalize(&mut self) -> Result<(), SyncError> {
        self.data = None;
        Ok(())
    }
}

/// Streams a file from disk in `FILE_READ_SIZE` chunks.
pub struct FileReader {
    path: PathBuf,
    file: Option<tokio::fs::File>,
    done: bool,
}

impl FileReader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: None,
            done: false,
        }
    }
}

#[async_trait]
impl Pipe for FileReader {
    async fn read(&mut self) -> Result<Vec<u8>, SyncError> {
        if self.done {
            return Ok(Vec::new());
        }
        if self.file.is_none() {
            self.file = Some(tokio::fs::File::open(&self.path).await.map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    SyncError::not_found(format!("{}", self.path.display()))
                } else {
                    SyncError::io_error(format!("cannot open {}: {}", self.path.display(), e))
                }
            })?);
        }
        let file = self.file.as_mut().unwrap();
        let mut buf = vec![0u8; FILE_READ_SIZE];
        let n = file
            .read(&mut buf)
            .await
            .map_err(|e| SyncError::io_error(format!("cannot read {}: {}", self.path.display(), e)))?;
        if n == 0 {
            self.done = true;
            self.file = None;
            return Ok(Vec::new());
        }
        buf.truncate(n);
        Ok(buf)
    }

    async fn finalize(&mut self) -> Result<(), SyncError> {
        self.file = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_once_yields_exactly_once() {
        let mut pipe = Once::new(b"abc".to_vec());
        assert_eq!(pipe.read().await.unwrap(), b"abc");
        assert!(pipe.read().await.unwrap().is_empty());
        assert!(pipe.read().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_reader_streams_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        let content: Vec<u8> = (0..200_000).map(|i| (i % 251) as u8).collect();
        tokio::fs::write(&path, &content).await.unwrap();

        let mut pipe = FileReader::new(&path);
        let mut out = Vec::new();
        loop {
            let chunk = pipe.read().await.unwrap();
            if chunk.is_empty() {
                break;
            }
            assert!(chunk.len() <= FILE_READ_SIZE);
            out.extend_from_slice(&chunk);
        }
        assert_eq!(out, content);
    }

    #[tokio::test]
    async fn test_file_reader_missing_file_is_not_found() {
        let mut pipe = FileReader::new("/definitely/not/here.bin");
        assert!(pipe.read().await.unwrap_err().is_not_found());
    }
}
