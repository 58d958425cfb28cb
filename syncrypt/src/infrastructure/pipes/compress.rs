// /////////////////////////////////////////////////////////////////////////////
// Syncrypt RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Snappy Compression Pipes
//!
//! Length-framed Snappy compression: every upstream chunk becomes one frame
//! of `[u32-le compressed length][raw snappy block]`. Framing makes the
//! stream self-delimiting, so [`SnappyDecompress`] tolerates arbitrary read
//! boundaries: frames split across socket reads or cipher-block chunks
//! reassemble transparently.
//!
//! The format is client-side only: the server stores the result as opaque
//! ciphertext and never parses it.

use async_trait::async_trait;

use syncrypt_domain::SyncError;

use super::{BoxedPipe, Pipe};

/// Upper bound on a single compressed frame.
///
/// Upstream chunks are bounded by the encryption buffer size (64 KiB by
/// default); anything near this limit in a stored object means corruption,
/// not data.
const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Compresses each upstream chunk into one length-framed Snappy block.
pub struct SnappyCompress {
    input: BoxedPipe,
    encoder: snap::raw::Encoder,
    done: bool,
}

impl SnappyCompress {
    pub fn new(input: BoxedPipe) -> Self {
        Self {
            input,
            encoder: snap::raw::Encoder::new(),
            done: false,
        }
    }
}

#[async_trait]
impl Pipe for SnappyCompress {
    async fn read(&mut self) -> Result<Vec<u8>, SyncError> {
        if self.done {
            return Ok(Vec::new());
        }
        let chunk = self.input.read().await?;
        if chunk.is_empty() {
            self.done = true;
            return Ok(Vec::new());
        }
        let compressed = self
            .encoder
            .compress_vec(&chunk)
            .map_err(|e| SyncError::CompressionError(format!("snappy compression failed: {}", e)))?;
        let mut frame = Vec::with_capacity(4 + compressed.len());
        frame.extend_from_slice(&(compressed.len() as u32).to_le_bytes());
        frame.extend_from_slice(&compressed);
        Ok(frame)
    }

    async fn finalize(&mut self) -> Result<(), SyncError> {
        self.input.finalize().await
    }
}

/// Reassembles and decompresses length-framed Snappy blocks.
pub struct SnappyDecompress {
    input: BoxedPipe,
    decoder: snap::raw::Decoder,
    buf: Vec<u8>,
    upstream_done: bool,
    done: bool,
}

impl SnappyDecompress {
    pub fn new(input: BoxedPipe) -> Self {
        Self {
            input,
            decoder: snap::raw::Decoder::new(),
            buf: Vec::new(),
            upstream_done: false,
            done: false,
        }
    }

    /// Extracts one complete frame from the reassembly buffer, if available.
    fn take_frame(&mut self) -> Result<Option<Vec<u8>>, SyncError> {
        if self.buf.len() < 4 {
            return Ok(None);
        }
        let len = u32::from_le_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]) as usize;
        if len == 0 || len > MAX_FRAME_SIZE {
            return Err(SyncError::corrupt(format!("implausible compressed frame length: {}", len)));
        }
        if self.buf.len() < 4 + len {
            return Ok(None);
        }
        let frame: Vec<u8> = self.buf.drain(..4 + len).skip(4).collect();
        Ok(Some(frame))
    }
}

#[async_trait]
impl Pipe for SnappyDecompress {
    async fn read(&mut self) -> Result<Vec<u8>, SyncError> {
        if self.done {
            return Ok(Vec::new());
        }
        loop {
            if let Some(frame) = self.take_frame()? {
                let out = self
                    .decoder
                    .decompress_vec(&frame)
                    .map_err(|e| SyncError::corrupt(format!("snappy decompression failed: {}", e)))?;
                if out.is_empty() {
                    continue;
                }
                return Ok(out);
            }
            if self.upstream_done {
                if self.buf.is_empty() {
                    self.done = true;
                    return Ok(Vec::new());
                }
                return Err(SyncError::corrupt("truncated compressed frame at end of stream"));
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
