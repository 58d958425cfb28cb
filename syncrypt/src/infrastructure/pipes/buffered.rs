// /////////////////////////////////////////////////////////////////////////////
// Syncrypt RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Buffered Pipe
//!
//! Re-chunks an upstream byte stream into fixed-size emissions. Upstream
//! chunk boundaries are arbitrary (compression output, socket reads); the
//! cipher stages downstream want steady, optionally block-aligned chunks.
//! The tail is flushed whole at end-of-stream.

use async_trait::async_trait;

use syncrypt_domain::SyncError;

use super::{BoxedPipe, Pipe};

/// Accumulates upstream bytes and emits them in `size`-byte chunks.
pub struct Buffered {
    input: BoxedPipe,
    size: usize,
    buf: Vec<u8>,
    upstream_done: bool,
    done: bool,
}

impl Buffered {
    pub fn new(input: BoxedPipe, size: usize) -> Self {
        assert!(size > 0, "buffer size must be positive");
        Self {
            input,
            size,
            buf: Vec::with_capacity(size),
            upstream_done: false,
            done: false,
        }
    }

    /// Like [`Buffered::new`], asserting that emissions stay `align`-sized.
    ///
    /// `align` must divide `size`; full emissions are then automatically
    /// align-multiples, and the tail of a block-aligned stream (such as CBC
    /// ciphertext) remains aligned by construction.
    pub fn new_aligned(input: BoxedPipe, size: usize, align: usize) -> Self {
        assert!(align > 0 && size % align == 0, "alignment must divide the buffer size");
        Self::new(input, size)
    }
}

#[async_trait]
impl Pipe for Buffered {
    async fn read(&mut self) -> Result<Vec<u8>, SyncError> {
        if self.done {
            return Ok(Vec::new());
        }
        while !self.upstream_done && self.buf.len() < self.size {
            let chunk = self.input.read().await?;
            if chunk.is_empty() {
                self.upstream_done = true;
            } else {
                self.buf.extend_from_slice(&chunk);
            }
        }
        if self.buf.is_empty() {
            self.done = true;
            return Ok(Vec::new());
        }
        let emit = self.buf.len().min(self.size);
        Ok(self.buf.drain(..emit).collect())
    }

    async fn finalize(&mut self) -> Result<(), SyncError> {
        self.input.finalize().await
    }
}
