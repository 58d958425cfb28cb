// /////////////////////////////////////////////////////////////////////////////
// Syncrypt RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Pipe Framework
//!
//! Composable, pull-driven byte-stream transformers. A pipe lazily produces
//! chunks on demand; chaining pipes builds the streamed transformations the
//! sync engine runs files through:
//!
//! ```text
//! upload:    FileReader → SnappyCompress → Buffered → PadAes → EncryptAes
//! download:  source → Buffered → DecryptAes → UnpadAes → SnappyDecompress
//!                   → HashPipe → FileWriter
//! key wrap:  Once → SnappyCompress → EncryptRsaOaep → FileWriter
//! ```
//!
//! ## Contracts
//!
//! Every pipe upholds three rules:
//!
//! 1. **Pull-driven**: nothing is produced until downstream asks, so memory
//!    stays bounded by the configured encryption buffer size regardless of
//!    file size
//! 2. **Single EOF**: an empty chunk signals end-of-stream; after that, every
//!    further `read` returns an empty chunk and never touches the source
//! 3. **Finalize walks the chain**: `finalize` is forwarded to the source
//!    before a pipe releases its own resources; sinks commit or discard
//!    their output there
//!
//! Errors surface on the next `read`. Sinks must still be finalized on the
//! failure path; [`FileWriter`](sink::FileWriter) discards its temporary file
//! when the stream did not complete cleanly.
//!
//! ## Composition
//!
//! Transformers take their source as a `BoxedPipe` constructor argument. The
//! [`PipeExt::chain`] combinator is sugar over that, reading top-down:
//!
//! ```rust,ignore
//! let pipe = FileReader::new(path)
//!     .chain(SnappyCompress::new)
//!     .chain(|src| Buffered::new(src, enc_buf_size))
//!     .chain(|src| PadAes::new(src, block_size))
//!     .chain(|src| EncryptAes::new(src, key, block_size));
//! ```

use async_trait::async_trait;

use syncrypt_domain::SyncError;

pub mod asymmetric;
pub mod buffered;
pub mod cipher;
pub mod compress;
pub mod observe;
pub mod sink;
pub mod source;

pub use asymmetric::{DecryptRsaOaep, EncryptRsaOaep};
pub use buffered::Buffered;
pub use cipher::{DecryptAes, EncryptAes, PadAes, UnpadAes};
pub use compress::{SnappyCompress, SnappyDecompress};
pub use observe::{ByteCount, CountPipe, HashPipe, SharedHasher};
pub use sink::{FileWriter, FileWriterOptions};
pub use source::{FileReader, Once};

/// A boxed pipe, the form transformers take their source in.
pub type BoxedPipe = Box<dyn Pipe>;

/// Lazy, asynchronous producer of byte chunks.
#[async_trait]
pub trait Pipe: Send {
    /// Produces the next chunk. An empty chunk signals end-of-stream.
    async fn read(&mut self) -> Result<Vec<u8>, SyncError>;

    /// Releases resources, source-first. Sinks commit or discard here.
    async fn finalize(&mut self) -> Result<(), SyncError>;

    /// Drains the pipe to end-of-stream, then finalizes.
    ///
    /// Finalization runs on the failure path too; a read error takes
    /// precedence over a finalization error in the result.
    async fn consume(&mut self) -> Result<(), SyncError> {
        let mut drained = Ok(());
        loop {
            match self.read().await {
                Ok(chunk) if chunk.is_empty() => break,
                Ok(_) => {}
                Err(e) => {
                    drained = Err(e);
                    break;
                }
            }
        }
        let finalized = self.finalize().await;
        drained.and(finalized)
    }
}

/// Drains a pipe into memory, finalizing on both paths.
///
/// For small streams only (wrapped keys, metadata records); file bodies go
/// through sinks instead.
pub async fn read_to_end(pipe: &mut dyn Pipe) -> Result<Vec<u8>, SyncError> {
    let mut out = Vec::new();
    let mut drained = Ok(());
    loop {
        match pipe.read().await {
            Ok(chunk) if chunk.is_empty() => break,
            Ok(chunk) => out.extend_from_slice(&chunk),
            Err(e) => {
                drained = Err(e);
                break;
            }
        }
    }
    let finalized = pipe.finalize().await;
    drained.and(finalized)?;
    Ok(out)
}

/// Chaining sugar: feed `self` into a transformer constructor.
pub trait PipeExt: Pipe + Sized + 'static {
    fn chain<P, F>(self, stage: F) -> P
    where
        F: FnOnce(BoxedPipe) -> P,
        P: Pipe,
    {
        stage(Box::new(self))
    }
}

impl<T: Pipe + Sized + 'static> PipeExt for T {}
