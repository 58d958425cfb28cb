// /////////////////////////////////////////////////////////////////////////////
// Syncrypt RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Bundle Service
//!
//! A bundle is one file of the vault plus its sync metadata: the symmetric
//! file key, the path-derived store hash, the key-mixed crypt hash, and the
//! precomputed ciphertext size. Bundles move through a small lifecycle:
//!
//! ```text
//! New ──load/generate key──▶ Keyed ──update──▶ Measured ──upload──▶ Uptodate
//!                                     ▲                                │
//!                                     └──────── filesystem change ─────┘
//! ```
//!
//! `update` is the measuring pass: it streams the plaintext through the
//! compression and padding stages into a byte counter while a hash tee
//! digests the plaintext, then mixes the file key into the digest. Because a
//! PKCS#7-padded stream has exactly the length of its CBC ciphertext, the
//! counter plus one IV block predicts the upload size without running the
//! cipher.
//!
//! `schedule_update` debounces filesystem events: each call cancels the
//! pending timer and re-arms it, so a burst of editor writes produces one
//! `update_and_upload` a second after the burst ends.

use std::path::PathBuf;
use std::sync::{Mutex, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use syncrypt_domain::{FileInfo, FileKey, StoreHash, SyncError, SyncEvent};

use crate::application::services::vault::Vault;
use crate::infrastructure::pipes::{
    read_to_end, BoxedPipe, Buffered, CountPipe, DecryptAes, DecryptRsaOaep, EncryptAes,
    EncryptRsaOaep, FileReader, FileWriter, FileWriterOptions, HashPipe, Once, PadAes, Pipe,
    PipeExt, SnappyCompress, SnappyDecompress, UnpadAes,
};
use crate::infrastructure::runtime::RESOURCE_MANAGER;

/// Delay between the last filesystem event and the triggered update.
pub const DEBOUNCE_DELAY: Duration = Duration::from_secs(1);

#[derive(Default)]
struct BundleState {
    key: Option<FileKey>,
    key_size_crypt: Option<u64>,
    file_size: Option<u64>,
    file_size_crypt: Option<u64>,
    crypt_hash: Option<String>,
    remote_crypt_hash: Option<String>,
    uptodate: bool,
    update_handle: Option<JoinHandle<()>>,
}

/// One file of the vault plus its sync metadata.
pub struct Bundle {
    weak_self: Weak<Bundle>,
    vault: Weak<Vault>,
    path: PathBuf,
    relpath: String,
    store_hash: StoreHash,
    state: Mutex<BundleState>,
}

impl Bundle {
    pub(crate) fn new(vault: &std::sync::Arc<Vault>, relpath: &str) -> Result<std::sync::Arc<Self>, SyncError> {
        let config = vault.config();
        let store_hash = StoreHash::derive(relpath, config.hash_algorithm()?);
        let path = vault.folder().join(relpath);
        let vault_weak = std::sync::Arc::downgrade(vault);
        let relpath = relpath.to_string();
        Ok(std::sync::Arc::new_cyclic(|weak| Self {
            weak_self: weak.clone(),
            vault: vault_weak,
            path,
            relpath,
            store_hash,
            state: Mutex::new(BundleState::default()),
        }))
    }

    fn vault(&self) -> Result<std::sync::Arc<Vault>, SyncError> {
        self.vault
            .upgrade()
            .ok_or_else(|| SyncError::cancelled("vault closed"))
    }

    pub fn relpath(&self) -> &str {
        &self.relpath
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    pub fn store_hash(&self) -> &StoreHash {
        &self.store_hash
    }

    /// Wrapped-key record location: `.vault/fileinfo/<hh>/<rest>`
    pub fn path_fileinfo(&self) -> Result<PathBuf, SyncError> {
        let vault = self.vault()?;
        Ok(vault
            .fileinfo_dir()
            .join(self.store_hash.shard_prefix())
            .join(self.store_hash.shard_rest()))
    }

    pub fn crypt_hash(&self) -> Option<String> {
        self.state.lock().expect("bundle state poisoned").crypt_hash.clone()
    }

    pub fn remote_crypt_hash(&self) -> Option<String> {
        self.state
            .lock()
            .expect("bundle state poisoned")
            .remote_crypt_hash
            .clone()
    }

    pub fn set_remote_crypt_hash(&self, hash: Option<String>) {
        self.state.lock().expect("bundle state poisoned").remote_crypt_hash = hash;
    }

    pub fn file_size(&self) -> Option<u64> {
        self.state.lock().expect("bundle state poisoned").file_size
    }

    pub fn file_size_crypt(&self) -> Option<u64> {
        self.state.lock().expect("bundle state poisoned").file_size_crypt
    }

    pub fn key_size_crypt(&self) -> Option<u64> {
        self.state.lock().expect("bundle state poisoned").key_size_crypt
    }

    pub fn uptodate(&self) -> bool {
        self.state.lock().expect("bundle state poisoned").uptodate
    }

    /// Whether the server's copy is absent or differs from the local state
    pub fn remote_hash_differs(&self) -> bool {
        let state = self.state.lock().expect("bundle state poisoned");
        match (&state.remote_crypt_hash, &state.crypt_hash) {
            (None, _) => true,
            (Some(remote), Some(local)) => remote != local,
            (Some(_), None) => true,
        }
    }

    fn key(&self) -> Result<FileKey, SyncError> {
        self.state
            .lock()
            .expect("bundle state poisoned")
            .key
            .clone()
            .ok_or_else(|| SyncError::internal(format!("no key loaded for {}", self.relpath)))
    }

    /// Clone of the loaded file key, for carrying across a rename.
    pub(crate) fn key_clone(&self) -> Result<FileKey, SyncError> {
        self.key()
    }

    /// Header fields of an UPLOAD request; requires a completed `update`.
    pub fn upload_header(&self) -> Result<(u64, u64, String), SyncError> {
        let state = self.state.lock().expect("bundle state poisoned");
        if !state.uptodate {
            return Err(SyncError::internal(format!("{} was not updated before upload", self.relpath)));
        }
        let key_size_crypt = state
            .key_size_crypt
            .ok_or_else(|| SyncError::internal("missing wrapped key size"))?;
        let file_size_crypt = state
            .file_size_crypt
            .ok_or_else(|| SyncError::not_found(format!("{} has no content to upload", self.relpath)))?;
        let crypt_hash = state
            .crypt_hash
            .clone()
            .ok_or_else(|| SyncError::not_found(format!("{} has no content to upload", self.relpath)))?;
        Ok((key_size_crypt, file_size_crypt, crypt_hash))
    }

    /// Loads and unwraps the fileinfo record, installing the file key.
    ///
    /// `NotFound` when no record exists (the caller generates one),
    /// `CorruptData` when the record cannot be unwrapped or names a
    /// different path than this bundle.
    pub async fn load_key(&self) -> Result<(), SyncError> {
        let vault = self.vault()?;
        let path = self.path_fileinfo()?;
        let wrapped_len = match tokio::fs::metadata(&path).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SyncError::not_found(format!("no fileinfo for {}", self.relpath)))
            }
            Err(e) => return Err(SyncError::from(e)),
        };

        let mut pipe = FileReader::new(&path)
            .chain(|src| DecryptRsaOaep::new(src, vault.identity().private_key().clone()))
            .chain(SnappyDecompress::new);
        let plain = read_to_end(&mut pipe).await?;
        let info = FileInfo::from_msgpack(&plain)?;
        if info.filename != self.relpath {
            return Err(SyncError::corrupt(format!(
                "fileinfo names {:?}, expected {:?}",
                info.filename, self.relpath
            )));
        }
        let key = info.file_key(vault.config().key_size())?;

        let mut state = self.state.lock().expect("bundle state poisoned");
        state.key = Some(key);
        state.key_size_crypt = Some(wrapped_len);
        Ok(())
    }

    /// Draws a fresh file key and writes the wrapped fileinfo record.
    pub async fn generate_key(&self) -> Result<(), SyncError> {
        let vault = self.vault()?;
        let key = FileKey::generate(vault.config().key_size());
        self.store_key(key).await?;
        debug!(bundle = %self.relpath, "generated file key");
        Ok(())
    }

    /// Wraps and persists the given key as this bundle's fileinfo record.
    pub(crate) async fn store_key(&self, key: FileKey) -> Result<(), SyncError> {
        let vault = self.vault()?;
        let info = FileInfo::new(&self.relpath, &key);
        let path = self.path_fileinfo()?;

        let options = FileWriterOptions {
            create_dirs: true,
            store_temporary: true,
            ..Default::default()
        };
        let mut sink = Once::new(info.to_msgpack()?)
            .chain(SnappyCompress::new)
            .chain(|src| EncryptRsaOaep::new(src, vault.identity().public_key().clone()))
            .chain(|src| FileWriter::new(src, &path, options));
        sink.consume().await?;

        let wrapped_len = tokio::fs::metadata(&path).await.map_err(SyncError::from)?.len();
        let mut state = self.state.lock().expect("bundle state poisoned");
        state.key = Some(key);
        state.key_size_crypt = Some(wrapped_len);
        Ok(())
    }

    /// Writes an already-wrapped fileinfo record fetched from the server.
    pub async fn install_fileinfo(&self, wrapped: &[u8]) -> Result<(), SyncError> {
        let path = self.path_fileinfo()?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(SyncError::from)?;
        }
        tokio::fs::write(&path, wrapped).await.map_err(SyncError::from)?;
        self.state.lock().expect("bundle state poisoned").key_size_crypt = Some(wrapped.len() as u64);
        Ok(())
    }

    /// Removes the fileinfo record; equivalent to deleting the bundle.
    pub async fn remove_fileinfo(&self) -> Result<(), SyncError> {
        let path = self.path_fileinfo()?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SyncError::from(e)),
        }
    }

    /// Recomputes sizes and the crypt hash from the plaintext on disk.
    ///
    /// Holds the vault's `update` bucket entry for this bundle and a global
    /// cipher token. An absent plaintext clears the content state, making
    /// the bundle a tombstone candidate.
    pub async fn update(&self) -> Result<(), SyncError> {
        let vault = self.vault()?;
        let _op = vault.semaphores().update.acquire(self.store_hash.as_str()).await?;
        let _cipher = RESOURCE_MANAGER.acquire_cipher().await?;
        debug!(bundle = %self.relpath, "updating");

        match self.load_key().await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => self.generate_key().await?,
            Err(e) => return Err(e),
        }

        let config = vault.config();
        match tokio::fs::metadata(&self.path).await {
            Ok(meta) => {
                let key = self.key()?;
                let (hash_pipe, hasher) =
                    HashPipe::new(Box::new(FileReader::new(&self.path)), config.hash_algorithm()?);
                let compressed = SnappyCompress::new(Box::new(hash_pipe));
                let buffered = Buffered::new(Box::new(compressed), config.enc_buf_size());
                let padded = PadAes::new(Box::new(buffered), config.block_size());
                let (mut counter, count) = CountPipe::new(Box::new(padded));
                counter.consume().await?;

                let crypt_hash = hasher.finalize_with_key(&key)?;
                let mut state = self.state.lock().expect("bundle state poisoned");
                state.file_size = Some(meta.len());
                // Padded length equals CBC ciphertext length; add the IV.
                state.file_size_crypt = Some(count.get() + config.block_size() as u64);
                state.crypt_hash = Some(crypt_hash);
                state.uptodate = true;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let mut state = self.state.lock().expect("bundle state poisoned");
                state.file_size = None;
                state.file_size_crypt = None;
                state.crypt_hash = None;
                state.uptodate = true;
            }
            Err(e) => return Err(SyncError::from(e)),
        }

        vault.emit(SyncEvent::BundleUpdated {
            relpath: self.relpath.clone(),
        });
        Ok(())
    }

    /// Fresh encrypted body pipeline for streaming to the server.
    pub fn read_encrypted_stream(&self) -> Result<BoxedPipe, SyncError> {
        let vault = self.vault()?;
        let config = vault.config();
        let key = self.key()?;
        Ok(Box::new(
            FileReader::new(&self.path)
                .chain(SnappyCompress::new)
                .chain(|src| Buffered::new(src, config.enc_buf_size()))
                .chain(|src| PadAes::new(src, config.block_size()))
                .chain(|src| EncryptAes::new(src, key, config.block_size())),
        ))
    }

    /// Consumes an encrypted body stream, decrypting into the plaintext path.
    ///
    /// Returns whether the decrypted content matched `assert_hash`. The
    /// temporary file is only promoted on a clean, matching stream; any
    /// failure or mismatch leaves the previous plaintext untouched.
    pub async fn write_encrypted_stream(
        &self,
        source: BoxedPipe,
        assert_hash: Option<String>,
    ) -> Result<bool, SyncError> {
        let vault = self.vault()?;
        let config = vault.config();
        let key = self.key()?;
        let _cipher = RESOURCE_MANAGER.acquire_cipher().await?;

        let buffered = Buffered::new_aligned(source, config.enc_buf_size(), config.block_size());
        let decrypted = DecryptAes::new(Box::new(buffered), key.clone(), config.block_size());
        let unpadded = UnpadAes::new(Box::new(decrypted), config.block_size());
        let decompressed = SnappyDecompress::new(Box::new(unpadded));
        let (hash_pipe, hasher) = HashPipe::new(Box::new(decompressed), config.hash_algorithm()?);
        let options = FileWriterOptions {
            create_dirs: true,
            create_backup: true,
            store_temporary: true,
        };
        let mut sink = FileWriter::new(Box::new(hash_pipe), &self.path, options);

        let mut drained = Ok(());
        loop {
            match sink.read().await {
                Ok(chunk) if chunk.is_empty() => break,
                Ok(_) => {}
                Err(e) => {
                    drained = Err(e);
                    break;
                }
            }
        }

        let mut matched = false;
        let mut computed = None;
        if drained.is_ok() {
            let hash = hasher.finalize_with_key(&key)?;
            matched = assert_hash.as_deref().map_or(true, |expected| expected == hash);
            computed = Some(hash);
        }
        if !matched {
            sink.mark_failed();
        }
        let finalized = sink.finalize().await;
        drained?;
        finalized?;

        if matched {
            if let Ok(meta) = tokio::fs::metadata(&self.path).await {
                let mut state = self.state.lock().expect("bundle state poisoned");
                state.file_size = Some(meta.len());
                state.crypt_hash = computed;
                state.uptodate = true;
            }
            vault.emit(SyncEvent::DownloadCompleted {
                relpath: self.relpath.clone(),
            });
        }
        Ok(matched)
    }

    /// Runs `update`, stats the server, and uploads when the hashes differ.
    pub async fn update_and_upload(&self) -> Result<(), SyncError> {
        let vault = self.vault()?;
        self.update().await?;
        let backend = vault.backend();
        backend.stat(self).await?;
        if self.crypt_hash().is_some() && self.remote_hash_differs() {
            backend.upload(self).await?;
            vault.emit(SyncEvent::UploadCompleted {
                relpath: self.relpath.clone(),
            });
        }
        Ok(())
    }

    /// Debounced trigger: cancels any pending timer and re-arms it.
    pub fn schedule_update(&self) {
        let Some(bundle) = self.weak_self.upgrade() else {
            return;
        };
        let mut state = self.state.lock().expect("bundle state poisoned");
        if let Some(handle) = state.update_handle.take() {
            handle.abort();
        }
        state.update_handle = Some(tokio::spawn(async move {
            tokio::time::sleep(DEBOUNCE_DELAY).await;
            if let Err(e) = bundle.update_and_upload().await {
                warn!(bundle = %bundle.relpath, error = %e, "scheduled update failed");
            } else {
                info!(bundle = %bundle.relpath, "synchronized after change");
            }
        }));
    }
}

impl Drop for Bundle {
    fn drop(&mut self) {
        if let Some(handle) = self
            .state
            .lock()
            .ok()
            .and_then(|mut state| state.update_handle.take())
        {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for Bundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bundle")
            .field("relpath", &self.relpath)
            .field("store_hash", &self.store_hash.as_str())
            .finish()
    }
}
