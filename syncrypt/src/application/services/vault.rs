// /////////////////////////////////////////////////////////////////////////////
// Syncrypt RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Vault Service
//!
//! A vault is a synchronized directory plus everything that makes it one:
//! the validated configuration, the RSA identity, the bundle cache, the
//! backend, the local revision log, and the per-operation semaphores.
//!
//! [`open_vault`] is the single construction path. After it returns, the
//! `.vault/` directory holds a config file and a PEM keypair, freshly
//! generated on first open, loaded on every later one. Vaults are shared as
//! `Arc<Vault>`; bundles hold a `Weak` back-reference, so dropping the last
//! vault handle cancels every in-flight bundle task instead of leaking a
//! reference cycle.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, info};

use syncrypt_domain::{Identity, SyncError, SyncEvent, VaultConfig};

use crate::application::services::bundle::Bundle;
use crate::infrastructure::backend::{backend_for, StorageBackend};
use crate::infrastructure::config::{load_config, save_config};
use crate::infrastructure::pipes::{read_to_end, DecryptRsaOaep, EncryptRsaOaep, Once, PipeExt, SnappyCompress, SnappyDecompress};
use crate::infrastructure::revision_store::RevisionStore;
use crate::infrastructure::runtime::OpSemaphores;

/// Capacity of the event broadcast channel; stat observers that fall this
/// far behind start losing events rather than backpressuring the engine.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// A synchronized directory with its keys, config, cache, and backend.
pub struct Vault {
    weak_self: std::sync::Weak<Vault>,
    folder: PathBuf,
    config: RwLock<VaultConfig>,
    identity: Identity,
    bundles: Mutex<HashMap<String, Arc<Bundle>>>,
    semaphores: Arc<OpSemaphores>,
    backend: Arc<dyn StorageBackend>,
    revisions: RevisionStore,
    events: broadcast::Sender<SyncEvent>,
}

/// Opens (or initializes) the vault at `folder`.
pub async fn open_vault(folder: impl Into<PathBuf>) -> Result<Arc<Vault>, SyncError> {
    let folder = folder.into();
    if !tokio::fs::try_exists(&folder).await.unwrap_or(false) {
        return Err(SyncError::config(format!(
            "vault folder does not exist: {}",
            folder.display()
        )));
    }
    let vault_dir = folder.join(".vault");
    let config_path = vault_dir.join("config");

    let config = if tokio::fs::try_exists(&config_path).await.unwrap_or(false) {
        info!(path = %config_path.display(), "using config file");
        load_config(&config_path)?
    } else {
        let config = VaultConfig::default();
        info!(path = %config_path.display(), "writing default config");
        save_config(&config, &config_path).await?;
        config
    };

    let identity = load_or_generate_identity(&vault_dir, config.vault.rsa_key_len as usize).await?;
    let semaphores = Arc::new(OpSemaphores::new(config.remote.concurrency as usize));
    let backend = backend_for(&config, &vault_dir, semaphores.clone())?;
    let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

    Ok(Arc::new_cyclic(|weak| Vault {
        weak_self: weak.clone(),
        revisions: RevisionStore::new(vault_dir.join("revisions")),
        folder,
        config: RwLock::new(config),
        identity,
        bundles: Mutex::new(HashMap::new()),
        semaphores,
        backend,
        events,
    }))
}

async fn load_or_generate_identity(vault_dir: &Path, bits: usize) -> Result<Identity, SyncError> {
    let private_path = vault_dir.join("id_rsa");
    let public_path = vault_dir.join("id_rsa.pub");
    let have_private = tokio::fs::try_exists(&private_path).await.unwrap_or(false);
    let have_public = tokio::fs::try_exists(&public_path).await.unwrap_or(false);

    if have_private && have_public {
        let private_pem = tokio::fs::read_to_string(&private_path).await.map_err(SyncError::from)?;
        let public_pem = tokio::fs::read_to_string(&public_path).await.map_err(SyncError::from)?;
        return Identity::from_pem(&private_pem, &public_pem);
    }

    info!(bits, "generating RSA key pair");
    // Key generation takes seconds; keep it off the async runtime.
    let identity = tokio::task::spawn_blocking(move || Identity::generate(bits))
        .await
        .map_err(|e| SyncError::internal(format!("key generation task failed: {}", e)))??;

    tokio::fs::create_dir_all(vault_dir).await.map_err(SyncError::from)?;
    tokio::fs::write(&private_path, identity.private_key_pem()?)
        .await
        .map_err(SyncError::from)?;
    tokio::fs::write(&public_path, identity.public_key_pem()?)
        .await
        .map_err(SyncError::from)?;
    Ok(identity)
}

impl Vault {
    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn vault_dir(&self) -> PathBuf {
        self.folder.join(".vault")
    }

    pub fn fileinfo_dir(&self) -> PathBuf {
        self.vault_dir().join("fileinfo")
    }

    /// Snapshot of the current configuration
    pub fn config(&self) -> VaultConfig {
        self.config.read().expect("config lock poisoned").clone()
    }

    /// Applies an in-memory config change; call [`Vault::write_config`] to
    /// persist it.
    pub fn update_config(&self, mutate: impl FnOnce(&mut VaultConfig)) {
        mutate(&mut self.config.write().expect("config lock poisoned"));
    }

    pub async fn write_config(&self) -> Result<(), SyncError> {
        let config = self.config();
        save_config(&config, &self.vault_dir().join("config")).await
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn backend(&self) -> Arc<dyn StorageBackend> {
        self.backend.clone()
    }

    pub fn semaphores(&self) -> &OpSemaphores {
        &self.semaphores
    }

    pub fn revisions(&self) -> &RevisionStore {
        &self.revisions
    }

    pub fn emit(&self, event: SyncEvent) {
        let _ = self.events.send(event);
    }

    /// Subscribes to engine progress events.
    pub fn events(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    fn is_ignored(&self, relpath: &str) -> bool {
        let config = self.config();
        let patterns: Vec<regex::Regex> = config
            .ignore_patterns()
            .iter()
            .filter_map(|p| glob_to_regex(p).ok())
            .collect();
        relpath
            .split('/')
            .any(|component| patterns.iter().any(|re| re.is_match(component)))
    }

    /// Returns the cached bundle for a relative path, creating it on first
    /// sight. `None` for ignored paths and directories.
    pub async fn bundle_for(&self, relpath: &str) -> Result<Option<Arc<Bundle>>, SyncError> {
        let relpath = relpath.trim_start_matches('/');
        if relpath.is_empty() || self.is_ignored(relpath) {
            return Ok(None);
        }
        if let Ok(meta) = tokio::fs::metadata(self.folder.join(relpath)).await {
            if meta.is_dir() {
                return Ok(None);
            }
        }
        let vault = self
            .weak_self
            .upgrade()
            .ok_or_else(|| SyncError::cancelled("vault closed"))?;
        let mut bundles = self.bundles.lock().expect("bundle cache poisoned");
        if let Some(bundle) = bundles.get(relpath) {
            return Ok(Some(bundle.clone()));
        }
        let bundle = Bundle::new(&vault, relpath)?;
        bundles.insert(relpath.to_string(), bundle.clone());
        Ok(Some(bundle))
    }

    /// All bundles in the vault, walking the folder tree and skipping
    /// ignored components.
    pub async fn walk(&self) -> Result<Vec<Arc<Bundle>>, SyncError> {
        let mut bundles = Vec::new();
        let mut stack = vec![self.folder.clone()];
        while let Some(dir) = stack.pop() {
            let mut entries = tokio::fs::read_dir(&dir)
                .await
                .map_err(|e| SyncError::io_error(format!("cannot list {}: {}", dir.display(), e)))?;
            while let Some(entry) = entries.next_entry().await.map_err(SyncError::from)? {
                let path = entry.path();
                let relpath = match path.strip_prefix(&self.folder) {
                    Ok(rel) => rel.to_string_lossy().replace('\\', "/"),
                    Err(_) => continue,
                };
                if self.is_ignored(&relpath) {
                    continue;
                }
                let file_type = entry.file_type().await.map_err(SyncError::from)?;
                if file_type.is_dir() {
                    stack.push(path);
                } else if file_type.is_file() {
                    if let Some(bundle) = self.bundle_for(&relpath).await? {
                        bundles.push(bundle);
                    }
                }
            }
        }
        bundles.sort_by(|a, b| a.relpath().cmp(b.relpath()));
        debug!(count = bundles.len(), "walked vault");
        Ok(bundles)
    }

    /// Entry point for the filesystem watcher: debounce an update for the
    /// changed path.
    pub async fn schedule_update(&self, relpath: &str) -> Result<(), SyncError> {
        if let Some(bundle) = self.bundle_for(relpath).await? {
            bundle.schedule_update();
        }
        Ok(())
    }

    /// Drops a bundle from the cache (after deletion or rename).
    pub fn evict_bundle(&self, relpath: &str) {
        self.bundles.lock().expect("bundle cache poisoned").remove(relpath);
    }

    /// Vault metadata (currently the display name), wrapped like a fileinfo
    /// record for carrying in `SetMetadata` revisions.
    pub async fn encrypted_metadata(&self) -> Result<Vec<u8>, SyncError> {
        let name = self
            .folder
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let metadata = VaultMetadata { name };
        let serialized = rmp_serde::to_vec_named(&metadata)
            .map_err(|e| SyncError::serialization(format!("cannot encode vault metadata: {}", e)))?;
        let mut pipe = Once::new(serialized)
            .chain(SnappyCompress::new)
            .chain(|src| EncryptRsaOaep::new(src, self.identity.public_key().clone()));
        read_to_end(&mut pipe).await
    }

    /// Unwraps a `SetMetadata` payload and stores it under `.vault/metadata`.
    pub async fn write_encrypted_metadata(&self, wrapped: &[u8]) -> Result<VaultMetadata, SyncError> {
        let mut pipe = Once::new(wrapped.to_vec())
            .chain(|src| DecryptRsaOaep::new(src, self.identity.private_key().clone()))
            .chain(SnappyDecompress::new);
        let plain = read_to_end(&mut pipe).await?;
        let metadata: VaultMetadata = rmp_serde::from_slice(&plain)
            .map_err(|e| SyncError::corrupt(format!("cannot decode vault metadata: {}", e)))?;
        tokio::fs::write(self.vault_dir().join("metadata"), wrapped)
            .await
            .map_err(SyncError::from)?;
        Ok(metadata)
    }
}

/// Decrypted vault metadata.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct VaultMetadata {
    pub name: String,
}

/// Compiles one shell-style ignore pattern (`*`, `?`) into a regex anchored
/// over a whole path component.
fn glob_to_regex(pattern: &str) -> Result<regex::Regex, SyncError> {
    let mut expr = String::from("^");
    for c in pattern.chars() {
        match c {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            other => expr.push_str(&regex::escape(&other.to_string())),
        }
    }
    expr.push('$');
    regex::Regex::new(&expr).map_err(|e| SyncError::config(format!("bad ignore pattern {:?}: {}", pattern, e)))
}
