// /////////////////////////////////////////////////////////////////////////////
// Syncrypt RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Sync Engine
//!
//! Push/pull/clone orchestration over a vault and its backend.
//!
//! ## Push
//!
//! Replays the local log, appends a genesis `CreateVault` record when the
//! log is empty, then fans bundles out through update → stat → upload under
//! the vault's operation semaphores. Per-bundle failures are logged and
//! skipped; one bad file does not stop a push. Afterwards the accumulated
//! changes become signed `Upload`/`DeleteFile` revisions, appended to the
//! server log and mirrored locally in parent-chain order.
//!
//! ## Pull
//!
//! Fetches revisions after the latest known local id and validates each one
//! against the running chain state before applying it. Any `InvalidRevision`
//! aborts the pull: the local log must never diverge from a verified
//! prefix. File payloads referenced by applied revisions download in
//! parallel afterwards; a `CorruptData` download is retried once before it
//! surfaces.
//!
//! ## Clone
//!
//! Clone is pull from the beginning into a freshly initialized folder: the
//! caller provides the remote configuration and the vault identity (key
//! distribution is outside the core), everything else is replayed from the
//! log.

use futures::StreamExt;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

use syncrypt_domain::{
    ChainVerifier, FileInfo, HashAlgorithm, Identity, Revision, RevisionBody, StoreHash, SyncError,
    SyncEvent, VaultConfig,
};

use crate::application::services::bundle::Bundle;
use crate::application::services::vault::{open_vault, Vault};
use crate::infrastructure::pipes::{read_to_end, DecryptRsaOaep, Once, PipeExt, SnappyDecompress};

/// Outcome of a [`push`].
#[derive(Debug, Clone, Copy, Default)]
pub struct PushReport {
    pub uploaded: usize,
    pub revisions: usize,
}

/// Outcome of a [`pull`].
#[derive(Debug, Clone, Copy, Default)]
pub struct PullReport {
    pub applied: usize,
    pub downloaded: usize,
}

/// File set as described by a replayed revision log.
#[derive(Debug, Default)]
struct LogState {
    /// store hash (hex) → record
    files: HashMap<String, LogFile>,
}

#[derive(Debug, Clone)]
struct LogFile {
    crypt_hash: String,
    metadata: Vec<u8>,
}

impl LogState {
    fn apply(&mut self, revision: &Revision, algorithm: HashAlgorithm) {
        match &revision.body {
            RevisionBody::Upload {
                file_hash,
                crypt_hash,
                metadata,
                ..
            } => {
                self.files.insert(
                    file_hash.clone(),
                    LogFile {
                        crypt_hash: crypt_hash.clone(),
                        metadata: metadata.clone(),
                    },
                );
            }
            RevisionBody::DeleteFile { file_hash } => {
                self.files.remove(file_hash);
            }
            RevisionBody::RenameFile { old_path, new_path } => {
                let old_hash = StoreHash::derive(old_path, algorithm);
                if let Some(record) = self.files.remove(old_hash.as_str()) {
                    let new_hash = StoreHash::derive(new_path, algorithm);
                    self.files.insert(new_hash.as_str().to_string(), record);
                }
            }
            RevisionBody::CreateVault { .. }
            | RevisionBody::SetMetadata { .. }
            | RevisionBody::AddUser { .. }
            | RevisionBody::AddUserKey { .. } => {}
        }
    }
}

/// Replays the local log, returning the verifier state and file projection.
async fn replay_local(vault: &Vault) -> Result<(ChainVerifier, LogState), SyncError> {
    let algorithm = vault.config().hash_algorithm()?;
    let mut verifier = ChainVerifier::new();
    let mut state = LogState::default();
    for revision in vault.revisions().load().await? {
        verifier.verify_and_advance(&revision)?;
        state.apply(&revision, algorithm);
    }
    Ok((verifier, state))
}

/// Persists a freshly issued auth token back into the config file.
async fn persist_auth_token(vault: &Vault) -> Result<(), SyncError> {
    if let Some(token) = vault.backend().auth_token() {
        if vault.config().remote.auth.as_deref() != Some(token.as_str()) {
            vault.update_config(|config| config.remote.auth = Some(token));
            vault.write_config().await?;
        }
    }
    Ok(())
}

/// Ensures the vault has an id, assigning and persisting one if needed.
async fn ensure_vault_id(vault: &Vault) -> Result<String, SyncError> {
    if let Some(id) = vault.config().vault.id {
        return Ok(id);
    }
    let id = uuid::Uuid::new_v4().to_string();
    vault.update_config(|config| config.vault.id = Some(id.clone()));
    vault.write_config().await?;
    Ok(id)
}

/// Signs a revision, submits it, and mirrors it into the local log.
async fn commit_revision(vault: &Vault, mut revision: Revision) -> Result<Revision, SyncError> {
    revision.sign(vault.identity())?;
    vault.backend().push_revision(&revision).await?;
    vault.revisions().append(&revision).await?;
    vault.emit(SyncEvent::RevisionApplied {
        revision_id: revision.revision_id.clone(),
    });
    Ok(revision)
}

/// Pushes local changes: uploads changed bundles and appends the matching
/// signed revisions.
pub async fn push(vault: &Arc<Vault>) -> Result<PushReport, SyncError> {
    let backend = vault.backend();
    backend.open().await?;
    persist_auth_token(vault).await?;

    let (verifier, log_state) = replay_local(vault).await?;
    let vault_id = ensure_vault_id(vault).await?;
    let mut parent = verifier.last_id().map(str::to_string);

    let mut report = PushReport::default();

    // Genesis record for a brand-new vault.
    if parent.is_none() {
        let genesis = Revision::new(
            vault_id.clone(),
            None,
            RevisionBody::CreateVault {
                vault_public_key: vault.identity().public_key_der()?,
                user_public_key: vault.identity().public_key_der()?,
            },
        );
        let genesis = commit_revision(vault, genesis).await?;
        parent = Some(genesis.revision_id.clone());
        report.revisions += 1;
        info!(vault = %vault_id, "created vault");
    }

    // Fan out: update, stat, upload. Failures skip the bundle.
    let bundles = vault.walk().await?;
    let concurrency = vault.config().remote.concurrency as usize;
    let uploaded: Mutex<usize> = Mutex::new(0);
    let changed: Mutex<Vec<Arc<Bundle>>> = Mutex::new(Vec::new());

    futures::stream::iter(bundles.iter().cloned())
        .for_each_concurrent(concurrency, |bundle| {
            let backend = backend.clone();
            let log_state = &log_state;
            let uploaded = &uploaded;
            let changed = &changed;
            async move {
                let result: Result<(), SyncError> = async {
                    bundle.update().await?;
                    backend.stat(&bundle).await?;
                    let Some(crypt_hash) = bundle.crypt_hash() else {
                        return Ok(());
                    };
                    if bundle.remote_hash_differs() {
                        backend.upload(&bundle).await?;
                        *uploaded.lock().expect("push counter poisoned") += 1;
                    }
                    let logged = log_state.files.get(bundle.store_hash().as_str());
                    if logged.map(|f| f.crypt_hash.as_str()) != Some(crypt_hash.as_str()) {
                        changed.lock().expect("push list poisoned").push(bundle.clone());
                    }
                    Ok(())
                }
                .await;
                if let Err(e) = result {
                    warn!(bundle = %bundle.relpath(), error = %e, "skipping bundle");
                }
            }
        })
        .await;
    // Settle anything the watcher scheduled concurrently before reading the
    // final state.
    vault.semaphores().join_all().await;
    report.uploaded = *uploaded.lock().expect("push counter poisoned");

    // Revisions must chain, so they are committed sequentially in walk
    // order (the fan-out above already finished the slow work).
    let mut changed = changed.into_inner().expect("push list poisoned");
    changed.sort_by(|a, b| a.relpath().cmp(b.relpath()));
    for bundle in changed {
        let (_, file_size_crypt, crypt_hash) = bundle.upload_header()?;
        let metadata = tokio::fs::read(bundle.path_fileinfo()?).await.map_err(SyncError::from)?;
        let revision = Revision::new(
            vault_id.clone(),
            parent.clone(),
            RevisionBody::Upload {
                file_hash: bundle.store_hash().as_str().to_string(),
                crypt_hash,
                file_size_crypt,
                metadata,
            },
        );
        let revision = commit_revision(vault, revision).await?;
        parent = Some(revision.revision_id.clone());
        report.revisions += 1;
    }

    // Tombstones: files in the log whose plaintext is gone.
    let walked: std::collections::HashSet<String> = vault
        .walk()
        .await?
        .iter()
        .map(|b| b.store_hash().as_str().to_string())
        .collect();
    let mut deleted: Vec<&String> = log_state
        .files
        .keys()
        .filter(|hash| !walked.contains(*hash))
        .collect();
    deleted.sort();
    for file_hash in deleted {
        let revision = Revision::new(
            vault_id.clone(),
            parent.clone(),
            RevisionBody::DeleteFile {
                file_hash: file_hash.clone(),
            },
        );
        let revision = commit_revision(vault, revision).await?;
        parent = Some(revision.revision_id.clone());
        report.revisions += 1;
    }

    vault.emit(SyncEvent::PushCompleted {
        uploaded: report.uploaded,
        revisions: report.revisions,
    });
    info!(uploaded = report.uploaded, revisions = report.revisions, "push finished");
    Ok(report)
}

/// Unwraps an `Upload` revision's metadata blob into the fileinfo record.
async fn unwrap_fileinfo(vault: &Vault, wrapped: &[u8]) -> Result<FileInfo, SyncError> {
    let mut pipe = Once::new(wrapped.to_vec())
        .chain(|src| DecryptRsaOaep::new(src, vault.identity().private_key().clone()))
        .chain(SnappyDecompress::new);
    let plain = read_to_end(&mut pipe).await?;
    FileInfo::from_msgpack(&plain)
}

/// Applies a validated revision's filesystem effect. Payload downloads are
/// decided later by the reconciliation pass, not here.
async fn apply_revision(vault: &Arc<Vault>, revision: &Revision) -> Result<(), SyncError> {
    match &revision.body {
        RevisionBody::Upload {
            crypt_hash, metadata, ..
        } => {
            let info = unwrap_fileinfo(vault, metadata).await?;
            let Some(bundle) = vault.bundle_for(&info.filename).await? else {
                return Ok(());
            };
            bundle.install_fileinfo(metadata).await?;
            bundle.load_key().await?;
            bundle.set_remote_crypt_hash(Some(crypt_hash.clone()));
            Ok(())
        }
        // Deletes need the pre-revision log state to resolve the path, so
        // `pull` routes them through `apply_delete` instead.
        RevisionBody::DeleteFile { .. } => Ok(()),
        RevisionBody::RenameFile { old_path, new_path } => {
            // Carry the key across the rename; the store hash changes with
            // the path, so the record is rewrapped under the new location.
            let mut key = None;
            if let Some(old_bundle) = vault.bundle_for(old_path).await? {
                if old_bundle.load_key().await.is_ok() {
                    key = old_bundle.key_clone().ok();
                }
                old_bundle.remove_fileinfo().await?;
                vault.evict_bundle(old_path);
            }
            let old_plain = vault.folder().join(old_path);
            let new_plain = vault.folder().join(new_path);
            if tokio::fs::try_exists(&old_plain).await.unwrap_or(false) {
                if let Some(parent) = new_plain.parent() {
                    tokio::fs::create_dir_all(parent).await.map_err(SyncError::from)?;
                }
                tokio::fs::rename(&old_plain, &new_plain).await.map_err(SyncError::from)?;
            }
            if let Some(new_bundle) = vault.bundle_for(new_path).await? {
                if let Some(key) = key {
                    new_bundle.store_key(key).await?;
                }
                new_bundle.update().await?;
            }
            info!(from = %old_path, to = %new_path, "renamed by revision");
            Ok(())
        }
        RevisionBody::SetMetadata { metadata } => {
            let decoded = vault.write_encrypted_metadata(metadata).await?;
            info!(name = %decoded.name, "vault metadata updated");
            Ok(())
        }
        RevisionBody::CreateVault { .. } | RevisionBody::AddUser { .. } | RevisionBody::AddUserKey { .. } => {
            Ok(())
        }
    }
}

/// Deletes the plaintext and fileinfo of a tombstoned file.
async fn apply_delete(vault: &Arc<Vault>, state: &LogState, file_hash: &str) -> Result<(), SyncError> {
    let Some(record) = state.files.get(file_hash) else {
        return Ok(());
    };
    let info = unwrap_fileinfo(vault, &record.metadata).await?;
    if let Some(bundle) = vault.bundle_for(&info.filename).await? {
        bundle.remove_fileinfo().await?;
        match tokio::fs::remove_file(bundle.path()).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(SyncError::from(e)),
        }
        vault.evict_bundle(&info.filename);
        info!(bundle = %info.filename, "deleted by revision");
    }
    Ok(())
}

/// Pulls and applies remote revisions, downloading referenced payloads.
pub async fn pull(vault: &Arc<Vault>) -> Result<PullReport, SyncError> {
    let backend = vault.backend();
    backend.open().await?;
    persist_auth_token(vault).await?;

    let (mut verifier, mut log_state) = replay_local(vault).await?;
    let algorithm = vault.config().hash_algorithm()?;
    let since = verifier.last_id().map(str::to_string);
    let fetched = backend.fetch_revisions(since.as_deref()).await?;

    let mut report = PullReport::default();

    for revision in fetched {
        if vault.revisions().contains(&revision.revision_id).await? {
            continue;
        }
        // Chain validation aborts the whole pull on the first bad record.
        verifier.verify_and_advance(&revision)?;

        if let RevisionBody::DeleteFile { file_hash } = &revision.body {
            apply_delete(vault, &log_state, file_hash).await?;
        } else {
            apply_revision(vault, &revision).await?;
        }
        log_state.apply(&revision, algorithm);
        vault.revisions().append(&revision).await?;
        vault.emit(SyncEvent::RevisionApplied {
            revision_id: revision.revision_id.clone(),
        });
        report.applied += 1;
    }

    // Reconciliation: the replayed log is the truth. Any file it names that
    // is missing or stale locally gets its payload queued for download.
    let mut pending: Vec<Arc<Bundle>> = Vec::new();
    for record in log_state.files.values() {
        let info = unwrap_fileinfo(vault, &record.metadata).await?;
        let Some(bundle) = vault.bundle_for(&info.filename).await? else {
            continue;
        };
        bundle.install_fileinfo(&record.metadata).await?;
        bundle.load_key().await?;
        bundle.set_remote_crypt_hash(Some(record.crypt_hash.clone()));
        if tokio::fs::try_exists(bundle.path()).await.unwrap_or(false) {
            bundle.update().await?;
            if !bundle.remote_hash_differs() {
                continue;
            }
        }
        pending.push(bundle);
    }

    // Payload downloads are order-free; fan out, retrying corruption once.
    let concurrency = vault.config().remote.concurrency as usize;
    let downloaded: Mutex<usize> = Mutex::new(0);
    let failure: Mutex<Option<SyncError>> = Mutex::new(None);
    futures::stream::iter(pending)
        .for_each_concurrent(concurrency, |bundle| {
            let backend = backend.clone();
            let downloaded = &downloaded;
            let failure = &failure;
            async move {
                let mut result = backend.download(&bundle).await;
                if matches!(result, Err(SyncError::CorruptData(_))) {
                    warn!(bundle = %bundle.relpath(), "corrupt download, retrying once");
                    result = backend.download(&bundle).await;
                }
                match result {
                    Ok(()) => *downloaded.lock().expect("pull counter poisoned") += 1,
                    Err(e) => {
                        warn!(bundle = %bundle.relpath(), error = %e, "download failed");
                        failure.lock().expect("pull failure poisoned").get_or_insert(e);
                    }
                }
            }
        })
        .await;
    if let Some(error) = failure.into_inner().expect("pull failure poisoned") {
        return Err(error);
    }
    report.downloaded = *downloaded.lock().expect("pull counter poisoned");

    vault.emit(SyncEvent::PullCompleted {
        applied: report.applied,
        downloaded: report.downloaded,
    });
    info!(applied = report.applied, downloaded = report.downloaded, "pull finished");
    Ok(report)
}

/// Clones a remote vault into an empty folder.
///
/// The caller supplies the remote configuration and the vault identity;
/// key distribution between devices is outside the core. The folder is
/// initialized and the full log replayed from the beginning.
pub async fn clone_vault(
    folder: impl AsRef<Path>,
    config: VaultConfig,
    identity: Identity,
) -> Result<Arc<Vault>, SyncError> {
    let folder = folder.as_ref();
    tokio::fs::create_dir_all(folder).await.map_err(SyncError::from)?;
    let vault_dir = folder.join(".vault");
    tokio::fs::create_dir_all(&vault_dir).await.map_err(SyncError::from)?;

    tokio::fs::write(vault_dir.join("id_rsa"), identity.private_key_pem()?)
        .await
        .map_err(SyncError::from)?;
    tokio::fs::write(vault_dir.join("id_rsa.pub"), identity.public_key_pem()?)
        .await
        .map_err(SyncError::from)?;
    crate::infrastructure::config::save_config(&config, &vault_dir.join("config")).await?;

    let vault = open_vault(folder).await?;
    pull(&vault).await?;
    Ok(vault)
}

/// Publishes the vault's wrapped metadata as a `SetMetadata` revision.
pub async fn set_metadata(vault: &Arc<Vault>) -> Result<(), SyncError> {
    let backend = vault.backend();
    backend.open().await?;
    let (verifier, _) = replay_local(vault).await?;
    let Some(parent) = verifier.last_id().map(str::to_string) else {
        return Err(SyncError::invalid_revision("cannot set metadata before the vault is created"));
    };
    let vault_id = ensure_vault_id(vault).await?;

    let revision = Revision::new(
        vault_id,
        Some(parent),
        RevisionBody::SetMetadata {
            metadata: vault.encrypted_metadata().await?,
        },
    );
    commit_revision(vault, revision).await?;
    Ok(())
}

/// Grants another user signing rights: `AddUser` plus `AddUserKey`.
pub async fn add_user(
    vault: &Arc<Vault>,
    email: &str,
    public_key_der: Vec<u8>,
) -> Result<(), SyncError> {
    let backend = vault.backend();
    backend.open().await?;
    let (verifier, _) = replay_local(vault).await?;
    let Some(parent) = verifier.last_id().map(str::to_string) else {
        return Err(SyncError::invalid_revision("cannot add a user before the vault is created"));
    };
    let vault_id = ensure_vault_id(vault).await?;

    let add_user = Revision::new(
        vault_id.clone(),
        Some(parent),
        RevisionBody::AddUser {
            email: email.to_string(),
        },
    );
    let add_user = commit_revision(vault, add_user).await?;

    let add_key = Revision::new(
        vault_id,
        Some(add_user.revision_id.clone()),
        RevisionBody::AddUserKey {
            email: email.to_string(),
            public_key: public_key_der,
        },
    );
    commit_revision(vault, add_key).await?;
    info!(email, "added user");
    Ok(())
}

/// Deletes every stored object and both copies of the log.
pub async fn wipe(vault: &Arc<Vault>) -> Result<(), SyncError> {
    vault.backend().wipe().await?;
    vault.revisions().clear().await?;
    info!("vault wiped");
    Ok(())
}
