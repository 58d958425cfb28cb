// /////////////////////////////////////////////////////////////////////////////
// Syncrypt RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # End-to-End Sync Scenarios (Local Backend)
//!
//! Push, pull, clone, debounce, and corruption handling against the local
//! directory store, which mirrors the wire backend's semantics.

use std::time::Duration;

use syncrypt::application::services::set_metadata;
use syncrypt::domain::{Identity, RevisionOp, SyncEvent};
use syncrypt::{clone_vault, open_vault, pull, push, wipe};

use crate::common::{init_local_vault, write_file};

#[tokio::test]
async fn test_empty_vault_push_creates_only_genesis() {
    let root = tempfile::tempdir().unwrap();
    let (folder, _) = init_local_vault(root.path()).await;
    let vault = open_vault(&folder).await.unwrap();

    let report = push(&vault).await.unwrap();
    assert_eq!(report.uploaded, 0);
    assert_eq!(report.revisions, 1);

    let log = vault.revisions().load().await.unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].operation(), RevisionOp::CreateVault);
    assert!(log[0].parent_id.is_none());
}

#[tokio::test]
async fn test_single_file_push_records_sizes_and_hash() {
    let root = tempfile::tempdir().unwrap();
    let (folder, store) = init_local_vault(root.path()).await;
    write_file(&folder, "hello.txt", b"hi\n").await;
    let vault = open_vault(&folder).await.unwrap();

    let report = push(&vault).await.unwrap();
    assert_eq!(report.uploaded, 1);
    assert_eq!(report.revisions, 2); // CreateVault + Upload

    let bundle = vault.bundle_for("hello.txt").await.unwrap().unwrap();
    let stored = tokio::fs::read(store.join("objects").join(bundle.store_hash().as_str()))
        .await
        .unwrap();
    assert_eq!(stored.len() as u64, bundle.file_size_crypt().unwrap());
    // The server-side copy is ciphertext, not the plaintext.
    assert!(!stored.windows(3).any(|w| w == b"hi\n"));

    let log = vault.revisions().load().await.unwrap();
    assert_eq!(log[1].operation(), RevisionOp::Upload);
}

#[tokio::test]
async fn test_push_is_idempotent() {
    let root = tempfile::tempdir().unwrap();
    let (folder, _) = init_local_vault(root.path()).await;
    write_file(&folder, "hello.txt", b"hi\n").await;
    let vault = open_vault(&folder).await.unwrap();

    let first = push(&vault).await.unwrap();
    assert_eq!(first.uploaded, 1);

    let second = push(&vault).await.unwrap();
    assert_eq!(second.uploaded, 0);
    assert_eq!(second.revisions, 0);
    assert_eq!(vault.revisions().load().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_pull_restores_wiped_plaintext() {
    let root = tempfile::tempdir().unwrap();
    let (folder, _) = init_local_vault(root.path()).await;
    write_file(&folder, "hello.txt", b"hi\n").await;
    let vault = open_vault(&folder).await.unwrap();
    push(&vault).await.unwrap();

    tokio::fs::remove_file(folder.join("hello.txt")).await.unwrap();
    let report = pull(&vault).await.unwrap();
    assert_eq!(report.downloaded, 1);
    assert_eq!(tokio::fs::read(folder.join("hello.txt")).await.unwrap(), b"hi\n");
}

#[tokio::test]
async fn test_corrupt_store_preserves_local_file() {
    let root = tempfile::tempdir().unwrap();
    let (folder, store) = init_local_vault(root.path()).await;
    write_file(&folder, "hello.txt", b"hi\n").await;
    let vault = open_vault(&folder).await.unwrap();
    push(&vault).await.unwrap();

    // Flip one ciphertext bit on the server side.
    let bundle = vault.bundle_for("hello.txt").await.unwrap().unwrap();
    let object_path = store.join("objects").join(bundle.store_hash().as_str());
    let mut bytes = tokio::fs::read(&object_path).await.unwrap();
    let middle = bytes.len() / 2;
    bytes[middle] ^= 0x01;
    tokio::fs::write(&object_path, &bytes).await.unwrap();

    // Local edit makes the bundle stale, so pull attempts the download.
    write_file(&folder, "hello.txt", b"local edit").await;
    let err = pull(&vault).await.unwrap_err();
    assert!(err.is_security_error(), "unexpected error: {:?}", err);

    // The temp-rename sink never promoted the bad stream.
    assert_eq!(
        tokio::fs::read(folder.join("hello.txt")).await.unwrap(),
        b"local edit"
    );
}

#[tokio::test]
async fn test_pull_is_idempotent() {
    let root = tempfile::tempdir().unwrap();
    let (folder, _) = init_local_vault(root.path()).await;
    write_file(&folder, "a.txt", b"aaa").await;
    write_file(&folder, "b.txt", b"bbb").await;
    let vault = open_vault(&folder).await.unwrap();
    push(&vault).await.unwrap();

    let first = pull(&vault).await.unwrap();
    assert_eq!(first.applied, 0); // everything already local
    let second = pull(&vault).await.unwrap();
    assert_eq!(second.applied, 0);
    assert_eq!(second.downloaded, 0);
}

#[tokio::test]
async fn test_delete_propagates_through_log() {
    let root = tempfile::tempdir().unwrap();
    let (folder, _) = init_local_vault(root.path()).await;
    write_file(&folder, "keep.txt", b"keep").await;
    write_file(&folder, "drop.txt", b"drop").await;
    let vault = open_vault(&folder).await.unwrap();
    push(&vault).await.unwrap();

    tokio::fs::remove_file(folder.join("drop.txt")).await.unwrap();
    let report = push(&vault).await.unwrap();
    assert_eq!(report.revisions, 1); // one DeleteFile

    let log = vault.revisions().load().await.unwrap();
    assert_eq!(log.last().unwrap().operation(), RevisionOp::DeleteFile);
}

#[tokio::test]
async fn test_clone_replays_log_with_deletes() {
    let root = tempfile::tempdir().unwrap();
    let (folder, _) = init_local_vault(root.path()).await;
    write_file(&folder, "a.txt", b"content a").await;
    write_file(&folder, "b.txt", b"content b").await;
    let vault = open_vault(&folder).await.unwrap();
    push(&vault).await.unwrap();
    tokio::fs::remove_file(folder.join("a.txt")).await.unwrap();
    push(&vault).await.unwrap();

    // Clone with the same remote config and the vault identity.
    let clone_folder = root.path().join("clone");
    let identity = Identity::from_pem(
        &tokio::fs::read_to_string(folder.join(".vault/id_rsa")).await.unwrap(),
        &tokio::fs::read_to_string(folder.join(".vault/id_rsa.pub")).await.unwrap(),
    )
    .unwrap();
    let cloned = clone_vault(&clone_folder, vault.config(), identity).await.unwrap();

    assert_eq!(
        tokio::fs::read(clone_folder.join("b.txt")).await.unwrap(),
        b"content b"
    );
    assert!(!clone_folder.join("a.txt").exists());

    // The clone's log equals the source log.
    let source_ids: Vec<String> = vault
        .revisions()
        .load()
        .await
        .unwrap()
        .iter()
        .map(|r| r.revision_id.clone())
        .collect();
    let clone_ids: Vec<String> = cloned
        .revisions()
        .load()
        .await
        .unwrap()
        .iter()
        .map(|r| r.revision_id.clone())
        .collect();
    assert_eq!(source_ids, clone_ids);
}

#[tokio::test]
async fn test_debounce_coalesces_bursts() {
    let root = tempfile::tempdir().unwrap();
    let (folder, _) = init_local_vault(root.path()).await;
    write_file(&folder, "busy.txt", b"v0").await;
    let vault = open_vault(&folder).await.unwrap();
    let mut events = vault.events();

    // Five watcher events within 200 ms.
    for i in 0..5 {
        write_file(&folder, "busy.txt", format!("v{}", i).as_bytes()).await;
        vault.schedule_update("busy.txt").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    // Debounce window (1 s) plus slack for the triggered update+upload.
    tokio::time::sleep(Duration::from_millis(2500)).await;

    let mut updates = 0;
    let mut uploads = 0;
    while let Ok(event) = events.try_recv() {
        match event {
            SyncEvent::BundleUpdated { .. } => updates += 1,
            SyncEvent::UploadCompleted { .. } => uploads += 1,
            _ => {}
        }
    }
    assert_eq!(updates, 1, "burst must coalesce into one update");
    assert_eq!(uploads, 1);
}

#[tokio::test]
async fn test_metadata_travels_through_log() {
    let root = tempfile::tempdir().unwrap();
    let (folder, _) = init_local_vault(root.path()).await;
    let vault = open_vault(&folder).await.unwrap();
    push(&vault).await.unwrap();
    set_metadata(&vault).await.unwrap();

    let identity = Identity::from_pem(
        &tokio::fs::read_to_string(folder.join(".vault/id_rsa")).await.unwrap(),
        &tokio::fs::read_to_string(folder.join(".vault/id_rsa.pub")).await.unwrap(),
    )
    .unwrap();
    let clone_folder = root.path().join("clone");
    let cloned = clone_vault(&clone_folder, vault.config(), identity).await.unwrap();

    assert!(clone_folder.join(".vault/metadata").exists());
    assert_eq!(
        cloned.revisions().load().await.unwrap().last().unwrap().operation(),
        RevisionOp::SetMetadata
    );
}

#[tokio::test]
async fn test_wipe_clears_store_and_log() {
    let root = tempfile::tempdir().unwrap();
    let (folder, store) = init_local_vault(root.path()).await;
    write_file(&folder, "a.txt", b"data").await;
    let vault = open_vault(&folder).await.unwrap();
    push(&vault).await.unwrap();
    assert!(store.join("objects").exists());

    wipe(&vault).await.unwrap();
    assert!(!store.join("objects").exists());
    assert!(vault.revisions().load().await.unwrap().is_empty());
}
