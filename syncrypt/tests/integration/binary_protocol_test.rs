// /////////////////////////////////////////////////////////////////////////////
// Syncrypt RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Binary Backend Tests
//!
//! The wire protocol and the connection pool, exercised against an
//! in-process mock server: framing, auth and login, upload/download
//! payloads, revision exchange, and the pool's concurrency bound.

use syncrypt::domain::{Identity, SyncError};
use syncrypt::{clone_vault, open_vault, pull, push};

use crate::common::{init_binary_vault, write_file, MockServer, TEST_TOKEN};

#[tokio::test]
async fn test_push_uploads_key_and_body() {
    let server = MockServer::start().await;
    let root = tempfile::tempdir().unwrap();
    let folder = init_binary_vault(root.path(), server.addr, 4).await;
    write_file(&folder, "hello.txt", b"hi\n").await;

    let vault = open_vault(&folder).await.unwrap();
    let report = push(&vault).await.unwrap();
    assert_eq!(report.uploaded, 1);

    let bundle = vault.bundle_for("hello.txt").await.unwrap().unwrap();
    let object = server.state.object(bundle.store_hash().as_str()).unwrap();
    assert_eq!(object.body.len() as u64, bundle.file_size_crypt().unwrap());
    assert_eq!(object.key.len() as u64, bundle.key_size_crypt().unwrap());
    assert_eq!(object.crypt_hash, bundle.crypt_hash().unwrap());
    assert_eq!(server.state.revision_ids().len(), 2); // CreateVault + Upload
}

#[tokio::test]
async fn test_second_push_stats_but_does_not_upload() {
    let server = MockServer::start().await;
    let root = tempfile::tempdir().unwrap();
    let folder = init_binary_vault(root.path(), server.addr, 4).await;
    write_file(&folder, "hello.txt", b"hi\n").await;

    let vault = open_vault(&folder).await.unwrap();
    push(&vault).await.unwrap();
    assert_eq!(server.state.upload_count(), 1);

    push(&vault).await.unwrap();
    assert_eq!(server.state.upload_count(), 1, "second push must only stat");
}

#[tokio::test]
async fn test_invalid_token_bubbles_as_invalid_auth() {
    let server = MockServer::start().await;
    let root = tempfile::tempdir().unwrap();
    let folder = init_binary_vault(root.path(), server.addr, 4).await;
    let vault = open_vault(&folder).await.unwrap();

    vault.update_config(|config| config.remote.auth = Some("wrong-token".to_string()));
    // Rebuild the backend view of the config by reopening the vault.
    vault.write_config().await.unwrap();
    drop(vault);
    let vault = open_vault(&folder).await.unwrap();

    let err = push(&vault).await.unwrap_err();
    assert!(matches!(err, SyncError::InvalidAuth(_)));
}

#[tokio::test]
async fn test_login_issues_and_persists_token() {
    let server = MockServer::start().await;
    let root = tempfile::tempdir().unwrap();
    let folder = init_binary_vault(root.path(), server.addr, 4).await;
    let vault = open_vault(&folder).await.unwrap();

    // Credentials instead of a token.
    vault.update_config(|config| {
        config.remote.auth = None;
        config.remote.username = Some("user@example.com".to_string());
        config.remote.password = Some("secret".to_string());
    });
    vault.write_config().await.unwrap();
    drop(vault);
    let vault = open_vault(&folder).await.unwrap();

    push(&vault).await.unwrap();
    // The issued token replaced the credentials for later sessions.
    assert_eq!(vault.config().remote.auth.as_deref(), Some(TEST_TOKEN));
    let on_disk = tokio::fs::read_to_string(folder.join(".vault/config")).await.unwrap();
    assert!(on_disk.contains(&format!("auth = {}", TEST_TOKEN)));
}

#[tokio::test]
async fn test_pool_never_exceeds_concurrency() {
    let server = MockServer::start().await;
    let root = tempfile::tempdir().unwrap();
    let folder = init_binary_vault(root.path(), server.addr, 2).await;
    for i in 0..12 {
        write_file(&folder, &format!("file-{:02}.bin", i), &vec![i as u8; 20_000]).await;
    }

    let vault = open_vault(&folder).await.unwrap();
    push(&vault).await.unwrap();
    assert_eq!(server.state.upload_count(), 12);
    assert!(
        server.state.peak_connections() <= 2,
        "peak {} exceeds pool size",
        server.state.peak_connections()
    );
}

#[tokio::test]
async fn test_clone_over_the_wire() {
    let server = MockServer::start().await;
    let root = tempfile::tempdir().unwrap();
    let folder = init_binary_vault(root.path(), server.addr, 4).await;
    write_file(&folder, "a.txt", b"alpha").await;
    write_file(&folder, "nested/b.txt", b"beta").await;

    let vault = open_vault(&folder).await.unwrap();
    push(&vault).await.unwrap();

    let identity = Identity::from_pem(
        &tokio::fs::read_to_string(folder.join(".vault/id_rsa")).await.unwrap(),
        &tokio::fs::read_to_string(folder.join(".vault/id_rsa.pub")).await.unwrap(),
    )
    .unwrap();
    let clone_folder = root.path().join("clone");
    let cloned = clone_vault(&clone_folder, vault.config(), identity).await.unwrap();

    assert_eq!(tokio::fs::read(clone_folder.join("a.txt")).await.unwrap(), b"alpha");
    assert_eq!(
        tokio::fs::read(clone_folder.join("nested/b.txt")).await.unwrap(),
        b"beta"
    );
    assert_eq!(
        cloned.revisions().load().await.unwrap().len(),
        vault.revisions().load().await.unwrap().len()
    );
}

#[tokio::test]
async fn test_corrupt_wire_payload_is_rejected() {
    let server = MockServer::start().await;
    let root = tempfile::tempdir().unwrap();
    let folder = init_binary_vault(root.path(), server.addr, 4).await;
    write_file(&folder, "hello.txt", b"hi\n").await;

    let vault = open_vault(&folder).await.unwrap();
    push(&vault).await.unwrap();

    // Corrupt the stored ciphertext server-side.
    let bundle = vault.bundle_for("hello.txt").await.unwrap().unwrap();
    {
        let mut objects = server.state.objects.lock().unwrap();
        let object = objects.get_mut(bundle.store_hash().as_str()).unwrap();
        let middle = object.body.len() / 2;
        object.body[middle] ^= 0x01;
    }

    tokio::fs::remove_file(folder.join("hello.txt")).await.unwrap();
    let err = pull(&vault).await.unwrap_err();
    assert!(err.is_security_error(), "unexpected error: {:?}", err);
    assert!(!folder.join("hello.txt").exists(), "bad stream must not be promoted");
}
