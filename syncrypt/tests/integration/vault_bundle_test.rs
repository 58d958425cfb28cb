// /////////////////////////////////////////////////////////////////////////////
// Syncrypt RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Vault and Bundle Lifecycle Tests
//!
//! Vault initialization, the bundle key/measure cycle, and the invariants
//! that hold across them: path-derived store hashes, key-mixed crypt hashes,
//! and the precomputed ciphertext size matching the streamed length.

use syncrypt::domain::{Identity, StoreHash, SyncError};
use syncrypt::infrastructure::pipes::read_to_end;
use syncrypt::open_vault;

use crate::common::{init_local_vault, write_file};

#[tokio::test]
async fn test_open_vault_initializes_config_and_keys() {
    let root = tempfile::tempdir().unwrap();
    let (folder, _) = init_local_vault(root.path()).await;

    let vault = open_vault(&folder).await.unwrap();
    assert!(folder.join(".vault/config").exists());
    assert!(folder.join(".vault/id_rsa").exists());
    assert!(folder.join(".vault/id_rsa.pub").exists());

    // Reopening loads the same identity rather than regenerating.
    let fingerprint = vault.identity().fingerprint();
    drop(vault);
    let reopened = open_vault(&folder).await.unwrap();
    assert_eq!(reopened.identity().fingerprint(), fingerprint);
}

#[tokio::test]
async fn test_store_hash_is_path_derived() {
    let root = tempfile::tempdir().unwrap();
    let (folder, _) = init_local_vault(root.path()).await;
    write_file(&folder, "docs/a.txt", b"first").await;
    let vault = open_vault(&folder).await.unwrap();

    let bundle = vault.bundle_for("docs/a.txt").await.unwrap().unwrap();
    let expected = StoreHash::derive("docs/a.txt", vault.config().hash_algorithm().unwrap());
    assert_eq!(bundle.store_hash(), &expected);

    // Independent of content
    write_file(&folder, "docs/a.txt", b"completely different").await;
    assert_eq!(bundle.store_hash(), &expected);
}

#[tokio::test]
async fn test_update_measures_and_streams_consistently() {
    let root = tempfile::tempdir().unwrap();
    let (folder, _) = init_local_vault(root.path()).await;
    write_file(&folder, "data.bin", &vec![42u8; 50_000]).await;
    let vault = open_vault(&folder).await.unwrap();

    let bundle = vault.bundle_for("data.bin").await.unwrap().unwrap();
    bundle.update().await.unwrap();
    assert!(bundle.uptodate());

    // The precomputed size must match the actual encrypted stream.
    let streamed = read_to_end(&mut *bundle.read_encrypted_stream().unwrap()).await.unwrap();
    assert_eq!(streamed.len() as u64, bundle.file_size_crypt().unwrap());
}

#[tokio::test]
async fn test_crypt_hash_depends_on_content_and_key() {
    let root = tempfile::tempdir().unwrap();
    let (folder, _) = init_local_vault(root.path()).await;
    write_file(&folder, "a.txt", b"hello").await;
    let vault = open_vault(&folder).await.unwrap();

    let bundle = vault.bundle_for("a.txt").await.unwrap().unwrap();
    bundle.update().await.unwrap();
    let original = bundle.crypt_hash().unwrap();

    // Same content, same key: stable
    bundle.update().await.unwrap();
    assert_eq!(bundle.crypt_hash().unwrap(), original);

    // Changed content: different
    write_file(&folder, "a.txt", b"hello!").await;
    bundle.update().await.unwrap();
    let changed = bundle.crypt_hash().unwrap();
    assert_ne!(changed, original);

    // Same content, fresh key: different (server cannot correlate)
    write_file(&folder, "a.txt", b"hello").await;
    bundle.remove_fileinfo().await.unwrap();
    bundle.update().await.unwrap();
    assert_ne!(bundle.crypt_hash().unwrap(), original);
}

#[tokio::test]
async fn test_load_key_roundtrips_through_wrap() {
    let root = tempfile::tempdir().unwrap();
    let (folder, _) = init_local_vault(root.path()).await;
    write_file(&folder, "a.txt", b"hello").await;
    let vault = open_vault(&folder).await.unwrap();

    let bundle = vault.bundle_for("a.txt").await.unwrap().unwrap();
    bundle.generate_key().await.unwrap();
    let wrapped_len = bundle.key_size_crypt().unwrap();

    // A fresh bundle object for the same path loads the same record.
    vault.evict_bundle("a.txt");
    let reloaded = vault.bundle_for("a.txt").await.unwrap().unwrap();
    reloaded.load_key().await.unwrap();
    assert_eq!(reloaded.key_size_crypt().unwrap(), wrapped_len);
}

#[tokio::test]
async fn test_load_key_missing_is_not_found() {
    let root = tempfile::tempdir().unwrap();
    let (folder, _) = init_local_vault(root.path()).await;
    write_file(&folder, "a.txt", b"hello").await;
    let vault = open_vault(&folder).await.unwrap();

    let bundle = vault.bundle_for("a.txt").await.unwrap().unwrap();
    assert!(bundle.load_key().await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_load_key_rejects_record_for_other_path() {
    let root = tempfile::tempdir().unwrap();
    let (folder, _) = init_local_vault(root.path()).await;
    write_file(&folder, "a.txt", b"hello").await;
    write_file(&folder, "b.txt", b"world").await;
    let vault = open_vault(&folder).await.unwrap();

    let a = vault.bundle_for("a.txt").await.unwrap().unwrap();
    let b = vault.bundle_for("b.txt").await.unwrap().unwrap();
    a.generate_key().await.unwrap();

    // Splice a's record into b's slot
    tokio::fs::create_dir_all(b.path_fileinfo().unwrap().parent().unwrap()).await.unwrap();
    tokio::fs::copy(a.path_fileinfo().unwrap(), b.path_fileinfo().unwrap()).await.unwrap();

    let err = b.load_key().await.unwrap_err();
    assert!(matches!(err, SyncError::CorruptData(_)));
}

#[tokio::test]
async fn test_load_key_wrong_identity_is_corrupt() {
    let root = tempfile::tempdir().unwrap();
    let (folder, _) = init_local_vault(root.path()).await;
    write_file(&folder, "a.txt", b"hello").await;
    let vault = open_vault(&folder).await.unwrap();
    let bundle = vault.bundle_for("a.txt").await.unwrap().unwrap();
    bundle.generate_key().await.unwrap();
    drop(bundle);
    drop(vault);

    // Replace the vault keypair; the stored record can no longer unwrap.
    let intruder = Identity::generate(2048).unwrap();
    tokio::fs::write(folder.join(".vault/id_rsa"), intruder.private_key_pem().unwrap())
        .await
        .unwrap();
    tokio::fs::write(folder.join(".vault/id_rsa.pub"), intruder.public_key_pem().unwrap())
        .await
        .unwrap();

    let vault = open_vault(&folder).await.unwrap();
    let bundle = vault.bundle_for("a.txt").await.unwrap().unwrap();
    assert!(matches!(bundle.load_key().await, Err(SyncError::CorruptData(_))));
}

#[tokio::test]
async fn test_walk_skips_ignored_components() {
    let root = tempfile::tempdir().unwrap();
    let (folder, _) = init_local_vault(root.path()).await;
    write_file(&folder, "kept.txt", b"1").await;
    write_file(&folder, "nested/also-kept.txt", b"2").await;
    write_file(&folder, ".hidden", b"3").await;
    write_file(&folder, ".secret/inside.txt", b"4").await;
    let vault = open_vault(&folder).await.unwrap();

    let names: Vec<String> = vault
        .walk()
        .await
        .unwrap()
        .iter()
        .map(|b| b.relpath().to_string())
        .collect();
    assert_eq!(names, vec!["kept.txt", "nested/also-kept.txt"]);
}

#[tokio::test]
async fn test_absent_plaintext_becomes_tombstone_candidate() {
    let root = tempfile::tempdir().unwrap();
    let (folder, _) = init_local_vault(root.path()).await;
    write_file(&folder, "a.txt", b"hello").await;
    let vault = open_vault(&folder).await.unwrap();

    let bundle = vault.bundle_for("a.txt").await.unwrap().unwrap();
    bundle.update().await.unwrap();
    assert!(bundle.crypt_hash().is_some());

    tokio::fs::remove_file(folder.join("a.txt")).await.unwrap();
    bundle.update().await.unwrap();
    assert!(bundle.crypt_hash().is_none());
    assert!(bundle.file_size_crypt().is_none());
    assert!(bundle.uptodate());
}
