// /////////////////////////////////////////////////////////////////////////////
// Syncrypt RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Pipe Composition Tests
//!
//! The canonical body pipelines end to end: compress → pad → encrypt on the
//! way out, the inverse on the way back, with the documented size formula
//! and bounded-memory re-chunking in between.

use proptest::prelude::*;

use syncrypt::domain::{FileKey, SyncError};
use syncrypt::infrastructure::pipes::{
    read_to_end, Buffered, DecryptAes, EncryptAes, FileReader, FileWriter, FileWriterOptions, Once,
    PadAes, Pipe, PipeExt, SnappyCompress, SnappyDecompress, UnpadAes,
};

const BLOCK: usize = 16;
const ENC_BUF: usize = 4096;

fn key() -> FileKey {
    FileKey::from_bytes((0u8..32).collect(), 32).unwrap()
}

fn encrypt_pipeline(data: Vec<u8>) -> impl Pipe {
    Once::new(data)
        .chain(SnappyCompress::new)
        .chain(|src| Buffered::new(src, ENC_BUF))
        .chain(|src| PadAes::new(src, BLOCK))
        .chain(|src| EncryptAes::new(src, key(), BLOCK))
}

fn decrypt_pipeline(data: Vec<u8>) -> impl Pipe {
    Once::new(data)
        .chain(|src| Buffered::new_aligned(src, ENC_BUF, BLOCK))
        .chain(|src| DecryptAes::new(src, key(), BLOCK))
        .chain(|src| UnpadAes::new(src, BLOCK))
        .chain(SnappyDecompress::new)
}

#[tokio::test]
async fn test_body_roundtrip() {
    let data: Vec<u8> = (0..300_000u32).flat_map(|i| i.to_le_bytes()).collect();
    let ciphertext = read_to_end(&mut encrypt_pipeline(data.clone())).await.unwrap();
    let plaintext = read_to_end(&mut decrypt_pipeline(ciphertext)).await.unwrap();
    assert_eq!(plaintext, data);
}

#[tokio::test]
async fn test_output_length_matches_formula() {
    let data = b"hi\n".to_vec();

    // Compressed size measured with the same stage the body pipeline uses
    let compressed = read_to_end(&mut Once::new(data.clone()).chain(SnappyCompress::new))
        .await
        .unwrap();
    let compressed_len = compressed.len();

    let ciphertext = read_to_end(&mut encrypt_pipeline(data)).await.unwrap();
    let pad = BLOCK - (compressed_len % BLOCK);
    assert_eq!(ciphertext.len(), BLOCK + compressed_len + pad);
}

#[tokio::test]
async fn test_roundtrip_through_files() {
    let dir = tempfile::tempdir().unwrap();
    let source_path = dir.path().join("source.bin");
    let restored_path = dir.path().join("restored.bin");
    let data: Vec<u8> = b"file content that compresses somewhat ".repeat(1000).to_vec();
    tokio::fs::write(&source_path, &data).await.unwrap();

    let ciphertext = read_to_end(
        &mut FileReader::new(&source_path)
            .chain(SnappyCompress::new)
            .chain(|src| Buffered::new(src, ENC_BUF))
            .chain(|src| PadAes::new(src, BLOCK))
            .chain(|src| EncryptAes::new(src, key(), BLOCK)),
    )
    .await
    .unwrap();

    let options = FileWriterOptions {
        store_temporary: true,
        ..Default::default()
    };
    let mut sink = Once::new(ciphertext)
        .chain(|src| Buffered::new_aligned(src, ENC_BUF, BLOCK))
        .chain(|src| DecryptAes::new(src, key(), BLOCK))
        .chain(|src| UnpadAes::new(src, BLOCK))
        .chain(SnappyDecompress::new)
        .chain(|src| FileWriter::new(src, &restored_path, options));
    sink.consume().await.unwrap();

    assert_eq!(tokio::fs::read(&restored_path).await.unwrap(), data);
}

#[tokio::test]
async fn test_corrupted_stream_does_not_touch_existing_file() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("target.bin");
    tokio::fs::write(&target, b"previous version").await.unwrap();

    let mut ciphertext = read_to_end(&mut encrypt_pipeline(b"new version".to_vec())).await.unwrap();
    ciphertext.truncate(ciphertext.len() - 1); // break block alignment

    let options = FileWriterOptions {
        store_temporary: true,
        ..Default::default()
    };
    let mut sink = Once::new(ciphertext)
        .chain(|src| Buffered::new_aligned(src, ENC_BUF, BLOCK))
        .chain(|src| DecryptAes::new(src, key(), BLOCK))
        .chain(|src| UnpadAes::new(src, BLOCK))
        .chain(SnappyDecompress::new)
        .chain(|src| FileWriter::new(src, &target, options));
    let err = sink.consume().await.unwrap_err();
    assert!(matches!(err, SyncError::CorruptData(_)));
    assert_eq!(tokio::fs::read(&target).await.unwrap(), b"previous version");
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// decrypt(encrypt(C, K), K) = C for arbitrary content.
    #[test]
    fn prop_roundtrip_restores_content(data in proptest::collection::vec(any::<u8>(), 0..8192)) {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        runtime.block_on(async {
            let ciphertext = read_to_end(&mut encrypt_pipeline(data.clone())).await.unwrap();
            let plaintext = read_to_end(&mut decrypt_pipeline(ciphertext)).await.unwrap();
            prop_assert_eq!(plaintext, data);
            Ok(())
        })?;
    }

    /// Ciphertext length is the padded compressed length plus one IV block.
    #[test]
    fn prop_ciphertext_length_is_block_aligned(data in proptest::collection::vec(any::<u8>(), 0..4096)) {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        runtime.block_on(async {
            let ciphertext = read_to_end(&mut encrypt_pipeline(data)).await.unwrap();
            prop_assert!(ciphertext.len() >= 2 * BLOCK);
            prop_assert_eq!(ciphertext.len() % BLOCK, 0);
            Ok(())
        })?;
    }
}
