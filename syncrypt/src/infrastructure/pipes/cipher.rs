// /////////////////////////////////////////////////////////////////////////////
// Syncrypt RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Symmetric Cipher Pipes
//!
//! PKCS#7 padding and AES-CBC encryption as streaming transforms.
//!
//! The encrypted body format is `IV || ciphertext`: [`EncryptAes`] draws a
//! random IV and emits it before the first ciphertext bytes; [`DecryptAes`]
//! consumes it from the head of the stream. The cipher state is carried
//! across chunks, so upstream chunk boundaries are free; only the *total*
//! plaintext must be block-aligned, which [`PadAes`] guarantees.
//!
//! [`PadAes`] always adds 1..=block_size bytes (a full block when the input
//! is already aligned), so [`UnpadAes`] can always strip unambiguously.
//! Invalid padding surfaces as `CorruptData`: it means the ciphertext was
//! tampered with or the wrong key was used.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes::{Aes128, Aes192, Aes256};
use async_trait::async_trait;
use rand::RngCore;

use syncrypt_domain::{FileKey, SyncError};

use super::{BoxedPipe, Pipe};

/// AES block size in bytes; the only block size the config validator accepts.
pub const AES_BLOCK_SIZE: usize = 16;

enum CbcEncryptor {
    Aes128(cbc::Encryptor<Aes128>),
    Aes192(cbc::Encryptor<Aes192>),
    Aes256(cbc::Encryptor<Aes256>),
}

impl CbcEncryptor {
    fn new(key: &FileKey, iv: &[u8]) -> Result<Self, SyncError> {
        match key.len() {
            16 => Ok(Self::Aes128(cbc::Encryptor::new_from_slices(key.as_bytes(), iv).expect("key and iv lengths checked"))),
            24 => Ok(Self::Aes192(cbc::Encryptor::new_from_slices(key.as_bytes(), iv).expect("key and iv lengths checked"))),
            32 => Ok(Self::Aes256(cbc::Encryptor::new_from_slices(key.as_bytes(), iv).expect("key and iv lengths checked"))),
            n => Err(SyncError::EncryptionError(format!("unsupported AES key length: {} bytes", n))),
        }
    }

    /// Encrypts block-aligned data in place, advancing the CBC state.
    fn encrypt_in_place(&mut self, data: &mut [u8]) {
        debug_assert_eq!(data.len() % AES_BLOCK_SIZE, 0);
        for block in data.chunks_exact_mut(AES_BLOCK_SIZE) {
            let block = GenericArray::from_mut_slice(block);
            match self {
                Self::Aes128(enc) => enc.encrypt_block_mut(block),
                Self::Aes192(enc) => enc.encrypt_block_mut(block),
                Self::Aes256(enc) => enc.encrypt_block_mut(block),
            }
        }
    }
}

enum CbcDecryptor {
    Aes128(cbc::Decryptor<Aes128>),
    Aes192(cbc::Decryptor<Aes192>),
    Aes256(cbc::Decryptor<Aes256>),
}

impl CbcDecryptor {
    fn new(key: &FileKey, iv: &[u8]) -> Result<Self, SyncError> {
        match key.len() {
            16 => Ok(Self::Aes128(cbc::Decryptor::new_from_slices(key.as_bytes(), iv).expect("key and iv lengths checked"))),
            24 => Ok(Self::Aes192(cbc::Decryptor::new_from_slices(key.as_bytes(), iv).expect("key and iv lengths checked"))),
            32 => Ok(Self::Aes256(cbc::Decryptor::new_from_slices(key.as_bytes(), iv).expect("key and iv lengths checked"))),
            n => Err(SyncError::EncryptionError(format!("unsupported AES key length: {} bytes", n))),
        }
    }

    fn decrypt_in_place(&mut self, data: &mut [u8]) {
        debug_assert_eq!(data.len() % AES_BLOCK_SIZE, 0);
        for block in data.chunks_exact_mut(AES_BLOCK_SIZE) {
            let block = GenericArray::from_mut_slice(block);
            match self {
                Self::Aes128(dec) => dec.decrypt_block_mut(block),
                Self::Aes192(dec) => dec.decrypt_block_mut(block),
                Self::Aes256(dec) => dec.decrypt_block_mut(block),
            }
        }
    }
}

/// Appends PKCS#7 padding to the end of the stream.
pub struct PadAes {
    input: BoxedPipe,
    block_size: usize,
    total: u64,
    padded: bool,
    done: bool,
}

impl PadAes {
    pub fn new(input: BoxedPipe, block_size: usize) -> Self {
        Self {
            input,
            block_size,
            total: 0,
            padded: false,
            done: false,
        }
    }
}

#[async_trait]
impl Pipe for PadAes {
    async fn read(&mut self) -> Result<Vec<u8>, SyncError> {
        if self.done {
            return Ok(Vec::new());
        }
        if self.padded {
            self.done = true;
            return Ok(Vec::new());
        }
        let chunk = self.input.read().await?;
        if chunk.is_empty() {
            // 1..=block_size bytes, a full block when already aligned
            let pad = self.block_size - (self.total as usize % self.block_size);
            self.padded = true;
            return Ok(vec![pad as u8; pad]);
        }
        self.total += chunk.len() as u64;
        Ok(chunk)
    }

    async fn finalize(&mut self) -> Result<(), SyncError> {
        self.input.finalize().await
    }
}

/// Strips and validates PKCS#7 padding at the end of the stream.
pub struct UnpadAes {
    input: BoxedPipe,
    block_size: usize,
    holdback: Vec<u8>,
    done: bool,
}

impl UnpadAes {
    pub fn new(input: BoxedPipe, block_size: usize) -> Self {
        Self {
            input,
            block_size,
            holdback: Vec::new(),
            done: false,
        }
    }

    fn strip_padding(&mut self) -> Result<Vec<u8>, SyncError> {
        if self.holdback.len() < self.block_size || self.holdback.len() % self.block_size != 0 {
            return Err(SyncError::corrupt("padded stream is not block aligned"));
        }
        let pad = *self.holdback.last().unwrap() as usize;
        if pad == 0 || pad > self.block_size {
            return Err(SyncError::corrupt("invalid padding length"));
        }
        let body_len = self.holdback.len() - pad;
        if self.holdback[body_len..].iter().any(|&b| b as usize != pad) {
            return Err(SyncError::corrupt("invalid padding bytes"));
        }
        self.holdback.truncate(body_len);
        Ok(std::mem::take(&mut self.holdback))
    }
}

#[async_trait]
impl Pipe for UnpadAes {
    async fn read(&mut self) -> Result<Vec<u8>, SyncError> {
        if self.done {
            return Ok(Vec::new());
        }
        loop {
            let chunk = self.input.read().await?;
            if chunk.is_empty() {
                self.done = true;
                if self.holdback.is_empty() {
                    return Err(SyncError::corrupt("stream ended before any padded block"));
                }
                return self.strip_padding();
            }
            self.holdback.extend_from_slice(&chunk);
            // Keep one block back: the padding always lives in the last one.
            if self.holdback.len() > self.block_size {
                let emit = self.holdback.len() - self.block_size;
                return Ok(self.holdback.drain(..emit).collect());
            }
        }
    }

    async fn finalize(&mut self) -> Result<(), SyncError> {
        self.input.finalize().await
    }
}

/// AES-CBC encryption with a random IV prepended to the output stream.
pub struct EncryptAes {
    input: BoxedPipe,
    key: FileKey,
    block_size: usize,
    encryptor: Option<CbcEncryptor>,
    carry: Vec<u8>,
    done: bool,
}

impl EncryptAes {
    pub fn new(input: BoxedPipe, key: FileKey, block_size: usize) -> Self {
        Self {
            input,
            key,
            block_size,
            encryptor: None,
            carry: Vec::new(),
            done: false,
        }
    }
}

#[async_trait]
impl Pipe for EncryptAes {
    async fn read(&mut self) -> Result<Vec<u8>, SyncError> {
        if self.done {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        if self.encryptor.is_none() {
            let mut iv = vec![0u8; self.block_size];
            rand::rngs::OsRng.fill_bytes(&mut iv);
            self.encryptor = Some(CbcEncryptor::new(&self.key, &iv)?);
            out.extend_from_slice(&iv);
        }
        loop {
            let chunk = self.input.read().await?;
            if chunk.is_empty() {
                self.done = true;
                if !self.carry.is_empty() {
                    return Err(SyncError::EncryptionError(
                        "plaintext is not block aligned (missing padding stage?)".to_string(),
                    ));
                }
                return Ok(out);
            }
            self.carry.extend_from_slice(&chunk);
            let aligned = (self.carry.len() / self.block_size) * self.block_size;
            if aligned > 0 {
                let mut block_buf: Vec<u8> = self.carry.drain(..aligned).collect();
                self.encryptor.as_mut().unwrap().encrypt_in_place(&mut block_buf);
                out.extend_from_slice(&block_buf);
            }
            if !out.is_empty() {
                return Ok(out);
            }
        }
    }

    async fn finalize(&mut self) -> Result<(), SyncError> {
        self.input.finalize().await
    }
}

/// AES-CBC decryption, consuming the IV from the head of the stream.
pub struct DecryptAes {
    input: BoxedPipe,
    key: FileKey,
    block_size: usize,
    decryptor: Option<CbcDecryptor>,
    carry: Vec<u8>,
    done: bool,
}

impl DecryptAes {
    pub fn new(input: BoxedPipe, key: FileKey, block_size: usize) -> Self {
        Self {
            input,
            key,
            block_size,
            decryptor: None,
            carry: Vec::new(),
            done: false,
        }
    }
}

#[async_trait]
impl Pipe for DecryptAes {
    async fn read(&mut self) -> Result<Vec<u8>, SyncError> {
        if self.done {
            return Ok(Vec::new());
        }
        loop {
            let chunk = self.input.read().await?;
            if chunk.is_empty() {
                self.done = true;
                if self.decryptor.is_none() && !self.carry.is_empty() {
                    return Err(SyncError::corrupt("encrypted stream shorter than one IV"));
                }
                if !self.carry.is_empty() {
                    return Err(SyncError::corrupt("ciphertext is not block aligned"));
                }
                return Ok(Vec::new());
            }
            self.carry.extend_from_slice(&chunk);
            if self.decryptor.is_none() {
                if self.carry.len() < self.block_size {
                    continue;
                }
                let rest = self.carry.split_off(self.block_size);
                let iv = std::mem::replace(&mut self.carry, rest);
                self.decryptor = Some(CbcDecryptor::new(&self.key, &iv)?);
            }
            let aligned = (self.carry.len() / self.block_size) * self.block_size;
            if aligned == 0 {
                continue;
            }
            let mut block_buf: Vec<u8> = self.carry.drain(..aligned).collect();
            self.decryptor.as_mut().unwrap().decrypt_in_place(&mut block_buf);
            return Ok(block_buf);
        }
    }

    async fn finalize(&mut self) -> Result<(), SyncError> {
        self.input.finalize().await
    }
}
