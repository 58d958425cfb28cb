// /////////////////////////////////////////////////////////////////////////////
// Syncrypt RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Vault Configuration Entity
//!
//! The validated configuration of a vault, mirroring the two sections of the
//! on-disk `config` file: `[vault]` (crypto parameters, ignore patterns, the
//! assigned vault id) and `[remote]` (backend kind and its options).
//!
//! This entity is pure data plus validation; reading and writing the INI file
//! is an infrastructure concern. Defaults are chosen once, here, so every
//! construction path (fresh vault, clone, test fixture) agrees on them.

use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::value_objects::HashAlgorithm;

/// `[vault]` section: crypto parameters and local behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultSection {
    /// Vault id assigned at creation time (absent until the first push)
    #[serde(default)]
    pub id: Option<String>,
    /// Comma-separated ignore patterns matched against path components
    #[serde(default = "defaults::ignore")]
    pub ignore: String,
    #[serde(default = "defaults::hash_algo")]
    pub hash_algo: String,
    #[serde(default = "defaults::encoding")]
    pub encoding: String,
    /// AES key length in bits (128, 192 or 256)
    #[serde(default = "defaults::aes_key_len")]
    pub aes_key_len: u32,
    /// RSA modulus length in bits for the vault keypair
    #[serde(default = "defaults::rsa_key_len")]
    pub rsa_key_len: u32,
    /// Symmetric block size in bytes; AES fixes this at 16
    #[serde(default = "defaults::block_size")]
    pub block_size: u32,
    /// Chunk size of the streamed encryption pipeline; bounds memory
    #[serde(default = "defaults::enc_buf_size")]
    pub enc_buf_size: u32,
}

/// `[remote]` section: backend kind and its options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteSection {
    /// Backend kind: `binary` (TCP server) or `local` (directory store)
    #[serde(rename = "type", default = "defaults::backend_kind")]
    pub kind: String,
    #[serde(default = "defaults::host")]
    pub host: String,
    #[serde(default = "defaults::port")]
    pub port: u16,
    /// Connection pool size of the binary backend
    #[serde(default = "defaults::concurrency")]
    pub concurrency: u32,
    /// Auth token; replaces username/password once the server issued it
    #[serde(default)]
    pub auth: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Storage directory of the local backend
    #[serde(default)]
    pub folder: Option<String>,
}

mod defaults {
    pub fn ignore() -> String {
        ".*".to_string()
    }
    pub fn hash_algo() -> String {
        "sha256".to_string()
    }
    pub fn encoding() -> String {
        "utf-8".to_string()
    }
    pub fn aes_key_len() -> u32 {
        256
    }
    pub fn rsa_key_len() -> u32 {
        4096
    }
    pub fn block_size() -> u32 {
        16
    }
    pub fn enc_buf_size() -> u32 {
        64 * 1024
    }
    pub fn backend_kind() -> String {
        "binary".to_string()
    }
    pub fn host() -> String {
        "127.0.0.1".to_string()
    }
    pub fn port() -> u16 {
        1337
    }
    pub fn concurrency() -> u32 {
        4
    }
}

/// Complete vault configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultConfig {
    pub vault: VaultSection,
    pub remote: RemoteSection,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            vault: VaultSection {
                id: None,
                ignore: defaults::ignore(),
                hash_algo: defaults::hash_algo(),
                encoding: defaults::encoding(),
                aes_key_len: defaults::aes_key_len(),
                rsa_key_len: defaults::rsa_key_len(),
                block_size: defaults::block_size(),
                enc_buf_size: defaults::enc_buf_size(),
            },
            remote: RemoteSection {
                kind: defaults::backend_kind(),
                host: defaults::host(),
                port: defaults::port(),
                concurrency: defaults::concurrency(),
                auth: None,
                username: None,
                password: None,
                folder: None,
            },
        }
    }
}

impl VaultConfig {
    /// Validates cross-field invariants after loading.
    pub fn validate(&self) -> Result<(), SyncError> {
        self.hash_algorithm()?;
        if !matches!(self.vault.aes_key_len, 128 | 192 | 256) {
            return Err(SyncError::config(format!(
                "aes_key_len must be 128, 192 or 256, got {}",
                self.vault.aes_key_len
            )));
        }
        if self.vault.block_size != 16 {
            return Err(SyncError::config(format!(
                "block_size must be 16 for AES, got {}",
                self.vault.block_size
            )));
        }
        if self.vault.enc_buf_size == 0 || self.vault.enc_buf_size % self.vault.block_size != 0 {
            return Err(SyncError::config(format!(
                "enc_buf_size must be a positive multiple of the block size, got {}",
                self.vault.enc_buf_size
            )));
        }
        if self.vault.rsa_key_len < 2048 {
            return Err(SyncError::config(format!(
                "rsa_key_len must be at least 2048, got {}",
                self.vault.rsa_key_len
            )));
        }
        match self.remote.kind.as_str() {
            "binary" | "local" => {}
            other => return Err(SyncError::config(format!("unknown backend type: {}", other))),
        }
        if self.remote.concurrency == 0 {
            return Err(SyncError::config("concurrency must be at least 1"));
        }
        Ok(())
    }

    pub fn hash_algorithm(&self) -> Result<HashAlgorithm, SyncError> {
        HashAlgorithm::parse(&self.vault.hash_algo)
    }

    /// Symmetric key size in bytes
    pub fn key_size(&self) -> usize {
        (self.vault.aes_key_len >> 3) as usize
    }

    pub fn block_size(&self) -> usize {
        self.vault.block_size as usize
    }

    pub fn enc_buf_size(&self) -> usize {
        self.vault.enc_buf_size as usize
    }

    /// Ignore patterns, split from their comma-separated stored form
    pub fn ignore_patterns(&self) -> Vec<&str> {
        self.vault
            .ignore
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect()
    }
}
