// /////////////////////////////////////////////////////////////////////////////
// Syncrypt RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Configuration Persistence
//!
//! Loads and saves the vault's INI configuration file
//! (`<vault>/.vault/config`). Loading goes through the `config` crate so
//! defaults, type coercion and validation live in one place; saving uses a
//! small INI renderer because the file is two flat sections and round-trip
//! fidelity matters more than generality.
//!
//! ```ini
//! [vault]
//! ignore = .*
//! hash_algo = sha256
//! aes_key_len = 256
//!
//! [remote]
//! type = binary
//! host = 127.0.0.1
//! port = 1337
//! concurrency = 4
//! ```

use config::{Config, File, FileFormat};
use std::fmt::Write as _;
use std::path::Path;

use syncrypt_domain::{SyncError, VaultConfig};

/// Loads and validates a vault configuration from an INI file.
pub fn load_config(path: &Path) -> Result<VaultConfig, SyncError> {
    let settings = Config::builder()
        .add_source(File::from(path.to_path_buf()).format(FileFormat::Ini))
        .build()
        .map_err(|e| SyncError::config(format!("cannot read {}: {}", path.display(), e)))?;
    let vault_config: VaultConfig = settings
        .try_deserialize()
        .map_err(|e| SyncError::config(format!("cannot parse {}: {}", path.display(), e)))?;
    vault_config.validate()?;
    Ok(vault_config)
}

/// Renders the configuration in the stored INI layout.
pub fn render_ini(config: &VaultConfig) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "[vault]");
    if let Some(id) = &config.vault.id {
        let _ = writeln!(out, "id = {}", id);
    }
    let _ = writeln!(out, "ignore = {}", config.vault.ignore);
    let _ = writeln!(out, "hash_algo = {}", config.vault.hash_algo);
    let _ = writeln!(out, "encoding = {}", config.vault.encoding);
    let _ = writeln!(out, "aes_key_len = {}", config.vault.aes_key_len);
    let _ = writeln!(out, "rsa_key_len = {}", config.vault.rsa_key_len);
    let _ = writeln!(out, "block_size = {}", config.vault.block_size);
    let _ = writeln!(out, "enc_buf_size = {}", config.vault.enc_buf_size);
    let _ = writeln!(out);
    let _ = writeln!(out, "[remote]");
    let _ = writeln!(out, "type = {}", config.remote.kind);
    let _ = writeln!(out, "host = {}", config.remote.host);
    let _ = writeln!(out, "port = {}", config.remote.port);
    let _ = writeln!(out, "concurrency = {}", config.remote.concurrency);
    if let Some(auth) = &config.remote.auth {
        let _ = writeln!(out, "auth = {}", auth);
    }
    if let Some(username) = &config.remote.username {
        let _ = writeln!(out, "username = {}", username);
    }
    if let Some(password) = &config.remote.password {
        let _ = writeln!(out, "password = {}", password);
    }
    if let Some(folder) = &config.remote.folder {
        let _ = writeln!(out, "folder = {}", folder);
    }
    out
}

/// Writes the configuration file, creating parent directories.
pub async fn save_config(config: &VaultConfig, path: &Path) -> Result<(), SyncError> {
    config.validate()?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| SyncError::io_error(format!("cannot create {}: {}", parent.display(), e)))?;
    }
    tokio::fs::write(path, render_ini(config))
        .await
        .map_err(|e| SyncError::io_error(format!("cannot write {}: {}", path.display(), e)))
}
