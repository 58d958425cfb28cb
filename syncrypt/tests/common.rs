// /////////////////////////////////////////////////////////////////////////////
// Syncrypt RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Common Test Helpers
//!
//! Vault fixtures and an in-process mock of the binary protocol server.
//! Tests use small (2048-bit) vault keys; production defaults to 4096.

#![allow(dead_code)]

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};

use syncrypt::domain::{Revision, VaultConfig};
use syncrypt::infrastructure::config::save_config;

/// Test keys are 2048-bit to keep key generation fast.
pub const TEST_RSA_BITS: u32 = 2048;

/// Auth token the mock server accepts.
pub const TEST_TOKEN: &str = "test-token";

/// Writes a vault folder configured against a local directory store.
///
/// Returns `(vault_folder, store_folder)`.
pub async fn init_local_vault(root: &Path) -> (PathBuf, PathBuf) {
    syncrypt::infrastructure::logging::init_test_logging();
    let folder = root.join("vault");
    let store = root.join("store");
    tokio::fs::create_dir_all(&folder).await.unwrap();

    let mut config = VaultConfig::default();
    config.vault.rsa_key_len = TEST_RSA_BITS;
    config.remote.kind = "local".to_string();
    config.remote.folder = Some(store.to_string_lossy().into_owned());
    save_config(&config, &folder.join(".vault").join("config")).await.unwrap();
    (folder, store)
}

/// Writes a vault folder configured against a mock binary server.
pub async fn init_binary_vault(root: &Path, addr: SocketAddr, concurrency: u32) -> PathBuf {
    syncrypt::infrastructure::logging::init_test_logging();
    let folder = root.join("vault");
    tokio::fs::create_dir_all(&folder).await.unwrap();

    let mut config = VaultConfig::default();
    config.vault.rsa_key_len = TEST_RSA_BITS;
    config.remote.kind = "binary".to_string();
    config.remote.host = addr.ip().to_string();
    config.remote.port = addr.port();
    config.remote.concurrency = concurrency;
    config.remote.auth = Some(TEST_TOKEN.to_string());
    save_config(&config, &folder.join(".vault").join("config")).await.unwrap();
    folder
}

pub async fn write_file(folder: &Path, relpath: &str, content: &[u8]) {
    let path = folder.join(relpath);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.unwrap();
    }
    tokio::fs::write(path, content).await.unwrap();
}

/// One stored object on the mock server.
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub key: Vec<u8>,
    pub body: Vec<u8>,
    pub crypt_hash: String,
}

#[derive(Serialize, Deserialize)]
struct StatRecord {
    content_hash: String,
    file_size_crypt: u64,
}

/// Shared state of the mock server, inspectable from tests.
#[derive(Default)]
pub struct ServerState {
    pub objects: Mutex<HashMap<String, StoredObject>>,
    pub revisions: Mutex<Vec<(String, Vec<u8>)>>,
    pub uploads: AtomicUsize,
    pub stats: AtomicUsize,
    pub current_connections: AtomicUsize,
    pub peak_connections: AtomicUsize,
}

impl ServerState {
    pub fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    pub fn peak_connections(&self) -> usize {
        self.peak_connections.load(Ordering::SeqCst)
    }

    pub fn revision_ids(&self) -> Vec<String> {
        self.revisions.lock().unwrap().iter().map(|(id, _)| id.clone()).collect()
    }

    pub fn object(&self, store_hash: &str) -> Option<StoredObject> {
        self.objects.lock().unwrap().get(store_hash).cloned()
    }
}

/// Minimal in-process implementation of the wire protocol for tests.
pub struct MockServer {
    pub addr: SocketAddr,
    pub state: Arc<ServerState>,
}

impl MockServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(ServerState::default());

        let accept_state = state.clone();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let state = accept_state.clone();
                tokio::spawn(async move {
                    let _ = handle_connection(stream, state).await;
                });
            }
        });
        Self { addr, state }
    }
}

async fn read_exact(reader: &mut BufReader<OwnedReadHalf>, len: usize) -> std::io::Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(buf)
}

async fn write_line(writer: &mut OwnedWriteHalf, line: &str) -> std::io::Result<()> {
    writer.write_all(format!("{}\r\n", line).as_bytes()).await?;
    writer.flush().await
}

async fn handle_connection(stream: TcpStream, state: Arc<ServerState>) -> std::io::Result<()> {
    let current = state.current_connections.fetch_add(1, Ordering::SeqCst) + 1;
    state.peak_connections.fetch_max(current, Ordering::SeqCst);

    let result = serve(stream, &state).await;
    state.current_connections.fetch_sub(1, Ordering::SeqCst);
    result
}

async fn serve(stream: TcpStream, state: &Arc<ServerState>) -> std::io::Result<()> {
    let (read_half, mut writer) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    write_line(&mut writer, "Syncrypt 0.9.0-test").await?;

    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(());
        }
        let line = line.trim_end();

        if let Some(token) = line.strip_prefix("AUTH:") {
            if token == TEST_TOKEN {
                write_line(&mut writer, "SUCCESS").await?;
            } else {
                write_line(&mut writer, "ERROR:invalid token").await?;
                return Ok(());
            }
        } else if let Some(rest) = line.strip_prefix("LOGIN:") {
            let mut parts = rest.split(':');
            let _email = parts.next().unwrap_or("");
            let password = parts.next().unwrap_or("");
            if password.is_empty() {
                write_line(&mut writer, "ERROR:bad credentials").await?;
                return Ok(());
            }
            write_line(&mut writer, TEST_TOKEN).await?;
        } else if let Some(hash) = line.strip_prefix("STAT:") {
            state.stats.fetch_add(1, Ordering::SeqCst);
            let record = state.objects.lock().unwrap().get(hash).map(|obj| StatRecord {
                content_hash: obj.crypt_hash.clone(),
                file_size_crypt: obj.body.len() as u64,
            });
            match record {
                Some(record) => {
                    let bytes = rmp_serde::to_vec_named(&record).unwrap();
                    write_line(&mut writer, &bytes.len().to_string()).await?;
                    writer.write_all(&bytes).await?;
                    writer.flush().await?;
                }
                None => write_line(&mut writer, "NOT-FOUND").await?,
            }
        } else if let Some(rest) = line.strip_prefix("UPLOAD:") {
            let parts: Vec<&str> = rest.split(':').collect();
            let (hash, key_size, file_size, crypt_hash) = (
                parts[0].to_string(),
                parts[1].parse::<usize>().unwrap(),
                parts[2].parse::<usize>().unwrap(),
                parts[3].to_string(),
            );
            write_line(&mut writer, "WAITING").await?;
            let key = read_exact(&mut reader, key_size).await?;
            let body = read_exact(&mut reader, file_size).await?;
            state
                .objects
                .lock()
                .unwrap()
                .insert(hash, StoredObject { key, body, crypt_hash });
            state.uploads.fetch_add(1, Ordering::SeqCst);
            write_line(&mut writer, "SUCCESS").await?;
        } else if let Some(hash) = line.strip_prefix("DOWNLOAD:") {
            let object = state.objects.lock().unwrap().get(hash).cloned();
            match object {
                Some(object) => {
                    write_line(&mut writer, &object.key.len().to_string()).await?;
                    write_line(&mut writer, &object.body.len().to_string()).await?;
                    writer.write_all(&object.key).await?;
                    writer.write_all(&object.body).await?;
                    writer.flush().await?;
                }
                None => write_line(&mut writer, "ERROR:no such object").await?,
            }
        } else if let Some(len) = line.strip_prefix("PUSH-REVISION:") {
            let bytes = read_exact(&mut reader, len.parse().unwrap()).await?;
            match Revision::from_msgpack(&bytes) {
                Ok(revision) => {
                    let parent_mismatch = {
                        let mut revisions = state.revisions.lock().unwrap();
                        let head = revisions.last().map(|(id, _)| id.clone());
                        if revisions.iter().any(|(id, _)| *id == revision.revision_id) {
                            None
                        } else if revision.parent_id != head {
                            Some(true)
                        } else {
                            revisions.push((revision.revision_id.clone(), bytes));
                            None
                        }
                    };
                    if parent_mismatch == Some(true) {
                        write_line(&mut writer, "ERROR:parent mismatch").await?;
                    } else {
                        write_line(&mut writer, "SUCCESS").await?;
                    }
                }
                Err(_) => write_line(&mut writer, "ERROR:undecodable revision").await?,
            }
        } else if let Some(since) = line.strip_prefix("FETCH-REVISIONS:") {
            let revisions = state.revisions.lock().unwrap().clone();
            let start = if since == "-" {
                0
            } else {
                match revisions.iter().position(|(id, _)| id == since) {
                    Some(pos) => pos + 1,
                    None => {
                        write_line(&mut writer, "ERROR:unknown revision").await?;
                        continue;
                    }
                }
            };
            for (_, bytes) in &revisions[start..] {
                write_line(&mut writer, &bytes.len().to_string()).await?;
                writer.write_all(bytes).await?;
            }
            writer.flush().await?;
            write_line(&mut writer, "0").await?;
        } else if line == "WIPE-VAULT" {
            state.objects.lock().unwrap().clear();
            state.revisions.lock().unwrap().clear();
            write_line(&mut writer, "SUCCESS").await?;
        } else if line == "DISCONNECT" {
            return Ok(());
        } else {
            write_line(&mut writer, "ERROR:unknown command").await?;
            return Ok(());
        }
    }
}
