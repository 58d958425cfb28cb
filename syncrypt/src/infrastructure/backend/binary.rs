// /////////////////////////////////////////////////////////////////////////////
// Syncrypt RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Binary Storage Backend
//!
//! TCP backend speaking the framed line+payload protocol through a fixed
//! pool of connections.
//!
//! ## Wire Protocol
//!
//! Request tokens are ASCII lines terminated by CRLF; payload sizes are
//! declared in decimal and read exactly, never guessed:
//!
//! ```text
//! S: Syncrypt <version>\r\n
//! C: AUTH:<token>\r\n                         → SUCCESS | ERROR:<msg>
//! C: LOGIN:<email>:<password>:<vault-id>\r\n  → <token> | ERROR:<msg>
//! C: STAT:<store_hash>\r\n                    → <n>\r\n + n bytes | absent line
//! C: UPLOAD:<hash>:<key_size>:<file_size>:<crypt_hash>\r\n
//!                                             → WAITING, then payloads, then SUCCESS
//! C: DOWNLOAD:<store_hash>\r\n                → <key_size>\r\n <file_size>\r\n + payloads
//! C: PUSH-REVISION:<n>\r\n + n bytes          → SUCCESS | ERROR:<msg>
//! C: FETCH-REVISIONS:<parent|->\r\n           → repeated <n>\r\n + n bytes, then 0\r\n
//! C: WIPE-VAULT\r\n                           → SUCCESS
//! C: DISCONNECT\r\n                           → close
//! ```
//!
//! ## Connection Pool
//!
//! The pool holds `concurrency` slots. Acquisition dials an idle slot first,
//! otherwise waits for any slot to signal availability, re-checks, and
//! retries; waiters wake in FIFO order. A guard owns its slot exclusively
//! until dropped, and the availability signal is restored on every exit
//! path. A connection that desynchronizes mid-exchange (short write after
//! `WAITING`, unparseable frame) is marked broken and discarded on release,
//! so the slot redials instead of replaying garbage.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use syncrypt_domain::{Revision, SyncError, VaultConfig};

use crate::application::services::bundle::Bundle;
use crate::infrastructure::pipes::{FileReader, Pipe};
use crate::infrastructure::runtime::{OpSemaphores, RESOURCE_MANAGER};

use super::{RemoteStat, StorageBackend};

/// Socket read/write chunk size.
const WIRE_BUF_SIZE: usize = 64 * 1024;

/// Upper bound on a framed payload we will buffer whole (stat records,
/// revisions); file bodies stream and are not subject to this.
const MAX_FRAMED_SIZE: usize = 16 * 1024 * 1024;

/// Connection parameters shared by every slot.
struct ConnectSettings {
    host: String,
    port: u16,
    vault_id: Option<String>,
    username: Option<String>,
    password: Option<String>,
    /// Token issued at login; replaces credentials for later sessions.
    auth: Mutex<Option<String>>,
}

/// One authenticated protocol connection.
pub(crate) struct BinaryConnection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    server_version: String,
    broken: bool,
}

impl BinaryConnection {
    async fn connect(settings: &ConnectSettings) -> Result<Self, SyncError> {
        debug!(host = %settings.host, port = settings.port, "connecting to server");
        let stream = TcpStream::connect((settings.host.as_str(), settings.port))
            .await
            .map_err(|e| SyncError::io_error(format!("cannot connect to {}:{}: {}", settings.host, settings.port, e)))?;
        let (read_half, write_half) = stream.into_split();
        let mut conn = Self {
            reader: BufReader::new(read_half),
            writer: write_half,
            server_version: String::new(),
            broken: false,
        };

        // Greeting: "Syncrypt <version>"
        let greeting = conn.read_line().await?;
        conn.server_version = greeting
            .strip_prefix("Syncrypt ")
            .ok_or_else(|| SyncError::protocol(format!("unexpected greeting: {:?}", greeting)))?
            .to_string();

        let token = settings.auth.lock().expect("auth lock poisoned").clone();
        match token {
            Some(token) => {
                conn.write_line(&format!("AUTH:{}", token)).await?;
                let line = conn.read_line().await?;
                if line != "SUCCESS" {
                    let _ = conn.disconnect().await;
                    return Err(SyncError::invalid_auth(line));
                }
            }
            None => {
                debug!("no auth token, logging in");
                let username = settings
                    .username
                    .clone()
                    .ok_or_else(|| SyncError::invalid_auth("no auth token and no credentials configured"))?;
                let password = settings.password.clone().unwrap_or_default();
                let vault_id = settings.vault_id.clone().unwrap_or_else(|| "-".to_string());
                conn.write_line(&format!("LOGIN:{}:{}:{}", username, password, vault_id)).await?;
                let line = conn.read_line().await?;
                let first = line.split(':').next().unwrap_or("");
                if first.is_empty() || first == "ERROR" {
                    let _ = conn.disconnect().await;
                    return Err(SyncError::invalid_auth(line));
                }
                *settings.auth.lock().expect("auth lock poisoned") = Some(first.to_string());
            }
        }
        Ok(conn)
    }

    pub(crate) fn server_version(&self) -> &str {
        &self.server_version
    }

    fn mark_broken(&mut self) {
        self.broken = true;
    }

    async fn read_line(&mut self) -> Result<String, SyncError> {
        let mut line = String::new();
        let n = self
            .reader
            .read_line(&mut line)
            .await
            .map_err(|e| SyncError::io_error(format!("socket read failed: {}", e)))?;
        if n == 0 {
            self.broken = true;
            return Err(SyncError::protocol("connection closed by server"));
        }
        Ok(line.trim_end_matches(|c| c == '\r' || c == '\n').to_string())
    }

    async fn write_line(&mut self, line: &str) -> Result<(), SyncError> {
        self.writer
            .write_all(format!("{}\r\n", line).as_bytes())
            .await
            .map_err(|e| SyncError::io_error(format!("socket write failed: {}", e)))?;
        self.writer
            .flush()
            .await
            .map_err(|e| SyncError::io_error(format!("socket flush failed: {}", e)))
    }

    async fn read_exact_vec(&mut self, len: usize) -> Result<Vec<u8>, SyncError> {
        let mut buf = vec![0u8; len];
        if let Err(e) = self.reader.read_exact(&mut buf).await {
            self.broken = true;
            return Err(SyncError::protocol(format!("short payload read: {}", e)));
        }
        Ok(buf)
    }

    /// Reads up to `max` body bytes, returning whatever the socket yields.
    async fn read_chunk(&mut self, max: usize) -> Result<Vec<u8>, SyncError> {
        let mut buf = vec![0u8; max];
        let n = self
            .reader
            .read(&mut buf)
            .await
            .map_err(|e| SyncError::io_error(format!("socket read failed: {}", e)))?;
        if n == 0 {
            self.broken = true;
            return Err(SyncError::protocol("connection closed mid-payload"));
        }
        buf.truncate(n);
        Ok(buf)
    }

    /// Streams a pipe to the socket, draining each write before the next
    /// read. Returns the byte count sent.
    async fn send_stream(&mut self, pipe: &mut dyn Pipe) -> Result<u64, SyncError> {
        let mut sent = 0u64;
        loop {
            let chunk = pipe.read().await?;
            if chunk.is_empty() {
                return Ok(sent);
            }
            self.writer
                .write_all(&chunk)
                .await
                .map_err(|e| SyncError::io_error(format!("socket write failed: {}", e)))?;
            self.writer
                .flush()
                .await
                .map_err(|e| SyncError::io_error(format!("socket flush failed: {}", e)))?;
            sent += chunk.len() as u64;
        }
    }

    async fn expect_success(&mut self) -> Result<(), SyncError> {
        let line = self.read_line().await?;
        if line == "SUCCESS" {
            Ok(())
        } else if let Some(msg) = line.strip_prefix("ERROR:") {
            Err(SyncError::protocol(format!("server error: {}", msg)))
        } else {
            self.broken = true;
            Err(SyncError::protocol(format!("unexpected response: {:?}", line)))
        }
    }

    async fn stat(&mut self, store_hash: &str) -> Result<Option<RemoteStat>, SyncError> {
        self.write_line(&format!("STAT:{}", store_hash)).await?;
        let line = self.read_line().await?;
        let byte_count: usize = match line.parse() {
            Ok(n) => n,
            // Any non-numeric line means the object is absent.
            Err(_) => return Ok(None),
        };
        if byte_count > MAX_FRAMED_SIZE {
            self.broken = true;
            return Err(SyncError::protocol(format!("implausible stat size: {}", byte_count)));
        }
        let bytes = self.read_exact_vec(byte_count).await?;
        let stat = rmp_serde::from_slice(&bytes)
            .map_err(|e| SyncError::corrupt(format!("cannot decode stat record: {}", e)))?;
        Ok(Some(stat))
    }

    async fn upload(
        &mut self,
        store_hash: &str,
        key_size_crypt: u64,
        file_size_crypt: u64,
        crypt_hash: &str,
        key_pipe: &mut dyn Pipe,
        body_pipe: &mut dyn Pipe,
    ) -> Result<(), SyncError> {
        self.write_line(&format!(
            "UPLOAD:{}:{}:{}:{}",
            store_hash, key_size_crypt, file_size_crypt, crypt_hash
        ))
        .await?;
        let line = self.read_line().await?;
        if line != "WAITING" {
            if let Some(msg) = line.strip_prefix("ERROR:") {
                return Err(SyncError::protocol(format!("server refused upload: {}", msg)));
            }
            self.broken = true;
            return Err(SyncError::protocol(format!("expected WAITING, got {:?}", line)));
        }

        debug!(key_bytes = key_size_crypt, body_bytes = file_size_crypt, "uploading key and content");
        // Past WAITING the server expects exactly the declared byte counts;
        // any interruption desynchronizes this connection for good.
        let sent = match self.send_stream(key_pipe).await {
            Ok(sent) => sent,
            Err(e) => {
                self.broken = true;
                return Err(e);
            }
        };
        if sent != key_size_crypt {
            self.broken = true;
            return Err(SyncError::protocol(format!(
                "wrapped key is {} bytes, declared {}",
                sent, key_size_crypt
            )));
        }
        let sent = match self.send_stream(body_pipe).await {
            Ok(sent) => sent,
            Err(e) => {
                self.broken = true;
                return Err(e);
            }
        };
        if sent != file_size_crypt {
            self.broken = true;
            return Err(SyncError::protocol(format!(
                "encrypted body is {} bytes, declared {}",
                sent, file_size_crypt
            )));
        }
        self.expect_success().await
    }

    /// Sends the download request and returns the declared payload sizes.
    async fn download(&mut self, store_hash: &str) -> Result<(u64, u64), SyncError> {
        self.write_line(&format!("DOWNLOAD:{}", store_hash)).await?;
        let key_size = self.read_size_line().await?;
        let file_size = self.read_size_line().await?;
        Ok((key_size, file_size))
    }

    async fn read_size_line(&mut self) -> Result<u64, SyncError> {
        let line = self.read_line().await?;
        line.parse().map_err(|_| {
            self.broken = true;
            SyncError::protocol(format!("expected size line, got {:?}", line))
        })
    }

    async fn push_revision(&mut self, bytes: &[u8]) -> Result<(), SyncError> {
        self.write_line(&format!("PUSH-REVISION:{}", bytes.len())).await?;
        self.writer
            .write_all(bytes)
            .await
            .map_err(|e| SyncError::io_error(format!("socket write failed: {}", e)))?;
        self.writer
            .flush()
            .await
            .map_err(|e| SyncError::io_error(format!("socket flush failed: {}", e)))?;
        self.expect_success().await
    }

    async fn fetch_revisions(&mut self, since: Option<&str>) -> Result<Vec<Revision>, SyncError> {
        self.write_line(&format!("FETCH-REVISIONS:{}", since.unwrap_or("-"))).await?;
        let mut revisions = Vec::new();
        loop {
            let len = self.read_size_line().await? as usize;
            if len == 0 {
                return Ok(revisions);
            }
            if len > MAX_FRAMED_SIZE {
                self.broken = true;
                return Err(SyncError::protocol(format!("implausible revision size: {}", len)));
            }
            let bytes = self.read_exact_vec(len).await?;
            revisions.push(Revision::from_msgpack(&bytes)?);
        }
    }

    async fn wipe(&mut self) -> Result<(), SyncError> {
        self.write_line("WIPE-VAULT").await?;
        self.expect_success().await
    }

    async fn disconnect(&mut self) -> Result<(), SyncError> {
        self.write_line("DISCONNECT").await
    }
}

type Slot = Arc<tokio::sync::Mutex<Option<BinaryConnection>>>;

/// Fixed-size pool of protocol connections.
struct ConnectionManager {
    slots: Vec<Slot>,
    available: Arc<Notify>,
    settings: Arc<ConnectSettings>,
}

impl ConnectionManager {
    fn new(settings: ConnectSettings, concurrency: usize) -> Self {
        Self {
            slots: (0..concurrency)
                .map(|_| Arc::new(tokio::sync::Mutex::new(None)))
                .collect(),
            available: Arc::new(Notify::new()),
            settings: Arc::new(settings),
        }
    }

    /// Returns a connected slot for exclusive use.
    async fn acquire(&self) -> Result<ConnectionGuard, SyncError> {
        loop {
            // Register before scanning so a release between scan and wait
            // cannot be missed.
            let notified = self.available.notified();

            let mut idle = None;
            let mut ready = None;
            for slot in &self.slots {
                if let Ok(guard) = slot.clone().try_lock_owned() {
                    if guard.is_some() {
                        if ready.is_none() {
                            ready = Some(guard);
                        }
                    } else if idle.is_none() {
                        idle = Some(guard);
                    }
                }
            }

            // Dial an idle slot first.
            if let Some(mut guard) = idle {
                drop(ready);
                match BinaryConnection::connect(&self.settings).await {
                    Ok(conn) => {
                        *guard = Some(conn);
                        return Ok(ConnectionGuard {
                            guard: Some(guard),
                            available: self.available.clone(),
                        });
                    }
                    Err(e) => {
                        // Slot returns to idle; wake a waiter so the failed
                        // dial does not starve anyone.
                        drop(guard);
                        self.available.notify_one();
                        return Err(e);
                    }
                }
            }
            if let Some(guard) = ready {
                return Ok(ConnectionGuard {
                    guard: Some(guard),
                    available: self.available.clone(),
                });
            }
            notified.await;
        }
    }
}

/// Exclusive lease on one pool slot; restores availability on drop.
pub(crate) struct ConnectionGuard {
    guard: Option<tokio::sync::OwnedMutexGuard<Option<BinaryConnection>>>,
    available: Arc<Notify>,
}

impl ConnectionGuard {
    pub(crate) fn conn(&mut self) -> &mut BinaryConnection {
        self.guard
            .as_mut()
            .and_then(|slot| slot.as_mut())
            .expect("guard always holds a connection")
    }

    pub(crate) fn mark_broken(&mut self) {
        if let Some(conn) = self.guard.as_mut().and_then(|slot| slot.as_mut()) {
            conn.broken = true;
        }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if let Some(mut slot) = self.guard.take() {
            if slot.as_ref().map(|c| c.broken).unwrap_or(false) {
                debug!("discarding desynchronized connection");
                *slot = None;
            }
            // The slot lock must be released before waiters are woken, or a
            // woken waiter can find it still held and sleep forever.
            drop(slot);
        }
        self.available.notify_one();
    }
}

/// Streams the declared body bytes of a DOWNLOAD exchange as a pipe.
///
/// Holds the connection for the duration of the body; an incomplete read at
/// finalization marks the connection broken, because the unread remainder
/// would desynchronize the next exchange.
struct ConnectionBody {
    guard: Option<ConnectionGuard>,
    remaining: u64,
}

#[async_trait]
impl Pipe for ConnectionBody {
    async fn read(&mut self) -> Result<Vec<u8>, SyncError> {
        if self.remaining == 0 {
            self.guard = None;
            return Ok(Vec::new());
        }
        let guard = self
            .guard
            .as_mut()
            .ok_or_else(|| SyncError::internal("connection body read after release"))?;
        let max = self.remaining.min(WIRE_BUF_SIZE as u64) as usize;
        let chunk = guard.conn().read_chunk(max).await?;
        self.remaining -= chunk.len() as u64;
        if self.remaining == 0 {
            self.guard = None;
        }
        Ok(chunk)
    }

    async fn finalize(&mut self) -> Result<(), SyncError> {
        if self.remaining > 0 {
            if let Some(guard) = self.guard.as_mut() {
                guard.mark_broken();
            }
        }
        self.guard = None;
        Ok(())
    }
}

/// TCP storage backend: connection pool plus per-vault operation limits.
pub struct BinaryBackend {
    manager: ConnectionManager,
    ops: Arc<OpSemaphores>,
}

impl BinaryBackend {
    pub fn new(config: &VaultConfig, ops: Arc<OpSemaphores>) -> Self {
        let settings = ConnectSettings {
            host: config.remote.host.clone(),
            port: config.remote.port,
            vault_id: config.vault.id.clone(),
            username: config.remote.username.clone(),
            password: config.remote.password.clone(),
            auth: Mutex::new(config.remote.auth.clone()),
        };
        Self {
            manager: ConnectionManager::new(settings, config.remote.concurrency as usize),
            ops,
        }
    }
}

#[async_trait]
impl StorageBackend for BinaryBackend {
    async fn open(&self) -> Result<(), SyncError> {
        let mut guard = self.manager.acquire().await?;
        info!(version = %guard.conn().server_version(), "logged in to server");
        Ok(())
    }

    async fn stat(&self, bundle: &Bundle) -> Result<(), SyncError> {
        let store_hash = bundle.store_hash().to_string();
        let _op = self.ops.stat.acquire(&store_hash).await?;
        let mut guard = self.manager.acquire().await?;
        debug!(bundle = %bundle.relpath(), "stat");
        let stat = guard.conn().stat(&store_hash).await?;
        bundle.set_remote_crypt_hash(stat.and_then(|s| s.content_hash));
        Ok(())
    }

    async fn upload(&self, bundle: &Bundle) -> Result<(), SyncError> {
        let store_hash = bundle.store_hash().to_string();
        let _op = self.ops.upload.acquire(&store_hash).await?;

        let (key_size_crypt, file_size_crypt, crypt_hash) = bundle.upload_header()?;
        let mut key_pipe = FileReader::new(bundle.path_fileinfo()?);
        let mut body_pipe = bundle.read_encrypted_stream()?;

        let mut guard = self.manager.acquire().await?;
        let _cipher = RESOURCE_MANAGER.acquire_cipher().await?;
        info!(bundle = %bundle.relpath(), bytes = file_size_crypt, "uploading");

        let result = guard
            .conn()
            .upload(
                &store_hash,
                key_size_crypt,
                file_size_crypt,
                &crypt_hash,
                &mut key_pipe,
                &mut *body_pipe,
            )
            .await;
        let _ = key_pipe.finalize().await;
        let _ = body_pipe.finalize().await;
        result?;

        bundle.set_remote_crypt_hash(Some(crypt_hash));
        Ok(())
    }

    async fn download(&self, bundle: &Bundle) -> Result<(), SyncError> {
        let store_hash = bundle.store_hash().to_string();
        let _op = self.ops.download.acquire(&store_hash).await?;
        let mut guard = self.manager.acquire().await?;
        info!(bundle = %bundle.relpath(), "downloading");

        let (key_size, file_size) = guard.conn().download(&store_hash).await?;
        if key_size as usize > MAX_FRAMED_SIZE {
            guard.mark_broken();
            return Err(SyncError::protocol(format!("implausible key size: {}", key_size)));
        }
        let key_bytes = guard.conn().read_exact_vec(key_size as usize).await?;
        bundle.install_fileinfo(&key_bytes).await?;
        bundle.load_key().await?;

        let assert_hash = bundle.remote_crypt_hash();
        let body = ConnectionBody {
            guard: Some(guard),
            remaining: file_size,
        };
        let matched = bundle.write_encrypted_stream(Box::new(body), assert_hash).await?;
        if !matched {
            warn!(bundle = %bundle.relpath(), "downloaded content failed hash verification");
            return Err(SyncError::corrupt(format!(
                "downloaded content hash mismatch for {}",
                bundle.relpath()
            )));
        }
        Ok(())
    }

    async fn push_revision(&self, revision: &Revision) -> Result<(), SyncError> {
        let mut guard = self.manager.acquire().await?;
        info!(revision = %revision.revision_id, op = revision.operation().tag(), "pushing revision");
        guard.conn().push_revision(&revision.to_msgpack()?).await
    }

    async fn fetch_revisions(&self, since: Option<&str>) -> Result<Vec<Revision>, SyncError> {
        let mut guard = self.manager.acquire().await?;
        guard.conn().fetch_revisions(since).await
    }

    async fn wipe(&self) -> Result<(), SyncError> {
        let mut guard = self.manager.acquire().await?;
        guard.conn().wipe().await
    }

    fn auth_token(&self) -> Option<String> {
        self.manager.settings.auth.lock().expect("auth lock poisoned").clone()
    }
}
