// /////////////////////////////////////////////////////////////////////////////
// Syncrypt RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

// Production code safety enforced via CI
// (lib checked separately from tests - tests may use unwrap/expect)

//! # Syncrypt
//!
//! Client-side sync engine for end-to-end encrypted vaults. A vault is a
//! local directory whose files are wrapped into content-addressed,
//! symmetrically-encrypted objects; the per-file key is itself wrapped under
//! the vault's RSA key. The server stores ciphertext, opaque hashes, and
//! signed revision records, never plaintext, paths, or keys.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Application Layer                          │
//! │  (Vault, Bundle lifecycle, push/pull/clone orchestration)   │
//! └─────────────────────────────────────────────────────────────┘
//!                                │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Domain Layer                             │
//! │  (Identity, Revision chain, FileInfo, hashes, errors)       │
//! └─────────────────────────────────────────────────────────────┘
//!                                │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                Infrastructure Layer                         │
//! │  (Pipes, binary/local backends, revision store, runtime)    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Core Concepts
//!
//! ### Pipes
//! Pull-driven async byte transformers composed into streamed pipelines.
//! Upload runs `FileReader → SnappyCompress → Buffered → PadAes →
//! EncryptAes`; download runs the inverse into an atomically-committed file
//! sink. Memory stays bounded by the configured buffer size regardless of
//! file size.
//!
//! ### Bundles
//! Per-file sync records: a path-derived store hash identifies the file
//! remotely, a key-mixed crypt hash serves as the opaque content-equality
//! token, and a debounced update pipeline keeps both current as the file
//! changes.
//!
//! ### Revision Log
//! Every vault mutation is a signed, parent-linked revision. Replaying the
//! log from `CreateVault` reconstructs the vault, including on a machine
//! that has never seen it (clone).
//!
//! ### Backends
//! A bounded connection pool to the binary protocol server, or a local
//! directory store with identical semantics for tests and offline use.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use syncrypt::application::services::{open_vault, push, pull};
//!
//! let vault = open_vault("/home/user/Documents/notes").await?;
//! push(&vault).await?;   // upload changes, append revisions
//! pull(&vault).await?;   // replay remote revisions, download payloads
//! vault.schedule_update("notes/today.md").await?;  // watcher entry point
//! ```

pub mod application;
pub mod infrastructure;

// Re-export the domain crate under its conventional name
pub use syncrypt_domain as domain;

// Primary entry points
pub use application::services::{
    add_user, clone_vault, open_vault, pull, push, wipe, Bundle, PullReport, PushReport, Vault,
};
pub use domain::{SyncError, SyncEvent};
