// /////////////////////////////////////////////////////////////////////////////
// Syncrypt RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Syncrypt Domain
//!
//! Pure business logic of the encrypted-vault sync client: no I/O, no async
//! runtime, no sockets. Everything in this crate can be exercised from a
//! plain unit test.
//!
//! ## What Lives Here
//!
//! ### Value Objects
//! Immutable, self-validating values without identity:
//! - `HashAlgorithm` / `ContentDigest`: digest selection and streaming
//! - `StoreHash`: the path-derived identifier a bundle is known by remotely
//! - `FileKey`: per-file symmetric key material, zeroized on drop
//!
//! ### Entities
//! Objects with identity and lifecycle:
//! - `Identity`: RSA keypair with fingerprinting, signing, verification
//! - `Revision`: signed, parent-linked operation record; `ChainVerifier`
//!   replays and validates linear chains
//! - `FileInfo`: the wrapped-key record stored per bundle
//! - `VaultConfig`: validated `[vault]`/`[remote]` configuration
//!
//! ### Domain Services
//! - `ContentHasher`: running plaintext digest with the file key mixed in at
//!   finalization, producing the crypt hash the server stores as an opaque
//!   equality token
//!
//! ## Security Model
//!
//! The server is honest-but-curious: it sees ciphertext, store hashes
//! (digests of relative paths), crypt hashes (key-mixed content digests),
//! and signed revision records. Nothing in this crate ever hands it
//! plaintext, paths, or unwrapped keys.

pub mod entities;
pub mod error;
pub mod events;
pub mod services;
pub mod value_objects;

// Re-export commonly used types
pub use entities::{
    ChainVerifier, FileInfo, Identity, RemoteSection, Revision, RevisionBody, RevisionOp, VaultConfig,
    VaultSection,
};
pub use error::SyncError;
pub use events::SyncEvent;
pub use services::ContentHasher;
pub use value_objects::{ContentDigest, FileKey, HashAlgorithm, StoreHash};
