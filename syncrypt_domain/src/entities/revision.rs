// /////////////////////////////////////////////////////////////////////////////
// Syncrypt RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Revision Entity
//!
//! A revision is one signed, parent-linked operation record in a vault's
//! append-only history. The log is the single source of truth for what a
//! vault contains: replaying it from the genesis `CreateVault` record
//! reconstructs the full file set, the metadata, and the set of trusted
//! signer keys, which is what makes multi-user cloning from scratch possible.
//!
//! ## Shape Invariants
//!
//! - `CreateVault` is the only operation without a parent, and it can only
//!   appear as the first record of a chain
//! - every other revision names exactly one parent, forming a linear chain
//! - every revision is signed over its canonical message, and the signer's
//!   fingerprint must resolve to a key that was trusted *at that point in
//!   the chain* (the genesis user key, extended by `AddUserKey`)
//!
//! ## Canonical Message
//!
//! The signature covers `tag | parent | per-op fields` joined by `|`, per
//! operation. `SetMetadata` follows the same scheme as `Upload`
//! (tag, parent, payload). Identifiers are covered as their UTF-8 bytes,
//! binary payloads as raw bytes.
//!
//! [`ChainVerifier`] is the replay-side counterpart: it consumes revisions in
//! order, enforces the invariants above, and accumulates the trusted key set.

use chrono::{DateTime, Utc};
use rsa::RsaPublicKey;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::entities::identity::{self, Identity};
use crate::error::SyncError;

/// Operation discriminator, rendered with the stable `OP_*` tags that the
/// canonical message and the wire format use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RevisionOp {
    CreateVault,
    Upload,
    SetMetadata,
    DeleteFile,
    RenameFile,
    AddUser,
    AddUserKey,
}

impl RevisionOp {
    pub fn tag(&self) -> &'static str {
        match self {
            RevisionOp::CreateVault => "OP_CREATE_VAULT",
            RevisionOp::Upload => "OP_UPLOAD",
            RevisionOp::SetMetadata => "OP_SET_METADATA",
            RevisionOp::DeleteFile => "OP_DELETE_FILE",
            RevisionOp::RenameFile => "OP_RENAME_FILE",
            RevisionOp::AddUser => "OP_ADD_USER",
            RevisionOp::AddUserKey => "OP_ADD_USER_KEY",
        }
    }
}

/// Operation-specific payload of a revision.
///
/// The variants make the per-operation field requirements structural: an
/// `Upload` without a crypt hash is unrepresentable rather than invalid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RevisionBody {
    #[serde(rename = "OP_CREATE_VAULT")]
    CreateVault {
        #[serde(with = "serde_bytes")]
        vault_public_key: Vec<u8>,
        #[serde(with = "serde_bytes")]
        user_public_key: Vec<u8>,
    },
    #[serde(rename = "OP_UPLOAD")]
    Upload {
        file_hash: String,
        crypt_hash: String,
        file_size_crypt: u64,
        #[serde(with = "serde_bytes")]
        metadata: Vec<u8>,
    },
    #[serde(rename = "OP_SET_METADATA")]
    SetMetadata {
        #[serde(with = "serde_bytes")]
        metadata: Vec<u8>,
    },
    #[serde(rename = "OP_DELETE_FILE")]
    DeleteFile { file_hash: String },
    #[serde(rename = "OP_RENAME_FILE")]
    RenameFile { old_path: String, new_path: String },
    #[serde(rename = "OP_ADD_USER")]
    AddUser { email: String },
    #[serde(rename = "OP_ADD_USER_KEY")]
    AddUserKey {
        email: String,
        #[serde(with = "serde_bytes")]
        public_key: Vec<u8>,
    },
}

impl RevisionBody {
    pub fn operation(&self) -> RevisionOp {
        match self {
            RevisionBody::CreateVault { .. } => RevisionOp::CreateVault,
            RevisionBody::Upload { .. } => RevisionOp::Upload,
            RevisionBody::SetMetadata { .. } => RevisionOp::SetMetadata,
            RevisionBody::DeleteFile { .. } => RevisionOp::DeleteFile,
            RevisionBody::RenameFile { .. } => RevisionOp::RenameFile,
            RevisionBody::AddUser { .. } => RevisionOp::AddUser,
            RevisionBody::AddUserKey { .. } => RevisionOp::AddUserKey,
        }
    }
}

/// One record of the append-only vault history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Revision {
    pub revision_id: String,
    pub parent_id: Option<String>,
    pub vault_id: String,
    pub created_at: DateTime<Utc>,
    pub user_fingerprint: String,
    #[serde(with = "serde_bytes")]
    pub signature: Vec<u8>,
    pub body: RevisionBody,
}

impl Revision {
    /// Builds an unsigned revision; `sign` must be called before the record
    /// leaves the process.
    pub fn new(vault_id: impl Into<String>, parent_id: Option<String>, body: RevisionBody) -> Self {
        Self {
            revision_id: uuid::Uuid::new_v4().to_string(),
            parent_id,
            vault_id: vault_id.into(),
            created_at: Utc::now(),
            user_fingerprint: String::new(),
            signature: Vec::new(),
            body,
        }
    }

    pub fn operation(&self) -> RevisionOp {
        self.body.operation()
    }

    /// Checks the shape invariants that hold independent of chain position.
    pub fn assert_valid(&self) -> Result<(), SyncError> {
        if self.vault_id.is_empty() {
            return Err(SyncError::invalid_revision("missing vault_id"));
        }
        if self.revision_id.is_empty() {
            return Err(SyncError::invalid_revision("missing revision_id"));
        }
        match (&self.parent_id, self.operation()) {
            (Some(_), RevisionOp::CreateVault) => {
                return Err(SyncError::invalid_revision(
                    "OP_CREATE_VAULT is not allowed to have a parent_id",
                ));
            }
            (None, op) if op != RevisionOp::CreateVault => {
                return Err(SyncError::invalid_revision(format!(
                    "{} requires a parent_id",
                    op.tag()
                )));
            }
            _ => {}
        }
        match &self.body {
            RevisionBody::CreateVault {
                vault_public_key,
                user_public_key,
            } => {
                if vault_public_key.is_empty() || user_public_key.is_empty() {
                    return Err(SyncError::invalid_revision(
                        "OP_CREATE_VAULT requires vault and user public keys",
                    ));
                }
            }
            RevisionBody::Upload { file_hash, crypt_hash, .. } => {
                if file_hash.is_empty() || crypt_hash.is_empty() {
                    return Err(SyncError::invalid_revision("OP_UPLOAD requires file_hash and crypt_hash"));
                }
            }
            RevisionBody::DeleteFile { file_hash } => {
                if file_hash.is_empty() {
                    return Err(SyncError::invalid_revision("OP_DELETE_FILE requires file_hash"));
                }
            }
            RevisionBody::RenameFile { old_path, new_path } => {
                if old_path.is_empty() || new_path.is_empty() {
                    return Err(SyncError::invalid_revision("OP_RENAME_FILE requires both paths"));
                }
            }
            RevisionBody::AddUser { email } | RevisionBody::AddUserKey { email, .. } => {
                if email.is_empty() {
                    return Err(SyncError::invalid_revision("user operations require an email"));
                }
                if let RevisionBody::AddUserKey { public_key, .. } = &self.body {
                    if public_key.is_empty() {
                        return Err(SyncError::invalid_revision("OP_ADD_USER_KEY requires a public key"));
                    }
                }
            }
            RevisionBody::SetMetadata { .. } => {}
        }
        Ok(())
    }

    /// Canonical byte message covered by the signature.
    fn message(&self) -> Vec<u8> {
        const SEP: &[u8] = b"|";
        let mut message: Vec<u8> = self.operation().tag().as_bytes().to_vec();
        let parent = self.parent_id.as_deref().unwrap_or("");
        match &self.body {
            RevisionBody::CreateVault {
                vault_public_key,
                user_public_key,
            } => {
                message.extend_from_slice(SEP);
                message.extend_from_slice(vault_public_key);
                message.extend_from_slice(SEP);
                message.extend_from_slice(user_public_key);
            }
            RevisionBody::Upload {
                file_hash,
                crypt_hash,
                file_size_crypt,
                metadata,
            } => {
                message.extend_from_slice(SEP);
                message.extend_from_slice(parent.as_bytes());
                message.extend_from_slice(SEP);
                message.extend_from_slice(file_hash.as_bytes());
                message.extend_from_slice(SEP);
                message.extend_from_slice(crypt_hash.as_bytes());
                message.extend_from_slice(SEP);
                message.extend_from_slice(file_size_crypt.to_string().as_bytes());
                message.extend_from_slice(SEP);
                message.extend_from_slice(metadata);
            }
            RevisionBody::SetMetadata { metadata } => {
                message.extend_from_slice(SEP);
                message.extend_from_slice(parent.as_bytes());
                message.extend_from_slice(SEP);
                message.extend_from_slice(metadata);
            }
            RevisionBody::DeleteFile { file_hash } => {
                message.extend_from_slice(SEP);
                message.extend_from_slice(parent.as_bytes());
                message.extend_from_slice(SEP);
                message.extend_from_slice(file_hash.as_bytes());
            }
            RevisionBody::RenameFile { old_path, new_path } => {
                message.extend_from_slice(SEP);
                message.extend_from_slice(parent.as_bytes());
                message.extend_from_slice(SEP);
                message.extend_from_slice(old_path.as_bytes());
                message.extend_from_slice(SEP);
                message.extend_from_slice(new_path.as_bytes());
            }
            RevisionBody::AddUser { email } => {
                message.extend_from_slice(SEP);
                message.extend_from_slice(parent.as_bytes());
                message.extend_from_slice(SEP);
                message.extend_from_slice(email.as_bytes());
            }
            RevisionBody::AddUserKey { email, public_key } => {
                message.extend_from_slice(SEP);
                message.extend_from_slice(parent.as_bytes());
                message.extend_from_slice(SEP);
                message.extend_from_slice(email.as_bytes());
                message.extend_from_slice(SEP);
                message.extend_from_slice(public_key);
            }
        }
        message
    }

    /// Validates the shape, stamps the signer fingerprint, and signs.
    pub fn sign(&mut self, identity: &Identity) -> Result<(), SyncError> {
        self.user_fingerprint = identity.fingerprint();
        self.assert_valid()?;
        self.signature = identity.sign(&self.message())?;
        Ok(())
    }

    /// Verifies the signature against a resolved public key.
    pub fn verify(&self, public_key: &RsaPublicKey) -> Result<(), SyncError> {
        self.assert_valid()?;
        if self.signature.is_empty() {
            return Err(SyncError::invalid_revision("revision is not signed"));
        }
        if !identity::verify_with_key(public_key, &self.message(), &self.signature) {
            return Err(SyncError::invalid_revision(format!(
                "signature verification failed for signer {}",
                self.user_fingerprint
            )));
        }
        Ok(())
    }

    pub fn to_msgpack(&self) -> Result<Vec<u8>, SyncError> {
        rmp_serde::to_vec_named(self)
            .map_err(|e| SyncError::serialization(format!("cannot encode revision: {}", e)))
    }

    pub fn from_msgpack(bytes: &[u8]) -> Result<Self, SyncError> {
        rmp_serde::from_slice(bytes)
            .map_err(|e| SyncError::corrupt(format!("cannot decode revision: {}", e)))
    }
}

/// Replay-side validator for a linear revision chain.
///
/// Feed revisions in order with [`ChainVerifier::verify_and_advance`]; the
/// verifier enforces parent linkage, signer trust at the current prefix, and
/// signatures, while accumulating the trusted key set.
#[derive(Debug, Default)]
pub struct ChainVerifier {
    vault_id: Option<String>,
    last_id: Option<String>,
    trusted: HashMap<String, RsaPublicKey>,
}

impl ChainVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Identifier of the last accepted revision, if any
    pub fn last_id(&self) -> Option<&str> {
        self.last_id.as_deref()
    }

    /// Whether a signer fingerprint is currently trusted
    pub fn is_trusted(&self, fingerprint: &str) -> bool {
        self.trusted.contains_key(fingerprint)
    }

    /// Validates the next revision of the chain and advances the state.
    pub fn verify_and_advance(&mut self, revision: &Revision) -> Result<(), SyncError> {
        revision.assert_valid()?;

        match (&self.last_id, &revision.parent_id) {
            (None, None) => {}
            (Some(last), Some(parent)) if last == parent => {}
            (None, Some(parent)) => {
                return Err(SyncError::invalid_revision(format!(
                    "chain starts at parent {} instead of OP_CREATE_VAULT",
                    parent
                )));
            }
            (Some(_), None) => {
                return Err(SyncError::invalid_revision("second OP_CREATE_VAULT in chain"));
            }
            (Some(last), Some(parent)) => {
                return Err(SyncError::invalid_revision(format!(
                    "parent {} does not match chain head {}",
                    parent, last
                )));
            }
        }

        if let Some(vault_id) = &self.vault_id {
            if *vault_id != revision.vault_id {
                return Err(SyncError::invalid_revision(format!(
                    "revision belongs to vault {} not {}",
                    revision.vault_id, vault_id
                )));
            }
        }

        // Resolve the signer key. The genesis revision introduces its own
        // signer; everything later must be signed by an already-trusted key.
        let signer = match &revision.body {
            RevisionBody::CreateVault { user_public_key, .. } => {
                let key = identity::public_key_from_der(user_public_key)?;
                if identity::fingerprint_of(&key) != revision.user_fingerprint {
                    return Err(SyncError::invalid_revision(
                        "genesis signer fingerprint does not match the embedded user key",
                    ));
                }
                key
            }
            _ => self
                .trusted
                .get(&revision.user_fingerprint)
                .cloned()
                .ok_or_else(|| {
                    SyncError::invalid_revision(format!(
                        "signer {} is not trusted at this point in the chain",
                        revision.user_fingerprint
                    ))
                })?,
        };

        revision.verify(&signer)?;

        // Accepted: advance state and extend trust.
        match &revision.body {
            RevisionBody::CreateVault { user_public_key, .. } => {
                let key = identity::public_key_from_der(user_public_key)?;
                self.trusted.insert(identity::fingerprint_of(&key), key);
            }
            RevisionBody::AddUserKey { public_key, .. } => {
                let key = identity::public_key_from_der(public_key)?;
                self.trusted.insert(identity::fingerprint_of(&key), key);
            }
            _ => {}
        }
        self.vault_id = Some(revision.vault_id.clone());
        self.last_id = Some(revision.revision_id.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn genesis(vault: &Identity, user: &Identity) -> Revision {
        let mut rev = Revision::new(
            "vault-1",
            None,
            RevisionBody::CreateVault {
                vault_public_key: vault.public_key_der().unwrap(),
                user_public_key: user.public_key_der().unwrap(),
            },
        );
        rev.sign(user).unwrap();
        rev
    }

    fn upload(parent: &str, user: &Identity) -> Revision {
        let mut rev = Revision::new(
            "vault-1",
            Some(parent.to_string()),
            RevisionBody::Upload {
                file_hash: "aa".repeat(32),
                crypt_hash: "bb".repeat(32),
                file_size_crypt: 1024,
                metadata: vec![1, 2, 3],
            },
        );
        rev.sign(user).unwrap();
        rev
    }

    #[test]
    fn test_shape_genesis_must_not_have_parent() {
        let user = Identity::generate(2048).unwrap();
        let mut rev = genesis(&user, &user);
        rev.parent_id = Some("x".to_string());
        assert!(matches!(rev.assert_valid(), Err(SyncError::InvalidRevision(_))));
    }

    #[test]
    fn test_shape_child_requires_parent() {
        let user = Identity::generate(2048).unwrap();
        let mut rev = upload("p", &user);
        rev.parent_id = None;
        assert!(matches!(rev.assert_valid(), Err(SyncError::InvalidRevision(_))));
    }

    #[test]
    fn test_chain_accepts_valid_sequence() {
        let user = Identity::generate(2048).unwrap();
        let vault = Identity::generate(2048).unwrap();
        let g = genesis(&vault, &user);
        let u = upload(&g.revision_id, &user);

        let mut verifier = ChainVerifier::new();
        verifier.verify_and_advance(&g).unwrap();
        verifier.verify_and_advance(&u).unwrap();
        assert_eq!(verifier.last_id(), Some(u.revision_id.as_str()));
    }

    #[test]
    fn test_chain_rejects_untrusted_signer() {
        let user = Identity::generate(2048).unwrap();
        let vault = Identity::generate(2048).unwrap();
        let stranger = Identity::generate(2048).unwrap();
        let g = genesis(&vault, &user);
        let bad = upload(&g.revision_id, &stranger);

        let mut verifier = ChainVerifier::new();
        verifier.verify_and_advance(&g).unwrap();
        assert!(matches!(
            verifier.verify_and_advance(&bad),
            Err(SyncError::InvalidRevision(_))
        ));
    }

    #[test]
    fn test_chain_rejects_broken_parent_link() {
        let user = Identity::generate(2048).unwrap();
        let vault = Identity::generate(2048).unwrap();
        let g = genesis(&vault, &user);
        let detached = upload("no-such-parent", &user);

        let mut verifier = ChainVerifier::new();
        verifier.verify_and_advance(&g).unwrap();
        assert!(verifier.verify_and_advance(&detached).is_err());
    }

    #[test]
    fn test_chain_extends_trust_via_add_user_key() {
        let user = Identity::generate(2048).unwrap();
        let vault = Identity::generate(2048).unwrap();
        let second = Identity::generate(2048).unwrap();

        let g = genesis(&vault, &user);
        let mut add_key = Revision::new(
            "vault-1",
            Some(g.revision_id.clone()),
            RevisionBody::AddUserKey {
                email: "second@example.com".to_string(),
                public_key: second.public_key_der().unwrap(),
            },
        );
        add_key.sign(&user).unwrap();
        let by_second = upload(&add_key.revision_id, &second);

        let mut verifier = ChainVerifier::new();
        verifier.verify_and_advance(&g).unwrap();
        verifier.verify_and_advance(&add_key).unwrap();
        verifier.verify_and_advance(&by_second).unwrap();
        assert!(verifier.is_trusted(&second.fingerprint()));
    }

    #[test]
    fn test_tampered_field_fails_verification() {
        let user = Identity::generate(2048).unwrap();
        let vault = Identity::generate(2048).unwrap();
        let g = genesis(&vault, &user);
        let mut u = upload(&g.revision_id, &user);
        u.body = RevisionBody::Upload {
            file_hash: "aa".repeat(32),
            crypt_hash: "cc".repeat(32),
            file_size_crypt: 1024,
            metadata: vec![1, 2, 3],
        };

        let mut verifier = ChainVerifier::new();
        verifier.verify_and_advance(&g).unwrap();
        assert!(verifier.verify_and_advance(&u).is_err());
    }

    #[test]
    fn test_msgpack_roundtrip_preserves_signature() {
        let user = Identity::generate(2048).unwrap();
        let vault = Identity::generate(2048).unwrap();
        let g = genesis(&vault, &user);
        let bytes = g.to_msgpack().unwrap();
        let parsed = Revision::from_msgpack(&bytes).unwrap();

        let mut verifier = ChainVerifier::new();
        verifier.verify_and_advance(&parsed).unwrap();
    }
}
