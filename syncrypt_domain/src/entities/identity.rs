// /////////////////////////////////////////////////////////////////////////////
// Syncrypt RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Identity Entity
//!
//! An RSA keypair with the three capabilities the sync protocol needs:
//!
//! - **Fingerprinting**: a stable, shareable digest of the public key, used
//!   as the signer reference in revision records
//! - **Signing / verification**: PKCS#1 v1.5 over SHA-256, covering the
//!   canonical revision messages
//! - **Key wrap**: the public half encrypts file keys and metadata blobs
//!   (performed by the OAEP pipes in the infrastructure layer)
//!
//! Keys persist as PKCS#1 PEM (`id_rsa`, `id_rsa.pub`) under the vault's
//! `.vault/` directory; this entity only deals in PEM/DER strings and bytes,
//! never in file paths.

use rsa::pkcs1::{
    DecodeRsaPrivateKey, DecodeRsaPublicKey, EncodeRsaPrivateKey, EncodeRsaPublicKey, LineEnding,
};
use rsa::{Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};

use crate::error::SyncError;

/// Asymmetric identity of a vault or a user.
#[derive(Debug, Clone)]
pub struct Identity {
    private: RsaPrivateKey,
    public: RsaPublicKey,
}

impl Identity {
    /// Generates a fresh keypair of `bits` modulus size.
    ///
    /// Key generation is slow (seconds for 4096-bit keys); callers run it off
    /// the async runtime.
    pub fn generate(bits: usize) -> Result<Self, SyncError> {
        let private = RsaPrivateKey::new(&mut rand::rngs::OsRng, bits)
            .map_err(|e| SyncError::EncryptionError(format!("RSA key generation failed: {}", e)))?;
        let public = RsaPublicKey::from(&private);
        Ok(Self { private, public })
    }

    /// Loads an identity from PKCS#1 PEM strings.
    pub fn from_pem(private_pem: &str, public_pem: &str) -> Result<Self, SyncError> {
        let private = RsaPrivateKey::from_pkcs1_pem(private_pem)
            .map_err(|e| SyncError::config(format!("cannot parse private key PEM: {}", e)))?;
        let public = RsaPublicKey::from_pkcs1_pem(public_pem)
            .map_err(|e| SyncError::config(format!("cannot parse public key PEM: {}", e)))?;
        Ok(Self { private, public })
    }

    /// Renders the private key as PKCS#1 PEM
    pub fn private_key_pem(&self) -> Result<String, SyncError> {
        self.private
            .to_pkcs1_pem(LineEnding::LF)
            .map(|pem| pem.to_string())
            .map_err(|e| SyncError::internal(format!("cannot encode private key: {}", e)))
    }

    /// Renders the public key as PKCS#1 PEM
    pub fn public_key_pem(&self) -> Result<String, SyncError> {
        self.public
            .to_pkcs1_pem(LineEnding::LF)
            .map_err(|e| SyncError::internal(format!("cannot encode public key: {}", e)))
    }

    /// DER encoding of the public key, the form carried in revision records
    pub fn public_key_der(&self) -> Result<Vec<u8>, SyncError> {
        self.public
            .to_pkcs1_der()
            .map(|doc| doc.as_bytes().to_vec())
            .map_err(|e| SyncError::internal(format!("cannot encode public key: {}", e)))
    }

    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public
    }

    pub fn private_key(&self) -> &RsaPrivateKey {
        &self.private
    }

    /// Hex SHA-256 over the PKCS#1 DER of the public key
    pub fn fingerprint(&self) -> String {
        fingerprint_of(&self.public)
    }

    /// Signs a canonical message with PKCS#1 v1.5 / SHA-256.
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>, SyncError> {
        let digest = Sha256::digest(message);
        self.private
            .sign(Pkcs1v15Sign::new::<Sha256>(), &digest)
            .map_err(|e| SyncError::EncryptionError(format!("signing failed: {}", e)))
    }

    /// Verifies a signature made by this identity
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        verify_with_key(&self.public, message, signature)
    }
}

/// Parses a public key from the DER form carried in revision records.
pub fn public_key_from_der(der: &[u8]) -> Result<RsaPublicKey, SyncError> {
    RsaPublicKey::from_pkcs1_der(der)
        .map_err(|e| SyncError::invalid_revision(format!("cannot parse public key: {}", e)))
}

/// Fingerprint of an arbitrary public key (hex SHA-256 over PKCS#1 DER).
pub fn fingerprint_of(public: &RsaPublicKey) -> String {
    match public.to_pkcs1_der() {
        Ok(doc) => hex::encode(Sha256::digest(doc.as_bytes())),
        // DER encoding of a valid key cannot fail; keep the signature total.
        Err(_) => String::new(),
    }
}

/// Verifies a PKCS#1 v1.5 / SHA-256 signature with an arbitrary public key.
pub fn verify_with_key(public: &RsaPublicKey, message: &[u8], signature: &[u8]) -> bool {
    let digest = Sha256::digest(message);
    public.verify(Pkcs1v15Sign::new::<Sha256>(), &digest, signature).is_ok()
}
