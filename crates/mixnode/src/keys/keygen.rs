// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Key pair generation for the local node.
//!
//! Appends an encrypted block to the secret ring and rewrites the
//! published key file that `remailer-key` serves. The key size is fixed:
//! a bigger modulus would produce a session-key ciphertext that no longer
//! fits the 128-byte outer header field.

use crate::error::MixError;
use crate::keys::{codec, pubring, secring};
use crate::packet::KeyId;
use crate::timing;
use rand::rngs::OsRng;
use rsa::RsaPrivateKey;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use tracing::info;

/// Generate a fresh 1024-bit key pair valid for `lifetime_days`.
pub fn generate(
    secring_path: impl AsRef<Path>,
    pubkey_path: impl AsRef<Path>,
    name: &str,
    email: &str,
    version: &str,
    caps: &str,
    lifetime_days: i64,
) -> Result<KeyId, MixError> {
    let secret = RsaPrivateKey::new(&mut OsRng, 1024)
        .map_err(|e| MixError::Crypto(format!("RSA generate: {}", e)))?;
    let key_id = codec::key_id(&codec::encode_secret(&secret)?)?;
    let created = timing::date_in_days(0);
    let expires = timing::date_in_days(lifetime_days);

    let block = secring::armor_block(&secret, &created, &expires)?;
    if let Some(parent) = secring_path.as_ref().parent() {
        fs::create_dir_all(parent)?;
    }
    let mut ring = OpenOptions::new()
        .append(true)
        .create(true)
        .open(secring_path.as_ref())?;
    ring.write_all(block.as_bytes())?;
    ring.sync_all()?;

    let entry = pubring::armor_entry(
        name,
        email,
        version,
        caps,
        &secret.to_public_key(),
        Some(&created),
        Some(&expires),
    )?;
    if let Some(parent) = pubkey_path.as_ref().parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(pubkey_path.as_ref(), entry)?;

    info!("generated key {} (expires {})", key_id, expires);
    Ok(key_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{PublicKeyStore, SecretKeyStore};

    #[test]
    fn test_generate_produces_loadable_rings() {
        let dir = tempfile::tempdir().unwrap();
        let secring_path = dir.path().join("keys/secring.mix");
        let pubkey_path = dir.path().join("keys/key.txt");

        let id = generate(
            &secring_path,
            &pubkey_path,
            "testnode",
            "mix@test.example",
            "3.0",
            "C",
            365,
        )
        .unwrap();

        let secring = SecretKeyStore::open(&secring_path).unwrap();
        assert!(secring.lookup(&id).is_some());

        // The published key file parses as a one-entry ring.
        let pubring = PublicKeyStore::open(&pubkey_path).unwrap();
        let peer = pubring.by_name("testnode").unwrap();
        assert_eq!(peer.key_id, id);
        assert_eq!(peer.email, "mix@test.example");
    }

    #[test]
    fn test_generate_appends_to_existing_ring() {
        let dir = tempfile::tempdir().unwrap();
        let secring_path = dir.path().join("secring.mix");
        let pubkey_path = dir.path().join("key.txt");
        let a = generate(&secring_path, &pubkey_path, "n", "e@x", "3.0", "C", 365).unwrap();
        let b = generate(&secring_path, &pubkey_path, "n", "e@x", "3.0", "C", 365).unwrap();
        assert_ne!(a, b);

        let secring = SecretKeyStore::open(&secring_path).unwrap();
        assert_eq!(secring.len(), 2);
    }
}
