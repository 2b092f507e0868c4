// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The local secret key ring.
//!
//! An armored file of one or more blocks:
//!
//! ```text
//! -----Begin Mix Key-----
//! Created: 2026-01-10
//! Expires: 2027-01-10
//! 64bd3f4b90bd5e98c2dbf2c61bfa66cc
//! 0
//! <IV, base64>
//! <3DES-CBC encrypted 712-byte secret key, base64>
//! -----End Mix Key-----
//! ```
//!
//! The cipher key is the MD5 of a fixed ring passphrase. That phrase is a
//! published property of the on-disk format, not a secret: every
//! compatible implementation ships the same constant.

use crate::crypto;
use crate::error::MixError;
use crate::keys::codec;
use crate::packet::KeyId;
use crate::timing;
use chrono::NaiveDate;
use parking_lot::RwLock;
use rsa::RsaPrivateKey;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const BEGIN_MARK: &str = "-----Begin Mix Key-----";
const END_MARK: &str = "-----End Mix Key-----";

/// Fixed ring passphrase; a known constant of the format.
const RING_PASSPHRASE: &[u8] = b"Two Humped Dromadary";

struct Entry {
    key: RsaPrivateKey,
    expires: NaiveDate,
}

/// Cache of unlocked local secret keys, keyed by Key-ID.
///
/// A lookup miss triggers exactly one re-read of the ring file before
/// giving up; expired entries are evicted on sight. Reloads build a new
/// snapshot and swap it in, so readers always see a consistent ring.
pub struct SecretKeyStore {
    path: PathBuf,
    cache: RwLock<HashMap<KeyId, Entry>>,
}

impl SecretKeyStore {
    /// Open and parse the ring. Missing file is fatal to the caller.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, MixError> {
        let path = path.as_ref().to_path_buf();
        if !path.is_file() {
            return Err(MixError::StoreMissing(path.display().to_string()));
        }
        let store = Self {
            path,
            cache: RwLock::new(HashMap::new()),
        };
        store.reload()?;
        Ok(store)
    }

    /// Find a currently-valid secret key by Key-ID.
    pub fn lookup(&self, id: &KeyId) -> Option<RsaPrivateKey> {
        if let Some(found) = self.lookup_cached(id) {
            return Some(found);
        }
        // One reload on miss: the operator may have rotated keys under us.
        if let Err(e) = self.reload() {
            warn!("secring reload failed, keeping previous keys: {}", e);
        }
        self.lookup_cached(id)
    }

    fn lookup_cached(&self, id: &KeyId) -> Option<RsaPrivateKey> {
        {
            let cache = self.cache.read();
            match cache.get(id) {
                Some(entry) if !expired(entry.expires) => return Some(entry.key.clone()),
                Some(_) => {}
                None => return None,
            }
        }
        debug!("evicting expired secret key {}", id);
        self.cache.write().remove(id);
        None
    }

    /// Number of usable keys currently cached.
    pub fn len(&self) -> usize {
        self.cache.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.read().len() == 0
    }

    fn reload(&self) -> Result<(), MixError> {
        let text = fs::read_to_string(&self.path)?;
        let (fresh, blocks_seen, corrupt) = parse_ring(&text);
        if blocks_seen > 0 && corrupt == blocks_seen {
            // Every block decrypted to garbage: the classic symptom of a
            // ring written with a different passphrase.
            return Err(MixError::WrongPassphrase);
        }
        debug!(
            "secring {}: {} of {} blocks usable",
            self.path.display(),
            fresh.len(),
            blocks_seen
        );
        *self.cache.write() = fresh;
        Ok(())
    }
}

fn expired(expires: NaiveDate) -> bool {
    expires < chrono::Utc::now().date_naive()
}

fn parse_ring(text: &str) -> (HashMap<KeyId, Entry>, usize, usize) {
    let mut out = HashMap::new();
    let mut blocks = 0usize;
    let mut corrupt = 0usize;
    let mut lines = text.lines();
    while let Some(line) = lines.next() {
        if line.trim_end() != BEGIN_MARK {
            continue;
        }
        blocks += 1;
        match parse_block(&mut lines) {
            Ok(Some((id, entry))) => {
                out.insert(id, entry);
            }
            Ok(None) => {} // outside its validity window; not an error
            Err(e) => {
                warn!("skipping secring block: {}", e);
                corrupt += 1;
            }
        }
    }
    (out, blocks, corrupt)
}

fn parse_block<'a>(
    lines: &mut impl Iterator<Item = &'a str>,
) -> Result<Option<(KeyId, Entry)>, MixError> {
    let created = field(lines.next(), "Created:")?;
    let expires = field(lines.next(), "Expires:")?;
    let keyid_line = lines
        .next()
        .ok_or_else(|| MixError::BlockCorrupt("truncated block".into()))?
        .trim()
        .to_string();
    let _zero = lines.next(); // historical placeholder line, always "0"
    let iv_line = lines
        .next()
        .ok_or_else(|| MixError::BlockCorrupt("truncated block".into()))?;

    let mut b64 = String::new();
    for line in lines.by_ref() {
        if line.trim_end() == END_MARK {
            break;
        }
        b64.push_str(line.trim());
    }

    if timing::date_prevalid(&created) || timing::date_expired(&expires) {
        return Ok(None);
    }
    let expires = timing::parse_date(&expires)
        .ok_or_else(|| MixError::BlockCorrupt(format!("bad Expires date: {}", expires)))?;

    use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
    let iv_raw = B64
        .decode(iv_line.trim())
        .map_err(|e| MixError::BlockCorrupt(format!("IV base64: {}", e)))?;
    let iv: [u8; 8] = iv_raw
        .try_into()
        .map_err(|_| MixError::BlockCorrupt("IV is not 8 bytes".into()))?;
    let ct = B64
        .decode(b64.as_bytes())
        .map_err(|e| MixError::BlockCorrupt(format!("key base64: {}", e)))?;

    let ring_key = crypto::md5(RING_PASSPHRASE);
    let plain = crypto::des3_2key_decrypt(&ring_key, &iv, &ct)?;
    if plain.len() != codec::SECRET_WIRE_LEN {
        return Err(MixError::BlockCorrupt(format!(
            "decrypted key is {} bytes",
            plain.len()
        )));
    }
    let id = codec::key_id(&plain)?;
    if id.to_hex() != keyid_line {
        return Err(MixError::BlockCorrupt(format!(
            "Key-ID mismatch after decrypt: {}",
            keyid_line
        )));
    }
    let key = codec::decode_secret(&plain)?;
    Ok(Some((id, Entry { key, expires })))
}

fn field(line: Option<&str>, name: &str) -> Result<String, MixError> {
    let line = line.ok_or_else(|| MixError::BlockCorrupt("truncated block".into()))?;
    line.strip_prefix(name)
        .map(|rest| rest.trim().to_string())
        .ok_or_else(|| MixError::BlockCorrupt(format!("expected {} line", name)))
}

/// Render one armored, encrypted ring block for a secret key.
///
/// Used by key generation and by tests that build fixture rings.
pub fn armor_block(
    key: &RsaPrivateKey,
    created: &str,
    expires: &str,
) -> Result<String, MixError> {
    let wire = codec::encode_secret(key)?;
    let id = codec::key_id(&wire)?;
    let iv = crypto::random_array::<8>();
    let ring_key = crypto::md5(RING_PASSPHRASE);
    let ct = crypto::des3_2key_encrypt(&ring_key, &iv, &wire)?;

    use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
    let mut out = String::new();
    out.push_str(BEGIN_MARK);
    out.push('\n');
    out.push_str(&format!("Created: {}\n", created));
    out.push_str(&format!("Expires: {}\n", expires));
    out.push_str(&id.to_hex());
    out.push('\n');
    out.push_str("0\n");
    out.push_str(&B64.encode(iv));
    out.push('\n');
    out.push_str(&crate::packet::wrap_base64(&ct, 40));
    out.push_str(END_MARK);
    out.push('\n');
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;
    use std::io::Write;

    fn testkey() -> RsaPrivateKey {
        RsaPrivateKey::new(&mut OsRng, 1024).unwrap()
    }

    fn write_ring(blocks: &[String]) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        for b in blocks {
            f.write_all(b.as_bytes()).unwrap();
            f.write_all(b"\n").unwrap();
        }
        f.flush().unwrap();
        f
    }

    #[test]
    fn test_open_missing_ring() {
        assert!(matches!(
            SecretKeyStore::open("/nonexistent/secring.mix"),
            Err(MixError::StoreMissing(_))
        ));
    }

    #[test]
    fn test_block_roundtrip() {
        let key = testkey();
        let id = codec::key_id(&codec::encode_secret(&key).unwrap()).unwrap();
        let block = armor_block(&key, &timing::date_in_days(-1), &timing::date_in_days(30)).unwrap();
        let ring = write_ring(&[block]);

        let store = SecretKeyStore::open(ring.path()).unwrap();
        assert_eq!(store.len(), 1);
        let found = store.lookup(&id).expect("key should load");
        assert_eq!(
            codec::encode_secret(&found).unwrap(),
            codec::encode_secret(&key).unwrap()
        );
    }

    #[test]
    fn test_expired_block_skipped() {
        let key = testkey();
        let block =
            armor_block(&key, &timing::date_in_days(-40), &timing::date_in_days(-10)).unwrap();
        let ring = write_ring(&[block]);
        let store = SecretKeyStore::open(ring.path()).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_miss_reloads_ring() {
        let key_a = testkey();
        let key_b = testkey();
        let id_b = codec::key_id(&codec::encode_secret(&key_b).unwrap()).unwrap();
        let block_a =
            armor_block(&key_a, &timing::date_in_days(-1), &timing::date_in_days(30)).unwrap();
        let ring = write_ring(&[block_a.clone()]);
        let store = SecretKeyStore::open(ring.path()).unwrap();
        assert!(store.lookup(&id_b).is_none());

        // Rotate the ring on disk; the next miss picks it up.
        let block_b =
            armor_block(&key_b, &timing::date_in_days(-1), &timing::date_in_days(30)).unwrap();
        fs::write(ring.path(), format!("{}\n{}", block_a, block_b)).unwrap();
        assert!(store.lookup(&id_b).is_some());
    }

    #[test]
    fn test_corrupt_block_skipped() {
        let key = testkey();
        let good = armor_block(&key, &timing::date_in_days(-1), &timing::date_in_days(30)).unwrap();
        // Break the Created line in a copy of the block.
        let bad = good.replace("Created", "Creatid");
        let ring = write_ring(&[bad, good]);
        let store = SecretKeyStore::open(ring.path()).unwrap();
        assert_eq!(store.len(), 1);
    }
}
