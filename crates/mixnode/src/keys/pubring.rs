// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The peer public key ring.
//!
//! A flat file: one header line per remailer, then its armored key block.
//!
//! ```text
//! banana mix@banana.example 7b8002e086b27b82a173b3a971b3e73b 3.0 MC 2026-01-01 2027-01-01
//! -----Begin Mix Key-----
//! 7b8002e086b27b82a173b3a971b3e73b
//! 258
//! <base64 public key wire form>
//! -----End Mix Key-----
//! ```
//!
//! Headers carry 5 fields, or 7 when the key publishes a validity window;
//! windowed entries outside "now" are skipped at parse time.

use crate::error::MixError;
use crate::keys::codec;
use crate::packet::KeyId;
use crate::timing;
use chrono::NaiveDate;
use parking_lot::RwLock;
use rand::seq::SliceRandom;
use rand::rngs::OsRng;
use rsa::RsaPublicKey;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const BEGIN_MARK: &str = "-----Begin Mix Key-----";
const END_MARK: &str = "-----End Mix Key-----";

/// One remailer known from the public key ring.
#[derive(Clone)]
pub struct Peer {
    pub name: String,
    pub email: String,
    pub key_id: KeyId,
    pub version: String,
    pub caps: String,
    pub key: RsaPublicKey,
    pub valid_from: Option<NaiveDate>,
    pub expires: Option<NaiveDate>,
}

impl Peer {
    /// Middle-only remailers advertise `M` and never terminate a chain.
    pub fn can_exit(&self) -> bool {
        !self.caps.contains('M')
    }

    fn expired(&self) -> bool {
        match self.expires {
            Some(d) => d < chrono::Utc::now().date_naive(),
            None => false,
        }
    }
}

#[derive(Default)]
struct Ring {
    peers: HashMap<String, Peer>,
    headers: Vec<String>,
}

/// Cache of peer keys with reload-on-miss semantics matching the secret
/// ring: one re-read per miss, expired entries evicted and never
/// returned, reload failures keep the previous snapshot.
pub struct PublicKeyStore {
    path: PathBuf,
    cache: RwLock<Ring>,
}

impl PublicKeyStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, MixError> {
        let path = path.as_ref().to_path_buf();
        if !path.is_file() {
            return Err(MixError::StoreMissing(path.display().to_string()));
        }
        let store = Self {
            path,
            cache: RwLock::new(Ring::default()),
        };
        store.reload()?;
        Ok(store)
    }

    /// Look a peer up by its short name.
    pub fn by_name(&self, name: &str) -> Option<Peer> {
        if let Some(peer) = self.cached(|ring| ring.peers.get(name).cloned()) {
            return Some(peer);
        }
        self.reload_soft();
        self.cached(|ring| ring.peers.get(name).cloned())
    }

    /// Look a peer up by Key-ID.
    pub fn by_key_id(&self, id: &KeyId) -> Option<Peer> {
        let find = |ring: &Ring| ring.peers.values().find(|p| p.key_id == *id).cloned();
        if let Some(peer) = self.cached(find) {
            return Some(peer);
        }
        self.reload_soft();
        self.cached(find)
    }

    /// The raw header lines, in file order, for capability listings.
    pub fn list_headers(&self) -> Vec<String> {
        self.cache.read().headers.clone()
    }

    /// Every currently-valid peer.
    pub fn peers(&self) -> Vec<Peer> {
        self.cache
            .read()
            .peers
            .values()
            .filter(|p| !p.expired())
            .cloned()
            .collect()
    }

    /// A uniformly random peer advertising exit capability.
    pub fn random_exit(&self) -> Option<Peer> {
        let exits: Vec<Peer> = self.peers().into_iter().filter(Peer::can_exit).collect();
        exits.choose(&mut OsRng).cloned()
    }

    /// Apply `f` to the cache, evicting an expired hit.
    fn cached(&self, f: impl Fn(&Ring) -> Option<Peer>) -> Option<Peer> {
        let found = f(&self.cache.read());
        match found {
            Some(peer) if peer.expired() => {
                debug!("evicting expired peer key {}", peer.name);
                self.cache.write().peers.remove(&peer.name);
                None
            }
            other => other,
        }
    }

    fn reload_soft(&self) {
        if let Err(e) = self.reload() {
            warn!("pubring reload failed, keeping previous snapshot: {}", e);
        }
    }

    fn reload(&self) -> Result<(), MixError> {
        let text = fs::read_to_string(&self.path)?;
        let fresh = parse_ring(&text)?;
        debug!(
            "pubring {}: {} peers loaded",
            self.path.display(),
            fresh.peers.len()
        );
        *self.cache.write() = fresh;
        Ok(())
    }
}

fn parse_ring(text: &str) -> Result<Ring, MixError> {
    let mut ring = Ring::default();
    let mut lines = text.lines().peekable();
    while let Some(line) = lines.next() {
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }
        let header: Vec<&str> = line.split(' ').filter(|f| !f.is_empty()).collect();
        let in_window = match header.len() {
            5 => true,
            7 => !timing::date_prevalid(header[5]) && !timing::date_expired(header[6]),
            _ => return Err(MixError::PubringMalformed(line.to_string())),
        };

        // The key block must follow its header line immediately (blank
        // lines aside).
        while matches!(lines.peek(), Some(l) if l.trim().is_empty()) {
            lines.next();
        }
        let mark = lines
            .next()
            .ok_or_else(|| MixError::PubringMalformed(format!("{}: no key block", header[0])))?;
        if mark.trim_end() != BEGIN_MARK {
            return Err(MixError::PubringMalformed(mark.to_string()));
        }
        let block = parse_block(&mut lines, header[2])?;

        if !in_window {
            debug!("skipping {}: outside validity window", header[0]);
            continue;
        }
        let Some(block) = block else { continue };

        ring.headers.push(line.to_string());
        let peer = Peer {
            name: header[0].to_string(),
            email: header[1].to_string(),
            key_id: KeyId::from_hex(header[2])?,
            version: header[3].to_string(),
            caps: header[4].to_string(),
            key: block,
            valid_from: header.get(5).and_then(|s| timing::parse_date(s)),
            expires: header.get(6).and_then(|s| timing::parse_date(s)),
        };
        ring.peers.insert(peer.name.clone(), peer);
    }
    Ok(ring)
}

/// Parse one armored block; `None` when its checks fail (the entry is
/// dropped, the ring itself is still usable).
fn parse_block<'a>(
    lines: &mut impl Iterator<Item = &'a str>,
    header_key_id: &str,
) -> Result<Option<RsaPublicKey>, MixError> {
    let keyid_line = lines
        .next()
        .ok_or_else(|| MixError::PubringMalformed("truncated key block".into()))?
        .trim()
        .to_string();
    let len_line = lines
        .next()
        .ok_or_else(|| MixError::PubringMalformed("truncated key block".into()))?
        .trim();
    let declared: usize = len_line
        .parse()
        .map_err(|_| MixError::PubringMalformed(len_line.to_string()))?;

    let mut b64 = String::new();
    loop {
        let line = lines
            .next()
            .ok_or_else(|| MixError::PubringMalformed("unterminated key block".into()))?;
        if line.trim_end() == END_MARK {
            break;
        }
        b64.push_str(line.trim());
    }

    use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
    let wire = match B64.decode(b64.as_bytes()) {
        Ok(w) => w,
        Err(e) => {
            warn!("dropping pubring entry {}: base64: {}", keyid_line, e);
            return Ok(None);
        }
    };
    if wire.len() != declared {
        warn!(
            "dropping pubring entry {}: {} bytes, declared {}",
            keyid_line,
            wire.len(),
            declared
        );
        return Ok(None);
    }
    let id = match codec::key_id(&wire) {
        Ok(id) => id,
        Err(e) => {
            warn!("dropping pubring entry {}: {}", keyid_line, e);
            return Ok(None);
        }
    };
    if id.to_hex() != keyid_line || id.to_hex() != header_key_id {
        warn!("dropping pubring entry {}: Key-ID mismatch", keyid_line);
        return Ok(None);
    }
    match codec::decode_public(&wire) {
        Ok(key) => Ok(Some(key)),
        Err(e) => {
            warn!("dropping pubring entry {}: {}", keyid_line, e);
            Ok(None)
        }
    }
}

/// Render a peer entry (header line + armored block) for the ring and the
/// published key file.
pub fn armor_entry(
    name: &str,
    email: &str,
    version: &str,
    caps: &str,
    key: &RsaPublicKey,
    valid_from: Option<&str>,
    expires: Option<&str>,
) -> Result<String, MixError> {
    let wire = codec::encode_public(key)?;
    let id = codec::key_id(&wire)?;
    let mut out = match (valid_from, expires) {
        (Some(from), Some(to)) => format!(
            "{} {} {} {} {} {} {}\n",
            name,
            email,
            id.to_hex(),
            version,
            caps,
            from,
            to
        ),
        _ => format!("{} {} {} {} {}\n", name, email, id.to_hex(), version, caps),
    };
    out.push('\n');
    out.push_str(BEGIN_MARK);
    out.push('\n');
    out.push_str(&id.to_hex());
    out.push('\n');
    out.push_str(&format!("{}\n", wire.len()));
    out.push_str(&crate::packet::wrap_base64(&wire, 40));
    out.push_str(END_MARK);
    out.push('\n');
    Ok(out)
}
