// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The replay log: every accepted Packet-ID, persistently.
//!
//! On disk the log is a flat sequence of 18-byte records, a 16-byte
//! Packet-ID followed by the little-endian u16 epoch-day it was accepted
//! on. Records are appended and fsynced before a packet counts as
//! accepted, so a crash between decrypt and dispatch can only lose the
//! packet, never replay it.

use crate::error::MixError;
use crate::packet::DIGEST_LEN;
use crate::timing;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const RECORD_LEN: usize = DIGEST_LEN + 2;

struct Inner {
    map: HashMap<[u8; DIGEST_LEN], u16>,
    file: File,
}

/// Persistent set of seen Packet-IDs with day-granularity timestamps.
///
/// All operations serialize on one lock; `check_and_insert` is the
/// decode path's atomic gate against concurrent decoders on the same log.
pub struct ReplayLog {
    path: PathBuf,
    inner: Mutex<Inner>,
}

impl ReplayLog {
    /// Open the log, creating an empty one on first run.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, MixError> {
        let path = path.as_ref().to_path_buf();
        let mut map = HashMap::new();
        if path.is_file() {
            let raw = fs::read(&path)?;
            if raw.len() % RECORD_LEN != 0 {
                warn!(
                    "{}: {} trailing bytes of a torn record dropped",
                    path.display(),
                    raw.len() % RECORD_LEN
                );
            }
            for rec in raw.chunks_exact(RECORD_LEN) {
                let mut id = [0u8; DIGEST_LEN];
                id.copy_from_slice(&rec[..DIGEST_LEN]);
                let days = u16::from_le_bytes([rec[DIGEST_LEN], rec[DIGEST_LEN + 1]]);
                map.insert(id, days);
            }
        }
        let file = OpenOptions::new().append(true).create(true).open(&path)?;
        debug!("replay log {}: {} entries", path.display(), map.len());
        Ok(Self {
            path,
            inner: Mutex::new(Inner { map, file }),
        })
    }

    pub fn contains(&self, id: &[u8; DIGEST_LEN]) -> bool {
        self.inner.lock().map.contains_key(id)
    }

    /// Record a Packet-ID. The record is on disk before this returns.
    pub fn insert(&self, id: [u8; DIGEST_LEN], days: u16) -> Result<(), MixError> {
        let mut inner = self.inner.lock();
        write_record(&mut inner.file, &id, days)?;
        inner.map.insert(id, days);
        Ok(())
    }

    /// The decode-path gate: atomically test and record in one critical
    /// section. Returns `false` (and writes nothing) on a replay.
    pub fn check_and_insert(&self, id: [u8; DIGEST_LEN], days: u16) -> Result<bool, MixError> {
        let mut inner = self.inner.lock();
        if inner.map.contains_key(&id) {
            return Ok(false);
        }
        write_record(&mut inner.file, &id, days)?;
        inner.map.insert(id, days);
        Ok(true)
    }

    /// Drop entries older than `window_days` and compact the file.
    pub fn prune(&self, window_days: u16) -> Result<usize, MixError> {
        let horizon = timing::epoch_days().saturating_sub(window_days);
        let mut inner = self.inner.lock();
        let before = inner.map.len();
        inner.map.retain(|_, days| *days >= horizon);
        let dropped = before - inner.map.len();
        if dropped == 0 {
            return Ok(0);
        }

        // Compact through a temp file so a crash leaves either the old or
        // the new log, never a half-written one.
        let tmp = self.path.with_extension("tmp");
        {
            let mut out = File::create(&tmp)?;
            for (id, days) in &inner.map {
                let mut rec = [0u8; RECORD_LEN];
                rec[..DIGEST_LEN].copy_from_slice(id);
                rec[DIGEST_LEN..].copy_from_slice(&days.to_le_bytes());
                out.write_all(&rec)?;
            }
            out.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        inner.file = OpenOptions::new().append(true).open(&self.path)?;
        debug!("replay log pruned: {} entries dropped", dropped);
        Ok(dropped)
    }

    /// Flush the backing file to disk.
    pub fn sync(&self) -> Result<(), MixError> {
        let inner = self.inner.lock();
        inner.file.sync_all()?;
        Ok(())
    }

    /// Final flush at shutdown.
    pub fn close(&self) -> Result<(), MixError> {
        self.sync()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn write_record(file: &mut File, id: &[u8; DIGEST_LEN], days: u16) -> Result<(), MixError> {
    let mut rec = [0u8; RECORD_LEN];
    rec[..DIGEST_LEN].copy_from_slice(id);
    rec[DIGEST_LEN..].copy_from_slice(&days.to_le_bytes());
    file.write_all(&rec)?;
    file.sync_data()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto;

    #[test]
    fn test_insert_and_contains() {
        let dir = tempfile::tempdir().unwrap();
        let log = ReplayLog::open(dir.path().join("idlog.bin")).unwrap();
        let id = crypto::random_array::<16>();
        assert!(!log.contains(&id));
        log.insert(id, 20_000).unwrap();
        assert!(log.contains(&id));
    }

    #[test]
    fn test_check_and_insert_gate() {
        let dir = tempfile::tempdir().unwrap();
        let log = ReplayLog::open(dir.path().join("idlog.bin")).unwrap();
        let id = crypto::random_array::<16>();
        assert!(log.check_and_insert(id, 20_000).unwrap());
        assert!(!log.check_and_insert(id, 20_000).unwrap());
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("idlog.bin");
        let id = crypto::random_array::<16>();
        {
            let log = ReplayLog::open(&path).unwrap();
            log.insert(id, 20_000).unwrap();
            log.close().unwrap();
        }
        let log = ReplayLog::open(&path).unwrap();
        assert!(log.contains(&id));
    }

    #[test]
    fn test_prune_drops_old_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("idlog.bin");
        let now = timing::epoch_days();
        let old = crypto::random_array::<16>();
        let new = crypto::random_array::<16>();
        {
            let log = ReplayLog::open(&path).unwrap();
            log.insert(old, now - 30).unwrap();
            log.insert(new, now).unwrap();
            assert_eq!(log.prune(14).unwrap(), 1);
            assert!(!log.contains(&old));
            assert!(log.contains(&new));
        }
        // The compacted file reloads to the same state.
        let log = ReplayLog::open(&path).unwrap();
        assert!(!log.contains(&old));
        assert!(log.contains(&new));
    }

    #[test]
    fn test_torn_record_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("idlog.bin");
        let id = crypto::random_array::<16>();
        {
            let log = ReplayLog::open(&path).unwrap();
            log.insert(id, 20_000).unwrap();
        }
        // Simulate a torn append.
        let mut raw = fs::read(&path).unwrap();
        raw.extend_from_slice(&[0xAB; 7]);
        fs::write(&path, &raw).unwrap();

        let log = ReplayLog::open(&path).unwrap();
        assert_eq!(log.len(), 1);
        assert!(log.contains(&id));
    }
}
