// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Multi-part message reassembly.
//!
//! Each Chunk-ID owns a directory under the chunk root holding one file
//! per received part plus the recorded total. Parts arrive in any order;
//! when the set is complete the parts are concatenated in index order
//! into the final-hop payload stream and the directory is removed.
//! Incomplete sets are purged once they outlive the configured age.

use crate::error::MixError;
use crate::packet::DIGEST_LEN;
use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

const TOTAL_FILE: &str = "total";

/// Outcome of storing one part.
pub enum ChunkState {
    /// Parts still missing.
    Incomplete { have: u8, total: u8 },
    /// All parts arrived; the reassembled payload stream.
    Complete(Vec<u8>),
}

/// Persistent reassembly state, one directory per Chunk-ID.
pub struct ChunkStore {
    root: PathBuf,
    // Serializes add and expire, I/O included.
    lock: Mutex<()>,
}

impl ChunkStore {
    pub fn open(root: impl AsRef<Path>) -> Result<Self, MixError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            lock: Mutex::new(()),
        })
    }

    /// Store one part and report whether the set just completed.
    pub fn add(
        &self,
        chunk_id: &[u8; DIGEST_LEN],
        index: u8,
        total: u8,
        frag: &[u8],
    ) -> Result<ChunkState, MixError> {
        let _guard = self.lock.lock();
        if total == 0 || index >= total {
            return Err(MixError::InconsistentTotal {
                recorded: total,
                got: index,
            });
        }

        let dir = self.root.join(hex::encode(chunk_id));
        if dir.is_dir() {
            let recorded: u8 = fs::read_to_string(dir.join(TOTAL_FILE))?
                .trim()
                .parse()
                .map_err(|_| MixError::InconsistentTotal {
                    recorded: 0,
                    got: total,
                })?;
            if recorded != total {
                return Err(MixError::InconsistentTotal {
                    recorded,
                    got: total,
                });
            }
        } else {
            fs::create_dir_all(&dir)?;
            fs::write(dir.join(TOTAL_FILE), format!("{}\n", total))?;
        }

        let part = dir.join(part_name(index));
        if part.is_file() {
            return Err(MixError::DuplicateChunk(index));
        }
        let tmp = dir.join(format!("{}.tmp", part_name(index)));
        fs::write(&tmp, frag)?;
        fs::rename(&tmp, &part)?;

        let have = (0..total).filter(|i| dir.join(part_name(*i)).is_file()).count() as u8;
        if have < total {
            debug!(
                "chunk {}: {}/{} parts",
                hex::encode(chunk_id),
                have,
                total
            );
            return Ok(ChunkState::Incomplete { have, total });
        }

        let mut stream = Vec::new();
        for i in 0..total {
            stream.extend_from_slice(&fs::read(dir.join(part_name(i)))?);
        }
        fs::remove_dir_all(&dir)?;
        debug!(
            "chunk {}: complete, {} bytes reassembled",
            hex::encode(chunk_id),
            stream.len()
        );
        Ok(ChunkState::Complete(stream))
    }

    /// Purge incomplete sets older than `max_age`. Returns how many were
    /// dropped.
    pub fn expire(&self, max_age: Duration) -> Result<usize, MixError> {
        let _guard = self.lock.lock();
        let mut dropped = 0;
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.path().is_dir() {
                continue;
            }
            let age = entry
                .metadata()
                .and_then(|m| m.modified())
                .map(|t| SystemTime::now().duration_since(t).unwrap_or_default());
            match age {
                Ok(age) if age >= max_age => {
                    warn!(
                        "dropping timed-out chunk set {}",
                        entry.file_name().to_string_lossy()
                    );
                    fs::remove_dir_all(entry.path())?;
                    dropped += 1;
                }
                _ => {}
            }
        }
        Ok(dropped)
    }

    /// Number of chunk sets currently in flight.
    pub fn pending(&self) -> Result<usize, MixError> {
        let _guard = self.lock.lock();
        Ok(fs::read_dir(&self.root)?
            .filter_map(Result::ok)
            .filter(|e| e.path().is_dir())
            .count())
    }

    /// Nothing is buffered in memory, so sync is a structural no-op kept
    /// for shutdown symmetry with the replay log.
    pub fn sync(&self) -> Result<(), MixError> {
        Ok(())
    }
}

fn part_name(index: u8) -> String {
    format!("p{:03}", index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto;

    fn store() -> (tempfile::TempDir, ChunkStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ChunkStore::open(dir.path().join("chunks")).unwrap();
        (dir, store)
    }

    #[test]
    fn test_out_of_order_reassembly() {
        let (_dir, store) = store();
        let id = crypto::random_array::<16>();
        let parts: Vec<Vec<u8>> = (0..3).map(|_| crypto::random_vec(100)).collect();

        for i in [2usize, 0, 1] {
            let state = store.add(&id, i as u8, 3, &parts[i]).unwrap();
            match (i, state) {
                (1, ChunkState::Complete(stream)) => {
                    let want: Vec<u8> = parts.iter().flatten().copied().collect();
                    assert_eq!(stream, want);
                }
                (1, ChunkState::Incomplete { .. }) => panic!("final part did not complete"),
                (_, ChunkState::Incomplete { .. }) => {}
                (_, ChunkState::Complete(_)) => panic!("completed early"),
            }
        }
        assert_eq!(store.pending().unwrap(), 0);
    }

    #[test]
    fn test_duplicate_chunk_rejected() {
        let (_dir, store) = store();
        let id = crypto::random_array::<16>();
        store.add(&id, 0, 2, b"part").unwrap();
        assert!(matches!(
            store.add(&id, 0, 2, b"part"),
            Err(MixError::DuplicateChunk(0))
        ));
    }

    #[test]
    fn test_inconsistent_total_rejected() {
        let (_dir, store) = store();
        let id = crypto::random_array::<16>();
        store.add(&id, 0, 3, b"part").unwrap();
        assert!(matches!(
            store.add(&id, 1, 4, b"part"),
            Err(MixError::InconsistentTotal { recorded: 3, got: 4 })
        ));
        assert!(store.add(&id, 3, 3, b"oob").is_err());
    }

    #[test]
    fn test_expire_purges_stale_sets() {
        let (_dir, store) = store();
        let id = crypto::random_array::<16>();
        store.add(&id, 0, 2, b"part").unwrap();
        assert_eq!(store.pending().unwrap(), 1);
        // Anything is older than a zero age.
        assert_eq!(store.expire(Duration::ZERO).unwrap(), 1);
        assert_eq!(store.pending().unwrap(), 0);
    }
}
