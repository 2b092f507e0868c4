// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Maildir ingestion.
//!
//! Each pass walks `new/` then `cur/`, runs every message through the
//! request responder or the packet pipeline, and removes it. A message
//! that fails is dropped and counted; the daemon never answers a sender,
//! and the silent-drop classes never rise above debug in the log.

use crate::responder;
use mixnode::{Disposition, Email, Mailer, MixError, MixNode};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Per-pass totals, logged once per iteration.
#[derive(Debug, Default)]
pub struct PassCounters {
    pub processed: usize,
    pub pooled: usize,
    pub responded: usize,
    pub dummies: usize,
    pub failed: usize,
}

pub struct Mailbox {
    root: PathBuf,
}

impl Mailbox {
    /// Open (and if needed lay out) the maildir.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, MixError> {
        let root = root.as_ref().to_path_buf();
        for sub in ["new", "cur", "tmp"] {
            fs::create_dir_all(root.join(sub))?;
        }
        Ok(Self { root })
    }

    /// One full pass over the mailbox.
    pub fn iterate(&self, node: &MixNode, mailer: &mut dyn Mailer) -> PassCounters {
        let mut counters = PassCounters::default();
        for sub in ["new", "cur"] {
            let dir = self.root.join(sub);
            let entries = match fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("{}: unreadable maildir: {}", dir.display(), e);
                    continue;
                }
            };
            for entry in entries.filter_map(Result::ok) {
                let path = entry.path();
                if !path.is_file() {
                    continue;
                }
                counters.processed += 1;
                match fs::read_to_string(&path) {
                    Ok(text) => self.handle(node, mailer, &Email::parse(&text), &mut counters),
                    Err(e) => {
                        warn!("{}: unreadable message: {}", path.display(), e);
                        counters.failed += 1;
                    }
                }
                if let Err(e) = fs::remove_file(&path) {
                    warn!("{}: could not remove: {}", path.display(), e);
                }
            }
        }
        info!(
            "mailbox pass: processed={} pooled={} responded={} dummies={} failed={}",
            counters.processed,
            counters.pooled,
            counters.responded,
            counters.dummies,
            counters.failed
        );
        counters
    }

    fn handle(
        &self,
        node: &MixNode,
        mailer: &mut dyn Mailer,
        email: &Email,
        counters: &mut PassCounters,
    ) {
        if let Some(from) = email.from_addr() {
            if from.starts_with("mailer-daemon") {
                debug!("dropping bounce from {}", from);
                counters.failed += 1;
                return;
            }
        }
        if email.is_multipart() {
            debug!("dropping multipart message");
            counters.failed += 1;
            return;
        }
        match responder::respond(node, email, mailer) {
            Ok(true) => {
                counters.responded += 1;
                return;
            }
            Ok(false) => {}
            Err(e) => {
                warn!("request response failed: {}", e);
                counters.failed += 1;
                return;
            }
        }
        match node.process_mail(email) {
            Ok(Disposition::Pooled(n)) => counters.pooled += n,
            Ok(Disposition::ChunkStored) => debug!("chunk stored, set incomplete"),
            Ok(Disposition::Dummy) => counters.dummies += 1,
            Err(e) if e.is_silent_drop() => {
                debug!("silently dropped: {}", e);
                counters.failed += 1;
            }
            Err(e) => {
                debug!("invalid message: {}", e);
                counters.failed += 1;
            }
        }
    }
}
