// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The mix pool: batched, randomized, thresholded release.
//!
//! Outbound messages sit as `m`-prefixed files in the pool directory.
//! On each due tick the pool sends a random slice of its contents: with
//! `P` files and rate `r`%, `floor(P*r/100)` messages go out, chosen by
//! shuffling the file list and slicing at a random offset, provided `P`
//! meets the size threshold. First-in/first-out correlation between
//! arrival and dispatch is destroyed by construction.

use crate::error::MixError;
use crate::mail::{Email, Mailer, SendErrorKind};
use parking_lot::Mutex;
use rand::rngs::OsRng;
use rand::seq::SliceRandom;
use rand::Rng;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// What one tick did.
#[derive(Default)]
pub struct TickReport {
    /// Messages handed to SMTP and removed.
    pub dispatched: usize,
    /// Messages that failed and were kept or discarded.
    pub failed: usize,
    /// The outdummy roll came up; the caller should inject one dummy.
    pub want_dummy: bool,
}

struct Sched {
    next_process: Instant,
}

/// The pool directory plus its tick scheduler.
///
/// The scheduler lock is held for a whole drain, so ticks are serialized
/// and can never overlap.
pub struct Pool {
    dir: PathBuf,
    size_threshold: usize,
    rate: u32,
    outdummy: u32,
    interval: Duration,
    longname: String,
    address: String,
    sched: Mutex<Sched>,
}

impl Pool {
    pub fn open(
        dir: impl AsRef<Path>,
        size_threshold: usize,
        rate: u32,
        outdummy: u32,
        interval: Duration,
        longname: &str,
        address: &str,
    ) -> Result<Self, MixError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        info!(
            "pool {}: threshold={}, rate={}%, outdummy={}%, interval={:?}",
            dir.display(),
            size_threshold,
            rate,
            outdummy,
            interval
        );
        Ok(Self {
            dir,
            size_threshold,
            rate,
            outdummy,
            interval,
            longname: longname.to_string(),
            address: address.to_string(),
            // First drain one minute after startup, as a settling delay.
            sched: Mutex::new(Sched {
                next_process: Instant::now() + Duration::from_secs(60),
            }),
        })
    }

    /// Atomically add a message: temp file, fsync, rename.
    pub fn deposit(&self, email: &Email) -> Result<(), MixError> {
        let name = format!("m{}", hex::encode(crate::crypto::random_array::<8>()));
        let tmp = self.dir.join(format!("{}.tmp", name));
        {
            let mut f = File::create(&tmp)?;
            f.write_all(email.render().as_bytes())?;
            f.sync_all()?;
        }
        fs::rename(&tmp, self.dir.join(&name))?;
        debug!("pooled {} for {}", name, email.get("To").unwrap_or("?"));
        Ok(())
    }

    /// Messages currently pooled.
    pub fn count(&self) -> Result<usize, MixError> {
        Ok(self.message_files()?.len())
    }

    /// Make the next `tick` drain immediately.
    pub fn trigger(&self) {
        self.sched.lock().next_process = Instant::now();
    }

    /// Drain a randomized slice if the tick is due.
    ///
    /// Failure policy: a connection-class error aborts the whole tick and
    /// deletes nothing; a transient refusal keeps that file for the next
    /// tick; a fatal rejection logs and discards that file. Other
    /// messages keep flowing in the last two cases.
    pub fn tick(&self, mailer: &mut dyn Mailer) -> Result<TickReport, MixError> {
        let mut sched = self.sched.lock();
        let mut report = TickReport::default();
        if Instant::now() < sched.next_process {
            return Ok(report);
        }
        sched.next_process = Instant::now() + self.interval;

        let picked = self.pick_files()?;
        debug!("pool tick: {} messages selected", picked.len());
        for path in picked {
            match self.dispatch(&path, mailer) {
                Ok(()) => {
                    fs::remove_file(&path)?;
                    report.dispatched += 1;
                }
                Err(MixError::Smtp(e)) => match e.kind {
                    SendErrorKind::Connection => {
                        warn!("pool tick aborted: {}", e);
                        return Err(MixError::Smtp(e));
                    }
                    SendErrorKind::Transient => {
                        warn!("{}: kept for retry: {}", path.display(), e);
                        report.failed += 1;
                    }
                    SendErrorKind::Fatal => {
                        warn!("{}: discarded: {}", path.display(), e);
                        fs::remove_file(&path)?;
                        report.failed += 1;
                    }
                },
                Err(e) => {
                    warn!("{}: unreadable pool file: {}", path.display(), e);
                    report.failed += 1;
                }
            }
        }

        report.want_dummy = OsRng.gen_range(0..100) < self.outdummy;
        Ok(report)
    }

    fn dispatch(&self, path: &Path, mailer: &mut dyn Mailer) -> Result<(), MixError> {
        let mut email = Email::parse(&fs::read_to_string(path)?);
        let to = email
            .get("To")
            .ok_or_else(|| MixError::MalformedArmor("pool message without To".into()))?
            .to_string();
        // Stamped at hand-off time, never stored in the pool file.
        let domain = self.address.split('@').nth(1).unwrap_or("localhost");
        email.set("Message-ID", crate::mail::msgid(domain));
        email.set("Date", chrono::Utc::now().to_rfc2822());
        email.set("From", format!("{} <{}>", self.longname, self.address));
        mailer.sendmail(&self.address, &to, &email.render())?;
        debug!("sent pool message to {}", to);
        Ok(())
    }

    /// The randomized slice rule described in the module docs.
    fn pick_files(&self) -> Result<Vec<PathBuf>, MixError> {
        let mut files = self.message_files()?;
        let total = files.len();
        if total < self.size_threshold {
            debug!(
                "pool below threshold ({} < {}), sending nothing",
                total, self.size_threshold
            );
            return Ok(Vec::new());
        }
        let k = total * self.rate as usize / 100;
        if k == 0 {
            return Ok(Vec::new());
        }
        files.shuffle(&mut OsRng);
        let start = OsRng.gen_range(0..=total - k);
        Ok(files[start..start + k].to_vec())
    }

    fn message_files(&self) -> Result<Vec<PathBuf>, MixError> {
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            if name.to_string_lossy().starts_with('m')
                && !name.to_string_lossy().ends_with(".tmp")
                && entry.path().is_file()
            {
                out.push(entry.path());
            }
        }
        Ok(out)
    }
}
