// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The node: stores, pipelines and pool wired together.
//!
//! `process_mail` is the per-packet boundary: any error that comes out of
//! it condemns only that message. The silent-drop classes surface as
//! errors here too; the caller counts them and says nothing on the wire.

use crate::chunk::{ChunkState, ChunkStore};
use crate::config::Config;
use crate::decoder::{Decoder, Outcome};
use crate::encoder::Encoder;
use crate::error::MixError;
use crate::keys::{PublicKeyStore, SecretKeyStore};
use crate::mail::{Email, Mailer};
use crate::packet::{armor_packet, FinalPayload, Packet, DUMMY_RECIPIENT};
use crate::pool::{Pool, TickReport};
use crate::replay::ReplayLog;
use std::fs;
use std::sync::Arc;
use tracing::{debug, info};

/// How a processed message was consumed.
pub enum Disposition {
    /// The packet produced this many pool entries.
    Pooled(usize),
    /// A chunk was stored; its set is still incomplete.
    ChunkStored,
    /// Cover traffic, dropped.
    Dummy,
}

pub struct MixNode {
    config: Config,
    pubring: Arc<PublicKeyStore>,
    replay: Arc<ReplayLog>,
    chunks: ChunkStore,
    pool: Pool,
    decoder: Decoder,
    encoder: Encoder,
}

impl MixNode {
    /// Build the node from configuration. Missing key rings are fatal
    /// here; every other store is created on first use.
    pub fn open(config: Config) -> Result<Self, MixError> {
        let secring = Arc::new(SecretKeyStore::open(&config.keys.secring)?);
        let pubring = Arc::new(PublicKeyStore::open(&config.keys.pubring)?);
        let replay = Arc::new(ReplayLog::open(&config.paths.idlog)?);
        let chunks = ChunkStore::open(&config.paths.chunks)?;
        let pool = Pool::open(
            &config.paths.pool,
            config.pool.size,
            config.pool.rate,
            config.pool.outdummy,
            config.pool_interval(),
            &config.general.longname,
            &config.mail.address,
        )?;
        let decoder = Decoder::new(
            secring.clone(),
            pubring.clone(),
            replay.clone(),
            config.general.idexp_days,
            &config.general.dest_block,
        );
        let encoder = Encoder::new(
            pubring.clone(),
            &config.general.version,
            config.general.klen,
        );
        info!(
            "node up: {} secret keys, {} peers",
            secring.len(),
            pubring.peers().len()
        );
        Ok(Self {
            config,
            pubring,
            replay,
            chunks,
            pool,
            decoder,
            encoder,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Decode one inbound remailer message and act on the outcome.
    pub fn process_mail(&self, email: &Email) -> Result<Disposition, MixError> {
        let packet = Decoder::email_to_packet(email)?;
        let decrypted = self.decoder.decrypt(&packet)?;
        let outcome = self.decoder.classify(decrypted)?;
        self.act(outcome)
    }

    fn act(&self, outcome: Outcome) -> Result<Disposition, MixError> {
        match outcome {
            Outcome::Forward { peer, packet } => {
                self.pool.deposit(&self.packet_email(&peer.email, &packet))?;
                Ok(Disposition::Pooled(1))
            }
            Outcome::Deliver(payload) => self.deliver(payload),
            Outcome::Dummy => Ok(Disposition::Dummy),
            Outcome::Blocked { payload } => {
                let email = self.encoder.random_hop(&payload)?;
                self.pool.deposit(&email)?;
                Ok(Disposition::Pooled(1))
            }
            Outcome::Chunk {
                chunk_id,
                index,
                total,
                fragment,
            } => match self.chunks.add(&chunk_id, index, total, &fragment)? {
                ChunkState::Incomplete { have, total } => {
                    debug!("chunk set at {}/{}", have, total);
                    Ok(Disposition::ChunkStored)
                }
                ChunkState::Complete(stream) => {
                    let payload = FinalPayload::parse(&stream)?;
                    if payload.is_dummy() {
                        return Ok(Disposition::Dummy);
                    }
                    self.deliver(payload)
                }
            },
        }
    }

    /// Pool one delivery email per listed recipient.
    fn deliver(&self, payload: FinalPayload) -> Result<Disposition, MixError> {
        let body = String::from_utf8_lossy(&payload.body).into_owned();
        let mut pooled = 0;
        for rcpt in &payload.recipients {
            if rcpt == DUMMY_RECIPIENT {
                continue;
            }
            let mut email = Email::new();
            email.add("To", rcpt.clone());
            for line in &payload.headers {
                if let Some((name, value)) = line.split_once(':') {
                    email.add(name.trim(), value.trim());
                }
            }
            email.set_body(body.clone());
            self.pool.deposit(&email)?;
            pooled += 1;
        }
        Ok(Disposition::Pooled(pooled))
    }

    /// Submit a locally-originated message through a hop chain.
    pub fn submit(&self, message: &Email, chain: &[String]) -> Result<usize, MixError> {
        let emails = self.encoder.encode_message(message, chain)?;
        let n = emails.len();
        for email in emails {
            self.pool.deposit(&email)?;
        }
        Ok(n)
    }

    /// Drain the pool if due, injecting a dummy when the roll says so.
    pub fn tick(&self, mailer: &mut dyn Mailer) -> Result<TickReport, MixError> {
        let report = self.pool.tick(mailer)?;
        if report.want_dummy {
            debug!("injecting dummy message");
            let email = self.encoder.dummy()?;
            self.pool.deposit(&email)?;
        }
        Ok(report)
    }

    /// Periodic store maintenance: prune the replay log, expire stale
    /// chunk sets.
    pub fn housekeeping(&self) -> Result<(), MixError> {
        self.replay.prune(self.config.general.idexp_days)?;
        self.chunks.expire(self.config.chunk_expiry())?;
        Ok(())
    }

    /// Flush every persistent store; called on the way out.
    pub fn shutdown(&self) -> Result<(), MixError> {
        self.replay.close()?;
        self.chunks.sync()?;
        info!("stores flushed");
        Ok(())
    }

    /// The published key file, as served by `remailer-key`.
    pub fn public_key_armor(&self) -> Result<String, MixError> {
        Ok(fs::read_to_string(&self.config.keys.pubkey)?)
    }

    /// The one-line capability string peers and pingers parse.
    pub fn capabilities_text(&self) -> String {
        format!(
            "$remailer{{\"{}\"}} = \"<{}> mix klen{}\";",
            self.config.general.shortname, self.config.mail.address, self.config.general.klen
        )
    }

    /// Header lines of every known peer, for `remailer-conf`.
    pub fn peer_header_list(&self) -> Vec<String> {
        self.pubring.list_headers()
    }

    fn packet_email(&self, to: &str, packet: &Packet) -> Email {
        let mut email = Email::new();
        email.add("To", to);
        email.set_body(armor_packet(packet.as_bytes(), &self.config.general.version));
        email
    }
}
