// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The decode pipeline: peel one layer, authenticate, classify.
//!
//! `decrypt` runs the fixed sequence: parse the first slot, resolve our
//! secret key, unwrap the session key, decrypt and authenticate the inner
//! header, pass the replay and timestamp gates, then decrypt the lower 19
//! slots and the payload under the body session key. The replay insert is
//! durable before anything downstream happens, so a crash can lose a
//! packet but never accept it twice.
//!
//! `classify` turns the decrypted packet into the routing outcome the
//! caller acts on. Forwarded packets are rebuilt here: headers shifted up
//! one slot, 512 fresh random bytes appended, so the outbound packet is
//! indistinguishable in shape from the inbound one.

use crate::crypto;
use crate::error::MixError;
use crate::keys::{Peer, PublicKeyStore, SecretKeyStore};
use crate::mail::Email;
use crate::packet::{
    dearmor, parse_fragment, FinalPayload, HopInfo, InnerHeader, OuterHeader, Packet, DIGEST_LEN,
    HEADER_LEN, HEADER_SLOTS, REST_STACK_LEN,
};
use crate::replay::ReplayLog;
use crate::timing;
use std::sync::Arc;
use tracing::{debug, warn};

/// What a decoded packet asks the node to do.
pub enum Outcome {
    /// Final hop: deliver to the framed recipients.
    Deliver(FinalPayload),
    /// Intermediate hop: mail the rebuilt packet to the next remailer.
    Forward { peer: Peer, packet: Packet },
    /// Partial final hop: one chunk for the reassembler.
    Chunk {
        chunk_id: [u8; DIGEST_LEN],
        index: u8,
        total: u8,
        fragment: Vec<u8>,
    },
    /// Cover traffic; drop without a trace.
    Dummy,
    /// A recipient is operator-blocked; re-encode through a random hop.
    Blocked { payload: Vec<u8> },
}

/// A packet after its layer came off.
pub struct Decrypted {
    pub inner: InnerHeader,
    /// The 19 lower header slots, decrypted.
    pub rest: Vec<u8>,
    /// The payload, decrypted.
    pub payload: Vec<u8>,
}

pub struct Decoder {
    secring: Arc<SecretKeyStore>,
    pubring: Arc<PublicKeyStore>,
    replay: Arc<ReplayLog>,
    /// Reject packets older than this many days.
    max_age_days: u16,
    /// Tolerated clock skew for timestamps from the future.
    skew_days: u16,
    /// Lower-cased deny patterns: exact address or trailing match.
    dest_block: Vec<String>,
}

impl Decoder {
    pub fn new(
        secring: Arc<SecretKeyStore>,
        pubring: Arc<PublicKeyStore>,
        replay: Arc<ReplayLog>,
        max_age_days: u16,
        dest_block: &[String],
    ) -> Self {
        Self {
            secring,
            pubring,
            replay,
            max_age_days,
            skew_days: 1,
            dest_block: dest_block.iter().map(|p| p.to_ascii_lowercase()).collect(),
        }
    }

    /// Strip the armor from an inbound message body and check the size.
    pub fn email_to_packet(email: &Email) -> Result<Packet, MixError> {
        let raw = dearmor(email.body())?;
        Packet::from_bytes(&raw)
    }

    /// Peel one layer. See the module docs for the exact sequence.
    pub fn decrypt(&self, packet: &Packet) -> Result<Decrypted, MixError> {
        let outer = OuterHeader::parse(packet.slot(0))?;
        let secret = self
            .secring
            .lookup(&outer.key_id)
            .ok_or_else(|| MixError::UnknownRecipient(outer.key_id.to_hex()))?;

        let session = crypto::rsa_unwrap(&secret, &outer.rsa_ct)?;
        let inner_plain = crypto::des3_decrypt(&session, &outer.iv, &outer.inner_ct)?;
        let inner = InnerHeader::parse(&inner_plain)?;

        // Replay and staleness gates. The final check_and_insert is the
        // atomic one; the early contains() only keeps the common replay
        // path from paying for a timestamp check.
        if self.replay.contains(&inner.packet_id) {
            return Err(MixError::Replay);
        }
        // Widened so a hostile epoch-day near u16::MAX cannot overflow.
        let now = timing::epoch_days();
        let stamped = inner.epoch_days as u32;
        if (stamped + self.max_age_days as u32) < (now as u32)
            || stamped > (now as u32) + (self.skew_days as u32)
        {
            return Err(MixError::Stale(inner.epoch_days));
        }
        if !self.replay.check_and_insert(inner.packet_id, now)? {
            return Err(MixError::Replay);
        }

        let iv = *inner.info.body_iv();
        let mut rest = Vec::with_capacity(REST_STACK_LEN);
        for i in 1..HEADER_SLOTS {
            rest.extend_from_slice(&crypto::des3_decrypt(
                &inner.body_key,
                &iv,
                packet.slot(i),
            )?);
        }
        let payload = crypto::des3_decrypt(&inner.body_key, &iv, packet.payload())?;

        Ok(Decrypted {
            inner,
            rest,
            payload,
        })
    }

    /// Decide the routing outcome for a decrypted packet.
    pub fn classify(&self, dec: Decrypted) -> Result<Outcome, MixError> {
        match dec.inner.info {
            HopInfo::Intermediate {
                next_key_id,
                header_digest,
                ..
            } => {
                if crypto::md5(&dec.rest) != header_digest {
                    // Only the inner-header digest gates acceptance; this
                    // one is advisory.
                    warn!("forwarded header stack digest mismatch");
                }
                let peer = self
                    .pubring
                    .by_key_id(&next_key_id)
                    .ok_or_else(|| MixError::UnknownRecipient(next_key_id.to_hex()))?;

                let mut stack = dec.rest;
                stack.extend_from_slice(&crypto::random_vec(HEADER_LEN));
                let packet =
                    Packet::from_parts(&stack[..HEADER_LEN], &stack[HEADER_LEN..], &dec.payload)?;
                debug!("forwarding to {}", peer.name);
                Ok(Outcome::Forward { peer, packet })
            }
            HopInfo::Final { .. } => {
                let payload = FinalPayload::parse(&dec.payload)?;
                if payload.is_dummy() {
                    return Ok(Outcome::Dummy);
                }
                if payload.recipients.iter().any(|r| self.blocked(r)) {
                    debug!("destination blocked, bouncing to random hop");
                    return Ok(Outcome::Blocked {
                        payload: dec.payload,
                    });
                }
                Ok(Outcome::Deliver(payload))
            }
            HopInfo::Partial {
                chunk_id,
                index,
                total,
                ..
            } => {
                let fragment = parse_fragment(&dec.payload)?;
                Ok(Outcome::Chunk {
                    chunk_id,
                    index,
                    total,
                    fragment,
                })
            }
        }
    }

    fn blocked(&self, recipient: &str) -> bool {
        let addr = recipient.to_ascii_lowercase();
        self.dest_block
            .iter()
            .any(|pat| addr == *pat || addr.ends_with(pat))
    }
}
