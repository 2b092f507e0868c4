// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The encode pipeline: build layered packets for a hop chain.
//!
//! Packets are built from the exit inward. The exit layer carries the
//! framed payload under a fresh session key; each preceding hop wraps the
//! result by encrypting the first 19 header slots and the payload under
//! its own session key and prepending a new outer header. The slot a hop
//! will consume falls off the tail during wrapping, so the stack depth
//! never changes.

use crate::crypto;
use crate::error::MixError;
use crate::keys::{ChainSelector, Peer, PublicKeyStore};
use crate::mail::Email;
use crate::packet::{
    armor_packet, encode_fragment, FinalPayload, HopInfo, InnerHeader, KeyId, OuterHeader, Packet,
    DIGEST_LEN, HEADER_LEN, HEADER_SLOTS, INNER_LEN, IV_LEN, MAX_FRAGMENT_LEN, PAYLOAD_LEN,
    RSA_BLOCK_LEN, REST_STACK_LEN, SESSION_KEY_LEN,
};
use std::sync::Arc;
use tracing::debug;

/// Headers from a submitted message that survive into the payload
/// framing; everything else is routing noise the exit must not see.
const CARRIED_HEADERS: [&str; 3] = ["Subject", "References", "In-Reply-To"];

pub struct Encoder {
    selector: ChainSelector,
    /// The `Remailer-Type:` banner stamped into armored bodies.
    remailer_type: String,
    /// Cap on the framed message stream, in kilobytes.
    max_plain_kb: usize,
}

impl Encoder {
    pub fn new(pubring: Arc<PublicKeyStore>, remailer_type: &str, max_plain_kb: usize) -> Self {
        Self {
            selector: ChainSelector::new(pubring),
            remailer_type: remailer_type.to_string(),
            max_plain_kb,
        }
    }

    pub fn selector(&self) -> &ChainSelector {
        &self.selector
    }

    /// Encode a locally-submitted message through a hop chain.
    ///
    /// Returns one armored email per packet, each addressed to the first
    /// hop: a single Type-1 packet when the framed message fits one
    /// payload, a set of Type-2 chunks otherwise.
    pub fn encode_message(
        &self,
        message: &Email,
        chain_pattern: &[String],
    ) -> Result<Vec<Email>, MixError> {
        let recipients: Vec<String> = message
            .get("To")
            .map(|to| {
                to.split(',')
                    .map(|r| r.trim().to_string())
                    .filter(|r| !r.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        if recipients.is_empty() {
            return Err(MixError::UnknownRecipient("message has no To".into()));
        }
        let headers = CARRIED_HEADERS
            .iter()
            .filter_map(|name| message.get(name).map(|v| format!("{}: {}", name, v)))
            .collect();
        let payload = FinalPayload {
            recipients,
            headers,
            body: message.body().as_bytes().to_vec(),
        };

        let stream = payload.encode_stream()?;
        if stream.len() > self.max_plain_kb * 1024 {
            return Err(MixError::LenMismatch {
                what: "message",
                want: self.max_plain_kb * 1024,
                got: stream.len(),
            });
        }

        let hops = self.selector.chain(chain_pattern)?;
        if stream.len() <= PAYLOAD_LEN {
            let block = payload.encode_padded()?;
            let email = self.encode_block(&hops, &block, FinalKind::Message)?;
            return Ok(vec![email]);
        }

        // Too big for one payload: split the stream into chunks sharing a
        // Chunk-ID, each routed through the same chain with fresh keys.
        let fragments: Vec<&[u8]> = stream.chunks(MAX_FRAGMENT_LEN).collect();
        if fragments.len() > u8::MAX as usize {
            return Err(MixError::LenMismatch {
                what: "chunk count",
                want: u8::MAX as usize,
                got: fragments.len(),
            });
        }
        let chunk_id = crypto::random_array::<DIGEST_LEN>();
        let total = fragments.len() as u8;
        debug!("splitting {} byte message into {} chunks", stream.len(), total);
        fragments
            .iter()
            .enumerate()
            .map(|(i, frag)| {
                let block = encode_fragment(frag)?;
                self.encode_block(
                    &hops,
                    &block,
                    FinalKind::Chunk {
                        chunk_id,
                        index: i as u8,
                        total,
                    },
                )
            })
            .collect()
    }

    /// Re-encode an already-framed payload block through one random exit.
    ///
    /// This is the path blocked destinations and locally re-originated
    /// traffic take: the block goes out as a fresh single-hop Type-1
    /// packet under a randomly chosen exit remailer.
    pub fn random_hop(&self, payload_block: &[u8]) -> Result<Email, MixError> {
        if payload_block.len() != PAYLOAD_LEN {
            return Err(MixError::LenMismatch {
                what: "payload",
                want: PAYLOAD_LEN,
                got: payload_block.len(),
            });
        }
        let exit = self.selector.random_exit()?;
        let packet = self.exit_packet(&exit, payload_block, FinalKind::Message)?;
        Ok(self.armor_email(&exit, &packet))
    }

    /// A cover-traffic packet: random-hopped, addressed to the null
    /// recipient, dropped without a trace at the exit.
    pub fn dummy(&self) -> Result<Email, MixError> {
        let payload = FinalPayload {
            recipients: vec![crate::packet::DUMMY_RECIPIENT.to_string()],
            headers: Vec::new(),
            // A plausible amount of nothing.
            body: crypto::random_vec(1024),
        };
        self.random_hop(&payload.encode_padded()?)
    }

    /// Build the nested packet for `hops` around one payload block and
    /// armor it for the first hop.
    fn encode_block(
        &self,
        hops: &[Peer],
        block: &[u8],
        kind: FinalKind,
    ) -> Result<Email, MixError> {
        let (exit, relays) = hops.split_last().ok_or(MixError::LenMismatch {
            what: "chain",
            want: 1,
            got: 0,
        })?;
        let mut packet = self.exit_packet(exit, block, kind)?;
        let mut next_key_id = exit.key_id;
        for hop in relays.iter().rev() {
            packet = self.wrap_hop(hop, next_key_id, &packet)?;
            next_key_id = hop.key_id;
        }
        Ok(self.armor_email(&hops[0], &packet))
    }

    /// The innermost layer: payload encrypted under a fresh session key,
    /// random filler below the one live header slot.
    fn exit_packet(
        &self,
        peer: &Peer,
        payload_block: &[u8],
        kind: FinalKind,
    ) -> Result<Packet, MixError> {
        let iv = crypto::random_array::<IV_LEN>();
        let info = match kind {
            FinalKind::Message => HopInfo::Final {
                message_id: crypto::random_array::<DIGEST_LEN>(),
                iv,
            },
            FinalKind::Chunk {
                chunk_id,
                index,
                total,
            } => HopInfo::Partial {
                chunk_id,
                index,
                total,
                iv,
            },
        };
        let inner = InnerHeader::fresh(info);
        let enc_payload = crypto::des3_encrypt(&inner.body_key, &iv, payload_block)?;
        let slot0 = outer_slot(peer, &inner)?;
        let filler = crypto::random_vec(REST_STACK_LEN);
        Packet::from_parts(&slot0, &filler, &enc_payload)
    }

    /// Wrap an existing packet for one more hop.
    fn wrap_hop(&self, peer: &Peer, next_key_id: KeyId, next: &Packet) -> Result<Packet, MixError> {
        let iv = crypto::random_array::<IV_LEN>();
        // Digest over the 19 slots the next hop will see after the shift.
        let header_digest = crypto::md5(&next.as_bytes()[..REST_STACK_LEN]);
        let inner = InnerHeader::fresh(HopInfo::Intermediate {
            next_key_id,
            iv,
            header_digest,
            reserved: [0, 0],
        });

        let mut rest = Vec::with_capacity(REST_STACK_LEN);
        for i in 0..HEADER_SLOTS - 1 {
            rest.extend_from_slice(&crypto::des3_encrypt(&inner.body_key, &iv, next.slot(i))?);
        }
        let payload = crypto::des3_encrypt(&inner.body_key, &iv, next.payload())?;
        let slot0 = outer_slot(peer, &inner)?;
        Packet::from_parts(&slot0, &rest, &payload)
    }

    fn armor_email(&self, first_hop: &Peer, packet: &Packet) -> Email {
        let mut email = Email::new();
        email.add("To", first_hop.email.clone());
        email.set_body(armor_packet(packet.as_bytes(), &self.remailer_type));
        email
    }
}

/// Which final-hop flavor an exit layer carries.
#[derive(Clone, Copy)]
enum FinalKind {
    Message,
    Chunk {
        chunk_id: [u8; DIGEST_LEN],
        index: u8,
        total: u8,
    },
}

/// Encrypt an inner header for a peer and serialize the outer slot.
fn outer_slot(peer: &Peer, inner: &InnerHeader) -> Result<[u8; HEADER_LEN], MixError> {
    let session = crypto::random_array::<SESSION_KEY_LEN>();
    let iv = crypto::random_array::<IV_LEN>();
    let inner_ct_vec = crypto::des3_encrypt(&session, &iv, &inner.encode())?;
    let rsa_ct_vec = crypto::rsa_wrap(&peer.key, &session)?;

    let mut rsa_ct = [0u8; RSA_BLOCK_LEN];
    rsa_ct.copy_from_slice(&rsa_ct_vec);
    let mut inner_ct = [0u8; INNER_LEN];
    inner_ct.copy_from_slice(&inner_ct_vec);

    let outer = OuterHeader {
        key_id: peer.key_id,
        rsa_ct,
        iv,
        inner_ct,
    };
    Ok(outer.encode())
}
