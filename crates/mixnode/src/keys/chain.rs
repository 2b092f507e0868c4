// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Hop chain selection.
//!
//! A chain pattern is an ordered list of short names with `*` standing
//! for "pick one at random". No peer appears twice in a chain, and the
//! exit slot only accepts peers that advertise exit capability. All
//! randomness comes from the OS CSPRNG.

use crate::error::MixError;
use crate::keys::pubring::{Peer, PublicKeyStore};
use rand::rngs::OsRng;
use rand::seq::SliceRandom;
use std::sync::Arc;

/// The wildcard slot in a chain pattern.
pub const RANDOM_HOP: &str = "*";

pub struct ChainSelector {
    pubring: Arc<PublicKeyStore>,
}

impl ChainSelector {
    pub fn new(pubring: Arc<PublicKeyStore>) -> Self {
        Self { pubring }
    }

    /// Resolve a pattern into an ordered hop list. The first entry is the
    /// hop the packet is mailed to; the last is the exit.
    pub fn chain(&self, pattern: &[String]) -> Result<Vec<Peer>, MixError> {
        if pattern.is_empty() || pattern.len() > crate::packet::HEADER_SLOTS {
            return Err(MixError::LenMismatch {
                what: "chain",
                want: crate::packet::HEADER_SLOTS,
                got: pattern.len(),
            });
        }
        let mut hops: Vec<Peer> = Vec::with_capacity(pattern.len());
        // Fill the exit slot first so the exit-capability constraint never
        // collides with names already used up by random picks.
        for (i, slot) in pattern.iter().enumerate().rev() {
            let exit = i == pattern.len() - 1;
            let peer = if slot == RANDOM_HOP {
                self.pick_random(&hops, exit)?
            } else {
                let peer = self
                    .pubring
                    .by_name(slot)
                    .ok_or_else(|| MixError::UnknownRecipient(slot.clone()))?;
                if hops.iter().any(|h| h.name == peer.name) {
                    return Err(MixError::UnknownRecipient(format!(
                        "{} appears twice in chain",
                        peer.name
                    )));
                }
                if exit && !peer.can_exit() {
                    return Err(MixError::UnknownRecipient(format!(
                        "{} is middle-only, cannot exit",
                        peer.name
                    )));
                }
                peer
            };
            hops.push(peer);
        }
        hops.reverse();
        Ok(hops)
    }

    /// An all-random chain of `n` hops.
    pub fn random_chain(&self, n: usize) -> Result<Vec<Peer>, MixError> {
        self.chain(&vec![RANDOM_HOP.to_string(); n])
    }

    /// Any peer advertising exit capability.
    pub fn random_exit(&self) -> Result<Peer, MixError> {
        self.pubring
            .random_exit()
            .ok_or_else(|| MixError::UnknownRecipient("no exit-capable peer known".into()))
    }

    fn pick_random(&self, used: &[Peer], exit: bool) -> Result<Peer, MixError> {
        let candidates: Vec<Peer> = self
            .pubring
            .peers()
            .into_iter()
            .filter(|p| (!exit || p.can_exit()) && !used.iter().any(|u| u.name == p.name))
            .collect();
        candidates
            .choose(&mut OsRng)
            .cloned()
            .ok_or_else(|| MixError::UnknownRecipient("not enough distinct peers for chain".into()))
    }
}
