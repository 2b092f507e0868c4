// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The Type-II packet layout.
//!
//! Every packet that crosses the network is exactly 20,480 bytes: a stack
//! of 20 header slots of 512 bytes followed by a 10,240-byte payload. Each
//! hop consumes the first slot, decrypts the rest, shifts the stack up one
//! slot and appends 512 bytes of fresh random padding, so size and shape
//! are invariant along the whole route.
//!
//! All multi-byte integers in headers and payload framing are
//! little-endian.

mod armor;
mod header;
mod payload;

pub use armor::{armor_packet, dearmor, wrap_base64, ARMOR_BEGIN, ARMOR_END};
pub use header::{HopInfo, InnerHeader, OuterHeader};
pub use payload::{
    encode_fragment, parse_fragment, FinalPayload, DUMMY_RECIPIENT, MAX_FRAGMENT_LEN,
};

use crate::error::MixError;
use std::fmt;

/// Serialized packet size.
pub const PACKET_LEN: usize = 20_480;
/// Number of header slots in the stack.
pub const HEADER_SLOTS: usize = 20;
/// One header slot.
pub const HEADER_LEN: usize = 512;
/// The whole header stack.
pub const HEADER_STACK_LEN: usize = HEADER_SLOTS * HEADER_LEN;
/// The slots below the consumed one (19 x 512).
pub const REST_STACK_LEN: usize = HEADER_STACK_LEN - HEADER_LEN;
/// Symmetric payload.
pub const PAYLOAD_LEN: usize = 10_240;
/// Decrypted inner header.
pub const INNER_LEN: usize = 328;
/// RSA-encrypted session key block; only a 1024-bit modulus fits.
pub const RSA_BLOCK_LEN: usize = 128;
/// 3DES session key.
pub const SESSION_KEY_LEN: usize = 24;
/// CBC initialization vector.
pub const IV_LEN: usize = 8;
/// Key-ID, Packet-ID, Message-ID, Chunk-ID and MD5 digest width.
pub const DIGEST_LEN: usize = 16;
/// One address or header-line field in the payload framing.
pub const FIELD_LEN: usize = 80;
/// The five fixed bytes that open the 7-byte timestamp.
pub const TS_SIGNATURE: [u8; 5] = [0x30, 0x30, 0x30, 0x30, 0x00];

/// MD5 of an RSA modulus-and-exponent wire block: the stable identity of
/// a key pair across the whole protocol.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyId([u8; DIGEST_LEN]);

impl KeyId {
    pub fn from_bytes(bytes: [u8; DIGEST_LEN]) -> Self {
        Self(bytes)
    }

    /// Parse the 32-hex-digit text form used in key ring files.
    pub fn from_hex(s: &str) -> Result<Self, MixError> {
        let raw = hex::decode(s.trim())
            .map_err(|_| MixError::MalformedKey(format!("bad Key-ID hex: {}", s.trim())))?;
        let bytes: [u8; DIGEST_LEN] = raw
            .try_into()
            .map_err(|_| MixError::MalformedKey(format!("bad Key-ID length: {}", s.trim())))?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyId({})", self.to_hex())
    }
}

/// A complete 20,480-byte packet.
pub struct Packet {
    bytes: Box<[u8; PACKET_LEN]>,
}

impl Packet {
    /// Wrap raw bytes; anything but exactly 20,480 is rejected.
    pub fn from_bytes(raw: &[u8]) -> Result<Self, MixError> {
        if raw.len() != PACKET_LEN {
            return Err(MixError::LenMismatch {
                what: "packet",
                want: PACKET_LEN,
                got: raw.len(),
            });
        }
        let mut bytes = Box::new([0u8; PACKET_LEN]);
        bytes.copy_from_slice(raw);
        Ok(Self { bytes })
    }

    /// Assemble from a first slot, the 19 lower slots and a payload.
    pub fn from_parts(slot0: &[u8], rest: &[u8], payload: &[u8]) -> Result<Self, MixError> {
        if slot0.len() != HEADER_LEN {
            return Err(MixError::LenMismatch {
                what: "header slot",
                want: HEADER_LEN,
                got: slot0.len(),
            });
        }
        if rest.len() != REST_STACK_LEN {
            return Err(MixError::LenMismatch {
                what: "header stack tail",
                want: REST_STACK_LEN,
                got: rest.len(),
            });
        }
        if payload.len() != PAYLOAD_LEN {
            return Err(MixError::LenMismatch {
                what: "payload",
                want: PAYLOAD_LEN,
                got: payload.len(),
            });
        }
        let mut bytes = Box::new([0u8; PACKET_LEN]);
        bytes[..HEADER_LEN].copy_from_slice(slot0);
        bytes[HEADER_LEN..HEADER_STACK_LEN].copy_from_slice(rest);
        bytes[HEADER_STACK_LEN..].copy_from_slice(payload);
        Ok(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..]
    }

    /// Header slot `i` (0-based).
    pub fn slot(&self, i: usize) -> &[u8] {
        debug_assert!(i < HEADER_SLOTS);
        &self.bytes[i * HEADER_LEN..(i + 1) * HEADER_LEN]
    }

    /// Slots 1..20, the part a hop decrypts and shifts up.
    pub fn rest_slots(&self) -> &[u8] {
        &self.bytes[HEADER_LEN..HEADER_STACK_LEN]
    }

    pub fn payload(&self) -> &[u8] {
        &self.bytes[HEADER_STACK_LEN..]
    }
}
