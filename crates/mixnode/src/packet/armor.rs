// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! ASCII armor for packets in transit.
//!
//! A remailer message body is the base64 of the 20,480 packet bytes,
//! wrapped at 40 columns between the literal cutmarks, preceded by the
//! `::` marker block carrying the `Remailer-Type` banner.

use super::PACKET_LEN;
use crate::error::MixError;
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;

pub const ARMOR_BEGIN: &str = "-----BEGIN REMAILER MESSAGE-----";
pub const ARMOR_END: &str = "-----END REMAILER MESSAGE-----";

/// Base64 wrap width for armored packets and key blocks.
const WRAP_COLS: usize = 40;

/// Base64-encode and wrap to fixed-width lines.
pub fn wrap_base64(data: &[u8], width: usize) -> String {
    let encoded = B64.encode(data);
    let mut out = String::with_capacity(encoded.len() + encoded.len() / width + 1);
    let mut rest = encoded.as_str();
    while !rest.is_empty() {
        let take = width.min(rest.len());
        out.push_str(&rest[..take]);
        out.push('\n');
        rest = &rest[take..];
    }
    out
}

/// Armor a serialized packet into a mail body.
pub fn armor_packet(packet: &[u8], remailer_type: &str) -> String {
    let mut body = String::new();
    body.push_str("::\n");
    body.push_str(&format!("Remailer-Type: {}\n\n", remailer_type));
    body.push_str(ARMOR_BEGIN);
    body.push('\n');
    body.push_str(&wrap_base64(packet, WRAP_COLS));
    body.push_str(ARMOR_END);
    body.push('\n');
    body
}

/// Strip the armor from a mail body and decode the packet bytes.
///
/// Lines outside the cutmarks are ignored; the decoded length must be
/// exactly one packet.
pub fn dearmor(body: &str) -> Result<Vec<u8>, MixError> {
    let mut in_armor = false;
    let mut saw_end = false;
    let mut b64 = String::new();
    for line in body.lines() {
        let line = line.trim_end();
        if line == ARMOR_BEGIN {
            if in_armor {
                return Err(MixError::MalformedArmor("nested begin cutmark".into()));
            }
            in_armor = true;
        } else if line == ARMOR_END {
            if !in_armor {
                return Err(MixError::MalformedArmor("end cutmark before begin".into()));
            }
            in_armor = false;
            saw_end = true;
        } else if in_armor {
            b64.push_str(line);
        }
    }
    if !saw_end {
        return Err(MixError::MalformedArmor("missing cutmarks".into()));
    }
    let raw = B64
        .decode(b64.as_bytes())
        .map_err(|e| MixError::MalformedArmor(format!("base64: {}", e)))?;
    if raw.len() != PACKET_LEN {
        return Err(MixError::LenMismatch {
            what: "packet",
            want: PACKET_LEN,
            got: raw.len(),
        });
    }
    Ok(raw)
}
