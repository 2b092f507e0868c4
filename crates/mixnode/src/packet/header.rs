// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Outer and inner header codecs.
//!
//! Outer header, the plaintext first slot (512 bytes):
//!
//! | Offset | Size | Field |
//! |-------:|-----:|-------|
//! | 0      | 16   | Key-ID of the consuming hop |
//! | 16     | 1    | RSA ciphertext length (always 128) |
//! | 17     | 128  | RSA-encrypted 24-byte session key |
//! | 145    | 8    | IV for the encrypted inner header |
//! | 153    | 328  | 3DES-CBC encrypted inner header |
//! | 481    | 31   | Random padding |
//!
//! Inner header, after 3DES decryption (328 bytes):
//!
//! | Offset | Size | Field |
//! |-------:|-----:|-------|
//! | 0      | 16   | Packet-ID (replay key for this hop) |
//! | 16     | 24   | Body session key |
//! | 40     | 1    | Packet type (0/1/2) |
//! | 41     | k    | Type-dependent info |
//! | 41+k   | 7    | Timestamp: `30 30 30 30 00` + LE u16 epoch-days |
//! | 48+k   | 16   | MD5 over bytes 0..48+k |
//! | 64+k   | ..   | Random padding to 328 |

use super::{
    KeyId, DIGEST_LEN, HEADER_LEN, INNER_LEN, IV_LEN, RSA_BLOCK_LEN, SESSION_KEY_LEN, TS_SIGNATURE,
};
use crate::crypto;
use crate::error::MixError;

const RSA_LEN_OFFSET: usize = DIGEST_LEN;
const RSA_CT_OFFSET: usize = RSA_LEN_OFFSET + 1;
const OUTER_IV_OFFSET: usize = RSA_CT_OFFSET + RSA_BLOCK_LEN;
const INNER_CT_OFFSET: usize = OUTER_IV_OFFSET + IV_LEN;
const OUTER_PAD_OFFSET: usize = INNER_CT_OFFSET + INNER_LEN;

/// The plaintext fields of a consumed first slot.
pub struct OuterHeader {
    pub key_id: KeyId,
    pub rsa_ct: [u8; RSA_BLOCK_LEN],
    pub iv: [u8; IV_LEN],
    pub inner_ct: [u8; INNER_LEN],
}

impl OuterHeader {
    /// Split a 512-byte slot into its fields.
    pub fn parse(slot: &[u8]) -> Result<Self, MixError> {
        if slot.len() != HEADER_LEN {
            return Err(MixError::LenMismatch {
                what: "header slot",
                want: HEADER_LEN,
                got: slot.len(),
            });
        }
        let declared = slot[RSA_LEN_OFFSET] as usize;
        if declared != RSA_BLOCK_LEN {
            return Err(MixError::LenMismatch {
                what: "RSA ciphertext",
                want: RSA_BLOCK_LEN,
                got: declared,
            });
        }
        let mut key_id = [0u8; DIGEST_LEN];
        key_id.copy_from_slice(&slot[..DIGEST_LEN]);
        let mut rsa_ct = [0u8; RSA_BLOCK_LEN];
        rsa_ct.copy_from_slice(&slot[RSA_CT_OFFSET..OUTER_IV_OFFSET]);
        let mut iv = [0u8; IV_LEN];
        iv.copy_from_slice(&slot[OUTER_IV_OFFSET..INNER_CT_OFFSET]);
        let mut inner_ct = [0u8; INNER_LEN];
        inner_ct.copy_from_slice(&slot[INNER_CT_OFFSET..OUTER_PAD_OFFSET]);
        Ok(Self {
            key_id: KeyId::from_bytes(key_id),
            rsa_ct,
            iv,
            inner_ct,
        })
    }

    /// Serialize to a full slot, random-padding the 31-byte tail.
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut slot = [0u8; HEADER_LEN];
        slot[..DIGEST_LEN].copy_from_slice(self.key_id.as_bytes());
        slot[RSA_LEN_OFFSET] = RSA_BLOCK_LEN as u8;
        slot[RSA_CT_OFFSET..OUTER_IV_OFFSET].copy_from_slice(&self.rsa_ct);
        slot[OUTER_IV_OFFSET..INNER_CT_OFFSET].copy_from_slice(&self.iv);
        slot[INNER_CT_OFFSET..OUTER_PAD_OFFSET].copy_from_slice(&self.inner_ct);
        slot[OUTER_PAD_OFFSET..].copy_from_slice(&crypto::random_array::<31>());
        slot
    }
}

/// Type-dependent routing info inside the inner header.
pub enum HopInfo {
    /// Type 0: pass the packet on to another remailer.
    ///
    /// `reserved` is the two-byte field after the digest slot the format
    /// carries but this profile never interprets: zero on encode,
    /// preserved bit-for-bit on decode.
    Intermediate {
        next_key_id: KeyId,
        iv: [u8; IV_LEN],
        header_digest: [u8; DIGEST_LEN],
        reserved: [u8; 2],
    },
    /// Type 1: this hop delivers the payload.
    Final {
        message_id: [u8; DIGEST_LEN],
        iv: [u8; IV_LEN],
    },
    /// Type 2: this hop stores one chunk of a multi-part message.
    Partial {
        chunk_id: [u8; DIGEST_LEN],
        index: u8,
        total: u8,
        iv: [u8; IV_LEN],
    },
}

impl HopInfo {
    pub fn type_byte(&self) -> u8 {
        match self {
            Self::Intermediate { .. } => 0,
            Self::Final { .. } => 1,
            Self::Partial { .. } => 2,
        }
    }

    /// The IV the body session key is used with, whatever the type.
    pub fn body_iv(&self) -> &[u8; IV_LEN] {
        match self {
            Self::Intermediate { iv, .. } => iv,
            Self::Final { iv, .. } => iv,
            Self::Partial { iv, .. } => iv,
        }
    }

    fn encoded_len(&self) -> usize {
        match self {
            Self::Intermediate { .. } => DIGEST_LEN + IV_LEN + DIGEST_LEN + 2,
            Self::Final { .. } => DIGEST_LEN + IV_LEN,
            Self::Partial { .. } => DIGEST_LEN + 2 + IV_LEN,
        }
    }

    fn write(&self, out: &mut Vec<u8>) {
        match self {
            Self::Intermediate {
                next_key_id,
                iv,
                header_digest,
                reserved,
            } => {
                out.extend_from_slice(next_key_id.as_bytes());
                out.extend_from_slice(iv);
                out.extend_from_slice(header_digest);
                out.extend_from_slice(reserved);
            }
            Self::Final { message_id, iv } => {
                out.extend_from_slice(message_id);
                out.extend_from_slice(iv);
            }
            Self::Partial {
                chunk_id,
                index,
                total,
                iv,
            } => {
                out.extend_from_slice(chunk_id);
                out.push(*index);
                out.push(*total);
                out.extend_from_slice(iv);
            }
        }
    }

    fn read(type_byte: u8, buf: &[u8]) -> Result<Self, MixError> {
        match type_byte {
            0 => {
                let mut next = [0u8; DIGEST_LEN];
                next.copy_from_slice(&buf[..DIGEST_LEN]);
                let mut iv = [0u8; IV_LEN];
                iv.copy_from_slice(&buf[DIGEST_LEN..DIGEST_LEN + IV_LEN]);
                let mut digest = [0u8; DIGEST_LEN];
                digest.copy_from_slice(&buf[DIGEST_LEN + IV_LEN..2 * DIGEST_LEN + IV_LEN]);
                let mut reserved = [0u8; 2];
                reserved.copy_from_slice(&buf[2 * DIGEST_LEN + IV_LEN..2 * DIGEST_LEN + IV_LEN + 2]);
                Ok(Self::Intermediate {
                    next_key_id: KeyId::from_bytes(next),
                    iv,
                    header_digest: digest,
                    reserved,
                })
            }
            1 => {
                let mut message_id = [0u8; DIGEST_LEN];
                message_id.copy_from_slice(&buf[..DIGEST_LEN]);
                let mut iv = [0u8; IV_LEN];
                iv.copy_from_slice(&buf[DIGEST_LEN..DIGEST_LEN + IV_LEN]);
                Ok(Self::Final { message_id, iv })
            }
            2 => {
                let mut chunk_id = [0u8; DIGEST_LEN];
                chunk_id.copy_from_slice(&buf[..DIGEST_LEN]);
                let index = buf[DIGEST_LEN];
                let total = buf[DIGEST_LEN + 1];
                let mut iv = [0u8; IV_LEN];
                iv.copy_from_slice(&buf[DIGEST_LEN + 2..DIGEST_LEN + 2 + IV_LEN]);
                Ok(Self::Partial {
                    chunk_id,
                    index,
                    total,
                    iv,
                })
            }
            t => Err(MixError::BadPacketType(t)),
        }
    }
}

/// The decrypted inner header of one hop.
pub struct InnerHeader {
    pub packet_id: [u8; DIGEST_LEN],
    pub body_key: [u8; SESSION_KEY_LEN],
    pub info: HopInfo,
    pub epoch_days: u16,
}

impl InnerHeader {
    /// Fresh header for the given routing info: random Packet-ID and body
    /// key, timestamp at today's epoch-day.
    pub fn fresh(info: HopInfo) -> Self {
        Self {
            packet_id: crypto::random_array::<DIGEST_LEN>(),
            body_key: crypto::random_array::<SESSION_KEY_LEN>(),
            info,
            epoch_days: crate::timing::epoch_days(),
        }
    }

    /// Serialize, appending the authenticating MD5 and random padding.
    pub fn encode(&self) -> [u8; INNER_LEN] {
        let mut buf = Vec::with_capacity(INNER_LEN);
        buf.extend_from_slice(&self.packet_id);
        buf.extend_from_slice(&self.body_key);
        buf.push(self.info.type_byte());
        self.info.write(&mut buf);
        buf.extend_from_slice(&TS_SIGNATURE);
        buf.extend_from_slice(&self.epoch_days.to_le_bytes());
        let digest = crypto::md5(&buf);
        buf.extend_from_slice(&digest);
        buf.extend_from_slice(&crypto::random_vec(INNER_LEN - buf.len()));

        let mut out = [0u8; INNER_LEN];
        out.copy_from_slice(&buf);
        out
    }

    /// Parse and authenticate a decrypted inner header.
    ///
    /// The digest and the fixed timestamp signature both gate acceptance:
    /// a mismatch in either is an authentication failure, not a parse
    /// error, and callers drop the packet silently.
    pub fn parse(plain: &[u8]) -> Result<Self, MixError> {
        if plain.len() != INNER_LEN {
            return Err(MixError::LenMismatch {
                what: "inner header",
                want: INNER_LEN,
                got: plain.len(),
            });
        }
        let type_byte = plain[DIGEST_LEN + SESSION_KEY_LEN];
        let info = HopInfo::read(type_byte, &plain[DIGEST_LEN + SESSION_KEY_LEN + 1..])?;
        let k = info.encoded_len();
        let ts_off = DIGEST_LEN + SESSION_KEY_LEN + 1 + k;
        let digest_off = ts_off + 7;

        if plain[ts_off..ts_off + 5] != TS_SIGNATURE {
            return Err(MixError::AuthFailure);
        }
        let expect = crypto::md5(&plain[..digest_off]);
        if plain[digest_off..digest_off + DIGEST_LEN] != expect {
            return Err(MixError::AuthFailure);
        }

        let mut packet_id = [0u8; DIGEST_LEN];
        packet_id.copy_from_slice(&plain[..DIGEST_LEN]);
        let mut body_key = [0u8; SESSION_KEY_LEN];
        body_key.copy_from_slice(&plain[DIGEST_LEN..DIGEST_LEN + SESSION_KEY_LEN]);
        let epoch_days = u16::from_le_bytes([plain[ts_off + 5], plain[ts_off + 6]]);

        Ok(Self {
            packet_id,
            body_key,
            info,
            epoch_days,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn final_header() -> InnerHeader {
        InnerHeader::fresh(HopInfo::Final {
            message_id: crypto::random_array::<16>(),
            iv: crypto::random_array::<8>(),
        })
    }

    #[test]
    fn test_inner_roundtrip_final() {
        let hdr = final_header();
        let encoded = hdr.encode();
        assert_eq!(encoded.len(), INNER_LEN);

        let back = InnerHeader::parse(&encoded).unwrap();
        assert_eq!(back.packet_id, hdr.packet_id);
        assert_eq!(back.body_key, hdr.body_key);
        assert_eq!(back.epoch_days, hdr.epoch_days);
        match back.info {
            HopInfo::Final { .. } => {}
            _ => panic!("type changed in roundtrip"),
        }
    }

    #[test]
    fn test_inner_roundtrip_intermediate() {
        let hdr = InnerHeader::fresh(HopInfo::Intermediate {
            next_key_id: KeyId::from_bytes([7u8; 16]),
            iv: crypto::random_array::<8>(),
            header_digest: [9u8; 16],
            reserved: [0, 0],
        });
        let back = InnerHeader::parse(&hdr.encode()).unwrap();
        match back.info {
            HopInfo::Intermediate {
                next_key_id,
                header_digest,
                reserved,
                ..
            } => {
                assert_eq!(next_key_id, KeyId::from_bytes([7u8; 16]));
                assert_eq!(header_digest, [9u8; 16]);
                assert_eq!(reserved, [0, 0]);
            }
            _ => panic!("type changed in roundtrip"),
        }
    }

    #[test]
    fn test_inner_roundtrip_partial() {
        let hdr = InnerHeader::fresh(HopInfo::Partial {
            chunk_id: [3u8; 16],
            index: 1,
            total: 3,
            iv: crypto::random_array::<8>(),
        });
        let back = InnerHeader::parse(&hdr.encode()).unwrap();
        match back.info {
            HopInfo::Partial { index, total, .. } => {
                assert_eq!(index, 1);
                assert_eq!(total, 3);
            }
            _ => panic!("type changed in roundtrip"),
        }
    }

    #[test]
    fn test_any_bit_flip_fails_auth() {
        let encoded = final_header().encode();
        // Flip one bit in each byte the digest covers (type 1: prefix is
        // 72 bytes, digest at 72..88).
        for i in 0..72 {
            let mut tampered = encoded;
            tampered[i] ^= 0x01;
            match InnerHeader::parse(&tampered) {
                Err(MixError::AuthFailure) | Err(MixError::BadPacketType(_)) => {}
                other => panic!("byte {} tamper not caught: {:?}", i, other.is_ok()),
            }
        }
    }

    #[test]
    fn test_bad_type_byte() {
        let mut encoded = final_header().encode();
        encoded[40] = 9;
        assert!(matches!(
            InnerHeader::parse(&encoded),
            Err(MixError::BadPacketType(9))
        ));
    }

    #[test]
    fn test_outer_roundtrip() {
        let outer = OuterHeader {
            key_id: KeyId::from_bytes([1u8; 16]),
            rsa_ct: [2u8; RSA_BLOCK_LEN],
            iv: [3u8; IV_LEN],
            inner_ct: [4u8; INNER_LEN],
        };
        let slot = outer.encode();
        assert_eq!(slot.len(), HEADER_LEN);

        let back = OuterHeader::parse(&slot).unwrap();
        assert_eq!(back.key_id, outer.key_id);
        assert_eq!(back.rsa_ct, outer.rsa_ct);
        assert_eq!(back.iv, outer.iv);
        assert_eq!(back.inner_ct[..], outer.inner_ct[..]);
    }

    #[test]
    fn test_outer_rejects_bad_rsa_len() {
        let outer = OuterHeader {
            key_id: KeyId::from_bytes([1u8; 16]),
            rsa_ct: [2u8; RSA_BLOCK_LEN],
            iv: [3u8; IV_LEN],
            inner_ct: [4u8; INNER_LEN],
        };
        let mut slot = outer.encode();
        slot[16] = 64;
        assert!(OuterHeader::parse(&slot).is_err());
    }
}
