// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Final-hop payload framing.
//!
//! A delivered payload is framed as:
//!
//! | Size | Field |
//! |-----:|-------|
//! | 4    | body length, little-endian u32 |
//! | 1    | recipient count |
//! | Nx80 | recipient addresses, NUL-padded |
//! | 1    | header-line count |
//! | Mx80 | header lines, NUL-padded |
//! | ..   | body |
//! | ..   | random padding to 10,240 |
//!
//! A Type-2 chunk payload carries a slice of the unpadded framed stream
//! instead: a 4-byte length then the fragment, random-padded to 10,240.
//! Concatenating the fragments of a Chunk-ID in index order reproduces
//! the framed stream, which the final-hop path parses as above.

use super::{FIELD_LEN, PAYLOAD_LEN};
use crate::crypto;
use crate::error::MixError;

/// The recipient a dummy message names; final hops drop it on sight.
pub const DUMMY_RECIPIENT: &str = "null:";

/// Most fragment bytes one chunk payload can carry.
pub const MAX_FRAGMENT_LEN: usize = PAYLOAD_LEN - 4;

/// A parsed final-hop payload.
pub struct FinalPayload {
    pub recipients: Vec<String>,
    pub headers: Vec<String>,
    pub body: Vec<u8>,
}

impl FinalPayload {
    /// True when this payload is cover traffic and must be dropped.
    pub fn is_dummy(&self) -> bool {
        self.recipients.is_empty()
            || (self.recipients.len() == 1 && self.recipients[0] == DUMMY_RECIPIENT)
    }

    /// The unpadded framed stream (length word, both field lists, body).
    pub fn encode_stream(&self) -> Result<Vec<u8>, MixError> {
        let mut out = Vec::with_capacity(6 + self.body.len());
        out.extend_from_slice(&(self.body.len() as u32).to_le_bytes());
        write_fields(&mut out, &self.recipients)?;
        write_fields(&mut out, &self.headers)?;
        out.extend_from_slice(&self.body);
        Ok(out)
    }

    /// The framed stream random-padded to exactly one payload.
    pub fn encode_padded(&self) -> Result<Vec<u8>, MixError> {
        let mut out = self.encode_stream()?;
        if out.len() > PAYLOAD_LEN {
            return Err(MixError::LenMismatch {
                what: "payload",
                want: PAYLOAD_LEN,
                got: out.len(),
            });
        }
        out.extend_from_slice(&crypto::random_vec(PAYLOAD_LEN - out.len()));
        Ok(out)
    }

    /// Parse a framed stream: a full 10,240-byte payload or a reassembled
    /// chunk stream of any length.
    pub fn parse(buf: &[u8]) -> Result<Self, MixError> {
        if buf.len() < 6 {
            return Err(MixError::LenMismatch {
                what: "payload framing",
                want: 6,
                got: buf.len(),
            });
        }
        let body_len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        let mut pos = 4;
        let recipients = read_fields(buf, &mut pos)?;
        let headers = read_fields(buf, &mut pos)?;
        if pos + body_len > buf.len() {
            return Err(MixError::LenMismatch {
                what: "payload body",
                want: pos + body_len,
                got: buf.len(),
            });
        }
        let body = buf[pos..pos + body_len].to_vec();
        Ok(Self {
            recipients,
            headers,
            body,
        })
    }
}

fn write_fields(out: &mut Vec<u8>, fields: &[String]) -> Result<(), MixError> {
    if fields.len() > u8::MAX as usize {
        return Err(MixError::LenMismatch {
            what: "field list",
            want: u8::MAX as usize,
            got: fields.len(),
        });
    }
    out.push(fields.len() as u8);
    for field in fields {
        let raw = field.as_bytes();
        if raw.len() > FIELD_LEN {
            return Err(MixError::LenMismatch {
                what: "address field",
                want: FIELD_LEN,
                got: raw.len(),
            });
        }
        out.extend_from_slice(raw);
        out.extend(std::iter::repeat(0u8).take(FIELD_LEN - raw.len()));
    }
    Ok(())
}

fn read_fields(buf: &[u8], pos: &mut usize) -> Result<Vec<String>, MixError> {
    if *pos >= buf.len() {
        return Err(MixError::LenMismatch {
            what: "field list",
            want: *pos + 1,
            got: buf.len(),
        });
    }
    let count = buf[*pos] as usize;
    *pos += 1;
    if *pos + count * FIELD_LEN > buf.len() {
        return Err(MixError::LenMismatch {
            what: "field list",
            want: *pos + count * FIELD_LEN,
            got: buf.len(),
        });
    }
    let mut fields = Vec::with_capacity(count);
    for _ in 0..count {
        let raw = &buf[*pos..*pos + FIELD_LEN];
        *pos += FIELD_LEN;
        let end = raw.iter().position(|&b| b == 0).unwrap_or(FIELD_LEN);
        fields.push(String::from_utf8_lossy(&raw[..end]).into_owned());
    }
    Ok(fields)
}

/// Frame one chunk fragment into a full payload block.
pub fn encode_fragment(frag: &[u8]) -> Result<Vec<u8>, MixError> {
    if frag.len() > MAX_FRAGMENT_LEN {
        return Err(MixError::LenMismatch {
            what: "chunk fragment",
            want: MAX_FRAGMENT_LEN,
            got: frag.len(),
        });
    }
    let mut out = Vec::with_capacity(PAYLOAD_LEN);
    out.extend_from_slice(&(frag.len() as u32).to_le_bytes());
    out.extend_from_slice(frag);
    out.extend_from_slice(&crypto::random_vec(PAYLOAD_LEN - out.len()));
    Ok(out)
}

/// Recover the fragment bytes from a chunk payload block.
pub fn parse_fragment(buf: &[u8]) -> Result<Vec<u8>, MixError> {
    if buf.len() != PAYLOAD_LEN {
        return Err(MixError::LenMismatch {
            what: "payload",
            want: PAYLOAD_LEN,
            got: buf.len(),
        });
    }
    let len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if len > MAX_FRAGMENT_LEN {
        return Err(MixError::LenMismatch {
            what: "chunk fragment",
            want: MAX_FRAGMENT_LEN,
            got: len,
        });
    }
    Ok(buf[4..4 + len].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_padded_roundtrip() {
        let payload = FinalPayload {
            recipients: vec!["alice@example".into(), "bob@example".into()],
            headers: vec!["Subject: hello".into()],
            body: b"the body\n".to_vec(),
        };
        let block = payload.encode_padded().unwrap();
        assert_eq!(block.len(), PAYLOAD_LEN);

        let back = FinalPayload::parse(&block).unwrap();
        assert_eq!(back.recipients, payload.recipients);
        assert_eq!(back.headers, payload.headers);
        assert_eq!(back.body, payload.body);
        assert!(!back.is_dummy());
    }

    #[test]
    fn test_dummy_marker() {
        let dummy = FinalPayload {
            recipients: vec![DUMMY_RECIPIENT.into()],
            headers: vec![],
            body: vec![],
        };
        let back = FinalPayload::parse(&dummy.encode_padded().unwrap()).unwrap();
        assert!(back.is_dummy());
    }

    #[test]
    fn test_oversized_field_rejected() {
        let payload = FinalPayload {
            recipients: vec!["x".repeat(FIELD_LEN + 1)],
            headers: vec![],
            body: vec![],
        };
        assert!(payload.encode_stream().is_err());
    }

    #[test]
    fn test_body_overflow_rejected() {
        let payload = FinalPayload {
            recipients: vec!["alice@example".into()],
            headers: vec![],
            body: vec![0u8; PAYLOAD_LEN],
        };
        assert!(payload.encode_padded().is_err());
        // But the unpadded stream form carries it fine.
        assert!(payload.encode_stream().is_ok());
    }

    #[test]
    fn test_fragment_roundtrip() {
        let frag = crypto::random_vec(5_000);
        let block = encode_fragment(&frag).unwrap();
        assert_eq!(block.len(), PAYLOAD_LEN);
        assert_eq!(parse_fragment(&block).unwrap(), frag);
    }

    #[test]
    fn test_fragment_max_len() {
        let frag = vec![1u8; MAX_FRAGMENT_LEN];
        assert!(encode_fragment(&frag).is_ok());
        let frag = vec![1u8; MAX_FRAGMENT_LEN + 1];
        assert!(encode_fragment(&frag).is_err());
    }
}
