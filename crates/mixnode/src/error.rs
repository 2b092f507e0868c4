// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error types for the remailer core.

use std::fmt;
use std::io;

/// Errors raised by the packet pipelines and the stores.
///
/// `Replay`, `Stale` and `AuthFailure` are silent-drop classes: they are
/// logged at debug level and must never be reported back to a sender.
#[derive(Debug)]
pub enum MixError {
    /// Armor cutmarks missing or base64 payload unreadable
    MalformedArmor(String),

    /// A fixed-length field or artifact has the wrong size
    LenMismatch {
        what: &'static str,
        want: usize,
        got: usize,
    },

    /// The outer header names a Key-ID we hold no secret key for
    UnknownRecipient(String),

    /// Inner header digest or timestamp signature check failed
    AuthFailure,

    /// Packet-ID already present in the replay log
    Replay,

    /// Timestamp outside the acceptance window (epoch-days carried)
    Stale(u16),

    /// Packet type byte is none of 0, 1, 2
    BadPacketType(u8),

    /// RSA key wire form violates a layout invariant
    MalformedKey(String),

    /// A key ring or state file is missing at startup
    StoreMissing(String),

    /// An armored key block failed its integrity checks
    BlockCorrupt(String),

    /// Every secring block failed its Key-ID check after decryption
    WrongPassphrase,

    /// Unparseable line in the public key ring
    PubringMalformed(String),

    /// A chunk index arrived twice for the same Chunk-ID
    DuplicateChunk(u8),

    /// A chunk arrived with a total that contradicts the recorded one
    InconsistentTotal { recorded: u8, got: u8 },

    /// An incomplete chunk set exceeded its age limit
    ChunkTimeout,

    /// RSA or 3DES primitive failure
    Crypto(String),

    /// Unusable configuration file or value
    Config(String),

    /// SMTP hand-off failure (see `mail::SendError` for the class)
    Smtp(crate::mail::SendError),

    /// Filesystem failure in a store or the pool
    Io(io::Error),
}

impl fmt::Display for MixError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedArmor(msg) => write!(f, "Malformed armor: {}", msg),
            Self::LenMismatch { what, want, got } => {
                write!(f, "Length mismatch in {}: want {}, got {}", what, want, got)
            }
            Self::UnknownRecipient(id) => write!(f, "No secret key for Key-ID {}", id),
            Self::AuthFailure => write!(f, "Inner header authentication failed"),
            Self::Replay => write!(f, "Packet-ID already seen"),
            Self::Stale(days) => write!(f, "Timestamp outside window: epoch-day {}", days),
            Self::BadPacketType(t) => write!(f, "Unknown packet type {}", t),
            Self::MalformedKey(msg) => write!(f, "Malformed RSA key: {}", msg),
            Self::StoreMissing(path) => write!(f, "{}: store not found", path),
            Self::BlockCorrupt(msg) => write!(f, "Corrupt key block: {}", msg),
            Self::WrongPassphrase => write!(f, "Secring passphrase rejected every block"),
            Self::PubringMalformed(line) => write!(f, "Unexpected line in pubring: {}", line),
            Self::DuplicateChunk(idx) => write!(f, "Duplicate chunk index {}", idx),
            Self::InconsistentTotal { recorded, got } => {
                write!(f, "Chunk total {} contradicts recorded {}", got, recorded)
            }
            Self::ChunkTimeout => write!(f, "Chunk set timed out"),
            Self::Crypto(msg) => write!(f, "Crypto failure: {}", msg),
            Self::Config(msg) => write!(f, "Configuration: {}", msg),
            Self::Smtp(e) => write!(f, "SMTP failure: {}", e),
            Self::Io(e) => write!(f, "I/O failure: {}", e),
        }
    }
}

impl std::error::Error for MixError {}

impl From<io::Error> for MixError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<crate::mail::SendError> for MixError {
    fn from(e: crate::mail::SendError) -> Self {
        Self::Smtp(e)
    }
}

impl MixError {
    /// True for the error classes that are dropped without any operator-
    /// visible noise beyond a debug line. Leaking which of these occurred
    /// would hand a probing adversary an oracle.
    pub fn is_silent_drop(&self) -> bool {
        matches!(self, Self::Replay | Self::Stale(_) | Self::AuthFailure)
    }
}
