// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The fixed RSA key wire form.
//!
//! Public form, 258 bytes: LE u16 length word (always 1024), `n` (128),
//! `e` (128, left-padded). Secret form appends `d` (128), `p` (64),
//! `q` (64) and zero-pads the 514 content bytes to a 712-byte block so
//! the encrypted secring payload is a whole number of 3DES blocks.
//!
//! The Key-ID of either form is the MD5 over bytes 2..258.

use crate::crypto;
use crate::error::MixError;
use crate::packet::KeyId;
use rsa::traits::{PrivateKeyParts, PublicKeyParts};
use rsa::{BigUint, RsaPrivateKey, RsaPublicKey};

/// Serialized public key.
pub const PUBLIC_WIRE_LEN: usize = 258;
/// Serialized secret key block.
pub const SECRET_WIRE_LEN: usize = 712;

const KEY_BITS: u16 = 1024;
const MODULUS_LEN: usize = 128;
const PRIME_LEN: usize = 64;
const SECRET_CONTENT_LEN: usize = 2 + 3 * MODULUS_LEN + 2 * PRIME_LEN;

/// Serialize a public key.
pub fn encode_public(key: &RsaPublicKey) -> Result<[u8; PUBLIC_WIRE_LEN], MixError> {
    let mut out = [0u8; PUBLIC_WIRE_LEN];
    out[..2].copy_from_slice(&KEY_BITS.to_le_bytes());
    write_int(&mut out[2..130], key.n())?;
    write_int(&mut out[130..258], key.e())?;
    Ok(out)
}

/// Serialize a secret key.
pub fn encode_secret(key: &RsaPrivateKey) -> Result<[u8; SECRET_WIRE_LEN], MixError> {
    let primes = key.primes();
    if primes.len() != 2 {
        return Err(MixError::MalformedKey(format!(
            "expected 2 primes, key has {}",
            primes.len()
        )));
    }
    // The wire form fixes p >= q; the generator makes no such promise.
    let (p, q) = if primes[0] >= primes[1] {
        (&primes[0], &primes[1])
    } else {
        (&primes[1], &primes[0])
    };

    let mut out = [0u8; SECRET_WIRE_LEN];
    out[..2].copy_from_slice(&KEY_BITS.to_le_bytes());
    write_int(&mut out[2..130], key.n())?;
    write_int(&mut out[130..258], key.e())?;
    write_int(&mut out[258..386], key.d())?;
    write_int(&mut out[386..450], p)?;
    write_int(&mut out[450..514], q)?;
    // Bytes 514..712 stay zero.
    Ok(out)
}

/// Parse a public key wire block.
pub fn decode_public(wire: &[u8]) -> Result<RsaPublicKey, MixError> {
    if wire.len() != PUBLIC_WIRE_LEN {
        return Err(MixError::MalformedKey(format!(
            "public key is {} bytes, want {}",
            wire.len(),
            PUBLIC_WIRE_LEN
        )));
    }
    check_length_word(wire)?;
    let n = BigUint::from_bytes_be(&wire[2..130]);
    let e = BigUint::from_bytes_be(&wire[130..258]);
    RsaPublicKey::new(n, e).map_err(|e| MixError::MalformedKey(e.to_string()))
}

/// Parse a secret key block (the decrypted secring payload).
pub fn decode_secret(wire: &[u8]) -> Result<RsaPrivateKey, MixError> {
    if wire.len() != SECRET_WIRE_LEN {
        return Err(MixError::MalformedKey(format!(
            "secret key is {} bytes, want {}",
            wire.len(),
            SECRET_WIRE_LEN
        )));
    }
    check_length_word(wire)?;
    let n = BigUint::from_bytes_be(&wire[2..130]);
    let e = BigUint::from_bytes_be(&wire[130..258]);
    let d = BigUint::from_bytes_be(&wire[258..386]);
    let p = BigUint::from_bytes_be(&wire[386..450]);
    let q = BigUint::from_bytes_be(&wire[450..SECRET_CONTENT_LEN]);

    if n != &p * &q {
        return Err(MixError::MalformedKey("n != p*q".into()));
    }
    if p < q {
        return Err(MixError::MalformedKey("p < q".into()));
    }
    RsaPrivateKey::from_components(n, e, d, vec![p, q])
        .map_err(|e| MixError::MalformedKey(e.to_string()))
}

/// Key-ID of a wire block: MD5 over the `n` and `e` fields.
///
/// Works on either form, since the secret form extends the public one.
pub fn key_id(wire: &[u8]) -> Result<KeyId, MixError> {
    if wire.len() < PUBLIC_WIRE_LEN {
        return Err(MixError::MalformedKey(format!(
            "key wire is {} bytes, want at least {}",
            wire.len(),
            PUBLIC_WIRE_LEN
        )));
    }
    Ok(KeyId::from_bytes(crypto::md5(&wire[2..PUBLIC_WIRE_LEN])))
}

/// Key-ID straight from a public key object.
pub fn public_key_id(key: &RsaPublicKey) -> Result<KeyId, MixError> {
    key_id(&encode_public(key)?)
}

fn check_length_word(wire: &[u8]) -> Result<(), MixError> {
    let bits = u16::from_le_bytes([wire[0], wire[1]]);
    if bits != KEY_BITS {
        return Err(MixError::MalformedKey(format!(
            "length word {} != {}",
            bits, KEY_BITS
        )));
    }
    Ok(())
}

/// Left-pad a big-endian integer into a fixed-width field.
fn write_int(field: &mut [u8], value: &BigUint) -> Result<(), MixError> {
    let raw = value.to_bytes_be();
    if raw.len() > field.len() {
        return Err(MixError::MalformedKey(format!(
            "integer is {} bytes, field holds {}",
            raw.len(),
            field.len()
        )));
    }
    let pad = field.len() - raw.len();
    field[..pad].fill(0);
    field[pad..].copy_from_slice(&raw);
    Ok(())
}
