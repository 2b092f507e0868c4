// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Cryptographic primitives for the Type-II packet format.
//!
//! The wire format fixes the algorithms: PKCS#1 v1.5 over 1024-bit RSA for
//! the session key, 3DES-CBC for every symmetric layer, MD5 for digests
//! and Key-IDs. None of this is negotiable; a different algorithm or key
//! size produces bytes no Type-II peer can parse.

use crate::error::MixError;
use crate::packet::{IV_LEN, RSA_BLOCK_LEN, SESSION_KEY_LEN};
use cbc::cipher::{block_padding::NoPadding, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use md5::{Digest, Md5};
use rand::{rngs::OsRng, RngCore};
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};

type TdesEnc = cbc::Encryptor<des::TdesEde3>;
type TdesDec = cbc::Decryptor<des::TdesEde3>;
type Tdes2Enc = cbc::Encryptor<des::TdesEde2>;
type Tdes2Dec = cbc::Decryptor<des::TdesEde2>;

/// MD5 digest of `data`.
pub fn md5(data: &[u8]) -> [u8; 16] {
    Md5::digest(data).into()
}

/// Fill a fixed-size buffer from the OS CSPRNG.
pub fn random_array<const N: usize>() -> [u8; N] {
    let mut buf = [0u8; N];
    OsRng.fill_bytes(&mut buf);
    buf
}

/// `n` bytes from the OS CSPRNG.
pub fn random_vec(n: usize) -> Vec<u8> {
    let mut buf = vec![0u8; n];
    OsRng.fill_bytes(&mut buf);
    buf
}

/// 3DES-CBC encrypt with a 24-byte (three-key) session key.
///
/// `data` must be a multiple of the 8-byte block; every region of the
/// packet layout is.
pub fn des3_encrypt(key: &[u8; 24], iv: &[u8; IV_LEN], data: &[u8]) -> Result<Vec<u8>, MixError> {
    if data.len() % 8 != 0 {
        return Err(MixError::LenMismatch {
            what: "3DES block",
            want: data.len().next_multiple_of(8),
            got: data.len(),
        });
    }
    let enc = TdesEnc::new_from_slices(key, iv)
        .map_err(|e| MixError::Crypto(format!("3DES key/IV: {}", e)))?;
    Ok(enc.encrypt_padded_vec_mut::<NoPadding>(data))
}

/// 3DES-CBC decrypt with a 24-byte session key.
pub fn des3_decrypt(key: &[u8; 24], iv: &[u8; IV_LEN], data: &[u8]) -> Result<Vec<u8>, MixError> {
    let dec = TdesDec::new_from_slices(key, iv)
        .map_err(|e| MixError::Crypto(format!("3DES key/IV: {}", e)))?;
    dec.decrypt_padded_vec_mut::<NoPadding>(data)
        .map_err(|e| MixError::Crypto(format!("3DES decrypt: {}", e)))
}

/// 3DES-CBC encrypt with a 16-byte two-key schedule (K1 = K3).
///
/// Only the secring uses this form: its key is the 16-byte MD5 of the
/// ring passphrase.
pub fn des3_2key_encrypt(
    key: &[u8; 16],
    iv: &[u8; IV_LEN],
    data: &[u8],
) -> Result<Vec<u8>, MixError> {
    if data.len() % 8 != 0 {
        return Err(MixError::LenMismatch {
            what: "3DES block",
            want: data.len().next_multiple_of(8),
            got: data.len(),
        });
    }
    let enc = Tdes2Enc::new_from_slices(key, iv)
        .map_err(|e| MixError::Crypto(format!("3DES key/IV: {}", e)))?;
    Ok(enc.encrypt_padded_vec_mut::<NoPadding>(data))
}

/// 3DES-CBC decrypt with a 16-byte two-key schedule.
pub fn des3_2key_decrypt(
    key: &[u8; 16],
    iv: &[u8; IV_LEN],
    data: &[u8],
) -> Result<Vec<u8>, MixError> {
    let dec = Tdes2Dec::new_from_slices(key, iv)
        .map_err(|e| MixError::Crypto(format!("3DES key/IV: {}", e)))?;
    dec.decrypt_padded_vec_mut::<NoPadding>(data)
        .map_err(|e| MixError::Crypto(format!("3DES decrypt: {}", e)))
}

/// PKCS#1 v1.5 encrypt a fresh 24-byte session key under a peer's key.
///
/// The outer header allocates exactly 128 bytes for the ciphertext, which
/// only a 1024-bit modulus produces.
pub fn rsa_wrap(key: &RsaPublicKey, session: &[u8; SESSION_KEY_LEN]) -> Result<Vec<u8>, MixError> {
    let ct = key
        .encrypt(&mut OsRng, Pkcs1v15Encrypt, session)
        .map_err(|e| MixError::Crypto(format!("RSA encrypt: {}", e)))?;
    if ct.len() != RSA_BLOCK_LEN {
        return Err(MixError::LenMismatch {
            what: "RSA ciphertext",
            want: RSA_BLOCK_LEN,
            got: ct.len(),
        });
    }
    Ok(ct)
}

/// Recover the 24-byte session key from the outer header's RSA block.
pub fn rsa_unwrap(key: &RsaPrivateKey, ct: &[u8]) -> Result<[u8; SESSION_KEY_LEN], MixError> {
    let plain = key
        .decrypt(Pkcs1v15Encrypt, ct)
        .map_err(|_| MixError::AuthFailure)?;
    if plain.len() != SESSION_KEY_LEN {
        return Err(MixError::LenMismatch {
            what: "session key",
            want: SESSION_KEY_LEN,
            got: plain.len(),
        });
    }
    let mut out = [0u8; SESSION_KEY_LEN];
    out.copy_from_slice(&plain);
    Ok(out)
}
