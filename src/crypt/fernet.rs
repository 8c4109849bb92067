//-
// Copyright (c) 2024, The Miltonmail developers
//
// This file is part of Miltonmail.
//
// Miltonmail is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Miltonmail is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or
// FITNESS FOR A PARTICULAR PURPOSE. See the GNU General Public License for
// more details.
//
// You should have received a copy of the GNU General Public License along with
// Miltonmail. If not, see <http://www.gnu.org/licenses/>.

//! Fernet authenticated encryption.
//!
//! A Fernet token is the URL-safe base64 encoding of
//!
//! ```text
//! 0x80 || timestamp (u64, big endian) || IV (16) || ciphertext || HMAC (32)
//! ```
//!
//! where the ciphertext is AES-128-CBC with PKCS#7 padding and the HMAC is
//! HMAC-SHA256 over everything before it. A 32-byte key is split into a
//! signing half (first 16 bytes) and an encryption half (last 16 bytes).
//!
//! Tokens are verified before anything is decrypted, so a wrong key or a
//! modified token is always rejected rather than yielding garbage. Token age
//! is not checked.

use chrono::prelude::*;
use openssl::error::ErrorStack;
use openssl::hash::MessageDigest;
use openssl::pkey::PKey;
use openssl::sign::Signer;
use openssl::symm::{self, Cipher};
use rand::{rngs::OsRng, Rng};

use super::AES_BLOCK;

const VERSION: u8 = 0x80;
const HMAC_LEN: usize = 32;
const HEADER_LEN: usize = 1 + 8 + AES_BLOCK;

pub const KEY_LEN: usize = 2 * AES_BLOCK;

#[derive(Clone)]
pub struct FernetKey {
    signing: [u8; AES_BLOCK],
    encryption: [u8; AES_BLOCK],
}

impl FernetKey {
    pub fn from_bytes(raw: &[u8; KEY_LEN]) -> Self {
        let mut signing = [0u8; AES_BLOCK];
        let mut encryption = [0u8; AES_BLOCK];
        signing.copy_from_slice(&raw[..AES_BLOCK]);
        encryption.copy_from_slice(&raw[AES_BLOCK..]);
        FernetKey {
            signing,
            encryption,
        }
    }

    /// Parse a key in its standard URL-safe base64 form.
    pub fn from_encoded(encoded: &str) -> Option<Self> {
        let raw = base64::decode_config(encoded, base64::URL_SAFE).ok()?;
        if KEY_LEN != raw.len() {
            return None;
        }

        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(&raw);
        Some(FernetKey::from_bytes(&key))
    }

    /// Return the standard URL-safe base64 form of this key.
    pub fn encoded(&self) -> String {
        let mut raw = [0u8; KEY_LEN];
        raw[..AES_BLOCK].copy_from_slice(&self.signing);
        raw[AES_BLOCK..].copy_from_slice(&self.encryption);
        base64::encode_config(&raw, base64::URL_SAFE)
    }

    /// Encrypt `plaintext` into a token stamped with the current time and a
    /// random IV.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String, ErrorStack> {
        let now = Utc::now().timestamp().max(0) as u64;
        self.encrypt_with(plaintext, now, OsRng.gen())
    }

    fn encrypt_with(
        &self,
        plaintext: &[u8],
        timestamp: u64,
        iv: [u8; AES_BLOCK],
    ) -> Result<String, ErrorStack> {
        let ciphertext = symm::encrypt(
            Cipher::aes_128_cbc(),
            &self.encryption,
            Some(&iv),
            plaintext,
        )?;

        let mut token =
            Vec::with_capacity(HEADER_LEN + ciphertext.len() + HMAC_LEN);
        token.push(VERSION);
        token.extend_from_slice(&timestamp.to_be_bytes());
        token.extend_from_slice(&iv);
        token.extend_from_slice(&ciphertext);
        let hmac = self.hmac(&token)?;
        token.extend_from_slice(&hmac);

        Ok(base64::encode_config(&token, base64::URL_SAFE))
    }

    /// Verify and decrypt `token`.
    ///
    /// Returns `None` if the token is malformed, was not produced with this
    /// key, or has been altered.
    pub fn decrypt(&self, token: &str) -> Option<Vec<u8>> {
        let token =
            base64::decode_config(token.trim(), base64::URL_SAFE).ok()?;
        if token.len() < HEADER_LEN + AES_BLOCK + HMAC_LEN
            || VERSION != token[0]
            || 0 != (token.len() - HEADER_LEN - HMAC_LEN) % AES_BLOCK
        {
            return None;
        }

        let (signed, hmac) = token.split_at(token.len() - HMAC_LEN);
        let expected = self.hmac(signed).ok()?;
        if !openssl::memcmp::eq(&expected, hmac) {
            return None;
        }

        let iv = &signed[1 + 8..HEADER_LEN];
        let ciphertext = &signed[HEADER_LEN..];
        symm::decrypt(
            Cipher::aes_128_cbc(),
            &self.encryption,
            Some(iv),
            ciphertext,
        )
        .ok()
    }

    fn hmac(&self, data: &[u8]) -> Result<Vec<u8>, ErrorStack> {
        let pkey = PKey::hmac(&self.signing)?;
        let mut signer = Signer::new(MessageDigest::sha256(), &pkey)?;
        signer.update(data)?;
        signer.sign_to_vec()
    }
}
