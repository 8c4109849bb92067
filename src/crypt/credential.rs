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

//! Encryption of stored account passwords.
//!
//! Each account carries its own random salt. The key for an account is
//! derived from the user's passphrase and that salt with PBKDF2-HMAC-SHA256,
//! and the password itself is sealed in a Fernet token (see `fernet`). The
//! passphrase is never written anywhere; it is taken from the environment
//! once per process and held in locked memory.

use std::env;

use openssl::hash::MessageDigest;
use rand::{rngs::OsRng, Rng};
use secstr::SecStr;

use super::fernet::{self, FernetKey};
use crate::support::error::Error;

/// The environment variable holding the passphrase.
pub const PASSPHRASE_VAR: &str = "MILTON_PASS";

pub const SALT_LEN: usize = 16;
pub const KDF_ROUNDS: usize = 100_000;

/// Derive the Fernet key for `passphrase` and `salt`.
pub fn derive_key(passphrase: &[u8], salt: &[u8]) -> Result<FernetKey, Error> {
    let mut raw = [0u8; fernet::KEY_LEN];
    openssl::pkcs5::pbkdf2_hmac(
        passphrase,
        salt,
        KDF_ROUNDS,
        MessageDigest::sha256(),
        &mut raw,
    )?;

    let encoded = base64::encode_config(&raw, base64::URL_SAFE);
    FernetKey::from_encoded(&encoded).ok_or(Error::DecryptionFailed)
}

/// Encrypts and decrypts account passwords under a fixed passphrase.
#[derive(Debug)]
pub struct CredentialCipher {
    passphrase: SecStr,
}

impl CredentialCipher {
    pub fn new(passphrase: &str) -> Result<Self, Error> {
        if passphrase.is_empty() {
            return Err(Error::PassphraseMissing(PASSPHRASE_VAR));
        }

        Ok(CredentialCipher {
            passphrase: SecStr::new(passphrase.as_bytes().to_vec()),
        })
    }

    /// Build a cipher from the passphrase in `MILTON_PASS`.
    pub fn from_env() -> Result<Self, Error> {
        match env::var(PASSPHRASE_VAR) {
            Ok(passphrase) => CredentialCipher::new(&passphrase),
            Err(_) => Err(Error::PassphraseMissing(PASSPHRASE_VAR)),
        }
    }

    /// Encrypt `plaintext` under a freshly generated salt.
    ///
    /// Returns the token and the salt, both of which are needed to decrypt.
    pub fn encrypt(
        &self,
        plaintext: &str,
    ) -> Result<(String, [u8; SALT_LEN]), Error> {
        let salt: [u8; SALT_LEN] = OsRng.gen();
        let key = derive_key(self.passphrase.unsecure(), &salt)?;
        let token = key.encrypt(plaintext.as_bytes())?;
        Ok((token, salt))
    }

    /// Decrypt a token produced by `encrypt()`.
    ///
    /// Fails with `DecryptionFailed` if the passphrase or salt differ from
    /// those used to encrypt, or if the token has been modified.
    pub fn decrypt(&self, token: &str, salt: &[u8]) -> Result<String, Error> {
        let key = derive_key(self.passphrase.unsecure(), salt)?;
        let plaintext = key.decrypt(token).ok_or(Error::DecryptionFailed)?;
        String::from_utf8(plaintext).map_err(|_| Error::DecryptionFailed)
    }
}

#[cfg(test)]
mod test {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn derivation_is_pbkdf2_sha256() {
        let key =
            derive_key(b"mysecretpassphrase", b"0123456789abcdef").unwrap();
        assert_eq!(
            "jJKDmRrbjhJ8zaNECkr4jE38Ya8iSpsNgjwD1_qPUPs=",
            key.encoded()
        );
    }

    #[test]
    fn round_trip() {
        let cipher = CredentialCipher::new("mysecretpassphrase").unwrap();
        let (token, salt) = cipher.encrypt("mysecretpassword").unwrap();
        assert_eq!(SALT_LEN, salt.len());
        assert_eq!("mysecretpassword", cipher.decrypt(&token, &salt).unwrap());
    }

    #[test]
    fn reads_existing_store_tokens() {
        // Written by the earlier, non-Rust version of this tool.
        let cipher = CredentialCipher::new("mysecretpassphrase").unwrap();
        assert_eq!(
            "mysecretpassword",
            cipher
                .decrypt(
                    "gAAAAABlU_EAZmVkY2JhOTg3NjU0MzIxMGX3l1LFyLZ8ZBSraVzp729U\
                     2Q74KsIYlCMeFxJndiXQ4WeCMukMvFi5l55hQ2Gr72IDMg6ENCyT8NOE\
                     GJ9Ehcw=",
                    b"0123456789abcdef"
                )
                .unwrap()
        );
    }

    #[test]
    fn wrong_passphrase_fails() {
        let (token, salt) = CredentialCipher::new("mysecretpassphrase")
            .unwrap()
            .encrypt("mysecretpassword")
            .unwrap();
        assert_matches!(
            Err(Error::DecryptionFailed),
            CredentialCipher::new("mysecretpassphrasf")
                .unwrap()
                .decrypt(&token, &salt)
        );
    }

    #[test]
    fn wrong_salt_fails() {
        let cipher = CredentialCipher::new("mysecretpassphrase").unwrap();
        let (token, mut salt) = cipher.encrypt("mysecretpassword").unwrap();
        salt[0] ^= 1;
        assert_matches!(
            Err(Error::DecryptionFailed),
            cipher.decrypt(&token, &salt)
        );
        assert_matches!(
            Err(Error::DecryptionFailed),
            cipher.decrypt(&token, &salt[..8])
        );
    }

    #[test]
    fn salts_are_per_call() {
        let cipher = CredentialCipher::new("p").unwrap();
        let (token1, salt1) = cipher.encrypt("same").unwrap();
        let (token2, salt2) = cipher.encrypt("same").unwrap();
        assert_ne!(salt1, salt2);
        assert_ne!(token1, token2);
    }

    #[test]
    fn empty_passphrase_is_missing() {
        assert_matches!(
            Err(Error::PassphraseMissing(PASSPHRASE_VAR)),
            CredentialCipher::new("")
        );
    }

    proptest! {
        // Key derivation is deliberately slow, so keep the case count low.
        #![proptest_config(ProptestConfig::with_cases(8))]

        #[test]
        fn round_trips_printable_strings(
            passphrase in "[ -~]{1,32}",
            password in "[ -~]{0,64}",
        ) {
            let cipher = CredentialCipher::new(&passphrase).unwrap();
            let (token, salt) = cipher.encrypt(&password).unwrap();
            prop_assert_eq!(password, cipher.decrypt(&token, &salt).unwrap());
        }
    }
}
