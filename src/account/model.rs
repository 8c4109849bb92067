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

use serde::{Deserialize, Serialize};

use crate::crypt::credential::{CredentialCipher, SALT_LEN};
use crate::support::error::Error;

pub const DEFAULT_PORT: u16 = 993;

pub(super) mod b64 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        bytes: &Vec<u8>,
        ser: S,
    ) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&base64::encode(bytes))
    }

    pub fn deserialize<'a, D: Deserializer<'a>>(
        de: D,
    ) -> Result<Vec<u8>, D::Error> {
        use serde::de::Error;
        String::deserialize(de).and_then(|s| {
            base64::decode(&s).map_err(|err| Error::custom(err.to_string()))
        })
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

/// A single remote mail account.
///
/// The password is only ever held as a Fernet token together with the salt
/// that was used to derive its key; the two are always replaced together.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub name: String,
    pub server: String,
    pub username: String,
    password: String,
    #[serde(with = "b64")]
    salt: Vec<u8>,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Account {
    /// Create a new account, encrypting `password` with `cipher`.
    pub fn new(
        name: String,
        server: String,
        username: String,
        port: u16,
        password: &str,
        cipher: &CredentialCipher,
    ) -> Result<Self, Error> {
        let (token, salt) = cipher.encrypt(password)?;
        Ok(Account {
            name,
            server,
            username,
            password: token,
            salt: salt.to_vec(),
            port,
        })
    }

    /// Decrypt the stored password.
    pub fn password(&self, cipher: &CredentialCipher) -> Result<String, Error> {
        cipher.decrypt(&self.password, &self.salt)
    }

    /// Replace the stored password, re-encrypting under a fresh salt.
    pub fn set_password(
        &mut self,
        password: &str,
        cipher: &CredentialCipher,
    ) -> Result<(), Error> {
        let (token, salt) = cipher.encrypt(password)?;
        self.password = token;
        self.salt = salt.to_vec();
        Ok(())
    }

    pub fn salt(&self) -> &[u8] {
        &self.salt
    }

    fn validate(&self) -> Result<(), Error> {
        if SALT_LEN != self.salt.len() {
            return Err(Error::BadConfig(format!(
                "account '{}' has a {}-byte salt",
                self.name,
                self.salt.len()
            )));
        }

        if self.password.is_empty() {
            return Err(Error::BadConfig(format!(
                "account '{}' has no password",
                self.name
            )));
        }

        Ok(())
    }
}

/// The full set of stored accounts, in insertion order.
///
/// This is the root of the JSON document stored in `config.json`. It is
/// always loaded and saved as a whole.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountCollection {
    #[serde(default)]
    pub accounts: Vec<Account>,
}

impl AccountCollection {
    pub fn get(&self, name: &str) -> Option<&Account> {
        self.accounts.iter().find(|a| name == a.name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Account> {
        self.accounts.iter_mut().find(|a| name == a.name)
    }

    /// Append `account`, which must have a name not already in use.
    pub fn add(&mut self, account: Account) -> Result<(), Error> {
        if self.get(&account.name).is_some() {
            return Err(Error::DuplicateAccount(account.name));
        }

        self.accounts.push(account);
        Ok(())
    }

    /// Check the invariants which deserialisation alone cannot.
    pub(super) fn validate(&self) -> Result<(), Error> {
        for (ix, account) in self.accounts.iter().enumerate() {
            account.validate()?;
            if self.accounts[..ix].iter().any(|a| a.name == account.name) {
                return Err(Error::BadConfig(format!(
                    "account '{}' is defined more than once",
                    account.name
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn cipher() -> CredentialCipher {
        CredentialCipher::new("mysecretpassphrase").unwrap()
    }

    fn account(name: &str, cipher: &CredentialCipher) -> Account {
        Account::new(
            name.to_owned(),
            "imap.test.com".to_owned(),
            "test_user".to_owned(),
            DEFAULT_PORT,
            "mysecretpassword",
            cipher,
        )
        .unwrap()
    }

    #[test]
    fn password_is_never_plaintext() {
        let cipher = cipher();
        let account = account("Test Account", &cipher);
        let json = serde_json::to_string(&account).unwrap();
        assert!(!json.contains("mysecretpassword"));
        assert_eq!("mysecretpassword", account.password(&cipher).unwrap());
    }

    #[test]
    fn set_password_replaces_salt() {
        let cipher = cipher();
        let mut account = account("Test Account", &cipher);
        let old_salt = account.salt().to_vec();
        account.set_password("hunter2", &cipher).unwrap();
        assert_ne!(old_salt, account.salt());
        assert_eq!("hunter2", account.password(&cipher).unwrap());
    }

    #[test]
    fn names_are_unique() {
        let cipher = cipher();
        let mut collection = AccountCollection::default();
        collection.add(account("a", &cipher)).unwrap();
        collection.add(account("b", &cipher)).unwrap();
        assert_matches!(
            Err(Error::DuplicateAccount(_)),
            collection.add(account("a", &cipher))
        );
        assert_eq!(2, collection.accounts.len());
        assert_eq!("b", collection.get("b").unwrap().name);
        assert!(collection.get("c").is_none());
    }

    #[test]
    fn port_defaults_when_absent() {
        let account: Account = serde_json::from_str(
            r#"{"name":"n","server":"s","username":"u",
                "password":"gAAAAA","salt":"MDEyMzQ1Njc4OWFiY2RlZg=="}"#,
        )
        .unwrap();
        assert_eq!(DEFAULT_PORT, account.port);
        assert_eq!(b"0123456789abcdef", account.salt());
    }

    #[test]
    fn validate_rejects_bad_salt_and_duplicates() {
        let cipher = cipher();
        let mut collection = AccountCollection::default();
        collection.accounts.push(account("a", &cipher));
        assert!(collection.validate().is_ok());

        collection.accounts.push(account("a", &cipher));
        assert_matches!(Err(Error::BadConfig(_)), collection.validate());

        collection.accounts.pop();
        collection.accounts[0].salt.truncate(4);
        assert_matches!(Err(Error::BadConfig(_)), collection.validate());
    }
}
