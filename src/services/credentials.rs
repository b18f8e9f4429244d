//! Password hashing for both account kinds
//!
//! Stored form is `salt$mac`, both URL-safe base64, where `mac` is
//! HMAC-SHA256 keyed by the server pepper over `salt || password`.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

const SALT_LEN: usize = 16;

#[derive(Debug, Error)]
#[error("credential key rejected: {0}")]
pub struct CredentialError(String);

pub trait CredentialVerifier: Send + Sync {
    fn hash(&self, plaintext: &str) -> Result<String, CredentialError>;

    /// False for a wrong password and for a malformed stored hash alike.
    fn verify(&self, plaintext: &str, stored: &str) -> bool;
}

#[derive(Clone)]
pub struct HmacCredentials {
    pepper: Vec<u8>,
}

impl HmacCredentials {
    pub fn new(pepper: impl Into<Vec<u8>>) -> Self {
        Self { pepper: pepper.into() }
    }

    fn mac(&self, salt: &[u8], plaintext: &str) -> Result<HmacSha256, CredentialError> {
        let mut mac = HmacSha256::new_from_slice(&self.pepper).map_err(|e| CredentialError(e.to_string()))?;
        mac.update(salt);
        mac.update(plaintext.as_bytes());
        Ok(mac)
    }
}

impl CredentialVerifier for HmacCredentials {
    fn hash(&self, plaintext: &str) -> Result<String, CredentialError> {
        let salt: [u8; SALT_LEN] = {
            use rand::Rng;
            rand::rng().random()
        };
        let tag = self.mac(&salt, plaintext)?.finalize().into_bytes();
        Ok(format!("{}${}", URL_SAFE_NO_PAD.encode(salt), URL_SAFE_NO_PAD.encode(tag)))
    }

    fn verify(&self, plaintext: &str, stored: &str) -> bool {
        let Some((salt, tag)) = stored.split_once('$') else {
            return false;
        };
        let (Ok(salt), Ok(tag)) = (URL_SAFE_NO_PAD.decode(salt), URL_SAFE_NO_PAD.decode(tag)) else {
            return false;
        };
        match self.mac(&salt, plaintext) {
            // verify_slice compares in constant time
            Ok(mac) => mac.verify_slice(&tag).is_ok(),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_then_verify() {
        let creds = HmacCredentials::new(b"pepper".to_vec());
        let stored = creds.hash("correct horse").unwrap();

        assert!(creds.verify("correct horse", &stored));
        assert!(!creds.verify("correct horsf", &stored));
    }

    #[test]
    fn test_hashes_are_salted() {
        let creds = HmacCredentials::new(b"pepper".to_vec());
        assert_ne!(creds.hash("same").unwrap(), creds.hash("same").unwrap());
    }

    #[test]
    fn test_pepper_is_part_of_the_key() {
        let stored = HmacCredentials::new(b"one".to_vec()).hash("pw").unwrap();
        assert!(!HmacCredentials::new(b"two".to_vec()).verify("pw", &stored));
    }

    #[test]
    fn test_malformed_stored_hash() {
        let creds = HmacCredentials::new(b"pepper".to_vec());
        for stored in ["", "nodollar", "$", "!!!$???", "c2FsdA$"] {
            assert!(!creds.verify("pw", stored), "{:?} should not verify", stored);
        }
    }
}
