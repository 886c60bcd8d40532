//! Credentials carried by sessions and passed through hub invocations.
//!
//! The runtime treats them as opaque beyond signing: there is no
//! authorization framework here, only a token that peers can verify when
//! they share the authority secret.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::core::id::Id;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(default)]
    pub id: Id,
    #[serde(default)]
    pub name: String,
}

#[derive(Error, Debug)]
pub enum CredentialsError {
    #[error("invalid signature")]
    InvalidSignature,
    #[error("invalid token: {0}")]
    InvalidToken(String),
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Credentials {
    pub authority: String,
    pub admin: bool,
    pub user: User,
    pub groups: Vec<Id>,
    pub timestamp: i64,
    pub signature: String,
}

impl Credentials {
    pub fn sign(&mut self, secret: &str) {
        self.signature = self.compute_signature(secret);
    }

    pub fn verify(&self, secret: &str) -> Result<(), CredentialsError> {
        if self.signature != self.compute_signature(secret) {
            return Err(CredentialsError::InvalidSignature);
        }
        Ok(())
    }

    fn compute_signature(&self, secret: &str) -> String {
        let mut digest = Sha256::new();
        digest.update(self.authority.as_bytes());
        digest.update(self.user.id.as_bytes());
        digest.update(if self.admin { [0xff] } else { [0x00] });
        digest.update(self.user.name.as_bytes());
        digest.update([0]);
        for group in &self.groups {
            digest.update(group.as_bytes());
            digest.update([0]);
        }
        digest.update(self.timestamp.to_le_bytes());
        digest.update(secret.as_bytes());
        BASE64.encode(digest.finalize())
    }

    /// Opaque token form: base64 over the JSON encoding.
    pub fn tokenize(&self) -> String {
        let json = serde_json::to_vec(self).unwrap_or_default();
        BASE64.encode(json)
    }

    pub fn parse(token: &str) -> Result<Credentials, CredentialsError> {
        let bytes = BASE64
            .decode(token.as_bytes())
            .map_err(|err| CredentialsError::InvalidToken(err.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|err| CredentialsError::InvalidToken(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Credentials {
        Credentials {
            authority: "auth.example".to_string(),
            admin: true,
            user: User {
                id: Id::generate(),
                name: "alice".to_string(),
            },
            groups: vec![Id::generate()],
            timestamp: 1_700_000_000,
            signature: String::new(),
        }
    }

    #[test]
    fn sign_and_verify() {
        let mut creds = sample();
        creds.sign("secret");
        assert!(creds.verify("secret").is_ok());
        assert!(creds.verify("other").is_err());
    }

    #[test]
    fn tampering_breaks_the_signature() {
        let mut creds = sample();
        creds.sign("secret");
        creds.admin = false;
        assert!(creds.verify("secret").is_err());
    }

    #[test]
    fn token_round_trip() {
        let mut creds = sample();
        creds.sign("secret");
        let token = creds.tokenize();
        let back = Credentials::parse(&token).unwrap();
        assert_eq!(back, creds);
    }
}
