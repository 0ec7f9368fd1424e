//! `Grip-Sig` request signing.
//!
//! Backends behind shared infrastructure verify that event POSTs really come
//! from this gateway by checking a short-lived JWT in the `Grip-Sig` header.
//! Tokens are HS256 with claims `{iss, exp}`; expiry is one hour out from
//! signing time.

use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

const TOKEN_LIFETIME_SECS: u64 = 60 * 60;

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    iss: String,
    exp: u64,
}

#[derive(Clone)]
pub struct Signer {
    issuer: String,
    key: EncodingKey,
    header: Header,
}

impl Signer {
    pub fn new(issuer: impl Into<String>, secret: &[u8]) -> Self {
        Signer {
            issuer: issuer.into(),
            key: EncodingKey::from_secret(secret),
            header: Header::new(Algorithm::HS256),
        }
    }

    /// Produce a fresh token for one request.
    pub fn sign(&self) -> Result<String, jsonwebtoken::errors::Error> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let claims = Claims {
            iss: self.issuer.clone(),
            exp: now + TOKEN_LIFETIME_SECS,
        };
        jsonwebtoken::encode(&self.header, &claims, &self.key)
    }
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer")
            .field("issuer", &self.issuer)
            .finish_non_exhaustive()
    }
}
