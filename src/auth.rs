use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};

/// Lifetime of each bearer token. A fresh token is minted per request.
const TOKEN_TTL_MINUTES: i64 = 10;
const ISSUER: &str = "sdk";

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct Claims {
    pub(crate) sub: String,
    pub(crate) iat: i64,
    pub(crate) exp: i64,
    pub(crate) iss: String,
}

/// Signs an HS256 token identifying `key`, with `key` also carried as the `kid` header.
pub(crate) fn generate_jwt(key: &str, secret: &str) -> Result<String> {
    let now = Utc::now();
    let claims = Claims {
        sub: key.to_string(),
        iat: now.timestamp(),
        exp: (now + Duration::minutes(TOKEN_TTL_MINUTES)).timestamp(),
        iss: ISSUER.to_string(),
    };

    let mut header = Header::new(Algorithm::HS256);
    header.kid = Some(key.to_string());

    jsonwebtoken::encode(&header, &claims, &EncodingKey::from_secret(secret.as_bytes()))
        .context("failed to sign API token")
}
