//! Inbound webhook authentication.
//!
//! Verification always runs on the raw body bytes, before any JSON decoding.

use crate::error::AuthError;
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Svix rejects messages older (or newer) than this.
const TIMESTAMP_TOLERANCE_SECS: i64 = 5 * 60;

pub trait WebhookVerifier: Send + Sync {
    fn verify(&self, body: &[u8], headers: &HeaderMap) -> Result<(), AuthError>;
}

/// Static `Authorization: Bearer <token>` check.
#[derive(Debug, Clone)]
pub struct BearerVerifier {
    token: String,
}

impl BearerVerifier {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl WebhookVerifier for BearerVerifier {
    fn verify(&self, _body: &[u8], headers: &HeaderMap) -> Result<(), AuthError> {
        let authorization = headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.is_empty())
            .ok_or(AuthError::Unauthorized)?;

        let token = authorization.strip_prefix("Bearer ").unwrap_or(authorization);

        if token.is_empty() || self.token.is_empty() || !constant_time_eq(token.as_bytes(), self.token.as_bytes()) {
            return Err(AuthError::Forbidden);
        }

        Ok(())
    }
}

/// HMAC-SHA256 signatures in the Svix format used by Alby webhooks.
#[derive(Clone)]
pub struct SvixVerifier {
    mac: HmacSha256,
}

impl SvixVerifier {
    /// Accepts the secret as shown in the provider dashboard (`whsec_<base64>`).
    pub fn new(secret: &str) -> Result<Self, AuthError> {
        let encoded = secret.strip_prefix("whsec_").unwrap_or(secret);
        let key = STANDARD
            .decode(encoded)
            .map_err(|e| AuthError::InvalidSignature(format!("malformed webhook secret: {}", e)))?;

        let mac = HmacSha256::new_from_slice(&key)
            .map_err(|e| AuthError::InvalidSignature(format!("unusable webhook secret: {}", e)))?;

        Ok(Self { mac })
    }

    pub fn sign(&self, msg_id: &str, timestamp: i64, body: &[u8]) -> String {
        let mut mac = self.mac.clone();

        mac.update(msg_id.as_bytes());
        mac.update(b".");
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(body);

        STANDARD.encode(mac.finalize().into_bytes())
    }

    fn verify_at(&self, body: &[u8], headers: &HeaderMap, now: i64) -> Result<(), AuthError> {
        let msg_id = header(headers, "svix-id", "webhook-id")?;
        let timestamp = header(headers, "svix-timestamp", "webhook-timestamp")?;
        let signatures = header(headers, "svix-signature", "webhook-signature")?;

        let timestamp: i64 = timestamp
            .trim()
            .parse()
            .map_err(|_| AuthError::InvalidSignature("invalid timestamp".to_string()))?;

        if now.abs_diff(timestamp) > TIMESTAMP_TOLERANCE_SECS.unsigned_abs() {
            let reason = if timestamp < now {
                "message timestamp too old"
            } else {
                "message timestamp too new"
            };
            return Err(AuthError::InvalidSignature(reason.to_string()));
        }

        let expected = self.sign(msg_id, timestamp, body);

        let matched = signatures
            .split_whitespace()
            .filter_map(|entry| entry.split_once(','))
            .filter(|(version, _)| *version == "v1")
            .any(|(_, signature)| constant_time_eq(signature.as_bytes(), expected.as_bytes()));

        if !matched {
            return Err(AuthError::InvalidSignature("no matching signature found".to_string()));
        }

        Ok(())
    }
}

impl WebhookVerifier for SvixVerifier {
    fn verify(&self, body: &[u8], headers: &HeaderMap) -> Result<(), AuthError> {
        self.verify_at(body, headers, chrono::Utc::now().timestamp())
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str, alt: &str) -> Result<&'a str, AuthError> {
    headers
        .get(name)
        .or_else(|| headers.get(alt))
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| AuthError::InvalidSignature(format!("missing {} header", name)))
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}
