use crate::schemas::MemberId;
use actix_web::{http::header::HeaderValue, HttpRequest};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::num::ParseIntError;

type HmacSha256 = Hmac<Sha256>;

/// How far ahead of our clock, in seconds, an `auth_date` may be.
const CLOCK_SKEW_SECS: i64 = 300;

#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub secret: String,
    pub service_token: Option<String>,
    /// Identities signed longer ago than this are refused; `None` accepts any age.
    pub max_age: Option<Duration>,
}

#[derive(Debug, PartialEq)]
pub enum AuthorizationLevel {
    /// Trusted backend caller; may read any group but never writes.
    Service,
    Member(MemberId),
}

/// Identity issued by the authentication provider, sent as JSON in the
/// `Authorization` header.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct SignedIdentity {
    pub auth_date: String,
    pub member_id: MemberId,
    pub name: Option<String>,
    pub hash: String,
}

pub fn check_authorization_level(
    request: &HttpRequest,
    settings: &AuthSettings,
) -> Option<AuthorizationLevel> {
    let authorization = request
        .headers()
        .get(actix_web::http::header::AUTHORIZATION)
        .map(HeaderValue::to_str)?
        .ok()?;
    if settings
        .service_token
        .as_deref()
        .is_some_and(|token| !token.is_empty() && authorization == token)
    {
        return Some(AuthorizationLevel::Service);
    }
    let identity: SignedIdentity = serde_json::from_str(authorization).ok()?;
    if !verify_identity(&identity, &settings.secret) {
        return None;
    }
    if let Some(max_age) = settings.max_age {
        if !is_fresh(&identity, max_age, Utc::now()) {
            tracing::debug!(member = %identity.member_id, auth_date = %identity.auth_date, "stale identity refused");
            return None;
        }
    }
    Some(AuthorizationLevel::Member(identity.member_id))
}

/// `auth_date` holds unix seconds. Unparseable dates are never fresh.
pub fn is_fresh(identity: &SignedIdentity, max_age: Duration, now: DateTime<Utc>) -> bool {
    let signed_at = match identity
        .auth_date
        .parse::<i64>()
        .ok()
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
    {
        Some(signed_at) => signed_at,
        None => return false,
    };
    let age = now - signed_at;
    age <= max_age && age >= Duration::seconds(-CLOCK_SKEW_SECS)
}

pub fn verify_identity(identity: &SignedIdentity, secret: &str) -> bool {
    let hash = match decode_hex(&identity.hash) {
        Ok(hash) => hash,
        Err(_) => return false,
    };
    match keyed_mac(identity, secret) {
        Some(mac) => mac.verify_slice(&hash).is_ok(),
        None => false,
    }
}

/// Hex-encoded signature over the identity fields, as the provider
/// computes it.
pub fn sign_identity(identity: &SignedIdentity, secret: &str) -> Option<String> {
    let mac = keyed_mac(identity, secret)?;
    Some(
        mac.finalize()
            .into_bytes()
            .iter()
            .map(|byte| format!("{byte:02x}"))
            .collect(),
    )
}

fn decode_hex(hash: &str) -> Result<Vec<u8>, ParseIntError> {
    hash.chars()
        .collect::<Vec<_>>()
        .chunks(2)
        .map(|n| u8::from_str_radix(&String::from_iter(n), 16))
        .collect()
}

fn keyed_mac(identity: &SignedIdentity, secret: &str) -> Option<HmacSha256> {
    let hash_content = [
        ("auth_date", Some(identity.auth_date.as_str())),
        ("member_id", Some(identity.member_id.as_str())),
        ("name", identity.name.as_deref()),
    ]
    .into_iter()
    .filter_map(|(key, value)| value.map(|val| format!("{key}={val}")))
    .collect::<Vec<_>>()
    .join("\n");

    let mut sha256_hasher = Sha256::new();
    sha256_hasher.update(secret.as_bytes());
    let secret_hash = sha256_hasher.finalize();

    let mut hmac_hasher = HmacSha256::new_from_slice(&secret_hash).ok()?;
    hmac_hasher.update(hash_content.as_bytes());
    Some(hmac_hasher)
}
