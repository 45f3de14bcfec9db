//! Credential verification for both protocols.
//!
//! One verification routine, parameterized by the protocol's
//! [`ProtocolDescriptor`](crate::protocol::ProtocolDescriptor):
//!
//! 1. Decode the payload and pull out the detached `hash`.
//! 2. Parse `auth_date` and check it against the freshness window.
//! 3. Recompute `hex(HMAC-SHA256(key, data_check_string))` and compare.
//! 4. Extract the identity according to the protocol's field layout.

use chrono::Utc;
use hmac::{Hmac, KeyInit, Mac};
use sha2::Sha256;
use spacegate_core::ExternalIdentity;
use subtle::ConstantTimeEq;
use tracing::debug;

use crate::canonical::{AUTH_DATE_FIELD, CredentialFields, HASH_FIELD};
use crate::error::AuthError;
use crate::freshness::{check_freshness, parse_timestamp};
use crate::protocol::{IdentityLayout, Protocol};

type HmacSha256 = Hmac<Sha256>;

/// Verify a signed payload against the current wall clock.
///
/// `max_age_secs` overrides the protocol's default freshness window.
///
/// # Errors
///
/// Returns the [`AuthError`] describing the first check that failed.
pub fn verify_credential(
    raw: &str,
    protocol: Protocol,
    bot_token: &str,
    max_age_secs: Option<i64>,
) -> Result<ExternalIdentity, AuthError> {
    verify_credential_at(raw, protocol, bot_token, max_age_secs, Utc::now().timestamp())
}

/// Verify a signed payload as of the Unix time `now`.
///
/// # Errors
///
/// Returns the [`AuthError`] describing the first check that failed.
pub fn verify_credential_at(
    raw: &str,
    protocol: Protocol,
    bot_token: &str,
    max_age_secs: Option<i64>,
    now: i64,
) -> Result<ExternalIdentity, AuthError> {
    let descriptor = protocol.descriptor();
    let fields = CredentialFields::parse(raw)?;

    let provided_hash = fields.hash().ok_or(AuthError::MissingSignature)?;

    let auth_date = parse_timestamp(fields.get(AUTH_DATE_FIELD))?;
    let max_age = max_age_secs.unwrap_or(descriptor.default_max_age_secs);
    check_freshness(auth_date, max_age, now)?;

    let expected_hash = compute_hash(protocol, bot_token, &fields.data_check_string());
    if !bool::from(provided_hash.as_bytes().ct_eq(expected_hash.as_bytes())) {
        debug!(protocol = %protocol, "Credential hash mismatch");
        return Err(AuthError::InvalidSignature);
    }

    let identity = match descriptor.identity_layout {
        IdentityLayout::EmbeddedJson(field) => embedded_identity(&fields, field)?,
        IdentityLayout::TopLevelFields => top_level_identity(&fields)?,
    };

    debug!(protocol = %protocol, external_id = identity.id(), "Credential verified");
    Ok(identity)
}

/// Compute the lowercase hex signature of a data-check-string.
#[must_use]
pub fn compute_hash(protocol: Protocol, bot_token: &str, data_check_string: &str) -> String {
    let key = protocol.descriptor().key_derivation.derive(bot_token);
    let mut mac = HmacSha256::new_from_slice(&key).expect("HMAC can accept keys of any length");
    mac.update(data_check_string.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Encode `pairs` as a signed payload for `protocol`, appending `hash`.
///
/// This is the client side of [`verify_credential`].
///
/// # Examples
///
/// ```
/// use spacegate_auth::{Protocol, sign_fields, verify_credential_at};
///
/// let raw = sign_fields(
///     Protocol::LoginWidget,
///     "123:token",
///     &[("id", "42"), ("auth_date", "1700000000")],
/// );
/// let identity =
///     verify_credential_at(&raw, Protocol::LoginWidget, "123:token", None, 1_700_000_000)
///         .unwrap();
/// assert_eq!(identity.id(), 42);
/// ```
#[must_use]
pub fn sign_fields(protocol: Protocol, bot_token: &str, pairs: &[(&str, &str)]) -> String {
    let fields = CredentialFields::from_pairs(
        pairs
            .iter()
            .copied()
            .filter(|(key, _)| *key != HASH_FIELD),
    );
    let hash = compute_hash(protocol, bot_token, &fields.data_check_string());

    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (key, value) in fields.iter() {
        serializer.append_pair(key, value);
    }
    serializer.append_pair(HASH_FIELD, &hash);
    serializer.finish()
}

fn embedded_identity(fields: &CredentialFields, field: &str) -> Result<ExternalIdentity, AuthError> {
    let json = fields.get(field).ok_or(AuthError::MissingIdentityPayload)?;
    serde_json::from_str(json)
        .map_err(|e| AuthError::MalformedCredential(format!("invalid {field} payload: {e}")))
}

fn top_level_identity(fields: &CredentialFields) -> Result<ExternalIdentity, AuthError> {
    let id = fields
        .get("id")
        .ok_or(AuthError::MissingIdentityPayload)?
        .parse::<i64>()
        .map_err(|_| AuthError::MalformedCredential("id is not an integer".to_owned()))?;

    let owned = |key: &str| fields.get(key).map(ToOwned::to_owned);
    let identity = ExternalIdentity::new(id)
        .map_err(|e| AuthError::MalformedCredential(e.to_string()))?
        .with_first_name(owned("first_name"))
        .with_last_name(owned("last_name"))
        .with_username(owned("username"))
        .with_photo_url(owned("photo_url"))
        .with_language_code(owned("language_code"));
    Ok(identity)
}
