//! Payload decoding and data-check-string construction.
//!
//! A signed payload is an `application/x-www-form-urlencoded` query string.
//! The message authenticated by both protocols is:
//!
//! ```text
//! key1=value1\n
//! key2=value2\n
//! ...
//! keyN=valueN
//! ```
//!
//! with every field except `hash` included, sorted by key, using decoded
//! values.

use std::borrow::Cow;
use std::collections::BTreeMap;

use percent_encoding::percent_decode_str;

use crate::error::AuthError;

/// Name of the detached signature field.
pub const HASH_FIELD: &str = "hash";

/// Name of the signed timestamp field.
pub const AUTH_DATE_FIELD: &str = "auth_date";

/// A decoded signed payload.
///
/// Keys are unique; when a key repeats, the first value wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialFields {
    fields: BTreeMap<String, String>,
}

impl CredentialFields {
    /// Decode a raw query string.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::MissingCredential`] for an empty payload and
    /// [`AuthError::MalformedCredential`] for a `;` separator, a malformed
    /// percent escape, or a component that does not decode to UTF-8.
    pub fn parse(raw: &str) -> Result<Self, AuthError> {
        if raw.is_empty() {
            return Err(AuthError::MissingCredential);
        }
        if raw.contains(';') {
            return Err(AuthError::MalformedCredential(
                "invalid semicolon separator in payload".to_owned(),
            ));
        }
        validate_escapes(raw)?;

        let mut fields = BTreeMap::new();
        for pair in raw.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let key = decode_component(key)?;
            let value = decode_component(value)?;
            fields.entry(key).or_insert(value);
        }
        Ok(Self { fields })
    }

    /// Build from already-decoded pairs. The first value for a key wins.
    #[must_use]
    pub fn from_pairs<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut fields = BTreeMap::new();
        for (key, value) in pairs {
            fields
                .entry(key.to_owned())
                .or_insert_with(|| value.to_owned());
        }
        Self { fields }
    }

    /// Value of `key`, treating an empty value as absent.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Whether `key` is present with a non-empty value.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// The detached signature, if present.
    #[must_use]
    pub fn hash(&self) -> Option<&str> {
        self.get(HASH_FIELD)
    }

    /// Build the data-check-string over every field except `hash`.
    ///
    /// # Examples
    ///
    /// ```
    /// use spacegate_auth::canonical::CredentialFields;
    ///
    /// let fields = CredentialFields::parse("b=2&hash=ff&a=1").unwrap();
    /// assert_eq!(fields.data_check_string(), "a=1\nb=2");
    /// ```
    #[must_use]
    pub fn data_check_string(&self) -> String {
        self.fields
            .iter()
            .filter(|(key, _)| key.as_str() != HASH_FIELD)
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Iterate over all decoded fields in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Decode one key or value: `+` is a space, `%XX` is a byte, and the
/// resulting bytes must be UTF-8.
fn decode_component(component: &str) -> Result<String, AuthError> {
    let spaced = component.replace('+', " ");
    percent_decode_str(&spaced)
        .decode_utf8()
        .map(Cow::into_owned)
        .map_err(|e| AuthError::MalformedCredential(format!("invalid UTF-8 in payload: {e}")))
}

/// Reject `%` not followed by two hex digits.
fn validate_escapes(raw: &str) -> Result<(), AuthError> {
    let bytes = raw.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let valid = bytes.len() > i + 2
                && bytes[i + 1].is_ascii_hexdigit()
                && bytes[i + 2].is_ascii_hexdigit();
            if !valid {
                return Err(AuthError::MalformedCredential(format!(
                    "invalid percent escape at offset {i}"
                )));
            }
            i += 3;
        } else {
            i += 1;
        }
    }
    Ok(())
}
