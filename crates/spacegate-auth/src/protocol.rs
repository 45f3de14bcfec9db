//! Protocol tags and their descriptors.
//!
//! Both credential formats share the data-check-string and comparison
//! procedure. They differ only in how the HMAC key is derived from the bot
//! token, where the identity lives in the payload, and the default freshness
//! window. Those three facts make up a [`ProtocolDescriptor`].

use std::fmt;

use hmac::{Hmac, KeyInit, Mac};
use sha2::{Digest, Sha256};

use crate::canonical::CredentialFields;
use crate::error::AuthError;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the caller-declared protocol.
pub const AUTH_TYPE_HEADER: &str = "x-telegram-auth-type";

/// Domain constant keying the app-embedded secret derivation.
const WEB_APP_DATA_KEY: &[u8] = b"WebAppData";

/// A supported credential format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// App-embedded payload with a JSON `user` field (Protocol A).
    MiniApp,
    /// Widget-redirect payload with top-level identity fields (Protocol B).
    LoginWidget,
}

/// How the HMAC key is derived from the shared bot token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyDerivation {
    /// `HMAC-SHA256(key = "WebAppData", message = token)`.
    WebAppData,
    /// `SHA-256(token)`.
    TokenDigest,
}

/// Where the claimed identity lives in the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityLayout {
    /// A JSON object in the named field.
    EmbeddedJson(&'static str),
    /// Discrete top-level fields keyed by `id`, `first_name`, and so on.
    TopLevelFields,
}

/// The parameters that distinguish one protocol from another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolDescriptor {
    /// Key derivation strategy.
    pub key_derivation: KeyDerivation,
    /// Identity field layout.
    pub identity_layout: IdentityLayout,
    /// Freshness window used when the caller does not supply one.
    pub default_max_age_secs: i64,
}

const MINI_APP: ProtocolDescriptor = ProtocolDescriptor {
    key_derivation: KeyDerivation::WebAppData,
    identity_layout: IdentityLayout::EmbeddedJson("user"),
    default_max_age_secs: 3600,
};

const LOGIN_WIDGET: ProtocolDescriptor = ProtocolDescriptor {
    key_derivation: KeyDerivation::TokenDigest,
    identity_layout: IdentityLayout::TopLevelFields,
    default_max_age_secs: 7 * 24 * 60 * 60,
};

impl Protocol {
    /// The descriptor for this protocol.
    #[must_use]
    pub fn descriptor(self) -> &'static ProtocolDescriptor {
        match self {
            Self::MiniApp => &MINI_APP,
            Self::LoginWidget => &LOGIN_WIDGET,
        }
    }

    /// The wire name used in the auth-type header.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MiniApp => "miniapp",
            Self::LoginWidget => "loginwidget",
        }
    }

    /// Resolve the caller-declared protocol from the auth-type header value.
    ///
    /// An absent or empty header means [`Protocol::MiniApp`].
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::MalformedCredential`] for an unrecognized value.
    pub fn from_header(value: Option<&str>) -> Result<Self, AuthError> {
        match value.map(str::trim) {
            None | Some("" | "miniapp") => Ok(Self::MiniApp),
            Some("loginwidget") => Ok(Self::LoginWidget),
            Some(other) => Err(AuthError::MalformedCredential(format!(
                "unsupported auth type '{other}'"
            ))),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl KeyDerivation {
    /// Derive the 32-byte HMAC key from the bot token.
    #[must_use]
    pub fn derive(self, token: &str) -> Vec<u8> {
        match self {
            Self::WebAppData => {
                let mut mac = HmacSha256::new_from_slice(WEB_APP_DATA_KEY)
                    .expect("HMAC can accept keys of any length");
                mac.update(token.as_bytes());
                mac.finalize().into_bytes().to_vec()
            }
            Self::TokenDigest => Sha256::digest(token.as_bytes()).to_vec(),
        }
    }
}

/// Guess which protocol a payload was produced by.
///
/// A non-empty `user` field means [`Protocol::MiniApp`], a non-empty `id` field
/// means [`Protocol::LoginWidget`]. Returns `None` for anything else, including
/// undecodable payloads. Intended for diagnostics only.
#[must_use]
pub fn detect_protocol(raw: &str) -> Option<Protocol> {
    let fields = CredentialFields::parse(raw).ok()?;
    if fields.contains("user") {
        Some(Protocol::MiniApp)
    } else if fields.contains("id") {
        Some(Protocol::LoginWidget)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_default_to_miniapp() {
        assert_eq!(Protocol::from_header(None), Ok(Protocol::MiniApp));
        assert_eq!(Protocol::from_header(Some("")), Ok(Protocol::MiniApp));
        assert_eq!(
            Protocol::from_header(Some("loginwidget")),
            Ok(Protocol::LoginWidget)
        );
    }

    #[test]
    fn test_should_reject_unknown_auth_type() {
        assert!(matches!(
            Protocol::from_header(Some("oauth")),
            Err(AuthError::MalformedCredential(_))
        ));
    }

    #[test]
    fn test_should_carry_default_windows() {
        assert_eq!(Protocol::MiniApp.descriptor().default_max_age_secs, 3600);
        assert_eq!(
            Protocol::LoginWidget.descriptor().default_max_age_secs,
            604_800
        );
    }

    #[test]
    fn test_should_derive_distinct_keys() {
        let a = KeyDerivation::WebAppData.derive("123:token");
        let b = KeyDerivation::TokenDigest.derive("123:token");
        assert_eq!(a.len(), 32);
        assert_eq!(b.len(), 32);
        assert_ne!(a, b);
        assert_eq!(
            hex::encode(KeyDerivation::TokenDigest.derive("")),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_should_detect_protocol_shape() {
        assert_eq!(
            detect_protocol("user=%7B%22id%22%3A1%7D&hash=ab"),
            Some(Protocol::MiniApp)
        );
        assert_eq!(
            detect_protocol("id=1&auth_date=1&hash=ab"),
            Some(Protocol::LoginWidget)
        );
        assert_eq!(detect_protocol("auth_date=1&hash=ab"), None);
        assert_eq!(detect_protocol("a=%zz"), None);
    }
}
