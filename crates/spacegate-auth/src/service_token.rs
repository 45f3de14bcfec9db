//! Static shared-secret gate for service-to-service endpoints.

use std::fmt;

use subtle::ConstantTimeEq;

use crate::error::AuthError;

/// Header carrying the service token.
pub const SERVICE_TOKEN_HEADER: &str = "x-bot-token";

/// Accepts requests carrying one of a fixed set of tokens.
///
/// No HMAC, no timestamp, no cache: an exact match allows, anything else
/// denies.
#[derive(Clone)]
pub struct ServiceTokenGate {
    tokens: Vec<String>,
}

impl fmt::Debug for ServiceTokenGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceTokenGate")
            .field("tokens", &self.tokens.len())
            .finish()
    }
}

impl ServiceTokenGate {
    /// A gate accepting exactly `token`.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self::with_tokens([token.into()])
    }

    /// A gate accepting any of `tokens`. Empty tokens are ignored.
    #[must_use]
    pub fn with_tokens(tokens: impl IntoIterator<Item = String>) -> Self {
        Self {
            tokens: tokens.into_iter().filter(|t| !t.is_empty()).collect(),
        }
    }

    /// Check a presented token.
    ///
    /// Every configured token is compared in constant time, so the result
    /// does not depend on which entry matched.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::ServiceTokenInvalid`] if `presented` is absent,
    /// empty, or not in the set.
    pub fn verify(&self, presented: Option<&str>) -> Result<(), AuthError> {
        let presented = presented
            .filter(|p| !p.is_empty())
            .ok_or(AuthError::ServiceTokenInvalid)?;

        let matched = self.tokens.iter().fold(0u8, |acc, token| {
            acc | token.as_bytes().ct_eq(presented.as_bytes()).unwrap_u8()
        });
        if matched == 1 {
            Ok(())
        } else {
            Err(AuthError::ServiceTokenInvalid)
        }
    }
}
