//! Credential verification error types.

/// Errors that can occur while verifying a signed credential or a service token.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// No signed payload was supplied.
    #[error("Missing credential")]
    MissingCredential,

    /// The payload could not be parsed as the expected wire shape.
    #[error("Malformed credential: {0}")]
    MalformedCredential(String),

    /// The payload carries no `hash` field.
    #[error("Missing signature")]
    MissingSignature,

    /// The recomputed hash does not match the supplied one.
    #[error("The credential signature does not match")]
    InvalidSignature,

    /// The payload carries no `auth_date` field.
    #[error("Missing auth_date timestamp")]
    MissingTimestamp,

    /// The `auth_date` field is not an integer.
    #[error("Invalid auth_date timestamp")]
    InvalidTimestamp,

    /// The credential is older than the freshness window.
    #[error("Credential expired: age {age}s exceeds {max_age}s")]
    CredentialExpired {
        /// Age of the credential in seconds.
        age: i64,
        /// Configured freshness window in seconds.
        max_age: i64,
    },

    /// The payload lacks the identity fields of the declared protocol.
    #[error("Missing identity payload")]
    MissingIdentityPayload,

    /// A service-to-service token was absent or not recognized.
    #[error("Invalid service token")]
    ServiceTokenInvalid,
}

impl AuthError {
    /// Stable machine-readable name of this error kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingCredential => "missing_credential",
            Self::MalformedCredential(_) => "malformed_credential",
            Self::MissingSignature => "missing_signature",
            Self::InvalidSignature => "invalid_signature",
            Self::MissingTimestamp => "missing_timestamp",
            Self::InvalidTimestamp => "invalid_timestamp",
            Self::CredentialExpired { .. } => "credential_expired",
            Self::MissingIdentityPayload => "missing_identity_payload",
            Self::ServiceTokenInvalid => "service_token_invalid",
        }
    }

    /// Whether the signature was absent or did not match. These are logged
    /// at warning level.
    #[must_use]
    pub fn is_signature_failure(&self) -> bool {
        matches!(self, Self::MissingSignature | Self::InvalidSignature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_classify_signature_failures() {
        assert!(AuthError::MissingSignature.is_signature_failure());
        assert!(AuthError::InvalidSignature.is_signature_failure());
        assert!(!AuthError::MissingCredential.is_signature_failure());
        assert!(!AuthError::CredentialExpired { age: 10, max_age: 5 }.is_signature_failure());
        assert!(!AuthError::MalformedCredential("x".to_owned()).is_signature_failure());
    }

    #[test]
    fn test_should_expose_stable_kinds() {
        assert_eq!(AuthError::MissingSignature.kind(), "missing_signature");
        assert_eq!(AuthError::ServiceTokenInvalid.kind(), "service_token_invalid");
    }
}
