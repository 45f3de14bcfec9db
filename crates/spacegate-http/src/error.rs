//! Request rejection types.

use http::StatusCode;
use spacegate_auth::AuthError;

/// A terminal outcome that ends a request before or instead of its handler.
///
/// Every rejection maps to one HTTP status and a stable machine-readable kind.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    /// Credential or service-token verification failed.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// The client is over its rate limit or in cooldown.
    #[error("Too many requests, retry later")]
    RateLimitExceeded,

    /// The `Origin` header names an origin outside the allow-set.
    #[error("Origin '{0}' is not allowed")]
    OriginNotAllowed(String),

    /// The `Referer` header does not start with an allowed origin.
    #[error("Referer is not allowed")]
    RefererMismatch,

    /// The identity is not a member of the required group.
    #[error("Access denied. You must be a member of the authorized group")]
    NotAMember,

    /// The membership check could not be completed under the strict policy.
    #[error("Failed to verify membership")]
    MembershipCheckFailed,

    /// Membership is required but no group is configured.
    #[error("Server configuration error: required group is not configured")]
    MembershipNotConfigured,

    /// The local user directory failed.
    #[error("Failed to resolve local user")]
    IdentityResolutionFailed,

    /// The request is well-formed but cannot be honored.
    #[error("{0}")]
    BadRequest(String),

    /// No route matches the request.
    #[error("No route for {method} {path}")]
    NotFound {
        /// Request method.
        method: String,
        /// Request path.
        path: String,
    },

    /// An unexpected internal failure.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Rejection {
    /// The HTTP status code for this rejection.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Auth(_) => StatusCode::UNAUTHORIZED,
            Self::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            Self::OriginNotAllowed(_) | Self::RefererMismatch | Self::NotAMember => {
                StatusCode::FORBIDDEN
            }
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::MembershipCheckFailed
            | Self::MembershipNotConfigured
            | Self::IdentityResolutionFailed
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable name of this rejection.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Auth(err) => err.kind(),
            Self::RateLimitExceeded => "rate_limit_exceeded",
            Self::OriginNotAllowed(_) => "origin_not_allowed",
            Self::RefererMismatch => "referer_mismatch",
            Self::NotAMember => "not_a_member",
            Self::MembershipCheckFailed => "membership_check_failed",
            Self::MembershipNotConfigured => "membership_not_configured",
            Self::IdentityResolutionFailed => "identity_resolution_failed",
            Self::BadRequest(_) => "bad_request",
            Self::NotFound { .. } => "not_found",
            Self::Internal(_) => "internal_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_map_auth_errors_to_unauthorized() {
        let rejection = Rejection::from(AuthError::InvalidSignature);
        assert_eq!(rejection.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(rejection.kind(), "invalid_signature");

        let rejection = Rejection::from(AuthError::ServiceTokenInvalid);
        assert_eq!(rejection.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(rejection.kind(), "service_token_invalid");
    }

    #[test]
    fn test_should_map_policy_rejections() {
        assert_eq!(
            Rejection::RateLimitExceeded.status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            Rejection::OriginNotAllowed("https://evil.example".to_owned()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(Rejection::RefererMismatch.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(Rejection::NotAMember.status_code(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_should_map_server_side_failures_to_500() {
        for rejection in [
            Rejection::MembershipCheckFailed,
            Rejection::MembershipNotConfigured,
            Rejection::IdentityResolutionFailed,
        ] {
            assert_eq!(rejection.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        }
        assert_eq!(
            Rejection::MembershipNotConfigured.kind(),
            "membership_not_configured"
        );
    }
}
