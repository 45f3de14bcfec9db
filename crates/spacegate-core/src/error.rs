//! Error types for the spacegate core.

/// Core error type for spacegate infrastructure.
#[derive(Debug, thiserror::Error)]
pub enum SpaceGateError {
    /// An external identity carried a zero numeric id.
    #[error("invalid external identity: id must be non-zero")]
    ZeroIdentityId,

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Convenience result type for spacegate operations.
pub type SpaceGateResult<T> = Result<T, SpaceGateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_render_error_messages() {
        assert_eq!(
            SpaceGateError::Config("RATE_LIMIT_WINDOW_SECS must be at most 604800".to_owned())
                .to_string(),
            "configuration error: RATE_LIMIT_WINDOW_SECS must be at most 604800"
        );
        assert_eq!(
            SpaceGateError::ZeroIdentityId.to_string(),
            "invalid external identity: id must be non-zero"
        );
    }
}
