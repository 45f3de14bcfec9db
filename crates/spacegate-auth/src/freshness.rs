//! Signed timestamp freshness checks.

use crate::error::AuthError;

/// Parse a Unix-seconds `auth_date` value.
///
/// # Errors
///
/// Returns [`AuthError::MissingTimestamp`] when absent and
/// [`AuthError::InvalidTimestamp`] when not a base-10 integer.
pub fn parse_timestamp(value: Option<&str>) -> Result<i64, AuthError> {
    value
        .ok_or(AuthError::MissingTimestamp)?
        .parse::<i64>()
        .map_err(|_| AuthError::InvalidTimestamp)
}

/// Check that `auth_date` is at most `max_age_secs` old at `now`.
///
/// An age exactly equal to the window is accepted. Timestamps in the future
/// have a negative age and are accepted.
///
/// # Errors
///
/// Returns [`AuthError::CredentialExpired`] when `now - auth_date > max_age_secs`.
pub fn check_freshness(auth_date: i64, max_age_secs: i64, now: i64) -> Result<(), AuthError> {
    let age = now.saturating_sub(auth_date);
    if age > max_age_secs {
        return Err(AuthError::CredentialExpired {
            age,
            max_age: max_age_secs,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000;

    #[test]
    fn test_should_accept_age_equal_to_window() {
        assert_eq!(check_freshness(NOW - 3600, 3600, NOW), Ok(()));
    }

    #[test]
    fn test_should_reject_age_one_past_window() {
        assert_eq!(
            check_freshness(NOW - 3601, 3600, NOW),
            Err(AuthError::CredentialExpired {
                age: 3601,
                max_age: 3600
            })
        );
    }

    #[test]
    fn test_should_accept_future_timestamp() {
        assert_eq!(check_freshness(NOW + 30, 3600, NOW), Ok(()));
    }

    #[test]
    fn test_should_parse_timestamp_values() {
        assert_eq!(parse_timestamp(Some("1700000000")), Ok(NOW));
        assert_eq!(parse_timestamp(None), Err(AuthError::MissingTimestamp));
        assert_eq!(
            parse_timestamp(Some("yesterday")),
            Err(AuthError::InvalidTimestamp)
        );
    }
}
