//! Identity and policy types shared across the gateway.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::SpaceGateError;

/// Deployment environment, selecting the membership-failure policy.
///
/// `Production` fails closed when the membership check cannot be completed;
/// `Development` fails open with a warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Permissive policy.
    #[default]
    Development,
    /// Strict policy.
    Production,
}

impl Environment {
    /// Map an `ENVIRONMENT` value to a policy.
    ///
    /// Only the exact literal `production` selects the strict policy; every
    /// other value, including an empty one, selects `Development`.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        if name == "production" {
            Self::Production
        } else {
            Self::Development
        }
    }

    /// Whether this is the strict (fail-closed) policy.
    #[must_use]
    pub fn is_production(self) -> bool {
        matches!(self, Self::Production)
    }

    /// The canonical lowercase name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire shape of an identity before the non-zero id invariant is checked.
#[derive(Debug, Deserialize)]
struct RawIdentity {
    id: i64,
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    last_name: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    photo_url: Option<String>,
    #[serde(default)]
    language_code: Option<String>,
}

impl TryFrom<RawIdentity> for ExternalIdentity {
    type Error = SpaceGateError;

    fn try_from(raw: RawIdentity) -> Result<Self, Self::Error> {
        Ok(Self::new(raw.id)?
            .with_first_name(raw.first_name)
            .with_last_name(raw.last_name)
            .with_username(raw.username)
            .with_photo_url(raw.photo_url)
            .with_language_code(raw.language_code))
    }
}

/// A user as asserted by the external identity provider.
///
/// Produced only by successful credential verification. The numeric id is
/// always non-zero; empty optional fields are normalized to `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawIdentity")]
pub struct ExternalIdentity {
    id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    photo_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    language_code: Option<String>,
}

impl ExternalIdentity {
    /// Create an identity with only the numeric id set.
    ///
    /// # Errors
    ///
    /// Returns [`SpaceGateError::ZeroIdentityId`] if `id` is zero.
    pub fn new(id: i64) -> Result<Self, SpaceGateError> {
        if id == 0 {
            return Err(SpaceGateError::ZeroIdentityId);
        }
        Ok(Self {
            id,
            first_name: None,
            last_name: None,
            username: None,
            photo_url: None,
            language_code: None,
        })
    }

    /// Set the given name.
    #[must_use]
    pub fn with_first_name(mut self, value: Option<String>) -> Self {
        self.first_name = non_empty(value);
        self
    }

    /// Set the family name.
    #[must_use]
    pub fn with_last_name(mut self, value: Option<String>) -> Self {
        self.last_name = non_empty(value);
        self
    }

    /// Set the handle.
    #[must_use]
    pub fn with_username(mut self, value: Option<String>) -> Self {
        self.username = non_empty(value);
        self
    }

    /// Set the avatar URL.
    #[must_use]
    pub fn with_photo_url(mut self, value: Option<String>) -> Self {
        self.photo_url = non_empty(value);
        self
    }

    /// Set the locale.
    #[must_use]
    pub fn with_language_code(mut self, value: Option<String>) -> Self {
        self.language_code = non_empty(value);
        self
    }

    /// The provider's numeric user id.
    #[must_use]
    pub fn id(&self) -> i64 {
        self.id
    }

    /// Given name, if provided.
    #[must_use]
    pub fn first_name(&self) -> Option<&str> {
        self.first_name.as_deref()
    }

    /// Family name, if provided.
    #[must_use]
    pub fn last_name(&self) -> Option<&str> {
        self.last_name.as_deref()
    }

    /// Handle, if provided.
    #[must_use]
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// Avatar URL, if provided.
    #[must_use]
    pub fn photo_url(&self) -> Option<&str> {
        self.photo_url.as_deref()
    }

    /// Locale, if provided.
    #[must_use]
    pub fn language_code(&self) -> Option<&str> {
        self.language_code.as_deref()
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// A user record in the local directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalUser {
    /// Local numeric id.
    pub id: u64,
    /// The external provider's numeric id this user is bound to.
    pub external_id: i64,
    /// Stored handle.
    pub username: String,
    /// Stored given name.
    pub first_name: String,
    /// Stored family name.
    pub last_name: String,
    /// Stored locale.
    pub language_code: String,
}

/// The identity attached to an admitted request.
///
/// Set exactly once by the admission pipeline and read-only for downstream
/// handlers, which find it in the request extensions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthenticatedIdentity {
    /// The resolved local user.
    pub user: LocalUser,
    /// The verified external identity this request carried.
    pub external: ExternalIdentity,
}

impl AuthenticatedIdentity {
    /// The local user id (the `userID` context value).
    #[must_use]
    pub fn user_id(&self) -> u64 {
        self.user.id
    }
}
