//! Group membership checks against the identity provider.

use std::fmt;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

/// Default Bot API base URL.
pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Default bound on a single membership request.
pub const DEFAULT_MEMBERSHIP_TIMEOUT: Duration = Duration::from_secs(5);

/// Member statuses that grant access. `left`, `kicked`, and `restricted` do not.
const MEMBER_STATUSES: &[&str] = &["creator", "administrator", "member"];

/// Errors from a membership check that could not be completed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MembershipError {
    /// The request did not complete within its deadline.
    #[error("membership check timed out")]
    Timeout,

    /// The request failed in transport.
    #[error("membership request failed: {0}")]
    Transport(String),

    /// The response could not be decoded.
    #[error("failed to decode membership response: {0}")]
    Decode(String),
}

/// Answers whether an external identity belongs to a group.
///
/// Implementations perform network I/O and own their credentials.
#[async_trait::async_trait]
pub trait MembershipChecker: Send + Sync + 'static {
    /// Whether `external_id` is a member of `group_id`.
    async fn is_member(&self, external_id: i64, group_id: i64) -> Result<bool, MembershipError>;
}

#[derive(Debug, Deserialize)]
struct ChatMemberResponse {
    ok: bool,
    #[serde(default)]
    result: Option<ChatMember>,
}

#[derive(Debug, Deserialize)]
struct ChatMember {
    status: String,
}

impl ChatMemberResponse {
    /// `ok=false` means not a member; otherwise the status decides.
    fn grants_access(&self) -> bool {
        self.ok
            && self
                .result
                .as_ref()
                .is_some_and(|member| MEMBER_STATUSES.contains(&member.status.as_str()))
    }
}

/// [`MembershipChecker`] backed by the Bot API `getChatMember` method.
#[derive(Clone)]
pub struct TelegramMembershipClient {
    http: reqwest::Client,
    api_base: String,
    bot_token: String,
}

impl fmt::Debug for TelegramMembershipClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelegramMembershipClient")
            .field("api_base", &self.api_base)
            .field("bot_token", &"<redacted>")
            .finish_non_exhaustive()
    }
}

impl TelegramMembershipClient {
    /// Create a client against the public Bot API with the default timeout.
    ///
    /// # Errors
    ///
    /// Returns [`MembershipError::Transport`] if the HTTP client cannot be built.
    pub fn new(bot_token: impl Into<String>) -> Result<Self, MembershipError> {
        Self::with_options(bot_token, DEFAULT_API_BASE, DEFAULT_MEMBERSHIP_TIMEOUT)
    }

    /// Create a client against `api_base` with a per-request `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`MembershipError::Transport`] if the HTTP client cannot be built.
    pub fn with_options(
        bot_token: impl Into<String>,
        api_base: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, MembershipError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MembershipError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_owned(),
            bot_token: bot_token.into(),
        })
    }
}

#[async_trait::async_trait]
impl MembershipChecker for TelegramMembershipClient {
    async fn is_member(&self, external_id: i64, group_id: i64) -> Result<bool, MembershipError> {
        let url = format!(
            "{}/bot{}/getChatMember?chat_id={group_id}&user_id={external_id}",
            self.api_base, self.bot_token
        );
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    MembershipError::Timeout
                } else {
                    // Without the URL, which embeds the token.
                    MembershipError::Transport(e.without_url().to_string())
                }
            })?;

        let body: ChatMemberResponse = response
            .json()
            .await
            .map_err(|e| MembershipError::Decode(e.without_url().to_string()))?;

        let is_member = body.grants_access();
        debug!(external_id, group_id, is_member, "Membership API answered");
        Ok(is_member)
    }
}
