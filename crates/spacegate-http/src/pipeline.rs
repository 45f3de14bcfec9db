//! The ordered request admission pipeline.
//!
//! Every request passes through these steps, in order:
//!
//! 1. Security headers (and HSTS or an HTTPS redirect in production).
//! 2. CORS reflection; `OPTIONS` preflights end here with `204`.
//! 3. Rate limiting by client address.
//! 4. Referer/Origin presence policy.
//! 5. Credential verification.
//! 6. Local user resolution.
//! 7. Group membership check, cached.
//! 8. The resolved identity is attached to the request.
//!
//! Steps 1 to 4 run for every route ([`AdmissionPipeline::screen`] and
//! [`AdmissionPipeline::finalize`]); steps 5 to 7 only for routes that require
//! an authenticated member ([`AdmissionPipeline::authenticate`]).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use http::HeaderValue;
use spacegate_auth::{
    AUTH_TYPE_HEADER, AuthError, Protocol, SERVICE_TOKEN_HEADER, ServiceTokenGate,
    detect_protocol, verify_credential,
};
use spacegate_core::{AuthenticatedIdentity, Environment, GatewayConfig};
use tracing::{debug, error, info, warn};
use typed_builder::TypedBuilder;

use crate::body::GatewayBody;
use crate::cache::MembershipCache;
use crate::directory::UserDirectory;
use crate::error::Rejection;
use crate::membership::{DEFAULT_MEMBERSHIP_TIMEOUT, MembershipChecker};
use crate::policy::{
    OriginPolicy, RefererCheck, apply_hsts, apply_security_headers, client_address, header_str,
    https_redirect,
};
use crate::rate_limit::RateLimiter;

/// Header carrying the signed credential payload.
pub const INIT_DATA_HEADER: &str = "x-telegram-init-data";

/// How long a membership verdict stays cached.
pub const DEFAULT_MEMBERSHIP_TTL: Duration = Duration::from_secs(5 * 60);

/// Admission settings.
///
/// # Examples
///
/// ```
/// use spacegate_http::AdmissionConfig;
///
/// let config = AdmissionConfig::builder()
///     .bot_token("123456:bot-token")
///     .service_token("0123456789abcdef0123456789abcdef")
///     .required_group_id(-1_001_234_567_890)
///     .build();
/// assert_eq!(config.miniapp_max_age_secs, 3600);
/// ```
#[derive(Clone, TypedBuilder)]
pub struct AdmissionConfig {
    /// Shared secret for both credential protocols.
    #[builder(setter(into))]
    pub bot_token: String,

    /// Token accepted on service-to-service routes.
    #[builder(setter(into))]
    pub service_token: String,

    /// Required group; `0` means not configured.
    #[builder(default = 0)]
    pub required_group_id: i64,

    /// Failure policy for membership checks.
    #[builder(default)]
    pub environment: Environment,

    /// Origins allowed for CORS and the Referer/Origin check.
    #[builder(default)]
    pub allowed_origins: Vec<String>,

    /// Freshness window for Mini App credentials, in seconds.
    #[builder(default = 3600)]
    pub miniapp_max_age_secs: i64,

    /// Freshness window for Login Widget credentials, in seconds.
    #[builder(default = 604_800)]
    pub login_widget_max_age_secs: i64,

    /// Lifetime of a cached membership verdict.
    #[builder(default = DEFAULT_MEMBERSHIP_TTL)]
    pub membership_ttl: Duration,

    /// Deadline for one membership check.
    #[builder(default = DEFAULT_MEMBERSHIP_TIMEOUT)]
    pub membership_timeout: Duration,

    /// Whether to key the rate limiter on forwarding headers.
    #[builder(default = false)]
    pub trust_forwarded_for: bool,
}

impl std::fmt::Debug for AdmissionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionConfig")
            .field("bot_token", &"<redacted>")
            .field("service_token", &"<redacted>")
            .field("required_group_id", &self.required_group_id)
            .field("environment", &self.environment)
            .field("allowed_origins", &self.allowed_origins)
            .field("miniapp_max_age_secs", &self.miniapp_max_age_secs)
            .field("login_widget_max_age_secs", &self.login_widget_max_age_secs)
            .field("membership_ttl", &self.membership_ttl)
            .field("membership_timeout", &self.membership_timeout)
            .field("trust_forwarded_for", &self.trust_forwarded_for)
            .finish()
    }
}

impl AdmissionConfig {
    /// Derive admission settings from the gateway configuration.
    #[must_use]
    pub fn from_gateway(config: &GatewayConfig) -> Self {
        Self::builder()
            .bot_token(config.bot_token.clone())
            .service_token(config.service_token.clone())
            .required_group_id(config.required_group_id)
            .environment(config.environment)
            .allowed_origins(config.allowed_origins.clone())
            .miniapp_max_age_secs(config.miniapp_max_age_secs)
            .login_widget_max_age_secs(config.login_widget_max_age_secs)
            .trust_forwarded_for(config.trust_forwarded_for)
            .build()
    }

    /// The freshness window for `protocol`.
    #[must_use]
    pub fn max_age_for(&self, protocol: Protocol) -> i64 {
        match protocol {
            Protocol::MiniApp => self.miniapp_max_age_secs,
            Protocol::LoginWidget => self.login_widget_max_age_secs,
        }
    }
}

/// Outcome of the request-independent checks (steps 1 to 4).
#[derive(Debug)]
pub enum Screening {
    /// Continue to routing. Carries the rate-limit key.
    Proceed {
        /// Client address the request was attributed to.
        client: String,
    },
    /// A CORS preflight; answer `204` immediately.
    Preflight,
    /// A plain-HTTP request in production; redirect here.
    Redirect(HeaderValue),
    /// A terminal rejection.
    Reject(Rejection),
}

/// The admission pipeline and the shared state it owns.
pub struct AdmissionPipeline {
    config: AdmissionConfig,
    origins: OriginPolicy,
    service_gate: ServiceTokenGate,
    cache: Arc<MembershipCache>,
    limiter: Arc<RateLimiter>,
    membership: Arc<dyn MembershipChecker>,
    directory: Arc<dyn UserDirectory>,
}

impl std::fmt::Debug for AdmissionPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionPipeline")
            .field("config", &self.config)
            .field("origins", &self.origins)
            .field("cache", &self.cache)
            .field("limiter", &self.limiter)
            .finish_non_exhaustive()
    }
}

impl AdmissionPipeline {
    /// Assemble a pipeline from its settings and collaborators.
    #[must_use]
    pub fn new(
        config: AdmissionConfig,
        cache: Arc<MembershipCache>,
        limiter: Arc<RateLimiter>,
        membership: Arc<dyn MembershipChecker>,
        directory: Arc<dyn UserDirectory>,
    ) -> Self {
        let origins = OriginPolicy::new(config.allowed_origins.clone());
        let service_gate = ServiceTokenGate::new(config.service_token.clone());
        Self {
            config,
            origins,
            service_gate,
            cache,
            limiter,
            membership,
            directory,
        }
    }

    /// Admission settings.
    #[must_use]
    pub fn config(&self) -> &AdmissionConfig {
        &self.config
    }

    /// The membership verdict cache.
    #[must_use]
    pub fn cache(&self) -> &Arc<MembershipCache> {
        &self.cache
    }

    /// The rate limiter.
    #[must_use]
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// The local user directory.
    #[must_use]
    pub fn directory(&self) -> &Arc<dyn UserDirectory> {
        &self.directory
    }

    /// Run the transport, CORS, rate-limit, and Referer/Origin checks.
    #[must_use]
    pub fn screen(&self, parts: &http::request::Parts, peer: Option<SocketAddr>) -> Screening {
        let path = parts.uri.path();

        if let Some(location) = https_redirect(parts, self.config.environment) {
            debug!(path, "Redirecting plain HTTP request to HTTPS");
            return Screening::Redirect(location);
        }

        if parts.method == http::Method::OPTIONS {
            return Screening::Preflight;
        }

        let client = client_address(&parts.headers, peer, self.config.trust_forwarded_for);
        if !self.limiter.admit(&client) {
            warn!(client = %client, method = %parts.method, path, "Rate limit exceeded");
            return Screening::Reject(Rejection::RateLimitExceeded);
        }

        let origin = header_str(&parts.headers, "origin");
        let referer = header_str(&parts.headers, "referer");
        let user_agent = header_str(&parts.headers, "user-agent");
        if let Some(origin) = origin {
            if !self.origins.is_allowed(origin) {
                warn!(
                    client = %client,
                    path,
                    origin,
                    referer,
                    user_agent,
                    "Request from unknown origin"
                );
            }
        }

        match self.origins.check_referer(&parts.method, path, &parts.headers) {
            RefererCheck::Exempt | RefererCheck::Allowed => {}
            RefererCheck::Unattested => {
                warn!(client = %client, path, user_agent, "Request without Referer or Origin");
            }
            RefererCheck::OriginRejected(origin) => {
                error!(
                    client = %client,
                    path,
                    origin = %origin,
                    referer,
                    "Blocked request from disallowed origin"
                );
                return Screening::Reject(Rejection::OriginNotAllowed(origin));
            }
            RefererCheck::RefererRejected => {
                error!(client = %client, path, referer, "Blocked request with disallowed referer");
                return Screening::Reject(Rejection::RefererMismatch);
            }
        }

        Screening::Proceed { client }
    }

    /// Attach the security, HSTS, and CORS headers to an outgoing response.
    pub fn finalize(&self, request: &http::HeaderMap, response: &mut http::Response<GatewayBody>) {
        let is_redirect = response.status() == http::StatusCode::MOVED_PERMANENTLY;
        let headers = response.headers_mut();
        apply_security_headers(headers);
        if !is_redirect {
            apply_hsts(headers, self.config.environment);
        }
        self.origins.apply_cors(request, headers);
    }

    /// Check the static service token on a service-to-service request.
    ///
    /// # Errors
    ///
    /// Returns a rejection wrapping [`AuthError::ServiceTokenInvalid`].
    pub fn verify_service_token(
        &self,
        parts: &http::request::Parts,
        client: &str,
    ) -> Result<(), Rejection> {
        self.service_gate
            .verify(header_str(&parts.headers, SERVICE_TOKEN_HEADER))
            .map_err(|err| {
                warn!(client, path = parts.uri.path(), "Invalid service token");
                Rejection::from(err)
            })
    }

    /// Verify the request's credential, resolve the local user, and check
    /// group membership.
    ///
    /// # Errors
    ///
    /// Returns the first rejection encountered.
    pub async fn authenticate(
        &self,
        parts: &http::request::Parts,
        client: &str,
    ) -> Result<AuthenticatedIdentity, Rejection> {
        let path = parts.uri.path();
        let raw = header_str(&parts.headers, INIT_DATA_HEADER).ok_or(AuthError::MissingCredential)?;
        let protocol = Protocol::from_header(header_str(&parts.headers, AUTH_TYPE_HEADER))?;

        let external =
            verify_credential(raw, protocol, &self.config.bot_token, Some(self.config.max_age_for(protocol)))
                .map_err(|err| {
                    let detected = detect_protocol(raw).map_or("unknown", Protocol::as_str);
                    if err.is_signature_failure() {
                        warn!(client, path, declared = %protocol, detected, "Credential signature mismatch");
                    } else {
                        info!(client, path, declared = %protocol, detected, error = %err, "Credential rejected");
                    }
                    err
                })?;

        let user = self.directory.resolve_or_create(&external).await.map_err(|err| {
            error!(external_id = external.id(), error = %err, "Failed to resolve local user");
            Rejection::IdentityResolutionFailed
        })?;

        self.check_membership(external.id()).await?;

        debug!(user_id = user.id, external_id = external.id(), path, "Request authenticated");
        Ok(AuthenticatedIdentity { user, external })
    }

    /// Enforce the required-group policy for `external_id`.
    async fn check_membership(&self, external_id: i64) -> Result<(), Rejection> {
        let group_id = self.config.required_group_id;
        let production = self.config.environment.is_production();

        if group_id == 0 {
            if production {
                error!("Required group is not configured");
                return Err(Rejection::MembershipNotConfigured);
            }
            warn!("Required group is not configured, skipping membership check");
            return Ok(());
        }

        if let Some(is_member) = self.cache.get(external_id) {
            if is_member {
                return Ok(());
            }
            info!(external_id, "Denied access, not a group member (cached)");
            return Err(Rejection::NotAMember);
        }

        let outcome = tokio::time::timeout(
            self.config.membership_timeout,
            self.membership.is_member(external_id, group_id),
        )
        .await;

        let failure = match outcome {
            Ok(Ok(is_member)) => {
                self.cache.set(external_id, is_member, self.config.membership_ttl);
                if is_member {
                    info!(external_id, "Authorized group member");
                    return Ok(());
                }
                info!(external_id, "Denied access, not a group member");
                return Err(Rejection::NotAMember);
            }
            Ok(Err(err)) => err.to_string(),
            Err(_) => "membership check timed out".to_owned(),
        };

        error!(external_id, group_id, error = %failure, "Failed to check group membership");
        if production {
            return Err(Rejection::MembershipCheckFailed);
        }
        warn!(external_id, "Membership check failed in development mode, allowing access");
        Ok(())
    }
}
