//! Gateway HTTP service implementing the hyper `Service` trait.

use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::BodyExt;
use hyper::body::Incoming;
use tracing::debug;

use crate::body::GatewayBody;
use crate::error::Rejection;
use crate::pipeline::{AdmissionPipeline, Screening};
use crate::response::{empty_response, redirect_response, rejection_to_response};

/// Boxed future returned by [`GatewayHandler::handle`].
pub type HandlerFuture =
    Pin<Box<dyn Future<Output = Result<http::Response<GatewayBody>, Rejection>> + Send>>;

/// What a route requires before its handler runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// No credential.
    Public,
    /// The static service token.
    Service,
    /// A verified credential from a group member.
    Member,
}

/// Trait that the downstream route provider must implement.
///
/// The handler declares each route's [`Access`] and produces the response.
/// For [`Access::Member`] routes the request extensions carry the
/// [`AuthenticatedIdentity`](spacegate_core::AuthenticatedIdentity).
pub trait GatewayHandler: Send + Sync + 'static {
    /// Access requirement for a route.
    fn access(&self, method: &http::Method, path: &str) -> Access;

    /// Handle an admitted request.
    fn handle(&self, parts: http::request::Parts, body: Bytes) -> HandlerFuture;
}

/// Hyper `Service` running the admission pipeline in front of a
/// [`GatewayHandler`].
pub struct GatewayHttpService<H: GatewayHandler> {
    pipeline: Arc<AdmissionPipeline>,
    handler: Arc<H>,
    peer: Option<SocketAddr>,
}

impl<H: GatewayHandler> fmt::Debug for GatewayHttpService<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayHttpService")
            .field("pipeline", &self.pipeline)
            .field("peer", &self.peer)
            .finish_non_exhaustive()
    }
}

impl<H: GatewayHandler> GatewayHttpService<H> {
    /// Create a new `GatewayHttpService`.
    pub fn new(pipeline: Arc<AdmissionPipeline>, handler: Arc<H>) -> Self {
        Self {
            pipeline,
            handler,
            peer: None,
        }
    }

    /// A copy bound to one connection's peer address.
    #[must_use]
    pub fn with_peer(&self, peer: SocketAddr) -> Self {
        Self {
            pipeline: Arc::clone(&self.pipeline),
            handler: Arc::clone(&self.handler),
            peer: Some(peer),
        }
    }

    /// Run one request through the pipeline and the handler.
    pub async fn process<B>(&self, req: http::Request<B>) -> http::Response<GatewayBody>
    where
        B: http_body::Body<Data = Bytes> + Send,
        B::Error: fmt::Display,
    {
        let request_id = uuid::Uuid::new_v4().to_string();
        let request_headers = req.headers().clone();
        let mut response = process_request(req, &self.pipeline, self.handler.as_ref(), self.peer).await;
        self.pipeline.finalize(&request_headers, &mut response);
        add_common_headers(response, &request_id)
    }
}

impl<H: GatewayHandler> Clone for GatewayHttpService<H> {
    fn clone(&self) -> Self {
        Self {
            pipeline: Arc::clone(&self.pipeline),
            handler: Arc::clone(&self.handler),
            peer: self.peer,
        }
    }
}

impl<H: GatewayHandler> hyper::service::Service<http::Request<Incoming>> for GatewayHttpService<H> {
    type Response = http::Response<GatewayBody>;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn call(&self, req: http::Request<Incoming>) -> Self::Future {
        let service = self.clone();
        Box::pin(async move { Ok(service.process(req).await) })
    }
}

/// Process a single request through the full pipeline.
async fn process_request<B, H>(
    req: http::Request<B>,
    pipeline: &AdmissionPipeline,
    handler: &H,
    peer: Option<SocketAddr>,
) -> http::Response<GatewayBody>
where
    B: http_body::Body<Data = Bytes> + Send,
    B::Error: fmt::Display,
    H: GatewayHandler,
{
    let (mut parts, incoming) = req.into_parts();

    // 1-4. Transport, CORS preflight, rate limit, Referer/Origin.
    let client = match pipeline.screen(&parts, peer) {
        Screening::Proceed { client } => client,
        Screening::Preflight => return empty_response(http::StatusCode::NO_CONTENT),
        Screening::Redirect(location) => return redirect_response(&location),
        Screening::Reject(rejection) => return rejection_to_response(&rejection),
    };

    // 5-8. Route access requirement.
    match handler.access(&parts.method, parts.uri.path()) {
        Access::Public => {}
        Access::Service => {
            if let Err(rejection) = pipeline.verify_service_token(&parts, &client) {
                return rejection_to_response(&rejection);
            }
        }
        Access::Member => match pipeline.authenticate(&parts, &client).await {
            Ok(identity) => {
                parts.extensions.insert(identity);
            }
            Err(rejection) => return rejection_to_response(&rejection),
        },
    }

    let body = match collect_body(incoming).await {
        Ok(body) => body,
        Err(rejection) => return rejection_to_response(&rejection),
    };

    debug!(client = %client, method = %parts.method, path = parts.uri.path(), "Dispatching request");
    match handler.handle(parts, body).await {
        Ok(response) => response,
        Err(rejection) => rejection_to_response(&rejection),
    }
}

/// Collect the incoming body into a single `Bytes` buffer.
async fn collect_body<B>(incoming: B) -> Result<Bytes, Rejection>
where
    B: http_body::Body<Data = Bytes> + Send,
    B::Error: fmt::Display,
{
    incoming
        .collect()
        .await
        .map(http_body_util::Collected::to_bytes)
        .map_err(|e| Rejection::BadRequest(format!("Failed to read request body: {e}")))
}

/// Add common response headers to every gateway response.
fn add_common_headers(
    mut response: http::Response<GatewayBody>,
    request_id: &str,
) -> http::Response<GatewayBody> {
    let headers = response.headers_mut();

    if let Ok(hv) = http::HeaderValue::from_str(request_id) {
        headers.entry("x-request-id").or_insert(hv);
    }
    headers.insert("server", http::HeaderValue::from_static("spacegate"));

    response
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use http_body_util::Full;
    use spacegate_auth::{Protocol, sign_fields};
    use spacegate_core::{AuthenticatedIdentity, Environment};

    use super::*;
    use crate::cache::MembershipCache;
    use crate::directory::InMemoryUserDirectory;
    use crate::membership::{MembershipChecker, MembershipError};
    use crate::pipeline::AdmissionConfig;
    use crate::rate_limit::RateLimiter;
    use crate::response::json_response;

    const TOKEN: &str = "7012345678:AAExampleBotTokenForTests";
    const SERVICE_TOKEN: &str = "0123456789abcdef0123456789abcdef";

    struct AlwaysMember;

    #[async_trait::async_trait]
    impl MembershipChecker for AlwaysMember {
        async fn is_member(&self, _external_id: i64, _group_id: i64) -> Result<bool, MembershipError> {
            Ok(true)
        }
    }

    /// Echoes the attached identity on `/me`, a fixed body elsewhere.
    struct EchoHandler;

    impl GatewayHandler for EchoHandler {
        fn access(&self, _method: &http::Method, path: &str) -> Access {
            match path {
                "/me" => Access::Member,
                "/bot" => Access::Service,
                _ => Access::Public,
            }
        }

        fn handle(&self, parts: http::request::Parts, body: Bytes) -> HandlerFuture {
            Box::pin(async move {
                match parts.extensions.get::<AuthenticatedIdentity>() {
                    Some(identity) => json_response(http::StatusCode::OK, identity),
                    None => json_response(
                        http::StatusCode::OK,
                        &serde_json::json!({ "echo": String::from_utf8_lossy(&body) }),
                    ),
                }
            })
        }
    }

    fn service() -> GatewayHttpService<EchoHandler> {
        let config = AdmissionConfig::builder()
            .bot_token(TOKEN)
            .service_token(SERVICE_TOKEN)
            .required_group_id(-100)
            .environment(Environment::Production)
            .build();
        let pipeline = AdmissionPipeline::new(
            config,
            Arc::new(MembershipCache::new()),
            Arc::new(RateLimiter::new(100, Duration::from_secs(60))),
            Arc::new(AlwaysMember),
            Arc::new(InMemoryUserDirectory::new()),
        );
        GatewayHttpService::new(Arc::new(pipeline), Arc::new(EchoHandler))
            .with_peer("192.0.2.1:40000".parse().unwrap())
    }

    fn request(method: http::Method, uri: &str, headers: &[(&str, &str)], body: &str) -> http::Request<Full<Bytes>> {
        let mut builder = http::Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(Full::new(Bytes::from(body.to_owned()))).unwrap()
    }

    async fn body_json(response: http::Response<GatewayBody>) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_should_serve_public_route_with_common_headers() {
        let resp = service()
            .process(request(http::Method::POST, "/open", &[], "hello"))
            .await;
        assert_eq!(resp.status(), http::StatusCode::OK);
        assert_eq!(resp.headers().get("server").unwrap(), "spacegate");
        assert!(resp.headers().get("x-request-id").is_some());
        assert_eq!(resp.headers().get("x-content-type-options").unwrap(), "nosniff");
        assert_eq!(body_json(resp).await["echo"], "hello");
    }

    #[tokio::test]
    async fn test_should_answer_preflight_with_no_content() {
        let resp = service()
            .process(request(http::Method::OPTIONS, "/me", &[], ""))
            .await;
        assert_eq!(resp.status(), http::StatusCode::NO_CONTENT);
        assert!(resp.headers().get("access-control-allow-methods").is_some());
        assert_eq!(resp.headers().get("x-frame-options").unwrap(), "DENY");
    }

    #[tokio::test]
    async fn test_should_attach_identity_on_member_route() {
        let now = chrono::Utc::now().timestamp().to_string();
        let raw = sign_fields(
            Protocol::MiniApp,
            TOKEN,
            &[("user", r#"{"id":42,"username":"ada"}"#), ("auth_date", &now)],
        );
        let resp = service()
            .process(request(http::Method::GET, "/me", &[("x-telegram-init-data", &raw)], ""))
            .await;
        assert_eq!(resp.status(), http::StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["external"]["id"], 42);
        assert_eq!(json["user"]["username"], "ada");
    }

    #[tokio::test]
    async fn test_should_render_rejection_as_json() {
        let resp = service()
            .process(request(http::Method::GET, "/me", &[], ""))
            .await;
        assert_eq!(resp.status(), http::StatusCode::UNAUTHORIZED);
        assert_eq!(resp.headers().get("content-type").unwrap(), "application/json");
        let json = body_json(resp).await;
        assert_eq!(json["error"], "missing_credential");
    }

    #[tokio::test]
    async fn test_should_gate_service_route() {
        let svc = service();
        let denied = svc.process(request(http::Method::POST, "/bot", &[], "")).await;
        assert_eq!(denied.status(), http::StatusCode::UNAUTHORIZED);

        let allowed = svc
            .process(request(http::Method::POST, "/bot", &[("x-bot-token", SERVICE_TOKEN)], "ping"))
            .await;
        assert_eq!(allowed.status(), http::StatusCode::OK);
    }

    #[tokio::test]
    async fn test_should_redirect_and_skip_hsts() {
        let resp = service()
            .process(request(
                http::Method::GET,
                "/open",
                &[("host", "space.example.com"), ("x-forwarded-proto", "http")],
                "",
            ))
            .await;
        assert_eq!(resp.status(), http::StatusCode::MOVED_PERMANENTLY);
        assert_eq!(resp.headers().get("location").unwrap(), "https://space.example.com/open");
        assert!(resp.headers().get("strict-transport-security").is_none());
    }
}
