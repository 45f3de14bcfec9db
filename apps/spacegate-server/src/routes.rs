//! Route table and downstream handlers.
//!
//! | Route | Access |
//! |-------|--------|
//! | `GET /health` | public |
//! | `GET /api/public/*` | public |
//! | `* /api/bot/*` | service token |
//! | `GET /api/users/me` | member |
//! | `POST /api/users/me/sync-telegram` | member |
//!
//! Everything else under `/api` requires a member and answers `404`.

use std::sync::Arc;

use bytes::Bytes;
use http::{Method, StatusCode};
use spacegate_core::AuthenticatedIdentity;
use spacegate_http::response::json_response;
use spacegate_http::{Access, GatewayHandler, HandlerFuture, Rejection, UserDirectory};
use tracing::info;

const HEALTH_PATH: &str = "/health";
const PUBLIC_PREFIX: &str = "/api/public";
const BOT_PREFIX: &str = "/api/bot";
const ME_PATH: &str = "/api/users/me";
const SYNC_PATH: &str = "/api/users/me/sync-telegram";

/// Resolved route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Health,
    Public,
    Bot,
    Me,
    SyncTelegram,
    NotFound,
}

fn resolve(method: &Method, path: &str) -> Route {
    match (method, path) {
        (&Method::GET, HEALTH_PATH) => Route::Health,
        (&Method::GET, p) if is_under(p, PUBLIC_PREFIX) => Route::Public,
        (_, p) if is_under(p, BOT_PREFIX) => Route::Bot,
        (&Method::GET, ME_PATH) => Route::Me,
        (&Method::POST, SYNC_PATH) => Route::SyncTelegram,
        _ => Route::NotFound,
    }
}

/// `path` equals `prefix` or continues it with a `/`.
fn is_under(path: &str, prefix: &str) -> bool {
    path.strip_prefix(prefix)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

/// The gateway's downstream handlers.
pub struct SpaceRoutes {
    directory: Arc<dyn UserDirectory>,
}

impl std::fmt::Debug for SpaceRoutes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpaceRoutes").finish_non_exhaustive()
    }
}

impl SpaceRoutes {
    /// Create the route table over the local user directory.
    pub fn new(directory: Arc<dyn UserDirectory>) -> Self {
        Self { directory }
    }
}

impl GatewayHandler for SpaceRoutes {
    fn access(&self, method: &Method, path: &str) -> Access {
        match resolve(method, path) {
            Route::Health | Route::Public => Access::Public,
            Route::Bot => Access::Service,
            Route::Me | Route::SyncTelegram => Access::Member,
            // Unknown API paths are not disclosed to anonymous callers.
            Route::NotFound if is_under(path, "/api") => Access::Member,
            Route::NotFound => Access::Public,
        }
    }

    fn handle(&self, parts: http::request::Parts, body: Bytes) -> HandlerFuture {
        let directory = Arc::clone(&self.directory);
        Box::pin(async move {
            match resolve(&parts.method, parts.uri.path()) {
                Route::Health => health(),
                Route::Public => public(&parts),
                Route::Bot => bot(&parts, &body),
                Route::Me => me(&parts),
                Route::SyncTelegram => sync_telegram(&parts, directory.as_ref()).await,
                Route::NotFound => Err(Rejection::NotFound {
                    method: parts.method.to_string(),
                    path: parts.uri.path().to_owned(),
                }),
            }
        })
    }
}

type RouteResult = Result<http::Response<spacegate_http::GatewayBody>, Rejection>;

fn identity(parts: &http::request::Parts) -> Result<&AuthenticatedIdentity, Rejection> {
    parts
        .extensions
        .get::<AuthenticatedIdentity>()
        .ok_or_else(|| Rejection::Internal("request reached a member route unauthenticated".to_owned()))
}

fn health() -> RouteResult {
    json_response(
        StatusCode::OK,
        &serde_json::json!({ "status": "ok", "service": "spacegate" }),
    )
}

fn public(parts: &http::request::Parts) -> RouteResult {
    json_response(
        StatusCode::OK,
        &serde_json::json!({ "public": true, "path": parts.uri.path() }),
    )
}

fn bot(parts: &http::request::Parts, body: &Bytes) -> RouteResult {
    let payload: serde_json::Value = if body.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(body)
            .map_err(|e| Rejection::BadRequest(format!("invalid JSON body: {e}")))?
    };
    info!(path = parts.uri.path(), "Accepted service request");
    json_response(
        StatusCode::ACCEPTED,
        &serde_json::json!({ "status": "accepted", "path": parts.uri.path(), "payload": payload }),
    )
}

fn me(parts: &http::request::Parts) -> RouteResult {
    json_response(StatusCode::OK, identity(parts)?)
}

async fn sync_telegram(parts: &http::request::Parts, directory: &dyn UserDirectory) -> RouteResult {
    let identity = identity(parts)?;
    let updated = directory
        .sync_profile(&identity.external)
        .await
        .map_err(|e| Rejection::Internal(e.to_string()))?;

    if updated.id != identity.user_id() {
        return Err(Rejection::BadRequest("cannot sync different user's data".to_owned()));
    }
    json_response(StatusCode::OK, &updated)
}

#[cfg(test)]
mod tests {
    use http_body_util::BodyExt;
    use spacegate_core::{ExternalIdentity, LocalUser};
    use spacegate_http::InMemoryUserDirectory;

    use super::*;

    fn routes() -> (SpaceRoutes, Arc<InMemoryUserDirectory>) {
        let directory = Arc::new(InMemoryUserDirectory::new());
        (SpaceRoutes::new(directory.clone()), directory)
    }

    fn parts(method: Method, uri: &str) -> http::request::Parts {
        http::Request::builder()
            .method(method)
            .uri(uri)
            .body(())
            .unwrap()
            .into_parts()
            .0
    }

    fn body_json(response: http::Response<spacegate_http::GatewayBody>) -> serde_json::Value {
        let bytes = tokio_test::block_on(response.into_body().collect())
            .unwrap()
            .to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_should_resolve_routes() {
        assert_eq!(resolve(&Method::GET, "/health"), Route::Health);
        assert_eq!(resolve(&Method::GET, "/api/public/rooms"), Route::Public);
        assert_eq!(resolve(&Method::GET, "/api/publicity"), Route::NotFound);
        assert_eq!(resolve(&Method::POST, "/api/bot/notify"), Route::Bot);
        assert_eq!(resolve(&Method::GET, "/api/users/me"), Route::Me);
        assert_eq!(resolve(&Method::POST, "/api/users/me/sync-telegram"), Route::SyncTelegram);
        assert_eq!(resolve(&Method::GET, "/api/users/me/sync-telegram"), Route::NotFound);
    }

    #[test]
    fn test_should_declare_access_levels() {
        let (routes, _) = routes();
        assert_eq!(routes.access(&Method::GET, "/health"), Access::Public);
        assert_eq!(routes.access(&Method::GET, "/api/public/rooms"), Access::Public);
        assert_eq!(routes.access(&Method::POST, "/api/bot/notify"), Access::Service);
        assert_eq!(routes.access(&Method::GET, "/api/users/me"), Access::Member);
        assert_eq!(routes.access(&Method::GET, "/api/bookings"), Access::Member);
        assert_eq!(routes.access(&Method::GET, "/favicon.ico"), Access::Public);
    }

    #[test]
    fn test_should_report_health() {
        let (routes, _) = routes();
        let resp = tokio_test::block_on(routes.handle(parts(Method::GET, "/health"), Bytes::new())).unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp)["status"], "ok");
    }

    #[test]
    fn test_should_reject_invalid_bot_payload() {
        let (routes, _) = routes();
        let result = tokio_test::block_on(
            routes.handle(parts(Method::POST, "/api/bot/notify"), Bytes::from_static(b"{oops")),
        );
        assert!(matches!(result, Err(Rejection::BadRequest(_))));
    }

    #[test]
    fn test_should_answer_not_found() {
        let (routes, _) = routes();
        let result = tokio_test::block_on(routes.handle(parts(Method::GET, "/api/nowhere"), Bytes::new()));
        assert!(matches!(result, Err(Rejection::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_should_sync_profile_from_credential() {
        let (routes, directory) = routes();
        let stale = ExternalIdentity::new(42).unwrap().with_username(Some("ada".to_owned()));
        let user = directory.resolve_or_create(&stale).await.unwrap();

        let fresh = ExternalIdentity::new(42).unwrap().with_username(Some("countess".to_owned()));
        let mut req = parts(Method::POST, SYNC_PATH);
        req.extensions.insert(AuthenticatedIdentity {
            user,
            external: fresh,
        });

        let resp = routes.handle(req, Bytes::new()).await.unwrap();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["username"], "countess");
        assert_eq!(directory.get(42).unwrap().username, "countess");
    }

    #[tokio::test]
    async fn test_should_refuse_to_sync_another_user() {
        let (routes, directory) = routes();
        let other = directory
            .resolve_or_create(&ExternalIdentity::new(43).unwrap())
            .await
            .unwrap();
        let impostor = LocalUser { id: other.id + 100, ..other };

        let mut req = parts(Method::POST, SYNC_PATH);
        req.extensions.insert(AuthenticatedIdentity {
            user: impostor,
            external: ExternalIdentity::new(43).unwrap(),
        });

        let result = routes.handle(req, Bytes::new()).await;
        assert!(matches!(result, Err(Rejection::BadRequest(_))));
    }
}
