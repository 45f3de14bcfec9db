//! Response construction and error formatting.

use http::StatusCode;
use serde::Serialize;

use crate::body::GatewayBody;
use crate::error::Rejection;

/// Content type for JSON responses.
pub const CONTENT_TYPE: &str = "application/json";

/// Serialize a rejection into its JSON body.
///
/// ```json
/// {
///   "error": "invalid_signature",
///   "message": "The credential signature does not match"
/// }
/// ```
#[must_use]
pub fn rejection_to_json(rejection: &Rejection) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "error": rejection.kind(),
        "message": rejection.to_string(),
    }))
    .expect("JSON serialization of error cannot fail")
}

/// Convert a rejection into a complete HTTP error response.
#[must_use]
pub fn rejection_to_response(rejection: &Rejection) -> http::Response<GatewayBody> {
    http::Response::builder()
        .status(rejection.status_code())
        .header(http::header::CONTENT_TYPE, CONTENT_TYPE)
        .body(GatewayBody::from_bytes(rejection_to_json(rejection)))
        .expect("valid error response")
}

/// Build a JSON response with the given status.
///
/// # Errors
///
/// Returns [`Rejection::Internal`] if `value` cannot be serialized.
pub fn json_response<T: Serialize>(
    status: StatusCode,
    value: &T,
) -> Result<http::Response<GatewayBody>, Rejection> {
    let json = serde_json::to_vec(value)
        .map_err(|e| Rejection::Internal(format!("failed to serialize response: {e}")))?;
    Ok(http::Response::builder()
        .status(status)
        .header(http::header::CONTENT_TYPE, CONTENT_TYPE)
        .body(GatewayBody::from_bytes(json))
        .expect("valid JSON response"))
}

/// Build a bodiless response.
#[must_use]
pub fn empty_response(status: StatusCode) -> http::Response<GatewayBody> {
    http::Response::builder()
        .status(status)
        .body(GatewayBody::empty())
        .expect("valid empty response")
}

/// Build a `301 Moved Permanently` response.
#[must_use]
pub fn redirect_response(location: &http::HeaderValue) -> http::Response<GatewayBody> {
    http::Response::builder()
        .status(StatusCode::MOVED_PERMANENTLY)
        .header(http::header::LOCATION, location)
        .body(GatewayBody::empty())
        .expect("valid redirect response")
}
