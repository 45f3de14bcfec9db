//! Signed identity credential verification for spacegate.
//!
//! This crate verifies the two signed-payload formats issued by the
//! messaging platform and extracts the claimed [`ExternalIdentity`]:
//!
//! - **Mini App** payloads carry a JSON `user` field and are keyed by
//!   `HMAC-SHA256("WebAppData", token)`.
//! - **Login Widget** payloads carry top-level identity fields and are keyed by
//!   `SHA-256(token)`.
//!
//! Both sign the same data-check-string and both carry an `auth_date`
//! timestamp checked against a freshness window. It also provides the static
//! [`ServiceTokenGate`] used by service-to-service endpoints.
//!
//! # Usage
//!
//! ```rust
//! use spacegate_auth::{Protocol, sign_fields, verify_credential_at};
//!
//! let token = "123456:bot-token";
//! let raw = sign_fields(
//!     Protocol::MiniApp,
//!     token,
//!     &[("user", r#"{"id":7,"first_name":"Ada"}"#), ("auth_date", "1700000000")],
//! );
//!
//! let identity = verify_credential_at(&raw, Protocol::MiniApp, token, Some(3600), 1_700_000_100)
//!     .unwrap();
//! assert_eq!(identity.id(), 7);
//! ```
//!
//! # Modules
//!
//! - [`canonical`] - Payload decoding and data-check-string construction
//! - [`error`] - Authentication error types
//! - [`freshness`] - `auth_date` parsing and window checks
//! - [`protocol`] - Protocol tags, descriptors, and the shape detector
//! - [`service_token`] - Static service token gate
//! - [`verify`] - The verification routine

pub mod canonical;
pub mod error;
pub mod freshness;
pub mod protocol;
pub mod service_token;
pub mod verify;

pub use error::AuthError;
pub use protocol::{AUTH_TYPE_HEADER, Protocol, ProtocolDescriptor, detect_protocol};
pub use service_token::{SERVICE_TOKEN_HEADER, ServiceTokenGate};
pub use spacegate_core::ExternalIdentity;
pub use verify::{compute_hash, sign_fields, verify_credential, verify_credential_at};
