//! Admission pipeline and HTTP service layer for spacegate.
//!
//! This crate decides, per request, whether it is admitted and as whom:
//!
//! - **Policies**: security headers, HTTPS enforcement, CORS, Referer/Origin
//! - **Rate limiter**: per-client sliding window with cooldown
//! - **Membership cache**: time-bounded group membership verdicts
//! - **Pipeline**: the ordered composition of the above with credential
//!   verification, user resolution, and membership checks
//! - **Service**: hyper `Service` in front of a [`GatewayHandler`]
//! - **Sweeps**: cancellable periodic cleanup tasks

pub mod body;
pub mod cache;
pub mod directory;
pub mod error;
pub mod membership;
pub mod pipeline;
pub mod policy;
pub mod rate_limit;
pub mod response;
pub mod service;
pub mod sweep;

pub use body::GatewayBody;
pub use cache::MembershipCache;
pub use directory::{DirectoryError, InMemoryUserDirectory, UserDirectory};
pub use error::Rejection;
pub use membership::{MembershipChecker, MembershipError, TelegramMembershipClient};
pub use pipeline::{AdmissionConfig, AdmissionPipeline, INIT_DATA_HEADER, Screening};
pub use rate_limit::RateLimiter;
pub use service::{Access, GatewayHandler, GatewayHttpService, HandlerFuture};
pub use sweep::PeriodicSweep;
