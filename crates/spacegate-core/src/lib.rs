//! Core types, environment policy, and configuration for spacegate.
//!
//! This crate provides the building blocks shared by the credential verifier,
//! the admission pipeline, and the server binary: the identity types that flow
//! through a request, the [`Environment`] policy switch, and the
//! environment-driven [`GatewayConfig`].

mod config;
mod error;
mod types;

pub use config::GatewayConfig;
pub use error::{SpaceGateError, SpaceGateResult};
pub use types::{AuthenticatedIdentity, Environment, ExternalIdentity, LocalUser};
