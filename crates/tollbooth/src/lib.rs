//! Tollbooth: an authenticating reverse-proxy gateway.
//!
//! The gateway fronts a fleet of internal backend services. Requests are
//! matched to a service by path prefix or virtual host, authenticated when
//! the service requires it, authorized against the caller's subscription
//! bindings, and forwarded upstream with identity headers attached. Access
//! rights are granted and revoked by payment-provider webhooks; a heartbeat
//! scheduler tracks every backend's liveness.

pub mod auth;
pub mod error;
pub mod handlers;
pub mod mail;
pub mod middleware;
pub mod models;
pub mod payment;
pub mod proxy;
pub mod router;
pub mod serializer;
pub mod store;

pub use error::ApiError;
pub use router::{build_router, AppState, ProxySettings};
