//! # Actix Middleware Library
//!
//! Shared middleware for helpdesk Actix services
//!
//! ## Modules
//! - `jwt_auth`: bearer token authentication, attaches `AuthenticatedUser`
//! - `roles`: role-based route guards
//! - `correlation_id`: request correlation ids
//! - `logging`: request/response logging

pub mod correlation_id;
pub mod jwt_auth;
pub mod logging;
pub mod roles;

pub use correlation_id::{get_correlation_id, CorrelationId, CorrelationIdMiddleware};
pub use jwt_auth::{AuthenticatedUser, Claims, JwtAuthMiddleware, JwtError, JwtValidator};
pub use logging::Logging;
pub use roles::{RequireRoles, Role};
