pub mod faq_learning;
pub mod health;
pub mod review;

use actix_middleware::{JwtAuthMiddleware, JwtValidator, Role};
use actix_web::web;
use std::sync::Arc;

pub(crate) const ADMIN: &[Role] = &[Role::Admin];
pub(crate) const MANAGERS: &[Role] = &[Role::Admin, Role::SupportManager];
pub(crate) const STAFF: &[Role] = &[Role::Admin, Role::SupportManager, Role::SupportAgent];

/// Health and metrics stay public; everything else requires a bearer token
pub fn configure(cfg: &mut web::ServiceConfig, validator: Arc<JwtValidator>) {
    health::configure(cfg);
    cfg.service(faq_learning::scope().wrap(JwtAuthMiddleware::new(validator.clone())))
        .service(review::scope().wrap(JwtAuthMiddleware::new(validator)));
}
