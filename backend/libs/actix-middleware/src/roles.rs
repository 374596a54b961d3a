//! Role-based route guards
//!
//! `RequireRoles` must sit inside `JwtAuthMiddleware` so the authenticated
//! principal is already present in the request extensions.
//!
//! ```rust,ignore
//! web::scope("/faq-learning")
//!     .service(
//!         web::resource("/start")
//!             .wrap(RequireRoles::any(&[Role::Admin, Role::SupportManager]))
//!             .route(web::post().to(start)),
//!     )
//!     .wrap(JwtAuthMiddleware::new(validator))
//! ```

use crate::jwt_auth::AuthenticatedUser;
use actix_web::{
    body::EitherBody,
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error, HttpMessage, HttpResponse,
};
use futures::future::{ready, LocalBoxFuture, Ready};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    SupportManager,
    SupportAgent,
    Customer,
    Editor,
    Viewer,
}

impl Role {
    /// Accepts `support_manager`, `support-manager` and `Support Manager`
    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim().to_lowercase().replace([' ', '-'], "_");
        match normalized.as_str() {
            "admin" => Some(Role::Admin),
            "support_manager" => Some(Role::SupportManager),
            "support_agent" => Some(Role::SupportAgent),
            "customer" => Some(Role::Customer),
            "editor" => Some(Role::Editor),
            "viewer" => Some(Role::Viewer),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::SupportManager => "support_manager",
            Role::SupportAgent => "support_agent",
            Role::Customer => "customer",
            Role::Editor => "editor",
            Role::Viewer => "viewer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lets a request through only if the principal holds at least one of the roles
#[derive(Clone)]
pub struct RequireRoles {
    required: Rc<Vec<Role>>,
}

impl RequireRoles {
    pub fn any(roles: &[Role]) -> Self {
        Self {
            required: Rc::new(roles.to_vec()),
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for RequireRoles
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Transform = RequireRolesService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RequireRolesService {
            service: Rc::new(service),
            required: self.required.clone(),
        }))
    }
}

pub struct RequireRolesService<S> {
    service: Rc<S>,
    required: Rc<Vec<Role>>,
}

impl<S, B> Service<ServiceRequest> for RequireRolesService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let required = self.required.clone();

        Box::pin(async move {
            let verdict = req
                .extensions()
                .get::<AuthenticatedUser>()
                .map(|user| (user.id, user.has_any_role(&required)));

            match verdict {
                None => {
                    let res = HttpResponse::Unauthorized().json(serde_json::json!({
                        "statusCode": 401,
                        "error": "Unauthorized",
                        "message": "User not authenticated",
                    }));
                    Ok(req.into_response(res).map_into_right_body())
                }
                Some((user_id, false)) => {
                    tracing::warn!(
                        user_id = %user_id,
                        path = %req.path(),
                        "Access denied: missing required role"
                    );
                    let required: Vec<&str> = required.iter().map(Role::as_str).collect();
                    let res = HttpResponse::Forbidden().json(serde_json::json!({
                        "statusCode": 403,
                        "error": "Forbidden",
                        "message": format!("Requires one of roles: {}", required.join(", ")),
                    }));
                    Ok(req.into_response(res).map_into_right_body())
                }
                Some((_, true)) => service.call(req).await.map(ServiceResponse::map_into_left_body),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_accepts_display_names() {
        assert_eq!(Role::parse("Support Manager"), Some(Role::SupportManager));
        assert_eq!(Role::parse("support-agent"), Some(Role::SupportAgent));
        assert_eq!(Role::parse(" ADMIN "), Some(Role::Admin));
        assert_eq!(Role::parse("root"), None);
    }

    #[test]
    fn test_parse_round_trips_as_str() {
        for role in [
            Role::Admin,
            Role::SupportManager,
            Role::SupportAgent,
            Role::Customer,
            Role::Editor,
            Role::Viewer,
        ] {
            assert_eq!(Role::parse(role.as_str()), Some(role));
        }
    }
}
