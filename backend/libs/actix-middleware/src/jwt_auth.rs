use crate::roles::Role;
use actix_web::{
    body::EitherBody,
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error, HttpMessage, HttpResponse,
};
use futures::future::{ready, LocalBoxFuture, Ready};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::rc::Rc;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum JwtError {
    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("invalid token: malformed subject")]
    MalformedSubject,
}

/// Access token claims issued by the identity provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default)]
    pub roles: Vec<String>,
    pub iat: i64,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Principal attached to the request once the bearer token checks out
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub id: Uuid,
    pub roles: Vec<Role>,
}

impl AuthenticatedUser {
    pub fn has_any_role(&self, required: &[Role]) -> bool {
        self.roles.iter().any(|r| required.contains(r))
    }
}

/// Verifies bearer tokens against either a shared secret or an RSA public key
pub struct JwtValidator {
    key: DecodingKey,
    validation: Validation,
}

impl JwtValidator {
    pub fn hs256(secret: &[u8]) -> Self {
        Self {
            key: DecodingKey::from_secret(secret),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    pub fn rs256_pem(public_key_pem: &[u8]) -> Result<Self, JwtError> {
        let key = DecodingKey::from_rsa_pem(public_key_pem)
            .map_err(|e| JwtError::InvalidKey(e.to_string()))?;
        Ok(Self {
            key,
            validation: Validation::new(Algorithm::RS256),
        })
    }

    pub fn validate(&self, token: &str) -> Result<AuthenticatedUser, JwtError> {
        let data = decode::<Claims>(token, &self.key, &self.validation)
            .map_err(|e| JwtError::InvalidToken(e.to_string()))?;

        let id = Uuid::parse_str(&data.claims.sub).map_err(|_| JwtError::MalformedSubject)?;
        let roles = data
            .claims
            .roles
            .iter()
            .filter_map(|r| Role::parse(r))
            .collect();

        Ok(AuthenticatedUser { id, roles })
    }
}

fn unauthorized(message: &str) -> HttpResponse {
    HttpResponse::Unauthorized().json(serde_json::json!({
        "statusCode": 401,
        "error": "Unauthorized",
        "message": message,
    }))
}

/// JWT Authentication Middleware
#[derive(Clone)]
pub struct JwtAuthMiddleware {
    validator: Arc<JwtValidator>,
}

impl JwtAuthMiddleware {
    pub fn new(validator: Arc<JwtValidator>) -> Self {
        Self { validator }
    }
}

impl<S, B> Transform<S, ServiceRequest> for JwtAuthMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Transform = JwtAuthMiddlewareService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(JwtAuthMiddlewareService {
            service: Rc::new(service),
            validator: self.validator.clone(),
        }))
    }
}

pub struct JwtAuthMiddlewareService<S> {
    service: Rc<S>,
    validator: Arc<JwtValidator>,
}

impl<S, B> Service<ServiceRequest> for JwtAuthMiddlewareService<S>
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
        let validator = self.validator.clone();

        Box::pin(async move {
            let token = match req
                .headers()
                .get("Authorization")
                .and_then(|h| h.to_str().ok())
            {
                None => {
                    let res = unauthorized("Missing Authorization header");
                    return Ok(req.into_response(res).map_into_right_body());
                }
                Some(header) => match header.strip_prefix("Bearer ") {
                    Some(token) => token.to_string(),
                    None => {
                        let res = unauthorized("Invalid Authorization header format");
                        return Ok(req.into_response(res).map_into_right_body());
                    }
                },
            };

            let user = match validator.validate(&token) {
                Ok(user) => user,
                Err(e) => {
                    tracing::warn!(error = %e, "JWT validation failed");
                    let res = unauthorized(&e.to_string());
                    return Ok(req.into_response(res).map_into_right_body());
                }
            };

            req.extensions_mut().insert(user);

            service.call(req).await.map(ServiceResponse::map_into_left_body)
        })
    }
}

impl actix_web::FromRequest for AuthenticatedUser {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(
        req: &actix_web::HttpRequest,
        _payload: &mut actix_web::dev::Payload,
    ) -> Self::Future {
        match req.extensions().get::<AuthenticatedUser>() {
            Some(user) => ready(Ok(user.clone())),
            None => ready(Err(actix_web::error::ErrorUnauthorized(
                "User not authenticated",
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &[u8] = b"unit-test-secret-at-least-32-bytes!!";

    fn token(sub: &str, roles: &[&str], exp_offset: i64) -> String {
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            sub: sub.to_string(),
            roles: roles.iter().map(|r| r.to_string()).collect(),
            iat: now,
            exp: now + exp_offset,
            email: None,
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET)).unwrap()
    }

    #[test]
    fn test_validate_extracts_known_roles() {
        let id = Uuid::new_v4();
        let validator = JwtValidator::hs256(SECRET);
        let user = validator
            .validate(&token(&id.to_string(), &["admin", "Support Agent", "pirate"], 600))
            .unwrap();

        assert_eq!(user.id, id);
        assert_eq!(user.roles, vec![Role::Admin, Role::SupportAgent]);
    }

    #[test]
    fn test_validate_rejects_expired_token() {
        let validator = JwtValidator::hs256(SECRET);
        let result = validator.validate(&token(&Uuid::new_v4().to_string(), &["admin"], -600));
        assert!(matches!(result, Err(JwtError::InvalidToken(_))));
    }

    #[test]
    fn test_validate_rejects_non_uuid_subject() {
        let validator = JwtValidator::hs256(SECRET);
        let result = validator.validate(&token("user-42", &["admin"], 600));
        assert!(matches!(result, Err(JwtError::MalformedSubject)));
    }

    #[test]
    fn test_validate_rejects_wrong_secret() {
        let validator = JwtValidator::hs256(b"another-secret-entirely-32-bytes!!!!");
        let result = validator.validate(&token(&Uuid::new_v4().to_string(), &[], 600));
        assert!(result.is_err());
    }
}
