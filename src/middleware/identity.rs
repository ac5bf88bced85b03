use axum::{
    async_trait,
    body::Body,
    extract::FromRequestParts,
    http::{request::Parts, Request},
    middleware::Next,
    response::Response,
};

use crate::{error::AppError, identity::Identity};

/// Resolve the caller's identity for REST routes.
///
/// Authentication itself happens upstream (gateway/auth collaborator);
/// this core trusts the role-scoped identity it forwards in the
/// `X-Identity` header (`seller_<id>` / `<id>`).
pub async fn identity_middleware(
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let raw = req
        .headers()
        .get("x-identity")
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("Missing identity".to_string()))?;

    let identity = Identity::parse(raw)
        .ok_or_else(|| AppError::Unauthorized("Invalid identity".to_string()))?;

    req.extensions_mut().insert(identity);

    Ok(next.run(req).await)
}

/// Extractor for the identity resolved by `identity_middleware`.
pub struct AuthIdentity(pub Identity);

#[async_trait]
impl<S> FromRequestParts<S> for AuthIdentity
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Identity>()
            .cloned()
            .map(AuthIdentity)
            .ok_or_else(|| AppError::Unauthorized("Missing identity".to_string()))
    }
}
