use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::{IntoResponse, Response},
};
use utils_jwt::{AuthError, parse_authorization_bearer};

use crate::{Deployment, error::ApiError};

fn extract_bearer_token(req: &Request) -> Option<String> {
    req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(parse_authorization_bearer)
        .map(str::to_string)
}

/// Rejects the request with 401 unless it carries a valid bearer token.
/// On success the caller's `Principal` is available as a request extension.
pub async fn require_auth(
    State(deployment): State<Deployment>,
    mut req: Request,
    next: Next,
) -> Response {
    let verified = match extract_bearer_token(&req) {
        Some(token) => deployment.verifier().verify(&token),
        None => Err(AuthError::MissingToken),
    };

    match verified {
        Ok(principal) => {
            tracing::debug!(subject = %principal.subject, "Authenticated request");
            req.extensions_mut().insert(principal);
            next.run(req).await
        }
        Err(err) => {
            tracing::warn!(
                path = %req.uri().path(),
                method = %req.method(),
                reason = %err,
                "Unauthorized API request"
            );
            ApiError::Unauthorized(err).into_response()
        }
    }
}
