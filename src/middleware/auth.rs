use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};

use crate::app::AppState;
use crate::auth::{decode_jwt, AuthError, Principal};
use crate::error::ApiError;

/// Validates the bearer token and injects the caller's [`Principal`]
pub async fn jwt_auth_middleware(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_jwt_from_headers(&headers)?;
    let claims = decode_jwt(token, &state.jwt_secret)?;

    let principal = Principal::from(claims);
    tracing::debug!("Authenticated {}@{}", principal.user, principal.tenant);
    request.extensions_mut().insert(principal);

    Ok(next.run(request).await)
}

/// Extract JWT token from Authorization header
fn extract_jwt_from_headers(headers: &HeaderMap) -> Result<&str, AuthError> {
    let auth_str = headers
        .get(axum::http::header::AUTHORIZATION)
        .ok_or(AuthError::MissingToken)?
        .to_str()
        .map_err(|_| AuthError::Malformed)?;

    match auth_str.strip_prefix("Bearer ") {
        Some(token) if !token.trim().is_empty() => Ok(token.trim()),
        _ => Err(AuthError::Malformed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_prefix_is_required() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_jwt_from_headers(&headers), Err(AuthError::MissingToken));

        headers.insert("authorization", HeaderValue::from_static("Basic abc"));
        assert_eq!(extract_jwt_from_headers(&headers), Err(AuthError::Malformed));

        headers.insert("authorization", HeaderValue::from_static("Bearer abc.def"));
        assert_eq!(extract_jwt_from_headers(&headers), Ok("abc.def"));
    }
}
