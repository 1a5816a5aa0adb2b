use axum::{
    body::Body,
    extract::State,
    http::{Method, Request, header::AUTHORIZATION},
    middleware::Next,
    response::Response,
};
use octofhir_core::AuthError;

use crate::error::ApiError;
use crate::server::AppState;

/// Bearer-token authorization for FHIR requests.
///
/// The token is introspected against the auth server and the resulting
/// principal checked against the trust policy: only this service's own
/// client and api-key clients get through. The principal is stored in the
/// request extensions for handlers that emit resource events.
pub async fn authorization(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    if should_skip_authorization(&req) {
        return Ok(next.run(req).await);
    }

    let token = bearer_token(&req).ok_or(AuthError::Missing)?;
    let principal = state.introspector.introspect(token).await?;
    state.policy.authorize(Some(&principal))?;

    tracing::debug!(client_id = %principal.client_id(), "Request authorized");
    req.extensions_mut().insert(principal);
    Ok(next.run(req).await)
}

/// Version probe and health stay public.
fn should_skip_authorization(req: &Request<Body>) -> bool {
    match req.uri().path() {
        "/healthz" => true,
        "/fhir" | "/fhir/" => req.method() == Method::GET,
        _ => false,
    }
}

fn bearer_token(req: &Request<Body>) -> Option<&str> {
    let header = req.headers().get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = header.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(method: Method, path: &str, authorization: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(path);
        if let Some(value) = authorization {
            builder = builder.header(AUTHORIZATION, value);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn test_public_paths() {
        assert!(should_skip_authorization(&request(Method::GET, "/healthz", None)));
        assert!(should_skip_authorization(&request(Method::GET, "/fhir", None)));
        assert!(!should_skip_authorization(&request(Method::POST, "/fhir", None)));
        assert!(!should_skip_authorization(&request(
            Method::GET,
            "/fhir/Location/1",
            None
        )));
    }

    #[test]
    fn test_bearer_token_extraction() {
        assert_eq!(
            bearer_token(&request(Method::GET, "/fhir", Some("Bearer abc"))),
            Some("abc")
        );
        assert_eq!(
            bearer_token(&request(Method::GET, "/fhir", Some("bearer abc"))),
            Some("abc")
        );
        assert_eq!(bearer_token(&request(Method::GET, "/fhir", Some("Bearer "))), None);
        assert_eq!(bearer_token(&request(Method::GET, "/fhir", Some("Basic abc"))), None);
        assert_eq!(bearer_token(&request(Method::GET, "/fhir", None)), None);
    }
}
