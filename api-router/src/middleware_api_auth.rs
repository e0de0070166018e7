use axum::{extract::Request, middleware::Next, response::Response};

use crate::error::ApiError;

/// Caller identity forwarded by the API gateway, available to handlers as an
/// extension after [`require_subject`] has run.
#[derive(Debug, Clone)]
pub struct AuthSubject(pub String);

/// Requires a gateway-forwarded credential and stores it as the request
/// subject. The gateway has already authenticated the caller, so the
/// credential is trusted as an opaque subject id without a lookup.
pub async fn require_subject(mut request: Request, next: Next) -> Result<Response, ApiError> {
    let subject = extract_subject(&request)
        .ok_or_else(|| ApiError::Unauthorized("You have to be authenticated".to_string()))?;

    request.extensions_mut().insert(AuthSubject(subject));

    Ok(next.run(request).await)
}

fn extract_subject(request: &Request) -> Option<String> {
    request
        .headers()
        .get("X-API-Key")
        .and_then(|v| v.to_str().ok())
        .or_else(|| {
            request
                .headers()
                .get("Authorization")
                .and_then(|v| v.to_str().ok())
                .and_then(|auth| auth.strip_prefix("Bearer "))
        })
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request as HttpRequest;

    fn request_with_headers(headers: &[(&str, &str)]) -> Request {
        let mut builder = HttpRequest::builder().uri("/");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(Body::empty()).expect("request")
    }

    #[test]
    fn api_key_header_wins_over_bearer() {
        let request = request_with_headers(&[
            ("X-API-Key", "panel-7"),
            ("Authorization", "Bearer other"),
        ]);
        assert_eq!(extract_subject(&request).as_deref(), Some("panel-7"));
    }

    #[test]
    fn bearer_token_is_trimmed() {
        let request = request_with_headers(&[("Authorization", "Bearer  panel-7 ")]);
        assert_eq!(extract_subject(&request).as_deref(), Some("panel-7"));
    }

    #[test]
    fn missing_or_empty_credentials_yield_none() {
        let request = request_with_headers(&[]);
        assert_eq!(extract_subject(&request), None);

        let request = request_with_headers(&[("X-API-Key", "  ")]);
        assert_eq!(extract_subject(&request), None);

        let request = request_with_headers(&[("Authorization", "Basic abc")]);
        assert_eq!(extract_subject(&request), None);
    }
}
