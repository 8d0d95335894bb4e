//! Double-submit cookie CSRF guard
//!
//! Safe methods pass and are handed a token cookie when they lack one.
//! Unsafe methods must echo that cookie's value in the token header. The
//! service itself only serves GET, so in practice this stage issues cookies
//! and turns away stray form posts before they reach the router.

use async_trait::async_trait;
use axum::{
    extract::Request,
    http::{HeaderMap, HeaderValue, Method, StatusCode, header, header::HeaderName},
    response::{IntoResponse, Response},
};
use uuid::Uuid;

use super::{Next, RequestContext, Stage};
use crate::config::CsrfConfig;
use crate::error::{AppError, AppResult};

pub struct CsrfStage {
    cookie_name: String,
    header_name: HeaderName,
    exempt_streaming: bool,
}

impl CsrfStage {
    pub fn new(config: &CsrfConfig) -> AppResult<Self> {
        let header_name = HeaderName::from_bytes(config.header_name.to_ascii_lowercase().as_bytes())
            .map_err(|e| {
                AppError::Config(format!(
                    "csrf.header_name {:?} is not a valid header name: {}",
                    config.header_name, e
                ))
            })?;
        if config.cookie_name.is_empty()
            || !config
                .cookie_name
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
        {
            return Err(AppError::Config(format!(
                "csrf.cookie_name {:?} must be non-empty and use [A-Za-z0-9_-]",
                config.cookie_name
            )));
        }

        Ok(Self {
            cookie_name: config.cookie_name.clone(),
            header_name,
            exempt_streaming: config.exempt_streaming,
        })
    }

    fn issue_cookie(&self, response: &mut Response) {
        let cookie = format!(
            "{}={}; Path=/; SameSite=Lax",
            self.cookie_name,
            Uuid::new_v4().simple()
        );
        if let Ok(value) = HeaderValue::from_str(&cookie) {
            response.headers_mut().append(header::SET_COOKIE, value);
        }
    }
}

/// GET, HEAD, OPTIONS and TRACE do not change server state
pub fn is_safe_method(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::OPTIONS | Method::TRACE
    )
}

/// Value of cookie `name` across all `Cookie` headers
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim().to_string())
}

fn tokens_match(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes().zip(b.bytes()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[async_trait]
impl Stage for CsrfStage {
    fn name(&self) -> &'static str {
        "csrf"
    }

    async fn handle(&self, ctx: &mut RequestContext, request: Request, next: Next<'_>) -> Response {
        let cookie = cookie_value(request.headers(), &self.cookie_name).filter(|c| !c.is_empty());

        if is_safe_method(&ctx.method) {
            let mut response = next.run(ctx, request).await;
            if cookie.is_none() {
                self.issue_cookie(&mut response);
            }
            return response;
        }

        if self.exempt_streaming && ctx.route.is_streaming() {
            return next.run(ctx, request).await;
        }

        let presented = request
            .headers()
            .get(&self.header_name)
            .and_then(|v| v.to_str().ok());
        let valid = matches!((&cookie, presented), (Some(c), Some(h)) if tokens_match(c, h));

        if !valid {
            tracing::warn!(
                method = %ctx.method,
                path = %ctx.path,
                ip = %ctx.client_ip,
                request_id = ctx.request_id_str(),
                has_cookie = cookie.is_some(),
                has_header = presented.is_some(),
                "Rejected request failing CSRF check"
            );
            ctx.status = Some(StatusCode::FORBIDDEN);
            return AppError::Forbidden("CSRF token missing or invalid".to_string()).into_response();
        }

        next.run(ctx, request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cookie_value_parsing() {
        let mut headers = HeaderMap::new();
        headers.append(header::COOKIE, HeaderValue::from_static("a=1; csrf_=tok"));
        headers.append(header::COOKIE, HeaderValue::from_static("b=2"));

        assert_eq!(cookie_value(&headers, "csrf_").as_deref(), Some("tok"));
        assert_eq!(cookie_value(&headers, "b").as_deref(), Some("2"));
        assert_eq!(cookie_value(&headers, "missing"), None);
    }

    #[test]
    fn test_safe_methods() {
        assert!(is_safe_method(&Method::GET));
        assert!(is_safe_method(&Method::HEAD));
        assert!(!is_safe_method(&Method::POST));
        assert!(!is_safe_method(&Method::DELETE));
    }

    #[test]
    fn test_tokens_match() {
        assert!(tokens_match("abc", "abc"));
        assert!(!tokens_match("abc", "abd"));
        assert!(!tokens_match("abc", "abcd"));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = CsrfConfig {
            header_name: "bad header".to_string(),
            ..CsrfConfig::default()
        };
        assert!(CsrfStage::new(&config).is_err());

        let config = CsrfConfig {
            cookie_name: "a;b".to_string(),
            ..CsrfConfig::default()
        };
        assert!(CsrfStage::new(&config).is_err());
    }
}
