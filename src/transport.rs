use std::fmt;

use log::debug;
use reqwest::blocking::Client;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};

pub const DEFAULT_BASE_URL: &str = "https://app.clicktime.com/api/1.3";
pub const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Get,
    Post,
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verb::Get => write!(f, "GET"),
            Verb::Post => write!(f, "POST"),
        }
    }
}

/// One request against the API, with `path` relative to the versioned base
/// URL (query string included).
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub verb: Verb,
    pub path: String,
    pub headers: HeaderMap,
    pub body: Option<String>,
}

impl ApiRequest {
    pub fn get(path: impl Into<String>, headers: HeaderMap) -> Self {
        Self {
            verb: Verb::Get,
            path: path.into(),
            headers,
            body: None,
        }
    }

    pub fn post(path: impl Into<String>, mut headers: HeaderMap, body: String) -> Self {
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
        Self {
            verb: Verb::Post,
            path: path.into(),
            headers,
            body: Some(body),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub reason: String,
    pub body: String,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct TransportError(pub String);

pub trait Transport {
    fn send(&self, request: &ApiRequest) -> Result<RawResponse, TransportError>;
}

impl<T: Transport + ?Sized> Transport for &T {
    fn send(&self, request: &ApiRequest) -> Result<RawResponse, TransportError> {
        (**self).send(request)
    }
}

/// Blocking HTTPS transport. Idle connections are never kept, so each call
/// opens and closes its own connection.
pub struct HttpTransport {
    client: Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: &str) -> Result<Self, TransportError> {
        let client = Client::builder()
            .user_agent(concat!("clicktime/", env!("CARGO_PKG_VERSION")))
            .pool_max_idle_per_host(0)
            .build()
            .map_err(|err| TransportError(format!("Failed to build HTTP client: {err}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url_for(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

impl Transport for HttpTransport {
    fn send(&self, request: &ApiRequest) -> Result<RawResponse, TransportError> {
        let url = self.url_for(&request.path);
        debug!("{} {}", request.verb, url);

        let builder = match request.verb {
            Verb::Get => self.client.get(&url),
            Verb::Post => self.client.post(&url),
        };
        let mut builder = builder.headers(request.headers.clone());
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder
            .send()
            .map_err(|err| TransportError(err.to_string()))?;
        let status = response.status();
        let reason = status.canonical_reason().unwrap_or_default().to_string();
        let body = response
            .text()
            .map_err(|err| TransportError(err.to_string()))?;
        debug!("{} {} -> {} {}", request.verb, url, status.as_u16(), reason);

        Ok(RawResponse {
            status: status.as_u16(),
            reason,
            body,
        })
    }
}

/// Caller headers first, then the fixed ones, so the fixed ones win.
pub fn merge_headers(caller: Option<HeaderMap>, fixed: &HeaderMap) -> HeaderMap {
    let mut merged = caller.unwrap_or_default();
    for (name, value) in fixed {
        merged.insert(name.clone(), value.clone());
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{AUTHORIZATION, HeaderName};

    fn fixed() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        headers
    }

    #[test]
    fn merge_keeps_caller_headers() {
        let mut caller = HeaderMap::new();
        caller.insert(
            HeaderName::from_static("x-trace"),
            HeaderValue::from_static("42"),
        );
        let merged = merge_headers(Some(caller), &fixed());
        assert_eq!(merged.get("x-trace").unwrap(), "42");
        assert_eq!(merged.get(AUTHORIZATION).unwrap(), "Basic abc");
    }

    #[test]
    fn merge_overrides_caller_authorization() {
        let mut caller = HeaderMap::new();
        caller.insert(AUTHORIZATION, HeaderValue::from_static("Bearer nope"));
        let merged = merge_headers(Some(caller), &fixed());
        assert_eq!(merged.get_all(AUTHORIZATION).iter().count(), 1);
        assert_eq!(merged.get(AUTHORIZATION).unwrap(), "Basic abc");
    }

    #[test]
    fn post_sets_json_content_type() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        let request = ApiRequest::post("Receipts", headers, "{}".to_string());
        assert_eq!(request.headers.get(CONTENT_TYPE).unwrap(), JSON_CONTENT_TYPE);
        assert_eq!(request.body.as_deref(), Some("{}"));
    }

    #[test]
    fn url_joins_base_and_path() {
        let transport = HttpTransport::new("https://example.test/api/1.3/").unwrap();
        assert_eq!(
            transport.url_for("Session"),
            "https://example.test/api/1.3/Session"
        );
    }
}
