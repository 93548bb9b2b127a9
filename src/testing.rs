use std::cell::RefCell;

use serde_json::Value;

use crate::transport::{ApiRequest, RawResponse, Transport, TransportError};

pub const SESSION: &str = r#"{"CompanyID": "c1", "UserID": "u1", "CompanyName": "Acme"}"#;

/// Answers requests from canned routes and records everything it was sent.
/// A route matches the full path first, then the path without its query.
/// Unknown paths get a 404 with an empty body.
#[derive(Default)]
pub struct FakeTransport {
    routes: Vec<(String, RawResponse)>,
    failures: Vec<(String, usize)>,
    requests: RefCell<Vec<ApiRequest>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session() -> Self {
        Self::new().route("Session", 200, SESSION)
    }

    pub fn route(mut self, path: &str, status: u16, body: &str) -> Self {
        self.routes.push((
            path.to_string(),
            RawResponse {
                status,
                reason: String::new(),
                body: body.to_string(),
            },
        ));
        self
    }

    /// The `nth` request (counting from 1) to exactly `path` fails as if the
    /// connection dropped.
    pub fn fail_on_call(mut self, path: &str, nth: usize) -> Self {
        self.failures.push((path.to_string(), nth));
        self
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests.borrow().clone()
    }

    pub fn last_request(&self) -> ApiRequest {
        self.requests
            .borrow()
            .last()
            .cloned()
            .expect("no request was sent")
    }

    pub fn last_body(&self) -> Value {
        let request = self.last_request();
        let body = request.body.expect("last request had no body");
        serde_json::from_str(&body).expect("last request body is not JSON")
    }

    fn lookup(&self, path: &str) -> Option<&RawResponse> {
        let bare = path.split('?').next().unwrap_or(path);
        self.routes
            .iter()
            .find(|(route, _)| route == path)
            .or_else(|| self.routes.iter().find(|(route, _)| route == bare))
            .map(|(_, response)| response)
    }
}

impl Transport for FakeTransport {
    fn send(&self, request: &ApiRequest) -> Result<RawResponse, TransportError> {
        self.requests.borrow_mut().push(request.clone());
        let calls = self
            .requests
            .borrow()
            .iter()
            .filter(|sent| sent.path == request.path)
            .count();
        if self
            .failures
            .iter()
            .any(|(path, nth)| *path == request.path && *nth == calls)
        {
            return Err(TransportError(format!(
                "connection reset while sending {}",
                request.path
            )));
        }
        Ok(self.lookup(&request.path).cloned().unwrap_or(RawResponse {
            status: 404,
            reason: "Not Found".to_string(),
            body: String::new(),
        }))
    }
}
