use log::error;
use serde::de::DeserializeOwned;

use crate::transport::RawResponse;

/// What came back in a response body.
#[derive(Debug, Clone, PartialEq)]
pub enum Body<T> {
    Parsed(T),
    /// No bytes at all, or a bare JSON `null`.
    Empty,
    Malformed { raw: String, error: String },
}

impl<T: DeserializeOwned> Body<T> {
    pub fn parse(raw: &str) -> Self {
        if raw.trim().is_empty() {
            return Body::Empty;
        }
        match serde_json::from_str::<Option<T>>(raw) {
            Ok(Some(value)) => Body::Parsed(value),
            Ok(None) => Body::Empty,
            Err(err) => {
                error!("Error parsing JSON '{raw}': {err}");
                Body::Malformed {
                    raw: raw.to_string(),
                    error: err.to_string(),
                }
            }
        }
    }
}

impl<T> Body<T> {
    pub fn parsed(&self) -> Option<&T> {
        match self {
            Body::Parsed(value) => Some(value),
            _ => None,
        }
    }

    #[cfg(test)]
    pub fn unwrap_or(self, default: T) -> T {
        match self {
            Body::Parsed(value) => value,
            _ => default,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Body<U> {
        match self {
            Body::Parsed(value) => Body::Parsed(f(value)),
            Body::Empty => Body::Empty,
            Body::Malformed { raw, error } => Body::Malformed { raw, error },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response<T> {
    pub status: u16,
    pub reason: String,
    pub body: Body<T>,
}

impl<T: DeserializeOwned> Response<T> {
    pub fn from_raw(raw: RawResponse) -> Self {
        let body = Body::parse(&raw.body);
        Self {
            status: raw.status,
            reason: raw.reason,
            body,
        }
    }
}

impl<T> Response<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Response<U> {
        Response {
            status: self.status,
            reason: self.reason,
            body: self.body.map(f),
        }
    }
}

impl<T> Response<Vec<T>> {
    /// List endpoints answering with nothing have nothing to list.
    pub fn empty_as_list(mut self) -> Self {
        if matches!(self.body, Body::Empty) {
            self.body = Body::Parsed(Vec::new());
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn blank_and_null_bodies_are_empty() {
        assert_eq!(Body::<Value>::parse(""), Body::Empty);
        assert_eq!(Body::<Value>::parse("  \n"), Body::Empty);
        assert_eq!(Body::<Value>::parse("null"), Body::Empty);
    }

    #[test]
    fn garbage_is_malformed_not_empty() {
        let body = Body::<Vec<Value>>::parse("<html>oops</html>");
        match body {
            Body::Malformed { raw, .. } => assert_eq!(raw, "<html>oops</html>"),
            other => panic!("expected malformed body, got {other:?}"),
        }
    }

    #[test]
    fn unwrap_or_falls_back_for_malformed() {
        let body = Body::<Vec<u32>>::parse("{not json");
        assert_eq!(body.unwrap_or(vec![7]), vec![7]);
        assert_eq!(Body::<Vec<u32>>::parse("[1,2]").unwrap_or(vec![]), vec![1, 2]);
    }

    #[test]
    fn empty_list_body_becomes_empty_list() {
        let response: Response<Vec<Value>> = Response::from_raw(RawResponse {
            status: 200,
            reason: "OK".to_string(),
            body: String::new(),
        })
        .empty_as_list();
        assert_eq!(response.body, Body::Parsed(Vec::new()));
    }
}
