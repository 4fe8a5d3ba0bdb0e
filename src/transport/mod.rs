//! REST boundary for the model layer.
//!
//! The store never talks HTTP directly; it hands a [`RestRequest`] to a
//! [`Transport`] and gets JSON back. Timeouts and retries belong to the
//! transport implementation.

mod http;
#[cfg(test)]
pub(crate) mod mock;

use std::fmt;

use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::Value;

use crate::model::Result;

pub use http::HttpTransport;

/// HTTP verbs used by model endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
  Get,
  Post,
  Put,
  Delete,
}

impl Method {
  pub fn as_str(&self) -> &'static str {
    match self {
      Method::Get => "GET",
      Method::Post => "POST",
      Method::Put => "PUT",
      Method::Delete => "DELETE",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s.to_ascii_uppercase().as_str() {
      "GET" => Some(Method::Get),
      "POST" => Some(Method::Post),
      "PUT" => Some(Method::Put),
      "DELETE" => Some(Method::Delete),
      _ => None,
    }
  }
}

impl fmt::Display for Method {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// A single request against the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct RestRequest {
  pub method: Method,
  /// Path relative to the backend root, e.g. `/api/controls/3`
  pub path: String,
  pub query: Vec<(String, String)>,
  pub body: Option<Value>,
}

impl RestRequest {
  pub fn new(method: Method, path: impl Into<String>) -> Self {
    Self {
      method,
      path: path.into(),
      query: Vec::new(),
      body: None,
    }
  }

  pub fn with_query(mut self, query: Vec<(String, String)>) -> Self {
    self.query = query;
    self
  }

  pub fn with_body(mut self, body: Value) -> Self {
    self.body = Some(body);
    self
  }
}

/// Anything that can execute a [`RestRequest`].
///
/// Returned futures are `'static` so they can be shared between coalesced
/// callers.
pub trait Transport: Send + Sync {
  fn send(&self, request: RestRequest) -> BoxFuture<'static, Result<Value>>;
}
