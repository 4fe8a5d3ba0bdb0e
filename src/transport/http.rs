use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use tracing::debug;
use url::Url;

use super::{Method, RestRequest, Transport};
use crate::model::{ModelError, Result};

/// reqwest-backed transport against a GRC backend.
#[derive(Clone)]
pub struct HttpTransport {
  client: reqwest::Client,
  base_url: Url,
  token: Option<String>,
}

impl HttpTransport {
  pub fn new(base_url: &str, token: Option<String>) -> Result<Self> {
    let base_url = Url::parse(base_url)
      .map_err(|e| ModelError::Configuration(format!("Invalid server url {}: {}", base_url, e)))?;

    let client = reqwest::Client::builder()
      .gzip(true)
      .build()
      .map_err(|e| ModelError::Configuration(format!("Failed to create HTTP client: {}", e)))?;

    Ok(Self {
      client,
      base_url,
      token,
    })
  }

  fn url_for(&self, path: &str) -> Result<Url> {
    self
      .base_url
      .join(path)
      .map_err(|e| ModelError::Configuration(format!("Invalid request path {}: {}", path, e)))
  }
}

impl Transport for HttpTransport {
  fn send(&self, request: RestRequest) -> BoxFuture<'static, Result<Value>> {
    let url = self.url_for(&request.path);
    let client = self.client.clone();
    let token = self.token.clone();

    async move {
      let url = url?;
      let method = request.method;
      let failed = |status: Option<u16>, message: String| ModelError::Transport {
        method: method.to_string(),
        url: url.to_string(),
        status,
        message,
      };

      let mut builder = match method {
        Method::Get => client.get(url.clone()),
        Method::Post => client.post(url.clone()),
        Method::Put => client.put(url.clone()),
        Method::Delete => client.delete(url.clone()),
      };
      if !request.query.is_empty() {
        builder = builder.query(&request.query);
      }
      if let Some(token) = &token {
        builder = builder.bearer_auth(token);
      }
      if let Some(body) = &request.body {
        builder = builder.json(body);
      }

      debug!(%method, %url, "sending request");
      let response = builder.send().await.map_err(|e| failed(None, e.to_string()))?;

      let status = response.status();
      let bytes = response
        .bytes()
        .await
        .map_err(|e| failed(Some(status.as_u16()), e.to_string()))?;

      if !status.is_success() {
        let message = String::from_utf8_lossy(&bytes).into_owned();
        return Err(failed(Some(status.as_u16()), message));
      }

      // DELETE and friends may answer 204 with no body
      if bytes.is_empty() {
        return Ok(Value::Null);
      }

      serde_json::from_slice(&bytes).map_err(|e| failed(Some(status.as_u16()), e.to_string()))
    }
    .boxed()
  }
}
