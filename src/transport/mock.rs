//! Scripted in-memory transport for tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;

use super::{RestRequest, Transport};
use crate::model::Result;

type Handler = dyn Fn(&RestRequest) -> Result<Value> + Send + Sync;

/// Answers every request with a handler and records what was sent.
#[derive(Clone)]
pub struct MockTransport {
  handler: Arc<Handler>,
  requests: Arc<Mutex<Vec<RestRequest>>>,
  delay: Option<Duration>,
}

impl MockTransport {
  pub fn new<F>(handler: F) -> Self
  where
    F: Fn(&RestRequest) -> Result<Value> + Send + Sync + 'static,
  {
    Self {
      handler: Arc::new(handler),
      requests: Arc::new(Mutex::new(Vec::new())),
      delay: None,
    }
  }

  /// Always answer with the same payload.
  pub fn returning(value: Value) -> Self {
    Self::new(move |_| Ok(value.clone()))
  }

  /// Delay each response, simulating network latency.
  pub fn with_delay(mut self, delay: Duration) -> Self {
    self.delay = Some(delay);
    self
  }

  pub fn requests(&self) -> Vec<RestRequest> {
    self.requests.lock().unwrap().clone()
  }

  pub fn count(&self) -> usize {
    self.requests.lock().unwrap().len()
  }
}

impl Transport for MockTransport {
  fn send(&self, request: RestRequest) -> BoxFuture<'static, Result<Value>> {
    self.requests.lock().unwrap().push(request.clone());
    let result = (self.handler)(&request);
    let delay = self.delay;

    async move {
      if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
      }
      result
    }
    .boxed()
  }
}
