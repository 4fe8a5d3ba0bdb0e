//! Coalescing of repeated refreshes on one instance.

use std::sync::Mutex;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::time::Instant;
use tracing::debug;

use super::error::Result;

pub type SharedRefresh = Shared<BoxFuture<'static, Result<()>>>;

/// Hands every caller inside one window the same in-flight refresh.
///
/// The window opens when a refresh starts. Calls made before it closes join
/// that refresh and observe its result; the first call after it closes starts
/// a new one.
pub struct RefreshThrottle {
  window: Duration,
  current: Mutex<Option<(Instant, SharedRefresh)>>,
}

impl RefreshThrottle {
  pub fn new(window: Duration) -> Self {
    Self {
      window,
      current: Mutex::new(None),
    }
  }

  pub fn window(&self) -> Duration {
    self.window
  }

  /// Join the refresh of the current window, or start one with `start`.
  pub fn run<F>(&self, start: F) -> SharedRefresh
  where
    F: FnOnce() -> BoxFuture<'static, Result<()>>,
  {
    let now = Instant::now();
    let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());

    if let Some((started, refresh)) = current.as_ref() {
      if now.duration_since(*started) < self.window {
        debug!("joining in-flight refresh");
        return refresh.clone();
      }
    }

    let refresh = start().shared();
    *current = Some((now, refresh.clone()));
    refresh
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::ModelError;
  use std::sync::atomic::{AtomicU32, Ordering};
  use std::sync::Arc;

  fn counting(counter: &Arc<AtomicU32>) -> impl FnOnce() -> BoxFuture<'static, Result<()>> {
    let counter = Arc::clone(counter);
    move || {
      counter.fetch_add(1, Ordering::SeqCst);
      async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        Ok::<(), ModelError>(())
      }
      .boxed()
    }
  }

  #[tokio::test(start_paused = true)]
  async fn test_calls_inside_window_share_one_run() {
    let throttle = RefreshThrottle::new(Duration::from_millis(1000));
    let counter = Arc::new(AtomicU32::new(0));

    let a = throttle.run(counting(&counter));
    let b = throttle.run(counting(&counter));
    let (a, b) = futures::join!(a, b);

    assert!(a.is_ok() && b.is_ok());
    assert_eq!(counter.load(Ordering::SeqCst), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_call_after_window_starts_new_run() {
    let throttle = RefreshThrottle::new(Duration::from_millis(1000));
    let counter = Arc::new(AtomicU32::new(0));

    throttle.run(counting(&counter)).await.unwrap();
    tokio::time::advance(Duration::from_millis(500)).await;
    throttle.run(counting(&counter)).await.unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 1);

    tokio::time::advance(Duration::from_millis(500)).await;
    throttle.run(counting(&counter)).await.unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn test_joined_callers_see_the_same_error() {
    let throttle = RefreshThrottle::new(Duration::from_millis(1000));
    let fail = || {
      async { Err::<(), _>(ModelError::InvalidPayload("boom".into())) }.boxed()
    };

    let a = throttle.run(fail);
    let b = throttle.run(|| async { Ok::<(), ModelError>(()) }.boxed());
    let (a, b) = futures::join!(a, b);

    assert_eq!(a, Err(ModelError::InvalidPayload("boom".into())));
    assert_eq!(a, b);
  }
}
