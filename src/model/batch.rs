//! Observable lists populated in time-sliced batches.
//!
//! Large collections are converted to instances a slice at a time: items
//! are grouped into one batch until the batch has been open longer than the
//! time budget, then the batch is inserted into the list in a single step
//! and the task yields before opening the next one. Observers see a handful
//! of [`ListEvent::BatchInserted`] events instead of one per item, followed
//! by [`ListEvent::Complete`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde_json::{Map, Value};
use tokio::sync::{mpsc, watch};
use tracing::debug;

use super::instance::InstanceRef;

pub const DEFAULT_BATCH_BUDGET: Duration = Duration::from_millis(100);

/// Millisecond clock used to slice batches.
pub trait Clock: Send + Sync {
  fn now_millis(&self) -> u64;
}

/// Wall clock measured from its creation.
pub struct SystemClock {
  origin: Instant,
}

impl Default for SystemClock {
  fn default() -> Self {
    Self {
      origin: Instant::now(),
    }
  }
}

impl Clock for SystemClock {
  fn now_millis(&self) -> u64 {
    self.origin.elapsed().as_millis() as u64
  }
}

/// Change notifications of a [`BatchedList`].
#[derive(Debug, Clone)]
pub enum ListEvent {
  /// `items` were appended starting at index `start`
  BatchInserted { start: usize, items: Vec<InstanceRef> },
  /// Population finished; the list holds `len` items
  Complete { len: usize },
}

/// Receiving end of a list subscription.
pub struct Subscription {
  pub id: u64,
  rx: mpsc::UnboundedReceiver<ListEvent>,
}

impl Subscription {
  pub async fn recv(&mut self) -> Option<ListEvent> {
    self.rx.recv().await
  }

  pub fn try_recv(&mut self) -> Option<ListEvent> {
    self.rx.try_recv().ok()
  }
}

struct ListInner {
  items: Mutex<Vec<InstanceRef>>,
  subscribers: Mutex<Vec<(u64, mpsc::UnboundedSender<ListEvent>)>>,
  next_subscriber: AtomicU64,
  complete: watch::Sender<bool>,
}

/// Ordered list of instances with a subscribe/unsubscribe event channel.
///
/// Cloning yields another handle to the same list.
#[derive(Clone)]
pub struct BatchedList {
  inner: Arc<ListInner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl Default for BatchedList {
  fn default() -> Self {
    Self::new()
  }
}

impl BatchedList {
  pub fn new() -> Self {
    let (complete, _) = watch::channel(false);
    Self {
      inner: Arc::new(ListInner {
        items: Mutex::new(Vec::new()),
        subscribers: Mutex::new(Vec::new()),
        next_subscriber: AtomicU64::new(0),
        complete,
      }),
    }
  }

  pub fn len(&self) -> usize {
    lock(&self.inner.items).len()
  }

  pub fn is_empty(&self) -> bool {
    lock(&self.inner.items).is_empty()
  }

  pub fn get(&self, index: usize) -> Option<InstanceRef> {
    lock(&self.inner.items).get(index).cloned()
  }

  pub fn items(&self) -> Vec<InstanceRef> {
    lock(&self.inner.items).clone()
  }

  pub fn subscribe(&self) -> Subscription {
    let id = self.inner.next_subscriber.fetch_add(1, Ordering::Relaxed);
    let (tx, rx) = mpsc::unbounded_channel();
    lock(&self.inner.subscribers).push((id, tx));
    Subscription { id, rx }
  }

  pub fn unsubscribe(&self, id: u64) {
    lock(&self.inner.subscribers).retain(|(sub, _)| *sub != id);
  }

  fn notify(&self, event: ListEvent) {
    // drop subscribers whose receiver is gone
    lock(&self.inner.subscribers).retain(|(_, tx)| tx.send(event.clone()).is_ok());
  }

  /// Append a whole batch as one observable change.
  pub fn push_batch(&self, batch: Vec<InstanceRef>) {
    if batch.is_empty() {
      return;
    }
    let start = {
      let mut items = lock(&self.inner.items);
      let start = items.len();
      items.extend(batch.iter().cloned());
      start
    };
    self.notify(ListEvent::BatchInserted {
      start,
      items: batch,
    });
  }

  pub fn mark_complete(&self) {
    self.inner.complete.send_replace(true);
    self.notify(ListEvent::Complete { len: self.len() });
  }

  pub fn is_complete(&self) -> bool {
    *self.inner.complete.borrow()
  }

  /// Wait until population has finished.
  pub async fn completed(&self) {
    let mut rx = self.inner.complete.subscribe();
    // the sender lives as long as the list, so this only ends on completion
    let _ = rx.wait_for(|done| *done).await;
  }
}

/// Converts raw records into instances and feeds them to a list in
/// time-sliced batches.
pub struct Materializer {
  clock: Arc<dyn Clock>,
  budget: Duration,
}

impl Materializer {
  pub fn new(clock: Arc<dyn Clock>, budget: Duration) -> Self {
    Self { clock, budget }
  }

  /// Populate `list` from `raw`, converting each record with `convert`.
  ///
  /// Server order is preserved: every item of one batch precedes every item
  /// of the next. A batch always takes at least one item.
  pub async fn populate<F>(&self, raw: Vec<Map<String, Value>>, list: &BatchedList, mut convert: F)
  where
    F: FnMut(Map<String, Value>) -> InstanceRef,
  {
    let budget = self.budget.as_millis() as u64;
    let total = raw.len();
    let mut pending = raw.into_iter().peekable();
    let mut batches = 0usize;

    while pending.peek().is_some() {
      let opened = self.clock.now_millis();
      let mut batch = Vec::new();

      while let Some(item) = pending.next() {
        batch.push(convert(item));
        if pending.peek().is_none() {
          break;
        }
        if self.clock.now_millis().saturating_sub(opened) >= budget {
          break;
        }
      }

      list.push_batch(batch);
      batches += 1;

      if pending.peek().is_some() {
        tokio::task::yield_now().await;
      }
    }

    debug!(items = total, batches, "list populated");
    list.mark_complete();
  }
}

/// Replays scripted readings, then repeats the last one.
#[cfg(test)]
pub(crate) struct ScriptedClock {
  readings: Mutex<std::collections::VecDeque<u64>>,
  last: AtomicU64,
}

#[cfg(test)]
impl ScriptedClock {
  pub(crate) fn new(readings: &[u64]) -> Arc<Self> {
    Arc::new(Self {
      readings: Mutex::new(readings.iter().copied().collect()),
      last: AtomicU64::new(0),
    })
  }
}

#[cfg(test)]
impl Clock for ScriptedClock {
  fn now_millis(&self) -> u64 {
    match lock(&self.readings).pop_front() {
      Some(t) => {
        self.last.store(t, Ordering::SeqCst);
        t
      }
      None => self.last.load(Ordering::SeqCst),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::{Instance, ModelType, Registry};
  use serde_json::json;

  fn raw(ids: std::ops::RangeInclusive<i64>) -> Vec<Map<String, Value>> {
    ids
      .map(|id| json!({ "id": id }).as_object().cloned().unwrap())
      .collect()
  }

  fn batch_ids(event: ListEvent) -> Vec<i64> {
    match event {
      ListEvent::BatchInserted { items, .. } => items.iter().filter_map(|i| i.id()).collect(),
      other => panic!("expected a batch, got {:?}", other),
    }
  }

  #[tokio::test]
  async fn test_flushes_when_budget_is_exceeded() {
    let model = ModelType::builder("dummy_model", "dummy_models")
      .setup(&Registry::new())
      .unwrap();
    // batch opens at 0, items 1-3 land at 10/20, the reading after item 3
    // is past the budget; the second batch repeats the pattern from 150
    let clock = ScriptedClock::new(&[0, 10, 20, 150, 150, 160, 170, 300, 300]);
    let materializer = Materializer::new(clock, Duration::from_millis(100));
    let list = BatchedList::new();
    let mut events = list.subscribe();

    materializer
      .populate(raw(1..=7), &list, |attrs| {
        Arc::new(Instance::new(Arc::clone(&model), attrs))
      })
      .await;

    assert_eq!(batch_ids(events.try_recv().unwrap()), vec![1, 2, 3]);
    assert_eq!(batch_ids(events.try_recv().unwrap()), vec![4, 5, 6]);
    assert_eq!(batch_ids(events.try_recv().unwrap()), vec![7]);
    assert!(matches!(events.try_recv(), Some(ListEvent::Complete { len: 7 })));
    assert!(events.try_recv().is_none());

    let ids: Vec<i64> = list.items().iter().filter_map(|i| i.id()).collect();
    assert_eq!(ids, (1..=7).collect::<Vec<_>>());
  }

  #[tokio::test]
  async fn test_fast_conversion_is_a_single_batch() {
    let model = ModelType::builder("dummy_model", "dummy_models")
      .setup(&Registry::new())
      .unwrap();
    let clock = ScriptedClock::new(&[5]);
    let materializer = Materializer::new(clock, Duration::from_millis(100));
    let list = BatchedList::new();
    let mut events = list.subscribe();

    materializer
      .populate(raw(1..=50), &list, |attrs| {
        Arc::new(Instance::new(Arc::clone(&model), attrs))
      })
      .await;

    assert_eq!(batch_ids(events.try_recv().unwrap()).len(), 50);
    assert!(matches!(events.try_recv(), Some(ListEvent::Complete { len: 50 })));
    assert!(list.is_complete());
  }

  #[tokio::test]
  async fn test_empty_input_only_completes() {
    let list = BatchedList::new();
    let mut events = list.subscribe();
    let materializer = Materializer::new(ScriptedClock::new(&[]), DEFAULT_BATCH_BUDGET);

    materializer
      .populate(Vec::new(), &list, |_| unreachable!())
      .await;

    assert!(matches!(events.try_recv(), Some(ListEvent::Complete { len: 0 })));
    list.completed().await;
  }

  #[tokio::test]
  async fn test_unsubscribed_receivers_get_nothing() {
    let model = ModelType::builder("dummy_model", "dummy_models")
      .setup(&Registry::new())
      .unwrap();
    let list = BatchedList::new();
    let mut kept = list.subscribe();
    let mut dropped = list.subscribe();
    list.unsubscribe(dropped.id);

    list.push_batch(vec![Arc::new(Instance::new(model, Map::new()))]);

    assert!(matches!(
      kept.try_recv(),
      Some(ListEvent::BatchInserted { start: 0, .. })
    ));
    assert!(dropped.try_recv().is_none());
  }
}
