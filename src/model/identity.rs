//! Identity map: at most one live instance per (model type, id).

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::{Map, Value};

use super::descriptor::ModelType;
use super::instance::{Instance, InstanceRef};

type Key = (String, i64);

#[derive(Default)]
pub struct IdentityMap {
  entries: Mutex<HashMap<Key, InstanceRef>>,
}

fn id_of(attrs: &Map<String, Value>) -> Option<i64> {
  match attrs.get("id")? {
    Value::Number(n) => n.as_i64(),
    Value::String(s) => s.trim().parse().ok(),
    _ => None,
  }
}

impl IdentityMap {
  pub fn new() -> Self {
    Self::default()
  }

  fn entries(&self) -> MutexGuard<'_, HashMap<Key, InstanceRef>> {
    self.entries.lock().unwrap_or_else(|e| e.into_inner())
  }

  fn key(model: &ModelType, id: i64) -> Key {
    (model.model_name().to_string(), id)
  }

  pub fn get(&self, model: &ModelType, id: i64) -> Option<InstanceRef> {
    self.entries().get(&Self::key(model, id)).cloned()
  }

  /// Merge `attrs` into the registered instance for their id, or build and
  /// register a new one. Records without an id are built but not registered.
  ///
  /// The lookup and the insertion happen under one lock, so two conversions
  /// of the same record can never produce two instances.
  pub fn merge_or_insert<F>(&self, model: &Arc<ModelType>, attrs: Map<String, Value>, build: F) -> InstanceRef
  where
    F: FnOnce(Map<String, Value>) -> Instance,
  {
    let Some(id) = id_of(&attrs) else {
      return Arc::new(build(attrs));
    };

    let mut entries = self.entries();
    if let Some(existing) = entries.get(&Self::key(model, id)) {
      existing.merge(attrs);
      return Arc::clone(existing);
    }

    let instance = Arc::new(build(attrs));
    entries.insert(Self::key(model, id), Arc::clone(&instance));
    instance
  }

  /// Register an instance that just received its id. Returns the instance
  /// that owns the identity afterwards.
  pub fn adopt(&self, instance: &InstanceRef) -> InstanceRef {
    let Some(id) = instance.id() else {
      return Arc::clone(instance);
    };
    let mut entries = self.entries();
    Arc::clone(
      entries
        .entry(Self::key(instance.model(), id))
        .or_insert_with(|| Arc::clone(instance)),
    )
  }

  /// Drop an instance from the map. Outstanding references stay valid.
  pub fn evict(&self, model: &ModelType, id: i64) -> Option<InstanceRef> {
    self.entries().remove(&Self::key(model, id))
  }

  pub fn len(&self) -> usize {
    self.entries().len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries().is_empty()
  }

  pub fn clear(&self) {
    self.entries().clear();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::Registry;
  use serde_json::json;

  fn attrs(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
  }

  #[test]
  fn test_same_id_yields_same_instance() {
    let model = ModelType::builder("control", "controls")
      .setup(&Registry::new())
      .unwrap();
    let map = IdentityMap::new();
    let build = |a| Instance::new(Arc::clone(&model), a);

    let first = map.merge_or_insert(&model, attrs(json!({"id": 1, "title": "A"})), build);
    let second = map.merge_or_insert(&model, attrs(json!({"id": "1", "title": "B"})), |a| {
      Instance::new(Arc::clone(&model), a)
    });

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.attr("title"), Some(json!("B")));
    assert_eq!(map.len(), 1);
  }

  #[test]
  fn test_types_do_not_share_identities() {
    let registry = Registry::new();
    let control = ModelType::builder("control", "controls")
      .setup(&registry)
      .unwrap();
    let risk = ModelType::builder("risk", "risks").setup(&registry).unwrap();
    let map = IdentityMap::new();

    let a = map.merge_or_insert(&control, attrs(json!({"id": 1})), |a| {
      Instance::new(Arc::clone(&control), a)
    });
    let b = map.merge_or_insert(&risk, attrs(json!({"id": 1})), |a| {
      Instance::new(Arc::clone(&risk), a)
    });

    assert!(!Arc::ptr_eq(&a, &b));
    assert_eq!(map.len(), 2);
  }

  #[test]
  fn test_records_without_id_are_not_registered() {
    let model = ModelType::builder("control", "controls")
      .setup(&Registry::new())
      .unwrap();
    let map = IdentityMap::new();

    map.merge_or_insert(&model, attrs(json!({"title": "draft"})), |a| {
      Instance::new(Arc::clone(&model), a)
    });

    assert!(map.is_empty());
  }

  #[test]
  fn test_adopt_and_evict() {
    let model = ModelType::builder("control", "controls")
      .setup(&Registry::new())
      .unwrap();
    let map = IdentityMap::new();
    let draft = Arc::new(Instance::new(Arc::clone(&model), Map::new()));

    map.adopt(&draft);
    assert!(map.is_empty());

    draft.set_attr("id", 9);
    let owner = map.adopt(&draft);
    assert!(Arc::ptr_eq(&owner, &draft));
    assert!(Arc::ptr_eq(&map.get(&model, 9).unwrap(), &draft));

    assert!(map.evict(&model, 9).is_some());
    assert!(map.get(&model, 9).is_none());
  }
}
