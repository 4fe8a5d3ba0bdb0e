//! A single domain record.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde_json::{json, Map, Value};

use super::custom_attr::{
  CaKey, CustomAttributeAccess, CustomAttributeDefinition, CustomAttributeObject,
  CustomAttributeValue,
};
use super::descriptor::ModelType;
use super::error::{ModelError, Result};
use super::pending::PendingJoin;
use super::throttle::RefreshThrottle;

pub type InstanceRef = Arc<Instance>;

pub const DEFAULT_REFRESH_THROTTLE: Duration = Duration::from_millis(1000);

struct InstanceState {
  attrs: Map<String, Value>,
  /// Last state known to match the server
  backup: Option<Map<String, Value>>,
  custom_attributes: Option<CustomAttributeAccess>,
}

pub struct Instance {
  model: Arc<ModelType>,
  state: Mutex<InstanceState>,
  pending: Mutex<Vec<PendingJoin>>,
  throttle: RefreshThrottle,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Custom-attribute definitions embedded in the record, if any.
fn embedded_definitions(attrs: &Map<String, Value>) -> Option<Vec<Arc<CustomAttributeDefinition>>> {
  let raw = attrs.get("custom_attribute_definitions")?;
  let definitions: Vec<CustomAttributeDefinition> = serde_json::from_value(raw.clone()).ok()?;
  Some(definitions.into_iter().map(Arc::new).collect())
}

fn stored_values(attrs: &Map<String, Value>) -> Vec<CustomAttributeValue> {
  attrs
    .get("custom_attribute_values")
    .and_then(|raw| serde_json::from_value(raw.clone()).ok())
    .unwrap_or_default()
}

impl Instance {
  /// Construct a standalone instance, outside any store.
  pub fn new(model: Arc<ModelType>, attrs: Map<String, Value>) -> Self {
    Self::build(model, attrs, Vec::new(), DEFAULT_REFRESH_THROTTLE)
  }

  /// Construct an instance; custom-attributable types get their
  /// custom-attribute objects right away, from definitions embedded in the
  /// record or else the `definitions` registered for the type.
  pub(crate) fn build(
    model: Arc<ModelType>,
    attrs: Map<String, Value>,
    definitions: Vec<Arc<CustomAttributeDefinition>>,
    refresh_throttle: Duration,
  ) -> Self {
    let custom_attributes = model.is_custom_attributable().then(|| {
      let definitions = embedded_definitions(&attrs).unwrap_or(definitions);
      CustomAttributeAccess::new(&definitions, &stored_values(&attrs))
    });

    Self {
      model,
      state: Mutex::new(InstanceState {
        attrs,
        backup: None,
        custom_attributes,
      }),
      pending: Mutex::new(Vec::new()),
      throttle: RefreshThrottle::new(refresh_throttle),
    }
  }

  pub fn model(&self) -> &Arc<ModelType> {
    &self.model
  }

  /// Server id; numeric strings are accepted.
  pub fn id(&self) -> Option<i64> {
    match lock(&self.state).attrs.get("id")? {
      Value::Number(n) => n.as_i64(),
      Value::String(s) => s.trim().parse().ok(),
      _ => None,
    }
  }

  /// `selfLink`, falling back to `href`.
  pub fn self_link(&self) -> Option<String> {
    let state = lock(&self.state);
    ["selfLink", "href"]
      .iter()
      .find_map(|key| state.attrs.get(*key).and_then(Value::as_str))
      .map(String::from)
  }

  pub fn attr(&self, name: &str) -> Option<Value> {
    lock(&self.state).attrs.get(name).cloned()
  }

  pub fn attrs(&self) -> Map<String, Value> {
    lock(&self.state).attrs.clone()
  }

  pub fn set_attr(&self, name: &str, value: impl Into<Value>) {
    lock(&self.state).attrs.insert(name.to_string(), value.into());
  }

  /// Merge fresh attributes field by field; the incoming value wins.
  pub fn merge(&self, attrs: Map<String, Value>) {
    let mut state = lock(&self.state);

    if let Some(access) = state.custom_attributes.as_mut() {
      if let Some(definitions) = embedded_definitions(&attrs) {
        *access = CustomAttributeAccess::new(&definitions, &stored_values(&attrs));
      } else if attrs.contains_key("custom_attribute_values") {
        access.update_ca_objects(&stored_values(&attrs));
      }
    }

    state.attrs.extend(attrs);
  }

  /// Snapshot the current attributes as the last known server state.
  pub fn backup(&self) {
    let mut state = lock(&self.state);
    state.backup = Some(state.serialize());
  }

  pub fn backup_snapshot(&self) -> Option<Map<String, Value>> {
    lock(&self.state).backup.clone()
  }

  /// Whether attributes differ from the last backup. Never-backed-up
  /// instances are dirty.
  pub fn is_dirty(&self) -> bool {
    let state = lock(&self.state);
    match &state.backup {
      Some(backup) => *backup != state.serialize(),
      None => true,
    }
  }

  /// Revert to the last backup.
  pub fn restore(&self) {
    let mut state = lock(&self.state);
    if let Some(backup) = state.backup.clone() {
      if let Some(access) = state.custom_attributes.as_mut() {
        access.update_ca_objects(&stored_values(&backup));
      }
      state.attrs = backup;
    }
  }

  /// Attributes as sent to the server, including custom-attribute values.
  pub fn serialize(&self) -> Map<String, Value> {
    lock(&self.state).serialize()
  }

  /// `{ "type": ..., "id": ..., "href": ... }` reference to this record.
  pub fn stub(&self) -> Result<Value> {
    let id = self
      .id()
      .ok_or_else(|| ModelError::MissingId(self.model.model_name().to_string()))?;
    let mut stub = json!({ "type": self.model.model_name(), "id": id });
    if let Some(href) = self.self_link() {
      stub["href"] = Value::String(href);
    }
    Ok(stub)
  }

  pub fn is_custom_attributable(&self) -> bool {
    self.model.is_custom_attributable()
  }

  fn with_custom_attributes<T>(
    &self,
    f: impl FnOnce(&mut CustomAttributeAccess) -> Result<T>,
  ) -> Result<T> {
    if !self.is_custom_attributable() {
      return Err(ModelError::NotCustomAttributable(
        self.model.model_name().to_string(),
      ));
    }
    let mut state = lock(&self.state);
    let access = state.custom_attributes.get_or_insert_with(Default::default);
    f(access)
  }

  pub fn get_all_custom_attributes(&self) -> Result<Vec<CustomAttributeObject>> {
    self.with_custom_attributes(|access| Ok(access.get_all().to_vec()))
  }

  pub fn get_custom_attribute(&self, key: impl Into<CaKey>) -> Result<Option<CustomAttributeObject>> {
    let key = key.into();
    self.with_custom_attributes(|access| Ok(access.get(key).cloned()))
  }

  pub fn set_custom_attribute(&self, key: impl Into<CaKey>, value: impl Into<Value>) -> Result<()> {
    let key = key.into();
    let value = value.into();
    self.with_custom_attributes(|access| access.set(key, value))
  }

  /// Apply stored values in bulk. No-op for types without custom attributes.
  pub fn update_ca_objects(&self, values: &[CustomAttributeValue]) {
    if let Some(access) = lock(&self.state).custom_attributes.as_mut() {
      access.update_ca_objects(values);
    }
  }

  /// Client-side checks run before the instance is saved.
  pub fn validate(&self) -> Result<()> {
    match &lock(&self.state).custom_attributes {
      Some(access) => access.validate(),
      None => Ok(()),
    }
  }

  /// Queue a binding to resolve after the next successful save.
  pub fn defer_binding(&self, join: PendingJoin) {
    lock(&self.pending).push(join);
  }

  pub fn has_pending_joins(&self) -> bool {
    !lock(&self.pending).is_empty()
  }

  pub(crate) fn take_pending_joins(&self) -> Vec<PendingJoin> {
    std::mem::take(&mut *lock(&self.pending))
  }

  /// Put unresolved bindings back in front of anything queued meanwhile.
  pub(crate) fn requeue_pending_joins(&self, mut joins: Vec<PendingJoin>) {
    let mut pending = lock(&self.pending);
    joins.append(&mut pending);
    *pending = joins;
  }

  pub(crate) fn throttle(&self) -> &RefreshThrottle {
    &self.throttle
  }
}

impl InstanceState {
  fn serialize(&self) -> Map<String, Value> {
    let mut out = self.attrs.clone();
    if let Some(access) = &self.custom_attributes {
      out.insert(
        "custom_attribute_values".to_string(),
        Value::Array(access.to_payload()),
      );
    }
    out
  }
}

impl fmt::Display for Instance {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.id() {
      Some(id) => write!(f, "{} {}", self.model.model_name(), id),
      None => write!(f, "{} (new)", self.model.model_name()),
    }
  }
}

impl fmt::Debug for Instance {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Instance")
      .field("model", &self.model.model_name())
      .field("attrs", &lock(&self.state).attrs)
      .finish_non_exhaustive()
  }
}
