//! Custom attributes: server-declared definitions and the per-instance values
//! bound to them.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use super::error::{ModelError, Result};

/// A custom attribute declared by the server for one model type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomAttributeDefinition {
  #[serde(deserialize_with = "deserialize_id")]
  pub id: i64,
  #[serde(default)]
  pub title: String,
  #[serde(default = "default_attribute_type")]
  pub attribute_type: String,
  /// Table-singular name of the model type this definition belongs to
  #[serde(default)]
  pub definition_type: String,
  #[serde(default)]
  pub mandatory: bool,
  #[serde(default)]
  pub multi_choice_options: Option<String>,
  #[serde(default)]
  pub default_value: Option<Value>,
}

fn default_attribute_type() -> String {
  "Text".to_string()
}

impl CustomAttributeDefinition {
  pub fn new(id: i64) -> Self {
    Self {
      id,
      title: String::new(),
      attribute_type: default_attribute_type(),
      definition_type: String::new(),
      mandatory: false,
      multi_choice_options: None,
      default_value: None,
    }
  }

  /// Options of a dropdown definition.
  pub fn options(&self) -> Vec<&str> {
    self
      .multi_choice_options
      .as_deref()
      .map(|opts| opts.split(',').map(str::trim).collect())
      .unwrap_or_default()
  }
}

/// One stored value as it appears in `custom_attribute_values` payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomAttributeValue {
  #[serde(deserialize_with = "deserialize_id")]
  pub custom_attribute_id: i64,
  #[serde(default)]
  pub attribute_value: Value,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub attribute_object: Option<Value>,
}

impl CustomAttributeValue {
  pub fn new(custom_attribute_id: i64, attribute_value: impl Into<Value>) -> Self {
    Self {
      custom_attribute_id,
      attribute_value: attribute_value.into(),
      attribute_object: None,
    }
  }
}

/// Ids arrive as numbers or numeric strings.
fn deserialize_id<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
  D: Deserializer<'de>,
{
  match Value::deserialize(deserializer)? {
    Value::Number(n) => n
      .as_i64()
      .ok_or_else(|| serde::de::Error::custom(format!("invalid id {}", n))),
    Value::String(s) => s
      .trim()
      .parse()
      .map_err(|_| serde::de::Error::custom(format!("invalid id '{}'", s))),
    other => Err(serde::de::Error::custom(format!("invalid id {}", other))),
  }
}

/// Lookup key for a custom attribute: a definition id, a numeric string, or
/// a definition title.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaKey {
  Id(i64),
  Raw(String),
}

impl CaKey {
  pub fn resolve(&self) -> Option<i64> {
    match self {
      CaKey::Id(id) => Some(*id),
      CaKey::Raw(s) => s.trim().parse().ok(),
    }
  }
}

impl fmt::Display for CaKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      CaKey::Id(id) => write!(f, "{}", id),
      CaKey::Raw(s) => write!(f, "'{}'", s),
    }
  }
}

impl From<i64> for CaKey {
  fn from(id: i64) -> Self {
    CaKey::Id(id)
  }
}

impl From<i32> for CaKey {
  fn from(id: i32) -> Self {
    CaKey::Id(id.into())
  }
}

impl From<u64> for CaKey {
  fn from(id: u64) -> Self {
    i64::try_from(id)
      .map(CaKey::Id)
      .unwrap_or_else(|_| CaKey::Raw(id.to_string()))
  }
}

impl From<&str> for CaKey {
  fn from(s: &str) -> Self {
    CaKey::Raw(s.to_string())
  }
}

impl From<String> for CaKey {
  fn from(s: String) -> Self {
    CaKey::Raw(s)
  }
}

/// A definition paired with the value one instance holds for it.
#[derive(Debug, Clone, PartialEq)]
pub struct CustomAttributeObject {
  definition: Arc<CustomAttributeDefinition>,
  value: Value,
  attribute_object: Option<Value>,
}

impl CustomAttributeObject {
  pub fn new(definition: Arc<CustomAttributeDefinition>, stored: Option<&CustomAttributeValue>) -> Self {
    let (value, attribute_object) = match stored {
      Some(v) => (v.attribute_value.clone(), v.attribute_object.clone()),
      None => (definition.default_value.clone().unwrap_or(Value::Null), None),
    };

    Self {
      definition,
      value,
      attribute_object,
    }
  }

  /// Always equals the owning definition's id.
  pub fn custom_attribute_id(&self) -> i64 {
    self.definition.id
  }

  pub fn definition(&self) -> &CustomAttributeDefinition {
    &self.definition
  }

  pub fn title(&self) -> &str {
    &self.definition.title
  }

  pub fn attribute_type(&self) -> &str {
    &self.definition.attribute_type
  }

  pub fn value(&self) -> &Value {
    &self.value
  }

  pub fn set_value(&mut self, value: impl Into<Value>) {
    self.value = value.into();
  }

  /// Referenced record for person-typed attributes.
  pub fn attribute_object(&self) -> Option<&Value> {
    self.attribute_object.as_ref()
  }

  pub fn is_empty(&self) -> bool {
    match &self.value {
      Value::Null => true,
      Value::String(s) => s.trim().is_empty(),
      _ => false,
    }
  }

  /// Mandatory attributes must hold a value; dropdown values must be one of
  /// the definition's options.
  pub fn validate(&self) -> Result<()> {
    if self.is_empty() {
      if self.definition.mandatory {
        return Err(ModelError::Validation(format!(
          "custom attribute '{}' is mandatory",
          self.definition.title
        )));
      }
      return Ok(());
    }

    let options = self.definition.options();
    if self.definition.attribute_type == "Dropdown" && !options.is_empty() {
      if let Some(value) = self.value.as_str() {
        if !options.contains(&value.trim()) {
          return Err(ModelError::Validation(format!(
            "'{}' is not an option of custom attribute '{}'",
            value, self.definition.title
          )));
        }
      }
    }
    Ok(())
  }

  /// Serialized form sent back to the server.
  pub fn to_payload(&self) -> Value {
    let mut payload = json!({
      "custom_attribute_id": self.definition.id,
      "attribute_value": self.value,
    });
    if let Some(obj) = &self.attribute_object {
      payload["attribute_object"] = obj.clone();
    }
    payload
  }
}

/// All custom-attribute objects of one instance, one per definition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CustomAttributeAccess {
  objects: Vec<CustomAttributeObject>,
}

impl CustomAttributeAccess {
  pub fn new(
    definitions: &[Arc<CustomAttributeDefinition>],
    values: &[CustomAttributeValue],
  ) -> Self {
    let mut objects: Vec<CustomAttributeObject> = Vec::with_capacity(definitions.len());
    for definition in definitions {
      // a definition listed twice still yields a single object
      if objects.iter().any(|o| o.custom_attribute_id() == definition.id) {
        continue;
      }
      let stored = values
        .iter()
        .find(|v| v.custom_attribute_id == definition.id);
      objects.push(CustomAttributeObject::new(Arc::clone(definition), stored));
    }
    Self { objects }
  }

  pub fn get_all(&self) -> &[CustomAttributeObject] {
    &self.objects
  }

  /// Numeric keys match definition ids, anything else the title.
  fn position(&self, key: &CaKey) -> Option<usize> {
    match (key.resolve(), key) {
      (Some(id), _) => self.objects.iter().position(|o| o.custom_attribute_id() == id),
      (None, CaKey::Raw(title)) => {
        let title = title.trim();
        self.objects.iter().position(|o| !title.is_empty() && o.title() == title)
      }
      (None, CaKey::Id(_)) => None,
    }
  }

  pub fn get(&self, key: impl Into<CaKey>) -> Option<&CustomAttributeObject> {
    let index = self.position(&key.into())?;
    self.objects.get(index)
  }

  pub fn set(&mut self, key: impl Into<CaKey>, value: impl Into<Value>) -> Result<()> {
    let key = key.into();
    let index = self
      .position(&key)
      .ok_or_else(|| ModelError::UnknownCustomAttribute(key.to_string()))?;
    self.objects[index].set_value(value);
    Ok(())
  }

  /// Check every object before the owning record is saved.
  pub fn validate(&self) -> Result<()> {
    self.objects.iter().try_for_each(CustomAttributeObject::validate)
  }

  /// Apply a batch of stored values. Values for definitions this instance
  /// does not have are skipped, so the batch either applies or is ignored
  /// per entry and never fails halfway.
  pub fn update_ca_objects(&mut self, values: &[CustomAttributeValue]) {
    for value in values {
      match self
        .objects
        .iter_mut()
        .find(|o| o.custom_attribute_id() == value.custom_attribute_id)
      {
        Some(object) => {
          object.value = value.attribute_value.clone();
          object.attribute_object = value.attribute_object.clone();
        }
        None => debug!(
          custom_attribute_id = value.custom_attribute_id,
          "skipping value for unknown custom attribute"
        ),
      }
    }
  }

  /// `custom_attribute_values` payload for the whole set.
  pub fn to_payload(&self) -> Vec<Value> {
    self.objects.iter().map(CustomAttributeObject::to_payload).collect()
  }
}
