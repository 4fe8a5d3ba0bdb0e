//! Server payload envelopes.
//!
//! Collections arrive as
//! `{ "<plural>_collection": { "<plural>": [ {...}, ... ] } }`, single
//! records either bare or wrapped as `{ "<singular>": {...} }`.

use serde::Deserialize;
use serde_json::{Map, Value};

use super::descriptor::ModelType;
use super::error::{ModelError, Result};

/// Paging metadata attached to `find_page` responses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Paging {
  pub total: Option<u64>,
  pub count: Option<u64>,
  pub next: Option<String>,
  pub prev: Option<String>,
}

fn into_object(value: Value) -> Result<Map<String, Value>> {
  match value {
    Value::Object(map) => Ok(map),
    other => Err(ModelError::InvalidPayload(format!(
      "expected an object, got {}",
      other
    ))),
  }
}

/// Unwrap a `{ "<plural>_collection": { "<plural>": [...] } }` envelope.
/// Bare arrays are taken as-is; a bare object is a one-element collection.
pub fn unwrap_named_collection(plural: &str, payload: Value) -> Result<Vec<Map<String, Value>>> {
  let items = match payload {
    Value::Null => return Ok(Vec::new()),
    Value::Array(items) => items,
    Value::Object(mut map) => match map.remove(&format!("{}_collection", plural)) {
      Some(Value::Object(mut collection)) => match collection.remove(plural) {
        Some(Value::Array(items)) => items,
        Some(Value::Null) | None => Vec::new(),
        Some(other) => {
          return Err(ModelError::InvalidPayload(format!(
            "'{}' is not a list: {}",
            plural, other
          )))
        }
      },
      Some(other) => {
        return Err(ModelError::InvalidPayload(format!(
          "'{}_collection' is not an object: {}",
          plural, other
        )))
      }
      None => vec![Value::Object(map)],
    },
    other => {
      return Err(ModelError::InvalidPayload(format!(
        "unexpected collection payload: {}",
        other
      )))
    }
  };

  items.into_iter().map(into_object).collect()
}

pub fn unwrap_collection(model: &ModelType, payload: Value) -> Result<Vec<Map<String, Value>>> {
  unwrap_named_collection(&model.names().table_plural, payload)
    .map(|items| items.into_iter().map(|item| unwrap_root(model, item)).collect())
}

/// Strip a `{ "<singular>": {...} }` wrapper if present.
fn unwrap_root(model: &ModelType, mut item: Map<String, Value>) -> Map<String, Value> {
  let singular = &model.names().table_singular;
  if item.len() == 1 && matches!(item.get(singular), Some(Value::Object(_))) {
    if let Some(Value::Object(inner)) = item.remove(singular) {
      return inner;
    }
  }
  item
}

/// A single record, bare or wrapped in its singular name.
pub fn unwrap_single(model: &ModelType, payload: Value) -> Result<Map<String, Value>> {
  match payload {
    Value::Null => Ok(Map::new()),
    other => into_object(other).map(|item| unwrap_root(model, item)),
  }
}

/// Paging block from a page response, at the top level or inside the
/// collection envelope.
pub fn paging(model: &ModelType, payload: &Value) -> Paging {
  let collection_key = format!("{}_collection", model.names().table_plural);
  payload
    .get("paging")
    .or_else(|| payload.get(&collection_key).and_then(|c| c.get("paging")))
    .and_then(|p| serde_json::from_value(p.clone()).ok())
    .unwrap_or_default()
}
