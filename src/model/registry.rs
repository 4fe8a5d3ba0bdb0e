//! Process-wide registry of model types and the metadata shared between them.
//!
//! One [`Registry`] is created at application start and handed to every
//! [`Store`](super::Store). Tests create their own to stay isolated.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::debug;

use super::custom_attr::CustomAttributeDefinition;
use super::descriptor::{Converter, ModelType};
use super::error::{ModelError, Result};
use super::mixins::{self, Mixin};

pub struct Registry {
  /// Keyed by model-singular name (`Control`)
  types: RwLock<HashMap<String, Arc<ModelType>>>,
  custom_attributable: RwLock<BTreeSet<String>>,
  /// Keyed by definition type, the table-singular name (`control`)
  definitions: RwLock<HashMap<String, Vec<Arc<CustomAttributeDefinition>>>>,
  mixins: RwLock<HashMap<String, Arc<dyn Mixin>>>,
  converters: RwLock<HashMap<String, Converter>>,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
  lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
  lock.write().unwrap_or_else(|e| e.into_inner())
}

impl Default for Registry {
  fn default() -> Self {
    Self::new()
  }
}

impl Registry {
  /// Create a registry seeded with the built-in mixins.
  pub fn new() -> Self {
    let registry = Self {
      types: RwLock::new(HashMap::new()),
      custom_attributable: RwLock::new(BTreeSet::new()),
      definitions: RwLock::new(HashMap::new()),
      mixins: RwLock::new(HashMap::new()),
      converters: RwLock::new(HashMap::new()),
    };
    for mixin in mixins::builtin() {
      registry.register_mixin(mixin);
    }
    registry
  }

  /// Forget every type, definition and converter, and reset mixins to the
  /// built-in set.
  pub fn teardown(&self) {
    write(&self.types).clear();
    write(&self.custom_attributable).clear();
    write(&self.definitions).clear();
    write(&self.converters).clear();
    let mut mixins = write(&self.mixins);
    mixins.clear();
    for mixin in mixins::builtin() {
      mixins.insert(mixin.name().to_string(), mixin);
    }
  }

  pub fn register_type(&self, model: Arc<ModelType>) {
    let name = model.model_name().to_string();
    if model.is_custom_attributable() {
      write(&self.custom_attributable).insert(name.clone());
    }
    write(&self.types).insert(name, model);
  }

  /// Look up a type by its model-singular name.
  pub fn model(&self, name: &str) -> Result<Arc<ModelType>> {
    read(&self.types)
      .get(name)
      .cloned()
      .ok_or_else(|| ModelError::UnknownModel(name.to_string()))
  }

  /// Look up a type by model-singular, table-singular or table-plural name.
  pub fn find_model(&self, name: &str) -> Result<Arc<ModelType>> {
    let types = read(&self.types);
    if let Some(model) = types.get(name) {
      return Ok(Arc::clone(model));
    }
    types
      .values()
      .find(|m| m.names().table_singular == name || m.names().table_plural == name)
      .cloned()
      .ok_or_else(|| ModelError::UnknownModel(name.to_string()))
  }

  pub fn models(&self) -> Vec<Arc<ModelType>> {
    let mut models: Vec<_> = read(&self.types).values().cloned().collect();
    models.sort_by(|a, b| a.model_name().cmp(b.model_name()));
    models
  }

  /// Model-singular names of every custom-attributable type.
  pub fn custom_attributable_types(&self) -> Vec<String> {
    read(&self.custom_attributable).iter().cloned().collect()
  }

  /// Replace all custom-attribute definitions, grouped by definition type.
  pub fn set_definitions(&self, definitions: Vec<CustomAttributeDefinition>) {
    let mut grouped: HashMap<String, Vec<Arc<CustomAttributeDefinition>>> = HashMap::new();
    for definition in definitions {
      grouped
        .entry(definition.definition_type.clone())
        .or_default()
        .push(Arc::new(definition));
    }
    debug!(types = grouped.len(), "custom attribute definitions loaded");
    *write(&self.definitions) = grouped;
  }

  pub fn definitions_for(&self, model: &ModelType) -> Vec<Arc<CustomAttributeDefinition>> {
    read(&self.definitions)
      .get(&model.names().table_singular)
      .cloned()
      .unwrap_or_default()
  }

  pub fn register_mixin(&self, mixin: Arc<dyn Mixin>) {
    write(&self.mixins).insert(mixin.name().to_string(), mixin);
  }

  pub fn mixin(&self, name: &str) -> Result<Arc<dyn Mixin>> {
    read(&self.mixins)
      .get(name)
      .cloned()
      .ok_or_else(|| ModelError::UnknownMixin(name.to_string()))
  }

  pub fn register_converter<F>(&self, name: &str, convert: F)
  where
    F: Fn(serde_json::Value) -> serde_json::Value + Send + Sync + 'static,
  {
    write(&self.converters).insert(name.to_string(), Arc::new(convert));
  }

  pub fn converters(&self) -> HashMap<String, Converter> {
    read(&self.converters).clone()
  }
}
