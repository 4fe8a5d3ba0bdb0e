//! Capability modules applied to model types by name during setup.

use std::sync::Arc;

use serde_json::Value;

use super::descriptor::{AttrType, ModelType};
use super::error::Result;

/// A named augmentation of a model type.
pub trait Mixin: Send + Sync {
  fn name(&self) -> &str;

  fn add_to(&self, model: &mut ModelType) -> Result<()>;
}

/// Records with a start and end date.
pub struct Timeboxed;

impl Mixin for Timeboxed {
  fn name(&self) -> &str {
    "timeboxed"
  }

  fn add_to(&self, model: &mut ModelType) -> Result<()> {
    model.add_attribute("start_date", AttrType::Date);
    model.add_attribute("end_date", AttrType::Date);
    Ok(())
  }
}

/// Records with primary and secondary contacts.
pub struct Contactable;

impl Mixin for Contactable {
  fn name(&self) -> &str {
    "contactable"
  }

  fn add_to(&self, model: &mut ModelType) -> Result<()> {
    model.add_attribute("contact", AttrType::Stub);
    model.add_attribute("secondary_contact", AttrType::Stub);
    Ok(())
  }
}

/// Records whose title must be unique; strips surrounding whitespace so the
/// server-side uniqueness check sees the canonical title.
pub struct UniqueTitle;

impl Mixin for UniqueTitle {
  fn name(&self) -> &str {
    "unique_title"
  }

  fn add_to(&self, model: &mut ModelType) -> Result<()> {
    model.add_process_args(Arc::new(|args| {
      if let Some(Value::String(title)) = args.get_mut("title") {
        let trimmed = title.trim().to_string();
        if trimmed.len() != title.len() {
          *title = trimmed;
        }
      }
    }));
    Ok(())
  }
}

/// Mixins available in every fresh registry.
pub fn builtin() -> Vec<Arc<dyn Mixin>> {
  vec![
    Arc::new(Timeboxed) as Arc<dyn Mixin>,
    Arc::new(Contactable),
    Arc::new(UniqueTitle),
  ]
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::{ModelError, Registry};
  use serde_json::{json, Map};
  use std::sync::Mutex;

  struct Recording {
    applied_to: Mutex<Vec<String>>,
  }

  impl Mixin for Recording {
    fn name(&self) -> &str {
      "dummyable"
    }

    fn add_to(&self, model: &mut ModelType) -> Result<()> {
      self
        .applied_to
        .lock()
        .unwrap()
        .push(model.model_name().to_string());
      Ok(())
    }
  }

  #[test]
  fn test_applies_mixins_by_name() {
    let registry = Registry::new();
    let recording = Arc::new(Recording {
      applied_to: Mutex::new(Vec::new()),
    });
    registry.register_mixin(recording.clone());

    ModelType::builder("dummy_model", "dummy_models")
      .mixin("dummyable")
      .setup(&registry)
      .unwrap();

    assert_eq!(*recording.applied_to.lock().unwrap(), vec!["DummyModel"]);
  }

  #[test]
  fn test_unknown_mixin_fails_setup() {
    let registry = Registry::new();
    let result = ModelType::builder("audit", "audits")
      .mixin("nonexistent")
      .setup(&registry);

    assert_eq!(
      result.unwrap_err(),
      ModelError::UnknownMixin("nonexistent".to_string())
    );
  }

  #[test]
  fn test_timeboxed_adds_dates() {
    let registry = Registry::new();
    let model = ModelType::builder("audit", "audits")
      .attribute("end_date", "datetime")
      .mixin("timeboxed")
      .setup(&registry)
      .unwrap();

    assert_eq!(model.attributes()["start_date"], AttrType::Date);
    // explicit declarations win over mixin additions
    assert_eq!(model.attributes()["end_date"], AttrType::Datetime);
  }

  #[test]
  fn test_unique_title_trims() {
    let registry = Registry::new();
    let model = ModelType::builder("program", "programs")
      .mixin("unique_title")
      .setup(&registry)
      .unwrap();

    let mut args = Map::new();
    args.insert("title".into(), json!("  My Program "));
    model.process_args(&mut args);

    assert_eq!(args["title"], json!("My Program"));
  }
}
