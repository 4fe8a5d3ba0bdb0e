//! Canonical names for a model type.
//!
//! A model type is configured with a `root_object` (`control`) and a
//! `root_collection` (`controls`). Everything else is derived from those two
//! tokens unless given explicitly:
//!
//! | name             | derived from      | example            |
//! |------------------|-------------------|--------------------|
//! | `model_singular` | `root_object`     | `AuditLog`         |
//! | `table_singular` | `root_object`     | `audit_log`        |
//! | `title_singular` | `root_object`     | `Audit Log`        |
//! | `model_plural`   | `root_collection` | `AuditLogs`        |
//! | `table_plural`   | `root_collection` | `audit_logs`       |
//! | `title_plural`   | `root_collection` | `Audit Logs`       |

use convert_case::{Case, Casing};
use serde::Deserialize;

/// Explicit names that take precedence over derivation.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct NameOverrides {
  pub model_singular: Option<String>,
  pub table_singular: Option<String>,
  pub title_singular: Option<String>,
  pub model_plural: Option<String>,
  pub table_plural: Option<String>,
  pub title_plural: Option<String>,
}

/// Fully resolved name set for a model type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelNames {
  pub model_singular: String,
  pub table_singular: String,
  pub title_singular: String,
  pub model_plural: String,
  pub table_plural: String,
  pub title_plural: String,
}

impl ModelNames {
  /// Resolve every name, preferring overrides verbatim.
  pub fn resolve(root_object: &str, root_collection: &str, overrides: &NameOverrides) -> Self {
    ModelNames {
      model_singular: pick(&overrides.model_singular, || camelize(root_object)),
      table_singular: pick(&overrides.table_singular, || root_object.to_string()),
      title_singular: pick(&overrides.title_singular, || humanize(root_object)),
      model_plural: pick(&overrides.model_plural, || camelize(root_collection)),
      table_plural: pick(&overrides.table_plural, || root_collection.to_string()),
      title_plural: pick(&overrides.title_plural, || humanize(root_collection)),
    }
  }
}

fn pick(explicit: &Option<String>, derive: impl FnOnce() -> String) -> String {
  explicit.clone().unwrap_or_else(derive)
}

/// `dummy_model` -> `DummyModel`
pub fn camelize(token: &str) -> String {
  token.to_case(Case::Pascal)
}

/// `dummy_model` -> `Dummy Model`
pub fn humanize(token: &str) -> String {
  token.to_case(Case::Title)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_derives_names_from_roots() {
    let names = ModelNames::resolve("dummy_model", "dummy_models", &NameOverrides::default());

    assert_eq!(names.model_singular, "DummyModel");
    assert_eq!(names.table_singular, "dummy_model");
    assert_eq!(names.title_singular, "Dummy Model");
    assert_eq!(names.model_plural, "DummyModels");
    assert_eq!(names.table_plural, "dummy_models");
    assert_eq!(names.title_plural, "Dummy Models");
  }

  #[test]
  fn test_overrides_win_over_roots() {
    let overrides = NameOverrides {
      model_singular: Some("RightName".into()),
      table_singular: Some("right_name".into()),
      title_singular: Some("Right Name".into()),
      model_plural: Some("RightNames".into()),
      table_plural: Some("right_names".into()),
      title_plural: Some("Right Names".into()),
    };

    let names = ModelNames::resolve("wrong_name", "wrong_names", &overrides);

    assert_eq!(names.model_singular, "RightName");
    assert_eq!(names.table_singular, "right_name");
    assert_eq!(names.title_singular, "Right Name");
    assert_eq!(names.model_plural, "RightNames");
    assert_eq!(names.table_plural, "right_names");
    assert_eq!(names.title_plural, "Right Names");
  }

  #[test]
  fn test_partial_overrides() {
    let overrides = NameOverrides {
      title_plural: Some("Policies & Procedures".into()),
      ..Default::default()
    };

    let names = ModelNames::resolve("policy", "policies", &overrides);

    assert_eq!(names.model_singular, "Policy");
    assert_eq!(names.model_plural, "Policies");
    assert_eq!(names.title_plural, "Policies & Procedures");
  }

  #[test]
  fn test_single_word_roots() {
    assert_eq!(camelize("control"), "Control");
    assert_eq!(humanize("control"), "Control");
    assert_eq!(camelize("org_group"), "OrgGroup");
    assert_eq!(humanize("access_control_list"), "Access Control List");
  }
}
