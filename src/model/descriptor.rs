//! Model type descriptors: names, attribute coercions, endpoints, mixins.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use super::error::{ModelError, Result};
use super::registry::Registry;
use crate::naming::{ModelNames, NameOverrides};
use crate::transport::Method;

/// Hook run over the outgoing attribute bag before a create or update.
pub type ArgsHook = Arc<dyn Fn(&mut Map<String, Value>) + Send + Sync>;

/// Named attribute converter for [`AttrType::Custom`].
pub type Converter = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// How an attribute value coming from the server is coerced.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum AttrType {
  Datetime,
  Date,
  Number,
  Boolean,
  Text,
  /// `{ "type": ..., "id": ... }` reference to another record
  Stub,
  Stubs,
  /// Looked up by name in the registry's converters
  Custom(String),
}

impl From<String> for AttrType {
  fn from(s: String) -> Self {
    match s.as_str() {
      "datetime" => AttrType::Datetime,
      "date" => AttrType::Date,
      "number" => AttrType::Number,
      "boolean" => AttrType::Boolean,
      "text" => AttrType::Text,
      "stub" => AttrType::Stub,
      "stubs" => AttrType::Stubs,
      _ => AttrType::Custom(s),
    }
  }
}

impl From<&str> for AttrType {
  fn from(s: &str) -> Self {
    AttrType::from(s.to_string())
  }
}

impl AttrType {
  /// Coerce a raw server value. Values that cannot be coerced are kept as-is.
  pub fn coerce(&self, value: Value, converters: &HashMap<String, Converter>) -> Value {
    if value.is_null() {
      return value;
    }

    match self {
      AttrType::Datetime => match value.as_str().and_then(parse_datetime) {
        Some(normalized) => Value::String(normalized),
        None => value,
      },
      AttrType::Date => match value.as_str().and_then(parse_date) {
        Some(normalized) => Value::String(normalized),
        None => value,
      },
      AttrType::Number => {
        let parsed = value.as_str().map(str::trim).and_then(|s| {
          s.parse::<i64>()
            .map(Value::from)
            .ok()
            .or_else(|| s.parse::<f64>().ok().map(Value::from))
        });
        parsed.unwrap_or(value)
      }
      AttrType::Boolean => match value.as_str() {
        Some("true") | Some("1") => Value::Bool(true),
        Some("false") | Some("0") | Some("") => Value::Bool(false),
        _ => value,
      },
      AttrType::Text | AttrType::Stub | AttrType::Stubs => value,
      AttrType::Custom(name) => match converters.get(name) {
        Some(convert) => convert(value),
        None => value,
      },
    }
  }
}

fn parse_datetime(s: &str) -> Option<String> {
  if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
    return Some(dt.with_timezone(&Utc).to_rfc3339_opts(SecondsFormat::Secs, true));
  }
  // The backend emits naive UTC timestamps
  ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"]
    .iter()
    .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
    .map(|dt| dt.and_utc().to_rfc3339_opts(SecondsFormat::Secs, true))
}

fn parse_date(s: &str) -> Option<String> {
  ["%Y-%m-%d", "%m/%d/%Y"]
    .iter()
    .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
    .map(|d| d.format("%Y-%m-%d").to_string())
}

/// A `"<METHOD> <path>"` endpoint template with `{name}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
  pub method: Method,
  pub template: String,
}

impl Endpoint {
  pub fn new(method: Method, template: impl Into<String>) -> Self {
    Self {
      method,
      template: template.into(),
    }
  }

  pub fn parse(line: &str) -> Result<Self> {
    let invalid = |reason: &str| ModelError::InvalidEndpoint {
      template: line.to_string(),
      reason: reason.to_string(),
    };

    let (method, path) = line
      .trim()
      .split_once(char::is_whitespace)
      .ok_or_else(|| invalid("expected '<METHOD> <path>'"))?;
    let method = Method::parse(method).ok_or_else(|| invalid("unknown HTTP method"))?;
    let path = path.trim();
    if path.is_empty() {
      return Err(invalid("empty path"));
    }

    Ok(Self::new(method, path))
  }

  /// Fill `{name}` placeholders from `values`.
  pub fn render(&self, values: &Map<String, Value>) -> Result<String> {
    let mut out = String::with_capacity(self.template.len());
    let mut rest = self.template.as_str();

    while let Some(open) = rest.find('{') {
      out.push_str(&rest[..open]);
      let close = rest[open..]
        .find('}')
        .map(|i| open + i)
        .ok_or_else(|| ModelError::InvalidEndpoint {
          template: self.template.clone(),
          reason: "unclosed placeholder".to_string(),
        })?;
      let name = &rest[open + 1..close];
      let value = match values.get(name) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => {
          return Err(ModelError::InvalidEndpoint {
            template: self.template.clone(),
            reason: format!("no value for placeholder '{}'", name),
          })
        }
      };
      out.push_str(&value);
      rest = &rest[close + 1..];
    }
    out.push_str(rest);

    Ok(out)
  }
}

impl fmt::Display for Endpoint {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} {}", self.method, self.template)
  }
}

/// REST endpoints of a model type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Endpoints {
  pub find_one: Option<Endpoint>,
  pub find_all: Option<Endpoint>,
  pub find_page: Option<Endpoint>,
  pub create: Option<Endpoint>,
  pub update: Option<Endpoint>,
  pub destroy: Option<Endpoint>,
}

/// Static description of one model type, produced by [`ModelTypeBuilder::setup`].
pub struct ModelType {
  names: ModelNames,
  root_object: String,
  root_collection: String,
  attributes: BTreeMap<String, AttrType>,
  mixins: Vec<String>,
  custom_attributable: bool,
  endpoints: Endpoints,
  process_args: Vec<ArgsHook>,
  base: bool,
}

impl fmt::Debug for ModelType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ModelType")
      .field("names", &self.names)
      .field("attributes", &self.attributes)
      .field("mixins", &self.mixins)
      .field("custom_attributable", &self.custom_attributable)
      .field("endpoints", &self.endpoints)
      .finish_non_exhaustive()
  }
}

impl ModelType {
  /// The abstract base type. It has no endpoints, so finders fail on it.
  pub fn base() -> Arc<Self> {
    Arc::new(ModelType {
      names: ModelNames::resolve("cacheable", "cacheables", &NameOverrides::default()),
      root_object: "cacheable".to_string(),
      root_collection: "cacheables".to_string(),
      attributes: default_attributes(),
      mixins: Vec::new(),
      custom_attributable: false,
      endpoints: Endpoints::default(),
      process_args: Vec::new(),
      base: true,
    })
  }

  pub fn builder(root_object: &str, root_collection: &str) -> ModelTypeBuilder {
    ModelTypeBuilder::new(root_object, root_collection)
  }

  pub fn names(&self) -> &ModelNames {
    &self.names
  }

  /// CamelCase singular name, e.g. `Control`. Used as the `type` of stubs.
  pub fn model_name(&self) -> &str {
    &self.names.model_singular
  }

  pub fn root_object(&self) -> &str {
    &self.root_object
  }

  pub fn root_collection(&self) -> &str {
    &self.root_collection
  }

  pub fn attributes(&self) -> &BTreeMap<String, AttrType> {
    &self.attributes
  }

  pub fn mixins(&self) -> &[String] {
    &self.mixins
  }

  pub fn endpoints(&self) -> &Endpoints {
    &self.endpoints
  }

  pub fn is_base(&self) -> bool {
    self.base
  }

  pub fn is_custom_attributable(&self) -> bool {
    self.custom_attributable
  }

  /// Add an attribute coercion unless one is already declared.
  pub fn add_attribute(&mut self, name: &str, attr_type: AttrType) {
    self.attributes.entry(name.to_string()).or_insert(attr_type);
  }

  pub fn add_process_args(&mut self, hook: ArgsHook) {
    self.process_args.push(hook);
  }

  /// Run every `process_args` hook over an outgoing payload.
  pub fn process_args(&self, args: &mut Map<String, Value>) {
    for hook in &self.process_args {
      hook(args);
    }
  }

  /// Coerce every declared attribute in a raw attribute bag.
  pub fn coerce(
    &self,
    mut attrs: Map<String, Value>,
    converters: &HashMap<String, Converter>,
  ) -> Map<String, Value> {
    for (name, attr_type) in &self.attributes {
      if let Some(value) = attrs.remove(name) {
        attrs.insert(name.clone(), attr_type.coerce(value, converters));
      }
    }
    attrs
  }
}

fn default_attributes() -> BTreeMap<String, AttrType> {
  BTreeMap::from([
    ("created_at".to_string(), AttrType::Datetime),
    ("updated_at".to_string(), AttrType::Datetime),
  ])
}

/// Declaration of a model type, as found in configuration files.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelDecl {
  pub root_object: String,
  pub root_collection: String,
  #[serde(default, flatten)]
  pub names: NameOverrides,
  #[serde(default)]
  pub attributes: BTreeMap<String, AttrType>,
  #[serde(default)]
  pub mixins: Vec<String>,
  #[serde(default)]
  pub custom_attributable: bool,
  pub find_one: Option<String>,
  pub find_all: Option<String>,
  pub find_page: Option<String>,
  pub create: Option<String>,
  pub update: Option<String>,
  pub destroy: Option<String>,
}

/// Builder for [`ModelType`].
pub struct ModelTypeBuilder {
  decl: ModelDecl,
  process_args: Vec<ArgsHook>,
}

impl From<ModelDecl> for ModelTypeBuilder {
  fn from(decl: ModelDecl) -> Self {
    Self {
      decl,
      process_args: Vec::new(),
    }
  }
}

impl ModelTypeBuilder {
  pub fn new(root_object: &str, root_collection: &str) -> Self {
    ModelDecl {
      root_object: root_object.to_string(),
      root_collection: root_collection.to_string(),
      ..Default::default()
    }
    .into()
  }

  pub fn names(mut self, names: NameOverrides) -> Self {
    self.decl.names = names;
    self
  }

  pub fn attribute(mut self, name: &str, attr_type: impl Into<AttrType>) -> Self {
    self.decl.attributes.insert(name.to_string(), attr_type.into());
    self
  }

  pub fn mixin(mut self, name: &str) -> Self {
    self.decl.mixins.push(name.to_string());
    self
  }

  pub fn custom_attributable(mut self, yes: bool) -> Self {
    self.decl.custom_attributable = yes;
    self
  }

  pub fn find_one(mut self, endpoint: &str) -> Self {
    self.decl.find_one = Some(endpoint.to_string());
    self
  }

  pub fn find_all(mut self, endpoint: &str) -> Self {
    self.decl.find_all = Some(endpoint.to_string());
    self
  }

  pub fn find_page(mut self, endpoint: &str) -> Self {
    self.decl.find_page = Some(endpoint.to_string());
    self
  }

  pub fn create(mut self, endpoint: &str) -> Self {
    self.decl.create = Some(endpoint.to_string());
    self
  }

  pub fn update(mut self, endpoint: &str) -> Self {
    self.decl.update = Some(endpoint.to_string());
    self
  }

  pub fn destroy(mut self, endpoint: &str) -> Self {
    self.decl.destroy = Some(endpoint.to_string());
    self
  }

  pub fn process_args<F>(mut self, hook: F) -> Self
  where
    F: Fn(&mut Map<String, Value>) + Send + Sync + 'static,
  {
    self.process_args.push(Arc::new(hook));
    self
  }

  /// Finish the type and register it.
  ///
  /// Merges the default `created_at`/`updated_at` coercions under the
  /// declared ones, fills in default endpoints, applies mixins in order and
  /// records custom-attributable types in the registry.
  pub fn setup(self, registry: &Registry) -> Result<Arc<ModelType>> {
    let decl = self.decl;
    let names = ModelNames::resolve(&decl.root_object, &decl.root_collection, &decl.names);

    let mut attributes = default_attributes();
    attributes.extend(decl.attributes);

    let collection_path = format!("/api/{}", decl.root_collection);
    let parse = |explicit: &Option<String>, default: Option<Endpoint>| -> Result<Option<Endpoint>> {
      match explicit {
        Some(line) => Endpoint::parse(line).map(Some),
        None => Ok(default),
      }
    };
    let endpoints = Endpoints {
      find_one: parse(
        &decl.find_one,
        Some(Endpoint::new(Method::Get, format!("{}/{{id}}", collection_path))),
      )?,
      find_all: parse(
        &decl.find_all,
        Some(Endpoint::new(Method::Get, collection_path.clone())),
      )?,
      find_page: parse(&decl.find_page, None)?,
      create: parse(
        &decl.create,
        Some(Endpoint::new(Method::Post, collection_path.clone())),
      )?,
      update: parse(
        &decl.update,
        Some(Endpoint::new(Method::Put, format!("{}/{{id}}", collection_path))),
      )?,
      destroy: parse(
        &decl.destroy,
        Some(Endpoint::new(Method::Delete, format!("{}/{{id}}", collection_path))),
      )?,
    };

    let mut model = ModelType {
      names,
      root_object: decl.root_object,
      root_collection: decl.root_collection,
      attributes,
      mixins: decl.mixins,
      custom_attributable: decl.custom_attributable,
      endpoints,
      process_args: self.process_args,
      base: false,
    };

    for name in model.mixins.clone() {
      let mixin = registry.mixin(&name)?;
      mixin.add_to(&mut model)?;
    }

    let model = Arc::new(model);
    registry.register_type(Arc::clone(&model));
    debug!(model = model.model_name(), "model type set up");

    Ok(model)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn dummy(registry: &Registry) -> Arc<ModelType> {
    ModelType::builder("dummy_model", "dummy_models")
      .find_one("GET /api/dummy_models/{id}")
      .find_all("GET /api/dummy_models/")
      .update("PUT /api/dummy_models/{id}")
      .attribute("dummy_attribute", "dummy_convert")
      .custom_attributable(true)
      .setup(registry)
      .unwrap()
  }

  #[test]
  fn test_merges_default_attributes() {
    let registry = Registry::new();
    let model = dummy(&registry);

    let expected = BTreeMap::from([
      ("created_at".to_string(), AttrType::Datetime),
      ("updated_at".to_string(), AttrType::Datetime),
      (
        "dummy_attribute".to_string(),
        AttrType::Custom("dummy_convert".to_string()),
      ),
    ]);
    assert_eq!(model.attributes(), &expected);
  }

  #[test]
  fn test_explicit_attributes_are_not_overwritten() {
    let registry = Registry::new();
    let model = ModelType::builder("audit", "audits")
      .attribute("updated_at", "date")
      .setup(&registry)
      .unwrap();

    assert_eq!(model.attributes()["updated_at"], AttrType::Date);
    assert_eq!(model.attributes()["created_at"], AttrType::Datetime);
  }

  #[test]
  fn test_find_all_defaults_to_root_collection() {
    let registry = Registry::new();
    let model = ModelType::builder("foo", "foos").setup(&registry).unwrap();

    assert_eq!(
      model.endpoints().find_all,
      Some(Endpoint::new(Method::Get, "/api/foos"))
    );
    assert_eq!(model.endpoints().find_page, None);
  }

  #[test]
  fn test_explicit_endpoints_are_kept() {
    let registry = Registry::new();
    let model = dummy(&registry);

    assert_eq!(
      model.endpoints().find_all.as_ref().map(|e| e.to_string()),
      Some("GET /api/dummy_models/".to_string())
    );
  }

  #[test]
  fn test_invalid_endpoint_fails_setup() {
    let registry = Registry::new();
    let result = ModelType::builder("foo", "foos")
      .find_one("FETCH /api/foos/{id}")
      .setup(&registry);

    assert!(matches!(result, Err(ModelError::InvalidEndpoint { .. })));
  }

  #[test]
  fn test_endpoint_render() {
    let endpoint = Endpoint::parse("GET /api/audits/{id}/snapshots/{kind}").unwrap();
    let values = json!({"id": 4, "kind": "control"});

    assert_eq!(
      endpoint.render(values.as_object().unwrap()).unwrap(),
      "/api/audits/4/snapshots/control"
    );
    assert!(endpoint.render(&Map::new()).is_err());
  }

  #[test]
  fn test_coercions() {
    let converters = HashMap::new();

    assert_eq!(
      AttrType::Datetime.coerce(json!("2018-03-01T10:20:30"), &converters),
      json!("2018-03-01T10:20:30Z")
    );
    assert_eq!(
      AttrType::Date.coerce(json!("03/01/2018"), &converters),
      json!("2018-03-01")
    );
    assert_eq!(AttrType::Number.coerce(json!("42"), &converters), json!(42));
    assert_eq!(AttrType::Boolean.coerce(json!("1"), &converters), json!(true));
    assert_eq!(
      AttrType::Datetime.coerce(json!("not a date"), &converters),
      json!("not a date")
    );
    assert_eq!(AttrType::Datetime.coerce(Value::Null, &converters), Value::Null);
  }

  #[test]
  fn test_custom_converter() {
    let mut converters: HashMap<String, Converter> = HashMap::new();
    converters.insert(
      "upper".to_string(),
      Arc::new(|v: Value| json!(v.as_str().unwrap_or_default().to_uppercase())),
    );

    let attr = AttrType::from("upper");
    assert_eq!(attr.coerce(json!("low"), &converters), json!("LOW"));
    assert_eq!(
      AttrType::from("missing").coerce(json!("low"), &converters),
      json!("low")
    );
  }

  #[test]
  fn test_process_args_hooks_run_in_order() {
    let registry = Registry::new();
    let model = ModelType::builder("foo", "foos")
      .process_args(|args| {
        args.insert("step".into(), json!(1));
      })
      .process_args(|args| {
        let step = args["step"].as_i64().unwrap_or_default();
        args.insert("step".into(), json!(step + 1));
      })
      .setup(&registry)
      .unwrap();

    let mut args = Map::new();
    model.process_args(&mut args);
    assert_eq!(args["step"], json!(2));
  }
}
