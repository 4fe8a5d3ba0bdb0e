//! REST-backed operations over model types, sharing one identity map.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use super::batch::{BatchedList, Clock, Materializer, SystemClock, DEFAULT_BATCH_BUDGET};
use super::custom_attr::CustomAttributeDefinition;
use super::descriptor::{Converter, Endpoint, ModelType};
use super::error::{ModelError, Result};
use super::identity::IdentityMap;
use super::instance::{Instance, InstanceRef, DEFAULT_REFRESH_THROTTLE};
use super::payload::{self, Paging};
use super::pending::{JoinOp, PendingJoin};
use super::registry::Registry;
use crate::transport::{Method, RestRequest, Transport};

/// Query parameters for finders.
pub type Params = Vec<(String, String)>;

/// Tunables of a [`Store`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreSettings {
  /// How long one batch of a list may stay open before it is flushed
  pub batch_budget: Duration,
  /// Refreshes of one instance inside this window share a single request
  pub refresh_throttle: Duration,
}

impl Default for StoreSettings {
  fn default() -> Self {
    Self {
      batch_budget: DEFAULT_BATCH_BUDGET,
      refresh_throttle: DEFAULT_REFRESH_THROTTLE,
    }
  }
}

/// One page of a paginated finder.
#[derive(Clone)]
pub struct Page {
  pub items: BatchedList,
  pub paging: Paging,
}

/// Entry point for loading and saving model instances.
pub struct Store {
  transport: Arc<dyn Transport>,
  registry: Arc<Registry>,
  identity: IdentityMap,
  materializer: Materializer,
  settings: StoreSettings,
}

fn no_default(finder: &str) -> ModelError {
  ModelError::Configuration(format!(
    "No default {}() exists for subclasses of Cacheable",
    finder
  ))
}

/// Render an endpoint, consuming the parameters that fill placeholders and
/// returning the rest as the query string.
fn render_with_params(endpoint: &Endpoint, params: Params) -> Result<(String, Params)> {
  let values: Map<String, Value> = params
    .iter()
    .map(|(k, v)| (k.clone(), Value::String(v.clone())))
    .collect();
  let path = endpoint.render(&values)?;
  let query = params
    .into_iter()
    .filter(|(k, _)| !endpoint.template.contains(&format!("{{{}}}", k)))
    .collect();
  Ok((path, query))
}

impl Store {
  pub fn new(transport: Arc<dyn Transport>, registry: Arc<Registry>) -> Self {
    Self::with_settings(transport, registry, StoreSettings::default())
  }

  pub fn with_settings(
    transport: Arc<dyn Transport>,
    registry: Arc<Registry>,
    settings: StoreSettings,
  ) -> Self {
    Self {
      transport,
      registry,
      identity: IdentityMap::new(),
      materializer: Materializer::new(Arc::new(SystemClock::default()), settings.batch_budget),
      settings,
    }
  }

  /// Replace the clock used to slice list batches.
  pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.materializer = Materializer::new(clock, self.settings.batch_budget);
    self
  }

  pub fn registry(&self) -> &Arc<Registry> {
    &self.registry
  }

  pub fn identity(&self) -> &IdentityMap {
    &self.identity
  }

  pub fn settings(&self) -> StoreSettings {
    self.settings
  }

  fn build(
    &self,
    model: &Arc<ModelType>,
    attrs: Map<String, Value>,
    converters: &HashMap<String, Converter>,
  ) -> InstanceRef {
    let attrs = model.coerce(attrs, converters);
    self.identity.merge_or_insert(model, attrs, |attrs| {
      Instance::build(
        Arc::clone(model),
        attrs,
        self.registry.definitions_for(model),
        self.settings.refresh_throttle,
      )
    })
  }

  /// Get-or-create the identity-mapped instance for a raw record, merging
  /// the record into an existing instance.
  pub fn model(&self, model: &Arc<ModelType>, attrs: Map<String, Value>) -> InstanceRef {
    self.build(model, attrs, &self.registry.converters())
  }

  pub fn models(&self, model: &Arc<ModelType>, records: Vec<Map<String, Value>>) -> Vec<InstanceRef> {
    let converters = self.registry.converters();
    records
      .into_iter()
      .map(|attrs| self.build(model, attrs, &converters))
      .collect()
  }

  /// The instance for `(model, id)`, created as a bare stub if not loaded.
  pub fn get_or_stub(&self, model: &Arc<ModelType>, id: i64) -> InstanceRef {
    if let Some(instance) = self.identity.get(model, id) {
      return instance;
    }
    let mut attrs = Map::new();
    attrs.insert("id".to_string(), json!(id));
    attrs.insert(
      "href".to_string(),
      json!(format!("/api/{}/{}", model.root_collection(), id)),
    );
    self.model(model, attrs)
  }

  /// Resolve a `{ "type": ..., "id": ... }` reference without fetching.
  pub fn resolve_stub(&self, stub: &Value) -> Result<Option<InstanceRef>> {
    if stub.is_null() {
      return Ok(None);
    }
    let kind = stub
      .get("type")
      .and_then(Value::as_str)
      .ok_or_else(|| ModelError::InvalidPayload(format!("stub without type: {}", stub)))?;
    let id = match stub.get("id") {
      Some(Value::Number(n)) => n.as_i64(),
      Some(Value::String(s)) => s.trim().parse().ok(),
      _ => None,
    }
    .ok_or_else(|| ModelError::InvalidPayload(format!("stub without id: {}", stub)))?;

    let model = self.registry.find_model(kind)?;
    Ok(Some(self.get_or_stub(&model, id)))
  }

  /// Construct an instance from local attributes. With an id this is the
  /// identity-mapped instance for that id; without one it stays unregistered
  /// until it is created.
  pub fn new_instance(&self, model: &Arc<ModelType>, attrs: Map<String, Value>) -> InstanceRef {
    self.model(model, attrs)
  }

  /// Register `instance` under its id and return the instance that owns the
  /// identity. Bindings queued on a displaced duplicate move to the owner.
  fn adopt(&self, instance: &InstanceRef) -> InstanceRef {
    let owner = self.identity.adopt(instance);
    if !Arc::ptr_eq(&owner, instance) {
      for join in instance.take_pending_joins() {
        owner.defer_binding(join);
      }
    }
    owner
  }

  async fn send(&self, request: RestRequest) -> Result<Value> {
    self.transport.send(request).await
  }

  /// Fetch one record by id.
  pub async fn find_one(&self, model: &Arc<ModelType>, id: i64) -> Result<InstanceRef> {
    let endpoint = model
      .endpoints()
      .find_one
      .clone()
      .ok_or_else(|| no_default("findOne"))?;
    let (path, query) = render_with_params(&endpoint, vec![("id".to_string(), id.to_string())])?;

    let response = self
      .send(RestRequest::new(endpoint.method, path).with_query(query))
      .await?;
    let mut attrs = payload::unwrap_single(model, response)?;
    attrs.entry("id").or_insert(json!(id));

    let instance = self.model(model, attrs);
    instance.backup();
    Ok(instance)
  }

  /// Fetch a collection into a new list.
  ///
  /// Fails before any request is made when `model` is the base type or has
  /// no find-all endpoint.
  pub fn find_all(
    &self,
    model: &Arc<ModelType>,
    params: Params,
  ) -> Result<BoxFuture<'_, Result<BatchedList>>> {
    self.find_all_into(model, params, BatchedList::new())
  }

  /// Like [`Store::find_all`], populating a list the caller already observes.
  pub fn find_all_into(
    &self,
    model: &Arc<ModelType>,
    params: Params,
    list: BatchedList,
  ) -> Result<BoxFuture<'_, Result<BatchedList>>> {
    let endpoint = match model.endpoints().find_all.clone() {
      Some(endpoint) if !model.is_base() => endpoint,
      _ => return Err(no_default("findAll")),
    };
    let (path, query) = render_with_params(&endpoint, params)?;
    let model = Arc::clone(model);

    Ok(
      async move {
        debug!(model = model.model_name(), %path, "find_all");
        let response = self
          .send(RestRequest::new(endpoint.method, path).with_query(query))
          .await?;
        let records = payload::unwrap_collection(&model, response)?;
        self.populate(&model, records, &list).await;
        Ok::<_, ModelError>(list)
      }
      .boxed(),
    )
  }

  /// Fetch one page of a collection. There is no default page endpoint.
  pub fn find_page(
    &self,
    model: &Arc<ModelType>,
    params: Params,
  ) -> Result<BoxFuture<'_, Result<Page>>> {
    let endpoint = match model.endpoints().find_page.clone() {
      Some(endpoint) if !model.is_base() => endpoint,
      _ => return Err(no_default("findPage")),
    };
    let (path, query) = render_with_params(&endpoint, params)?;
    let model = Arc::clone(model);

    Ok(
      async move {
        debug!(model = model.model_name(), %path, "find_page");
        let response = self
          .send(RestRequest::new(endpoint.method, path).with_query(query))
          .await?;
        let paging = payload::paging(&model, &response);
        let records = payload::unwrap_collection(&model, response)?;
        let items = BatchedList::new();
        self.populate(&model, records, &items).await;
        Ok::<_, ModelError>(Page { items, paging })
      }
      .boxed(),
    )
  }

  async fn populate(&self, model: &Arc<ModelType>, records: Vec<Map<String, Value>>, list: &BatchedList) {
    let converters = self.registry.converters();
    self
      .materializer
      .populate(records, list, |attrs| self.build(model, attrs, &converters))
      .await;
  }

  fn outgoing(&self, model: &ModelType, attrs: Map<String, Value>) -> Map<String, Value> {
    let mut args = attrs;
    model.process_args(&mut args);
    args
  }

  fn wrap(model: &ModelType, args: &Map<String, Value>) -> Value {
    let mut body = Map::new();
    body.insert(
      model.names().table_singular.clone(),
      Value::Object(args.clone()),
    );
    Value::Object(body)
  }

  /// Update a record, then resolve bindings queued on it before returning.
  pub async fn update(
    &self,
    model: &Arc<ModelType>,
    id: i64,
    attrs: Map<String, Value>,
  ) -> Result<InstanceRef> {
    let endpoint = model
      .endpoints()
      .update
      .clone()
      .ok_or_else(|| no_default("update"))?;

    let mut args = self.outgoing(model, attrs);
    args.entry("id").or_insert(json!(id));
    let path = endpoint.render(&args)?;

    let request = RestRequest::new(endpoint.method, path).with_body(Self::wrap(model, &args));
    let response = self.send(request).await.map_err(|e| match e {
      ModelError::Transport {
        status: Some(409), ..
      } => ModelError::Conflict {
        model: model.model_name().to_string(),
        id,
      },
      other => other,
    })?;

    let mut saved = payload::unwrap_single(model, response)?;
    saved.entry("id").or_insert(json!(id));
    let instance = self.model(model, saved);
    instance.backup();
    info!(instance = %instance, "updated");

    self.resolve_deferred_bindings(&instance).await?;
    Ok(instance)
  }

  async fn post_new(&self, instance: &InstanceRef) -> Result<InstanceRef> {
    let model = Arc::clone(instance.model());
    let endpoint = model
      .endpoints()
      .create
      .clone()
      .ok_or_else(|| no_default("create"))?;

    let args = self.outgoing(&model, instance.serialize());
    let path = endpoint.render(&args)?;
    let request = RestRequest::new(endpoint.method, path).with_body(Self::wrap(&model, &args));
    let response = self.send(request).await?;

    let saved = payload::unwrap_single(&model, response)?;
    instance.merge(model.coerce(saved, &self.registry.converters()));
    let instance = self.adopt(instance);
    instance.backup();
    info!(instance = %instance, "created");
    Ok(instance)
  }

  /// Persist a new instance, then resolve bindings queued on it.
  pub async fn create(&self, instance: &InstanceRef) -> Result<InstanceRef> {
    instance.validate()?;
    let created = self.post_new(instance).await?;
    self.resolve_deferred_bindings(&created).await?;
    Ok(created)
  }

  /// Create or update depending on whether the instance has an id.
  ///
  /// Updates go to the identity-mapped instance for the id; bindings queued
  /// on `instance` are resolved there.
  pub async fn save(&self, instance: &InstanceRef) -> Result<InstanceRef> {
    instance.validate()?;
    match instance.id() {
      Some(id) => {
        let owner = self.adopt(instance);
        self.update(owner.model(), id, instance.serialize()).await
      }
      None => self.create(instance).await,
    }
  }

  /// Delete a record and evict it from the identity map.
  pub async fn destroy(&self, instance: &InstanceRef) -> Result<InstanceRef> {
    let model = instance.model();
    let endpoint = model
      .endpoints()
      .destroy
      .clone()
      .ok_or_else(|| no_default("destroy"))?;
    let id = instance
      .id()
      .ok_or_else(|| ModelError::MissingId(model.model_name().to_string()))?;

    let path = endpoint.render(&instance.attrs())?;
    self.send(RestRequest::new(endpoint.method, path)).await?;
    self.identity.evict(model, id);
    info!(instance = %instance, "destroyed");
    Ok(Arc::clone(instance))
  }

  /// Create or destroy the join records queued on `instance`.
  ///
  /// Bindings that could not be resolved are queued again.
  pub async fn resolve_deferred_bindings(&self, instance: &InstanceRef) -> Result<()> {
    let mut joins = instance.take_pending_joins().into_iter();

    while let Some(join) = joins.next() {
      if let Err(e) = self.resolve_join(instance, &join).await {
        warn!(instance = %instance, error = %e, "failed to resolve deferred binding");
        let mut unresolved = vec![join];
        unresolved.extend(joins);
        instance.requeue_pending_joins(unresolved);
        return Err(e);
      }
    }
    Ok(())
  }

  async fn resolve_join(&self, instance: &InstanceRef, join: &PendingJoin) -> Result<()> {
    match join.op {
      JoinOp::Add => {
        let mut attrs = join.extra.clone();
        attrs.insert("source".to_string(), instance.stub()?);
        attrs.insert("destination".to_string(), join.related.stub()?);
        let record = self.new_instance(&join.through, attrs);
        self.post_new(&record).await?;
      }
      JoinOp::Remove => {
        if let Some(record) = &join.join {
          self.destroy(record).await?;
        }
      }
    }
    debug!(instance = %instance, op = ?join.op, through = join.through.model_name(), "binding resolved");
    Ok(())
  }

  /// Re-fetch an instance from its `selfLink`/`href` and back it up.
  ///
  /// The identity-mapped instance for the id is the one refreshed and
  /// returned.
  ///
  /// Calls on the same instance inside the throttle window share one
  /// request and its outcome.
  pub async fn refresh(&self, instance: &InstanceRef) -> Result<InstanceRef> {
    let instance = &self.adopt(instance);
    let href = instance
      .self_link()
      .ok_or_else(|| ModelError::MissingId(instance.model().model_name().to_string()))?;

    let refresh = instance.throttle().run(|| {
      let request = self
        .transport
        .send(RestRequest::new(Method::Get, href));
      let model = Arc::clone(instance.model());
      let target = Arc::downgrade(instance);
      let converters = self.registry.converters();

      async move {
        let response = request.await?;
        let attrs = payload::unwrap_single(&model, response)?;
        if let Some(instance) = target.upgrade() {
          instance.merge(model.coerce(attrs, &converters));
          instance.backup();
        }
        Ok::<(), ModelError>(())
      }
      .boxed()
    });

    refresh.await?;
    Ok(Arc::clone(instance))
  }

  /// Load custom-attribute definitions into the registry.
  pub async fn load_custom_attribute_definitions(&self, endpoint: &str) -> Result<usize> {
    let endpoint = Endpoint::parse(endpoint)?;
    let path = endpoint.render(&Map::new())?;
    let response = self.send(RestRequest::new(endpoint.method, path)).await?;

    let definitions = payload::unwrap_named_collection("custom_attribute_definitions", response)?
      .into_iter()
      .map(|raw| {
        serde_json::from_value::<CustomAttributeDefinition>(Value::Object(raw))
          .map_err(|e| ModelError::InvalidPayload(e.to_string()))
      })
      .collect::<Result<Vec<_>>>()?;

    let count = definitions.len();
    self.registry.set_definitions(definitions);
    info!(count, "custom attribute definitions loaded");
    Ok(count)
  }
}
