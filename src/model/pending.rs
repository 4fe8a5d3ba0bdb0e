//! Relationship bindings queued on an instance until it can be persisted.
//!
//! A join record (for example a `Relationship` between a control and a
//! program) cannot be created while one side has no server id yet. Callers
//! queue the binding on the instance; the store creates or destroys the join
//! records right after the instance's next successful create or update.

use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use super::descriptor::ModelType;
use super::instance::InstanceRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOp {
  Add,
  Remove,
}

/// One queued binding.
#[derive(Clone)]
pub struct PendingJoin {
  pub op: JoinOp,
  /// The join model, e.g. `Relationship`
  pub through: Arc<ModelType>,
  /// The other side of the binding
  pub related: InstanceRef,
  /// Existing join record to destroy, for removals
  pub join: Option<InstanceRef>,
  /// Extra attributes for the join record
  pub extra: Map<String, Value>,
}

impl PendingJoin {
  pub fn add(through: Arc<ModelType>, related: InstanceRef) -> Self {
    Self {
      op: JoinOp::Add,
      through,
      related,
      join: None,
      extra: Map::new(),
    }
  }

  pub fn remove(through: Arc<ModelType>, related: InstanceRef, join: InstanceRef) -> Self {
    Self {
      op: JoinOp::Remove,
      through,
      related,
      join: Some(join),
      extra: Map::new(),
    }
  }

  pub fn with_extra(mut self, extra: Map<String, Value>) -> Self {
    self.extra = extra;
    self
  }
}

impl fmt::Debug for PendingJoin {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("PendingJoin")
      .field("op", &self.op)
      .field("through", &self.through.model_name())
      .field("related", &self.related.to_string())
      .finish_non_exhaustive()
  }
}
