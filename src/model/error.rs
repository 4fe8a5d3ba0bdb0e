//! Error taxonomy for the model layer.

use thiserror::Error;

/// Errors raised by model types, instances and the store.
///
/// Kept `Clone` so that one throttled refresh can hand the same failure to
/// every caller that joined it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ModelError {
  /// A programming mistake, e.g. `find_all` on the base type.
  #[error("{0}")]
  Configuration(String),

  /// The REST call failed.
  #[error("{method} {url} failed{}: {message}", .status.map(|s| format!(" with status {}", s)).unwrap_or_default())]
  Transport {
    method: String,
    url: String,
    status: Option<u16>,
    message: String,
  },

  /// The server rejected an update because the record changed underneath us.
  #[error("Conflict updating {model} {id}")]
  Conflict { model: String, id: i64 },

  #[error("{0} is not custom attributable")]
  NotCustomAttributable(String),

  #[error("No custom attribute {0} on this instance")]
  UnknownCustomAttribute(String),

  #[error("Unknown mixin: {0}")]
  UnknownMixin(String),

  #[error("Unknown model type: {0}")]
  UnknownModel(String),

  #[error("Invalid endpoint '{template}': {reason}")]
  InvalidEndpoint { template: String, reason: String },

  /// A record failed client-side checks before being sent.
  #[error("{0}")]
  Validation(String),

  #[error("Invalid payload: {0}")]
  InvalidPayload(String),

  #[error("{0} instance has no id")]
  MissingId(String),
}

impl ModelError {
  /// Whether this is a failed network call rather than a caller mistake.
  pub fn is_transport(&self) -> bool {
    matches!(self, ModelError::Transport { .. } | ModelError::Conflict { .. })
  }
}

pub type Result<T, E = ModelError> = std::result::Result<T, E>;
