//! Client-side record models for a GRC backend.
//!
//! See [`model`] for the model layer and [`transport`] for the REST
//! boundary it talks through.

pub mod config;
pub mod model;
pub mod naming;
pub mod transport;

pub use model::{Instance, InstanceRef, ModelError, ModelType, Registry, Store};
