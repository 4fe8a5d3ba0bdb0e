//! Identity-mapped record models backed by a REST API.
//!
//! A [`ModelType`] describes one kind of record: its names, endpoints,
//! attribute coercions and capabilities. A [`Store`] loads and saves
//! [`Instance`]s of those types through a [`crate::transport::Transport`],
//! keeping at most one live instance per (type, id) so every list and every
//! lookup observes the same object.
//!
//! - Lists are populated in time-sliced batches ([`BatchedList`])
//! - Repeated refreshes of one instance are coalesced ([`RefreshThrottle`])
//! - Custom attributes are read and written by definition id or title

mod batch;
mod custom_attr;
mod descriptor;
mod error;
mod identity;
mod instance;
mod mixins;
mod payload;
mod pending;
mod registry;
mod store;
mod throttle;

pub use batch::{
  BatchedList, Clock, ListEvent, Materializer, Subscription, SystemClock, DEFAULT_BATCH_BUDGET,
};
pub use custom_attr::{
  CaKey, CustomAttributeAccess, CustomAttributeDefinition, CustomAttributeObject,
  CustomAttributeValue,
};
pub use descriptor::{
  ArgsHook, AttrType, Converter, Endpoint, Endpoints, ModelDecl, ModelType, ModelTypeBuilder,
};
pub use error::{ModelError, Result};
pub use identity::IdentityMap;
pub use instance::{Instance, InstanceRef, DEFAULT_REFRESH_THROTTLE};
pub use mixins::{Contactable, Mixin, Timeboxed, UniqueTitle};
pub use payload::Paging;
pub use pending::{JoinOp, PendingJoin};
pub use registry::Registry;
pub use store::{Page, Params, Store, StoreSettings};
pub use throttle::RefreshThrottle;
