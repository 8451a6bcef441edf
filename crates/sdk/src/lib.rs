//! # Keel SDK
//!
//! SDK for building stateful and stateless components that call each other
//! through typed method references.
//!
//! ## Overview
//!
//! Components are plain Rust types implementing one of the component traits
//! ([`KeyValueEntity`], [`EventSourcedEntity`], [`Workflow`], [`Action`],
//! [`TimedAction`] or [`View`]). Their handlers are ordinary methods that
//! return an [`Effect`] describing what should happen:
//!
//! 1. Components declare their handlers in `describe`
//! 2. A [`ComponentRegistry`] validates them and derives a descriptor each
//! 3. A [`ComponentClient`] resolves method references like
//!    `Counter::increase` against the registry and executes calls
//! 4. A [`ComponentRouter`] dispatches calls to live instances, applying the
//!    returned effects to their state
//!
//! ## Example
//!
//! ```rust,ignore
//! use keel_sdk::prelude::*;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Clone, Default, Message, Serialize, Deserialize)]
//! struct CounterState {
//!     value: i64,
//! }
//!
//! struct Counter;
//!
//! impl Counter {
//!     fn increase(&self, state: &CounterState, by: i64) -> Effect<i64, CounterState> {
//!         let value = state.value + by;
//!         update_state(CounterState { value }).then_reply(value)
//!     }
//! }
//!
//! impl KeyValueEntity for Counter {
//!     const COMPONENT_ID: &'static str = "counter";
//!     type State = CounterState;
//!
//!     fn empty_state(&self) -> CounterState {
//!         CounterState::default()
//!     }
//!
//!     fn describe(methods: &mut EntityMethods<Self, CounterState, CounterState>) {
//!         methods.command(Counter::increase);
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut registry = ComponentRegistry::builder();
//!     registry.register_key_value_entity(|_| Counter)?;
//!
//!     let router = ComponentRouter::new(Arc::new(registry.build()));
//!     let value = router
//!         .client()
//!         .for_key_value_entity("counter-1")
//!         .method(Counter::increase)?
//!         .invoke_async(10)
//!         .await?;
//!     assert_eq!(value, 10);
//!
//!     Ok(())
//! }
//! ```

#[macro_use]
mod macros;

extern crate self as keel_sdk;

pub use keel_sdk_macros::Message;

pub mod client;
pub mod codec;
pub mod component;
pub mod deferred;
pub mod descriptor;
pub mod effect;
pub mod error;
pub mod metadata;
pub mod method;
pub mod query;
pub mod registry;
pub mod router;
pub mod store;
pub mod timer;

pub use crate::client::{CallExecutor, ComponentClient};
pub use crate::codec::JsonCodec;
pub use crate::component::{
    Action, ComponentContext, EventSourcedEntity, KeyValueEntity, TimedAction, View, Workflow,
};
pub use crate::effect::Effect;
pub use crate::registry::ComponentRegistry;
pub use crate::router::ComponentRouter;

pub mod prelude {
    pub use std::sync::Arc;

    pub use crate::client::*;
    pub use crate::codec::{EncodedPayload, JsonCodec, Message};
    pub use crate::component::*;
    pub use crate::deferred::{ComponentCall, DeferredCall, Reply, ReplyBody};
    pub use crate::descriptor::{
        ActionMethods, ComponentDescriptor, ComponentKind, ComponentType, EntityMethods,
        ViewMethods,
    };
    pub use crate::effect::{
        Effect, QueryEffect, RowEffect, delete_entity, persist, persist_all, update_state,
    };
    pub use crate::error::*;
    pub use crate::metadata;
    pub use crate::metadata::Metadata;
    pub use crate::registry::{ComponentRegistry, RegistryBuilder};
    pub use crate::router::{ComponentRouter, RouterConfig};
    pub use crate::store::{MemoryRowStore, MemoryStateStore, RowStore, StateStore};
    pub use crate::timer::TimerScheduler;
    pub use keel_sdk_macros::Message;
}
