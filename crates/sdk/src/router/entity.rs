//! Dispatch to stateful components: key-value entities, event sourced
//! entities and workflows.
//!
//! The three kinds only differ in how state is recovered and committed,
//! which is captured by [`Sourcing`].

use std::{
    future::Future,
    marker::PhantomData,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
};

use futures_util::{FutureExt, future::BoxFuture};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error};

use super::{Dispatcher, RouterEnv, Settled, encoded_reply, invoke, panic_message, settle};
use crate::{
    codec::{EncodedPayload, Message},
    component::{EventSourcedEntity, KeyValueEntity, Workflow},
    deferred::{ComponentCall, Reply},
    descriptor::{ComponentDescriptor, EntityHandlers, ErasedCommand},
    error::{DecodeError, DispatchError, EncodeError, ErrorReply, StoreError},
    registry::Factory,
    store::StateKey,
};

#[derive(Debug, Error)]
pub(crate) enum SourcingError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("applying an event panicked: {0}")]
    Panicked(String),
}

/// How an entity kind persists its state.
pub(crate) trait Sourcing<C>: Send + Sync + 'static {
    type State: Message + Clone;
    type Update: Send + 'static;

    /// Rebuilds the state of `key` from the store.
    fn recover(
        component: &C,
        env: &RouterEnv,
        key: &StateKey,
    ) -> impl Future<Output = Result<Self::State, SourcingError>> + Send;

    /// Persists `update` and returns the resulting state.
    fn commit(
        component: &C,
        env: &RouterEnv,
        key: &StateKey,
        state: &Self::State,
        update: Self::Update,
    ) -> impl Future<Output = Result<Self::State, SourcingError>> + Send;

    fn delete(env: &RouterEnv, key: &StateKey) -> impl Future<Output = Result<(), StoreError>> + Send;
}

async fn load_snapshot<S: Message>(
    env: &RouterEnv,
    key: &StateKey,
) -> Result<Option<S>, SourcingError> {
    match env.state_store.load_snapshot(key).await? {
        Some(snapshot) => Ok(Some(env.registry.codec().decode(&snapshot)?)),
        None => Ok(None),
    }
}

async fn save_snapshot<S: Message>(
    env: &RouterEnv,
    key: &StateKey,
    state: &S,
) -> Result<(), SourcingError> {
    let snapshot = env.registry.codec().encode(state)?;
    env.state_store.save_snapshot(key, snapshot).await?;
    Ok(())
}

/// Key-value entities: the whole state is saved on every update and fed to
/// the views consuming the entity.
pub(crate) struct KvSnapshot;

impl<C: KeyValueEntity> Sourcing<C> for KvSnapshot {
    type State = C::State;
    type Update = C::State;

    fn recover(
        component: &C,
        env: &RouterEnv,
        key: &StateKey,
    ) -> impl Future<Output = Result<C::State, SourcingError>> + Send {
        async move {
            let state = load_snapshot::<C::State>(env, key).await?;
            Ok::<_, SourcingError>(state.unwrap_or_else(|| component.empty_state()))
        }
    }

    fn commit(
        _component: &C,
        env: &RouterEnv,
        key: &StateKey,
        _state: &C::State,
        update: C::State,
    ) -> impl Future<Output = Result<C::State, SourcingError>> + Send {
        async move {
            save_snapshot(env, key, &update).await?;
            env.publish_update(C::COMPONENT_ID, &key.entity_id, &update)
                .await;
            Ok::<_, SourcingError>(update)
        }
    }

    fn delete(env: &RouterEnv, key: &StateKey) -> impl Future<Output = Result<(), StoreError>> + Send {
        async move {
            env.state_store.delete(key).await?;
            env.publish_delete(C::COMPONENT_ID, &key.entity_id).await;
            Ok::<_, StoreError>(())
        }
    }
}

/// Workflows: snapshot persistence without view feeds.
pub(crate) struct WorkflowSnapshot;

impl<C: Workflow> Sourcing<C> for WorkflowSnapshot {
    type State = C::State;
    type Update = C::State;

    fn recover(
        component: &C,
        env: &RouterEnv,
        key: &StateKey,
    ) -> impl Future<Output = Result<C::State, SourcingError>> + Send {
        async move {
            let state = load_snapshot::<C::State>(env, key).await?;
            Ok::<_, SourcingError>(state.unwrap_or_else(|| component.empty_state()))
        }
    }

    fn commit(
        _component: &C,
        env: &RouterEnv,
        key: &StateKey,
        _state: &C::State,
        update: C::State,
    ) -> impl Future<Output = Result<C::State, SourcingError>> + Send {
        async move {
            save_snapshot(env, key, &update).await?;
            Ok::<_, SourcingError>(update)
        }
    }

    fn delete(env: &RouterEnv, key: &StateKey) -> impl Future<Output = Result<(), StoreError>> + Send {
        env.state_store.delete(key)
    }
}

/// Event sourced entities: events are appended to a journal and the state is
/// their fold over the empty state.
pub(crate) struct Journal;

impl Journal {
    fn fold<'a, C: EventSourcedEntity>(
        component: &C,
        state: C::State,
        events: impl IntoIterator<Item = &'a C::Event>,
    ) -> Result<C::State, SourcingError> {
        catch_unwind(AssertUnwindSafe(|| {
            events
                .into_iter()
                .fold(state, |state, event| component.apply_event(state, event))
        }))
        .map_err(|panic| SourcingError::Panicked(panic_message(&*panic)))
    }
}

impl<C: EventSourcedEntity> Sourcing<C> for Journal {
    type State = C::State;
    type Update = Vec<C::Event>;

    fn recover(
        component: &C,
        env: &RouterEnv,
        key: &StateKey,
    ) -> impl Future<Output = Result<C::State, SourcingError>> + Send {
        async move {
            let journal = env.state_store.load_events(key).await?;
            let events = journal
                .iter()
                .map(|payload| env.registry.codec().decode::<C::Event>(payload))
                .collect::<Result<Vec<_>, _>>()?;
            debug!(events = events.len(), "replaying journal");
            let state = Journal::fold(component, component.empty_state(), &events)?;
            Ok::<_, SourcingError>(state)
        }
    }

    fn commit(
        component: &C,
        env: &RouterEnv,
        key: &StateKey,
        state: &C::State,
        events: Vec<C::Event>,
    ) -> impl Future<Output = Result<C::State, SourcingError>> + Send {
        async move {
            // Fold before appending so a failing event handler persists nothing.
            let next = Journal::fold(component, state.clone(), &events)?;
            let encoded = events
                .iter()
                .map(|event| env.registry.codec().encode(event))
                .collect::<Result<Vec<EncodedPayload>, _>>()?;
            env.state_store.append_events(key, encoded).await?;
            Ok::<_, SourcingError>(next)
        }
    }

    fn delete(env: &RouterEnv, key: &StateKey) -> impl Future<Output = Result<(), StoreError>> + Send {
        env.state_store.delete(key)
    }
}

struct Instance<C, S> {
    component: C,
    state: S,
}

/// The live instance of one entity id. `active` turns false once the slot
/// is evicted, so callers that were waiting on it retry with a fresh slot.
struct Slot<C, S> {
    instance: Option<Instance<C, S>>,
    active: bool,
}

type SlotCell<C, S> = Mutex<Slot<C, S>>;

enum Outcome {
    Keep,
    Deleted,
}

pub(crate) struct EntityDispatcher<C, M: Sourcing<C>> {
    descriptor: Arc<ComponentDescriptor>,
    factory: Factory<C>,
    handlers: EntityHandlers<C, M::State, M::Update>,
    _sourcing: PhantomData<fn() -> M>,
}

impl<C, M> EntityDispatcher<C, M>
where
    C: Send + Sync + 'static,
    M: Sourcing<C>,
{
    pub(crate) fn new(
        descriptor: Arc<ComponentDescriptor>,
        factory: Factory<C>,
        handlers: EntityHandlers<C, M::State, M::Update>,
    ) -> Self {
        Self {
            descriptor,
            factory,
            handlers,
            _sourcing: PhantomData,
        }
    }

    async fn handle(&self, env: Arc<RouterEnv>, call: ComponentCall) -> Reply {
        let component_type = self.descriptor.component_type();
        let Some(id) = call.component_id.clone() else {
            return Reply::error(DispatchError::MissingComponentId(component_type.to_string()));
        };
        let Some(handler) = self.handlers.get(&call.method_name) else {
            return Reply::error(DispatchError::MethodNotFound {
                component: component_type.to_string(),
                method: call.method_name,
            });
        };
        let key = StateKey::new(&component_type, &id);
        let cache_key = (component_type, id);

        loop {
            let cell = env.instances.get_or_insert_with(cache_key.clone(), || {
                SlotCell::<C, M::State>::new(Slot {
                    instance: None,
                    active: true,
                })
            });
            let mut slot = cell.lock().await;
            if !slot.active {
                continue;
            }

            let mut instance = match slot.instance.take() {
                Some(instance) => instance,
                None => match self.activate(&env, &key).await {
                    Ok(instance) => instance,
                    Err(reply) => return reply,
                },
            };

            let (reply, outcome) = self.run(&env, &mut instance, &key, &call, handler).await;
            match outcome {
                Outcome::Keep => slot.instance = Some(instance),
                Outcome::Deleted => {
                    slot.active = false;
                    env.instances.remove(&cache_key, &cell);
                }
            }
            return reply;
        }
    }

    async fn activate(
        &self,
        env: &RouterEnv,
        key: &StateKey,
    ) -> Result<Instance<C, M::State>, Reply> {
        let context = env.context(Some(key.entity_id.clone()));
        let component = catch_unwind(AssertUnwindSafe(|| (self.factory)(&context))).map_err(|panic| {
            let message = panic_message(&*panic);
            error!(panic = %message, "component factory panicked");
            Reply::error(ErrorReply::internal(format!(
                "creating `{}` panicked: {message}",
                self.descriptor.component_id()
            )))
        })?;

        let state = M::recover(&component, env, key).await.map_err(|err| {
            error!(error = %err, "failed to recover entity state");
            Reply::error(DispatchError::Recovery {
                component: self.descriptor.component_id().to_string(),
                id: key.entity_id.clone(),
                message: err.to_string(),
            })
        })?;

        debug!("activated entity");
        Ok(Instance { component, state })
    }

    async fn run(
        &self,
        env: &RouterEnv,
        instance: &mut Instance<C, M::State>,
        key: &StateKey,
        call: &ComponentCall,
        handler: &ErasedCommand<C, M::State, M::Update>,
    ) -> (Reply, Outcome) {
        let codec = env.registry.codec();
        let effect = match invoke(&call.method_name, || {
            handler(&instance.component, &instance.state, &call.payload, codec)
        }) {
            Ok(effect) => effect,
            Err(err) => return (Reply::error(err), Outcome::Keep),
        };

        match settle(effect, env.config.async_reply_timeout).await {
            Settled::Reply { value, metadata } => (encoded_reply(value, metadata), Outcome::Keep),
            Settled::Update {
                update,
                value,
                metadata,
            } => {
                // The reply is encoded first: nothing is committed for a call
                // that cannot answer.
                let payload = match value {
                    Ok(payload) => payload,
                    Err(err) => return (encoded_reply(Err(err), metadata), Outcome::Keep),
                };
                match M::commit(&instance.component, env, key, &instance.state, update).await {
                    Ok(state) => {
                        instance.state = state;
                        (Reply::ok(payload, metadata), Outcome::Keep)
                    }
                    Err(err) => {
                        error!(error = %err, "failed to commit entity state");
                        (
                            Reply::error(ErrorReply::internal(format!(
                                "failed to commit state: {err}"
                            ))),
                            Outcome::Keep,
                        )
                    }
                }
            }
            Settled::Delete { value, metadata } => {
                let payload = match value {
                    Ok(payload) => payload,
                    Err(err) => return (encoded_reply(Err(err), metadata), Outcome::Keep),
                };
                match M::delete(env, key).await {
                    Ok(()) => {
                        debug!("entity deleted");
                        (Reply::ok(payload, metadata), Outcome::Deleted)
                    }
                    Err(err) => {
                        error!(error = %err, "failed to delete entity");
                        (
                            Reply::error(ErrorReply::internal(format!(
                                "failed to delete entity: {err}"
                            ))),
                            Outcome::Keep,
                        )
                    }
                }
            }
            Settled::Error(err) => (Reply::error(err), Outcome::Keep),
        }
    }
}

impl<C, M> Dispatcher for EntityDispatcher<C, M>
where
    C: Send + Sync + 'static,
    M: Sourcing<C>,
{
    fn descriptor(&self) -> &Arc<ComponentDescriptor> {
        &self.descriptor
    }

    fn dispatch(
        self: Arc<Self>,
        env: Arc<RouterEnv>,
        call: ComponentCall,
    ) -> BoxFuture<'static, Reply> {
        async move { self.handle(env, call).await }.boxed()
    }

    fn passivate(self: Arc<Self>, env: Arc<RouterEnv>, id: String) -> BoxFuture<'static, bool> {
        async move {
            let key = (self.descriptor.component_type(), id);
            let Some(cell) = env.instances.get::<SlotCell<C, M::State>>(&key) else {
                return false;
            };
            let mut slot = cell.lock().await;
            let was_live = slot.instance.take().is_some();
            slot.active = false;
            env.instances.remove(&key, &cell);
            debug!(component = %key.0, id = %key.1, "passivated entity");
            was_live
        }
        .boxed()
    }
}
