//! Inbound call dispatch.
//!
//! [`ComponentRouter::dispatch`] takes a [`ComponentCall`] through
//! resolution, payload decoding, handler invocation and effect normalization,
//! and always answers with a [`Reply`]. Failures of a single call stay inside
//! that call's reply.
//!
//! Every entity instance is guarded by an async mutex held for the whole
//! call, async replies included, so calls to one id never interleave while
//! calls to distinct ids run in parallel.

pub(crate) mod entity;
pub(crate) mod stateless;
pub(crate) mod view;

use std::{
    any::Any,
    collections::HashMap,
    convert::Infallible,
    fmt,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
    time::Duration,
};

use futures_util::{FutureExt, future::BoxFuture};
use tracing::{Instrument, debug, error, info_span, warn};

use crate::{
    client::{CallExecutor, ComponentClient},
    component::ComponentContext,
    deferred::{ComponentCall, Reply, ReplyBody},
    descriptor::{ComponentDescriptor, ComponentType, EncodedReply},
    effect::{Effect, RowEffect},
    error::{DecodeError, DispatchError, ErrorReply, TransportError},
    metadata::{self, Metadata, TRACE_PARENT_KEY},
    registry::ComponentRegistry,
    store::{MemoryRowStore, MemoryStateStore, RowStore, StateStore},
    timer::TimerScheduler,
};

/// Default time an async reply may take before the call fails.
pub const DEFAULT_ASYNC_REPLY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Debug)]
pub struct RouterConfig {
    /// How long an [`Effect::AsyncReply`] may take to resolve.
    pub async_reply_timeout: Duration,
    /// Headers of an inbound call copied onto the calls its handler makes
    /// through the [`ComponentContext`] client. Defaults to `traceparent`.
    pub forward_headers: Vec<String>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            async_reply_timeout: DEFAULT_ASYNC_REPLY_TIMEOUT,
            forward_headers: vec![TRACE_PARENT_KEY.to_string()],
        }
    }
}

impl RouterConfig {
    pub fn with_async_reply_timeout(mut self, timeout: Duration) -> Self {
        self.async_reply_timeout = timeout;
        self
    }

    pub fn with_forward_headers<K: Into<String>>(mut self, keys: impl IntoIterator<Item = K>) -> Self {
        self.forward_headers = keys.into_iter().map(Into::into).collect();
        self
    }
}

/// Dispatches calls for one registered component type.
pub(crate) trait Dispatcher: Send + Sync + 'static {
    fn descriptor(&self) -> &Arc<ComponentDescriptor>;

    fn dispatch(self: Arc<Self>, env: Arc<RouterEnv>, call: ComponentCall)
    -> BoxFuture<'static, Reply>;

    /// Drops the live instance `id`, if any.
    fn passivate(self: Arc<Self>, _env: Arc<RouterEnv>, _id: String) -> BoxFuture<'static, bool> {
        futures_util::future::ready(false).boxed()
    }
}

pub struct ComponentRouterBuilder {
    registry: Arc<ComponentRegistry>,
    state_store: Option<Arc<dyn StateStore>>,
    row_store: Option<Arc<dyn RowStore>>,
    config: RouterConfig,
}

impl ComponentRouterBuilder {
    /// Store for entity snapshots and journals. Defaults to memory.
    pub fn state_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.state_store = Some(store);
        self
    }

    /// Store for view rows. Defaults to memory.
    pub fn row_store(mut self, store: Arc<dyn RowStore>) -> Self {
        self.row_store = Some(store);
        self
    }

    pub fn config(mut self, config: RouterConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> ComponentRouter {
        let Self {
            registry,
            state_store,
            row_store,
            config,
        } = self;
        let state_store = state_store.unwrap_or_else(|| Arc::new(MemoryStateStore::new()));
        let row_store = row_store.unwrap_or_else(|| Arc::new(MemoryRowStore::new()));

        let env = Arc::new_cyclic(|env: &Weak<RouterEnv>| {
            let client = ComponentClient::new(
                Arc::clone(&registry),
                Arc::new(Loopback { env: env.clone() }),
            )
            .with_forwarded_headers(config.forward_headers.iter().cloned());
            RouterEnv {
                timers: TimerScheduler::new(client.clone()),
                client,
                registry,
                state_store,
                row_store,
                config,
                instances: InstanceCache::default(),
            }
        });

        ComponentRouter { env }
    }
}

/// Routes calls to the components of a registry.
#[derive(Clone)]
pub struct ComponentRouter {
    env: Arc<RouterEnv>,
}

impl ComponentRouter {
    pub fn builder(registry: Arc<ComponentRegistry>) -> ComponentRouterBuilder {
        ComponentRouterBuilder {
            registry,
            state_store: None,
            row_store: None,
            config: RouterConfig::default(),
        }
    }

    /// A router with in-memory stores and the default config.
    pub fn new(registry: Arc<ComponentRegistry>) -> Self {
        Self::builder(registry).build()
    }

    pub fn registry(&self) -> &Arc<ComponentRegistry> {
        &self.env.registry
    }

    /// A client whose calls are dispatched by this router.
    pub fn client(&self) -> ComponentClient {
        self.env.client.clone()
    }

    pub fn timers(&self) -> &TimerScheduler {
        &self.env.timers
    }

    pub async fn dispatch(&self, call: ComponentCall) -> Reply {
        Arc::clone(&self.env).dispatch(call).await
    }

    /// Drops the live instance of entity `id`. Its next call recovers it
    /// from the state store. Returns whether an instance was live.
    ///
    /// The router keeps every instance it has activated until it is deleted
    /// or passivated. Evicting idle instances is up to the host.
    pub async fn passivate(&self, component_type: &ComponentType, id: &str) -> bool {
        match self.env.registry.dispatcher(component_type) {
            Some(dispatcher) => {
                Arc::clone(dispatcher)
                    .passivate(Arc::clone(&self.env), id.to_string())
                    .await
            }
            None => false,
        }
    }
}

impl CallExecutor for ComponentRouter {
    fn execute(&self, call: ComponentCall) -> BoxFuture<'static, Result<Reply, TransportError>> {
        let env = Arc::clone(&self.env);
        async move { Ok(env.dispatch(call).await) }.boxed()
    }
}

impl fmt::Debug for ComponentRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentRouter")
            .field("registry", &self.env.registry)
            .field("config", &self.env.config)
            .finish_non_exhaustive()
    }
}

/// Executor of the clients handed to components. Holds the router weakly so
/// the router can be dropped while components still hold clients.
struct Loopback {
    env: Weak<RouterEnv>,
}

impl CallExecutor for Loopback {
    fn execute(&self, call: ComponentCall) -> BoxFuture<'static, Result<Reply, TransportError>> {
        let env = self.env.upgrade();
        async move {
            match env {
                Some(env) => Ok(env.dispatch(call).await),
                None => Err(TransportError("router has been dropped".to_string())),
            }
        }
        .boxed()
    }
}

pub(crate) struct RouterEnv {
    pub(crate) registry: Arc<ComponentRegistry>,
    pub(crate) state_store: Arc<dyn StateStore>,
    pub(crate) row_store: Arc<dyn RowStore>,
    pub(crate) config: RouterConfig,
    pub(crate) instances: InstanceCache,
    pub(crate) client: ComponentClient,
    pub(crate) timers: TimerScheduler,
}

impl RouterEnv {
    pub(crate) fn context(&self, component_id: Option<String>) -> ComponentContext {
        ComponentContext::new(component_id, self.client.clone(), self.timers.clone())
    }

    pub(crate) async fn dispatch(self: Arc<Self>, call: ComponentCall) -> Reply {
        let span = info_span!(
            "dispatch",
            component = %call.component_type,
            component_id = call.component_id.as_deref().unwrap_or_default(),
            method = %call.method_name,
            traceparent = call.metadata.trace_parent().unwrap_or_default(),
        );
        let headers = call.metadata.clone();

        let dispatch = async move {
            let routable = self
                .registry
                .dispatcher(&call.component_type)
                .filter(|dispatcher| dispatcher.descriptor().routable(&call.method_name).is_some())
                .cloned();
            let Some(dispatcher) = routable else {
                warn!("no routable method for call");
                return Reply::error(DispatchError::MethodNotFound {
                    component: call.component_type.to_string(),
                    method: call.method_name,
                });
            };

            let reply = dispatcher.dispatch(Arc::clone(&self), call).await;
            match &reply.body {
                ReplyBody::Ok(payload) => debug!(reply = %payload.type_url, "call succeeded"),
                ReplyBody::Error(err) => debug!(code = %err.code, error = %err.message, "call failed"),
            }
            reply
        };
        metadata::scope(headers, dispatch.instrument(span)).await
    }

    /// Feeds a committed key-value entity state to the views consuming it.
    pub(crate) async fn publish_update(
        &self,
        source: &str,
        entity_id: &str,
        state: &(dyn Any + Send + Sync),
    ) {
        for subscription in self.registry.subscriptions_for(source) {
            let effect = match catch_unwind(AssertUnwindSafe(|| (subscription.update)(state))) {
                Ok(Ok(effect)) => effect,
                Ok(Err(err)) => {
                    warn!(view = %subscription.view, error = %err, "table updater failed");
                    continue;
                }
                Err(panic) => {
                    error!(view = %subscription.view, panic = %panic_message(&*panic), "table updater panicked");
                    continue;
                }
            };
            let result = match effect {
                RowEffect::UpdateRow(row) => {
                    self.row_store
                        .upsert(&subscription.table, entity_id, row)
                        .await
                }
                RowEffect::DeleteRow => self.row_store.delete(&subscription.table, entity_id).await,
                RowEffect::Ignore => Ok(()),
            };
            if let Err(err) = result {
                warn!(view = %subscription.view, error = %err, "failed to update view row");
            }
        }
    }

    pub(crate) async fn publish_delete(&self, source: &str, entity_id: &str) {
        for subscription in self.registry.subscriptions_for(source) {
            if !subscription.handle_deletes {
                continue;
            }
            if let Err(err) = self.row_store.delete(&subscription.table, entity_id).await {
                warn!(view = %subscription.view, error = %err, "failed to delete view row");
            }
        }
    }
}

type InstanceKey = (ComponentType, String);

/// Live component instances, keyed by component type and id.
#[derive(Default)]
pub(crate) struct InstanceCache {
    entries: Mutex<HashMap<InstanceKey, Arc<dyn Any + Send + Sync>>>,
}

impl InstanceCache {
    pub(crate) fn get<T: Send + Sync + 'static>(&self, key: &InstanceKey) -> Option<Arc<T>> {
        let entry = self.lock().get(key).cloned()?;
        entry.downcast::<T>().ok()
    }

    pub(crate) fn get_or_insert_with<T: Send + Sync + 'static>(
        &self,
        key: InstanceKey,
        init: impl FnOnce() -> T,
    ) -> Arc<T> {
        match self.get_or_try_insert(key, || Ok::<_, Infallible>(init())) {
            Ok(value) => value,
            Err(never) => match never {},
        }
    }

    /// The cached value for `key`, or the one built by `init`.
    pub(crate) fn get_or_try_insert<T, E>(
        &self,
        key: InstanceKey,
        init: impl FnOnce() -> Result<T, E>,
    ) -> Result<Arc<T>, E>
    where
        T: Send + Sync + 'static,
    {
        let mut entries = self.lock();
        if let Some(existing) = entries.get(&key) {
            if let Ok(existing) = Arc::clone(existing).downcast::<T>() {
                return Ok(existing);
            }
        }

        let value = Arc::new(init()?);
        entries.insert(key, Arc::clone(&value) as Arc<dyn Any + Send + Sync>);
        Ok(value)
    }

    /// Removes `key` if it still maps to `current`.
    pub(crate) fn remove<T: Send + Sync + 'static>(&self, key: &InstanceKey, current: &Arc<T>) {
        let mut entries = self.lock();
        let is_current = entries.get(key).is_some_and(|entry| {
            std::ptr::addr_eq(Arc::as_ptr(entry), Arc::as_ptr(current))
        });
        if is_current {
            entries.remove(key);
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<InstanceKey, Arc<dyn Any + Send + Sync>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A final effect, once every async reply resolved.
pub(crate) enum Settled<U> {
    Reply {
        value: EncodedReply,
        metadata: Metadata,
    },
    Update {
        update: U,
        value: EncodedReply,
        metadata: Metadata,
    },
    Delete {
        value: EncodedReply,
        metadata: Metadata,
    },
    Error(ErrorReply),
}

/// Runs a handler, turning decode failures and panics into error replies.
pub(crate) fn invoke<T>(
    method: &str,
    handler: impl FnOnce() -> Result<T, DecodeError>,
) -> Result<T, ErrorReply> {
    match catch_unwind(AssertUnwindSafe(handler)) {
        Ok(Ok(effect)) => Ok(effect),
        Ok(Err(err)) => {
            warn!(error = %err, "malformed call payload");
            Err(DispatchError::BadRequest(err).into())
        }
        Err(panic) => {
            let message = panic_message(&*panic);
            error!(panic = %message, "handler panicked");
            Err(ErrorReply::internal(format!(
                "handler `{method}` panicked: {message}"
            )))
        }
    }
}

/// Awaits async replies until the effect is final.
pub(crate) async fn settle<U: Send + 'static>(
    mut effect: Effect<EncodedReply, U>,
    timeout: Duration,
) -> Settled<U> {
    loop {
        effect = match effect {
            Effect::Reply { value, metadata } => return Settled::Reply { value, metadata },
            Effect::UpdateStateAndReply {
                update,
                value,
                metadata,
            } => {
                return Settled::Update {
                    update,
                    value,
                    metadata,
                };
            }
            Effect::DeleteEntityAndReply { value, metadata } => {
                return Settled::Delete { value, metadata };
            }
            Effect::Error(err) => return Settled::Error(err),
            Effect::AsyncReply(future) => {
                let pending = AssertUnwindSafe(future).catch_unwind();
                match tokio::time::timeout(timeout, pending).await {
                    Ok(Ok(next)) => next,
                    Ok(Err(panic)) => {
                        let message = panic_message(&*panic);
                        error!(panic = %message, "async reply panicked");
                        Effect::Error(ErrorReply::internal(format!(
                            "async reply panicked: {message}"
                        )))
                    }
                    Err(_) => {
                        warn!(?timeout, "async reply timed out");
                        Effect::Error(ErrorReply::unavailable(format!(
                            "async reply did not complete within {timeout:?}"
                        )))
                    }
                }
            }
        };
    }
}

/// The reply for an encoded reply value.
pub(crate) fn encoded_reply(value: EncodedReply, metadata: Metadata) -> Reply {
    match value {
        Ok(payload) => Reply::ok(payload, metadata),
        Err(err) => {
            error!(error = %err, "failed to encode reply");
            Reply::error(ErrorReply::internal(err.to_string()))
        }
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
