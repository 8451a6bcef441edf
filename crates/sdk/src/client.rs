//! Typed component client.
//!
//! ```rust,ignore
//! let increase = client
//!     .for_key_value_entity("counter-1")
//!     .method(Counter::increase)?;
//!
//! let value = increase.invoke_async(10).await?;
//! let later = increase.deferred(5);
//! ```

use std::{fmt, future::Future, marker::PhantomData, sync::Arc};

use futures_util::{FutureExt, future::BoxFuture};
use tracing::debug;

use crate::{
    codec::{EncodedPayload, Message},
    component::{Action, EventSourcedEntity, KeyValueEntity, TimedAction, View, Workflow},
    deferred::{ComponentCall, DeferredCall, Reply},
    descriptor::ComponentKind,
    error::{ClientError, EncodeError, TransportError},
    metadata::{self, Metadata},
    method::{ActionHandler, Args, CommandHandler, QueryHandler, ResolvedMethod, resolve},
    registry::ComponentRegistry,
};

/// Executes encoded calls, typically by sending them over a transport.
///
/// The [`ComponentRouter`](crate::router::ComponentRouter) implements this
/// trait to dispatch calls in-process.
pub trait CallExecutor: Send + Sync + 'static {
    fn execute(&self, call: ComponentCall) -> BoxFuture<'static, Result<Reply, TransportError>>;
}

/// Entry point for calling components.
#[derive(Clone)]
pub struct ComponentClient {
    registry: Arc<ComponentRegistry>,
    executor: Arc<dyn CallExecutor>,
    metadata: Metadata,
    forward_headers: Arc<[String]>,
}

impl ComponentClient {
    pub fn new(registry: Arc<ComponentRegistry>, executor: Arc<dyn CallExecutor>) -> Self {
        Self {
            registry,
            executor,
            metadata: Metadata::new(),
            forward_headers: Arc::new([]),
        }
    }

    pub fn registry(&self) -> &Arc<ComponentRegistry> {
        &self.registry
    }

    /// Headers attached to every call made through this client.
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// A copy of this client with `metadata` merged over its headers.
    pub fn with_metadata(&self, metadata: &Metadata) -> Self {
        Self {
            metadata: self.metadata.clone().merge(metadata),
            ..self.clone()
        }
    }

    /// A copy of this client that copies the named headers of the call being
    /// handled onto every call it makes. Headers set on the call itself win.
    pub fn with_forwarded_headers<K: Into<String>>(&self, keys: impl IntoIterator<Item = K>) -> Self {
        Self {
            forward_headers: keys
                .into_iter()
                .map(|key| key.into().to_ascii_lowercase())
                .collect(),
            ..self.clone()
        }
    }

    pub fn forwarded_headers(&self) -> &[String] {
        &self.forward_headers
    }

    pub fn for_key_value_entity(&self, entity_id: impl Into<String>) -> KeyValueEntityClient {
        KeyValueEntityClient {
            client: self.clone(),
            entity_id: entity_id.into(),
        }
    }

    pub fn for_event_sourced_entity(
        &self,
        entity_id: impl Into<String>,
    ) -> EventSourcedEntityClient {
        EventSourcedEntityClient {
            client: self.clone(),
            entity_id: entity_id.into(),
        }
    }

    pub fn for_workflow(&self, workflow_id: impl Into<String>) -> WorkflowClient {
        WorkflowClient {
            client: self.clone(),
            workflow_id: workflow_id.into(),
        }
    }

    pub fn for_action(&self) -> ActionClient {
        ActionClient {
            client: self.clone(),
        }
    }

    pub fn for_timed_action(&self) -> TimedActionClient {
        TimedActionClient {
            client: self.clone(),
        }
    }

    pub fn for_view(&self) -> ViewClient {
        ViewClient {
            client: self.clone(),
        }
    }

    /// Executes a deferred call and decodes its reply.
    pub fn execute<Req: Message, Res: Message>(
        &self,
        call: DeferredCall<Req, Res>,
    ) -> impl Future<Output = Result<Res, ClientError>> + Send + use<Req, Res> {
        let codec = Arc::clone(self.registry.codec());
        let pending = self.execute_encoded(call.encode(&codec));
        async move {
            let payload = pending.await?;
            let reply = codec.decode::<Res>(&payload)?;
            Ok::<_, ClientError>(reply)
        }
    }

    pub(crate) fn execute_encoded(
        &self,
        call: Result<ComponentCall, EncodeError>,
    ) -> BoxFuture<'static, Result<EncodedPayload, ClientError>> {
        let call = call.map(|call| self.forward(call));
        let executor = Arc::clone(&self.executor);
        async move {
            let call = call?;
            debug!(
                component = %call.component_type,
                component_id = ?call.component_id,
                method = %call.method_name,
                "executing call"
            );
            let reply = executor.execute(call).await?;
            Ok::<_, ClientError>(reply.into_result()?)
        }
        .boxed()
    }

    fn forward(&self, mut call: ComponentCall) -> ComponentCall {
        if !self.forward_headers.is_empty() {
            call.metadata = metadata::current()
                .select(&self.forward_headers[..])
                .merge(&call.metadata);
        }
        call
    }

    fn method_ref<C: 'static, F: 'static, A: Args, R>(
        &self,
        kind: ComponentKind,
        component_id: Option<String>,
    ) -> Result<ComponentMethodRef<A, R>, ClientError> {
        let resolved = resolve::<C, F>(&self.registry, kind, component_id, A::ARITY)?;
        Ok(ComponentMethodRef {
            client: self.clone(),
            resolved,
            metadata: self.metadata.clone(),
            _marker: PhantomData,
        })
    }
}

impl fmt::Debug for ComponentClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentClient")
            .field("metadata", &self.metadata)
            .field("forward_headers", &self.forward_headers)
            .finish_non_exhaustive()
    }
}

pub struct KeyValueEntityClient {
    client: ComponentClient,
    entity_id: String,
}

impl KeyValueEntityClient {
    /// Resolves a command handler of `C`, e.g. `Counter::increase`.
    pub fn method<C, S, A, F>(&self, _f: F) -> Result<ComponentMethodRef<A, F::Reply>, ClientError>
    where
        C: KeyValueEntity<State = S>,
        A: Args,
        F: CommandHandler<C, S, A>,
    {
        self.client.method_ref::<C, F, A, F::Reply>(
            ComponentKind::KeyValueEntity,
            Some(self.entity_id.clone()),
        )
    }
}

pub struct EventSourcedEntityClient {
    client: ComponentClient,
    entity_id: String,
}

impl EventSourcedEntityClient {
    pub fn method<C, S, A, F>(&self, _f: F) -> Result<ComponentMethodRef<A, F::Reply>, ClientError>
    where
        C: EventSourcedEntity<State = S>,
        A: Args,
        F: CommandHandler<C, S, A>,
    {
        self.client.method_ref::<C, F, A, F::Reply>(
            ComponentKind::EventSourcedEntity,
            Some(self.entity_id.clone()),
        )
    }
}

pub struct WorkflowClient {
    client: ComponentClient,
    workflow_id: String,
}

impl WorkflowClient {
    pub fn method<C, S, A, F>(&self, _f: F) -> Result<ComponentMethodRef<A, F::Reply>, ClientError>
    where
        C: Workflow<State = S>,
        A: Args,
        F: CommandHandler<C, S, A>,
    {
        self.client.method_ref::<C, F, A, F::Reply>(
            ComponentKind::Workflow,
            Some(self.workflow_id.clone()),
        )
    }
}

pub struct ActionClient {
    client: ComponentClient,
}

impl ActionClient {
    pub fn method<C, A, F>(&self, _f: F) -> Result<ComponentMethodRef<A, F::Reply>, ClientError>
    where
        C: Action,
        A: Args,
        F: ActionHandler<C, A>,
    {
        self.client
            .method_ref::<C, F, A, F::Reply>(ComponentKind::Action, None)
    }
}

pub struct TimedActionClient {
    client: ComponentClient,
}

impl TimedActionClient {
    pub fn method<C, A, F>(&self, _f: F) -> Result<ComponentMethodRef<A, F::Reply>, ClientError>
    where
        C: TimedAction,
        A: Args,
        F: ActionHandler<C, A>,
    {
        self.client
            .method_ref::<C, F, A, F::Reply>(ComponentKind::Timer, None)
    }
}

pub struct ViewClient {
    client: ComponentClient,
}

impl ViewClient {
    /// Resolves a query method of `C`. Queries can only be invoked.
    pub fn method<C, A, F>(
        &self,
        _f: F,
    ) -> Result<ComponentInvokeOnlyMethodRef<A, F::Reply>, ClientError>
    where
        C: View,
        A: Args,
        F: QueryHandler<C, A>,
    {
        self.client
            .method_ref::<C, F, A, F::Reply>(ComponentKind::View, None)
            .map(|inner| ComponentInvokeOnlyMethodRef { inner })
    }
}

/// A resolved reference to a component method taking arguments `A` and
/// replying with `R`.
pub struct ComponentMethodRef<A, R> {
    client: ComponentClient,
    resolved: ResolvedMethod,
    metadata: Metadata,
    _marker: PhantomData<fn(A) -> R>,
}

impl<A: Args, R: Message> ComponentMethodRef<A, R> {
    pub fn method_name(&self) -> &str {
        &self.resolved.method_name
    }

    pub fn resolved(&self) -> &ResolvedMethod {
        &self.resolved
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Builds the call without executing it.
    pub fn deferred(&self, message: A::Message) -> DeferredCall<A::Message, R> {
        DeferredCall::new(
            self.resolved.component_type.clone(),
            self.resolved.component_id.clone(),
            self.resolved.method_name.clone(),
            message,
            self.metadata.clone(),
        )
    }

    /// Executes the call and decodes its reply.
    ///
    /// Errors replied by the handler surface as [`ClientError::Remote`], and
    /// view queries without a match as [`ClientError::NotFound`].
    pub fn invoke_async(
        &self,
        message: A::Message,
    ) -> impl Future<Output = Result<R, ClientError>> + Send + use<A, R> {
        self.client.execute(self.deferred(message))
    }

    /// A copy of this reference with `metadata` merged over its headers.
    pub fn with_metadata(&self, metadata: &Metadata) -> Self {
        Self {
            metadata: self.metadata.clone().merge(metadata),
            ..self.clone()
        }
    }
}

impl<A, R> Clone for ComponentMethodRef<A, R> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            resolved: self.resolved.clone(),
            metadata: self.metadata.clone(),
            _marker: PhantomData,
        }
    }
}

impl<A, R> fmt::Debug for ComponentMethodRef<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentMethodRef")
            .field("resolved", &self.resolved)
            .field("metadata", &self.metadata)
            .finish()
    }
}

/// A resolved reference to a view query. Unlike [`ComponentMethodRef`] it
/// cannot be deferred.
pub struct ComponentInvokeOnlyMethodRef<A, R> {
    inner: ComponentMethodRef<A, R>,
}

impl<A: Args, R: Message> ComponentInvokeOnlyMethodRef<A, R> {
    pub fn method_name(&self) -> &str {
        self.inner.method_name()
    }

    pub fn invoke_async(
        &self,
        message: A::Message,
    ) -> impl Future<Output = Result<R, ClientError>> + Send + use<A, R> {
        self.inner.invoke_async(message)
    }

    pub fn with_metadata(&self, metadata: &Metadata) -> Self {
        Self {
            inner: self.inner.with_metadata(metadata),
        }
    }
}

impl<A, R> Clone for ComponentInvokeOnlyMethodRef<A, R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<A, R> fmt::Debug for ComponentInvokeOnlyMethodRef<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ComponentInvokeOnlyMethodRef")
            .field(&self.inner)
            .finish()
    }
}
