use std::{collections::HashMap, sync::Arc};

use futures_util::{FutureExt, future::BoxFuture};
use tracing::{debug, error};

use super::{Dispatcher, RouterEnv, invoke, stateless::shared_instance};
use crate::{
    codec::JsonCodec,
    deferred::{ComponentCall, Reply},
    descriptor::{ComponentDescriptor, ErasedQuery},
    error::{DispatchError, ErrorReply},
    metadata::Metadata,
    registry::Factory,
};

/// Dispatch to views. The query handler decides whether the query runs, the
/// rows come from the view's table.
pub(crate) struct ViewDispatcher<C> {
    descriptor: Arc<ComponentDescriptor>,
    factory: Factory<C>,
    queries: HashMap<String, ErasedQuery<C>>,
}

impl<C: Send + Sync + 'static> ViewDispatcher<C> {
    pub(crate) fn new(
        descriptor: Arc<ComponentDescriptor>,
        factory: Factory<C>,
        queries: HashMap<String, ErasedQuery<C>>,
    ) -> Self {
        Self {
            descriptor,
            factory,
            queries,
        }
    }

    async fn handle(&self, env: Arc<RouterEnv>, call: ComponentCall) -> Reply {
        let Some(query) = self.queries.get(&call.method_name) else {
            return Reply::error(DispatchError::MethodNotFound {
                component: self.descriptor.component_type().to_string(),
                method: call.method_name,
            });
        };
        let component = match shared_instance(&env, &self.descriptor, &self.factory) {
            Ok(component) => component,
            Err(err) => return Reply::error(err),
        };

        let codec: &JsonCodec = env.registry.codec();
        match invoke(&call.method_name, || (query.call)(&*component, &call.payload, codec)) {
            Ok(Ok(())) => {}
            Ok(Err(err)) | Err(err) => return Reply::error(err),
        }

        let params = match codec.decode_value(&call.payload) {
            Ok(params) => params,
            Err(err) => return Reply::error(DispatchError::BadRequest(err)),
        };
        let params = if query.arity > 1 {
            match query.definition.bind_positional(params) {
                Ok(params) => params,
                Err(err) => return Reply::error(err),
            }
        } else {
            params
        };
        let table = &query.definition.table;
        let rows = match env.row_store.rows(table).await {
            Ok(rows) => rows,
            Err(err) => {
                error!(table = %table, error = %err, "failed to read view rows");
                return Reply::error(ErrorReply::unavailable(err.to_string()));
            }
        };
        debug!(table = %table, rows = rows.len(), "evaluating query");

        let result = match query.definition.evaluate(&params, &rows) {
            Ok(result) => result,
            Err(err) => return Reply::error(err),
        };
        match (query.finish)(codec, result) {
            Ok(payload) => Reply::ok(payload, Metadata::new()),
            Err(err) => {
                error!(error = %err, "failed to encode query result");
                Reply::error(err)
            }
        }
    }
}

impl<C: Send + Sync + 'static> Dispatcher for ViewDispatcher<C> {
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
}
