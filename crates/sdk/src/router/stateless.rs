use std::{
    collections::HashMap,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
};

use futures_util::{FutureExt, future::BoxFuture};
use tracing::{error, warn};

use super::{Dispatcher, RouterEnv, Settled, encoded_reply, invoke, panic_message, settle};
use crate::{
    deferred::{ComponentCall, Reply},
    descriptor::{ComponentDescriptor, ErasedAction},
    error::{DispatchError, ErrorReply},
    registry::Factory,
};

/// The instance of a stateless component shared by every call the router
/// dispatches to it. Built on first use.
pub(crate) fn shared_instance<C: Send + Sync + 'static>(
    env: &RouterEnv,
    descriptor: &ComponentDescriptor,
    factory: &Factory<C>,
) -> Result<Arc<C>, ErrorReply> {
    env.instances
        .get_or_try_insert((descriptor.component_type(), String::new()), || {
            let context = env.context(None);
            catch_unwind(AssertUnwindSafe(|| factory(&context))).map_err(|panic| {
                let message = panic_message(&*panic);
                error!(panic = %message, "component factory panicked");
                ErrorReply::internal(format!(
                    "creating `{}` panicked: {message}",
                    descriptor.component_id()
                ))
            })
        })
}

/// Dispatch to actions and timed actions.
pub(crate) struct ActionDispatcher<C> {
    descriptor: Arc<ComponentDescriptor>,
    factory: Factory<C>,
    handlers: HashMap<String, ErasedAction<C>>,
}

impl<C: Send + Sync + 'static> ActionDispatcher<C> {
    pub(crate) fn new(
        descriptor: Arc<ComponentDescriptor>,
        factory: Factory<C>,
        handlers: HashMap<String, ErasedAction<C>>,
    ) -> Self {
        Self {
            descriptor,
            factory,
            handlers,
        }
    }

    async fn handle(&self, env: Arc<RouterEnv>, call: ComponentCall) -> Reply {
        let Some(handler) = self.handlers.get(&call.method_name) else {
            return Reply::error(DispatchError::MethodNotFound {
                component: self.descriptor.component_type().to_string(),
                method: call.method_name,
            });
        };
        let component = match shared_instance(&env, &self.descriptor, &self.factory) {
            Ok(component) => component,
            Err(err) => return Reply::error(err),
        };

        let codec = env.registry.codec();
        let effect = match invoke(&call.method_name, || handler(&*component, &call.payload, codec)) {
            Ok(effect) => effect,
            Err(err) => return Reply::error(err),
        };

        match settle(effect, env.config.async_reply_timeout).await {
            Settled::Reply { value, metadata } => encoded_reply(value, metadata),
            Settled::Update { update, .. } => match update {},
            Settled::Delete { .. } => {
                warn!("stateless component replied with a delete effect");
                Reply::error(ErrorReply::internal(format!(
                    "`{}` has no entity to delete",
                    self.descriptor.component_id()
                )))
            }
            Settled::Error(err) => Reply::error(err),
        }
    }
}

impl<C: Send + Sync + 'static> Dispatcher for ActionDispatcher<C> {
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
