//! Component registration.
//!
//! Components are registered once at startup on a [`RegistryBuilder`], which
//! describes each component, validates it and registers every type its
//! handlers use in the codec. [`RegistryBuilder::build`] freezes the result
//! into an immutable [`ComponentRegistry`] shared by clients and routers.

use std::{
    any::{TypeId, type_name},
    collections::HashMap,
    fmt,
    sync::Arc,
};

use tracing::debug;

use crate::{
    codec::{JsonCodec, RegisterFn},
    component::{
        Action, ComponentContext, EventSourcedEntity, KeyValueEntity, TimedAction, View, Workflow,
    },
    descriptor::{
        ComponentDescriptor, ComponentKind, ComponentType, Described, Subscription,
        describe_action, describe_event_sourced_entity, describe_key_value_entity, describe_view,
        describe_workflow,
    },
    error::InvalidComponentDefinition,
    router::{
        Dispatcher,
        entity::{EntityDispatcher, Journal, KvSnapshot, WorkflowSnapshot},
        stateless::ActionDispatcher,
        view::ViewDispatcher,
    },
};

/// Builds a component instance from its context.
pub(crate) type Factory<C> = Arc<dyn Fn(&ComponentContext) -> C + Send + Sync>;

#[derive(Default)]
pub struct RegistryBuilder {
    codec: JsonCodec,
    descriptors: HashMap<TypeId, Arc<ComponentDescriptor>>,
    dispatchers: HashMap<ComponentType, Arc<dyn Dispatcher>>,
    subscriptions: HashMap<String, Vec<Arc<Subscription>>>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_key_value_entity<C: KeyValueEntity>(
        &mut self,
        factory: impl Fn(&ComponentContext) -> C + Send + Sync + 'static,
    ) -> Result<Arc<ComponentDescriptor>, InvalidComponentDefinition> {
        let Described {
            descriptor,
            handlers,
            codec_types,
        } = describe_key_value_entity::<C>()?;
        let descriptor = self.admit::<C>(descriptor, &codec_types)?;
        self.insert_dispatcher(
            &descriptor,
            Arc::new(EntityDispatcher::<C, KvSnapshot>::new(
                Arc::clone(&descriptor),
                Arc::new(factory),
                handlers,
            )),
        );
        Ok(descriptor)
    }

    pub fn register_event_sourced_entity<C: EventSourcedEntity>(
        &mut self,
        factory: impl Fn(&ComponentContext) -> C + Send + Sync + 'static,
    ) -> Result<Arc<ComponentDescriptor>, InvalidComponentDefinition> {
        let Described {
            descriptor,
            handlers,
            codec_types,
        } = describe_event_sourced_entity::<C>()?;
        let descriptor = self.admit::<C>(descriptor, &codec_types)?;
        self.insert_dispatcher(
            &descriptor,
            Arc::new(EntityDispatcher::<C, Journal>::new(
                Arc::clone(&descriptor),
                Arc::new(factory),
                handlers,
            )),
        );
        Ok(descriptor)
    }

    pub fn register_workflow<C: Workflow>(
        &mut self,
        factory: impl Fn(&ComponentContext) -> C + Send + Sync + 'static,
    ) -> Result<Arc<ComponentDescriptor>, InvalidComponentDefinition> {
        let Described {
            descriptor,
            handlers,
            codec_types,
        } = describe_workflow::<C>()?;
        let descriptor = self.admit::<C>(descriptor, &codec_types)?;
        self.insert_dispatcher(
            &descriptor,
            Arc::new(EntityDispatcher::<C, WorkflowSnapshot>::new(
                Arc::clone(&descriptor),
                Arc::new(factory),
                handlers,
            )),
        );
        Ok(descriptor)
    }

    pub fn register_action<C: Action>(
        &mut self,
        factory: impl Fn(&ComponentContext) -> C + Send + Sync + 'static,
    ) -> Result<Arc<ComponentDescriptor>, InvalidComponentDefinition> {
        let Described {
            descriptor,
            handlers,
            codec_types,
        } = describe_action::<C>(C::COMPONENT_ID, ComponentKind::Action, C::describe)?;
        let descriptor = self.admit::<C>(descriptor, &codec_types)?;
        self.insert_dispatcher(
            &descriptor,
            Arc::new(ActionDispatcher::new(
                Arc::clone(&descriptor),
                Arc::new(factory),
                handlers,
            )),
        );
        Ok(descriptor)
    }

    pub fn register_timed_action<C: TimedAction>(
        &mut self,
        factory: impl Fn(&ComponentContext) -> C + Send + Sync + 'static,
    ) -> Result<Arc<ComponentDescriptor>, InvalidComponentDefinition> {
        let Described {
            descriptor,
            handlers,
            codec_types,
        } = describe_action::<C>(C::COMPONENT_ID, ComponentKind::Timer, C::describe)?;
        let descriptor = self.admit::<C>(descriptor, &codec_types)?;
        self.insert_dispatcher(
            &descriptor,
            Arc::new(ActionDispatcher::new(
                Arc::clone(&descriptor),
                Arc::new(factory),
                handlers,
            )),
        );
        Ok(descriptor)
    }

    /// Registers a view. Entities it consumes must be registered first.
    pub fn register_view<C: View>(
        &mut self,
        factory: impl Fn(&ComponentContext) -> C + Send + Sync + 'static,
    ) -> Result<Arc<ComponentDescriptor>, InvalidComponentDefinition> {
        let Described {
            descriptor,
            handlers,
            codec_types,
        } = describe_view::<C>()?;

        for subscription in &handlers.subscriptions {
            let source = self
                .descriptors
                .get(&subscription.source)
                .filter(|source| source.kind() == ComponentKind::KeyValueEntity);
            if source.is_none() {
                return Err(InvalidComponentDefinition::new(
                    descriptor.component_id(),
                    format!(
                        "consumes key-value entity `{}` which is not registered",
                        subscription.source_id
                    ),
                ));
            }
        }

        let descriptor = self.admit::<C>(descriptor, &codec_types)?;
        for subscription in handlers.subscriptions {
            self.subscriptions
                .entry(subscription.source_id.clone())
                .or_default()
                .push(Arc::new(subscription));
        }
        self.insert_dispatcher(
            &descriptor,
            Arc::new(ViewDispatcher::new(
                Arc::clone(&descriptor),
                Arc::new(factory),
                handlers.queries,
            )),
        );
        Ok(descriptor)
    }

    pub fn build(self) -> ComponentRegistry {
        debug!(
            components = self.descriptors.len(),
            types = self.codec.len(),
            "component registry built"
        );
        ComponentRegistry {
            codec: Arc::new(self.codec),
            descriptors: self.descriptors,
            dispatchers: self.dispatchers,
            subscriptions: self.subscriptions,
        }
    }

    /// Checks a described component against what is already registered and
    /// registers its types. Nothing is changed when this fails.
    fn admit<C: 'static>(
        &mut self,
        descriptor: ComponentDescriptor,
        codec_types: &[RegisterFn],
    ) -> Result<Arc<ComponentDescriptor>, InvalidComponentDefinition> {
        let component_type = descriptor.component_type();
        if self.descriptors.contains_key(&TypeId::of::<C>()) {
            return Err(InvalidComponentDefinition::new(
                descriptor.component_id(),
                format!("`{}` is already registered", type_name::<C>()),
            ));
        }
        if self.dispatchers.contains_key(&component_type) {
            return Err(InvalidComponentDefinition::new(
                descriptor.component_id(),
                format!("another {} is registered as `{}`", component_type.kind, component_type.id),
            ));
        }

        let mut codec = self.codec.clone();
        for register in codec_types {
            register(&mut codec).map_err(|err| {
                InvalidComponentDefinition::new(descriptor.component_id(), err.to_string())
            })?;
        }
        self.codec = codec;

        debug!(
            component = %component_type,
            handlers = descriptor.handlers().len(),
            "registered component"
        );
        let descriptor = Arc::new(descriptor);
        self.descriptors
            .insert(TypeId::of::<C>(), Arc::clone(&descriptor));
        Ok(descriptor)
    }

    fn insert_dispatcher(
        &mut self,
        descriptor: &ComponentDescriptor,
        dispatcher: Arc<dyn Dispatcher>,
    ) {
        self.dispatchers
            .insert(descriptor.component_type(), dispatcher);
    }
}

/// The immutable set of registered components.
pub struct ComponentRegistry {
    codec: Arc<JsonCodec>,
    descriptors: HashMap<TypeId, Arc<ComponentDescriptor>>,
    dispatchers: HashMap<ComponentType, Arc<dyn Dispatcher>>,
    subscriptions: HashMap<String, Vec<Arc<Subscription>>>,
}

impl ComponentRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    pub fn codec(&self) -> &Arc<JsonCodec> {
        &self.codec
    }

    /// The descriptor of component type `C`, if registered.
    pub fn descriptor_of<C: 'static>(&self) -> Option<&Arc<ComponentDescriptor>> {
        self.descriptors.get(&TypeId::of::<C>())
    }

    pub fn descriptor(&self, component_type: &ComponentType) -> Option<&Arc<ComponentDescriptor>> {
        self.dispatchers
            .get(component_type)
            .map(|dispatcher| dispatcher.descriptor())
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &Arc<ComponentDescriptor>> {
        self.descriptors.values()
    }

    pub(crate) fn dispatcher(&self, component_type: &ComponentType) -> Option<&Arc<dyn Dispatcher>> {
        self.dispatchers.get(component_type)
    }

    /// View tables fed by the key-value entity `component_id`.
    pub(crate) fn subscriptions_for(&self, component_id: &str) -> &[Arc<Subscription>] {
        self.subscriptions
            .get(component_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

impl fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentRegistry")
            .field("components", &self.dispatchers.keys().collect::<Vec<_>>())
            .field("codec", &self.codec)
            .finish()
    }
}
