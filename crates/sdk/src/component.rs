//! Component kinds.
//!
//! A component is a plain struct implementing one of the kind traits below.
//! The kind decides how state is sourced: a snapshot for key-value entities
//! and workflows, a folded event journal for event sourced entities, and no
//! state for actions and views. Handlers are declared statically in
//! `describe`, and instances are built by the factory passed to the
//! [`RegistryBuilder`](crate::registry::RegistryBuilder).

use crate::{
    client::ComponentClient,
    codec::Message,
    descriptor::{ActionMethods, EntityMethods, ViewMethods},
    timer::TimerScheduler,
};

/// What a factory gets to build a component instance.
///
/// An instance outlives the calls it handles. The headers of the call being
/// handled are read with [`metadata::current`](crate::metadata::current),
/// and the client forwards the router's configured headers of that call.
#[derive(Clone)]
pub struct ComponentContext {
    component_id: Option<String>,
    client: ComponentClient,
    timers: TimerScheduler,
}

impl ComponentContext {
    pub(crate) fn new(
        component_id: Option<String>,
        client: ComponentClient,
        timers: TimerScheduler,
    ) -> Self {
        Self {
            component_id,
            client,
            timers,
        }
    }

    /// The instance id, absent for views and actions.
    pub fn component_id(&self) -> Option<&str> {
        self.component_id.as_deref()
    }

    /// The instance id of an entity or workflow.
    pub fn entity_id(&self) -> &str {
        self.component_id.as_deref().unwrap_or_default()
    }

    /// A client for calling other components.
    pub fn component_client(&self) -> &ComponentClient {
        &self.client
    }

    pub fn timers(&self) -> &TimerScheduler {
        &self.timers
    }
}

/// An entity whose state is stored as a snapshot.
///
/// # Example
///
/// ```rust,ignore
/// struct Counter;
///
/// impl Counter {
///     fn increase(&self, state: &CounterState, by: i64) -> Effect<i64, CounterState> {
///         let value = state.value + by;
///         update_state(CounterState { value }).then_reply(value)
///     }
/// }
///
/// impl KeyValueEntity for Counter {
///     const COMPONENT_ID: &'static str = "counter";
///     type State = CounterState;
///
///     fn empty_state(&self) -> CounterState {
///         CounterState::default()
///     }
///
///     fn describe(methods: &mut EntityMethods<Self, CounterState, CounterState>) {
///         methods.command(Counter::increase);
///     }
/// }
/// ```
pub trait KeyValueEntity: Sized + Send + Sync + 'static {
    const COMPONENT_ID: &'static str;

    type State: Message + Clone;

    /// State of an instance that never committed an update.
    fn empty_state(&self) -> Self::State;

    fn describe(methods: &mut EntityMethods<Self, Self::State, Self::State>);
}

/// An entity whose state is the fold of its persisted events.
pub trait EventSourcedEntity: Sized + Send + Sync + 'static {
    const COMPONENT_ID: &'static str;

    type State: Message + Clone;
    type Event: Message;

    fn empty_state(&self) -> Self::State;

    /// Applies a persisted event to the state.
    ///
    /// Called for every event in order, both when recovering an instance and
    /// after a handler persisted new events.
    fn apply_event(&self, state: Self::State, event: &Self::Event) -> Self::State;

    fn describe(methods: &mut EntityMethods<Self, Self::State, Vec<Self::Event>>);
}

/// A long running process addressed by id, with snapshot state.
pub trait Workflow: Sized + Send + Sync + 'static {
    const COMPONENT_ID: &'static str;

    type State: Message + Clone;

    fn empty_state(&self) -> Self::State;

    fn describe(methods: &mut EntityMethods<Self, Self::State, Self::State>);
}

/// A stateless component.
pub trait Action: Sized + Send + Sync + 'static {
    const COMPONENT_ID: &'static str;

    fn describe(methods: &mut ActionMethods<Self>);
}

/// A stateless component whose methods are meant to be scheduled as timers.
pub trait TimedAction: Sized + Send + Sync + 'static {
    const COMPONENT_ID: &'static str;

    fn describe(methods: &mut ActionMethods<Self>);
}

/// A read model queried with declared queries over a table.
pub trait View: Sized + Send + Sync + 'static {
    const COMPONENT_ID: &'static str;

    fn describe(methods: &mut ViewMethods<Self>);
}
