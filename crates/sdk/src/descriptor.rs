//! Static component metadata.
//!
//! A [`ComponentDescriptor`] is built once per component type from the
//! component's `describe` declaration. It maps wire method names to
//! [`HandlerSignature`]s and fn references to wire names, and is shared
//! read-only by the client and the router.

use std::{
    any::{Any, TypeId, type_name},
    collections::HashMap,
    fmt,
    sync::Arc,
};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    codec::{EncodedPayload, JsonCodec, Message, RegisterFn},
    component::{Action, EventSourcedEntity, KeyValueEntity, TimedAction, View, Workflow},
    effect::{Effect, RowEffect},
    error::{DecodeError, EncodeError, ErrorReply, InvalidComponentDefinition},
    method::{ActionHandler, Args, CommandHandler, QueryHandler, derive_method_name},
    query::QueryDefinition,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    KeyValueEntity,
    EventSourcedEntity,
    View,
    Action,
    Workflow,
    Timer,
}

impl ComponentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentKind::KeyValueEntity => "key_value_entity",
            ComponentKind::EventSourcedEntity => "event_sourced_entity",
            ComponentKind::View => "view",
            ComponentKind::Action => "action",
            ComponentKind::Workflow => "workflow",
            ComponentKind::Timer => "timer",
        }
    }

    /// Whether calls to this kind address an instance by id.
    pub fn is_stateful(&self) -> bool {
        matches!(
            self,
            ComponentKind::KeyValueEntity | ComponentKind::EventSourcedEntity | ComponentKind::Workflow
        )
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The addressable identity of a component class.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ComponentType {
    pub kind: ComponentKind,
    pub id: String,
}

impl ComponentType {
    pub fn new(kind: ComponentKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }
}

impl fmt::Display for ComponentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HandlerSignature {
    pub name: String,
    /// Codec names of the parameters, in order.
    pub params: Vec<String>,
    /// Codec name of the reply.
    pub output: String,
    /// Ignored methods are neither routable nor resolvable by clients.
    pub ignored: bool,
    /// The query evaluated by view query methods.
    pub query: Option<QueryDefinition>,
}

impl HandlerSignature {
    fn of<A: Args, R: Message>(name: String) -> Self {
        Self {
            name,
            params: A::param_types(),
            output: R::type_name().into_owned(),
            ignored: false,
            query: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ComponentDescriptor {
    component_id: String,
    kind: ComponentKind,
    rust_type: &'static str,
    handlers: HashMap<String, HandlerSignature>,
    fn_index: HashMap<TypeId, String>,
}

impl ComponentDescriptor {
    fn build(
        component_id: &str,
        kind: ComponentKind,
        rust_type: &'static str,
        decls: Declarations,
    ) -> Result<(Self, Vec<RegisterFn>), InvalidComponentDefinition> {
        if component_id.trim().is_empty() {
            return Err(InvalidComponentDefinition::new(
                rust_type,
                "component id cannot be blank",
            ));
        }
        if component_id.chars().any(char::is_whitespace) {
            return Err(InvalidComponentDefinition::new(
                component_id,
                "component id cannot contain whitespace",
            ));
        }
        if !decls.errors.is_empty() {
            return Err(InvalidComponentDefinition::new(
                component_id,
                decls.errors.join("; "),
            ));
        }

        let descriptor = ComponentDescriptor {
            component_id: component_id.to_string(),
            kind,
            rust_type,
            handlers: decls.signatures,
            fn_index: decls.fn_index,
        };

        Ok((descriptor, decls.codec_types))
    }

    /// Describes a key-value entity without registering it.
    pub fn of_key_value_entity<C: KeyValueEntity>() -> Result<Self, InvalidComponentDefinition> {
        describe_key_value_entity::<C>().map(|described| described.descriptor)
    }

    pub fn of_event_sourced_entity<C: EventSourcedEntity>()
    -> Result<Self, InvalidComponentDefinition> {
        describe_event_sourced_entity::<C>().map(|described| described.descriptor)
    }

    pub fn of_workflow<C: Workflow>() -> Result<Self, InvalidComponentDefinition> {
        describe_workflow::<C>().map(|described| described.descriptor)
    }

    pub fn of_action<C: Action>() -> Result<Self, InvalidComponentDefinition> {
        describe_action::<C>(C::COMPONENT_ID, ComponentKind::Action, C::describe)
            .map(|described| described.descriptor)
    }

    pub fn of_timed_action<C: TimedAction>() -> Result<Self, InvalidComponentDefinition> {
        describe_action::<C>(C::COMPONENT_ID, ComponentKind::Timer, C::describe)
            .map(|described| described.descriptor)
    }

    pub fn of_view<C: View>() -> Result<Self, InvalidComponentDefinition> {
        describe_view::<C>().map(|described| described.descriptor)
    }

    pub fn component_id(&self) -> &str {
        &self.component_id
    }

    pub fn kind(&self) -> ComponentKind {
        self.kind
    }

    pub fn component_type(&self) -> ComponentType {
        ComponentType::new(self.kind, self.component_id.clone())
    }

    /// Name of the Rust type the descriptor was built from.
    pub fn rust_type(&self) -> &'static str {
        self.rust_type
    }

    pub fn handlers(&self) -> &HashMap<String, HandlerSignature> {
        &self.handlers
    }

    pub fn handler(&self, name: &str) -> Option<&HandlerSignature> {
        self.handlers.get(name)
    }

    /// The handler for `name`, unless it is unknown or ignored.
    pub fn routable(&self, name: &str) -> Option<&HandlerSignature> {
        self.handler(name).filter(|signature| !signature.ignored)
    }

    pub fn method_for_fn(&self, fn_id: TypeId) -> Option<&HandlerSignature> {
        self.fn_index
            .get(&fn_id)
            .and_then(|name| self.handlers.get(name))
    }
}

/// Reply of an erased handler: the encoded value, or why it failed to encode.
pub(crate) type EncodedReply = Result<EncodedPayload, EncodeError>;

pub(crate) type ErasedCommand<C, S, U> = Arc<
    dyn Fn(&C, &S, &EncodedPayload, &Arc<JsonCodec>) -> Result<Effect<EncodedReply, U>, DecodeError>
        + Send
        + Sync,
>;

pub(crate) type ErasedAction<C> = Arc<
    dyn Fn(&C, &EncodedPayload, &Arc<JsonCodec>) -> Result<Effect<EncodedReply>, DecodeError>
        + Send
        + Sync,
>;

pub(crate) type ErasedRowUpdate =
    Arc<dyn Fn(&(dyn Any + Send + Sync)) -> Result<RowEffect<Value>, String> + Send + Sync>;

pub(crate) struct ErasedQuery<C> {
    pub(crate) call: Arc<
        dyn Fn(&C, &EncodedPayload, &JsonCodec) -> Result<Result<(), ErrorReply>, DecodeError>
            + Send
            + Sync,
    >,
    /// Converts the evaluated rows into the encoded reply type.
    pub(crate) finish: fn(&JsonCodec, Value) -> Result<EncodedPayload, ErrorReply>,
    /// Argument count of the query method. Two or more bind positionally.
    pub(crate) arity: usize,
    pub(crate) definition: QueryDefinition,
}

/// A view table fed by the commits of a key-value entity.
pub(crate) struct Subscription {
    pub(crate) view: String,
    pub(crate) source: TypeId,
    pub(crate) source_id: String,
    pub(crate) table: String,
    pub(crate) update: ErasedRowUpdate,
    pub(crate) handle_deletes: bool,
}

/// Everything a `describe` declaration produced.
pub(crate) struct Described<H> {
    pub(crate) descriptor: ComponentDescriptor,
    pub(crate) handlers: H,
    pub(crate) codec_types: Vec<RegisterFn>,
}

#[derive(Default)]
struct Declarations {
    signatures: HashMap<String, HandlerSignature>,
    fn_index: HashMap<TypeId, String>,
    codec_types: Vec<RegisterFn>,
    errors: Vec<String>,
}

impl Declarations {
    fn declare<F: 'static, A: Args, R: Message>(&mut self, signature: HandlerSignature) -> bool {
        if self.signatures.contains_key(&signature.name) {
            self.errors
                .push(format!("method name `{}` is declared twice", signature.name));
            return false;
        }
        if self.fn_index.contains_key(&TypeId::of::<F>()) {
            self.errors.push(format!(
                "`{}` is declared twice, as `{}` and `{}`",
                type_name::<F>(),
                self.fn_index[&TypeId::of::<F>()],
                signature.name
            ));
            return false;
        }

        self.codec_types.push(JsonCodec::register::<A::Message>);
        self.codec_types.push(JsonCodec::register::<R>);
        self.fn_index
            .insert(TypeId::of::<F>(), signature.name.clone());
        self.signatures.insert(signature.name.clone(), signature);
        true
    }

    fn derive_name<F>(&mut self) -> Option<String> {
        let name = derive_method_name::<F>();
        if name.is_none() {
            self.errors.push(format!(
                "cannot derive a method name from `{}`, declare it with an explicit name",
                type_name::<F>()
            ));
        }
        name
    }
}

/// Declares the command handlers of an entity or workflow.
///
/// `S` is the state handed to handlers, `U` the state update their effects
/// carry.
pub struct EntityMethods<C, S, U> {
    decls: Declarations,
    handlers: HashMap<String, ErasedCommand<C, S, U>>,
}

impl<C: 'static, S: 'static, U: Send + 'static> EntityMethods<C, S, U> {
    fn new() -> Self {
        Self {
            decls: Declarations::default(),
            handlers: HashMap::new(),
        }
    }

    /// Declares a command handler, named after its fn.
    pub fn command<A, F>(&mut self, f: F) -> &mut Self
    where
        A: Args,
        F: CommandHandler<C, S, A, Update = U>,
    {
        if let Some(name) = self.decls.derive_name::<F>() {
            self.command_named(name, f);
        }
        self
    }

    pub fn command_named<A, F>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        A: Args,
        F: CommandHandler<C, S, A, Update = U>,
    {
        let signature = HandlerSignature::of::<A, F::Reply>(name.into());
        let name = signature.name.clone();
        if self.decls.declare::<F, A, F::Reply>(signature) {
            self.handlers.insert(name, erase_command(f));
        }
        self
    }

    /// Declares a method that is neither routable nor resolvable.
    pub fn ignore<A, F>(&mut self, _f: F) -> &mut Self
    where
        A: Args,
        F: CommandHandler<C, S, A, Update = U>,
    {
        if let Some(name) = self.decls.derive_name::<F>() {
            let signature = HandlerSignature {
                ignored: true,
                ..HandlerSignature::of::<A, F::Reply>(name)
            };
            self.decls.declare::<F, A, F::Reply>(signature);
        }
        self
    }
}

fn erase_command<C, S, A, F>(f: F) -> ErasedCommand<C, S, F::Update>
where
    C: 'static,
    S: 'static,
    A: Args,
    F: CommandHandler<C, S, A>,
{
    Arc::new(
        move |component: &C, state: &S, payload: &EncodedPayload, codec: &Arc<JsonCodec>| {
            let message = codec.decode::<A::Message>(payload)?;
            let codec = Arc::clone(codec);
            Ok(f.call(component, state, message)
                .map_reply(move |value| codec.encode(&value)))
        },
    )
}

/// Declares the handlers of an action or timed action.
pub struct ActionMethods<C> {
    decls: Declarations,
    handlers: HashMap<String, ErasedAction<C>>,
}

impl<C: 'static> ActionMethods<C> {
    fn new() -> Self {
        Self {
            decls: Declarations::default(),
            handlers: HashMap::new(),
        }
    }

    pub fn action<A, F>(&mut self, f: F) -> &mut Self
    where
        A: Args,
        F: ActionHandler<C, A>,
    {
        if let Some(name) = self.decls.derive_name::<F>() {
            self.action_named(name, f);
        }
        self
    }

    pub fn action_named<A, F>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        A: Args,
        F: ActionHandler<C, A>,
    {
        let signature = HandlerSignature::of::<A, F::Reply>(name.into());
        let name = signature.name.clone();
        if self.decls.declare::<F, A, F::Reply>(signature) {
            let handler: ErasedAction<C> = Arc::new(
                move |component: &C, payload: &EncodedPayload, codec: &Arc<JsonCodec>| {
                    let message = codec.decode::<A::Message>(payload)?;
                    let codec = Arc::clone(codec);
                    Ok(f.call(component, message)
                        .map_reply(move |value| codec.encode(&value)))
                },
            );
            self.handlers.insert(name, handler);
        }
        self
    }

    pub fn ignore<A, F>(&mut self, _f: F) -> &mut Self
    where
        A: Args,
        F: ActionHandler<C, A>,
    {
        if let Some(name) = self.decls.derive_name::<F>() {
            let signature = HandlerSignature {
                ignored: true,
                ..HandlerSignature::of::<A, F::Reply>(name)
            };
            self.decls.declare::<F, A, F::Reply>(signature);
        }
        self
    }
}

/// Declares the table, queries and table updaters of a view.
pub struct ViewMethods<C> {
    decls: Declarations,
    table: Option<String>,
    queries: HashMap<String, ErasedQuery<C>>,
    updaters: Vec<TableUpdater>,
}

/// A table updater declared with [`ViewMethods::consume_key_value_entity`].
pub struct TableUpdater {
    source: TypeId,
    source_id: &'static str,
    update: ErasedRowUpdate,
    handle_deletes: bool,
}

impl TableUpdater {
    /// Deletes the row when the source entity is deleted.
    pub fn handle_deletes(&mut self) -> &mut Self {
        self.handle_deletes = true;
        self
    }
}

pub(crate) struct ViewHandlers<C> {
    pub(crate) queries: HashMap<String, ErasedQuery<C>>,
    pub(crate) subscriptions: Vec<Subscription>,
}

impl<C: 'static> ViewMethods<C> {
    fn new() -> Self {
        Self {
            decls: Declarations::default(),
            table: None,
            queries: HashMap::new(),
            updaters: Vec::new(),
        }
    }

    /// Names the table the view's rows live in.
    pub fn table(&mut self, name: impl Into<String>) -> &mut Self {
        self.table = Some(name.into());
        self
    }

    /// Declares a query method evaluating `template`.
    pub fn query<A, F>(&mut self, template: &str, f: F) -> &mut Self
    where
        A: Args,
        F: QueryHandler<C, A>,
    {
        if let Some(name) = self.decls.derive_name::<F>() {
            self.query_named(name, template, f);
        }
        self
    }

    pub fn query_named<A, F>(&mut self, name: impl Into<String>, template: &str, f: F) -> &mut Self
    where
        A: Args,
        F: QueryHandler<C, A>,
    {
        let name = name.into();
        let definition = match QueryDefinition::parse(template) {
            Ok(definition) => definition,
            Err(err) => {
                self.decls
                    .errors
                    .push(format!("query method `{name}` has an invalid query: {err}"));
                return self;
            }
        };
        if let Err(reason) = definition.check_arity(A::ARITY) {
            self.decls
                .errors
                .push(format!("query method `{name}` {reason}"));
            return self;
        }
        let signature = HandlerSignature {
            query: Some(definition.clone()),
            ..HandlerSignature::of::<A, F::Reply>(name.clone())
        };
        if self.decls.declare::<F, A, F::Reply>(signature) {
            let query = ErasedQuery {
                call: Arc::new(
                    move |component: &C, payload: &EncodedPayload, codec: &JsonCodec| {
                        let message = codec.decode::<A::Message>(payload)?;
                        Ok(f.call(component, message).into_outcome())
                    },
                ),
                finish: finish_query::<F::Reply>,
                arity: A::ARITY,
                definition,
            };
            self.queries.insert(name, query);
        }
        self
    }

    /// Feeds the view table from the state of key-value entity `E`.
    ///
    /// Rows are keyed by entity id. `E` must be registered before the view.
    pub fn consume_key_value_entity<E, T>(
        &mut self,
        f: impl Fn(&E::State) -> RowEffect<T> + Send + Sync + 'static,
    ) -> &mut TableUpdater
    where
        E: KeyValueEntity,
        T: Serialize + 'static,
    {
        let update: ErasedRowUpdate = Arc::new(move |state: &(dyn Any + Send + Sync)| {
            let state = state
                .downcast_ref::<E::State>()
                .ok_or_else(|| format!("expected `{}` state", type_name::<E::State>()))?;
            match f(state) {
                RowEffect::UpdateRow(row) => serde_json::to_value(row)
                    .map(RowEffect::UpdateRow)
                    .map_err(|err| err.to_string()),
                RowEffect::DeleteRow => Ok(RowEffect::DeleteRow),
                RowEffect::Ignore => Ok(RowEffect::Ignore),
            }
        });
        self.updaters.push(TableUpdater {
            source: TypeId::of::<E>(),
            source_id: E::COMPONENT_ID,
            update,
            handle_deletes: false,
        });
        let index = self.updaters.len() - 1;
        &mut self.updaters[index]
    }

    fn finish(mut self, view: &str) -> (Declarations, ViewHandlers<C>) {
        match &self.table {
            Some(table) => {
                for (name, query) in &self.queries {
                    if &query.definition.table != table {
                        self.decls.errors.push(format!(
                            "query method `{name}` reads table `{}` but the view declares `{table}`",
                            query.definition.table
                        ));
                    }
                }
            }
            None if !self.queries.is_empty() || !self.updaters.is_empty() => {
                self.decls
                    .errors
                    .push("view declares queries or updaters but no table".to_string());
            }
            None => {}
        }

        let table = self.table.clone().unwrap_or_default();
        let subscriptions = self
            .updaters
            .into_iter()
            .map(|updater| Subscription {
                view: view.to_string(),
                source: updater.source,
                source_id: updater.source_id.to_string(),
                table: table.clone(),
                update: updater.update,
                handle_deletes: updater.handle_deletes,
            })
            .collect();

        (
            self.decls,
            ViewHandlers {
                queries: self.queries,
                subscriptions,
            },
        )
    }
}

fn finish_query<R: Message>(codec: &JsonCodec, rows: Value) -> Result<EncodedPayload, ErrorReply> {
    let reply: R = serde_json::from_value(rows).map_err(|err| {
        ErrorReply::internal(format!(
            "query result does not fit `{}`: {err}",
            R::type_name()
        ))
    })?;
    codec
        .encode(&reply)
        .map_err(|err| ErrorReply::internal(err.to_string()))
}

pub(crate) type EntityHandlers<C, S, U> = HashMap<String, ErasedCommand<C, S, U>>;

fn describe_entity<C, S, U>(
    component_id: &str,
    kind: ComponentKind,
    describe: impl FnOnce(&mut EntityMethods<C, S, U>),
) -> Result<Described<EntityHandlers<C, S, U>>, InvalidComponentDefinition>
where
    C: 'static,
    S: 'static,
    U: Send + 'static,
{
    let mut methods = EntityMethods::new();
    describe(&mut methods);
    let (descriptor, codec_types) =
        ComponentDescriptor::build(component_id, kind, type_name::<C>(), methods.decls)?;

    Ok(Described {
        descriptor,
        handlers: methods.handlers,
        codec_types,
    })
}

pub(crate) fn describe_key_value_entity<C: KeyValueEntity>()
-> Result<Described<EntityHandlers<C, C::State, C::State>>, InvalidComponentDefinition> {
    let mut described =
        describe_entity(C::COMPONENT_ID, ComponentKind::KeyValueEntity, C::describe)?;
    described
        .codec_types
        .push(JsonCodec::register::<C::State>);
    Ok(described)
}

pub(crate) fn describe_workflow<C: Workflow>()
-> Result<Described<EntityHandlers<C, C::State, C::State>>, InvalidComponentDefinition> {
    let mut described = describe_entity(C::COMPONENT_ID, ComponentKind::Workflow, C::describe)?;
    described
        .codec_types
        .push(JsonCodec::register::<C::State>);
    Ok(described)
}

pub(crate) fn describe_event_sourced_entity<C: EventSourcedEntity>() -> Result<
    Described<EntityHandlers<C, C::State, Vec<C::Event>>>,
    InvalidComponentDefinition,
> {
    let mut described = describe_entity(
        C::COMPONENT_ID,
        ComponentKind::EventSourcedEntity,
        C::describe,
    )?;
    described
        .codec_types
        .push(JsonCodec::register::<C::State>);
    described
        .codec_types
        .push(JsonCodec::register::<C::Event>);
    Ok(described)
}

pub(crate) fn describe_action<C: 'static>(
    component_id: &str,
    kind: ComponentKind,
    describe: impl FnOnce(&mut ActionMethods<C>),
) -> Result<Described<HashMap<String, ErasedAction<C>>>, InvalidComponentDefinition> {
    let mut methods = ActionMethods::new();
    describe(&mut methods);
    let (descriptor, codec_types) =
        ComponentDescriptor::build(component_id, kind, type_name::<C>(), methods.decls)?;

    Ok(Described {
        descriptor,
        handlers: methods.handlers,
        codec_types,
    })
}

pub(crate) fn describe_view<C: View>()
-> Result<Described<ViewHandlers<C>>, InvalidComponentDefinition> {
    let mut methods = ViewMethods::new();
    C::describe(&mut methods);
    let (decls, handlers) = methods.finish(C::COMPONENT_ID);
    let (descriptor, codec_types) = ComponentDescriptor::build(
        C::COMPONENT_ID,
        ComponentKind::View,
        type_name::<C>(),
        decls,
    )?;

    Ok(Described {
        descriptor,
        handlers,
        codec_types,
    })
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::{
        Message,
        effect::{QueryEffect, update_state},
    };

    #[derive(Clone, Debug, Default, PartialEq, Message, Serialize, Deserialize)]
    struct CounterState {
        value: i64,
    }

    struct Counter;

    impl Counter {
        fn increase(&self, state: &CounterState, by: i64) -> Effect<i64, CounterState> {
            let value = state.value + by;
            update_state(CounterState { value }).then_reply(value)
        }

        fn get(&self, state: &CounterState) -> Effect<i64, CounterState> {
            Effect::reply(state.value)
        }

        fn debug_dump(&self, state: &CounterState) -> Effect<String, CounterState> {
            Effect::reply(format!("{state:?}"))
        }
    }

    impl KeyValueEntity for Counter {
        const COMPONENT_ID: &'static str = "counter";
        type State = CounterState;

        fn empty_state(&self) -> CounterState {
            CounterState::default()
        }

        fn describe(methods: &mut EntityMethods<Self, CounterState, CounterState>) {
            methods
                .command(Counter::increase)
                .command(Counter::get)
                .ignore(Counter::debug_dump);
        }
    }

    struct Twice;

    impl KeyValueEntity for Twice {
        const COMPONENT_ID: &'static str = "twice";
        type State = CounterState;

        fn empty_state(&self) -> CounterState {
            CounterState::default()
        }

        fn describe(methods: &mut EntityMethods<Self, CounterState, CounterState>) {
            methods
                .command_named("get", |_: &Twice, s: &CounterState| {
                    Effect::<i64, CounterState>::reply(s.value)
                })
                .command_named("get", |_: &Twice, s: &CounterState, by: i64| {
                    Effect::<i64, CounterState>::reply(s.value + by)
                });
        }
    }

    struct Blank;

    impl Action for Blank {
        const COMPONENT_ID: &'static str = "  ";

        fn describe(_methods: &mut ActionMethods<Self>) {}
    }

    #[derive(Debug, Message, Serialize, Deserialize)]
    struct UserSummary {
        name: String,
    }

    struct Users;

    impl Users {
        fn by_name(&self, _name: String) -> QueryEffect<UserSummary> {
            QueryEffect::query_result()
        }
    }

    impl View for Users {
        const COMPONENT_ID: &'static str = "users";

        fn describe(methods: &mut ViewMethods<Self>) {
            methods
                .table("user_rows")
                .query("SELECT * FROM users WHERE name = :name", Users::by_name);
        }
    }

    struct People;

    impl People {
        fn by_name_and_city(&self, _name: String, _city: String) -> QueryEffect<UserSummary> {
            QueryEffect::query_result()
        }
    }

    impl View for People {
        const COMPONENT_ID: &'static str = "people";

        fn describe(methods: &mut ViewMethods<Self>) {
            methods.table("people").query(
                "SELECT * FROM people WHERE name = :name AND city = :city",
                People::by_name_and_city,
            );
        }
    }

    struct Miscounted;

    impl View for Miscounted {
        const COMPONENT_ID: &'static str = "miscounted";

        fn describe(methods: &mut ViewMethods<Miscounted>) {
            methods
                .table("people")
                .query_named(
                    "anyone",
                    "SELECT * FROM people WHERE name = :name",
                    |_: &Miscounted| QueryEffect::<UserSummary>::query_result(),
                )
                .query_named(
                    "by_three",
                    "SELECT * FROM people WHERE name = :name AND city = :city",
                    |_: &Miscounted, _a: String, _b: String, _c: String| {
                        QueryEffect::<UserSummary>::query_result()
                    },
                );
        }
    }

    #[test]
    fn describes_declared_handlers() {
        let descriptor = ComponentDescriptor::of_key_value_entity::<Counter>().unwrap();

        assert_eq!(descriptor.component_id(), "counter");
        assert_eq!(descriptor.kind(), ComponentKind::KeyValueEntity);
        assert_eq!(descriptor.handlers().len(), 3);

        let increase = descriptor.routable("increase").unwrap();
        assert_eq!(increase.params, ["i64"]);
        assert_eq!(increase.output, "i64");
        assert!(descriptor.routable("get").unwrap().params.is_empty());

        assert!(descriptor.handler("debug_dump").unwrap().ignored);
        assert!(descriptor.routable("debug_dump").is_none());
    }

    #[test]
    fn describing_is_deterministic() {
        let first = ComponentDescriptor::of_key_value_entity::<Counter>().unwrap();
        let second = ComponentDescriptor::of_key_value_entity::<Counter>().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn fn_references_index_their_method() {
        fn fn_id<F: 'static>(_f: F) -> TypeId {
            TypeId::of::<F>()
        }

        let descriptor = ComponentDescriptor::of_key_value_entity::<Counter>().unwrap();
        let signature = descriptor.method_for_fn(fn_id(Counter::increase)).unwrap();
        assert_eq!(signature.name, "increase");
    }

    #[test]
    fn rejects_duplicate_method_names() {
        let err = ComponentDescriptor::of_key_value_entity::<Twice>().unwrap_err();
        assert_eq!(err.component, "twice");
        assert!(err.reason.contains("declared twice"), "{}", err.reason);
    }

    #[test]
    fn rejects_blank_component_ids() {
        let err = ComponentDescriptor::of_action::<Blank>().unwrap_err();
        assert!(err.reason.contains("blank"));
    }

    #[test]
    fn rejects_queries_over_undeclared_tables() {
        let err = ComponentDescriptor::of_view::<Users>().unwrap_err();
        assert!(err.reason.contains("`users`"), "{}", err.reason);
    }

    #[test]
    fn multi_argument_queries_bind_each_placeholder() {
        let descriptor = ComponentDescriptor::of_view::<People>().unwrap();
        let signature = descriptor.routable("by_name_and_city").unwrap();
        assert_eq!(signature.params, ["string", "string"]);
        assert_eq!(
            signature.query.as_ref().unwrap().parameters(),
            ["name", "city"]
        );
    }

    #[test]
    fn rejects_queries_whose_arguments_miss_placeholders() {
        let err = ComponentDescriptor::of_view::<Miscounted>().unwrap_err();
        assert!(err.reason.contains("`anyone` takes no arguments"), "{}", err.reason);
        assert!(err.reason.contains("`by_three` takes 3 arguments"), "{}", err.reason);
    }
}
