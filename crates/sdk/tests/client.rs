mod common;

use keel_sdk::{
    method::{ResolvedMethod, resolve},
    prelude::*,
};
use serde::{Deserialize, Serialize};

use common::{Counter, RecordingExecutor, ShoppingCart, UsersByName};

fn resolve_as<C: 'static, F: 'static>(
    registry: &ComponentRegistry,
    kind: ComponentKind,
    _f: F,
) -> Result<ResolvedMethod, ClientError> {
    resolve::<C, F>(registry, kind, Some("c-1".to_string()), 0)
}

#[tokio::test]
async fn unresolvable_methods_never_reach_the_executor() {
    let executor = Arc::new(RecordingExecutor::default());
    let client = ComponentClient::new(common::registry(), executor.clone());

    let err = client
        .for_key_value_entity("c-1")
        .method(Counter::undeclared)
        .unwrap_err();
    assert!(matches!(err, ClientError::UnknownComponentMethod { .. }));

    let err = client
        .for_key_value_entity("c-1")
        .method(Counter::debug_dump)
        .unwrap_err();
    assert!(matches!(err, ClientError::UnknownComponentMethod { .. }));

    // Registered, but as a key-value entity.
    let err = resolve_as::<Counter, _>(client.registry(), ComponentKind::Workflow, Counter::get)
        .unwrap_err();
    assert!(matches!(err, ClientError::UnknownComponentMethod { .. }));

    assert_eq!(executor.count(), 0);
}

#[test]
fn resolution_yields_the_wire_address() {
    let registry = common::registry();
    let resolved =
        resolve_as::<Counter, _>(&registry, ComponentKind::KeyValueEntity, Counter::get).unwrap();
    assert_eq!(
        resolved,
        ResolvedMethod {
            component_type: ComponentType::new(ComponentKind::KeyValueEntity, "counter"),
            component_id: Some("c-1".to_string()),
            method_name: "get".to_string(),
        }
    );
}

#[tokio::test]
async fn resolved_calls_go_through_the_executor() {
    let executor = Arc::new(RecordingExecutor::default());
    let client = ComponentClient::new(common::registry(), executor.clone());

    let err = client
        .for_key_value_entity("c-1")
        .method(Counter::increase)
        .unwrap()
        .invoke_async(1)
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Remote(ref reply) if reply.code == ErrorCode::Unavailable));
    assert_eq!(executor.count(), 1);
}

#[tokio::test]
async fn deferred_calls_run_when_executed() {
    let router = common::router();
    let client = router.client();
    let increase = client
        .for_key_value_entity("deferred")
        .method(Counter::increase)
        .unwrap();

    let call = increase.deferred(5);
    assert_eq!(call.method_name(), "increase");
    assert_eq!(call.component_id(), Some("deferred"));
    assert_eq!(call.component_type().id, "counter");

    let get = client
        .for_key_value_entity("deferred")
        .method(Counter::get)
        .unwrap();
    assert_eq!(get.invoke_async(()).await.unwrap(), 0);

    assert_eq!(client.execute(call.clone()).await.unwrap(), 5);
    assert_eq!(client.execute(call).await.unwrap(), 10);
}

#[tokio::test]
async fn with_metadata_returns_a_new_reference() {
    let router = common::router();
    let client = router
        .client()
        .with_metadata(&metadata! { "tenant" => "acme" });
    let increase = client
        .for_key_value_entity("c-1")
        .method(Counter::increase)
        .unwrap();

    let traced = increase.with_metadata(&metadata! { "traceparent" => "00-abc-01" });

    assert_eq!(increase.metadata().get("tenant"), Some("acme"));
    assert_eq!(increase.metadata().trace_parent(), None);
    assert_eq!(traced.metadata().get("tenant"), Some("acme"));
    assert_eq!(traced.metadata().trace_parent(), Some("00-abc-01"));
    assert_eq!(
        traced.deferred(1).metadata().trace_parent(),
        Some("00-abc-01")
    );
    assert_eq!(traced.invoke_async(1).await.unwrap(), 1);
}

#[test]
fn descriptors_are_deterministic() {
    let first = ComponentDescriptor::of_key_value_entity::<ShoppingCart>().unwrap();
    let second = ComponentDescriptor::of_key_value_entity::<ShoppingCart>().unwrap();
    assert_eq!(first, second);

    let view = ComponentDescriptor::of_view::<UsersByName>().unwrap();
    let get_user = view.routable("get_user").unwrap();
    assert_eq!(get_user.params, vec!["string".to_string()]);
    assert_eq!(get_user.output, "UserRow");
}

#[test]
fn registry_rejects_duplicates() {
    let mut registry = ComponentRegistry::builder();
    registry.register_key_value_entity(|_| Counter).unwrap();
    assert!(registry.register_key_value_entity(|_| Counter).is_err());
}

#[test]
fn views_must_consume_registered_entities() {
    let mut registry = ComponentRegistry::builder();
    let err = registry.register_view(|_| UsersByName).unwrap_err();
    assert!(err.to_string().contains("user"), "{err}");
}

#[derive(Clone, Debug, Default, Message, Serialize, Deserialize)]
#[message_type("CounterState")]
struct Impostor {
    value: String,
}

struct Clash;

impl Clash {
    fn get(&self, state: &Impostor) -> Effect<String, Impostor> {
        Effect::reply(state.value.clone())
    }
}

impl KeyValueEntity for Clash {
    const COMPONENT_ID: &'static str = "clash";
    type State = Impostor;

    fn empty_state(&self) -> Impostor {
        Impostor::default()
    }

    fn describe(methods: &mut EntityMethods<Self, Impostor, Impostor>) {
        methods.command(Clash::get);
    }
}

#[test]
fn conflicting_type_names_fail_registration_without_side_effects() {
    let mut registry = ComponentRegistry::builder();
    registry.register_key_value_entity(|_| Counter).unwrap();

    let err = registry.register_key_value_entity(|_| Clash).unwrap_err();
    assert!(err.to_string().contains("CounterState"), "{err}");

    let registry = registry.build();
    assert!(registry.descriptor_of::<Clash>().is_none());
    assert!(!registry.codec().is_registered::<Impostor>());
}
