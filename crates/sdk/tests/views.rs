mod common;

use keel_sdk::prelude::*;

use common::{UserEntity, UserList, UserRow, UsersByName};

async fn create_user(router: &ComponentRouter, id: &str, name: &str, email: &str) {
    router
        .client()
        .for_key_value_entity(id)
        .method(UserEntity::create)
        .unwrap()
        .invoke_async((name.to_string(), email.to_string()))
        .await
        .unwrap();
}

#[tokio::test]
async fn query_without_a_match_is_not_found() {
    let router = common::router();
    let get_user = router
        .client()
        .for_view()
        .method(UsersByName::get_user)
        .unwrap();

    let err = get_user.invoke_async("alice".to_string()).await.unwrap_err();
    assert!(matches!(err, ClientError::NotFound(_)), "{err:?}");

    create_user(&router, "u-1", "alice", "alice@example.com").await;

    let row = get_user.invoke_async("alice".to_string()).await.unwrap();
    assert_eq!(
        row,
        UserRow {
            name: "alice".to_string(),
            email: "alice@example.com".to_string(),
        }
    );
}

#[tokio::test]
async fn collection_queries_wrap_every_match() {
    let router = common::router();
    create_user(&router, "u-1", "alice", "team@example.com").await;
    create_user(&router, "u-2", "bob", "team@example.com").await;
    create_user(&router, "u-3", "carol", "carol@example.com").await;

    let by_email = router
        .client()
        .for_view()
        .method(UsersByName::by_email)
        .unwrap();
    let UserList { users } = by_email
        .invoke_async("team@example.com".to_string())
        .await
        .unwrap();
    let names: Vec<_> = users.iter().map(|user| user.name.as_str()).collect();
    assert_eq!(names, ["alice", "bob"]);

    let UserList { users } = by_email
        .invoke_async("nobody@example.com".to_string())
        .await
        .unwrap();
    assert!(users.is_empty());
}

#[tokio::test]
async fn multi_argument_queries_bind_positionally() {
    let router = common::router();
    create_user(&router, "u-1", "alice", "alice@example.com").await;
    create_user(&router, "u-2", "alice", "alice@work.example").await;

    let lookup = router
        .client()
        .for_view()
        .method(UsersByName::get_user_with_email)
        .unwrap();

    let row = lookup
        .invoke_async(("alice".to_string(), "alice@work.example".to_string()))
        .await
        .unwrap();
    assert_eq!(row.email, "alice@work.example");

    let err = lookup
        .invoke_async(("alice".to_string(), "bob@example.com".to_string()))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::NotFound(_)), "{err:?}");
}

#[tokio::test]
async fn rows_follow_entity_updates_and_deletes() {
    let rows = Arc::new(MemoryRowStore::new());
    let router = ComponentRouter::builder(common::registry())
        .row_store(rows.clone())
        .build();

    create_user(&router, "u-1", "alice", "alice@example.com").await;
    create_user(&router, "u-1", "alice", "alice@work.example").await;

    let stored = rows.rows("users_by_name").await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].0, "u-1");
    assert_eq!(stored[0].1["email"], "alice@work.example");

    router
        .client()
        .for_key_value_entity("u-1")
        .method(UserEntity::delete)
        .unwrap()
        .invoke_async(())
        .await
        .unwrap();
    assert!(rows.rows("users_by_name").await.unwrap().is_empty());

    let err = router
        .client()
        .for_view()
        .method(UsersByName::get_user)
        .unwrap()
        .invoke_async("alice".to_string())
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::NotFound(_)));
}

#[tokio::test]
async fn ignored_states_produce_no_rows() {
    let rows = Arc::new(MemoryRowStore::new());
    let router = ComponentRouter::builder(common::registry())
        .row_store(rows.clone())
        .build();

    create_user(&router, "u-1", "", "ghost@example.com").await;
    assert!(rows.rows("users_by_name").await.unwrap().is_empty());
}

#[tokio::test]
async fn query_handlers_can_refuse() {
    let router = common::router();
    let err = router
        .client()
        .for_view()
        .method(UsersByName::forbidden)
        .unwrap()
        .invoke_async(())
        .await
        .unwrap_err();
    match err {
        ClientError::Remote(reply) => assert_eq!(reply.code, ErrorCode::Rejected),
        other => panic!("unexpected error: {other:?}"),
    }
}
