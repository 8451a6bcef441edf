//! Storage seams used by the router.
//!
//! The router never persists anything itself: entity snapshots and event
//! journals go through a [`StateStore`], view rows through a [`RowStore`].
//! The in-memory implementations are meant for tests and demos.

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    sync::{Mutex, MutexGuard, PoisonError},
};

use futures_util::{FutureExt, future::BoxFuture};
use serde_json::Value;

use crate::{codec::EncodedPayload, descriptor::ComponentType, error::StoreError};

/// Identifies the stored state of one entity instance.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateKey {
    pub component_id: String,
    pub entity_id: String,
}

impl StateKey {
    pub fn new(component_type: &ComponentType, entity_id: impl Into<String>) -> Self {
        Self {
            component_id: component_type.id.clone(),
            entity_id: entity_id.into(),
        }
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.component_id, self.entity_id)
    }
}

/// Committed state of entities and workflows.
pub trait StateStore: Send + Sync + 'static {
    fn load_snapshot(&self, key: &StateKey)
    -> BoxFuture<'_, Result<Option<EncodedPayload>, StoreError>>;

    fn save_snapshot(
        &self,
        key: &StateKey,
        snapshot: EncodedPayload,
    ) -> BoxFuture<'_, Result<(), StoreError>>;

    /// Events of the instance, oldest first.
    fn load_events(&self, key: &StateKey) -> BoxFuture<'_, Result<Vec<EncodedPayload>, StoreError>>;

    fn append_events(
        &self,
        key: &StateKey,
        events: Vec<EncodedPayload>,
    ) -> BoxFuture<'_, Result<(), StoreError>>;

    /// Removes both the snapshot and the events of the instance.
    fn delete(&self, key: &StateKey) -> BoxFuture<'_, Result<(), StoreError>>;
}

/// Rows of view tables, keyed by the id of the entity they were built from.
pub trait RowStore: Send + Sync + 'static {
    fn upsert(&self, table: &str, key: &str, row: Value) -> BoxFuture<'_, Result<(), StoreError>>;

    fn delete(&self, table: &str, key: &str) -> BoxFuture<'_, Result<(), StoreError>>;

    /// All rows of the table, ordered by key.
    fn rows(&self, table: &str) -> BoxFuture<'_, Result<Vec<(String, Value)>, StoreError>>;
}

#[derive(Default)]
struct StoredEntity {
    snapshot: Option<EncodedPayload>,
    events: Vec<EncodedPayload>,
}

#[derive(Default)]
pub struct MemoryStateStore {
    entities: Mutex<HashMap<StateKey, StoredEntity>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of instances with committed state.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<StateKey, StoredEntity>> {
        self.entities.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl StateStore for MemoryStateStore {
    fn load_snapshot(
        &self,
        key: &StateKey,
    ) -> BoxFuture<'_, Result<Option<EncodedPayload>, StoreError>> {
        let snapshot = self
            .lock()
            .get(key)
            .and_then(|entity| entity.snapshot.clone());
        async move { Ok(snapshot) }.boxed()
    }

    fn save_snapshot(
        &self,
        key: &StateKey,
        snapshot: EncodedPayload,
    ) -> BoxFuture<'_, Result<(), StoreError>> {
        self.lock().entry(key.clone()).or_default().snapshot = Some(snapshot);
        async { Ok(()) }.boxed()
    }

    fn load_events(&self, key: &StateKey) -> BoxFuture<'_, Result<Vec<EncodedPayload>, StoreError>> {
        let events = self
            .lock()
            .get(key)
            .map(|entity| entity.events.clone())
            .unwrap_or_default();
        async move { Ok(events) }.boxed()
    }

    fn append_events(
        &self,
        key: &StateKey,
        events: Vec<EncodedPayload>,
    ) -> BoxFuture<'_, Result<(), StoreError>> {
        self.lock()
            .entry(key.clone())
            .or_default()
            .events
            .extend(events);
        async { Ok(()) }.boxed()
    }

    fn delete(&self, key: &StateKey) -> BoxFuture<'_, Result<(), StoreError>> {
        self.lock().remove(key);
        async { Ok(()) }.boxed()
    }
}

#[derive(Default)]
pub struct MemoryRowStore {
    tables: Mutex<HashMap<String, BTreeMap<String, Value>>>,
}

impl MemoryRowStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, BTreeMap<String, Value>>> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl RowStore for MemoryRowStore {
    fn upsert(&self, table: &str, key: &str, row: Value) -> BoxFuture<'_, Result<(), StoreError>> {
        self.lock()
            .entry(table.to_string())
            .or_default()
            .insert(key.to_string(), row);
        async { Ok(()) }.boxed()
    }

    fn delete(&self, table: &str, key: &str) -> BoxFuture<'_, Result<(), StoreError>> {
        if let Some(rows) = self.lock().get_mut(table) {
            rows.remove(key);
        }
        async { Ok(()) }.boxed()
    }

    fn rows(&self, table: &str) -> BoxFuture<'_, Result<Vec<(String, Value)>, StoreError>> {
        let rows = self
            .lock()
            .get(table)
            .map(|rows| {
                rows.iter()
                    .map(|(key, row)| (key.clone(), row.clone()))
                    .collect()
            })
            .unwrap_or_default();
        async move { Ok(rows) }.boxed()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::descriptor::ComponentKind;

    fn payload(n: u8) -> EncodedPayload {
        EncodedPayload {
            type_url: "json.keel.dev/u8".to_string(),
            bytes: n.to_string().into_bytes(),
        }
    }

    #[tokio::test]
    async fn keeps_snapshots_and_events_per_instance() {
        let store = MemoryStateStore::new();
        let counter = ComponentType::new(ComponentKind::KeyValueEntity, "counter");
        let a = StateKey::new(&counter, "a");
        let b = StateKey::new(&counter, "b");

        store.save_snapshot(&a, payload(1)).await.unwrap();
        store.append_events(&b, vec![payload(1), payload(2)]).await.unwrap();
        store.append_events(&b, vec![payload(3)]).await.unwrap();

        assert_eq!(store.load_snapshot(&a).await.unwrap(), Some(payload(1)));
        assert_eq!(store.load_snapshot(&b).await.unwrap(), None);
        assert_eq!(
            store.load_events(&b).await.unwrap(),
            vec![payload(1), payload(2), payload(3)]
        );

        store.delete(&b).await.unwrap();
        assert!(store.load_events(&b).await.unwrap().is_empty());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn rows_come_back_ordered_by_key() {
        let store = MemoryRowStore::new();
        store.upsert("users", "u2", json!({"name": "Bob"})).await.unwrap();
        store.upsert("users", "u1", json!({"name": "Ana"})).await.unwrap();
        store.upsert("users", "u3", json!({"name": "Cy"})).await.unwrap();
        store.delete("users", "u3").await.unwrap();

        let keys: Vec<_> = store
            .rows("users")
            .await
            .unwrap()
            .into_iter()
            .map(|(key, _)| key)
            .collect();
        assert_eq!(keys, ["u1", "u2"]);
        assert!(store.rows("nothing").await.unwrap().is_empty());
    }
}
