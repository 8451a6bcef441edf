use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

/// Metadata key carrying W3C trace context.
pub const TRACE_PARENT_KEY: &str = "traceparent";

tokio::task_local! {
    static CALL_METADATA: Metadata;
}

/// Headers of the call whose handler is running on the current task.
///
/// Empty outside of a handler. Async replies see the headers of the call
/// that produced them.
pub fn current() -> Metadata {
    CALL_METADATA.try_with(Metadata::clone).unwrap_or_default()
}

/// Runs `future` with `metadata` as the headers of the call being handled.
pub(crate) async fn scope<F: Future>(metadata: Metadata, future: F) -> F::Output {
    CALL_METADATA.scope(metadata, future).await
}

/// Key-value headers attached to a call or a reply.
///
/// Keys are case-insensitive and stored lowercased. Every mutating operation
/// takes `self` by value, so a shared `Metadata` is never changed in place.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Metadata {
    entries: BTreeMap<String, String>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.entries
            .insert(key.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    pub fn remove(mut self, key: impl AsRef<str>) -> Self {
        self.entries.remove(&key.as_ref().to_ascii_lowercase());
        self
    }

    pub fn get(&self, key: impl AsRef<str>) -> Option<&str> {
        self.entries
            .get(&key.as_ref().to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Merges `other` into these headers. Entries of `other` win.
    pub fn merge(mut self, other: &Metadata) -> Self {
        self.entries
            .extend(other.entries.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    /// The entries whose keys are among `keys`.
    pub fn select<K: AsRef<str>>(&self, keys: &[K]) -> Metadata {
        keys.iter()
            .filter_map(|key| self.get(key).map(|value| (key.as_ref(), value)))
            .collect()
    }

    pub fn trace_parent(&self) -> Option<&str> {
        self.get(TRACE_PARENT_KEY)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for Metadata {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        iter.into_iter()
            .fold(Metadata::new(), |metadata, (k, v)| metadata.set(k, v))
    }
}

impl<'de> Deserialize<'de> for Metadata {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        BTreeMap::<String, String>::deserialize(deserializer).map(Metadata::from_iter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_case_insensitive() {
        let metadata = Metadata::new().set("TraceParent", "00-abc-01");
        assert_eq!(metadata.trace_parent(), Some("00-abc-01"));
        assert_eq!(metadata.get("TRACEPARENT"), Some("00-abc-01"));
    }

    #[test]
    fn merge_prefers_the_other_side() {
        let base = crate::metadata! { "a" => "1", "b" => "2" };
        let merged = base.clone().merge(&Metadata::new().set("b", "3"));

        assert_eq!(merged.get("a"), Some("1"));
        assert_eq!(merged.get("b"), Some("3"));
        assert_eq!(base.get("b"), Some("2"));
    }

    #[test]
    fn serializes_as_a_plain_map() {
        let metadata: Metadata = [("x-tenant", "acme")].into_iter().collect();
        assert_eq!(
            serde_json::to_string(&metadata).unwrap(),
            r#"{"x-tenant":"acme"}"#
        );
        assert!(metadata.remove("X-Tenant").is_empty());
    }

    #[test]
    fn deserialized_keys_are_case_insensitive() {
        let metadata: Metadata =
            serde_json::from_str(r#"{"Traceparent":"00-abc-01","X-Tenant":"acme"}"#).unwrap();
        assert_eq!(metadata.trace_parent(), Some("00-abc-01"));
        assert_eq!(metadata.get("x-tenant"), Some("acme"));
    }

    #[test]
    fn select_keeps_only_the_named_entries() {
        let metadata = crate::metadata! { "traceparent" => "00-abc-01", "cookie" => "secret" };
        let selected = metadata.select(&["TraceParent", "x-missing"]);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected.trace_parent(), Some("00-abc-01"));
    }

    #[tokio::test]
    async fn current_headers_follow_the_call_scope() {
        assert!(current().is_empty());

        let seen = scope(Metadata::new().set("x-tenant", "acme"), async {
            current().get("x-tenant").map(str::to_string)
        })
        .await;
        assert_eq!(seen.as_deref(), Some("acme"));
        assert!(current().is_empty());
    }
}
