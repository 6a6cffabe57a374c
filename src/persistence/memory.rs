use super::KeyValueStore;
use crate::error::OrchestrationResult;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;

/// Process-local [`KeyValueStore`]
#[derive(Debug, Default)]
pub struct InMemoryKeyValueStore {
    values: DashMap<String, String>,
    sorted: DashMap<String, HashMap<String, i64>>,
}

impl InMemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of plain keys held
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[async_trait]
impl KeyValueStore for InMemoryKeyValueStore {
    async fn get(&self, key: &str) -> OrchestrationResult<Option<String>> {
        Ok(self.values.get(key).map(|entry| entry.value().clone()))
    }

    async fn set(&self, key: &str, value: String) -> OrchestrationResult<()> {
        self.values.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> OrchestrationResult<bool> {
        let removed_value = self.values.remove(key).is_some();
        let removed_set = self.sorted.remove(key).is_some();
        Ok(removed_value || removed_set)
    }

    async fn sorted_add(&self, key: &str, member: &str, score: i64) -> OrchestrationResult<()> {
        self.sorted
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string(), score);
        Ok(())
    }

    async fn sorted_remove(&self, key: &str, member: &str) -> OrchestrationResult<bool> {
        Ok(self
            .sorted
            .get_mut(key)
            .is_some_and(|mut set| set.remove(member).is_some()))
    }

    async fn sorted_range_desc(
        &self,
        key: &str,
        limit: Option<usize>,
    ) -> OrchestrationResult<Vec<String>> {
        let Some(set) = self.sorted.get(key) else {
            return Ok(Vec::new());
        };

        let mut members: Vec<(&String, &i64)> = set.iter().collect();
        members.sort_by(|a, b| b.1.cmp(a.1).then_with(|| b.0.cmp(a.0)));

        Ok(members
            .into_iter()
            .take(limit.unwrap_or(usize::MAX))
            .map(|(member, _)| member.clone())
            .collect())
    }

    async fn ping(&self) -> OrchestrationResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::KeyValueStoreExt;
    use serde_json::json;

    #[tokio::test]
    async fn test_values_round_trip() {
        let store = InMemoryKeyValueStore::new();

        store.set("a", "1".to_string()).await.unwrap();
        assert_eq!(store.get("a").await.unwrap().as_deref(), Some("1"));
        assert!(store.delete("a").await.unwrap());
        assert!(!store.delete("a").await.unwrap());
        assert_eq!(store.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_sorted_range_is_newest_first_and_limited() {
        let store = InMemoryKeyValueStore::new();
        store.sorted_add("idx", "old", 10).await.unwrap();
        store.sorted_add("idx", "new", 30).await.unwrap();
        store.sorted_add("idx", "mid", 20).await.unwrap();

        assert_eq!(
            store.sorted_range_desc("idx", None).await.unwrap(),
            vec!["new", "mid", "old"]
        );
        assert_eq!(
            store.sorted_range_desc("idx", Some(2)).await.unwrap(),
            vec!["new", "mid"]
        );

        assert!(store.sorted_remove("idx", "mid").await.unwrap());
        assert!(!store.sorted_remove("idx", "mid").await.unwrap());
        assert!(store.sorted_range_desc("missing", None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_json_helpers() {
        let store = InMemoryKeyValueStore::new();
        store.set_json("doc", &json!({"n": 1})).await.unwrap();

        let doc: Option<serde_json::Value> = store.get_json("doc").await.unwrap();
        assert_eq!(doc, Some(json!({"n": 1})));

        store.set("bad", "{not json".to_string()).await.unwrap();
        let bad: crate::error::OrchestrationResult<Option<serde_json::Value>> =
            store.get_json("bad").await;
        assert!(bad.is_err());
    }
}
