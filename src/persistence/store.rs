use crate::error::OrchestrationResult;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Minimal key-value store with sorted-set indexes.
///
/// Implementations map onto Redis-style backends: plain string values plus
/// sorted sets scored by an integer (start time in milliseconds for execution
/// indexes).
#[async_trait]
pub trait KeyValueStore: Send + Sync + std::fmt::Debug {
    async fn get(&self, key: &str) -> OrchestrationResult<Option<String>>;

    async fn set(&self, key: &str, value: String) -> OrchestrationResult<()>;

    /// Returns whether the key existed
    async fn delete(&self, key: &str) -> OrchestrationResult<bool>;

    /// Add or re-score `member` in the sorted set at `key`
    async fn sorted_add(&self, key: &str, member: &str, score: i64) -> OrchestrationResult<()>;

    async fn sorted_remove(&self, key: &str, member: &str) -> OrchestrationResult<bool>;

    /// Members ordered by descending score, at most `limit` of them
    async fn sorted_range_desc(
        &self,
        key: &str,
        limit: Option<usize>,
    ) -> OrchestrationResult<Vec<String>>;

    async fn ping(&self) -> OrchestrationResult<()>;
}

/// JSON helpers over any [`KeyValueStore`]
#[async_trait]
pub trait KeyValueStoreExt: KeyValueStore {
    async fn get_json<T>(&self, key: &str) -> OrchestrationResult<Option<T>>
    where
        T: DeserializeOwned + Send,
    {
        match self.get(key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn set_json<T>(&self, key: &str, value: &T) -> OrchestrationResult<()>
    where
        T: Serialize + Sync,
    {
        let raw = serde_json::to_string(value)?;
        self.set(key, raw).await
    }
}

impl<S: KeyValueStore + ?Sized> KeyValueStoreExt for S {}
