//! Short-lived ordered result lists, addressable by 1-based ordinal in
//! follow-up intents ("delete the second one").
//!
//! Per-user LRU with a TTL; in-memory only, rebuilt empty on restart.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultKind {
    Events,
    Goals,
    Steps,
}

#[derive(Debug, Clone)]
struct ResultSet {
    set_id: Uuid,
    kind: ResultKind,
    ordered_ids: Vec<i64>,
    last_used: Instant,
}

/// Why an ordinal reference failed to resolve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// Unknown or expired set id.
    SetNotFound,
    /// Ordinal 0 or beyond the list; carries the list length for the reply.
    OrdinalOutOfRange(usize),
    /// The set holds a different entity kind than the intent expects.
    KindMismatch,
}

pub struct ResultSetCache {
    ttl: Duration,
    capacity: usize,
    // Per-user vec, most recently used last.
    inner: Mutex<HashMap<String, Vec<ResultSet>>>,
}

impl ResultSetCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity,
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Register a fresh result list and get its set id.
    pub async fn insert(&self, user_id: &str, kind: ResultKind, ordered_ids: Vec<i64>) -> Uuid {
        let set_id = Uuid::new_v4();
        let mut inner = self.inner.lock().await;
        let sets = inner.entry(user_id.to_string()).or_default();

        let now = Instant::now();
        sets.retain(|s| now.duration_since(s.last_used) < self.ttl);
        while sets.len() >= self.capacity {
            sets.remove(0);
        }
        sets.push(ResultSet {
            set_id,
            kind,
            ordered_ids,
            last_used: now,
        });
        set_id
    }

    /// Resolve a `{set_id, ordinal}` pair to a concrete entity id. Touches
    /// the set's TTL on success.
    pub async fn resolve(
        &self,
        user_id: &str,
        set_id: Uuid,
        ordinal: usize,
        expected: ResultKind,
    ) -> Result<i64, ResolveError> {
        let mut inner = self.inner.lock().await;
        let Some(sets) = inner.get_mut(user_id) else {
            return Err(ResolveError::SetNotFound);
        };

        let now = Instant::now();
        sets.retain(|s| now.duration_since(s.last_used) < self.ttl);

        let Some(pos) = sets.iter().position(|s| s.set_id == set_id) else {
            return Err(ResolveError::SetNotFound);
        };

        let set = &sets[pos];
        if set.kind != expected {
            return Err(ResolveError::KindMismatch);
        }
        if ordinal == 0 || ordinal > set.ordered_ids.len() {
            return Err(ResolveError::OrdinalOutOfRange(set.ordered_ids.len()));
        }
        let id = set.ordered_ids[ordinal - 1];

        // Move to the LRU tail and refresh TTL.
        let mut set = sets.remove(pos);
        set.last_used = now;
        sets.push(set);

        Ok(id)
    }

    /// Ids currently held by a set, for "did you mean" suggestions.
    pub async fn peek(&self, user_id: &str, set_id: Uuid) -> Option<(ResultKind, Vec<i64>)> {
        let inner = self.inner.lock().await;
        let sets = inner.get(user_id)?;
        let now = Instant::now();
        sets.iter()
            .find(|s| s.set_id == set_id && now.duration_since(s.last_used) < self.ttl)
            .map(|s| (s.kind, s.ordered_ids.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> ResultSetCache {
        ResultSetCache::new(Duration::from_secs(3600), 64)
    }

    #[tokio::test]
    async fn ordinal_resolution_is_one_based() {
        let cache = cache();
        let set_id = cache.insert("u1", ResultKind::Events, vec![42, 17, 88]).await;

        assert_eq!(
            cache.resolve("u1", set_id, 2, ResultKind::Events).await,
            Ok(17)
        );
        assert_eq!(
            cache.resolve("u1", set_id, 1, ResultKind::Events).await,
            Ok(42)
        );
    }

    #[tokio::test]
    async fn ordinal_zero_and_overflow_are_out_of_range() {
        let cache = cache();
        let set_id = cache.insert("u1", ResultKind::Goals, vec![1, 2]).await;

        assert_eq!(
            cache.resolve("u1", set_id, 0, ResultKind::Goals).await,
            Err(ResolveError::OrdinalOutOfRange(2))
        );
        assert_eq!(
            cache.resolve("u1", set_id, 3, ResultKind::Goals).await,
            Err(ResolveError::OrdinalOutOfRange(2))
        );
    }

    #[tokio::test]
    async fn kind_mismatch_is_detected() {
        let cache = cache();
        let set_id = cache.insert("u1", ResultKind::Goals, vec![1]).await;
        assert_eq!(
            cache.resolve("u1", set_id, 1, ResultKind::Events).await,
            Err(ResolveError::KindMismatch)
        );
    }

    #[tokio::test]
    async fn sets_are_per_user() {
        let cache = cache();
        let set_id = cache.insert("u1", ResultKind::Events, vec![5]).await;
        assert_eq!(
            cache.resolve("u2", set_id, 1, ResultKind::Events).await,
            Err(ResolveError::SetNotFound)
        );
    }

    #[tokio::test]
    async fn capacity_evicts_least_recently_used() {
        let cache = ResultSetCache::new(Duration::from_secs(3600), 2);
        let first = cache.insert("u1", ResultKind::Events, vec![1]).await;
        let second = cache.insert("u1", ResultKind::Events, vec![2]).await;
        // Touch the first so the second becomes LRU.
        cache
            .resolve("u1", first, 1, ResultKind::Events)
            .await
            .unwrap();
        let third = cache.insert("u1", ResultKind::Events, vec![3]).await;

        assert_eq!(
            cache.resolve("u1", second, 1, ResultKind::Events).await,
            Err(ResolveError::SetNotFound)
        );
        assert!(cache.resolve("u1", first, 1, ResultKind::Events).await.is_ok());
        assert!(cache.resolve("u1", third, 1, ResultKind::Events).await.is_ok());
    }

    #[tokio::test]
    async fn expired_sets_are_gone() {
        let cache = ResultSetCache::new(Duration::from_millis(0), 64);
        let set_id = cache.insert("u1", ResultKind::Events, vec![1]).await;
        assert_eq!(
            cache.resolve("u1", set_id, 1, ResultKind::Events).await,
            Err(ResolveError::SetNotFound)
        );
    }
}
