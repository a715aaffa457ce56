use crate::context::PartitionKey;
use crate::hold::HoldToken;
use crate::inventory::Partition;
use crate::store::{InventoryStore, PartitionTx};
use async_trait::async_trait;
use caravan_core::StoreError;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::{Mutex, OwnedMutexGuard};

type TokenIndex = Arc<RwLock<HashMap<HoldToken, PartitionKey>>>;

/// Process-local store. One async mutex per partition; writes go to a working copy that
/// replaces the guarded value on commit.
#[derive(Default)]
pub struct MemoryInventoryStore {
    partitions: RwLock<HashMap<PartitionKey, Arc<Mutex<Partition>>>>,
    tokens: TokenIndex,
}

impl MemoryInventoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: &PartitionKey) -> Arc<Mutex<Partition>> {
        if let Some(slot) = self
            .partitions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
        {
            return slot.clone();
        }
        self.partitions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(Partition::new(key.clone()))))
            .clone()
    }
}

#[async_trait]
impl InventoryStore for MemoryInventoryStore {
    async fn begin(&self, key: &PartitionKey) -> Result<Box<dyn PartitionTx>, StoreError> {
        let guard = self.slot(key).lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryPartitionTx {
            guard,
            working,
            tokens: self.tokens.clone(),
        }))
    }

    async fn exists(&self, key: &PartitionKey) -> Result<bool, StoreError> {
        Ok(self
            .partitions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(key))
    }

    async fn locate_hold(&self, token: &HoldToken) -> Result<Option<PartitionKey>, StoreError> {
        Ok(self
            .tokens
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(token)
            .cloned())
    }

    async fn partitions(&self) -> Result<Vec<PartitionKey>, StoreError> {
        let mut keys: Vec<PartitionKey> = self
            .partitions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }
}

struct MemoryPartitionTx {
    guard: OwnedMutexGuard<Partition>,
    working: Partition,
    tokens: TokenIndex,
}

#[async_trait]
impl PartitionTx for MemoryPartitionTx {
    fn partition(&mut self) -> &mut Partition {
        &mut self.working
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryPartitionTx {
            mut guard,
            working,
            tokens,
        } = *self;

        {
            let mut index = tokens.write().unwrap_or_else(|e| e.into_inner());
            for token in guard.holds.keys() {
                if !working.holds.contains_key(token) {
                    index.remove(token);
                }
            }
            for token in working.holds.keys() {
                index.insert(token.clone(), working.key.clone());
            }
        }

        *guard = working;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextKey;
    use crate::hold::OwnerRef;
    use chrono::{Duration, NaiveDate, Utc};
    use uuid::Uuid;

    fn key() -> PartitionKey {
        PartitionKey::new(
            Uuid::new_v4(),
            ContextKey::journey(NaiveDate::from_ymd_opt(2026, 3, 1).unwrap()),
        )
    }

    #[tokio::test]
    async fn test_dropped_tx_rolls_back() {
        let store = MemoryInventoryStore::new();
        let key = key();

        let mut tx = store.begin(&key).await.unwrap();
        tx.partition().provision(&["A1".to_string()]);
        drop(tx);

        let mut tx = store.begin(&key).await.unwrap();
        assert!(tx.partition().units.is_empty());
    }

    #[tokio::test]
    async fn test_commit_indexes_tokens() {
        let store = MemoryInventoryStore::new();
        let key = key();

        let mut tx = store.begin(&key).await.unwrap();
        let p = tx.partition();
        p.provision(&["A1".to_string()]);
        let grant = p
            .acquire(
                &OwnerRef::new("alice"),
                &["A1".to_string()],
                None,
                Duration::seconds(60),
                Utc::now(),
            )
            .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(store.locate_hold(&grant.token).await.unwrap(), Some(key.clone()));

        let mut tx = store.begin(&key).await.unwrap();
        tx.partition().holds.clear();
        tx.commit().await.unwrap();
        assert_eq!(store.locate_hold(&grant.token).await.unwrap(), None);
    }
}
