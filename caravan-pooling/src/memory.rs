use crate::models::{GroupAggregate, PoolGroup};
use crate::store::{GroupFilter, GroupStore, GroupTx};
use async_trait::async_trait;
use caravan_core::StoreError;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

type Slot = Arc<Mutex<Option<GroupAggregate>>>;
type MemberIndex = Arc<RwLock<HashMap<Uuid, Uuid>>>;

/// Process-local group store with one async mutex per group.
#[derive(Default)]
pub struct MemoryGroupStore {
    groups: Arc<RwLock<HashMap<Uuid, Slot>>>,
    members: MemberIndex,
}

impl MemoryGroupStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, group_id: Uuid) -> Option<Slot> {
        self.groups
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&group_id)
            .cloned()
    }
}

#[async_trait]
impl GroupStore for MemoryGroupStore {
    async fn insert(&self, group: &PoolGroup) -> Result<(), StoreError> {
        let mut groups = self.groups.write().unwrap_or_else(|e| e.into_inner());
        if groups.contains_key(&group.id) {
            return Err(StoreError::Backend(format!("group {} already exists", group.id)));
        }
        groups.insert(
            group.id,
            Arc::new(Mutex::new(Some(GroupAggregate::new(group.clone())))),
        );
        Ok(())
    }

    async fn begin(&self, group_id: Uuid) -> Result<Option<Box<dyn GroupTx>>, StoreError> {
        let Some(slot) = self.slot(group_id) else {
            return Ok(None);
        };
        let guard = slot.lock_owned().await;
        // Deleted while we waited.
        let Some(working) = guard.clone() else {
            return Ok(None);
        };
        Ok(Some(Box::new(MemoryGroupTx {
            guard,
            working,
            deleted: false,
            groups: self.groups.clone(),
            members: self.members.clone(),
        })))
    }

    async fn load(&self, group_id: Uuid) -> Result<Option<GroupAggregate>, StoreError> {
        match self.slot(group_id) {
            Some(slot) => Ok(slot.lock().await.clone()),
            None => Ok(None),
        }
    }

    async fn list(&self, filter: &GroupFilter) -> Result<Vec<PoolGroup>, StoreError> {
        let slots: Vec<Slot> = self
            .groups
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();

        let mut groups = Vec::new();
        for slot in slots {
            if let Some(aggregate) = slot.lock().await.as_ref() {
                if filter.matches(aggregate) {
                    groups.push(aggregate.group.clone());
                }
            }
        }
        groups.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(groups)
    }

    async fn locate_member(&self, member_id: Uuid) -> Result<Option<Uuid>, StoreError> {
        Ok(self
            .members
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&member_id)
            .copied())
    }
}

struct MemoryGroupTx {
    guard: OwnedMutexGuard<Option<GroupAggregate>>,
    working: GroupAggregate,
    deleted: bool,
    groups: Arc<RwLock<HashMap<Uuid, Slot>>>,
    members: MemberIndex,
}

#[async_trait]
impl GroupTx for MemoryGroupTx {
    fn aggregate(&mut self) -> &mut GroupAggregate {
        &mut self.working
    }

    fn mark_deleted(&mut self) {
        self.deleted = true;
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryGroupTx {
            mut guard,
            working,
            deleted,
            groups,
            members,
        } = *self;
        let group_id = working.group.id;

        {
            let mut index = members.write().unwrap_or_else(|e| e.into_inner());
            for member in &working.members {
                if deleted {
                    index.remove(&member.id);
                } else {
                    index.insert(member.id, group_id);
                }
            }
        }

        if deleted {
            groups
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&group_id);
            *guard = None;
        } else {
            *guard = Some(working);
        }
        Ok(())
    }
}
