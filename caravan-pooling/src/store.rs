use crate::models::{GroupAggregate, GroupStatus, PoolGroup};
use async_trait::async_trait;
use caravan_core::StoreError;
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct GroupFilter {
    pub trip_id: Option<Uuid>,
    pub status: Option<GroupStatus>,
    /// Groups created by this user or holding an active member row of theirs.
    pub involving_user: Option<String>,
}

impl GroupFilter {
    pub fn matches(&self, aggregate: &GroupAggregate) -> bool {
        let group = &aggregate.group;
        self.trip_id.map_or(true, |t| group.trip_id == t)
            && self.status.map_or(true, |s| group.status == s)
            && self.involving_user.as_deref().map_or(true, |user| {
                group.creator_id == user || aggregate.active_member_of(user).is_some()
            })
    }
}

/// Persistence port for pool groups. A transaction holds the group exclusively; dropping it
/// without `commit` discards the changes.
#[async_trait]
pub trait GroupStore: Send + Sync {
    async fn insert(&self, group: &PoolGroup) -> Result<(), StoreError>;

    /// `None` when the group does not exist.
    async fn begin(&self, group_id: Uuid) -> Result<Option<Box<dyn GroupTx>>, StoreError>;

    /// Snapshot read outside any transaction.
    async fn load(&self, group_id: Uuid) -> Result<Option<GroupAggregate>, StoreError>;

    /// Newest first.
    async fn list(&self, filter: &GroupFilter) -> Result<Vec<PoolGroup>, StoreError>;

    /// Group a member row belongs to.
    async fn locate_member(&self, member_id: Uuid) -> Result<Option<Uuid>, StoreError>;
}

#[async_trait]
pub trait GroupTx: Send {
    fn aggregate(&mut self) -> &mut GroupAggregate;

    /// Deletes the group on commit.
    fn mark_deleted(&mut self);

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}
