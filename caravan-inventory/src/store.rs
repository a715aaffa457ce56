use crate::context::PartitionKey;
use crate::hold::HoldToken;
use crate::inventory::Partition;
use async_trait::async_trait;
use caravan_core::StoreError;

/// Persistence port for inventory partitions.
///
/// `begin` grants exclusive access to one partition until the transaction is committed or
/// dropped. Dropping without `commit` discards every change.
#[async_trait]
pub trait InventoryStore: Send + Sync {
    async fn begin(&self, key: &PartitionKey) -> Result<Box<dyn PartitionTx>, StoreError>;

    /// Whether anything was ever provisioned or held in the partition. Never creates it.
    async fn exists(&self, key: &PartitionKey) -> Result<bool, StoreError>;

    /// Partition a hold token was issued in, if the hold (or its tombstone) still exists.
    async fn locate_hold(&self, token: &HoldToken) -> Result<Option<PartitionKey>, StoreError>;

    async fn partitions(&self) -> Result<Vec<PartitionKey>, StoreError>;
}

#[async_trait]
pub trait PartitionTx: Send {
    fn partition(&mut self) -> &mut Partition;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}
