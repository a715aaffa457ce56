pub mod context;
pub mod hold;
pub mod inventory;
pub mod manager;
pub mod memory;
pub mod store;

pub use context::{ContextKey, PartitionKey};
pub use hold::{Hold, HoldStatus, HoldToken, OwnerRef};
pub use inventory::{InventoryUnit, Partition, UnitStatus, UnitView};
pub use manager::{AcquireRequest, HoldGrant, HoldManager, HoldPolicy, SweepReport};
pub use memory::MemoryInventoryStore;
pub use store::{InventoryStore, PartitionTx};
