pub mod checkout;
pub mod coordinator;
pub mod memory;
pub mod models;
pub mod payments;
pub mod store;

pub use checkout::{MockPaymentProcessor, PaymentCheckout};
pub use coordinator::{DeadlineOutcome, PackageSelection, PoolCoordinator};
pub use memory::MemoryGroupStore;
pub use models::{
    GroupAggregate, GroupStatus, Member, MemberStatus, PaymentOutcome, PoolGroup, ReviewDecision,
};
pub use payments::{summarize, PaymentSummary};
pub use store::{GroupFilter, GroupStore, GroupTx};
