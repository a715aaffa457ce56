use crate::coordinator::resolve_member;
use crate::store::GroupStore;
use async_trait::async_trait;
use caravan_core::payment::{PaymentOrder, PaymentOrderRequest, PaymentProcessor};
use caravan_core::{Actor, DomainError, DomainResult};
use caravan_shared::Masked;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

/// Creates processor orders for a member's share. The group is read inside a transaction
/// that is released before the processor is called.
pub struct PaymentCheckout {
    store: Arc<dyn GroupStore>,
    processor: Arc<dyn PaymentProcessor>,
    currency: String,
}

impl PaymentCheckout {
    pub fn new(
        store: Arc<dyn GroupStore>,
        processor: Arc<dyn PaymentProcessor>,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            store,
            processor,
            currency: currency.into(),
        }
    }

    pub async fn initiate_payment(
        &self,
        actor: &Actor,
        group_id: Uuid,
        member_id: Option<Uuid>,
    ) -> DomainResult<PaymentOrder> {
        let request = {
            let mut tx = self
                .store
                .begin(group_id)
                .await?
                .ok_or_else(|| DomainError::NotFound(format!("group {} not found", group_id)))?;
            let agg = tx.aggregate();
            let member_id = resolve_member(agg, actor, member_id)?;
            let (member, amount) = agg.payable(member_id)?;
            PaymentOrderRequest {
                group_id,
                member_id: member.id,
                amount,
                currency: self.currency.clone(),
                receipt: format!("pool_{}", member.id.simple()),
            }
        };

        let order = self.processor.create_order(&request).await.map_err(|e| {
            error!(group_id = %group_id, "payment order creation failed: {}", e);
            DomainError::Upstream(e.to_string())
        })?;

        info!(
            group_id = %group_id,
            member_id = %request.member_id,
            order_id = %order.order_id,
            amount = order.amount,
            "payment order created"
        );
        Ok(order)
    }
}

/// Processor stand-in for development and tests.
pub struct MockPaymentProcessor {
    key_id: String,
    fail: bool,
}

impl MockPaymentProcessor {
    pub fn new(key_id: impl Into<String>) -> Self {
        Self {
            key_id: key_id.into(),
            fail: false,
        }
    }

    /// Every order request fails, as an unreachable gateway would.
    pub fn failing() -> Self {
        Self {
            key_id: String::new(),
            fail: true,
        }
    }
}

#[async_trait]
impl PaymentProcessor for MockPaymentProcessor {
    async fn create_order(
        &self,
        request: &PaymentOrderRequest,
    ) -> Result<PaymentOrder, Box<dyn std::error::Error + Send + Sync>> {
        if self.fail {
            return Err("Simulated Payment Gateway Failure".into());
        }
        Ok(PaymentOrder {
            order_id: format!("order_mock_{}", Uuid::new_v4().simple()),
            amount: request.amount,
            currency: request.currency.clone(),
            key: Masked(self.key_id.clone()),
            created_at: chrono::Utc::now(),
        })
    }
}
