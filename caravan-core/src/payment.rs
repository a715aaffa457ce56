use async_trait::async_trait;
use caravan_shared::Masked;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status reported by the processor's verification callback.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentOrderRequest {
    pub group_id: Uuid,
    pub member_id: Uuid,
    pub amount: i64,
    pub currency: String,
    /// Merchant-side reference echoed back by the processor.
    pub receipt: String,
}

/// Order handed to the client so it can open the processor's checkout.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentOrder {
    pub order_id: String,
    pub amount: i64,
    pub currency: String,
    pub key: Masked<String>,
    pub created_at: DateTime<Utc>,
}

/// Opaque payment gateway. Order creation and signature verification live on the other side
/// of this trait; callers must never invoke it while holding a group transaction.
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    async fn create_order(
        &self,
        request: &PaymentOrderRequest,
    ) -> Result<PaymentOrder, Box<dyn std::error::Error + Send + Sync>>;
}
