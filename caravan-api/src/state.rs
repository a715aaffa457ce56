use caravan_core::events::FanoutPublisher;
use caravan_core::payment::PaymentProcessor;
use caravan_core::{Clock, EventPublisher};
use caravan_inventory::{HoldManager, HoldPolicy, InventoryStore};
use caravan_pooling::{GroupStore, PaymentCheckout, PoolCoordinator};
use caravan_shared::DomainEvent;
use caravan_store::app_config::BusinessRules;
use caravan_store::RedisClient;
use chrono::Duration;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::metrics::Metrics;
use crate::middleware::ResiliencyState;
use crate::stream::BroadcastPublisher;

#[derive(Clone)]
pub struct AuthConfig {
    pub secret: String,
    pub expiration: u64,
    pub webhook_secret: String,
}

/// Storage and gateway adapters the services are built on.
pub struct Backends {
    pub inventory: Arc<dyn InventoryStore>,
    pub groups: Arc<dyn GroupStore>,
    pub processor: Arc<dyn PaymentProcessor>,
    pub clock: Arc<dyn Clock>,
    /// Event bus sink; the SSE channel is added in front of it.
    pub events: Arc<dyn EventPublisher>,
}

#[derive(Clone)]
pub struct AppState {
    pub holds: Arc<HoldManager>,
    pub pooling: Arc<PoolCoordinator>,
    pub checkout: Arc<PaymentCheckout>,
    pub redis: Option<Arc<RedisClient>>,
    pub sse_tx: broadcast::Sender<DomainEvent>,
    pub auth: AuthConfig,
    pub business_rules: BusinessRules,
    pub metrics: Arc<Metrics>,
    pub resiliency: Arc<ResiliencyState>,
}

impl AppState {
    pub fn assemble(
        backends: Backends,
        business_rules: BusinessRules,
        auth: AuthConfig,
        redis: Option<Arc<RedisClient>>,
    ) -> Result<Self, prometheus::Error> {
        let (sse_tx, _) = broadcast::channel(100);
        let broadcast: Arc<dyn EventPublisher> = Arc::new(BroadcastPublisher::new(sse_tx.clone()));
        let events: Arc<dyn EventPublisher> =
            Arc::new(FanoutPublisher::new(vec![broadcast, backends.events]));

        let holds = HoldManager::new(
            backends.inventory,
            backends.clock.clone(),
            events.clone(),
            hold_policy(&business_rules),
        );
        let pooling = PoolCoordinator::new(
            backends.groups.clone(),
            backends.clock,
            events,
            business_rules.max_group_size,
        );
        let checkout = PaymentCheckout::new(
            backends.groups,
            backends.processor,
            business_rules.currency.clone(),
        );

        Ok(Self {
            holds: Arc::new(holds),
            pooling: Arc::new(pooling),
            checkout: Arc::new(checkout),
            redis,
            sse_tx,
            auth,
            business_rules,
            metrics: Arc::new(Metrics::new()?),
            resiliency: Arc::new(ResiliencyState::default()),
        })
    }
}

pub fn hold_policy(rules: &BusinessRules) -> HoldPolicy {
    HoldPolicy {
        default_ttl: Duration::seconds(rules.hold_ttl_seconds),
        max_ttl: Duration::seconds(rules.max_hold_ttl_seconds),
        retention: Duration::seconds(rules.hold_retention_seconds),
    }
}
