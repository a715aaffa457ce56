use crate::context::{ContextKey, PartitionKey};
use crate::hold::{HoldToken, OwnerRef};
use crate::inventory::UnitView;
use crate::store::InventoryStore;
use caravan_core::events::publish_all;
use caravan_core::{Clock, DomainError, DomainResult, EventPublisher};
use caravan_shared::models::events::InventoryChangedEvent;
use caravan_shared::DomainEvent;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone, Copy)]
pub struct HoldPolicy {
    pub default_ttl: Duration,
    pub max_ttl: Duration,
    /// How long closed holds are kept before the sweeper purges them.
    pub retention: Duration,
}

impl Default for HoldPolicy {
    fn default() -> Self {
        Self {
            default_ttl: Duration::seconds(300),
            max_ttl: Duration::seconds(900),
            retention: Duration::seconds(3600),
        }
    }
}

impl HoldPolicy {
    pub fn ttl_for(&self, requested_seconds: Option<i64>) -> DomainResult<Duration> {
        match requested_seconds {
            None => Ok(self.default_ttl),
            Some(s) if s >= 1 && s <= self.max_ttl.num_seconds() => Ok(Duration::seconds(s)),
            Some(s) => Err(DomainError::Validation(format!(
                "ttl must be between 1 and {} seconds, got {}",
                self.max_ttl.num_seconds(),
                s
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AcquireRequest {
    pub resource_id: Uuid,
    pub context: ContextKey,
    pub unit_ids: Vec<String>,
    pub owner: OwnerRef,
    pub ttl_seconds: Option<i64>,
    pub existing_token: Option<HoldToken>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HoldGrant {
    pub hold_token: HoldToken,
    pub expires_at: DateTime<Utc>,
    pub unit_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct SweepReport {
    pub partitions: usize,
    pub expired_units: usize,
    pub purged_holds: usize,
}

/// Serializes every hold operation per partition and publishes the resulting inventory
/// events once the change is committed.
pub struct HoldManager {
    store: Arc<dyn InventoryStore>,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventPublisher>,
    policy: HoldPolicy,
}

impl HoldManager {
    pub fn new(
        store: Arc<dyn InventoryStore>,
        clock: Arc<dyn Clock>,
        events: Arc<dyn EventPublisher>,
        policy: HoldPolicy,
    ) -> Self {
        Self {
            store,
            clock,
            events,
            policy,
        }
    }

    pub fn policy(&self) -> &HoldPolicy {
        &self.policy
    }

    pub async fn acquire(&self, req: AcquireRequest) -> DomainResult<HoldGrant> {
        let ttl = self.policy.ttl_for(req.ttl_seconds)?;
        let key = PartitionKey::new(req.resource_id, req.context);
        if req.unit_ids.is_empty() {
            return Err(DomainError::Validation("no units requested".into()));
        }
        if !self.store.exists(&key).await? {
            return Err(DomainError::NotFound(format!(
                "unknown units: {}",
                req.unit_ids.join(", ")
            )));
        }
        let now = self.clock.now();

        let mut tx = self.store.begin(&key).await?;
        let partition = tx.partition();
        let expired = partition.expire_lapsed(now);
        let result = partition.acquire(
            &req.owner,
            &req.unit_ids,
            req.existing_token.as_ref(),
            ttl,
            now,
        );
        // A failed acquire leaves the partition untouched; the expiry pass is still worth keeping.
        tx.commit().await?;

        let mut events = Vec::new();
        if !expired.is_empty() {
            events.push(DomainEvent::UnitsExpired(changed(&key, expired, now)));
        }
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                publish_all(self.events.as_ref(), events).await;
                debug!(partition = %key, owner = %req.owner, "hold rejected: {}", e);
                return Err(e);
            }
        };
        if !outcome.newly_held.is_empty() {
            events.push(DomainEvent::UnitsHeld(changed(
                &key,
                outcome.newly_held.clone(),
                now,
            )));
        }
        publish_all(self.events.as_ref(), events).await;

        info!(
            partition = %key,
            token = %outcome.token,
            units = outcome.unit_ids.len(),
            "hold granted until {}",
            outcome.expires_at
        );
        Ok(HoldGrant {
            hold_token: outcome.token,
            expires_at: outcome.expires_at,
            unit_ids: outcome.unit_ids,
        })
    }

    /// Returns the units that became available. Tokens unknown for `resource_id` release
    /// nothing.
    pub async fn release(
        &self,
        resource_id: Uuid,
        token: &HoldToken,
        unit_ids: Option<Vec<String>>,
    ) -> DomainResult<Vec<String>> {
        let key = match self.store.locate_hold(token).await? {
            Some(key) if key.resource_id == resource_id => key,
            _ => {
                debug!(resource_id = %resource_id, token = %token, "release of unknown hold ignored");
                return Ok(Vec::new());
            }
        };
        let now = self.clock.now();

        let mut tx = self.store.begin(&key).await?;
        let partition = tx.partition();
        let expired = partition.expire_lapsed(now);
        let released = partition.release(token, unit_ids.as_deref(), now);
        tx.commit().await?;

        let mut events = Vec::new();
        if !expired.is_empty() {
            events.push(DomainEvent::UnitsExpired(changed(&key, expired, now)));
        }
        if !released.is_empty() {
            events.push(DomainEvent::UnitsReleased(changed(&key, released.clone(), now)));
        }
        publish_all(self.events.as_ref(), events).await;

        Ok(released)
    }

    /// Books the hold's units. Returns the booked unit ids.
    pub async fn confirm(
        &self,
        resource_id: Uuid,
        token: &HoldToken,
        unit_ids: Option<Vec<String>>,
    ) -> DomainResult<Vec<String>> {
        let key = self
            .store
            .locate_hold(token)
            .await?
            .filter(|key| key.resource_id == resource_id)
            .ok_or_else(|| {
                DomainError::Invalid(format!(
                    "unknown hold token {} for resource {}",
                    token, resource_id
                ))
            })?;
        let now = self.clock.now();

        let mut tx = self.store.begin(&key).await?;
        let partition = tx.partition();
        let expired = partition.expire_lapsed(now);
        let result = partition.confirm(token, unit_ids.as_deref(), now);
        tx.commit().await?;

        let mut events = Vec::new();
        if !expired.is_empty() {
            events.push(DomainEvent::UnitsExpired(changed(&key, expired, now)));
        }
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                publish_all(self.events.as_ref(), events).await;
                return Err(e);
            }
        };
        events.push(DomainEvent::UnitsBooked(changed(
            &key,
            outcome.booked.clone(),
            now,
        )));
        if !outcome.released.is_empty() {
            events.push(DomainEvent::UnitsReleased(changed(
                &key,
                outcome.released,
                now,
            )));
        }
        publish_all(self.events.as_ref(), events).await;

        info!(partition = %key, token = %token, units = outcome.booked.len(), "hold confirmed");
        Ok(outcome.booked)
    }

    /// Units of a partition sorted by id, with lapsed holds already reverted.
    pub async fn seat_map(
        &self,
        resource_id: Uuid,
        context: ContextKey,
        viewer: Option<&OwnerRef>,
    ) -> DomainResult<Vec<UnitView>> {
        let key = PartitionKey::new(resource_id, context);
        if !self.store.exists(&key).await? {
            return Ok(Vec::new());
        }
        let now = self.clock.now();

        let mut tx = self.store.begin(&key).await?;
        let partition = tx.partition();
        let expired = partition.expire_lapsed(now);
        let view = partition.view_for(viewer);
        tx.commit().await?;

        if !expired.is_empty() {
            publish_all(
                self.events.as_ref(),
                vec![DomainEvent::UnitsExpired(changed(&key, expired, now))],
            )
            .await;
        }
        Ok(view)
    }

    /// Creates missing units as AVAILABLE; existing units are left as they are.
    pub async fn provision(
        &self,
        resource_id: Uuid,
        context: ContextKey,
        unit_ids: Vec<String>,
    ) -> DomainResult<usize> {
        if unit_ids.is_empty() {
            return Err(DomainError::Validation("no units to provision".into()));
        }
        if unit_ids.iter().any(|id| id.trim().is_empty()) {
            return Err(DomainError::Validation("unit ids must not be blank".into()));
        }
        let key = PartitionKey::new(resource_id, context);

        let mut tx = self.store.begin(&key).await?;
        let created = tx.partition().provision(&unit_ids);
        tx.commit().await?;

        info!(partition = %key, created, "inventory provisioned");
        Ok(created)
    }

    /// Expires lapsed holds and purges old tombstones across every known partition.
    pub async fn sweep(&self) -> DomainResult<SweepReport> {
        let now = self.clock.now();
        let cutoff = now - self.policy.retention;
        let mut report = SweepReport::default();

        for key in self.store.partitions().await? {
            let mut tx = self.store.begin(&key).await?;
            let partition = tx.partition();
            let expired = partition.expire_lapsed(now);
            let purged = partition.purge_closed(cutoff);
            if expired.is_empty() && purged == 0 {
                report.partitions += 1;
                continue;
            }
            tx.commit().await?;

            report.partitions += 1;
            report.expired_units += expired.len();
            report.purged_holds += purged;
            if !expired.is_empty() {
                publish_all(
                    self.events.as_ref(),
                    vec![DomainEvent::UnitsExpired(changed(&key, expired, now))],
                )
                .await;
            }
        }

        if report.expired_units > 0 || report.purged_holds > 0 {
            info!(
                expired_units = report.expired_units,
                purged_holds = report.purged_holds,
                "hold sweep finished"
            );
        }
        Ok(report)
    }
}

fn changed(key: &PartitionKey, unit_ids: Vec<String>, now: DateTime<Utc>) -> InventoryChangedEvent {
    InventoryChangedEvent {
        resource_id: key.resource_id,
        context_key: key.context.to_string(),
        unit_ids,
        occurred_at: now.timestamp(),
    }
}
