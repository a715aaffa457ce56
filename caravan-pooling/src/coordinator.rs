use crate::models::{GroupAggregate, Member, PoolGroup, ReviewDecision};
use crate::payments::{summarize, PaymentSummary};
use crate::store::{GroupFilter, GroupStore};
use caravan_core::events::publish_all;
use caravan_core::{Actor, Clock, DomainError, DomainResult, EventPublisher};
use caravan_shared::models::events::{GroupLockedEvent, MemberCancelledEvent, PaymentRecordedEvent};
use caravan_shared::DomainEvent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

const MIN_GROUP_SIZE: u32 = 2;

#[derive(Debug, Clone, Deserialize)]
pub struct PackageSelection {
    pub package_id: String,
    pub per_person_cost: i64,
    pub payment_deadline: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeadlineOutcome {
    pub cancelled: Vec<Member>,
    pub group: PoolGroup,
}

/// Drives the pool group lifecycle. Each operation runs inside the group's transaction;
/// events go out only after commit.
pub struct PoolCoordinator {
    store: Arc<dyn GroupStore>,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventPublisher>,
    max_group_size: u32,
}

impl PoolCoordinator {
    pub fn new(
        store: Arc<dyn GroupStore>,
        clock: Arc<dyn Clock>,
        events: Arc<dyn EventPublisher>,
        max_group_size: u32,
    ) -> Self {
        Self {
            store,
            clock,
            events,
            max_group_size,
        }
    }

    async fn transact<T, F>(&self, group_id: Uuid, op: F) -> DomainResult<T>
    where
        T: Send,
        F: FnOnce(&mut GroupAggregate, DateTime<Utc>) -> DomainResult<T> + Send,
    {
        let mut tx = self
            .store
            .begin(group_id)
            .await?
            .ok_or_else(|| not_found(group_id))?;
        let now = self.clock.now();
        let value = op(tx.aggregate(), now)?;
        tx.commit().await?;
        Ok(value)
    }

    pub async fn create_group(
        &self,
        actor: &Actor,
        trip_id: Uuid,
        group_size: u32,
    ) -> DomainResult<PoolGroup> {
        if !(MIN_GROUP_SIZE..=self.max_group_size).contains(&group_size) {
            return Err(DomainError::Validation(format!(
                "group size must be between {} and {}",
                MIN_GROUP_SIZE, self.max_group_size
            )));
        }
        let group = PoolGroup::new(trip_id, actor.user_id.clone(), group_size, self.clock.now());
        self.store.insert(&group).await?;

        info!(group_id = %group.id, trip_id = %trip_id, size = group_size, "pool group created");
        Ok(group)
    }

    pub async fn get_group(&self, group_id: Uuid) -> DomainResult<GroupAggregate> {
        self.store
            .load(group_id)
            .await?
            .ok_or_else(|| not_found(group_id))
    }

    pub async fn list_groups(&self, filter: GroupFilter) -> DomainResult<Vec<PoolGroup>> {
        Ok(self.store.list(&filter).await?)
    }

    /// Groups the user created or holds an active membership in.
    pub async fn my_groups(&self, actor: &Actor) -> DomainResult<Vec<PoolGroup>> {
        let filter = GroupFilter {
            involving_user: Some(actor.user_id.clone()),
            ..GroupFilter::default()
        };
        Ok(self.store.list(&filter).await?)
    }

    pub async fn join(&self, actor: &Actor, group_id: Uuid) -> DomainResult<Member> {
        let member = self
            .transact(group_id, |agg, now| agg.join(&actor.user_id, now))
            .await?;
        info!(group_id = %group_id, member_id = %member.id, user = %actor.user_id, "join requested");
        Ok(member)
    }

    pub async fn review_member(
        &self,
        actor: &Actor,
        group_id: Uuid,
        member_id: Uuid,
        decision: ReviewDecision,
    ) -> DomainResult<Member> {
        let member = self
            .transact(group_id, |agg, now| {
                authorize(actor, agg)?;
                agg.review(member_id, decision, now)
            })
            .await?;
        info!(group_id = %group_id, member_id = %member_id, "member {}", member.status.as_str());
        Ok(member)
    }

    pub async fn leave(&self, actor: &Actor, group_id: Uuid) -> DomainResult<Member> {
        let member = self
            .transact(group_id, |agg, now| agg.leave(&actor.user_id, now))
            .await?;

        publish_all(
            self.events.as_ref(),
            vec![cancelled_event(&member, "left group", self.clock.now())],
        )
        .await;
        info!(group_id = %group_id, member_id = %member.id, "member left");
        Ok(member)
    }

    /// Only groups that never had a member row can be deleted.
    pub async fn delete_group(&self, actor: &Actor, group_id: Uuid) -> DomainResult<()> {
        let mut tx = self
            .store
            .begin(group_id)
            .await?
            .ok_or_else(|| not_found(group_id))?;
        let agg = tx.aggregate();
        authorize(actor, agg)?;
        if !agg.members.is_empty() {
            return Err(DomainError::InvalidState(format!(
                "group {} has {} member records",
                group_id,
                agg.members.len()
            )));
        }
        tx.mark_deleted();
        tx.commit().await?;

        info!(group_id = %group_id, "pool group deleted");
        Ok(())
    }

    pub async fn set_package(
        &self,
        actor: &Actor,
        group_id: Uuid,
        selection: PackageSelection,
    ) -> DomainResult<GroupAggregate> {
        let agg = self
            .transact(group_id, |agg, now| {
                authorize(actor, agg)?;
                agg.set_package(
                    &selection.package_id,
                    selection.per_person_cost,
                    selection.payment_deadline,
                    now,
                )?;
                Ok(agg.clone())
            })
            .await?;
        info!(
            group_id = %group_id,
            package = %selection.package_id,
            cost = selection.per_person_cost,
            "package selected, payments due by {}",
            selection.payment_deadline
        );
        Ok(agg)
    }

    /// `member_id` defaults to the caller's own active membership.
    pub async fn approve_package(
        &self,
        actor: &Actor,
        group_id: Uuid,
        member_id: Option<Uuid>,
    ) -> DomainResult<Member> {
        self.transact(group_id, |agg, now| {
            let member_id = resolve_member(agg, actor, member_id)?;
            agg.approve_package(member_id, now)
        })
        .await
    }

    /// Applies a verified payment. Duplicate deliveries return the member unchanged.
    pub async fn on_payment_verified(
        &self,
        member_id: Uuid,
        payment_id: &str,
        amount: i64,
    ) -> DomainResult<Member> {
        let group_id = self.group_of(member_id).await?;
        let applied = self
            .transact(group_id, |agg, now| {
                agg.record_payment_success(member_id, payment_id, amount, now)
            })
            .await?;

        if !applied.changed {
            if applied.member.payment_id.as_deref() != Some(payment_id) {
                warn!(
                    member_id = %member_id,
                    payment_id,
                    "second payment for an already paid member ignored"
                );
            } else {
                warn!(member_id = %member_id, payment_id, "duplicate payment delivery ignored");
            }
            return Ok(applied.member);
        }

        publish_all(
            self.events.as_ref(),
            vec![DomainEvent::PaymentRecorded(PaymentRecordedEvent {
                group_id,
                member_id,
                payment_id: Some(payment_id.to_string()),
                amount,
                succeeded: true,
                occurred_at: self.clock.now().timestamp(),
            })],
        )
        .await;
        info!(group_id = %group_id, member_id = %member_id, amount, "member paid");
        Ok(applied.member)
    }

    pub async fn on_payment_failed(
        &self,
        member_id: Uuid,
        payment_id: Option<&str>,
    ) -> DomainResult<Member> {
        let group_id = self.group_of(member_id).await?;
        let applied = self
            .transact(group_id, |agg, now| agg.record_payment_failure(member_id, now))
            .await?;

        if !applied.changed {
            warn!(
                member_id = %member_id,
                status = applied.member.status.as_str(),
                "payment failure ignored"
            );
            return Ok(applied.member);
        }

        publish_all(
            self.events.as_ref(),
            vec![DomainEvent::PaymentRecorded(PaymentRecordedEvent {
                group_id,
                member_id,
                payment_id: payment_id.map(str::to_string),
                amount: 0,
                succeeded: false,
                occurred_at: self.clock.now().timestamp(),
            })],
        )
        .await;
        info!(group_id = %group_id, member_id = %member_id, "member payment failed");
        Ok(applied.member)
    }

    pub async fn check_payment_status(&self, group_id: Uuid) -> DomainResult<PaymentSummary> {
        let agg = self.get_group(group_id).await?;
        Ok(summarize(&agg.members))
    }

    /// Cancels unpaid roster members after the deadline. Returns them for notification along
    /// with the group as committed.
    pub async fn enforce_deadline(
        &self,
        actor: &Actor,
        group_id: Uuid,
    ) -> DomainResult<DeadlineOutcome> {
        let (cancelled, group) = self
            .transact(group_id, |agg, now| {
                authorize(actor, agg)?;
                let cancelled = agg.enforce_deadline(now)?;
                Ok((cancelled, agg.group.clone()))
            })
            .await?;

        let now = self.clock.now();
        let events = cancelled
            .iter()
            .map(|m| cancelled_event(m, "payment deadline passed", now))
            .collect();
        publish_all(self.events.as_ref(), events).await;

        info!(group_id = %group_id, cancelled = cancelled.len(), "payment deadline enforced");
        Ok(DeadlineOutcome { cancelled, group })
    }

    /// Transition: CLOSED → LOCKED. Hands the paid roster to booking via `GroupLocked`.
    pub async fn lock(&self, actor: &Actor, group_id: Uuid) -> DomainResult<GroupAggregate> {
        let (agg, bookings) = self
            .transact(group_id, |agg, now| {
                authorize(actor, agg)?;
                let bookings = agg.lock(now)?;
                Ok((agg.clone(), bookings))
            })
            .await?;

        let package_id = agg.group.selected_package_id.clone().unwrap_or_default();
        publish_all(
            self.events.as_ref(),
            vec![DomainEvent::GroupLocked(GroupLockedEvent {
                group_id,
                trip_id: agg.group.trip_id,
                package_id,
                bookings,
                occurred_at: self.clock.now().timestamp(),
            })],
        )
        .await;

        info!(group_id = %group_id, members = agg.group.current_size, "pool group locked");
        Ok(agg)
    }

    async fn group_of(&self, member_id: Uuid) -> DomainResult<Uuid> {
        self.store
            .locate_member(member_id)
            .await?
            .ok_or_else(|| DomainError::NotFound(format!("member {} not found", member_id)))
    }
}

fn not_found(group_id: Uuid) -> DomainError {
    DomainError::NotFound(format!("group {} not found", group_id))
}

fn authorize(actor: &Actor, agg: &GroupAggregate) -> DomainResult<()> {
    if actor.can_manage(&agg.group.creator_id) {
        Ok(())
    } else {
        Err(DomainError::Forbidden(format!(
            "only the creator of group {} may do this",
            agg.group.id
        )))
    }
}

/// Member row the caller acts as: the given id (which must be theirs) or their active row.
pub(crate) fn resolve_member(
    agg: &GroupAggregate,
    actor: &Actor,
    member_id: Option<Uuid>,
) -> DomainResult<Uuid> {
    match member_id {
        Some(id) => {
            let member = agg.member(id)?;
            if member.user_id != actor.user_id {
                return Err(DomainError::Forbidden(format!(
                    "member {} belongs to another user",
                    id
                )));
            }
            Ok(id)
        }
        None => agg
            .active_member_of(&actor.user_id)
            .map(|m| m.id)
            .ok_or_else(|| {
                DomainError::NotFound(format!(
                    "user {} has no active membership in group {}",
                    actor.user_id, agg.group.id
                ))
            }),
    }
}

fn cancelled_event(member: &Member, reason: &str, now: DateTime<Utc>) -> DomainEvent {
    DomainEvent::MemberCancelled(MemberCancelledEvent {
        group_id: member.group_id,
        member_id: member.id,
        user_id: member.user_id.clone(),
        reason: reason.to_string(),
        occurred_at: now.timestamp(),
    })
}
