use caravan_core::{DomainError, DomainResult};
use caravan_shared::models::events::GroupBookingRequest;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Group status in the lifecycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GroupStatus {
    Open,
    Closed,
    Locked,
}

impl GroupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupStatus::Open => "OPEN",
            GroupStatus::Closed => "CLOSED",
            GroupStatus::Locked => "LOCKED",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "OPEN" => Some(GroupStatus::Open),
            "CLOSED" => Some(GroupStatus::Closed),
            "LOCKED" => Some(GroupStatus::Locked),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MemberStatus {
    Pending,
    Approved,
    PaymentPending,
    Paid,
    PaymentFailed,
    Rejected,
    Cancelled,
}

impl MemberStatus {
    /// Roster members count towards `current_size`.
    pub fn is_on_roster(&self) -> bool {
        matches!(
            self,
            MemberStatus::Approved
                | MemberStatus::PaymentPending
                | MemberStatus::PaymentFailed
                | MemberStatus::Paid
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, MemberStatus::Rejected | MemberStatus::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MemberStatus::Pending => "PENDING",
            MemberStatus::Approved => "APPROVED",
            MemberStatus::PaymentPending => "PAYMENT_PENDING",
            MemberStatus::Paid => "PAID",
            MemberStatus::PaymentFailed => "PAYMENT_FAILED",
            MemberStatus::Rejected => "REJECTED",
            MemberStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "PENDING" => Some(MemberStatus::Pending),
            "APPROVED" => Some(MemberStatus::Approved),
            "PAYMENT_PENDING" => Some(MemberStatus::PaymentPending),
            "PAID" => Some(MemberStatus::Paid),
            "PAYMENT_FAILED" => Some(MemberStatus::PaymentFailed),
            "REJECTED" => Some(MemberStatus::Rejected),
            "CANCELLED" => Some(MemberStatus::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentOutcome {
    Success,
    Failed,
}

impl PaymentOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentOutcome::Success => "SUCCESS",
            PaymentOutcome::Failed => "FAILED",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "SUCCESS" => Some(PaymentOutcome::Success),
            "FAILED" => Some(PaymentOutcome::Failed),
            _ => None,
        }
    }
}

/// Creator decision on a join request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewDecision {
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PoolGroup {
    pub id: Uuid,
    pub trip_id: Uuid,
    pub creator_id: String,
    pub group_size: u32,
    pub current_size: u32,
    pub status: GroupStatus,
    pub selected_package_id: Option<String>,
    pub per_person_cost: Option<i64>,
    pub payment_deadline: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub locked_at: Option<DateTime<Utc>>,
}

impl PoolGroup {
    pub fn new(trip_id: Uuid, creator_id: String, group_size: u32, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            trip_id,
            creator_id,
            group_size,
            current_size: 0,
            status: GroupStatus::Open,
            selected_package_id: None,
            per_person_cost: None,
            payment_deadline: None,
            created_at: now,
            updated_at: now,
            locked_at: None,
        }
    }

    pub fn is_full(&self) -> bool {
        self.current_size >= self.group_size
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Member {
    pub id: Uuid,
    pub group_id: Uuid,
    pub user_id: String,
    pub status: MemberStatus,
    pub payment_status: Option<PaymentOutcome>,
    pub amount_paid: i64,
    pub payment_id: Option<String>,
    pub joined_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub package_approved_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Member {
    fn new(group_id: Uuid, user_id: String, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            group_id,
            user_id,
            status: MemberStatus::Pending,
            payment_status: None,
            amount_paid: 0,
            payment_id: None,
            joined_at: now,
            paid_at: None,
            package_approved_at: None,
            updated_at: now,
        }
    }

    fn update_status(&mut self, status: MemberStatus, now: DateTime<Utc>) {
        self.status = status;
        self.updated_at = now;
    }
}

/// Result of applying a payment callback: `changed` is false for duplicate deliveries.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentApplied {
    pub member: Member,
    pub changed: bool,
}

/// A group with all of its member rows. Every transition runs against one aggregate inside
/// the group's transaction and keeps `current_size` equal to the roster count.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GroupAggregate {
    #[serde(flatten)]
    pub group: PoolGroup,
    pub members: Vec<Member>,
}

impl GroupAggregate {
    pub fn new(group: PoolGroup) -> Self {
        Self {
            group,
            members: Vec::new(),
        }
    }

    pub fn roster_count(&self) -> u32 {
        self.members
            .iter()
            .filter(|m| m.status.is_on_roster())
            .count() as u32
    }

    pub fn member(&self, member_id: Uuid) -> DomainResult<&Member> {
        self.members
            .iter()
            .find(|m| m.id == member_id)
            .ok_or_else(|| DomainError::NotFound(format!("member {} not found", member_id)))
    }

    fn member_mut(&mut self, member_id: Uuid) -> DomainResult<&mut Member> {
        self.members
            .iter_mut()
            .find(|m| m.id == member_id)
            .ok_or_else(|| DomainError::NotFound(format!("member {} not found", member_id)))
    }

    /// Active (non-terminal) row of a user, if any.
    pub fn active_member_of(&self, user_id: &str) -> Option<&Member> {
        self.members
            .iter()
            .find(|m| m.user_id == user_id && !m.status.is_terminal())
    }

    fn ensure_not_locked(&self) -> DomainResult<()> {
        if self.group.status == GroupStatus::Locked {
            return Err(DomainError::InvalidState(format!(
                "group {} is locked",
                self.group.id
            )));
        }
        Ok(())
    }

    /// Recomputes `current_size` and moves between OPEN and CLOSED accordingly.
    fn resize(&mut self, now: DateTime<Utc>) {
        self.group.current_size = self.roster_count();
        self.group.status = match self.group.status {
            GroupStatus::Locked => GroupStatus::Locked,
            _ if self.group.is_full() => GroupStatus::Closed,
            _ => GroupStatus::Open,
        };
        self.group.updated_at = now;
    }

    /// New join request (PENDING)
    pub fn join(&mut self, user_id: &str, now: DateTime<Utc>) -> DomainResult<Member> {
        self.ensure_not_locked()?;
        if self.group.is_full() {
            return Err(DomainError::Full(format!(
                "group {} already has {} of {} members",
                self.group.id, self.group.current_size, self.group.group_size
            )));
        }
        if self.active_member_of(user_id).is_some() {
            return Err(DomainError::Duplicate(format!(
                "user {} already has an active request in group {}",
                user_id, self.group.id
            )));
        }

        let member = Member::new(self.group.id, user_id.to_string(), now);
        self.members.push(member.clone());
        self.group.updated_at = now;
        Ok(member)
    }

    /// Transition: PENDING → APPROVED | REJECTED
    pub fn review(
        &mut self,
        member_id: Uuid,
        decision: ReviewDecision,
        now: DateTime<Utc>,
    ) -> DomainResult<Member> {
        self.ensure_not_locked()?;
        let full = self.group.is_full();
        let group_id = self.group.id;

        let member = self.member_mut(member_id)?;
        if member.status != MemberStatus::Pending {
            return Err(DomainError::InvalidState(format!(
                "member {} is {}, not PENDING",
                member_id,
                member.status.as_str()
            )));
        }

        match decision {
            ReviewDecision::Approved => {
                if full {
                    return Err(DomainError::Full(format!("group {} is full", group_id)));
                }
                member.update_status(MemberStatus::Approved, now);
            }
            ReviewDecision::Rejected => member.update_status(MemberStatus::Rejected, now),
        }
        let member = member.clone();

        self.resize(now);
        Ok(member)
    }

    /// Selects the package for a CLOSED group and opens the payment window.
    ///
    /// APPROVED members move to PAYMENT_PENDING. PAID members are never touched; when the
    /// package or price changes, earlier package approvals of unpaid members are void.
    pub fn set_package(
        &mut self,
        package_id: &str,
        per_person_cost: i64,
        payment_deadline: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        if package_id.trim().is_empty() {
            return Err(DomainError::Validation("package id must not be blank".into()));
        }
        if per_person_cost <= 0 {
            return Err(DomainError::Validation(
                "per-person cost must be positive".into(),
            ));
        }
        if payment_deadline <= now {
            return Err(DomainError::Validation(
                "payment deadline must be in the future".into(),
            ));
        }
        match self.group.status {
            GroupStatus::Closed => {}
            status => {
                return Err(DomainError::InvalidState(format!(
                    "package can only be set on a CLOSED group, group {} is {}",
                    self.group.id,
                    status.as_str()
                )))
            }
        }

        let terms_changed = self.group.selected_package_id.as_deref() != Some(package_id)
            || self.group.per_person_cost != Some(per_person_cost);

        self.group.selected_package_id = Some(package_id.to_string());
        self.group.per_person_cost = Some(per_person_cost);
        self.group.payment_deadline = Some(payment_deadline);
        self.group.updated_at = now;

        for member in self.members.iter_mut() {
            match member.status {
                MemberStatus::Approved => member.update_status(MemberStatus::PaymentPending, now),
                MemberStatus::PaymentPending | MemberStatus::PaymentFailed if terms_changed => {
                    member.package_approved_at = None;
                    member.updated_at = now;
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Records the member's consent to the selected package. Repeated calls keep the first
    /// approval time.
    pub fn approve_package(&mut self, member_id: Uuid, now: DateTime<Utc>) -> DomainResult<Member> {
        self.ensure_not_locked()?;
        if self.group.selected_package_id.is_none() {
            return Err(DomainError::InvalidState(format!(
                "group {} has no package selected",
                self.group.id
            )));
        }

        let member = self.member_mut(member_id)?;
        match member.status {
            MemberStatus::PaymentPending | MemberStatus::PaymentFailed => {}
            status => {
                return Err(DomainError::InvalidState(format!(
                    "member {} is {}, package approval needs an open payment",
                    member_id,
                    status.as_str()
                )))
            }
        }
        if member.package_approved_at.is_none() {
            member.package_approved_at = Some(now);
            member.updated_at = now;
        }
        Ok(member.clone())
    }

    /// Member that may be charged now, with the amount due.
    pub fn payable(&self, member_id: Uuid) -> DomainResult<(&Member, i64)> {
        self.ensure_not_locked()?;
        let cost = self.group.per_person_cost.ok_or_else(|| {
            DomainError::InvalidState(format!("group {} has no package selected", self.group.id))
        })?;
        let member = self.member(member_id)?;
        match member.status {
            MemberStatus::PaymentPending | MemberStatus::PaymentFailed => {}
            status => {
                return Err(DomainError::InvalidState(format!(
                    "member {} is {}, nothing to pay",
                    member_id,
                    status.as_str()
                )))
            }
        }
        if member.package_approved_at.is_none() {
            return Err(DomainError::InvalidState(format!(
                "member {} has not approved the package",
                member_id
            )));
        }
        Ok((member, cost))
    }

    /// Transition: PAYMENT_PENDING | PAYMENT_FAILED → PAID
    pub fn record_payment_success(
        &mut self,
        member_id: Uuid,
        payment_id: &str,
        amount: i64,
        now: DateTime<Utc>,
    ) -> DomainResult<PaymentApplied> {
        let cost = self.group.per_person_cost;
        let member = self.member_mut(member_id)?;

        if member.status == MemberStatus::Paid {
            return Ok(PaymentApplied {
                member: member.clone(),
                changed: false,
            });
        }
        if !matches!(
            member.status,
            MemberStatus::PaymentPending | MemberStatus::PaymentFailed
        ) {
            return Err(DomainError::InvalidState(format!(
                "member {} is {}, payment cannot be applied",
                member_id,
                member.status.as_str()
            )));
        }
        if member.package_approved_at.is_none() {
            return Err(DomainError::InvalidState(format!(
                "member {} has not approved the package",
                member_id
            )));
        }
        let cost = cost.ok_or_else(|| {
            DomainError::InvalidState(format!("member {} has no price to pay", member_id))
        })?;
        if amount < cost {
            return Err(DomainError::Invalid(format!(
                "payment of {} is below the per-person cost {}",
                amount, cost
            )));
        }

        member.update_status(MemberStatus::Paid, now);
        member.payment_status = Some(PaymentOutcome::Success);
        member.amount_paid = amount;
        member.payment_id = Some(payment_id.to_string());
        member.paid_at = Some(now);
        let member = member.clone();
        self.group.updated_at = now;

        Ok(PaymentApplied {
            member,
            changed: true,
        })
    }

    /// Transition: PAYMENT_PENDING → PAYMENT_FAILED
    pub fn record_payment_failure(
        &mut self,
        member_id: Uuid,
        now: DateTime<Utc>,
    ) -> DomainResult<PaymentApplied> {
        let member = self.member_mut(member_id)?;
        match member.status {
            MemberStatus::PaymentPending => {
                member.update_status(MemberStatus::PaymentFailed, now);
                member.payment_status = Some(PaymentOutcome::Failed);
                Ok(PaymentApplied {
                    member: member.clone(),
                    changed: true,
                })
            }
            MemberStatus::PaymentFailed | MemberStatus::Paid => Ok(PaymentApplied {
                member: member.clone(),
                changed: false,
            }),
            status => Err(DomainError::InvalidState(format!(
                "member {} is {}, payment failure cannot be applied",
                member_id,
                status.as_str()
            ))),
        }
    }

    /// Cancels every unpaid roster member once the payment deadline has passed.
    pub fn enforce_deadline(&mut self, now: DateTime<Utc>) -> DomainResult<Vec<Member>> {
        self.ensure_not_locked()?;
        let deadline = self.group.payment_deadline.ok_or_else(|| {
            DomainError::InvalidState(format!("group {} has no payment deadline", self.group.id))
        })?;
        if now <= deadline {
            return Err(DomainError::TooEarly(format!(
                "payment deadline {} has not passed yet",
                deadline
            )));
        }

        let mut cancelled = Vec::new();
        for member in self.members.iter_mut() {
            if member.status.is_on_roster() && member.status != MemberStatus::Paid {
                member.update_status(MemberStatus::Cancelled, now);
                cancelled.push(member.clone());
            }
        }
        self.resize(now);
        Ok(cancelled)
    }

    /// The user's own withdrawal. PAID members cannot leave.
    pub fn leave(&mut self, user_id: &str, now: DateTime<Utc>) -> DomainResult<Member> {
        self.ensure_not_locked()?;
        let group_id = self.group.id;
        let member = self
            .members
            .iter_mut()
            .find(|m| m.user_id == user_id && !m.status.is_terminal())
            .ok_or_else(|| {
                DomainError::NotFound(format!(
                    "user {} has no active membership in group {}",
                    user_id, group_id
                ))
            })?;
        if member.status == MemberStatus::Paid {
            return Err(DomainError::InvalidState(format!(
                "member {} has already paid",
                member.id
            )));
        }
        member.update_status(MemberStatus::Cancelled, now);
        let member = member.clone();

        self.resize(now);
        Ok(member)
    }

    /// Transition: CLOSED → LOCKED. Returns one booking request per paid member.
    pub fn lock(&mut self, now: DateTime<Utc>) -> DomainResult<Vec<GroupBookingRequest>> {
        if self.group.status != GroupStatus::Closed {
            return Err(DomainError::InvalidState(format!(
                "group {} is {}, only CLOSED groups can be locked",
                self.group.id,
                self.group.status.as_str()
            )));
        }
        let package_id = self.group.selected_package_id.clone().ok_or_else(|| {
            DomainError::InvalidState(format!("group {} has no package selected", self.group.id))
        })?;
        let summary = crate::payments::summarize(&self.members);
        if !summary.all_paid {
            return Err(DomainError::NotAllPaid(format!(
                "{} of {} members have paid",
                summary.paid_members, summary.total_members
            )));
        }

        self.group.status = GroupStatus::Locked;
        self.group.locked_at = Some(now);
        self.group.updated_at = now;

        Ok(self
            .members
            .iter()
            .filter(|m| m.status == MemberStatus::Paid)
            .map(|m| GroupBookingRequest {
                member_id: m.id,
                user_id: m.user_id.clone(),
                package_id: package_id.clone(),
                amount_paid: m.amount_paid,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
    }

    fn group(size: u32) -> GroupAggregate {
        GroupAggregate::new(PoolGroup::new(Uuid::new_v4(), "creator".into(), size, now()))
    }

    fn approved(agg: &mut GroupAggregate, user: &str) -> Uuid {
        let member = agg.join(user, now()).unwrap();
        agg.review(member.id, ReviewDecision::Approved, now()).unwrap();
        member.id
    }

    #[test]
    fn test_join_duplicate_and_full() {
        let mut agg = group(2);
        let m = agg.join("u1", now()).unwrap();
        assert_eq!(m.status, MemberStatus::Pending);
        assert!(matches!(agg.join("u1", now()), Err(DomainError::Duplicate(_))));

        agg.review(m.id, ReviewDecision::Approved, now()).unwrap();
        approved(&mut agg, "u2");
        assert_eq!(agg.group.status, GroupStatus::Closed);
        assert!(matches!(agg.join("u3", now()), Err(DomainError::Full(_))));
    }

    #[test]
    fn test_rejected_user_may_rejoin() {
        let mut agg = group(3);
        let m = agg.join("u1", now()).unwrap();
        agg.review(m.id, ReviewDecision::Rejected, now()).unwrap();
        assert_eq!(agg.group.current_size, 0);
        assert!(agg.join("u1", now()).is_ok());
    }

    #[test]
    fn test_review_requires_pending() {
        let mut agg = group(3);
        let id = approved(&mut agg, "u1");
        assert!(matches!(
            agg.review(id, ReviewDecision::Rejected, now()),
            Err(DomainError::InvalidState(_))
        ));
    }

    #[test]
    fn test_approval_blocked_when_full() {
        let mut agg = group(2);
        let late = agg.join("u3", now()).unwrap();
        approved(&mut agg, "u1");
        approved(&mut agg, "u2");
        assert!(matches!(
            agg.review(late.id, ReviewDecision::Approved, now()),
            Err(DomainError::Full(_))
        ));
    }

    #[test]
    fn test_set_package_only_when_closed() {
        let mut agg = group(2);
        approved(&mut agg, "u1");
        let err = agg
            .set_package("pkg", 5000, now() + Duration::hours(1), now())
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));

        approved(&mut agg, "u2");
        assert!(matches!(
            agg.set_package("pkg", 0, now() + Duration::hours(1), now()),
            Err(DomainError::Validation(_))
        ));
        assert!(matches!(
            agg.set_package("pkg", 5000, now(), now()),
            Err(DomainError::Validation(_))
        ));
        agg.set_package("pkg", 5000, now() + Duration::hours(1), now())
            .unwrap();
        assert!(agg
            .members
            .iter()
            .all(|m| m.status == MemberStatus::PaymentPending));
    }

    #[test]
    fn test_price_change_clears_unpaid_approvals() {
        let mut agg = group(2);
        let a = approved(&mut agg, "u1");
        let b = approved(&mut agg, "u2");
        let deadline = now() + Duration::hours(1);
        agg.set_package("pkg", 5000, deadline, now()).unwrap();
        agg.approve_package(a, now()).unwrap();
        agg.approve_package(b, now()).unwrap();
        agg.record_payment_success(a, "pay_1", 5000, now()).unwrap();

        // same terms: approvals survive
        agg.set_package("pkg", 5000, deadline + Duration::hours(1), now())
            .unwrap();
        assert!(agg.member(b).unwrap().package_approved_at.is_some());

        agg.set_package("pkg", 6000, deadline, now()).unwrap();
        assert!(agg.member(b).unwrap().package_approved_at.is_none());
        assert_eq!(agg.member(a).unwrap().status, MemberStatus::Paid);
        assert!(agg.member(a).unwrap().package_approved_at.is_some());
    }

    #[test]
    fn test_payment_requires_approval_and_full_amount() {
        let mut agg = group(2);
        let a = approved(&mut agg, "u1");
        approved(&mut agg, "u2");
        agg.set_package("pkg", 5000, now() + Duration::hours(1), now())
            .unwrap();

        assert!(matches!(
            agg.record_payment_success(a, "pay_1", 5000, now()),
            Err(DomainError::InvalidState(_))
        ));
        agg.approve_package(a, now()).unwrap();
        assert!(matches!(
            agg.record_payment_success(a, "pay_1", 4999, now()),
            Err(DomainError::Invalid(_))
        ));

        let applied = agg.record_payment_success(a, "pay_1", 5000, now()).unwrap();
        assert!(applied.changed);
        let again = agg.record_payment_success(a, "pay_1", 5000, now()).unwrap();
        assert!(!again.changed);
        assert_eq!(again.member.amount_paid, 5000);
    }

    #[test]
    fn test_failure_then_retry() {
        let mut agg = group(2);
        let a = approved(&mut agg, "u1");
        approved(&mut agg, "u2");
        agg.set_package("pkg", 5000, now() + Duration::hours(1), now())
            .unwrap();
        agg.approve_package(a, now()).unwrap();

        assert!(agg.record_payment_failure(a, now()).unwrap().changed);
        assert!(!agg.record_payment_failure(a, now()).unwrap().changed);
        assert_eq!(agg.roster_count(), 2);

        agg.record_payment_success(a, "pay_2", 5000, now()).unwrap();
        let ignored = agg.record_payment_failure(a, now()).unwrap();
        assert!(!ignored.changed);
        assert_eq!(ignored.member.status, MemberStatus::Paid);
    }

    #[test]
    fn test_deadline_cancels_unpaid_and_reopens() {
        let mut agg = group(3);
        let ids: Vec<Uuid> = ["u1", "u2", "u3"]
            .iter()
            .map(|u| approved(&mut agg, u))
            .collect();
        let deadline = now() + Duration::hours(1);
        agg.set_package("pkg", 5000, deadline, now()).unwrap();
        for id in &ids[..2] {
            agg.approve_package(*id, now()).unwrap();
            agg.record_payment_success(*id, "pay", 5000, now()).unwrap();
        }

        assert!(matches!(
            agg.enforce_deadline(deadline),
            Err(DomainError::TooEarly(_))
        ));
        let cancelled = agg.enforce_deadline(deadline + Duration::seconds(1)).unwrap();
        assert_eq!(cancelled.len(), 1);
        assert_eq!(cancelled[0].id, ids[2]);
        assert_eq!(agg.group.current_size, 2);
        assert_eq!(agg.group.status, GroupStatus::Open);
    }

    #[test]
    fn test_lock_rules() {
        let mut agg = group(2);
        let a = approved(&mut agg, "u1");
        let b = approved(&mut agg, "u2");
        assert!(matches!(agg.lock(now()), Err(DomainError::InvalidState(_))));

        agg.set_package("pkg", 5000, now() + Duration::hours(1), now())
            .unwrap();
        agg.approve_package(a, now()).unwrap();
        agg.record_payment_success(a, "pay_a", 5000, now()).unwrap();
        assert!(matches!(agg.lock(now()), Err(DomainError::NotAllPaid(_))));

        agg.approve_package(b, now()).unwrap();
        agg.record_payment_success(b, "pay_b", 5200, now()).unwrap();
        let bookings = agg.lock(now()).unwrap();
        assert_eq!(bookings.len(), 2);
        assert_eq!(agg.group.status, GroupStatus::Locked);
        assert!(bookings.iter().any(|b| b.amount_paid == 5200));

        assert!(matches!(agg.join("u9", now()), Err(DomainError::InvalidState(_))));
        assert!(matches!(
            agg.set_package("pkg2", 1, now() + Duration::hours(1), now()),
            Err(DomainError::InvalidState(_))
        ));
    }

    #[test]
    fn test_leave_shrinks_roster() {
        let mut agg = group(2);
        approved(&mut agg, "u1");
        approved(&mut agg, "u2");
        assert_eq!(agg.group.status, GroupStatus::Closed);

        let left = agg.leave("u2", now()).unwrap();
        assert_eq!(left.status, MemberStatus::Cancelled);
        assert_eq!(agg.group.current_size, 1);
        assert_eq!(agg.group.status, GroupStatus::Open);
        assert!(matches!(agg.leave("u2", now()), Err(DomainError::NotFound(_))));
    }
}
