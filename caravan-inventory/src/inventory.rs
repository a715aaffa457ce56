use crate::context::PartitionKey;
use crate::hold::{Hold, HoldStatus, HoldToken, OwnerRef};
use caravan_core::{DomainError, DomainResult};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UnitStatus {
    Available,
    Held,
    Booked,
}

impl UnitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitStatus::Available => "AVAILABLE",
            UnitStatus::Held => "HELD",
            UnitStatus::Booked => "BOOKED",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "AVAILABLE" => Some(UnitStatus::Available),
            "HELD" => Some(UnitStatus::Held),
            "BOOKED" => Some(UnitStatus::Booked),
            _ => None,
        }
    }
}

/// A seat or room for one date context.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InventoryUnit {
    pub unit_id: String,
    pub status: UnitStatus,
    pub hold_token: Option<HoldToken>,
    pub hold_expires_at: Option<DateTime<Utc>>,
}

impl InventoryUnit {
    pub fn available(unit_id: impl Into<String>) -> Self {
        Self {
            unit_id: unit_id.into(),
            status: UnitStatus::Available,
            hold_token: None,
            hold_expires_at: None,
        }
    }

    fn make_available(&mut self) {
        self.status = UnitStatus::Available;
        self.hold_token = None;
        self.hold_expires_at = None;
    }

    fn is_held_by(&self, token: &HoldToken) -> bool {
        self.status == UnitStatus::Held && self.hold_token.as_ref() == Some(token)
    }
}

/// Seat-map row as seen by one requester. Another shopper's token is never exposed.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct UnitView {
    pub unit_id: String,
    pub status: UnitStatus,
    pub held_by_you: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hold_token: Option<HoldToken>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hold_expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AcquireOutcome {
    pub token: HoldToken,
    pub expires_at: DateTime<Utc>,
    /// Every unit now covered by the hold, merged ones included.
    pub unit_ids: Vec<String>,
    /// Units that changed from AVAILABLE to HELD in this call.
    pub newly_held: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfirmOutcome {
    pub booked: Vec<String>,
    pub released: Vec<String>,
}

/// All units and holds of one `(resource, context)` pair.
///
/// Every mutation goes through here while the caller holds the partition's exclusive
/// transaction, so a unit is checked and claimed in one step.
#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
    pub key: PartitionKey,
    pub units: BTreeMap<String, InventoryUnit>,
    pub holds: HashMap<HoldToken, Hold>,
    owners: HashMap<OwnerRef, HoldToken>,
}

impl Partition {
    pub fn new(key: PartitionKey) -> Self {
        Self {
            key,
            units: BTreeMap::new(),
            holds: HashMap::new(),
            owners: HashMap::new(),
        }
    }

    /// Rebuilds a partition from persisted rows.
    pub fn from_parts(
        key: PartitionKey,
        units: impl IntoIterator<Item = InventoryUnit>,
        holds: impl IntoIterator<Item = Hold>,
    ) -> Self {
        let mut partition = Self::new(key);
        partition.units = units
            .into_iter()
            .map(|u| (u.unit_id.clone(), u))
            .collect();
        for hold in holds {
            if hold.status == HoldStatus::Active {
                partition.owners.insert(hold.owner.clone(), hold.token.clone());
            }
            partition.holds.insert(hold.token.clone(), hold);
        }
        partition
    }

    pub fn resource_id(&self) -> Uuid {
        self.key.resource_id
    }

    pub fn active_hold_for(&self, owner: &OwnerRef) -> Option<&Hold> {
        self.owners.get(owner).and_then(|t| self.holds.get(t))
    }

    /// Adds units that do not exist yet as AVAILABLE. Returns how many were created.
    pub fn provision(&mut self, unit_ids: &[String]) -> usize {
        let mut created = 0;
        for id in unit_ids {
            if !self.units.contains_key(id) {
                self.units
                    .insert(id.clone(), InventoryUnit::available(id.clone()));
                created += 1;
            }
        }
        created
    }

    /// Reverts every lapsed hold to AVAILABLE and marks it EXPIRED.
    /// Returns the units that became available.
    pub fn expire_lapsed(&mut self, now: DateTime<Utc>) -> Vec<String> {
        let mut reverted = Vec::new();
        for unit in self.units.values_mut() {
            if unit.status == UnitStatus::Held
                && unit.hold_expires_at.map_or(true, |at| now > at)
            {
                unit.make_available();
                reverted.push(unit.unit_id.clone());
            }
        }

        let lapsed: Vec<HoldToken> = self
            .holds
            .values()
            .filter(|h| h.is_lapsed(now))
            .map(|h| h.token.clone())
            .collect();
        for token in lapsed {
            self.close_hold(&token, HoldStatus::Expired, now);
        }

        reverted
    }

    /// Holds `unit_ids` for `owner`, merging into the owner's live hold when there is one.
    ///
    /// All-or-nothing: when any requested unit is missing or held by someone else, nothing
    /// changes. `existing` is a hint; a stale or unknown token is ignored and a fresh hold
    /// is opened instead.
    pub fn acquire(
        &mut self,
        owner: &OwnerRef,
        unit_ids: &[String],
        existing: Option<&HoldToken>,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> DomainResult<AcquireOutcome> {
        let requested: BTreeSet<String> = unit_ids.iter().cloned().collect();
        if requested.is_empty() {
            return Err(DomainError::Validation("no units requested".into()));
        }

        let target = match existing.and_then(|t| self.holds.get(t)) {
            Some(hold) if hold.is_live(now) => {
                if &hold.owner != owner {
                    return Err(DomainError::Invalid(format!(
                        "hold {} belongs to another owner",
                        hold.token
                    )));
                }
                Some(hold.token.clone())
            }
            _ => self
                .active_hold_for(owner)
                .filter(|h| h.is_live(now))
                .map(|h| h.token.clone()),
        };

        let mut missing = Vec::new();
        let mut taken = Vec::new();
        for id in &requested {
            match self.units.get(id) {
                None => missing.push(id.as_str()),
                Some(unit) => match unit.status {
                    UnitStatus::Available => {}
                    UnitStatus::Booked => taken.push(id.as_str()),
                    UnitStatus::Held => {
                        let ours = target.as_ref().is_some_and(|t| unit.is_held_by(t));
                        let lapsed = unit.hold_expires_at.map_or(true, |at| now > at);
                        if !ours && !lapsed {
                            taken.push(id.as_str());
                        }
                    }
                },
            }
        }
        if !missing.is_empty() {
            return Err(DomainError::NotFound(format!(
                "unknown units: {}",
                missing.join(", ")
            )));
        }
        if !taken.is_empty() {
            return Err(DomainError::Conflict(format!(
                "units already taken: {}",
                taken.join(", ")
            )));
        }

        let expires_at = now + ttl;
        let token = match target {
            Some(token) => token,
            None => {
                // A lapsed hold of this owner may still be indexed.
                if let Some(stale) = self.owners.get(owner).cloned() {
                    self.close_hold(&stale, HoldStatus::Expired, now);
                }
                let token = HoldToken::generate();
                self.holds.insert(
                    token.clone(),
                    Hold {
                        token: token.clone(),
                        resource_id: self.key.resource_id,
                        context: self.key.context,
                        owner: owner.clone(),
                        unit_ids: BTreeSet::new(),
                        status: HoldStatus::Active,
                        created_at: now,
                        expires_at,
                        closed_at: None,
                    },
                );
                self.owners.insert(owner.clone(), token.clone());
                token
            }
        };

        let mut newly_held = Vec::new();
        let covered: Vec<String> = {
            let hold = self
                .holds
                .get_mut(&token)
                .ok_or_else(|| DomainError::Invalid(format!("hold {} vanished", token)))?;
            hold.unit_ids.extend(requested.iter().cloned());
            hold.expires_at = expires_at;
            hold.unit_ids.iter().cloned().collect()
        };

        // Merging refreshes the expiry of every unit under the hold.
        for id in &covered {
            if let Some(unit) = self.units.get_mut(id) {
                if !unit.is_held_by(&token) {
                    newly_held.push(id.clone());
                }
                unit.status = UnitStatus::Held;
                unit.hold_token = Some(token.clone());
                unit.hold_expires_at = Some(expires_at);
            }
        }

        Ok(AcquireOutcome {
            token,
            expires_at,
            unit_ids: covered,
            newly_held,
        })
    }

    /// Releases all units of the hold, or only the listed subset. Unknown, closed or lapsed
    /// tokens are a no-op. Returns the units that became available.
    pub fn release(
        &mut self,
        token: &HoldToken,
        unit_ids: Option<&[String]>,
        now: DateTime<Utc>,
    ) -> Vec<String> {
        let targets: Vec<String> = match self.holds.get(token) {
            Some(hold) if hold.is_live(now) => match unit_ids {
                None => hold.unit_ids.iter().cloned().collect(),
                Some(ids) => ids
                    .iter()
                    .filter(|id| hold.unit_ids.contains(*id))
                    .cloned()
                    .collect(),
            },
            _ => return Vec::new(),
        };

        let mut released = Vec::new();
        for id in &targets {
            if let Some(unit) = self.units.get_mut(id) {
                if unit.is_held_by(token) {
                    unit.make_available();
                    released.push(id.clone());
                }
            }
        }

        let emptied = match self.holds.get_mut(token) {
            Some(hold) => {
                for id in &targets {
                    hold.unit_ids.remove(id);
                }
                hold.unit_ids.is_empty()
            }
            None => false,
        };
        if emptied {
            self.close_hold(token, HoldStatus::Released, now);
        }

        released
    }

    /// Books the listed units of a live hold (all of them when `unit_ids` is `None`) and
    /// releases whatever else the hold covered.
    pub fn confirm(
        &mut self,
        token: &HoldToken,
        unit_ids: Option<&[String]>,
        now: DateTime<Utc>,
    ) -> DomainResult<ConfirmOutcome> {
        let hold = self
            .holds
            .get(token)
            .ok_or_else(|| DomainError::Invalid(format!("unknown hold token {}", token)))?;

        match hold.status {
            HoldStatus::Expired => {
                return Err(DomainError::Expired(format!("hold {} has expired", token)))
            }
            HoldStatus::Confirmed | HoldStatus::Released => {
                return Err(DomainError::Invalid(format!(
                    "hold {} is already {}",
                    token,
                    hold.status.as_str().to_lowercase()
                )))
            }
            HoldStatus::Active if hold.is_lapsed(now) => {
                return Err(DomainError::Expired(format!("hold {} has expired", token)))
            }
            HoldStatus::Active => {}
        }

        let booked: BTreeSet<String> = match unit_ids {
            None => hold.unit_ids.clone(),
            Some(ids) => {
                if ids.is_empty() {
                    return Err(DomainError::Validation("no units to confirm".into()));
                }
                let foreign: Vec<&str> = ids
                    .iter()
                    .filter(|id| !hold.unit_ids.contains(*id))
                    .map(String::as_str)
                    .collect();
                if !foreign.is_empty() {
                    return Err(DomainError::Invalid(format!(
                        "units not covered by hold {}: {}",
                        token,
                        foreign.join(", ")
                    )));
                }
                ids.iter().cloned().collect()
            }
        };
        let rest: Vec<String> = hold
            .unit_ids
            .iter()
            .filter(|id| !booked.contains(*id))
            .cloned()
            .collect();

        let mut outcome = ConfirmOutcome::default();
        for id in &booked {
            if let Some(unit) = self.units.get_mut(id) {
                unit.status = UnitStatus::Booked;
                unit.hold_token = None;
                unit.hold_expires_at = None;
                outcome.booked.push(id.clone());
            }
        }
        for id in &rest {
            if let Some(unit) = self.units.get_mut(id) {
                if unit.is_held_by(token) {
                    unit.make_available();
                    outcome.released.push(id.clone());
                }
            }
        }

        if let Some(hold) = self.holds.get_mut(token) {
            hold.unit_ids = booked;
        }
        self.close_hold(token, HoldStatus::Confirmed, now);

        Ok(outcome)
    }

    /// Drops closed holds whose `closed_at` is older than `before`.
    pub fn purge_closed(&mut self, before: DateTime<Utc>) -> usize {
        let len = self.holds.len();
        self.holds.retain(|_, h| {
            h.status == HoldStatus::Active || h.closed_at.map_or(false, |at| at >= before)
        });
        len - self.holds.len()
    }

    pub fn view_for(&self, viewer: Option<&OwnerRef>) -> Vec<UnitView> {
        let mine = viewer.and_then(|o| self.owners.get(o));
        self.units
            .values()
            .map(|unit| {
                let held_by_you = unit.status == UnitStatus::Held
                    && mine.is_some()
                    && unit.hold_token.as_ref() == mine;
                UnitView {
                    unit_id: unit.unit_id.clone(),
                    status: unit.status,
                    held_by_you,
                    hold_token: if held_by_you {
                        unit.hold_token.clone()
                    } else {
                        None
                    },
                    hold_expires_at: unit.hold_expires_at,
                }
            })
            .collect()
    }

    fn close_hold(&mut self, token: &HoldToken, status: HoldStatus, now: DateTime<Utc>) {
        if let Some(hold) = self.holds.get_mut(token) {
            hold.close(status, now);
            if self.owners.get(&hold.owner) == Some(token) {
                self.owners.remove(&hold.owner);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextKey;
    use chrono::{NaiveDate, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
    }

    fn ids(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    fn partition() -> Partition {
        let date = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        let mut p = Partition::new(PartitionKey::new(Uuid::new_v4(), ContextKey::journey(date)));
        p.provision(&ids(&["A1", "A2", "A3", "B1"]));
        p
    }

    fn status(p: &Partition, id: &str) -> UnitStatus {
        p.units[id].status
    }

    #[test]
    fn test_acquire_then_conflict() {
        let mut p = partition();
        let alice = OwnerRef::new("alice");
        let bob = OwnerRef::new("bob");
        let ttl = Duration::seconds(300);

        let grant = p.acquire(&alice, &ids(&["A1", "A2"]), None, ttl, now()).unwrap();
        assert_eq!(grant.expires_at, now() + ttl);
        assert_eq!(grant.newly_held, ids(&["A1", "A2"]));
        assert_eq!(status(&p, "A1"), UnitStatus::Held);

        let err = p.acquire(&bob, &ids(&["A2", "A3"]), None, ttl, now()).unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
        // all-or-nothing: A3 untouched
        assert_eq!(status(&p, "A3"), UnitStatus::Available);
    }

    #[test]
    fn test_acquire_unknown_unit() {
        let mut p = partition();
        let err = p
            .acquire(&OwnerRef::new("alice"), &ids(&["Z9"]), None, Duration::seconds(60), now())
            .unwrap_err();
        assert!(matches!(err, DomainError::NotFound(_)));
        assert!(p.holds.is_empty());
    }

    #[test]
    fn test_acquire_merges_and_refreshes_expiry() {
        let mut p = partition();
        let alice = OwnerRef::new("alice");
        let ttl = Duration::seconds(300);

        let first = p.acquire(&alice, &ids(&["A1"]), None, ttl, now()).unwrap();
        let later = now() + Duration::seconds(120);
        let second = p.acquire(&alice, &ids(&["A2"]), None, ttl, later).unwrap();

        assert_eq!(first.token, second.token);
        assert_eq!(second.unit_ids, ids(&["A1", "A2"]));
        assert_eq!(second.newly_held, ids(&["A2"]));
        assert_eq!(p.units["A1"].hold_expires_at, Some(later + ttl));
        assert_eq!(p.holds.len(), 1);
    }

    #[test]
    fn test_acquire_with_foreign_token_is_rejected() {
        let mut p = partition();
        let ttl = Duration::seconds(300);
        let alice = p
            .acquire(&OwnerRef::new("alice"), &ids(&["A1"]), None, ttl, now())
            .unwrap();
        let err = p
            .acquire(&OwnerRef::new("bob"), &ids(&["A2"]), Some(&alice.token), ttl, now())
            .unwrap_err();
        assert!(matches!(err, DomainError::Invalid(_)));
    }

    #[test]
    fn test_stale_hint_opens_fresh_hold() {
        let mut p = partition();
        let alice = OwnerRef::new("alice");
        let stale = HoldToken::from("hld_gone");
        let grant = p
            .acquire(&alice, &ids(&["A1"]), Some(&stale), Duration::seconds(60), now())
            .unwrap();
        assert_ne!(grant.token, stale);
    }

    #[test]
    fn test_lapsed_hold_is_reacquirable() {
        let mut p = partition();
        let ttl = Duration::seconds(60);
        let alice = p
            .acquire(&OwnerRef::new("alice"), &ids(&["A1"]), None, ttl, now())
            .unwrap();

        let later = now() + Duration::seconds(61);
        let reverted = p.expire_lapsed(later);
        assert_eq!(reverted, ids(&["A1"]));
        assert_eq!(p.holds[&alice.token].status, HoldStatus::Expired);

        let bob = p
            .acquire(&OwnerRef::new("bob"), &ids(&["A1"]), None, ttl, later)
            .unwrap();
        assert_ne!(bob.token, alice.token);
    }

    #[test]
    fn test_hold_live_exactly_at_expiry() {
        let mut p = partition();
        let ttl = Duration::seconds(60);
        p.acquire(&OwnerRef::new("alice"), &ids(&["A1"]), None, ttl, now())
            .unwrap();
        assert!(p.expire_lapsed(now() + ttl).is_empty());
        assert_eq!(p.expire_lapsed(now() + ttl + Duration::seconds(1)), ids(&["A1"]));
    }

    #[test]
    fn test_partial_release_keeps_hold() {
        let mut p = partition();
        let grant = p
            .acquire(&OwnerRef::new("alice"), &ids(&["A1", "A2"]), None, Duration::seconds(60), now())
            .unwrap();

        let released = p.release(&grant.token, Some(&ids(&["A2", "B1"])), now());
        assert_eq!(released, ids(&["A2"]));
        assert_eq!(status(&p, "A1"), UnitStatus::Held);
        assert_eq!(p.holds[&grant.token].status, HoldStatus::Active);

        let released = p.release(&grant.token, None, now());
        assert_eq!(released, ids(&["A1"]));
        assert_eq!(p.holds[&grant.token].status, HoldStatus::Released);
        assert!(p.release(&grant.token, None, now()).is_empty());
    }

    #[test]
    fn test_release_unknown_token_is_noop() {
        let mut p = partition();
        let before = p.clone();
        assert!(p.release(&HoldToken::from("hld_nope"), None, now()).is_empty());
        assert_eq!(p, before);
    }

    #[test]
    fn test_confirm_subset_releases_rest() {
        let mut p = partition();
        let grant = p
            .acquire(&OwnerRef::new("alice"), &ids(&["A1", "A2", "A3"]), None, Duration::seconds(60), now())
            .unwrap();

        let outcome = p.confirm(&grant.token, Some(&ids(&["A1", "A3"])), now()).unwrap();
        assert_eq!(outcome.booked, ids(&["A1", "A3"]));
        assert_eq!(outcome.released, ids(&["A2"]));
        assert_eq!(status(&p, "A1"), UnitStatus::Booked);
        assert_eq!(status(&p, "A2"), UnitStatus::Available);
        assert!(p.units["A1"].hold_token.is_none());

        let again = p.confirm(&grant.token, None, now()).unwrap_err();
        assert!(matches!(again, DomainError::Invalid(_)));
    }

    #[test]
    fn test_confirm_after_expiry() {
        let mut p = partition();
        let grant = p
            .acquire(&OwnerRef::new("alice"), &ids(&["A1"]), None, Duration::seconds(60), now())
            .unwrap();
        let later = now() + Duration::seconds(61);

        // lapsed but not yet swept
        let err = p.confirm(&grant.token, None, later).unwrap_err();
        assert!(matches!(err, DomainError::Expired(_)));

        p.expire_lapsed(later);
        let err = p.confirm(&grant.token, None, later).unwrap_err();
        assert!(matches!(err, DomainError::Expired(_)));
        assert_eq!(status(&p, "A1"), UnitStatus::Available);
    }

    #[test]
    fn test_confirm_rejects_units_outside_hold() {
        let mut p = partition();
        let grant = p
            .acquire(&OwnerRef::new("alice"), &ids(&["A1"]), None, Duration::seconds(60), now())
            .unwrap();
        let err = p.confirm(&grant.token, Some(&ids(&["A1", "B1"])), now()).unwrap_err();
        assert!(matches!(err, DomainError::Invalid(_)));
        assert_eq!(status(&p, "A1"), UnitStatus::Held);
    }

    #[test]
    fn test_booked_units_never_reacquired() {
        let mut p = partition();
        let grant = p
            .acquire(&OwnerRef::new("alice"), &ids(&["A1"]), None, Duration::seconds(60), now())
            .unwrap();
        p.confirm(&grant.token, None, now()).unwrap();
        let err = p
            .acquire(&OwnerRef::new("bob"), &ids(&["A1"]), None, Duration::seconds(60), now())
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn test_purge_keeps_recent_tombstones() {
        let mut p = partition();
        let grant = p
            .acquire(&OwnerRef::new("alice"), &ids(&["A1"]), None, Duration::seconds(60), now())
            .unwrap();
        p.release(&grant.token, None, now());

        assert_eq!(p.purge_closed(now()), 0);
        assert_eq!(p.purge_closed(now() + Duration::seconds(1)), 1);
        assert!(p.holds.is_empty());
    }

    #[test]
    fn test_view_hides_foreign_tokens() {
        let mut p = partition();
        let alice = OwnerRef::new("alice");
        let bob = OwnerRef::new("bob");
        let grant = p
            .acquire(&alice, &ids(&["A1"]), None, Duration::seconds(60), now())
            .unwrap();

        let mine = p.view_for(Some(&alice));
        let a1 = mine.iter().find(|u| u.unit_id == "A1").unwrap();
        assert!(a1.held_by_you);
        assert_eq!(a1.hold_token.as_ref(), Some(&grant.token));

        let theirs = p.view_for(Some(&bob));
        let a1 = theirs.iter().find(|u| u.unit_id == "A1").unwrap();
        assert!(!a1.held_by_you);
        assert!(a1.hold_token.is_none());
        assert_eq!(a1.status, UnitStatus::Held);
    }

    #[test]
    fn test_from_parts_rebuilds_owner_index() {
        let mut p = partition();
        let alice = OwnerRef::new("alice");
        let grant = p
            .acquire(&alice, &ids(&["A1"]), None, Duration::seconds(60), now())
            .unwrap();
        let rebuilt = Partition::from_parts(
            p.key.clone(),
            p.units.values().cloned(),
            p.holds.values().cloned(),
        );
        assert_eq!(rebuilt.active_hold_for(&alice).map(|h| &h.token), Some(&grant.token));
        assert_eq!(rebuilt, p);
    }
}
