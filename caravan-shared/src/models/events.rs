use uuid::Uuid;

/// Inventory change broadcast to seat-map subscribers and the event bus.
///
/// Hold tokens are capabilities and never appear in these payloads.
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, PartialEq)]
pub struct InventoryChangedEvent {
    pub resource_id: Uuid,
    pub context_key: String,
    pub unit_ids: Vec<String>,
    pub occurred_at: i64,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, PartialEq)]
pub struct MemberCancelledEvent {
    pub group_id: Uuid,
    pub member_id: Uuid,
    pub user_id: String,
    pub reason: String,
    pub occurred_at: i64,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, PartialEq)]
pub struct PaymentRecordedEvent {
    pub group_id: Uuid,
    pub member_id: Uuid,
    pub payment_id: Option<String>,
    pub amount: i64,
    pub succeeded: bool,
    pub occurred_at: i64,
}

/// One booking the Booking component must create for a paid member of a locked group.
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, PartialEq)]
pub struct GroupBookingRequest {
    pub member_id: Uuid,
    pub user_id: String,
    pub package_id: String,
    pub amount_paid: i64,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, PartialEq)]
pub struct GroupLockedEvent {
    pub group_id: Uuid,
    pub trip_id: Uuid,
    pub package_id: String,
    pub bookings: Vec<GroupBookingRequest>,
    pub occurred_at: i64,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    UnitsHeld(InventoryChangedEvent),
    UnitsReleased(InventoryChangedEvent),
    UnitsExpired(InventoryChangedEvent),
    UnitsBooked(InventoryChangedEvent),
    MemberCancelled(MemberCancelledEvent),
    PaymentRecorded(PaymentRecordedEvent),
    GroupLocked(GroupLockedEvent),
}

impl DomainEvent {
    pub fn topic(&self) -> &'static str {
        match self {
            DomainEvent::UnitsHeld(_) => "holds.created",
            DomainEvent::UnitsReleased(_) => "holds.released",
            DomainEvent::UnitsExpired(_) => "holds.expired",
            DomainEvent::UnitsBooked(_) => "holds.confirmed",
            DomainEvent::MemberCancelled(_) => "pooling.member_cancelled",
            DomainEvent::PaymentRecorded(_) => "pooling.payment_recorded",
            DomainEvent::GroupLocked(_) => "pooling.group_locked",
        }
    }

    /// Message key; keeps events of one resource or group on one partition.
    pub fn key(&self) -> String {
        match self {
            DomainEvent::UnitsHeld(e)
            | DomainEvent::UnitsReleased(e)
            | DomainEvent::UnitsExpired(e)
            | DomainEvent::UnitsBooked(e) => e.resource_id.to_string(),
            DomainEvent::MemberCancelled(e) => e.group_id.to_string(),
            DomainEvent::PaymentRecorded(e) => e.group_id.to_string(),
            DomainEvent::GroupLocked(e) => e.group_id.to_string(),
        }
    }

    /// Resource the event concerns, for inventory events only.
    pub fn resource_id(&self) -> Option<Uuid> {
        match self {
            DomainEvent::UnitsHeld(e)
            | DomainEvent::UnitsReleased(e)
            | DomainEvent::UnitsExpired(e)
            | DomainEvent::UnitsBooked(e) => Some(e.resource_id),
            _ => None,
        }
    }
}
