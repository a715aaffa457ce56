use crate::context::ContextKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

/// Opaque, unguessable hold identifier. Whoever presents it may release or confirm the hold.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HoldToken(String);

impl HoldToken {
    pub fn generate() -> Self {
        Self(format!("hld_{}", Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for HoldToken {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for HoldToken {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for HoldToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Session or user identity of the shopper; opaque to this service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerRef(String);

impl OwnerRef {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HoldStatus {
    Active,
    Confirmed,
    Released,
    Expired,
}

impl HoldStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HoldStatus::Active => "ACTIVE",
            HoldStatus::Confirmed => "CONFIRMED",
            HoldStatus::Released => "RELEASED",
            HoldStatus::Expired => "EXPIRED",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "ACTIVE" => Some(HoldStatus::Active),
            "CONFIRMED" => Some(HoldStatus::Confirmed),
            "RELEASED" => Some(HoldStatus::Released),
            "EXPIRED" => Some(HoldStatus::Expired),
            _ => None,
        }
    }
}

/// A lease over one or more units of a partition.
///
/// Closed holds (confirmed, released, expired) are kept as tombstones until the sweeper
/// purges them, so a late `confirm` can still be answered with `Expired`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Hold {
    pub token: HoldToken,
    pub resource_id: Uuid,
    pub context: ContextKey,
    pub owner: OwnerRef,
    pub unit_ids: BTreeSet<String>,
    pub status: HoldStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Hold {
    /// Active and not past its expiry.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.status == HoldStatus::Active && now <= self.expires_at
    }

    /// Still marked active but already past its expiry.
    pub fn is_lapsed(&self, now: DateTime<Utc>) -> bool {
        self.status == HoldStatus::Active && now > self.expires_at
    }

    pub(crate) fn close(&mut self, status: HoldStatus, now: DateTime<Utc>) {
        self.status = status;
        self.closed_at = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_tokens_are_unique() {
        let a = HoldToken::generate();
        let b = HoldToken::generate();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("hld_"));
        assert_eq!(a.as_str().len(), 4 + 32);
    }

    #[test]
    fn test_hold_status_text_round_trip() {
        for status in [
            HoldStatus::Active,
            HoldStatus::Confirmed,
            HoldStatus::Released,
            HoldStatus::Expired,
        ] {
            assert_eq!(HoldStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(HoldStatus::parse("HELD"), None);
    }
}
