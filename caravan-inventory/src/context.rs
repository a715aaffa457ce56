use caravan_core::DomainError;
use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

const STAY_SEPARATOR: &str = "..";

/// Date context a unit is sold for: a bus seat per journey date, a hotel room per stay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ContextKey {
    Journey {
        date: NaiveDate,
    },
    Stay {
        check_in: NaiveDate,
        check_out: NaiveDate,
    },
}

impl ContextKey {
    pub fn journey(date: NaiveDate) -> Self {
        ContextKey::Journey { date }
    }

    pub fn stay(check_in: NaiveDate, check_out: NaiveDate) -> Result<Self, DomainError> {
        if check_out <= check_in {
            return Err(DomainError::Validation(format!(
                "check-out {} must be after check-in {}",
                check_out, check_in
            )));
        }
        Ok(ContextKey::Stay {
            check_in,
            check_out,
        })
    }

    pub fn is_journey(&self) -> bool {
        matches!(self, ContextKey::Journey { .. })
    }

    pub fn is_stay(&self) -> bool {
        matches!(self, ContextKey::Stay { .. })
    }
}

impl fmt::Display for ContextKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextKey::Journey { date } => write!(f, "{}", date),
            ContextKey::Stay {
                check_in,
                check_out,
            } => write!(f, "{}{}{}", check_in, STAY_SEPARATOR, check_out),
        }
    }
}

impl FromStr for ContextKey {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse = |raw: &str| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .map_err(|e| DomainError::Validation(format!("invalid date '{}': {}", raw, e)))
        };

        match s.split_once(STAY_SEPARATOR) {
            Some((check_in, check_out)) => ContextKey::stay(parse(check_in)?, parse(check_out)?),
            None => Ok(ContextKey::journey(parse(s)?)),
        }
    }
}

impl Serialize for ContextKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ContextKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// One inventory partition: all units of a resource for one context.
/// Every hold lives inside exactly one partition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartitionKey {
    pub resource_id: Uuid,
    pub context: ContextKey,
}

impl PartitionKey {
    pub fn new(resource_id: Uuid, context: ContextKey) -> Self {
        Self {
            resource_id,
            context,
        }
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.resource_id, self.context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_context_key_text_form() {
        let journey = ContextKey::journey(date("2026-03-01"));
        assert_eq!(journey.to_string(), "2026-03-01");
        assert_eq!("2026-03-01".parse::<ContextKey>().unwrap(), journey);

        let stay = ContextKey::stay(date("2026-03-01"), date("2026-03-04")).unwrap();
        assert_eq!(stay.to_string(), "2026-03-01..2026-03-04");
        assert_eq!("2026-03-01..2026-03-04".parse::<ContextKey>().unwrap(), stay);
        assert!(stay.is_stay());
    }

    #[test]
    fn test_stay_requires_positive_length() {
        assert!(ContextKey::stay(date("2026-03-04"), date("2026-03-04")).is_err());
        assert!("2026-03-04..2026-03-01".parse::<ContextKey>().is_err());
        assert!("not-a-date".parse::<ContextKey>().is_err());
    }

    #[test]
    fn test_context_key_serializes_as_string() {
        let stay = ContextKey::stay(date("2026-03-01"), date("2026-03-02")).unwrap();
        let json = serde_json::to_string(&stay).unwrap();
        assert_eq!(json, "\"2026-03-01..2026-03-02\"");
        let back: ContextKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, stay);
    }
}
